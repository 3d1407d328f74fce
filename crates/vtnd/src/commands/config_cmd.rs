//! Config subcommand handlers.

use super::{config_file, load_config};
use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

pub fn handle(args: &ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let path = config_file(global);
    match args.command {
        ConfigCommand::Path => {
            output::print_output(&path.display().to_string(), global.quiet);
        }
        ConfigCommand::Show => {
            let cfg = load_config(global)?;
            let rendered = output::render_single(&global.output, &cfg, output::render_toml)?;
            output::print_output(&rendered, global.quiet);
        }
        ConfigCommand::Validate => {
            let engine = load_config(global)?
                .to_engine_config()
                .map_err(|e| CliError::config(&path, e))?;
            tracing::debug!(?engine, "configuration resolved");
            let note = if path.exists() { "" } else { " (file absent, defaults apply)" };
            output::print_output(&format!("{}: ok{note}", path.display()), global.quiet);
        }
    }
    Ok(())
}
