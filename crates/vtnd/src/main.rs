mod cli;
mod commands;
mod error;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};
use crate::error::CliError;

/// Crates whose log level follows `-v`; everything else stays at `warn`.
const ENGINE_TARGETS: [&str; 2] = ["vtnd", "vtnd_core"];

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr so command output on stdout stays parseable
    init_tracing(cli.global.verbose, cli.global.quiet);

    // Map the failure to its exit code after rendering the diagnostic
    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

/// `RUST_LOG` wins when set.
fn init_tracing(verbosity: u8, quiet: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_directives(verbosity, quiet))),
        )
        .with_target(verbosity >= 2)
        .with_writer(std::io::stderr)
        .init();
}

/// `-v` raises the engine's own level and `-q` drops it to errors.
fn log_directives(verbosity: u8, quiet: bool) -> String {
    let level = match (quiet, verbosity) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };
    ENGINE_TARGETS
        .iter()
        .fold(String::from("warn"), |acc, target| format!("{acc},{target}={level}"))
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        // The only command that builds an engine
        Command::Run(args) => commands::run::handle(args, &cli.global).await,

        // Offline inspection: no engine, no runtime state
        Command::KeyTypes(args) => commands::key_types::handle(&args, &cli.global),
        Command::Config(args) => commands::config_cmd::handle(&args, &cli.global),

        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "vtnd", &mut std::io::stdout());
            Ok(())
        }
    }
}
