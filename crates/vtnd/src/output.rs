//! Output formatting: table, JSON, YAML, plain.

use std::io::{self, Write};

use tabled::{Table, Tabled, settings::Style};

use crate::cli::OutputFormat;
use crate::error::CliError;

// ── Render dispatchers ───────────────────────────────────────────────

/// Render a list in the chosen format. `plain` emits `id_fn` per line.
pub fn render_list<T, R>(
    format: &OutputFormat,
    data: &[T],
    to_row: impl Fn(&T) -> R,
    id_fn: impl Fn(&T) -> String,
) -> Result<String, CliError>
where
    T: serde::Serialize,
    R: Tabled,
{
    match format {
        OutputFormat::Table => {
            let rows: Vec<R> = data.iter().map(to_row).collect();
            Ok(Table::new(rows).with(Style::rounded()).to_string())
        }
        OutputFormat::Plain => Ok(data.iter().map(id_fn).collect::<Vec<_>>().join("\n")),
        structured => render_structured(structured, data),
    }
}

/// Render a single item. `table` and `plain` use `text_fn`.
pub fn render_single<T>(format: &OutputFormat, data: &T, text_fn: impl Fn(&T) -> Result<String, CliError>) -> Result<String, CliError>
where
    T: serde::Serialize,
{
    match format {
        OutputFormat::Table | OutputFormat::Plain => text_fn(data),
        structured => render_structured(structured, data),
    }
}

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

// ── Format-specific renderers ────────────────────────────────────────

fn render_structured<T: serde::Serialize + ?Sized>(format: &OutputFormat, data: &T) -> Result<String, CliError> {
    let rendered = match format {
        OutputFormat::JsonCompact => serde_json::to_string(data).map_err(|e| render_err("json", e)),
        OutputFormat::Yaml => serde_yaml::to_string(data).map_err(|e| render_err("yaml", e)),
        OutputFormat::Json | OutputFormat::Table | OutputFormat::Plain => {
            serde_json::to_string_pretty(data).map_err(|e| render_err("json", e))
        }
    }?;
    Ok(rendered.trim_end().to_owned())
}

fn render_err(format: &'static str, e: impl std::fmt::Display) -> CliError {
    CliError::Render {
        format,
        message: e.to_string(),
    }
}

pub fn render_toml<T: serde::Serialize>(data: &T) -> Result<String, CliError> {
    toml::to_string_pretty(data)
        .map(|s| s.trim_end().to_owned())
        .map_err(|e| render_err("toml", e))
}
