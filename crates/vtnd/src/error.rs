//! CLI error types with miette diagnostics.
//!
//! Wraps config and engine failures into user-facing errors with help text.

use miette::Diagnostic;
use thiserror::Error;

use vtnd_config::ConfigError;
use vtnd_core::{CoreError, ErrorKind};

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
    pub const ENGINE: i32 = 4;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("Invalid configuration in {path}")]
    #[diagnostic(
        code(vtnd::config),
        help(
            "Fix the file or point at another one with --config.\n\
             Run: vtnd config show   to see the resolved values"
        )
    )]
    Config {
        path: String,
        #[source]
        source: ConfigError,
    },

    // ── Engine ───────────────────────────────────────────────────────
    #[error("Engine error ({kind}): {source}")]
    #[diagnostic(code(vtnd::engine))]
    Engine {
        kind: ErrorKind,
        #[source]
        source: CoreError,
    },

    // ── Output ───────────────────────────────────────────────────────
    #[error("Could not render {format} output: {message}")]
    #[diagnostic(code(vtnd::output))]
    Render { format: &'static str, message: String },

    #[error(transparent)]
    #[diagnostic(code(vtnd::io))]
    Io(#[from] std::io::Error),
}

impl From<CoreError> for CliError {
    fn from(source: CoreError) -> Self {
        Self::Engine {
            kind: source.kind(),
            source,
        }
    }
}

impl CliError {
    pub fn config(path: &std::path::Path, source: ConfigError) -> Self {
        Self::Config {
            path: path.display().to_string(),
            source,
        }
    }

    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { source, .. } => match source {
                ConfigError::Validation { .. } | ConfigError::Figment(_) => exit_code::CONFIG,
                ConfigError::Serialization(_) | ConfigError::Io(_) => exit_code::GENERAL,
            },
            Self::Engine { kind, .. } => match kind {
                ErrorKind::BadRequest | ErrorKind::NotAllowedForDatatype | ErrorKind::NotAllowedForKeyType => {
                    exit_code::USAGE
                }
                _ => exit_code::ENGINE,
            },
            Self::Render { .. } | Self::Io(_) => exit_code::GENERAL,
        }
    }
}
