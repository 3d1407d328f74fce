//! Clap derive structures for the `vtnd` binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// vtnd -- configuration-transaction engine for virtual tenant networks
#[derive(Debug, Parser)]
#[command(
    name = "vtnd",
    version,
    about = "Run and inspect the vtnd configuration-transaction engine",
    long_about = "Coordinates candidate/running configuration of virtual tenant networks\n\
        across device controllers: scope locks, multi-phase commit, audit and import.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config directory)
    #[arg(long, short = 'C', env = "VTND_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'o', env = "VTND_OUTPUT", default_value = "table", global = true)]
    pub output: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the engine and serve until interrupted
    Run(RunArgs),

    /// Print the key-type hierarchy in preorder
    #[command(alias = "kt")]
    KeyTypes(KeyTypesArgs),

    /// Inspect the configuration file
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Stay in the standby role instead of taking over
    #[arg(long, conflicts_with = "failover")]
    pub standby: bool,

    /// Take over as after a fail-over (rebuild dirty flags from storage)
    #[arg(long)]
    pub failover: bool,
}

#[derive(Debug, Args)]
pub struct KeyTypesArgs {
    /// Show the import hierarchy instead of the live one
    #[arg(long)]
    pub import: bool,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display the resolved configuration
    Show,

    /// Print the config file path
    Path,

    /// Check the configuration and exit
    Validate,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
