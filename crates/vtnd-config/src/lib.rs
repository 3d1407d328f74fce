//! Configuration for the vtnd daemon.
//!
//! A TOML file plus `VTND_`-prefixed environment variables, layered over
//! built-in defaults and validated before conversion to
//! [`vtnd_core::EngineConfig`]. The engine itself never touches files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use vtnd_core::{
    BatchConfig, DbPoolConfig, EngineConfig, KeyType, TimeoutConfig, UnmappedImportPolicy,
};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub import: ImportSection,
    #[serde(default)]
    pub batch: BatchSection,
    #[serde(default)]
    pub oper_status: OperStatusSection,
    #[serde(default)]
    pub db: DbSection,
    #[serde(default)]
    pub bulk: BulkSection,
    #[serde(default)]
    pub timeouts: TimeoutsSection,
    #[serde(default)]
    pub events: EventsSection,
}

/// Handling of controller data with no model counterpart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnmappedPolicy {
    #[default]
    Ignore,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ImportSection {
    #[serde(default)]
    pub unmapped: UnmappedPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BatchSection {
    #[serde(default = "default_commit_limit")]
    pub commit_limit: usize,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

impl Default for BatchSection {
    fn default() -> Self {
        Self {
            commit_limit: default_commit_limit(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OperStatusSection {
    #[serde(default = "default_true")]
    pub mapping: bool,
}

impl Default for OperStatusSection {
    fn default() -> Self {
        Self { mapping: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DbSection {
    #[serde(default = "default_read_connections")]
    pub read_connections: usize,
    #[serde(default = "default_write_connections")]
    pub write_connections: usize,
}

impl Default for DbSection {
    fn default() -> Self {
        Self {
            read_connections: default_read_connections(),
            write_connections: default_write_connections(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BulkSection {
    #[serde(default = "default_bulk_max")]
    pub max_count: usize,
}

impl Default for BulkSection {
    fn default() -> Self {
        Self {
            max_count: default_bulk_max(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TimeoutsSection {
    #[serde(default = "default_timeout")]
    pub default_secs: u64,
    #[serde(default = "default_state_read_timeout")]
    pub state_read_secs: u64,
    /// Per-key-type overrides in seconds, keyed by snake_case key type name.
    #[serde(default)]
    pub key_types: BTreeMap<String, u64>,
}

impl Default for TimeoutsSection {
    fn default() -> Self {
        Self {
            default_secs: default_timeout(),
            state_read_secs: default_state_read_timeout(),
            key_types: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EventsSection {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for EventsSection {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_commit_limit() -> usize {
    1000
}
fn default_idle_timeout() -> u64 {
    10
}
fn default_true() -> bool {
    true
}
fn default_read_connections() -> usize {
    8
}
fn default_write_connections() -> usize {
    1
}
fn default_bulk_max() -> usize {
    10_000
}
fn default_timeout() -> u64 {
    30
}
fn default_state_read_timeout() -> u64 {
    60
}
fn default_queue_capacity() -> usize {
    256
}

// ── Validation and conversion ───────────────────────────────────────

impl Config {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch.commit_limit == 0 {
            return Err(invalid("batch.commit_limit", "must be at least 1"));
        }
        if self.batch.idle_timeout_secs == 0 {
            return Err(invalid("batch.idle_timeout_secs", "must be at least 1"));
        }
        if self.db.read_connections == 0 || self.db.write_connections == 0 {
            return Err(invalid("db", "connection pools need at least one connection each"));
        }
        if self.bulk.max_count == 0 {
            return Err(invalid("bulk.max_count", "must be at least 1"));
        }
        if self.timeouts.default_secs == 0 || self.timeouts.state_read_secs == 0 {
            return Err(invalid("timeouts", "timeouts must be at least one second"));
        }
        self.key_type_timeouts().map(|_| ())
    }

    fn key_type_timeouts(&self) -> Result<Vec<(KeyType, Duration)>, ConfigError> {
        self.timeouts
            .key_types
            .iter()
            .map(|(name, secs)| {
                let kt = KeyType::from_str(name)
                    .map_err(|_| invalid("timeouts.key_types", format!("unknown key type '{name}'")))?;
                if kt == KeyType::Root {
                    return Err(invalid("timeouts.key_types", "the root key type has no requests"));
                }
                if *secs == 0 {
                    return Err(invalid("timeouts.key_types", format!("timeout for '{name}' must be at least 1")));
                }
                Ok((kt, Duration::from_secs(*secs)))
            })
            .collect()
    }

    /// Validate and convert into the engine's configuration.
    pub fn to_engine_config(&self) -> Result<EngineConfig, ConfigError> {
        self.validate()?;
        Ok(EngineConfig {
            unmapped_import: match self.import.unmapped {
                UnmappedPolicy::Ignore => UnmappedImportPolicy::Ignore,
                UnmappedPolicy::Error => UnmappedImportPolicy::Error,
            },
            batch: BatchConfig {
                commit_limit: self.batch.commit_limit,
                idle_timeout: Duration::from_secs(self.batch.idle_timeout_secs),
            },
            oper_status_mapping: self.oper_status.mapping,
            db: DbPoolConfig {
                read_connections: self.db.read_connections,
                write_connections: self.db.write_connections,
            },
            bulk_max_count: self.bulk.max_count,
            timeouts: TimeoutConfig {
                default: Duration::from_secs(self.timeouts.default_secs),
                state_read: Duration::from_secs(self.timeouts.state_read_secs),
                key_types: self.key_type_timeouts()?.into_iter().collect(),
            },
            event_queue_capacity: self.events.queue_capacity,
        })
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("org", "vtnd", "vtnd").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("vtnd");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Layered sources: defaults, then the file at `path`, then environment.
///
/// Environment keys use a double underscore between section and field,
/// e.g. `VTND_BATCH__COMMIT_LIMIT=500`.
pub fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("VTND_").split("__"))
}

/// Load and validate the config at `path`. A missing file yields defaults.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let config: Config = figment(path).extract()?;
    config.validate()?;
    Ok(config)
}

/// Load and validate the config at the canonical path.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn write(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn missing_file_gives_engine_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.to_engine_config().unwrap(), EngineConfig::default());
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            r#"
            [import]
            unmapped = "error"

            [batch]
            commit_limit = 50

            [bulk]
            max_count = 500

            [timeouts]
            state_read_secs = 90

            [timeouts.key_types]
            vbr_if = 120
            "#,
        );
        let engine = load_config_from(&path).unwrap().to_engine_config().unwrap();
        assert_eq!(engine.unmapped_import, UnmappedImportPolicy::Error);
        assert_eq!(engine.batch.commit_limit, 50);
        assert_eq!(engine.batch.idle_timeout, Duration::from_secs(10));
        assert_eq!(engine.bulk_max_count, 500);
        assert_eq!(engine.timeouts.state_read, Duration::from_secs(90));
        assert_eq!(
            engine.timeouts.key_types.get(&KeyType::VbrIf),
            Some(&Duration::from_secs(120))
        );
    }

    #[test]
    fn unknown_key_type_override_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "[timeouts.key_types]\nvbridgee = 5\n");
        let err = load_config_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "timeouts.key_types"));
    }

    #[test]
    fn zero_limits_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "[batch]\ncommit_limit = 0\n");
        assert!(matches!(
            load_config_from(&path).unwrap_err(),
            ConfigError::Validation { .. }
        ));
    }

    #[test]
    fn malformed_file_is_a_loading_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "[bulk]\nmax_count = \"lots\"\n");
        assert!(matches!(load_config_from(&path).unwrap_err(), ConfigError::Figment(_)));
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.db.read_connections = 2;
        config.timeouts.key_types.insert("vtn".into(), 45);
        save_config(&config, &path).unwrap();
        assert_eq!(load_config_from(&path).unwrap(), config);
    }
}
