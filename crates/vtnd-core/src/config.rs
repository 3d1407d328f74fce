// ── Engine configuration ──
//
// Tuning knobs for the engine. `vtnd-core` never reads files; the daemon
// loads a config through `vtnd-config` and hands an `EngineConfig` in.

use std::collections::HashMap;
use std::time::Duration;

use crate::model::KeyType;

/// What to do with controller data that has no model counterpart on import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnmappedImportPolicy {
    /// Drop the data and keep importing.
    #[default]
    Ignore,
    /// Fail the import.
    Error,
}

/// Batch-mode tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    /// Operations accumulated before an intermediate persistence commit.
    pub commit_limit: usize,
    /// Idle time after which an open batch window is closed.
    pub idle_timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            commit_limit: 1000,
            idle_timeout: Duration::from_secs(10),
        }
    }
}

/// Connection pool sizes handed to the persistence backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbPoolConfig {
    pub read_connections: usize,
    pub write_connections: usize,
}

impl Default for DbPoolConfig {
    fn default() -> Self {
        Self {
            read_connections: 8,
            write_connections: 1,
        }
    }
}

/// Session response timeouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutConfig {
    pub default: Duration,
    /// Applied to STATE reads, which may go out to a controller.
    pub state_read: Duration,
    /// Overrides for key types known to be slow.
    pub key_types: HashMap<KeyType, Duration>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default: Duration::from_secs(30),
            state_read: Duration::from_secs(60),
            key_types: HashMap::new(),
        }
    }
}

/// Everything the engine needs to know about its environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub unmapped_import: UnmappedImportPolicy,
    pub batch: BatchConfig,
    /// Map controller oper status onto model objects on STATE reads.
    pub oper_status_mapping: bool,
    pub db: DbPoolConfig,
    /// Upper bound on nodes returned by one bulk read.
    pub bulk_max_count: usize,
    pub timeouts: TimeoutConfig,
    /// Capacity hint for the event dispatch queue.
    pub event_queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            unmapped_import: UnmappedImportPolicy::default(),
            batch: BatchConfig::default(),
            oper_status_mapping: true,
            db: DbPoolConfig::default(),
            bulk_max_count: 10_000,
            timeouts: TimeoutConfig::default(),
            event_queue_capacity: 256,
        }
    }
}
