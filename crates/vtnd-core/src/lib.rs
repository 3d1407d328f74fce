//! Configuration-transaction engine of an SDN controller.
//!
//! The engine sits between northbound sessions that edit a virtual-network
//! model and the device controllers that realize it:
//!
//! - **[`Coordinator`]** is the facade. It routes per-key-type requests to
//!   [`KeyTypeManager`]s under the right scope locks, drives the
//!   start/vote/global-commit/end state machines for transactions and
//!   audits, imports a controller's configuration and merges it into
//!   CANDIDATE, and runs batch windows.
//!
//! - **[`KeyTypeTree`]** fixes the parent/child hierarchy of every key
//!   type. [`BulkReader`] walks configuration instances in its preorder.
//!
//! - **[`ControllerRegistry`]** keeps the controller directory plus the
//!   fault, exhaustion and liveness state built up from events.
//!
//! - **[`EventQueue`]** serializes controller notifications onto one
//!   worker so event handling never runs concurrently with itself.
//!
//! Storage, object semantics and the controller transport are seams:
//! [`Persistence`], [`KeyTypeManager`] and [`Southbound`]. The [`store`]
//! module and [`LoopbackSouthbound`] provide complete in-process versions,
//! wired together by [`Coordinator::in_memory`].

pub mod alarm;
pub mod bulk;
pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod keytree;
pub mod manager;
pub mod model;
pub mod registry;
pub mod southbound;
pub mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use alarm::{AlarmSink, RecordingAlarmSink, TracingAlarmSink};
pub use bulk::BulkReader;
pub use config::{BatchConfig, DbPoolConfig, EngineConfig, TimeoutConfig, UnmappedImportPolicy};
pub use coordinator::{
    Collaborators, ControllerResult, ControllerUpdate, Coordinator, ImportKind, ImportSummary, InMemoryEngine,
    NodeRole, PhaseReport, TimeoutPolicy, TxId, TxOutcome, TxPhase,
};
pub use dispatch::{EventHandler, EventQueue};
pub use error::{CoreError, CoreResult, ErrorKind};
pub use keytree::{KeyTreeError, KeyTypeTree};
pub use manager::{ChangeOp, ConfigChange, KeyTypeManager, ManagerTable, Persistence, WorkId};
pub use registry::ControllerRegistry;
pub use southbound::{CommitPhase, LoopbackSouthbound, ResultCode, Southbound};
pub use store::{MemoryStore, TableManager};

pub use model::{
    Alarm, AlarmKind, AuditType, ConfigKey, ConfigKeyVal, ConfigMode, ConfigRequest, ConfigResponse, ControlOp,
    ControllerRecord, ControllerType, CtrlrDomain, DataType, EngineEvent, EventKind, KeyType, Operation, SessionId,
};
