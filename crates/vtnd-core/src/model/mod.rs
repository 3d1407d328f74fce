// ── Domain model ──
//
// Value types shared by every engine component. None of them carry
// behaviour beyond classification and construction helpers.

pub mod config_node;
pub mod controller;
pub mod datatype;
pub mod event;
pub mod key_type;
pub mod operation;

pub use config_node::{ConfigKey, ConfigKeyVal, CtrlrDomain};
pub use controller::{AuditType, ControllerRecord, ControllerType};
pub use datatype::{ConfigMode, DataType};
pub use event::{Alarm, AlarmKind, EngineEvent, EventKind};
pub use key_type::KeyType;
pub use operation::{ConfigRequest, ConfigResponse, ControlOp, Operation, SessionId};
