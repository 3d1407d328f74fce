// ── Inbound request vocabulary ──
//
// The transport decodes client messages into these types. The engine
// cross-validates operation × datatype before doing anything else.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};

use super::config_node::ConfigKeyVal;
use super::datatype::{ConfigMode, DataType};

/// Identity of a client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u32);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sub-operation selector for [`Operation::Control`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ControlOp {
    Ping,
}

/// Per-key-type operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
    Rename,
    Read,
    ReadSiblingBegin,
    ReadSibling,
    ReadSiblingCount,
    ReadNext,
    ReadBulk,
    Control(ControlOp),
}

impl Operation {
    /// Operations that modify configuration.
    pub fn is_write(self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::Delete | Self::Rename)
    }

    pub fn is_read(self) -> bool {
        matches!(
            self,
            Self::Read
                | Self::ReadSiblingBegin
                | Self::ReadSibling
                | Self::ReadSiblingCount
                | Self::ReadNext
                | Self::ReadBulk
        )
    }

    /// Whether this operation may target `dt`.
    pub fn allowed_on(self, dt: DataType) -> bool {
        match self {
            Self::Create | Self::Delete | Self::Rename => dt == DataType::Candidate,
            Self::Update => matches!(dt, DataType::Candidate | DataType::Import),
            Self::Read => true,
            Self::ReadSiblingBegin
            | Self::ReadSibling
            | Self::ReadSiblingCount
            | Self::ReadNext
            | Self::ReadBulk => dt != DataType::Audit,
            Self::Control(_) => matches!(dt, DataType::Running | DataType::State),
        }
    }
}

/// A decoded per-key-type request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigRequest {
    pub session: SessionId,
    pub mode: ConfigMode,
    pub operation: Operation,
    pub datatype: DataType,
    pub ckv: ConfigKeyVal,
    /// Result budget for sibling and bulk reads. Unset means the
    /// configured bulk maximum; zero means nothing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_count: Option<usize>,
    /// Target leaf name for [`Operation::Rename`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename_to: Option<String>,
}

impl ConfigRequest {
    pub fn new(
        session: SessionId,
        mode: ConfigMode,
        operation: Operation,
        datatype: DataType,
        ckv: ConfigKeyVal,
    ) -> Self {
        Self {
            session,
            mode,
            operation,
            datatype,
            ckv,
            max_count: None,
            rename_to: None,
        }
    }

    pub fn with_max_count(mut self, max_count: usize) -> Self {
        self.max_count = Some(max_count);
        self
    }

    pub fn with_rename_to(mut self, name: impl Into<String>) -> Self {
        self.rename_to = Some(name.into());
        self
    }
}

/// Result of a successful per-key-type request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ConfigResponse {
    Done,
    Nodes(Vec<ConfigKeyVal>),
    Count(usize),
}

impl ConfigResponse {
    /// Nodes carried by the response (empty for `Done`/`Count`).
    pub fn into_nodes(self) -> Vec<ConfigKeyVal> {
        match self {
            Self::Nodes(nodes) => nodes,
            Self::Done | Self::Count(_) => Vec::new(),
        }
    }
}
