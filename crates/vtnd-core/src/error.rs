// ── Core error types ──
//
// The engine's result taxonomy. Per-key-type managers return these
// unchanged; controller result codes are reclassified into them by
// `coordinator::results` before reaching the transaction coordinator.

use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};
use thiserror::Error;

use crate::model::{DataType, KeyType};

/// Coarse classification of a [`CoreError`], stable across messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    BadRequest,
    NotAllowedForDatatype,
    NotAllowedForKeyType,
    NoSuchInstance,
    InstanceExists,
    ParentDoesNotExist,
    CfgSyntax,
    CfgSemantic,
    NotSupportedByController,
    ControllerDisconnected,
    ShuttingDown,
    NotSupportedByStandby,
    AuditCancelled,
    MergeConflict,
    Timeout,
    Generic,
}

/// Unified error type for the core crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    // ── Request shape ────────────────────────────────────────────────
    #[error("Bad request: {message}")]
    BadRequest { message: String },

    #[error("Operation {operation} is not allowed on the {datatype} datatype")]
    NotAllowedForDatatype { operation: String, datatype: DataType },

    #[error("Operation {operation} is not allowed for key type {key_type}")]
    NotAllowedForKeyType { operation: String, key_type: KeyType },

    // ── Instance lookups ─────────────────────────────────────────────
    #[error("No such instance: {what}")]
    NoSuchInstance { what: String },

    #[error("Instance already exists: {what}")]
    InstanceExists { what: String },

    #[error("Parent does not exist: {what}")]
    ParentDoesNotExist { what: String },

    // ── Value validation (from managers) ─────────────────────────────
    #[error("Syntax error: {message}")]
    CfgSyntax { message: String },

    #[error("Semantic error: {message}")]
    CfgSemantic { message: String },

    // ── Controller ───────────────────────────────────────────────────
    #[error("Not supported by controller {ctrlr}: {message}")]
    NotSupportedByController { ctrlr: String, message: String },

    #[error("Controller {ctrlr} is disconnected")]
    ControllerDisconnected { ctrlr: String },

    // ── Node lifecycle ───────────────────────────────────────────────
    #[error("Node is shutting down")]
    ShuttingDown,

    #[error("Operation not supported on a standby node")]
    NotSupportedByStandby,

    #[error("Audit of {ctrlr} was cancelled")]
    AuditCancelled { ctrlr: String },

    // ── Import / merge ───────────────────────────────────────────────
    #[error("Merge conflict on {key}: {message}")]
    MergeConflict { key: String, message: String },

    // ── Timing ───────────────────────────────────────────────────────
    #[error("Timed out: {what}")]
    Timeout { what: String },

    // ── Internal ─────────────────────────────────────────────────────
    #[error("Persistence failure: {message}")]
    Persistence { message: String },

    #[error("Internal error: {0}")]
    Generic(String),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BadRequest { .. } => ErrorKind::BadRequest,
            Self::NotAllowedForDatatype { .. } => ErrorKind::NotAllowedForDatatype,
            Self::NotAllowedForKeyType { .. } => ErrorKind::NotAllowedForKeyType,
            Self::NoSuchInstance { .. } => ErrorKind::NoSuchInstance,
            Self::InstanceExists { .. } => ErrorKind::InstanceExists,
            Self::ParentDoesNotExist { .. } => ErrorKind::ParentDoesNotExist,
            Self::CfgSyntax { .. } => ErrorKind::CfgSyntax,
            Self::CfgSemantic { .. } => ErrorKind::CfgSemantic,
            Self::NotSupportedByController { .. } => ErrorKind::NotSupportedByController,
            Self::ControllerDisconnected { .. } => ErrorKind::ControllerDisconnected,
            Self::ShuttingDown => ErrorKind::ShuttingDown,
            Self::NotSupportedByStandby => ErrorKind::NotSupportedByStandby,
            Self::AuditCancelled { .. } => ErrorKind::AuditCancelled,
            Self::MergeConflict { .. } => ErrorKind::MergeConflict,
            Self::Timeout { .. } => ErrorKind::Timeout,
            // Callers only ever see persistence trouble as an internal failure.
            Self::Persistence { .. } | Self::Generic(_) => ErrorKind::Generic,
        }
    }

    pub fn no_such_instance(what: impl ToString) -> Self {
        Self::NoSuchInstance {
            what: what.to_string(),
        }
    }

    pub fn instance_exists(what: impl ToString) -> Self {
        Self::InstanceExists {
            what: what.to_string(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    /// Node-lifecycle rejections, reported distinctly to the transaction
    /// coordinator.
    pub fn is_lifecycle_rejection(&self) -> bool {
        matches!(self, Self::ShuttingDown | Self::NotSupportedByStandby)
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistence_failures_surface_as_generic() {
        let err = CoreError::Persistence {
            message: "disk full".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Generic);
        assert_eq!(err.to_string(), "Persistence failure: disk full");
    }

    #[test]
    fn lifecycle_rejections_are_flagged() {
        assert!(CoreError::ShuttingDown.is_lifecycle_rejection());
        assert!(CoreError::NotSupportedByStandby.is_lifecycle_rejection());
        assert!(!CoreError::Generic("x".into()).is_lifecycle_rejection());
    }
}
