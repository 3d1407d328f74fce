// ── Phase results ──
//
// What a transaction or audit phase reports back: one entry per
// controller touched, each carrying the code the controller sent and the
// local error it was classified as.

use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::CoreError;
use crate::model::ConfigKeyVal;
use crate::southbound::ResultCode;

/// Identity of one commit transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxId(Uuid);

impl TxId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TxPhase {
    Start,
    Vote,
    GlobalCommit,
    End,
}

/// Outcome for one controller in one phase.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerResult {
    /// Empty for failures that happened before any controller was involved.
    pub ctrlr: String,
    /// What the controller answered, if it was asked.
    pub code: Option<ResultCode>,
    pub error: Option<CoreError>,
    /// Objects the failure is attributed to.
    pub error_keys: Vec<ConfigKeyVal>,
}

impl ControllerResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-controller results of one phase.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseReport {
    pub phase: TxPhase,
    pub results: Vec<ControllerResult>,
}

impl PhaseReport {
    pub(crate) fn new(phase: TxPhase) -> Self {
        Self {
            phase,
            results: Vec::new(),
        }
    }

    /// A failure with no controller attached. The caller always gets at
    /// least one result to look at.
    pub(crate) fn local_failure(phase: TxPhase, err: CoreError) -> Self {
        log_error(phase, "", &err);
        Self {
            phase,
            results: vec![ControllerResult {
                ctrlr: String::new(),
                code: None,
                error: Some(err),
                error_keys: Vec::new(),
            }],
        }
    }

    /// Record a controller's answer, classifying it for this phase.
    pub(crate) fn record(&mut self, ctrlr: &str, code: ResultCode, keys: Vec<ConfigKeyVal>) {
        let error = classify(self.phase, ctrlr, code);
        self.results.push(ControllerResult {
            ctrlr: ctrlr.to_owned(),
            code: Some(code),
            error_keys: if error.is_some() { keys } else { Vec::new() },
            error,
        });
    }

    pub fn is_success(&self) -> bool {
        self.results.iter().all(ControllerResult::is_success)
    }

    /// First error in the report, if any.
    pub fn first_error(&self) -> Option<&CoreError> {
        self.results.iter().find_map(|r| r.error.as_ref())
    }

    pub fn failed_controllers(&self) -> impl Iterator<Item = &str> {
        self.results
            .iter()
            .filter(|r| !r.is_success() && !r.ctrlr.is_empty())
            .map(|r| r.ctrlr.as_str())
    }
}

/// Map a controller code to the local taxonomy. `None` means the phase
/// may proceed for this controller.
pub(crate) fn classify(phase: TxPhase, ctrlr: &str, code: ResultCode) -> Option<CoreError> {
    let err = match code {
        ResultCode::Success => return None,
        ResultCode::Disconnected | ResultCode::NotSentToController if phase == TxPhase::Vote => {
            warn!(ctrlr, %code, "controller skipped during vote");
            return None;
        }
        other => to_error(ctrlr, other),
    };
    log_error(phase, ctrlr, &err);
    Some(err)
}

/// Phase-independent mapping, used outside the commit phases.
pub(crate) fn to_error(ctrlr: &str, code: ResultCode) -> CoreError {
    match code {
        ResultCode::Disconnected | ResultCode::NotSentToController => CoreError::ControllerDisconnected {
            ctrlr: ctrlr.to_owned(),
        },
        ResultCode::CfgSyntax => CoreError::CfgSyntax {
            message: format!("rejected by controller {ctrlr}"),
        },
        ResultCode::CfgSemantic => CoreError::CfgSemantic {
            message: format!("rejected by controller {ctrlr}"),
        },
        ResultCode::NotSupported => CoreError::NotSupportedByController {
            ctrlr: ctrlr.to_owned(),
            message: "operation not supported".into(),
        },
        ResultCode::Timeout => CoreError::Timeout {
            what: format!("controller {ctrlr}"),
        },
        ResultCode::Success | ResultCode::Unknown(_) => {
            CoreError::Generic(format!("controller {ctrlr} answered {code}"))
        }
    }
}

fn log_error(phase: TxPhase, ctrlr: &str, err: &CoreError) {
    if matches!(err, CoreError::Generic(_) | CoreError::Persistence { .. }) {
        error!(%phase, ctrlr, error = %err, "phase failed");
    } else {
        warn!(%phase, ctrlr, error = %err, "phase failed");
    }
}
