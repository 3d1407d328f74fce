// ── Inbound notifications and outbound alarms ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};

use super::config_node::ConfigKeyVal;

/// Tag of an [`EngineEvent`], used for logging and dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    ControllerStatus,
    LogicalPortStatus,
    BoundaryStatus,
    PathFault,
    PolicerFull,
    PolicerFail,
    NetworkMonitorFault,
    ResourceExhaustion,
}

/// A notification delivered to the engine through the dispatch queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    ControllerStatus {
        ctrlr: String,
        up: bool,
    },
    LogicalPortStatus {
        ctrlr: String,
        domain: String,
        port_id: String,
        up: bool,
    },
    BoundaryStatus {
        boundary_id: String,
        up: bool,
    },
    PathFault {
        ctrlr: String,
        domain: String,
        asserted: bool,
    },
    PolicerFull {
        ctrlr: String,
        domain: String,
        key: ConfigKeyVal,
        asserted: bool,
    },
    PolicerFail {
        ctrlr: String,
        domain: String,
        key: ConfigKeyVal,
        asserted: bool,
    },
    NetworkMonitorFault {
        ctrlr: String,
        domain: String,
        key: ConfigKeyVal,
        asserted: bool,
    },
    ResourceExhaustion {
        vtn: String,
        ctrlr: String,
        domain: String,
        asserted: bool,
    },
}

impl EngineEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ControllerStatus { .. } => EventKind::ControllerStatus,
            Self::LogicalPortStatus { .. } => EventKind::LogicalPortStatus,
            Self::BoundaryStatus { .. } => EventKind::BoundaryStatus,
            Self::PathFault { .. } => EventKind::PathFault,
            Self::PolicerFull { .. } => EventKind::PolicerFull,
            Self::PolicerFail { .. } => EventKind::PolicerFail,
            Self::NetworkMonitorFault { .. } => EventKind::NetworkMonitorFault,
            Self::ResourceExhaustion { .. } => EventKind::ResourceExhaustion,
        }
    }
}

// ── Alarms ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AlarmKind {
    InvalidConfig,
    PathFault,
    PolicerFull,
    PolicerFail,
    NetworkMonitorFault,
    ResourceExhaustion,
}

/// An alarm raise (`asserted`) or clear handed to the alarm sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alarm {
    pub kind: AlarmKind,
    pub asserted: bool,
    pub ctrlr: Option<String>,
    pub domain: Option<String>,
    pub vtn: Option<String>,
    pub key: Option<ConfigKeyVal>,
    pub timestamp: DateTime<Utc>,
}

impl Alarm {
    pub fn new(kind: AlarmKind, asserted: bool) -> Self {
        Self {
            kind,
            asserted,
            ctrlr: None,
            domain: None,
            vtn: None,
            key: None,
            timestamp: Utc::now(),
        }
    }

    pub fn for_ctrlr(mut self, ctrlr: impl Into<String>) -> Self {
        self.ctrlr = Some(ctrlr.into());
        self
    }

    pub fn for_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn for_vtn(mut self, vtn: impl Into<String>) -> Self {
        self.vtn = Some(vtn.into());
        self
    }

    pub fn with_key(mut self, key: ConfigKeyVal) -> Self {
        self.key = Some(key);
        self
    }
}
