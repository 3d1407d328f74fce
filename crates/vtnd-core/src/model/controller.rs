// ── Controller records ──
//
// One entry per (controller name, datatype) in the registry. The same
// controller may be known to CANDIDATE and RUNNING independently.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Kind of device-controller back end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ControllerType {
    /// OpenFlow controller.
    Pfc,
    /// Overlay (VXLAN) controller.
    Vnp,
    /// Policy-driven overlay controller.
    Polc,
    /// Controller that only exposes an operational view.
    Odc,
    /// Placeholder for configuration that is not realized anywhere.
    Unknown,
}

/// How an audit reconciles the model with a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AuditType {
    /// Push the full RUNNING image for the controller.
    #[default]
    Normal,
    /// Push only differences against what the controller reports.
    Simplified,
}

/// A device controller known to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerRecord {
    pub name: String,
    pub ctrlr_type: ControllerType,
    pub version: String,
    #[serde(default)]
    pub audit_type: AuditType,
    #[serde(default)]
    pub audit_done: bool,
    #[serde(default)]
    pub config_done: bool,
    #[serde(default)]
    pub invalid_config: bool,
    #[serde(default)]
    pub enable_audit: bool,
}

impl ControllerRecord {
    pub fn new(name: impl Into<String>, ctrlr_type: ControllerType, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ctrlr_type,
            version: version.into(),
            audit_type: AuditType::default(),
            audit_done: false,
            config_done: false,
            invalid_config: false,
            enable_audit: false,
        }
    }
}
