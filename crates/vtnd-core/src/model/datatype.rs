// ── Configuration universes and edit scopes ──

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use super::key_type::KeyType;

/// The configuration universe an operation targets.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DataType {
    /// Editable, not yet committed.
    Candidate,
    /// Committed and active.
    Running,
    /// Persisted boot image.
    Startup,
    /// Live operational view. Read-only.
    State,
    /// Pending-merge image pulled from a controller.
    Import,
    /// Scratch image used while reconciling with one controller.
    Audit,
}

impl DataType {
    /// Canonical datatype used for controller-registry lookups.
    ///
    /// STATE/RUNNING/AUDIT share the running record, CANDIDATE/IMPORT share
    /// the candidate record.
    pub fn canonical(self) -> Self {
        match self {
            Self::State | Self::Running | Self::Audit => Self::Running,
            Self::Candidate | Self::Import => Self::Candidate,
            Self::Startup => Self::Startup,
        }
    }
}

/// Edit scope a session is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "mode", content = "vtn", rename_all = "lowercase")]
pub enum ConfigMode {
    /// The whole configuration.
    Global,
    /// Only configuration independent of any VTN.
    Virtual,
    /// One named VTN.
    Vtn(String),
}

impl ConfigMode {
    /// Whether a key type may be seen or edited from this mode.
    pub fn is_visible(&self, kt: KeyType) -> bool {
        match self {
            Self::Global => true,
            Self::Virtual => kt == KeyType::Root || !kt.is_vtn_scoped(),
            Self::Vtn(_) => kt == KeyType::Root || kt.is_vtn_scoped(),
        }
    }

    /// Whether an instance owned by `vtn` (if any) belongs to this scope.
    pub fn owns_vtn(&self, vtn: Option<&str>) -> bool {
        match (self, vtn) {
            (Self::Vtn(name), Some(vtn)) => name == vtn,
            (Self::Vtn(_), None) => false,
            (Self::Global | Self::Virtual, _) => true,
        }
    }

    pub fn vtn_name(&self) -> Option<&str> {
        match self {
            Self::Vtn(name) => Some(name),
            Self::Global | Self::Virtual => None,
        }
    }
}

impl fmt::Display for ConfigMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => write!(f, "global"),
            Self::Virtual => write!(f, "virtual"),
            Self::Vtn(name) => write!(f, "vtn:{name}"),
        }
    }
}
