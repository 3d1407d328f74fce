// ── Controller registry ──
//
// In-memory directory of device controllers plus the fault, exhaustion
// and liveness state the event path accumulates about them. The registry
// is the only state written by both request tasks and the dispatch
// worker, so every concern sits behind its own lock and all mutation goes
// through methods on this type.
//
// None of these locks is ever held across an `.await`.

mod directory;
mod faults;
mod liveness;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use parking_lot::{Mutex, RwLock};

use crate::alarm::AlarmSink;
use crate::model::{ControllerRecord, DataType};

pub use faults::WILDCARD;

#[derive(Debug, Clone)]
struct Entry {
    record: ControllerRecord,
    datatype: DataType,
}

/// Directory of known controllers and their health.
pub struct ControllerRegistry {
    /// Sorted by (name, datatype).
    controllers: Mutex<Vec<Entry>>,
    /// ctrlr → domain → outstanding path-fault count.
    faults: RwLock<BTreeMap<String, BTreeMap<String, u32>>>,
    /// vtn → ctrlr → domains with an exhausted id pool.
    exhaustion: RwLock<BTreeMap<String, BTreeMap<String, BTreeSet<String>>>>,
    disconnected: DashSet<String>,
    /// ctrlr → logical port → last reported oper state (`true` = up).
    port_states: DashMap<String, BTreeMap<String, bool>>,
    boundary_states: DashMap<String, bool>,
    alarms: Arc<dyn AlarmSink>,
}

impl ControllerRegistry {
    pub fn new(alarms: Arc<dyn AlarmSink>) -> Self {
        Self {
            controllers: Mutex::new(Vec::new()),
            faults: RwLock::new(BTreeMap::new()),
            exhaustion: RwLock::new(BTreeMap::new()),
            disconnected: DashSet::new(),
            port_states: DashMap::new(),
            boundary_states: DashMap::new(),
            alarms,
        }
    }

    /// Forget everything: controllers, faults, exhaustion and liveness.
    ///
    /// Used when the node leaves the active role.
    pub fn clear_all(&self) {
        self.controllers.lock().clear();
        self.faults.write().clear();
        self.exhaustion.write().clear();
        self.disconnected.clear();
        self.port_states.clear();
        self.boundary_states.clear();
    }
}

impl std::fmt::Debug for ControllerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerRegistry")
            .field("controllers", &self.controllers.lock().len())
            .field("disconnected", &self.disconnected.len())
            .finish_non_exhaustive()
    }
}
