// ── Candidate-dirty cache ──
//
// One flag per scope: the VIRTUAL objects and each VTN. GLOBAL is dirty
// when any of them is. Flags are set on every successful candidate edit
// and cleared when the scope commits or rolls back; the shallow check is
// a relaxed load of these flags and may briefly lag a concurrent edit.

use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;

use crate::model::{ConfigKeyVal, ConfigMode};

#[derive(Debug, Default)]
pub(crate) struct DirtyTracker {
    virtual_scope: AtomicBool,
    vtns: DashMap<String, AtomicBool>,
}

impl DirtyTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Mark the scope owning `node` dirty.
    pub(crate) fn mark(&self, node: &ConfigKeyVal) {
        match node.vtn_name() {
            Some(vtn) => self.set_vtn(vtn, true),
            None => self.virtual_scope.store(true, Ordering::Relaxed),
        }
    }

    pub(crate) fn set(&self, mode: &ConfigMode, dirty: bool) {
        match mode {
            ConfigMode::Global => {
                self.virtual_scope.store(dirty, Ordering::Relaxed);
                for flag in self.vtns.iter() {
                    flag.store(dirty, Ordering::Relaxed);
                }
            }
            ConfigMode::Virtual => self.virtual_scope.store(dirty, Ordering::Relaxed),
            ConfigMode::Vtn(name) => self.set_vtn(name, dirty),
        }
    }

    fn set_vtn(&self, vtn: &str, dirty: bool) {
        if let Some(flag) = self.vtns.get(vtn) {
            flag.store(dirty, Ordering::Relaxed);
            return;
        }
        if dirty {
            self.vtns.entry(vtn.to_owned()).or_default().store(true, Ordering::Relaxed);
        }
    }

    pub(crate) fn is_dirty(&self, mode: &ConfigMode) -> bool {
        match mode {
            ConfigMode::Global => {
                self.virtual_scope.load(Ordering::Relaxed)
                    || self.vtns.iter().any(|flag| flag.load(Ordering::Relaxed))
            }
            ConfigMode::Virtual => self.virtual_scope.load(Ordering::Relaxed),
            ConfigMode::Vtn(name) => self
                .vtns
                .get(name.as_str())
                .is_some_and(|flag| flag.load(Ordering::Relaxed)),
        }
    }

    pub(crate) fn reset(&self) {
        self.virtual_scope.store(false, Ordering::Relaxed);
        self.vtns.clear();
    }
}
