// ── Scope and datatype locks ──
//
// Candidate scope locks are hierarchical: GLOBAL takes the global lock
// exclusively, VIRTUAL and VTN(name) take it shared plus their own lock.
// A `LockPlan` names every lock an operation needs; `acquire` takes them
// in the fixed order candidate scope, RUNNING, STARTUP, IMPORT, AUDIT and
// the returned `LockSet` releases them in reverse.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::trace;

use crate::model::{ConfigMode, DataType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Access {
    Read,
    Write,
}

/// Locks one operation needs.
#[derive(Debug, Clone, Default)]
pub(crate) struct LockPlan {
    candidate: Option<(ConfigMode, Access)>,
    running: Option<Access>,
    startup: Option<Access>,
    import: Option<Access>,
    audit: Option<Access>,
}

impl LockPlan {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn candidate(mut self, mode: &ConfigMode, access: Access) -> Self {
        self.candidate = Some((mode.clone(), access));
        self
    }

    pub(crate) fn running(mut self, access: Access) -> Self {
        self.running = Some(access);
        self
    }

    pub(crate) fn import(mut self, access: Access) -> Self {
        self.import = Some(access);
        self
    }

    pub(crate) fn audit(mut self, access: Access) -> Self {
        self.audit = Some(access);
        self
    }

    /// The one lock guarding `dt` for a plain request.
    pub(crate) fn for_datatype(mode: &ConfigMode, dt: DataType, access: Access) -> Self {
        let plan = Self::new();
        match dt {
            DataType::Candidate => plan.candidate(mode, access),
            DataType::Running | DataType::State => plan.running(access),
            DataType::Startup => Self {
                startup: Some(access),
                ..plan
            },
            DataType::Import => plan.import(access),
            DataType::Audit => plan.audit(access),
        }
    }
}

enum Guard {
    Read(OwnedRwLockReadGuard<()>),
    Write(OwnedRwLockWriteGuard<()>),
}

/// Held locks. Dropping releases them newest first.
pub(crate) struct LockSet {
    guards: Vec<Guard>,
}

impl LockSet {
    pub(crate) fn len(&self) -> usize {
        self.guards.len()
    }
}

impl Drop for LockSet {
    fn drop(&mut self) {
        while let Some(guard) = self.guards.pop() {
            drop(guard);
        }
    }
}

impl std::fmt::Debug for LockSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockSet").field("held", &self.guards.len()).finish()
    }
}

type Lock = Arc<RwLock<()>>;

pub(crate) struct ScopeLocks {
    global: Lock,
    virtual_scope: Lock,
    vtn: DashMap<String, Lock>,
    running: Lock,
    startup: Lock,
    import: Lock,
    audit: Lock,
}

impl ScopeLocks {
    pub(crate) fn new() -> Self {
        Self {
            global: Lock::default(),
            virtual_scope: Lock::default(),
            vtn: DashMap::new(),
            running: Lock::default(),
            startup: Lock::default(),
            import: Lock::default(),
            audit: Lock::default(),
        }
    }

    pub(crate) async fn acquire(&self, plan: &LockPlan) -> LockSet {
        let mut set = LockSet { guards: Vec::new() };

        if let Some((mode, access)) = &plan.candidate {
            match mode {
                ConfigMode::Global => set.guards.push(take(&self.global, *access).await),
                ConfigMode::Virtual => {
                    set.guards.push(take(&self.global, Access::Read).await);
                    set.guards.push(take(&self.virtual_scope, *access).await);
                }
                ConfigMode::Vtn(name) => {
                    set.guards.push(take(&self.global, Access::Read).await);
                    let lock = Arc::clone(self.vtn.entry(name.clone()).or_default().value());
                    set.guards.push(take(&lock, *access).await);
                }
            }
        }
        for (lock, access) in [
            (&self.running, plan.running),
            (&self.startup, plan.startup),
            (&self.import, plan.import),
            (&self.audit, plan.audit),
        ] {
            if let Some(access) = access {
                set.guards.push(take(lock, access).await);
            }
        }

        trace!(held = set.len(), "locks acquired");
        set
    }
}

impl std::fmt::Debug for ScopeLocks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeLocks")
            .field("vtn_scopes", &self.vtn.len())
            .finish_non_exhaustive()
    }
}

async fn take(lock: &Lock, access: Access) -> Guard {
    match access {
        Access::Read => Guard::Read(Arc::clone(lock).read_owned().await),
        Access::Write => Guard::Write(Arc::clone(lock).write_owned().await),
    }
}
