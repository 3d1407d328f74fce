// ── Coordinator ──
//
// The engine's front door. Owns the registry, the scope locks and the
// transaction slots, routes per-key-type requests to managers and drives
// the commit, audit and import state machines against controllers.
//
// Behaviour is split across files by concern; every file adds an `impl
// Coordinator` block.

mod audit;
mod batch;
mod controllers;
mod dirty;
mod events;
mod import;
mod lifecycle;
mod locks;
mod requests;
mod results;
mod timeouts;
mod transaction;

use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use crate::alarm::AlarmSink;
use crate::config::EngineConfig;
use crate::dispatch::EventQueue;
use crate::error::{CoreError, CoreResult};
use crate::keytree::KeyTypeTree;
use crate::manager::{KeyTypeManager, ManagerTable, Persistence, WorkId};
use crate::model::{Alarm, AlarmKind, ConfigMode, EngineEvent};
use crate::registry::ControllerRegistry;
use crate::southbound::{LoopbackSouthbound, Southbound};
use crate::store::{MemoryStore, TableManager};

pub use controllers::ControllerUpdate;
pub use import::{ImportKind, ImportSummary};
pub use lifecycle::NodeRole;
pub use results::{ControllerResult, PhaseReport, TxId, TxPhase};
pub use timeouts::TimeoutPolicy;
pub use transaction::TxOutcome;

use dirty::DirtyTracker;
use locks::ScopeLocks;

/// Pluggable parts the coordinator is built from.
pub struct Collaborators {
    pub managers: ManagerTable,
    pub persistence: Arc<dyn Persistence>,
    pub southbound: Arc<dyn Southbound>,
    pub alarms: Arc<dyn AlarmSink>,
}

/// An engine wired to the in-memory backend and loopback controllers.
pub struct InMemoryEngine {
    pub coordinator: Coordinator,
    pub store: Arc<MemoryStore>,
    pub southbound: Arc<LoopbackSouthbound>,
}

/// Cheaply cloneable handle to the engine.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    config: EngineConfig,
    live_tree: KeyTypeTree,
    import_tree: KeyTypeTree,
    managers: ManagerTable,
    registry: Arc<ControllerRegistry>,
    persistence: Arc<dyn Persistence>,
    southbound: Arc<dyn Southbound>,
    alarms: Arc<dyn AlarmSink>,
    locks: ScopeLocks,
    timeouts: TimeoutPolicy,
    dirty: DirtyTracker,
    events: EventQueue,
    role: watch::Sender<NodeRole>,
    tx: transaction::TxSlot,
    audit: audit::AuditSlot,
    import: import::ImportSlot,
    batch: batch::BatchState,
}

impl Coordinator {
    /// Build a coordinator in the standby role. Call
    /// [`become_active`](Self::become_active) before submitting writes.
    pub fn new(config: EngineConfig, parts: Collaborators) -> CoreResult<Self> {
        let live_tree = KeyTypeTree::live()?;
        let import_tree = KeyTypeTree::import()?;
        let registry = Arc::new(ControllerRegistry::new(Arc::clone(&parts.alarms)));
        let (role, _) = watch::channel(NodeRole::Standby);

        debug!(managers = parts.managers.len(), "coordinator constructed");
        Ok(Self {
            inner: Arc::new(CoordinatorInner {
                timeouts: TimeoutPolicy::new(config.timeouts.clone()),
                events: EventQueue::new(config.event_queue_capacity),
                config,
                live_tree,
                import_tree,
                managers: parts.managers,
                registry,
                persistence: parts.persistence,
                southbound: parts.southbound,
                alarms: parts.alarms,
                locks: ScopeLocks::new(),
                dirty: DirtyTracker::new(),
                role,
                tx: transaction::TxSlot::new(),
                audit: audit::AuditSlot::new(),
                import: import::ImportSlot::new(),
                batch: batch::BatchState::new(),
            }),
        })
    }

    /// Engine over a fresh [`MemoryStore`] with a [`TableManager`] for every
    /// key type and [`LoopbackSouthbound`] controllers.
    pub fn in_memory(config: EngineConfig, alarms: Arc<dyn AlarmSink>) -> CoreResult<InMemoryEngine> {
        let store = Arc::new(MemoryStore::new());
        let southbound = Arc::new(LoopbackSouthbound::new());
        let mut managers = ManagerTable::new();
        TableManager::register_all(
            &mut managers,
            &KeyTypeTree::live()?,
            &KeyTypeTree::import()?,
            &store,
            config.oper_status_mapping,
        )?;

        let persistence: Arc<dyn Persistence> = store.clone();
        let controllers: Arc<dyn Southbound> = southbound.clone();
        let coordinator = Self::new(
            config,
            Collaborators {
                managers,
                persistence,
                southbound: controllers,
                alarms,
            },
        )?;
        Ok(InMemoryEngine {
            coordinator,
            store,
            southbound,
        })
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<ControllerRegistry> {
        &self.inner.registry
    }

    pub fn live_tree(&self) -> &KeyTypeTree {
        &self.inner.live_tree
    }

    pub fn import_tree(&self) -> &KeyTypeTree {
        &self.inner.import_tree
    }

    pub fn timeouts(&self) -> &TimeoutPolicy {
        &self.inner.timeouts
    }

    /// Hand a notification to the dispatch queue.
    pub fn enqueue_event(&self, event: EngineEvent) {
        self.inner.events.enqueue(event);
    }

    pub fn events(&self) -> &EventQueue {
        &self.inner.events
    }

    /// Controllers whose realized configuration is known to be out of sync.
    pub fn invalid_config_controllers(&self) -> Vec<String> {
        self.inner.registry.invalid_config_controllers()
    }

    // ── Shared helpers ───────────────────────────────────────────────

    /// Managers taking part in a transaction in `mode`, parents first.
    /// Import-only key types come after the live tree.
    fn tx_managers(&self, mode: &ConfigMode) -> Vec<Arc<dyn KeyTypeManager>> {
        let live = &self.inner.live_tree;
        live.preorder()
            .iter()
            .chain(self.inner.import_tree.preorder().iter().filter(|kt| !live.is_valid(**kt)))
            .filter(|kt| mode.is_visible(**kt))
            .filter_map(|kt| self.inner.managers.get(*kt))
            .cloned()
            .collect()
    }

    /// Managers of the import universe, parents first.
    fn import_managers(&self) -> Vec<Arc<dyn KeyTypeManager>> {
        self.inner
            .managers
            .in_order(self.inner.import_tree.preorder())
            .cloned()
            .collect()
    }

    /// Flip a RUNNING controller's invalid-config flag, raising or
    /// clearing the alarm on an actual change.
    fn set_invalid_config(&self, ctrlr: &str, invalid: bool) {
        match self.inner.registry.update_invalid_config(ctrlr, invalid) {
            Ok(previous) if previous != invalid => {
                self.inner
                    .alarms
                    .raise(Alarm::new(AlarmKind::InvalidConfig, invalid).for_ctrlr(ctrlr));
            }
            Ok(_) => {}
            Err(e) => debug!(ctrlr, error = %e, "invalid-config flag not updated"),
        }
    }

    /// Open a unit of work for one operation's edits.
    async fn begin_work(&self) -> CoreResult<WorkId> {
        self.inner.persistence.begin().await
    }

    /// Persist `work`, undoing it if that fails.
    async fn persist(&self, work: WorkId) -> CoreResult<()> {
        if let Err(e) = self.inner.persistence.commit(work).await {
            self.rollback_persistence(work).await;
            return Err(e);
        }
        Ok(())
    }

    async fn rollback_persistence(&self, work: WorkId) {
        if let Err(e) = self.inner.persistence.rollback(work).await {
            tracing::error!(%work, error = %e, "persistence rollback failed");
        }
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("role", &*self.inner.role.borrow())
            .field("managers", &self.inner.managers)
            .field("registry", &self.inner.registry)
            .finish_non_exhaustive()
    }
}

/// Error for a key type the request's universe does not know.
fn unknown_key_type(operation: impl ToString, key_type: crate::model::KeyType) -> CoreError {
    CoreError::NotAllowedForKeyType {
        operation: operation.to_string(),
        key_type,
    }
}
