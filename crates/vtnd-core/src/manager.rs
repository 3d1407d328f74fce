// ── Collaborator seams ──
//
// The engine coordinates; it does not own object semantics or storage.
// Per-key-type managers and the persistence backend plug in here.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::error::{CoreError, CoreResult};
use crate::model::{AuditType, ConfigKeyVal, ConfigMode, ControlOp, ControllerRecord, DataType, KeyType};

// ── Change sets ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChangeOp {
    Create,
    Update,
    Delete,
}

/// One object change to push out to a controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigChange {
    pub op: ChangeOp,
    pub node: ConfigKeyVal,
}

impl ConfigChange {
    pub fn new(op: ChangeOp, node: ConfigKeyVal) -> Self {
        Self { op, node }
    }

    /// Controller the change is routed to. Unbound objects go nowhere.
    pub fn ctrlr(&self) -> Option<&str> {
        self.node.ctrlr()
    }
}

// ── Key-type managers ───────────────────────────────────────────────

/// Owner of one key type's validation and storage.
///
/// The engine calls these hooks with the scope locks already held; a
/// manager never takes engine locks itself. Every mutation is made under
/// the caller's [`WorkId`]. Notification hooks run on the
/// dispatch worker and must not block.
#[async_trait]
pub trait KeyTypeManager: Send + Sync {
    fn key_type(&self) -> KeyType;

    async fn create(&self, work: WorkId, dt: DataType, ckv: &ConfigKeyVal) -> CoreResult<()>;
    async fn update(&self, work: WorkId, dt: DataType, ckv: &ConfigKeyVal) -> CoreResult<()>;
    async fn delete(&self, work: WorkId, dt: DataType, ckv: &ConfigKeyVal) -> CoreResult<()>;
    async fn rename(&self, work: WorkId, dt: DataType, ckv: &ConfigKeyVal, new_name: &str) -> CoreResult<()>;

    /// Exact read for a full key, pattern read for a shorter one.
    async fn read(&self, dt: DataType, ckv: &ConfigKeyVal) -> CoreResult<Vec<ConfigKeyVal>>;
    /// First `max` instances under the same parent as `ckv`.
    async fn read_sibling_begin(
        &self,
        dt: DataType,
        ckv: &ConfigKeyVal,
        max: usize,
    ) -> CoreResult<Vec<ConfigKeyVal>>;
    /// Up to `max` instances under the same parent strictly after `ckv`.
    async fn read_sibling(
        &self,
        dt: DataType,
        ckv: &ConfigKeyVal,
        max: usize,
    ) -> CoreResult<Vec<ConfigKeyVal>>;
    async fn read_sibling_count(&self, dt: DataType, ckv: &ConfigKeyVal) -> CoreResult<usize>;
    /// Up to `max` instances of this key type after `ckv`, across parents.
    async fn read_next(&self, dt: DataType, ckv: &ConfigKeyVal, max: usize)
    -> CoreResult<Vec<ConfigKeyVal>>;

    async fn control(&self, _dt: DataType, _ckv: &ConfigKeyVal, op: ControlOp) -> CoreResult<()> {
        Err(CoreError::NotAllowedForKeyType {
            operation: op.to_string(),
            key_type: self.key_type(),
        })
    }

    /// Query key for this key type's instances below `parent`.
    fn child_key(&self, parent: &ConfigKeyVal) -> ConfigKeyVal {
        ConfigKeyVal::new(self.key_type(), parent.key.clone())
    }

    // ── Transactions ──

    /// Validate the CANDIDATE image before a commit begins.
    async fn tx_start(&self, _mode: &ConfigMode) -> CoreResult<()> {
        Ok(())
    }
    /// CANDIDATE vs RUNNING differences within `mode`.
    async fn pending_changes(&self, mode: &ConfigMode) -> CoreResult<Vec<ConfigChange>>;
    async fn commit_to_running(&self, work: WorkId, mode: &ConfigMode) -> CoreResult<()>;
    /// Discard CANDIDATE edits within `mode`, restoring RUNNING.
    async fn rollback_candidate(&self, work: WorkId, mode: &ConfigMode) -> CoreResult<()>;
    async fn is_candidate_dirty(&self, mode: &ConfigMode) -> CoreResult<bool>;

    // ── Audit ──

    async fn load_audit(&self, work: WorkId, ctrlr: &str, nodes: Vec<ConfigKeyVal>) -> CoreResult<()>;
    /// Changes needed to bring `ctrlr` in line with RUNNING.
    async fn audit_changes(&self, ctrlr: &str, audit_type: AuditType) -> CoreResult<Vec<ConfigChange>>;
    async fn clear_audit(&self, work: WorkId, ctrlr: &str) -> CoreResult<()>;

    // ── Import ──

    async fn load_import(&self, work: WorkId, ctrlr: &str, nodes: Vec<ConfigKeyVal>) -> CoreResult<()>;
    async fn merge_validate(&self, ctrlr: &str) -> CoreResult<()>;
    async fn merge_import(&self, work: WorkId, ctrlr: &str) -> CoreResult<()>;
    /// Remove CANDIDATE objects bound to `ctrlr` that IMPORT no longer has.
    async fn purge_candidate(&self, work: WorkId, ctrlr: &str) -> CoreResult<usize>;
    async fn clear_import(&self, work: WorkId) -> CoreResult<()>;

    // ── References ──

    /// Whether any CANDIDATE or RUNNING object is bound to `ctrlr`.
    async fn is_referenced(&self, ctrlr: &str) -> CoreResult<bool>;
    /// Whether any CANDIDATE or RUNNING instance of this key type exists.
    async fn is_in_use(&self) -> CoreResult<bool>;

    // ── Notifications ──

    fn on_controller_status(&self, _ctrlr: &str, _up: bool) {}
    fn on_port_status(&self, _ctrlr: &str, _domain: &str, _port_id: &str, _up: bool) {}
    fn on_path_fault(&self, _ctrlr: &str, _domain: &str, _asserted: bool) {}
}

/// Managers by key type. A missing entry means the key type is skipped.
#[derive(Clone, Default)]
pub struct ManagerTable {
    managers: HashMap<KeyType, Arc<dyn KeyTypeManager>>,
}

impl ManagerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a manager under its own key type, replacing any previous one.
    pub fn register(&mut self, manager: Arc<dyn KeyTypeManager>) {
        self.managers.insert(manager.key_type(), manager);
    }

    pub fn get(&self, kt: KeyType) -> Option<&Arc<dyn KeyTypeManager>> {
        self.managers.get(&kt)
    }

    pub fn contains(&self, kt: KeyType) -> bool {
        self.managers.contains_key(&kt)
    }

    pub fn len(&self) -> usize {
        self.managers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }

    /// Managers for `order`, skipping key types without one.
    pub fn in_order<'a>(
        &'a self,
        order: &'a [KeyType],
    ) -> impl Iterator<Item = &'a Arc<dyn KeyTypeManager>> + 'a {
        order.iter().filter_map(|kt| self.managers.get(kt))
    }
}

impl std::fmt::Debug for ManagerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kts: Vec<&KeyType> = self.managers.keys().collect();
        kts.sort();
        f.debug_struct("ManagerTable").field("key_types", &kts).finish()
    }
}

// ── Persistence ─────────────────────────────────────────────────────

/// One unit of work against persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkId(pub u64);

impl std::fmt::Display for WorkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "uow-{}", self.0)
    }
}

/// Durable storage behind the engine.
///
/// Edits are grouped into units of work opened by `begin`. `commit` and
/// `rollback` close one unit and leave every other open unit alone.
/// Controller records are written through immediately.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn begin(&self) -> CoreResult<WorkId>;
    async fn commit(&self, work: WorkId) -> CoreResult<()>;
    async fn rollback(&self, work: WorkId) -> CoreResult<()>;
    async fn load_controllers(&self) -> CoreResult<Vec<(ControllerRecord, DataType)>>;
    async fn store_controller(&self, record: &ControllerRecord, datatype: DataType) -> CoreResult<()>;
    async fn remove_controller(&self, name: &str, datatype: DataType) -> CoreResult<()>;
}
