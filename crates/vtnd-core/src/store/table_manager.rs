// ── Table-backed key-type manager ──
//
// A generic `KeyTypeManager` that keeps instances in a `MemoryStore`.
// It enforces the structural rules every key type shares (key depth,
// parent existence, uniqueness, subtree cascade) and nothing else.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashSet;
use serde_json::json;
use tracing::debug;

use super::memory::MemoryStore;
use crate::error::{CoreError, CoreResult};
use crate::keytree::KeyTypeTree;
use crate::manager::{ChangeOp, ConfigChange, KeyTypeManager, ManagerTable, WorkId};
use crate::model::{
    AuditType, ConfigKey, ConfigKeyVal, ConfigMode, ControlOp, CtrlrDomain, DataType, KeyType,
};

pub struct TableManager {
    key_type: KeyType,
    depth: usize,
    /// `None` when the parent is the universal root.
    parent: Option<KeyType>,
    /// This key type and everything below it, in preorder.
    subtree: Vec<KeyType>,
    store: Arc<MemoryStore>,
    oper_status_mapping: bool,
    down: DashSet<String>,
    faulted: DashSet<(String, String)>,
}

impl TableManager {
    pub fn new(key_type: KeyType, tree: &KeyTypeTree, store: Arc<MemoryStore>) -> CoreResult<Self> {
        let depth = tree
            .depth(key_type)
            .filter(|d| *d > 0)
            .ok_or_else(|| CoreError::Generic(format!("{key_type} has no place below the key type root")))?;
        let parent = tree.parent(key_type).filter(|p| *p != tree.root());
        let subtree = tree
            .preorder()
            .iter()
            .copied()
            .filter(|kt| tree.is_ancestor_or_self(key_type, *kt))
            .collect();
        Ok(Self {
            key_type,
            depth,
            parent,
            subtree,
            store,
            oper_status_mapping: false,
            down: DashSet::new(),
            faulted: DashSet::new(),
        })
    }

    /// Annotate STATE reads with `oper_status`.
    pub fn with_oper_status_mapping(mut self, enabled: bool) -> Self {
        self.oper_status_mapping = enabled;
        self
    }

    /// Register a manager for every non-root key type of both universes.
    ///
    /// Types only the import tree knows take their shape from it.
    pub fn register_all(
        managers: &mut ManagerTable,
        live: &KeyTypeTree,
        import: &KeyTypeTree,
        store: &Arc<MemoryStore>,
        oper_status_mapping: bool,
    ) -> CoreResult<()> {
        for &kt in live.preorder().iter().skip(1) {
            let manager = Self::new(kt, live, Arc::clone(store))?.with_oper_status_mapping(oper_status_mapping);
            managers.register(Arc::new(manager));
        }
        for &kt in import.preorder().iter().skip(1) {
            if !live.is_valid(kt) {
                let manager = Self::new(kt, import, Arc::clone(store))?;
                managers.register(Arc::new(manager));
            }
        }
        Ok(())
    }

    // ── Key helpers ──────────────────────────────────────────────────

    fn check_depth(&self, ckv: &ConfigKeyVal) -> CoreResult<()> {
        if ckv.key.depth() == self.depth {
            Ok(())
        } else {
            Err(self.depth_error(ckv))
        }
    }

    fn depth_error(&self, ckv: &ConfigKeyVal) -> CoreError {
        CoreError::CfgSyntax {
            message: format!(
                "{} key needs {} parts, got {}",
                self.key_type,
                self.depth,
                ckv.key.depth()
            ),
        }
    }

    /// Prefix shared by `ckv` and its siblings.
    fn sibling_prefix(&self, ckv: &ConfigKeyVal) -> CoreResult<ConfigKey> {
        match ckv.key.depth() {
            d if d == self.depth => Ok(ckv.key.parent().unwrap_or_default()),
            d if d < self.depth => Ok(ckv.key.clone()),
            _ => Err(self.depth_error(ckv)),
        }
    }

    fn annotate(&self, dt: DataType, mut nodes: Vec<ConfigKeyVal>) -> Vec<ConfigKeyVal> {
        if dt != DataType::State || !self.oper_status_mapping {
            return nodes;
        }
        for node in &mut nodes {
            let status = match &node.user_data {
                None => "unknown",
                Some(ud)
                    if self.down.contains(&ud.ctrlr)
                        || self.faulted.contains(&(ud.ctrlr.clone(), ud.domain.clone())) =>
                {
                    "down"
                }
                Some(_) => "up",
            };
            node.values.push(json!({ "oper_status": status }));
        }
        nodes
    }

    fn rows(&self, dt: DataType, filter: impl Fn(&ConfigKeyVal) -> bool) -> BTreeMap<ConfigKey, ConfigKeyVal> {
        self.store
            .table(dt)
            .select(self.key_type, filter)
            .into_iter()
            .map(|node| (node.key.clone(), node))
            .collect()
    }

    /// CANDIDATE → RUNNING differences for instances inside `mode`.
    fn diff(&self, mode: &ConfigMode) -> Vec<ConfigChange> {
        let in_scope = |node: &ConfigKeyVal| mode.owns_vtn(node.vtn_name());
        let candidate = self.rows(DataType::Candidate, in_scope);
        let running = self.rows(DataType::Running, in_scope);
        changes_between(&candidate, &running, false)
    }

    fn bound_to(ctrlr: &str) -> impl Fn(&ConfigKeyVal) -> bool + '_ {
        move |node| node.ctrlr() == Some(ctrlr)
    }

    fn stage(&self, work: WorkId, dt: DataType, ctrlr: &str, nodes: Vec<ConfigKeyVal>) {
        let table = self.store.table(dt);
        for mut node in nodes.into_iter().filter(|n| n.key_type == self.key_type) {
            if node.user_data.is_none() {
                node.user_data = Some(CtrlrDomain::default_domain(ctrlr));
            }
            table.upsert(work, node);
        }
    }
}

/// Changes that turn `from` into `target`. With `full`, every instance
/// present on both sides is re-sent as an update.
fn changes_between(
    target: &BTreeMap<ConfigKey, ConfigKeyVal>,
    from: &BTreeMap<ConfigKey, ConfigKeyVal>,
    full: bool,
) -> Vec<ConfigChange> {
    let mut changes = Vec::new();
    for (key, node) in target {
        match from.get(key) {
            None => changes.push(ConfigChange::new(ChangeOp::Create, node.clone())),
            Some(existing) if full || existing != node => {
                changes.push(ConfigChange::new(ChangeOp::Update, node.clone()));
            }
            Some(_) => {}
        }
    }
    for (key, node) in from {
        if !target.contains_key(key) {
            changes.push(ConfigChange::new(ChangeOp::Delete, node.clone()));
        }
    }
    changes
}

#[async_trait]
impl KeyTypeManager for TableManager {
    fn key_type(&self) -> KeyType {
        self.key_type
    }

    async fn create(&self, work: WorkId, dt: DataType, ckv: &ConfigKeyVal) -> CoreResult<()> {
        self.check_depth(ckv)?;
        let table = self.store.table(dt);
        if let (Some(parent_kt), Some(parent_key)) = (self.parent, ckv.key.parent()) {
            if !table.contains(parent_kt, &parent_key) {
                return Err(CoreError::ParentDoesNotExist {
                    what: format!("{parent_kt}[{parent_key}]"),
                });
            }
        }
        if table.contains(self.key_type, &ckv.key) {
            return Err(CoreError::instance_exists(ckv));
        }
        table.upsert(work, ckv.clone());
        debug!(%dt, node = %ckv, "created");
        Ok(())
    }

    async fn update(&self, work: WorkId, dt: DataType, ckv: &ConfigKeyVal) -> CoreResult<()> {
        self.check_depth(ckv)?;
        let table = self.store.table(dt);
        let existing = table
            .get(self.key_type, &ckv.key)
            .ok_or_else(|| CoreError::no_such_instance(ckv))?;
        let mut node = ConfigKeyVal::clone(&existing);
        if !ckv.values.is_empty() {
            node.values.clone_from(&ckv.values);
        }
        if ckv.user_data.is_some() {
            node.user_data.clone_from(&ckv.user_data);
        }
        table.upsert(work, node);
        Ok(())
    }

    async fn delete(&self, work: WorkId, dt: DataType, ckv: &ConfigKeyVal) -> CoreResult<()> {
        self.check_depth(ckv)?;
        let table = self.store.table(dt);
        if !table.contains(self.key_type, &ckv.key) {
            return Err(CoreError::no_such_instance(ckv));
        }
        let removed: usize = self
            .subtree
            .iter()
            .map(|&kt| table.remove_where(work, kt, |n| n.key.starts_with(&ckv.key)))
            .sum();
        debug!(%dt, node = %ckv, removed, "deleted subtree");
        Ok(())
    }

    async fn rename(&self, work: WorkId, dt: DataType, ckv: &ConfigKeyVal, new_name: &str) -> CoreResult<()> {
        self.check_depth(ckv)?;
        let table = self.store.table(dt);
        if !table.contains(self.key_type, &ckv.key) {
            return Err(CoreError::no_such_instance(ckv));
        }
        let new_key = ckv.key.renamed(new_name);
        if table.contains(self.key_type, &new_key) {
            return Err(CoreError::instance_exists(ConfigKeyVal::new(self.key_type, new_key)));
        }
        for &kt in &self.subtree {
            for node in table.select(kt, |n| n.key.starts_with(&ckv.key)) {
                table.remove(work, kt, &node.key);
                if let Some(moved) = node.key.rebased(&ckv.key, &new_key) {
                    table.upsert(work, ConfigKeyVal { key: moved, ..node });
                }
            }
        }
        Ok(())
    }

    async fn read(&self, dt: DataType, ckv: &ConfigKeyVal) -> CoreResult<Vec<ConfigKeyVal>> {
        let table = self.store.table(dt);
        let nodes = if ckv.key.depth() == self.depth {
            table
                .get(self.key_type, &ckv.key)
                .map(|n| vec![ConfigKeyVal::clone(&n)])
                .unwrap_or_default()
        } else {
            let prefix = self.sibling_prefix(ckv)?;
            table.scan(self.key_type, &prefix, self.depth, None, usize::MAX)
        };
        if nodes.is_empty() {
            return Err(CoreError::no_such_instance(ckv));
        }
        Ok(self.annotate(dt, nodes))
    }

    async fn read_sibling_begin(
        &self,
        dt: DataType,
        ckv: &ConfigKeyVal,
        max: usize,
    ) -> CoreResult<Vec<ConfigKeyVal>> {
        let prefix = self.sibling_prefix(ckv)?;
        let nodes = self.store.table(dt).scan(self.key_type, &prefix, self.depth, None, max);
        Ok(self.annotate(dt, nodes))
    }

    async fn read_sibling(
        &self,
        dt: DataType,
        ckv: &ConfigKeyVal,
        max: usize,
    ) -> CoreResult<Vec<ConfigKeyVal>> {
        if ckv.key.depth() < self.depth {
            return self.read_sibling_begin(dt, ckv, max).await;
        }
        let prefix = self.sibling_prefix(ckv)?;
        let nodes = self
            .store
            .table(dt)
            .scan(self.key_type, &prefix, self.depth, Some(&ckv.key), max);
        Ok(self.annotate(dt, nodes))
    }

    async fn read_sibling_count(&self, dt: DataType, ckv: &ConfigKeyVal) -> CoreResult<usize> {
        let prefix = self.sibling_prefix(ckv)?;
        Ok(self
            .store
            .table(dt)
            .scan(self.key_type, &prefix, self.depth, None, usize::MAX)
            .len())
    }

    async fn read_next(&self, dt: DataType, ckv: &ConfigKeyVal, max: usize) -> CoreResult<Vec<ConfigKeyVal>> {
        let nodes = self.store.table(dt).scan_after(self.key_type, &ckv.key, max);
        Ok(self.annotate(dt, nodes))
    }

    async fn control(&self, dt: DataType, ckv: &ConfigKeyVal, op: ControlOp) -> CoreResult<()> {
        match op {
            ControlOp::Ping => {
                self.check_depth(ckv)?;
                if self.store.table(dt).contains(self.key_type, &ckv.key) {
                    Ok(())
                } else {
                    Err(CoreError::no_such_instance(ckv))
                }
            }
        }
    }

    // ── Transactions ──

    async fn tx_start(&self, mode: &ConfigMode) -> CoreResult<()> {
        let Some(parent_kt) = self.parent else {
            return Ok(());
        };
        let candidate = self.store.table(DataType::Candidate);
        let orphan = candidate
            .select(self.key_type, |n| mode.owns_vtn(n.vtn_name()))
            .into_iter()
            .find(|n| n.key.parent().is_none_or(|p| !candidate.contains(parent_kt, &p)));
        match orphan {
            Some(node) => Err(CoreError::ParentDoesNotExist {
                what: node.to_string(),
            }),
            None => Ok(()),
        }
    }

    async fn pending_changes(&self, mode: &ConfigMode) -> CoreResult<Vec<ConfigChange>> {
        Ok(self.diff(mode))
    }

    async fn commit_to_running(&self, work: WorkId, mode: &ConfigMode) -> CoreResult<()> {
        let running = self.store.table(DataType::Running);
        for change in self.diff(mode) {
            match change.op {
                ChangeOp::Create | ChangeOp::Update => {
                    running.upsert(work, change.node);
                }
                ChangeOp::Delete => {
                    running.remove(work, self.key_type, &change.node.key);
                }
            }
        }
        Ok(())
    }

    async fn rollback_candidate(&self, work: WorkId, mode: &ConfigMode) -> CoreResult<()> {
        let candidate = self.store.table(DataType::Candidate);
        for change in self.diff(mode) {
            match change.op {
                ChangeOp::Create => {
                    candidate.remove(work, self.key_type, &change.node.key);
                }
                ChangeOp::Update | ChangeOp::Delete => {
                    if let Some(node) = self.store.table(DataType::Running).get(self.key_type, &change.node.key) {
                        candidate.upsert(work, ConfigKeyVal::clone(&node));
                    }
                }
            }
        }
        Ok(())
    }

    async fn is_candidate_dirty(&self, mode: &ConfigMode) -> CoreResult<bool> {
        Ok(!self.diff(mode).is_empty())
    }

    // ── Audit ──

    async fn load_audit(&self, work: WorkId, ctrlr: &str, nodes: Vec<ConfigKeyVal>) -> CoreResult<()> {
        self.stage(work, DataType::Audit, ctrlr, nodes);
        Ok(())
    }

    async fn audit_changes(&self, ctrlr: &str, audit_type: AuditType) -> CoreResult<Vec<ConfigChange>> {
        let running = self.rows(DataType::Running, Self::bound_to(ctrlr));
        let realized = self.rows(DataType::Audit, Self::bound_to(ctrlr));
        Ok(changes_between(&running, &realized, audit_type == AuditType::Normal))
    }

    async fn clear_audit(&self, work: WorkId, ctrlr: &str) -> CoreResult<()> {
        self.store
            .table(DataType::Audit)
            .remove_where(work, self.key_type, Self::bound_to(ctrlr));
        Ok(())
    }

    // ── Import ──

    async fn load_import(&self, work: WorkId, ctrlr: &str, nodes: Vec<ConfigKeyVal>) -> CoreResult<()> {
        self.stage(work, DataType::Import, ctrlr, nodes);
        Ok(())
    }

    async fn merge_validate(&self, ctrlr: &str) -> CoreResult<()> {
        let candidate = self.store.table(DataType::Candidate);
        let import = self.store.table(DataType::Import);
        for node in import.select(self.key_type, Self::bound_to(ctrlr)) {
            if let Some(parent_kt) = self.parent {
                let parent_key = node.key.parent().unwrap_or_default();
                if !candidate.contains(parent_kt, &parent_key) && !import.contains(parent_kt, &parent_key) {
                    return Err(CoreError::ParentDoesNotExist {
                        what: format!("{parent_kt}[{parent_key}]"),
                    });
                }
            }
            let Some(existing) = candidate.get(self.key_type, &node.key) else {
                continue;
            };
            match existing.ctrlr() {
                Some(owner) if owner != ctrlr => {
                    return Err(CoreError::MergeConflict {
                        key: node.to_string(),
                        message: format!("already bound to controller {owner}"),
                    });
                }
                _ if existing.values != node.values => {
                    return Err(CoreError::MergeConflict {
                        key: node.to_string(),
                        message: "attributes differ from candidate".into(),
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    async fn merge_import(&self, work: WorkId, ctrlr: &str) -> CoreResult<()> {
        let candidate = self.store.table(DataType::Candidate);
        for node in self.store.table(DataType::Import).select(self.key_type, Self::bound_to(ctrlr)) {
            let unchanged = candidate
                .get(self.key_type, &node.key)
                .is_some_and(|existing| *existing == node);
            if !unchanged {
                candidate.upsert(work, node);
            }
        }
        Ok(())
    }

    async fn purge_candidate(&self, work: WorkId, ctrlr: &str) -> CoreResult<usize> {
        let import = self.store.table(DataType::Import);
        let purged = self
            .store
            .table(DataType::Candidate)
            .remove_where(work, self.key_type, |n| {
                n.ctrlr() == Some(ctrlr) && !import.contains(self.key_type, &n.key)
            });
        if purged > 0 {
            debug!(key_type = %self.key_type, ctrlr, purged, "purged stale candidate objects");
        }
        Ok(purged)
    }

    async fn clear_import(&self, work: WorkId) -> CoreResult<()> {
        self.store.table(DataType::Import).remove_where(work, self.key_type, |_| true);
        Ok(())
    }

    // ── References ──

    async fn is_referenced(&self, ctrlr: &str) -> CoreResult<bool> {
        Ok([DataType::Candidate, DataType::Running].into_iter().any(|dt| {
            !self
                .store
                .table(dt)
                .select(self.key_type, Self::bound_to(ctrlr))
                .is_empty()
        }))
    }

    async fn is_in_use(&self) -> CoreResult<bool> {
        Ok([DataType::Candidate, DataType::Running].into_iter().any(|dt| {
            !self
                .store
                .table(dt)
                .scan_after(self.key_type, &ConfigKey::root(), 1)
                .is_empty()
        }))
    }

    // ── Notifications ──

    fn on_controller_status(&self, ctrlr: &str, up: bool) {
        if up {
            self.down.remove(ctrlr);
        } else {
            self.down.insert(ctrlr.to_owned());
        }
    }

    fn on_path_fault(&self, ctrlr: &str, domain: &str, asserted: bool) {
        let key = (ctrlr.to_owned(), domain.to_owned());
        if asserted {
            self.faulted.insert(key);
        } else {
            self.faulted.remove(&key);
        }
    }
}

impl std::fmt::Debug for TableManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableManager")
            .field("key_type", &self.key_type)
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}
