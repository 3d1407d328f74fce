// ── Ordered configuration table ──
//
// One datatype image. Keys sort by (key type, structured key), so every
// instance under a common parent is contiguous and sibling reads are
// range scans. Each mutation bumps a version counter and records its
// inverse in the undo journal of the unit of work that made it, until
// that unit is committed or rolled back.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;

use crate::manager::WorkId;
use crate::model::{ConfigKey, ConfigKeyVal, KeyType};

pub(crate) type TableKey = (KeyType, ConfigKey);

/// A journaled mutation: the row before it and the row it left behind.
#[derive(Debug)]
struct Undo {
    key: TableKey,
    previous: Option<Arc<ConfigKeyVal>>,
    written: Option<Arc<ConfigKeyVal>>,
}

impl Undo {
    /// Whether the row still holds what this mutation wrote.
    fn is_current(&self, row: Option<&Arc<ConfigKeyVal>>) -> bool {
        match (row, &self.written) {
            (Some(row), Some(written)) => Arc::ptr_eq(row, written),
            (None, None) => true,
            _ => false,
        }
    }
}

pub(crate) struct ConfigTable {
    rows: RwLock<BTreeMap<TableKey, Arc<ConfigKeyVal>>>,
    journal: Mutex<HashMap<WorkId, Vec<Undo>>>,
    version: watch::Sender<u64>,
}

impl ConfigTable {
    pub(crate) fn new() -> Self {
        let (version, _) = watch::channel(0u64);
        Self {
            rows: RwLock::new(BTreeMap::new()),
            journal: Mutex::new(HashMap::new()),
            version,
        }
    }

    /// Insert or replace a row. Returns `true` if the key was new.
    pub(crate) fn upsert(&self, work: WorkId, node: ConfigKeyVal) -> bool {
        let key = (node.key_type, node.key.clone());
        let node = Arc::new(node);
        let previous = self.rows.write().insert(key.clone(), Arc::clone(&node));
        let is_new = previous.is_none();
        self.record(
            work,
            Undo {
                key,
                previous,
                written: Some(node),
            },
        );
        self.bump_version();
        is_new
    }

    pub(crate) fn remove(&self, work: WorkId, kt: KeyType, key: &ConfigKey) -> Option<Arc<ConfigKeyVal>> {
        let table_key = (kt, key.clone());
        let removed = self.rows.write().remove(&table_key);
        if let Some(previous) = &removed {
            self.record(
                work,
                Undo {
                    key: table_key,
                    previous: Some(Arc::clone(previous)),
                    written: None,
                },
            );
            self.bump_version();
        }
        removed
    }

    fn record(&self, work: WorkId, undo: Undo) {
        self.journal.lock().entry(work).or_default().push(undo);
    }

    pub(crate) fn get(&self, kt: KeyType, key: &ConfigKey) -> Option<Arc<ConfigKeyVal>> {
        self.rows.read().get(&(kt, key.clone())).cloned()
    }

    pub(crate) fn contains(&self, kt: KeyType, key: &ConfigKey) -> bool {
        self.rows.read().contains_key(&(kt, key.clone()))
    }

    /// Rows of `kt` whose key extends `prefix` and has exactly `depth` parts,
    /// strictly after `after` when given, at most `max`.
    pub(crate) fn scan(
        &self,
        kt: KeyType,
        prefix: &ConfigKey,
        depth: usize,
        after: Option<&ConfigKey>,
        max: usize,
    ) -> Vec<ConfigKeyVal> {
        let lower = match after {
            Some(after) => Bound::Excluded((kt, after.clone())),
            None => Bound::Included((kt, prefix.clone())),
        };
        self.rows
            .read()
            .range((lower, Bound::Unbounded))
            .take_while(|((row_kt, row_key), _)| *row_kt == kt && row_key.starts_with(prefix))
            .filter(|((_, row_key), _)| row_key.depth() == depth)
            .take(max)
            .map(|(_, node)| ConfigKeyVal::clone(node))
            .collect()
    }

    /// Rows of `kt` after `after` regardless of parent.
    pub(crate) fn scan_after(&self, kt: KeyType, after: &ConfigKey, max: usize) -> Vec<ConfigKeyVal> {
        self.rows
            .read()
            .range((Bound::Excluded((kt, after.clone())), Bound::Unbounded))
            .take_while(|((row_kt, _), _)| *row_kt == kt)
            .take(max)
            .map(|(_, node)| ConfigKeyVal::clone(node))
            .collect()
    }

    /// Every row of `kt` matching `filter`.
    pub(crate) fn select(&self, kt: KeyType, filter: impl Fn(&ConfigKeyVal) -> bool) -> Vec<ConfigKeyVal> {
        self.rows
            .read()
            .range((kt, ConfigKey::root())..)
            .take_while(|((row_kt, _), _)| *row_kt == kt)
            .filter(|(_, node)| filter(node))
            .map(|(_, node)| ConfigKeyVal::clone(node))
            .collect()
    }

    /// Remove every row of `kt` matching `filter`, journaled.
    pub(crate) fn remove_where(&self, work: WorkId, kt: KeyType, filter: impl Fn(&ConfigKeyVal) -> bool) -> usize {
        let doomed: Vec<ConfigKey> = self
            .select(kt, filter)
            .into_iter()
            .map(|node| node.key)
            .collect();
        for key in &doomed {
            self.remove(work, kt, key);
        }
        doomed.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub(crate) fn version(&self) -> u64 {
        *self.version.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    // ── Unit of work ─────────────────────────────────────────────────

    /// Forget `work`'s journal, making its mutations durable.
    pub(crate) fn commit(&self, work: WorkId) -> usize {
        self.journal.lock().remove(&work).map_or(0, |undos| undos.len())
    }

    /// Undo `work`'s mutations, newest first. A row another unit has
    /// rewritten since is left as that unit wrote it.
    pub(crate) fn rollback(&self, work: WorkId) -> usize {
        let Some(undone) = self.journal.lock().remove(&work) else {
            return 0;
        };
        let n = undone.len();
        let mut rows = self.rows.write();
        for undo in undone.into_iter().rev() {
            if !undo.is_current(rows.get(&undo.key)) {
                continue;
            }
            match undo.previous {
                Some(previous) => {
                    rows.insert(undo.key, previous);
                }
                None => {
                    rows.remove(&undo.key);
                }
            }
        }
        drop(rows);
        self.bump_version();
        n
    }

    fn bump_version(&self) {
        self.version.send_modify(|v| *v += 1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn vbr(vtn: &str, name: &str) -> ConfigKeyVal {
        ConfigKeyVal::new(KeyType::Vbridge, ConfigKey::from_parts([vtn, name]))
    }

    fn leaves(nodes: &[ConfigKeyVal]) -> Vec<&str> {
        nodes.iter().filter_map(|n| n.key.leaf()).collect()
    }

    const W1: WorkId = WorkId(1);
    const W2: WorkId = WorkId(2);

    #[test]
    fn scan_stays_within_parent() {
        let table = ConfigTable::new();
        for (vtn, name) in [("vtn1", "b"), ("vtn1", "a"), ("vtn2", "a"), ("vtn1", "c")] {
            table.upsert(W1, vbr(vtn, name));
        }
        let vtn1 = ConfigKey::from_parts(["vtn1"]);

        let all = table.scan(KeyType::Vbridge, &vtn1, 2, None, usize::MAX);
        assert_eq!(leaves(&all), ["a", "b", "c"]);

        let after_a = ConfigKey::from_parts(["vtn1", "a"]);
        let rest = table.scan(KeyType::Vbridge, &vtn1, 2, Some(&after_a), 1);
        assert_eq!(leaves(&rest), ["b"]);

        let next = table.scan_after(KeyType::Vbridge, &ConfigKey::from_parts(["vtn1", "c"]), 10);
        assert_eq!(next, vec![vbr("vtn2", "a")]);
    }

    #[test]
    fn rollback_restores_previous_rows() {
        let table = ConfigTable::new();
        table.upsert(W1, vbr("vtn1", "a").with_value(serde_json::json!({"v": 1})));
        table.commit(W1);

        table.upsert(W2, vbr("vtn1", "a").with_value(serde_json::json!({"v": 2})));
        table.upsert(W2, vbr("vtn1", "b"));
        table.remove(W2, KeyType::Vbridge, &ConfigKey::from_parts(["vtn1", "a"]));
        assert_eq!(table.len(), 1);

        assert_eq!(table.rollback(W2), 3);
        assert_eq!(table.len(), 1);
        let a = table.get(KeyType::Vbridge, &ConfigKey::from_parts(["vtn1", "a"])).unwrap();
        assert_eq!(a.values, vec![serde_json::json!({"v": 1})]);
        assert_eq!(table.rollback(W2), 0);
    }

    #[test]
    fn rollback_leaves_other_units_alone() {
        let table = ConfigTable::new();
        table.upsert(W1, vbr("vtn1", "a"));
        table.upsert(W2, vbr("vtn2", "a"));

        assert_eq!(table.rollback(W2), 1);
        assert_eq!(table.len(), 1);
        assert_eq!(table.commit(W1), 1);
        assert!(table.contains(KeyType::Vbridge, &ConfigKey::from_parts(["vtn1", "a"])));
    }

    #[test]
    fn rollback_skips_rows_rewritten_by_another_unit() {
        let table = ConfigTable::new();
        let key = ConfigKey::from_parts(["vtn1", "a"]);
        table.upsert(W1, vbr("vtn1", "a"));
        table.upsert(W2, vbr("vtn1", "a").with_value(serde_json::json!({"v": 2})));
        table.commit(W2);

        table.rollback(W1);
        let a = table.get(KeyType::Vbridge, &key).unwrap();
        assert_eq!(a.values, vec![serde_json::json!({"v": 2})]);
    }

    #[test]
    fn mutations_bump_version() {
        let table = ConfigTable::new();
        let rx = table.subscribe();
        table.upsert(W1, vbr("vtn1", "a"));
        table.remove(W1, KeyType::Vbridge, &ConfigKey::from_parts(["vtn1", "zz"]));
        assert_eq!(table.version(), 1);
        assert_eq!(*rx.borrow(), 1);
    }
}
