// ── Bulk traversal ──
//
// Preorder walk over configuration instances following the key-type
// tree. The walk keeps an explicit stack of frames, one per tree level,
// so resuming from an arbitrary node is just rebuilding that stack.
//
// Instances are fetched one at a time through the managers' sibling
// reads; the budget bounds the output exactly.

use tracing::debug;

use crate::error::{CoreResult, ErrorKind};
use crate::keytree::KeyTypeTree;
use crate::manager::ManagerTable;
use crate::model::{ConfigKey, ConfigKeyVal, ConfigMode, DataType, KeyType};

/// One level of the walk: which child key type of `parent` is being
/// enumerated and the last instance seen.
#[derive(Debug)]
struct Frame {
    parent: ConfigKeyVal,
    key_type: Option<KeyType>,
    last: Option<ConfigKeyVal>,
}

/// Bulk reader over one datatype, as seen from one configuration mode.
#[derive(Debug, Clone, Copy)]
pub struct BulkReader<'a> {
    tree: &'a KeyTypeTree,
    managers: &'a ManagerTable,
    mode: &'a ConfigMode,
    datatype: DataType,
    max_count: usize,
}

impl<'a> BulkReader<'a> {
    pub fn new(
        tree: &'a KeyTypeTree,
        managers: &'a ManagerTable,
        mode: &'a ConfigMode,
        datatype: DataType,
        max_count: usize,
    ) -> Self {
        Self {
            tree,
            managers,
            mode,
            datatype,
            max_count,
        }
    }

    /// Read up to `budget` nodes in preorder starting at `start`.
    ///
    /// From the root this is the whole tree. From an existing node it is
    /// the node, its subtree, then everything after it in preorder. A node
    /// that does not exist degrades to "everything after where it would be",
    /// as does one whose key type the mode cannot see. Any other error
    /// discards the partial result.
    pub async fn read(&self, start: &ConfigKeyVal, budget: usize) -> CoreResult<Vec<ConfigKeyVal>> {
        let budget = budget.min(self.max_count);
        let mut out = Vec::new();
        if budget == 0 {
            return Ok(out);
        }

        let mut stack = if start.is_root() {
            vec![self.frame_below(start.clone())]
        } else {
            self.resume_stack(start, &mut out).await?
        };
        self.walk(&mut stack, budget, &mut out).await?;

        debug!(
            datatype = %self.datatype,
            start = %start,
            budget,
            returned = out.len(),
            "bulk read"
        );
        Ok(out)
    }

    // ── Walk ─────────────────────────────────────────────────────────

    async fn walk(&self, stack: &mut Vec<Frame>, budget: usize, out: &mut Vec<ConfigKeyVal>) -> CoreResult<()> {
        while out.len() < budget {
            let Some(frame) = stack.last_mut() else {
                break;
            };
            let Some(kt) = frame.key_type else {
                stack.pop();
                continue;
            };
            let Some(manager) = self.managers.get(kt) else {
                frame.key_type = self.visible_from(self.tree.next_sibling(kt));
                frame.last = None;
                continue;
            };

            let batch = match &frame.last {
                None => {
                    let query = manager.child_key(&frame.parent);
                    manager.read_sibling_begin(self.datatype, &query, 1).await?
                }
                Some(last) => manager.read_sibling(self.datatype, last, 1).await?,
            };

            let Some(node) = batch.into_iter().next() else {
                frame.key_type = self.visible_from(self.tree.next_sibling(kt));
                frame.last = None;
                continue;
            };
            frame.last = Some(node.clone());
            if !self.mode.owns_vtn(node.vtn_name()) {
                continue;
            }
            out.push(node.clone());
            stack.push(self.frame_below(node));
        }
        Ok(())
    }

    /// Frame enumerating the children of `parent`.
    fn frame_below(&self, parent: ConfigKeyVal) -> Frame {
        let key_type = self.visible_from(self.tree.first_child(parent.key_type));
        Frame {
            parent,
            key_type,
            last: None,
        }
    }

    /// First key type from `cursor` onwards (following siblings) that is
    /// visible in this mode and has a manager.
    fn visible_from(&self, mut cursor: Option<KeyType>) -> Option<KeyType> {
        while let Some(kt) = cursor {
            if self.mode.is_visible(kt) && self.managers.contains(kt) {
                return Some(kt);
            }
            cursor = self.tree.next_sibling(kt);
        }
        None
    }

    // ── Resume ───────────────────────────────────────────────────────

    /// Rebuild the walk stack as if the walk had just visited `start`.
    async fn resume_stack(&self, start: &ConfigKeyVal, out: &mut Vec<ConfigKeyVal>) -> CoreResult<Vec<Frame>> {
        // Key types from the root's child down to `start`'s key type.
        let mut chain = Vec::new();
        let mut cursor = Some(start.key_type);
        while let Some(kt) = cursor.filter(|kt| *kt != self.tree.root()) {
            chain.push(kt);
            cursor = self.tree.parent(kt);
        }
        chain.reverse();

        let mut stack = Vec::with_capacity(chain.len() + 1);
        let mut parent = ConfigKeyVal::root();
        for (level, &kt) in chain.iter().enumerate() {
            if !self.mode.is_visible(kt) {
                // Nothing below a hidden key type is visible either.
                stack.push(Frame {
                    parent,
                    key_type: self.visible_from(self.tree.next_sibling(kt)),
                    last: None,
                });
                debug!(start = %start, key_type = %kt, "bulk start hidden by mode, continuing after it");
                return Ok(stack);
            }
            let parts = start.key.parts().get(..=level).unwrap_or(start.key.parts());
            let node = ConfigKeyVal::new(kt, ConfigKey::from_parts(parts.iter().cloned()));
            stack.push(Frame {
                parent: parent.clone(),
                key_type: Some(kt),
                last: Some(node.clone()),
            });
            parent = node;
        }

        let existing = match self.managers.get(start.key_type) {
            Some(manager) => match manager.read(self.datatype, start).await {
                Ok(nodes) => nodes.into_iter().next(),
                Err(e) if e.kind() == ErrorKind::NoSuchInstance => None,
                Err(e) => return Err(e),
            },
            None => None,
        };
        match existing {
            Some(node) if self.mode.owns_vtn(node.vtn_name()) => {
                if let Some(frame) = stack.last_mut() {
                    frame.last = Some(node.clone());
                }
                out.push(node.clone());
                stack.push(self.frame_below(node));
            }
            _ => debug!(start = %start, "bulk start not found, continuing with its siblings"),
        }
        Ok(stack)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::manager::{KeyTypeManager, WorkId};
    use crate::store::{MemoryStore, TableManager};

    struct Fixture {
        tree: KeyTypeTree,
        managers: ManagerTable,
    }

    impl Fixture {
        fn new() -> Self {
            let tree = KeyTypeTree::live().unwrap();
            let store = Arc::new(MemoryStore::new());
            let mut managers = ManagerTable::new();
            TableManager::register_all(&mut managers, &tree, &KeyTypeTree::import().unwrap(), &store, false)
                .unwrap();
            Self { tree, managers }
        }

        async fn add(&self, kt: KeyType, parts: &[&str]) {
            self.managers
                .get(kt)
                .unwrap()
                .create(WorkId(1), DataType::Candidate, &node(kt, parts))
                .await
                .unwrap();
        }

        async fn bulk(&self, mode: &ConfigMode, start: &ConfigKeyVal, budget: usize) -> Vec<String> {
            BulkReader::new(&self.tree, &self.managers, mode, DataType::Candidate, 100)
                .read(start, budget)
                .await
                .unwrap()
                .iter()
                .map(ToString::to_string)
                .collect()
        }
    }

    fn node(kt: KeyType, parts: &[&str]) -> ConfigKeyVal {
        ConfigKeyVal::new(kt, ConfigKey::from_parts(parts.iter().copied()))
    }

    async fn two_root_types() -> Fixture {
        let fx = Fixture::new();
        for name in ["fl1", "fl2"] {
            fx.add(KeyType::Flowlist, &[name]).await;
        }
        for name in ["pp1", "pp2", "pp3", "pp4", "pp5"] {
            fx.add(KeyType::PolicingProfile, &[name]).await;
        }
        fx
    }

    #[tokio::test]
    async fn budget_spans_sibling_key_types() {
        let fx = two_root_types().await;
        let got = fx.bulk(&ConfigMode::Global, &ConfigKeyVal::root(), 3).await;
        assert_eq!(got, ["flowlist[fl1]", "flowlist[fl2]", "policing_profile[pp1]"]);
    }

    #[tokio::test]
    async fn never_exceeds_budget_and_returns_whole_subtree_when_it_fits() {
        let fx = two_root_types().await;
        for budget in 0..10 {
            let got = fx.bulk(&ConfigMode::Global, &ConfigKeyVal::root(), budget).await;
            assert_eq!(got.len(), budget.min(7));
        }
    }

    #[tokio::test]
    async fn same_start_gives_prefix_compatible_results() {
        let fx = two_root_types().await;
        let short = fx.bulk(&ConfigMode::Global, &ConfigKeyVal::root(), 4).await;
        let long = fx.bulk(&ConfigMode::Global, &ConfigKeyVal::root(), 6).await;
        assert_eq!(short[..], long[..4]);
    }

    #[tokio::test]
    async fn descends_before_advancing() {
        let fx = Fixture::new();
        fx.add(KeyType::Vtn, &["vtn1"]).await;
        fx.add(KeyType::Vbridge, &["vtn1", "vbr1"]).await;
        fx.add(KeyType::VbrIf, &["vtn1", "vbr1", "if1"]).await;
        fx.add(KeyType::Vbridge, &["vtn1", "vbr2"]).await;
        fx.add(KeyType::Vrouter, &["vtn1", "vrt1"]).await;
        fx.add(KeyType::Vtn, &["vtn2"]).await;

        let got = fx.bulk(&ConfigMode::Global, &ConfigKeyVal::root(), 100).await;
        assert_eq!(
            got,
            [
                "vtn[vtn1]",
                "vbridge[vtn1/vbr1]",
                "vbr_if[vtn1/vbr1/if1]",
                "vbridge[vtn1/vbr2]",
                "vrouter[vtn1/vrt1]",
                "vtn[vtn2]",
            ]
        );
    }

    #[tokio::test]
    async fn resumes_from_existing_and_missing_nodes() {
        let fx = Fixture::new();
        fx.add(KeyType::Vtn, &["vtn1"]).await;
        fx.add(KeyType::Vbridge, &["vtn1", "vbr1"]).await;
        fx.add(KeyType::Vbridge, &["vtn1", "vbr3"]).await;
        fx.add(KeyType::Vrouter, &["vtn1", "vrt1"]).await;
        fx.add(KeyType::Vtn, &["vtn2"]).await;

        let from_existing = fx
            .bulk(&ConfigMode::Global, &node(KeyType::Vbridge, &["vtn1", "vbr3"]), 10)
            .await;
        assert_eq!(from_existing, ["vbridge[vtn1/vbr3]", "vrouter[vtn1/vrt1]", "vtn[vtn2]"]);

        let from_missing = fx
            .bulk(&ConfigMode::Global, &node(KeyType::Vbridge, &["vtn1", "vbr2"]), 10)
            .await;
        assert_eq!(from_missing, from_existing);
    }

    #[tokio::test]
    async fn mode_hides_foreign_scopes() {
        let fx = Fixture::new();
        fx.add(KeyType::Flowlist, &["fl1"]).await;
        fx.add(KeyType::Vtn, &["vtn1"]).await;
        fx.add(KeyType::Vtn, &["vtn2"]).await;
        fx.add(KeyType::Vbridge, &["vtn2", "vbr1"]).await;

        let vtn2 = ConfigMode::Vtn("vtn2".into());
        let got = fx.bulk(&vtn2, &ConfigKeyVal::root(), 10).await;
        assert_eq!(got, ["vtn[vtn2]", "vbridge[vtn2/vbr1]"]);

        let got = fx.bulk(&ConfigMode::Virtual, &ConfigKeyVal::root(), 10).await;
        assert_eq!(got, ["flowlist[fl1]"]);
    }

    #[tokio::test]
    async fn hidden_start_resumes_after_its_key_type() {
        let fx = Fixture::new();
        fx.add(KeyType::Flowlist, &["fl1"]).await;
        fx.add(KeyType::Flowlist, &["fl2"]).await;
        fx.add(KeyType::Vtn, &["vtn1"]).await;
        fx.add(KeyType::Vbridge, &["vtn1", "vbr1"]).await;
        fx.add(KeyType::Vtn, &["vtn2"]).await;

        let got = fx.bulk(&ConfigMode::Virtual, &node(KeyType::Vtn, &["vtn1"]), 10).await;
        assert!(got.is_empty(), "virtual mode leaked {got:?}");
        let got = fx
            .bulk(&ConfigMode::Virtual, &node(KeyType::Vbridge, &["vtn1", "vbr1"]), 10)
            .await;
        assert!(got.is_empty(), "virtual mode leaked {got:?}");

        let vtn1 = ConfigMode::Vtn("vtn1".into());
        let got = fx.bulk(&vtn1, &node(KeyType::Flowlist, &["fl1"]), 10).await;
        assert_eq!(got, ["vtn[vtn1]", "vbridge[vtn1/vbr1]"]);
    }

    #[tokio::test]
    async fn malformed_start_key_is_an_error() {
        let fx = two_root_types().await;
        let err = BulkReader::new(&fx.tree, &fx.managers, &ConfigMode::Global, DataType::Candidate, 100)
            .read(&node(KeyType::Flowlist, &["a", "b", "c"]), 10)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CfgSyntax);
    }

    #[tokio::test]
    async fn budget_is_capped_at_configured_maximum() {
        let fx = two_root_types().await;
        let got = BulkReader::new(&fx.tree, &fx.managers, &ConfigMode::Global, DataType::Candidate, 2)
            .read(&ConfigKeyVal::root(), 50)
            .await
            .unwrap();
        assert_eq!(got.len(), 2);
    }
}
