// ── Key-type containment tree ──
//
// Static parent → ordered-children hierarchy of every key type. Built once
// at engine construction and shared read-only afterwards; there is no
// interior mutability apart from the lazily computed preorder cache.

use std::collections::HashMap;
use std::sync::OnceLock;

use thiserror::Error;

use crate::error::CoreError;
use crate::model::KeyType;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyTreeError {
    #[error("parent key type {0} is not part of the tree")]
    UnknownParent(KeyType),

    #[error("key type {child} already has parent {existing}")]
    DuplicateChild { child: KeyType, existing: KeyType },
}

impl From<KeyTreeError> for CoreError {
    fn from(err: KeyTreeError) -> Self {
        CoreError::Generic(format!("key type tree construction failed: {err}"))
    }
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<KeyType>,
    children: Vec<KeyType>,
    next_sibling: Option<KeyType>,
    depth: usize,
}

impl Node {
    fn new(parent: Option<KeyType>, depth: usize) -> Self {
        Self {
            parent,
            children: Vec::new(),
            next_sibling: None,
            depth,
        }
    }
}

/// Rooted containment tree over [`KeyType`]s with O(1) navigation.
#[derive(Debug)]
pub struct KeyTypeTree {
    root: KeyType,
    nodes: HashMap<KeyType, Node>,
    preorder: OnceLock<Vec<KeyType>>,
}

impl KeyTypeTree {
    /// An empty tree containing only `root`.
    pub fn new(root: KeyType) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(root, Node::new(None, 0));
        Self {
            root,
            nodes,
            preorder: OnceLock::new(),
        }
    }

    /// Build a tree from `(parent, child)` edges, applied in order.
    pub fn from_edges(root: KeyType, edges: &[(KeyType, KeyType)]) -> Result<Self, KeyTreeError> {
        let mut tree = Self::new(root);
        for &(parent, child) in edges {
            tree.add_edge(parent, child)?;
        }
        Ok(tree)
    }

    /// Tree for the live configuration universe.
    pub fn live() -> Result<Self, KeyTreeError> {
        Self::from_edges(KeyType::Root, LIVE_EDGES)
    }

    /// Tree for the import universe.
    pub fn import() -> Result<Self, KeyTreeError> {
        Self::from_edges(KeyType::Root, IMPORT_EDGES)
    }

    /// Attach `child` as the last child of `parent`.
    pub fn add_edge(&mut self, parent: KeyType, child: KeyType) -> Result<(), KeyTreeError> {
        if let Some(existing) = self.nodes.get(&child) {
            return Err(KeyTreeError::DuplicateChild {
                child,
                existing: existing.parent.unwrap_or(self.root),
            });
        }
        let parent_node = self
            .nodes
            .get_mut(&parent)
            .ok_or(KeyTreeError::UnknownParent(parent))?;
        let depth = parent_node.depth + 1;
        let previous_last = parent_node.children.last().copied();
        parent_node.children.push(child);

        if let Some(prev) = previous_last {
            if let Some(prev_node) = self.nodes.get_mut(&prev) {
                prev_node.next_sibling = Some(child);
            }
        }
        self.nodes.insert(child, Node::new(Some(parent), depth));
        // Edges are only added during construction; drop any stale cache.
        self.preorder = OnceLock::new();
        Ok(())
    }

    pub fn root(&self) -> KeyType {
        self.root
    }

    pub fn is_valid(&self, kt: KeyType) -> bool {
        self.nodes.contains_key(&kt)
    }

    pub fn first_child(&self, parent: KeyType) -> Option<KeyType> {
        self.nodes.get(&parent)?.children.first().copied()
    }

    pub fn next_sibling(&self, kt: KeyType) -> Option<KeyType> {
        self.nodes.get(&kt)?.next_sibling
    }

    pub fn parent(&self, kt: KeyType) -> Option<KeyType> {
        self.nodes.get(&kt)?.parent
    }

    pub fn children(&self, kt: KeyType) -> &[KeyType] {
        self.nodes.get(&kt).map_or(&[], |n| n.children.as_slice())
    }

    /// Distance from the root; equals the key length of an instance.
    pub fn depth(&self, kt: KeyType) -> Option<usize> {
        self.nodes.get(&kt).map(|n| n.depth)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every key type in preorder, starting with the root.
    pub fn preorder(&self) -> &[KeyType] {
        self.preorder.get_or_init(|| {
            let mut order = Vec::with_capacity(self.nodes.len());
            let mut stack = vec![self.root];
            while let Some(kt) = stack.pop() {
                order.push(kt);
                stack.extend(self.children(kt).iter().rev().copied());
            }
            order
        })
    }

    /// Whether `ancestor` lies on the path from the root to `kt` (inclusive).
    pub fn is_ancestor_or_self(&self, ancestor: KeyType, kt: KeyType) -> bool {
        let mut cursor = Some(kt);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.parent(current);
        }
        false
    }
}

// ── Edge tables ─────────────────────────────────────────────────────

use KeyType as K;

const LIVE_EDGES: &[(KeyType, KeyType)] = &[
    (K::Root, K::Flowlist),
    (K::Flowlist, K::FlowlistEntry),
    (K::Root, K::PolicingProfile),
    (K::PolicingProfile, K::PolicingProfileEntry),
    (K::Root, K::Vtn),
    // vBridge
    (K::Vtn, K::Vbridge),
    (K::Vbridge, K::VbrVlanmap),
    (K::Vbridge, K::VbrNwmonitor),
    (K::VbrNwmonitor, K::VbrNwmonitorHost),
    (K::Vbridge, K::VbrPolicingmap),
    (K::Vbridge, K::VbrFlowfilter),
    (K::VbrFlowfilter, K::VbrFlowfilterEntry),
    (K::Vbridge, K::VbrIf),
    (K::VbrIf, K::VbrIfFlowfilter),
    (K::VbrIfFlowfilter, K::VbrIfFlowfilterEntry),
    (K::VbrIf, K::VbrIfPolicingmap),
    // vRouter
    (K::Vtn, K::Vrouter),
    (K::Vrouter, K::VrtIproute),
    (K::Vrouter, K::DhcprelayServer),
    (K::Vrouter, K::DhcprelayIf),
    (K::Vrouter, K::VrtIf),
    (K::VrtIf, K::VrtIfFlowfilter),
    (K::VrtIfFlowfilter, K::VrtIfFlowfilterEntry),
    // vTerminal
    (K::Vtn, K::Vterminal),
    (K::Vterminal, K::VtermIf),
    (K::VtermIf, K::VtermIfPolicingmap),
    (K::VtermIf, K::VtermIfFlowfilter),
    (K::VtermIfFlowfilter, K::VtermIfFlowfilterEntry),
    // Overlay and unknown nodes
    (K::Vtn, K::Vunknown),
    (K::Vunknown, K::VunkIf),
    (K::Vtn, K::Vtep),
    (K::Vtep, K::VtepIf),
    (K::Vtn, K::VtepGrp),
    (K::VtepGrp, K::VtepGrpMember),
    (K::Vtn, K::Vtunnel),
    (K::Vtunnel, K::VtunnelIf),
    (K::Vtn, K::Vlink),
    // VTN-wide policy
    (K::Vtn, K::VtnFlowfilter),
    (K::VtnFlowfilter, K::VtnFlowfilterEntry),
    (K::Vtn, K::VtnPolicingmap),
];

/// Only objects a controller can report back; port maps exist here but
/// not in the live tree, state-only and overlay types are absent.
const IMPORT_EDGES: &[(KeyType, KeyType)] = &[
    (K::Root, K::Flowlist),
    (K::Flowlist, K::FlowlistEntry),
    (K::Root, K::PolicingProfile),
    (K::PolicingProfile, K::PolicingProfileEntry),
    (K::Root, K::Vtn),
    (K::Vtn, K::Vbridge),
    (K::Vbridge, K::VbrVlanmap),
    (K::Vbridge, K::VbrPortmap),
    (K::Vbridge, K::VbrNwmonitor),
    (K::Vbridge, K::VbrPolicingmap),
    (K::Vbridge, K::VbrFlowfilter),
    (K::VbrFlowfilter, K::VbrFlowfilterEntry),
    (K::Vbridge, K::VbrIf),
    (K::VbrIf, K::VbrIfFlowfilter),
    (K::VbrIfFlowfilter, K::VbrIfFlowfilterEntry),
    (K::VbrIf, K::VbrIfPolicingmap),
    (K::Vtn, K::Vterminal),
    (K::Vterminal, K::VtermIf),
    (K::VtermIf, K::VtermIfPolicingmap),
    (K::VtermIf, K::VtermIfFlowfilter),
    (K::VtermIfFlowfilter, K::VtermIfFlowfilterEntry),
    (K::Vtn, K::Vlink),
    (K::Vtn, K::VtnFlowfilter),
    (K::VtnFlowfilter, K::VtnFlowfilterEntry),
    (K::Vtn, K::VtnPolicingmap),
];

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    fn small_tree() -> KeyTypeTree {
        KeyTypeTree::from_edges(
            K::Root,
            &[
                (K::Root, K::Flowlist),
                (K::Root, K::Vtn),
                (K::Flowlist, K::FlowlistEntry),
                (K::Vtn, K::Vbridge),
                (K::Vtn, K::Vrouter),
            ],
        )
        .unwrap()
    }

    #[test]
    fn siblings_follow_insertion_order() {
        let tree = small_tree();
        assert_eq!(tree.first_child(K::Root), Some(K::Flowlist));
        assert_eq!(tree.next_sibling(K::Flowlist), Some(K::Vtn));
        assert_eq!(tree.next_sibling(K::Vtn), None);
        assert_eq!(tree.next_sibling(K::Vbridge), Some(K::Vrouter));
        assert_eq!(tree.first_child(K::Vbridge), None);
    }

    #[test]
    fn parent_and_depth() {
        let tree = small_tree();
        assert_eq!(tree.parent(K::Vbridge), Some(K::Vtn));
        assert_eq!(tree.parent(K::Root), None);
        assert_eq!(tree.depth(K::FlowlistEntry), Some(2));
        assert!(!tree.is_valid(K::VbrIf));
        assert_eq!(tree.parent(K::VbrIf), None);
    }

    #[test]
    fn preorder_visits_subtrees_before_siblings() {
        let tree = small_tree();
        assert_eq!(
            tree.preorder(),
            &[K::Root, K::Flowlist, K::FlowlistEntry, K::Vtn, K::Vbridge, K::Vrouter]
        );
    }

    #[test]
    fn duplicate_child_is_rejected() {
        let mut tree = small_tree();
        let err = tree.add_edge(K::Vtn, K::Flowlist).unwrap_err();
        assert_eq!(
            err,
            KeyTreeError::DuplicateChild {
                child: K::Flowlist,
                existing: K::Root
            }
        );
    }

    #[test]
    fn unknown_parent_is_rejected() {
        let mut tree = small_tree();
        assert_eq!(
            tree.add_edge(K::VbrIf, K::VbrIfFlowfilter).unwrap_err(),
            KeyTreeError::UnknownParent(K::VbrIf)
        );
    }

    #[test]
    fn live_tree_covers_everything_but_import_only_types() {
        let tree = KeyTypeTree::live().unwrap();
        for kt in KeyType::iter() {
            assert_eq!(tree.is_valid(kt), kt != K::VbrPortmap, "{kt}");
        }
        assert_eq!(tree.preorder().len(), tree.len());
        assert_eq!(tree.preorder()[0], K::Root);
    }

    #[test]
    fn import_tree_exposes_port_maps_and_omits_state_only_types() {
        let tree = KeyTypeTree::import().unwrap();
        assert!(tree.is_valid(K::VbrPortmap));
        assert!(!tree.is_valid(K::VbrNwmonitorHost));
        assert!(!tree.is_valid(K::Vrouter));
        assert!(tree.is_ancestor_or_self(K::Vtn, K::VbrIfFlowfilterEntry));
        assert!(!tree.is_ancestor_or_self(K::Flowlist, K::VbrIf));
    }
}
