// ── Built-node set resolver ──
//
// Decides which nodes the spreadsheet needs equipment for: the selected
// node and every aliased node, restricted to nodes whose network exists
// (the root, or anything built).

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::model::{NodeAlias, NodeId, TreeNode};

/// Compute the desired node set.
///
/// `aliases` is `None` while aliases are unknown (not loaded yet, or
/// their fetch failed); only the selected node counts then. Invalid and
/// dangling aliases are skipped, as is a selection missing from the tree.
pub fn resolve_built_nodes(
    selected: Option<NodeId>,
    aliases: Option<&[NodeAlias]>,
    nodes: &[TreeNode],
) -> BTreeSet<NodeId> {
    let by_id: HashMap<NodeId, &TreeNode> = nodes.iter().map(|n| (n.id, n)).collect();

    selected
        .into_iter()
        .chain(aliases.unwrap_or_default().iter().filter_map(NodeAlias::target))
        .filter(|id| by_id.get(id).is_some_and(|node| node.has_network()))
        .collect()
}

/// Memoizing wrapper around [`resolve_built_nodes`].
///
/// Returns the previously published `Arc` when membership did not
/// change, so watchers comparing with `Arc::ptr_eq` stay asleep.
pub struct BuiltNodesResolver {
    last: ArcSwap<BTreeSet<NodeId>>,
}

impl BuiltNodesResolver {
    pub fn new() -> Self {
        Self {
            last: ArcSwap::from_pointee(BTreeSet::new()),
        }
    }

    pub fn resolve(
        &self,
        selected: Option<NodeId>,
        aliases: Option<&[NodeAlias]>,
        nodes: &[TreeNode],
    ) -> Arc<BTreeSet<NodeId>> {
        let next = resolve_built_nodes(selected, aliases, nodes);
        let last = self.last.load_full();
        if *last == next {
            return last;
        }
        let next = Arc::new(next);
        self.last.store(Arc::clone(&next));
        next
    }

    /// The last published set.
    pub fn current(&self) -> Arc<BTreeSet<NodeId>> {
        self.last.load_full()
    }
}

impl Default for BuiltNodesResolver {
    fn default() -> Self {
        Self::new()
    }
}
