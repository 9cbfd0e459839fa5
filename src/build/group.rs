//! Builder-internal grouping of nodes.
//!
//! One row usually produces one node, but blocks and loops wrap whole row
//! ranges into a composite that later rows address as a single unit. A
//! group exposes an entry node to connect into and a set of loose exits to
//! connect out of; it is discarded once the compile pass ends.

use crate::flow::{ExitTarget, FlowContainer, NodeId};

pub type GroupId = usize;

#[derive(Debug, Clone)]
pub enum NodeGroup {
    /// The node(s) of a single row.
    Unit { node: NodeId },
    /// A nested block or loop: an ordered list of inner groups.
    Block { children: Vec<GroupId> },
}

#[derive(Debug, Default)]
pub struct GroupArena {
    groups: Vec<NodeGroup>,
}

impl GroupArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_unit(&mut self, node: NodeId) -> GroupId {
        self.groups.push(NodeGroup::Unit { node });
        self.groups.len() - 1
    }

    pub fn new_block(&mut self, children: Vec<GroupId>) -> GroupId {
        self.groups.push(NodeGroup::Block { children });
        self.groups.len() - 1
    }

    pub fn get(&self, id: GroupId) -> &NodeGroup {
        &self.groups[id]
    }

    /// The node a connection into this group lands on: the first node,
    /// descending into the first non-empty child. Empty for blocks whose
    /// rows all produced no node.
    pub fn entry(&self, id: GroupId) -> Option<NodeId> {
        match &self.groups[id] {
            NodeGroup::Unit { node } => Some(*node),
            NodeGroup::Block { children } => {
                children.iter().find_map(|child| self.entry(*child))
            }
        }
    }

    /// All nodes inside this group, depth-first.
    pub fn nodes(&self, id: GroupId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_nodes(id, &mut out);
        out
    }

    fn collect_nodes(&self, id: GroupId, out: &mut Vec<NodeId>) {
        match &self.groups[id] {
            NodeGroup::Unit { node } => out.push(*node),
            NodeGroup::Block { children } => {
                for child in children {
                    self.collect_nodes(*child, out);
                }
            }
        }
    }

    /// Apply a target to every loose exit surfaced by this group. For a
    /// unit that is the node's own loose exits; a block surfaces the loose
    /// exits of everything inside it.
    pub fn apply_loose(&self, id: GroupId, flow: &mut FlowContainer, target: ExitTarget) {
        for node in self.nodes(id) {
            flow.apply_loose(node, target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowContainer;

    #[test]
    fn block_entry_skips_empty_children() {
        let mut flow = FlowContainer::new("t");
        let mut arena = GroupArena::new();
        let empty = arena.new_block(vec![]);
        let node = flow.add_basic(vec![]);
        let unit = arena.new_unit(node);
        let block = arena.new_block(vec![empty, unit]);
        assert_eq!(arena.entry(block), Some(node));
        assert_eq!(arena.entry(empty), None);
    }

    #[test]
    fn nested_blocks_surface_all_nodes() {
        let mut flow = FlowContainer::new("t");
        let mut arena = GroupArena::new();
        let a = arena.new_unit(flow.add_basic(vec![]));
        let b = arena.new_unit(flow.add_basic(vec![]));
        let inner = arena.new_block(vec![b]);
        let outer = arena.new_block(vec![a, inner]);
        assert_eq!(arena.nodes(outer).len(), 2);
    }
}
