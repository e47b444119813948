//! Block scheduling
//!
//! Pinned nodes (block entries, effects, phis and terminators) stay in the
//! block they were built in. Every floating value is placed as late as
//! possible: in the nearest common dominator of the blocks of its users. A
//! value flowing into a phi counts as used at the end of the corresponding
//! predecessor block.
//!
//! Placement is computed on first query and memoized, so lowering can ask
//! for nodes in whatever order it discovers them.

use crate::compiler::graph::{BlockId, Graph, NodeId, NodeKind, ValueNode, ValueOp};
use crate::error::{Error, Result};
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Immediate dominators of the reachable blocks of a graph
#[derive(Debug, Clone)]
pub struct DominatorTree {
    entry: BlockId,
    idom: HashMap<BlockId, BlockId>,
    depth: HashMap<BlockId, usize>,
}

impl DominatorTree {
    /// Compute dominators with the iterative Cooper-Harvey-Kennedy algorithm
    pub fn compute(graph: &Graph, reachable: &BTreeSet<BlockId>) -> Self {
        let entry = graph.entry_block();

        // Iterative DFS post-order
        let mut postorder: Vec<BlockId> = Vec::with_capacity(reachable.len());
        let mut visited: HashSet<BlockId> = HashSet::new();
        let mut stack: Vec<(BlockId, Vec<BlockId>)> = vec![(entry, graph.successors(entry))];
        visited.insert(entry);
        while let Some((block, successors)) = stack.last_mut() {
            match successors.pop() {
                Some(next) => {
                    if visited.insert(next) {
                        let next_successors = graph.successors(next);
                        stack.push((next, next_successors));
                    }
                }
                None => {
                    postorder.push(*block);
                    stack.pop();
                }
            }
        }

        let number: HashMap<BlockId, usize> = postorder
            .iter()
            .enumerate()
            .map(|(i, b)| (*b, i))
            .collect();
        let mut predecessors: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
        for &block in &postorder {
            for successor in graph.successors(block) {
                predecessors.entry(successor).or_default().push(block);
            }
        }

        let mut idom: HashMap<BlockId, BlockId> = HashMap::new();
        idom.insert(entry, entry);
        let mut changed = true;
        while changed {
            changed = false;
            for &block in postorder.iter().rev() {
                if block == entry {
                    continue;
                }
                let mut new_idom: Option<BlockId> = None;
                for &pred in predecessors.get(&block).into_iter().flatten() {
                    if !idom.contains_key(&pred) {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => Self::intersect(&idom, &number, pred, current),
                    });
                }
                if let Some(new_idom) = new_idom {
                    if idom.get(&block) != Some(&new_idom) {
                        idom.insert(block, new_idom);
                        changed = true;
                    }
                }
            }
        }

        let mut depth = HashMap::new();
        depth.insert(entry, 0);
        for &block in postorder.iter().rev() {
            if block != entry {
                let parent_depth = idom
                    .get(&block)
                    .and_then(|parent| depth.get(parent))
                    .copied()
                    .unwrap_or(0);
                depth.insert(block, parent_depth + 1);
            }
        }

        Self { entry, idom, depth }
    }

    fn intersect(
        idom: &HashMap<BlockId, BlockId>,
        number: &HashMap<BlockId, usize>,
        mut a: BlockId,
        mut b: BlockId,
    ) -> BlockId {
        while a != b {
            while number[&a] < number[&b] {
                a = idom[&a];
            }
            while number[&b] < number[&a] {
                b = idom[&b];
            }
        }
        a
    }

    /// Immediate dominator; `None` for the entry and unreachable blocks
    pub fn immediate_dominator(&self, block: BlockId) -> Option<BlockId> {
        if block == self.entry {
            return None;
        }
        self.idom.get(&block).copied()
    }

    /// Depth in the dominator tree; the entry has depth zero
    pub fn depth(&self, block: BlockId) -> usize {
        self.depth.get(&block).copied().unwrap_or(0)
    }

    /// Whether `a` dominates `b`
    pub fn dominates(&self, a: BlockId, mut b: BlockId) -> bool {
        loop {
            if a == b {
                return true;
            }
            match self.immediate_dominator(b) {
                Some(parent) => b = parent,
                None => return false,
            }
        }
    }

    /// Nearest block dominating both `a` and `b`
    pub fn common_dominator(&self, mut a: BlockId, mut b: BlockId) -> BlockId {
        while a != b {
            while self.depth(a) > self.depth(b) {
                a = self.idom[&a];
            }
            while self.depth(b) > self.depth(a) {
                b = self.idom[&b];
            }
            if a != b {
                a = self.idom[&a];
                b = self.idom[&b];
            }
        }
        a
    }
}

#[derive(Debug, Clone, Copy)]
enum Use {
    Node(NodeId),
    PhiInput { predecessor: BlockId },
}

/// Node-to-block assignment for one method
#[derive(Debug)]
pub struct Schedule<'g> {
    graph: &'g Graph,
    reachable: BTreeSet<BlockId>,
    dominators: DominatorTree,
    users: HashMap<NodeId, Vec<Use>>,
    placement: RefCell<HashMap<NodeId, BlockId>>,
}

impl<'g> Schedule<'g> {
    /// Compute reachability, dominators and use lists of `graph`
    pub fn new(graph: &'g Graph) -> Result<Self> {
        let reachable = graph.calculate_reachable_blocks();
        let dominators = DominatorTree::compute(graph, &reachable);

        let mut users: HashMap<NodeId, Vec<Use>> = HashMap::new();
        let mut seen: HashSet<NodeId> = HashSet::new();
        let mut stack: Vec<NodeId> = Vec::new();
        for &block in &reachable {
            stack.push(graph.terminator(block)?);
        }
        while let Some(node) = stack.pop() {
            if !seen.insert(node) {
                continue;
            }
            let kind = &graph.node(node).kind;
            for input in kind.inputs() {
                users.entry(input).or_default().push(Use::Node(node));
                stack.push(input);
            }
            if let NodeKind::Value(ValueNode {
                op: ValueOp::Phi(phi),
                ..
            }) = kind
            {
                for (&predecessor, &value) in &graph.phi(*phi).incoming {
                    if reachable.contains(&predecessor) {
                        users
                            .entry(value)
                            .or_default()
                            .push(Use::PhiInput { predecessor });
                        stack.push(value);
                    }
                }
            }
        }

        Ok(Self {
            graph,
            reachable,
            dominators,
            users,
            placement: RefCell::new(HashMap::new()),
        })
    }

    /// The graph being scheduled
    pub fn graph(&self) -> &'g Graph {
        self.graph
    }

    /// Blocks reachable from the entry
    pub fn reachable_blocks(&self) -> &BTreeSet<BlockId> {
        &self.reachable
    }

    /// Dominator tree over the reachable blocks
    pub fn dominators(&self) -> &DominatorTree {
        &self.dominators
    }

    fn known_block(&self, node: NodeId) -> Option<BlockId> {
        self.graph
            .node(node)
            .pinned
            .or_else(|| self.placement.borrow().get(&node).copied())
    }

    /// Block `node` is lowered into
    pub fn block_for_node(&self, node: NodeId) -> Result<BlockId> {
        if let Some(block) = self.known_block(node) {
            return Ok(block);
        }

        // Users must be placed before the node itself; walk them with an
        // explicit stack so long value chains do not recurse.
        let mut stack = vec![node];
        while let Some(&top) = stack.last() {
            if self.known_block(top).is_some() {
                stack.pop();
                continue;
            }
            let pending: Vec<NodeId> = self
                .users
                .get(&top)
                .into_iter()
                .flatten()
                .filter_map(|u| match u {
                    Use::Node(user) if self.known_block(*user).is_none() => Some(*user),
                    _ => None,
                })
                .collect();
            if !pending.is_empty() {
                stack.extend(pending);
                continue;
            }
            stack.pop();
            let block = self.place(top)?;
            self.placement.borrow_mut().insert(top, block);
        }

        self.known_block(node)
            .ok_or_else(|| Error::internal(format!("Node {} could not be scheduled", node)))
    }

    fn place(&self, node: NodeId) -> Result<BlockId> {
        let mut placed: Option<BlockId> = None;
        for used in self.users.get(&node).into_iter().flatten() {
            let block = match used {
                Use::Node(user) => self.known_block(*user).ok_or_else(|| {
                    Error::internal(format!("User {} of {} is unscheduled", user, node))
                })?,
                Use::PhiInput { predecessor } => *predecessor,
            };
            placed = Some(match placed {
                None => block,
                Some(current) => self.dominators.common_dominator(current, block),
            });
        }
        match placed {
            Some(block) => Ok(block),
            None => self.place_early(node),
        }
    }

    // A node nobody uses goes to the deepest block among its operands.
    fn place_early(&self, node: NodeId) -> Result<BlockId> {
        let mut best = self.graph.entry_block();
        for input in self.graph.node(node).kind.inputs() {
            let block = self.block_for_node(input)?;
            if self.dominators.depth(block) > self.dominators.depth(best) {
                best = block;
            }
        }
        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::graph::{CmpOp, GraphBuilder};
    use crate::compiler::program::ClassBuilder;
    use crate::compiler::types::Type;

    fn builder() -> GraphBuilder {
        let class = ClassBuilder::new("T", 20)
            .static_method("run", "(II)I")
            .build()
            .unwrap();
        GraphBuilder::new(class.methods()[0].clone())
    }

    #[test]
    fn test_diamond_dominators() {
        let mut b = builder();
        let entry = b.current_block();
        let left = b.new_block("left");
        let right = b.new_block("right");
        let join = b.new_block("join");
        let x = b.parameter(0, Type::signed(4));
        let y = b.parameter(1, Type::signed(4));
        let cond = b.cmp(CmpOp::Lt, x, y);
        b.if_then_else(cond, left, right);
        b.begin(left);
        b.goto(join);
        b.begin(right);
        b.goto(join);
        b.begin(join);
        b.return_value(x);
        let graph = b.finish().unwrap();

        let schedule = Schedule::new(&graph).unwrap();
        let dom = schedule.dominators();
        assert_eq!(dom.immediate_dominator(join), Some(entry));
        assert_eq!(dom.immediate_dominator(left), Some(entry));
        assert!(dom.dominates(entry, join));
        assert!(!dom.dominates(left, join));
        assert_eq!(dom.common_dominator(left, right), entry);
    }

    #[test]
    fn test_value_used_in_one_block_is_placed_there() {
        let mut b = builder();
        let left = b.new_block("left");
        let right = b.new_block("right");
        let x = b.parameter(0, Type::signed(4));
        let y = b.parameter(1, Type::signed(4));
        let cond = b.cmp(CmpOp::Lt, x, y);
        b.if_then_else(cond, left, right);
        b.begin(left);
        let sum = b.add(x, y);
        b.return_value(sum);
        b.begin(right);
        b.return_value(y);
        let graph = b.finish().unwrap();

        let schedule = Schedule::new(&graph).unwrap();
        assert_eq!(schedule.block_for_node(sum).unwrap(), left);
        assert_eq!(schedule.block_for_node(cond).unwrap(), graph.entry_block());
    }

    #[test]
    fn test_value_used_in_two_blocks_is_placed_at_common_dominator() {
        let mut b = builder();
        let entry = b.current_block();
        let left = b.new_block("left");
        let right = b.new_block("right");
        let x = b.parameter(0, Type::signed(4));
        let y = b.parameter(1, Type::signed(4));
        let sum = b.add(x, y);
        let cond = b.cmp(CmpOp::Eq, x, y);
        b.if_then_else(cond, left, right);
        b.begin(left);
        b.return_value(sum);
        b.begin(right);
        let doubled = b.add(sum, sum);
        b.return_value(doubled);
        let graph = b.finish().unwrap();

        let schedule = Schedule::new(&graph).unwrap();
        assert_eq!(schedule.block_for_node(sum).unwrap(), entry);
        assert_eq!(schedule.block_for_node(doubled).unwrap(), right);
    }

    #[test]
    fn test_phi_input_is_used_in_predecessor() {
        let mut b = builder();
        let left = b.new_block("left");
        let right = b.new_block("right");
        let join = b.new_block("join");
        let x = b.parameter(0, Type::signed(4));
        let y = b.parameter(1, Type::signed(4));
        let cond = b.cmp(CmpOp::Lt, x, y);
        b.if_then_else(cond, left, right);
        b.begin(left);
        b.goto(join);
        b.begin(right);
        b.goto(join);
        b.begin(join);
        let phi = b.phi(Type::signed(4));
        b.return_value(phi);
        let product = b.mul(x, y);
        b.add_phi_input(phi, left, product).unwrap();
        b.add_phi_input(phi, right, x).unwrap();
        let graph = b.finish().unwrap();

        let schedule = Schedule::new(&graph).unwrap();
        assert_eq!(schedule.block_for_node(product).unwrap(), left);
        assert_eq!(schedule.block_for_node(phi).unwrap(), join);
    }
}
