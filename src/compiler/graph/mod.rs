//! # Program graph
//!
//! The per-method intermediate representation: an arena of [`Node`]s grouped
//! into basic blocks. Each block starts with a pinned
//! [`ActionNode::BlockEntry`] and ends with exactly one terminator; effects
//! inside a block form a chain from the entry to the terminator through
//! explicit `dependency` edges. Pure values float and are placed by the
//! [`crate::compiler::schedule::Schedule`].
//!
//! ## Construction
//!
//! ```ignore
//! use kiln::compiler::graph::GraphBuilder;
//!
//! let mut builder = GraphBuilder::new(method);
//! let x = builder.parameter(0, Type::signed(4));
//! let one = builder.int_literal(Type::signed(4), 1);
//! let sum = builder.add(x, one);
//! builder.return_value(sum);
//! let graph = builder.finish()?;
//! ```

mod builder;
mod node;
mod visitor;

pub use builder::GraphBuilder;
pub use node::{
    ActionNode, BinaryOp, BlockId, CallTarget, CmpOp, ConversionOp, Literal, Node, NodeId,
    NodeInfo, NodeKind, PhiId, TerminatorNode, ValueNode, ValueOp,
};
pub use visitor::{ActionVisitor, TerminatorVisitor, ValueVisitor};

use crate::compiler::program::MethodElement;
use crate::compiler::types::Type;
use crate::error::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Graph-level basic block
#[derive(Debug, Clone)]
pub struct BlockData {
    /// Human readable label
    pub label: String,
    /// The pinned block-entry action
    pub entry: NodeId,
    /// Terminator, set once the block is closed
    pub terminator: Option<NodeId>,
}

/// Incoming values of one phi
#[derive(Debug, Clone)]
pub struct PhiData {
    /// Node of the phi itself
    pub node: NodeId,
    /// Block the phi merges into
    pub block: BlockId,
    /// Contributed value per predecessor block
    pub incoming: BTreeMap<BlockId, NodeId>,
}

/// A method body
#[derive(Debug, Clone)]
pub struct Graph {
    method: Arc<MethodElement>,
    nodes: Vec<Node>,
    blocks: Vec<BlockData>,
    phis: Vec<PhiData>,
    entry: BlockId,
}

impl Graph {
    /// Method this graph implements
    pub fn method(&self) -> &Arc<MethodElement> {
        &self.method
    }

    /// Entry block
    pub fn entry_block(&self) -> BlockId {
        self.entry
    }

    /// Node by handle
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    /// Number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Block by handle
    pub fn block(&self, id: BlockId) -> &BlockData {
        &self.blocks[id.0 as usize]
    }

    /// Number of blocks, reachable or not
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Phi table by handle
    pub fn phi(&self, id: PhiId) -> &PhiData {
        &self.phis[id.0 as usize]
    }

    /// Result type of a value node
    pub fn value_type(&self, id: NodeId) -> Result<&Type> {
        match &self.node(id).kind {
            NodeKind::Value(value) => Ok(&value.ty),
            other => Err(Error::internal(format!(
                "Node {} is not a value: {:?}",
                id, other
            ))),
        }
    }

    /// Terminator node of a block
    pub fn terminator(&self, block: BlockId) -> Result<NodeId> {
        self.block(block).terminator.ok_or_else(|| {
            Error::internal(format!(
                "Block {} ({}) has no terminator",
                block,
                self.block(block).label
            ))
        })
    }

    /// Successors of a block, following its terminator
    pub fn successors(&self, block: BlockId) -> Vec<BlockId> {
        match self.block(block).terminator {
            Some(id) => match &self.node(id).kind {
                NodeKind::Terminator(terminator) => terminator.successors(),
                _ => Vec::new(),
            },
            None => Vec::new(),
        }
    }

    /// Every block reachable from the entry through terminator edges
    pub fn calculate_reachable_blocks(&self) -> BTreeSet<BlockId> {
        let mut visited = BTreeSet::new();
        let mut stack = vec![self.entry];
        while let Some(block) = stack.pop() {
            if visited.insert(block) {
                stack.extend(self.successors(block));
            }
        }
        visited
    }
}
