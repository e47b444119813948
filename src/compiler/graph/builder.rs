//! Additive graph construction
//!
//! Nodes are created bottom-up from operands that already exist. Pure value
//! nodes are hash-consed so structurally equal values share one handle.
//! Effects are threaded through the builder's current block: each load,
//! call, store or monitor operation depends on the previous one, and the
//! terminator depends on the last.

use super::node::*;
use super::{BlockData, Graph, PhiData};
use crate::compiler::memory::{ReadAccessMode, WriteAccessMode};
use crate::compiler::pointer::Pointer;
use crate::compiler::program::{ClassDefinition, MethodElement};
use crate::compiler::types::{FunctionType, Type};
use crate::error::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Builds a [`Graph`] for one method
#[derive(Debug)]
pub struct GraphBuilder {
    graph: Graph,
    interned: HashMap<ValueNode, NodeId>,
    current: BlockId,
    last_effect: NodeId,
    info: NodeInfo,
    errors: Vec<String>,
}

impl GraphBuilder {
    /// Start a graph with an open entry block
    pub fn new(method: Arc<MethodElement>) -> Self {
        let graph = Graph {
            method,
            nodes: Vec::new(),
            blocks: Vec::new(),
            phis: Vec::new(),
            entry: BlockId(0),
        };
        let mut builder = Self {
            graph,
            interned: HashMap::new(),
            current: BlockId(0),
            last_effect: NodeId(0),
            info: NodeInfo {
                call_site: None,
                line: -1,
                bci: -1,
            },
            errors: Vec::new(),
        };
        let entry = builder.new_block("entry");
        builder.graph.entry = entry;
        builder.begin(entry);
        builder
    }

    /// Method under construction
    pub fn method(&self) -> &Arc<MethodElement> {
        &self.graph.method
    }

    /// Source position attached to subsequently created nodes
    pub fn set_location(&mut self, line: i32, bci: i32) {
        self.info.line = line;
        self.info.bci = bci;
    }

    /// Inlining call site attached to subsequently created nodes
    pub fn set_call_site(&mut self, call_site: Option<NodeId>) {
        self.info.call_site = call_site;
    }

    /// Block receiving new effects
    pub fn current_block(&self) -> BlockId {
        self.current
    }

    /// Create a block; it becomes current only through [`Self::begin`]
    pub fn new_block(&mut self, label: impl Into<String>) -> BlockId {
        let block = BlockId(self.graph.blocks.len() as u32);
        let entry = self.push(NodeKind::Action(ActionNode::BlockEntry(block)), Some(block));
        self.graph.blocks.push(BlockData {
            label: label.into(),
            entry,
            terminator: None,
        });
        block
    }

    /// Continue building in `block`
    pub fn begin(&mut self, block: BlockId) {
        self.current = block;
        self.last_effect = self.graph.blocks[block.0 as usize].entry;
    }

    fn push(&mut self, kind: NodeKind, pinned: Option<BlockId>) -> NodeId {
        let id = NodeId(self.graph.nodes.len() as u32);
        self.graph.nodes.push(Node {
            info: self.info.clone(),
            pinned,
            kind,
        });
        id
    }

    fn check_open(&mut self) {
        let block = &self.graph.blocks[self.current.0 as usize];
        if block.terminator.is_some() {
            self.errors.push(format!(
                "Node added to terminated block '{}'",
                block.label
            ));
        }
    }

    fn value(&mut self, ty: Type, op: ValueOp) -> NodeId {
        let node = ValueNode { ty, op };
        if node.op.is_pure() {
            if let Some(&id) = self.interned.get(&node) {
                return id;
            }
            let id = self.push(NodeKind::Value(node.clone()), None);
            self.interned.insert(node, id);
            id
        } else {
            self.check_open();
            let pinned = Some(self.current);
            self.push(NodeKind::Value(node), pinned)
        }
    }

    fn effect(&mut self, ty: Type, op: ValueOp) -> NodeId {
        let id = self.value(ty, op);
        self.last_effect = id;
        id
    }

    fn action(&mut self, action: ActionNode) -> NodeId {
        self.check_open();
        let id = self.push(NodeKind::Action(action), Some(self.current));
        self.last_effect = id;
        id
    }

    fn terminate(&mut self, terminator: TerminatorNode) -> NodeId {
        self.check_open();
        let id = self.push(NodeKind::Terminator(terminator), Some(self.current));
        self.graph.blocks[self.current.0 as usize].terminator = Some(id);
        id
    }

    /// Result type of a value node, `Void` for non-values
    pub fn type_of(&self, id: NodeId) -> Type {
        match &self.graph.nodes[id.0 as usize].kind {
            NodeKind::Value(value) => value.ty.clone(),
            _ => Type::Void,
        }
    }

    /// Boolean constant
    pub fn bool_literal(&mut self, value: bool) -> NodeId {
        self.value(Type::Boolean, ValueOp::Literal(Literal::Bool(value)))
    }

    /// Integer constant of type `ty`
    pub fn int_literal(&mut self, ty: Type, value: i64) -> NodeId {
        self.value(ty, ValueOp::Literal(Literal::Int(value)))
    }

    /// Floating point constant of type `ty`
    pub fn float_literal(&mut self, ty: Type, value: f64) -> NodeId {
        self.value(ty, ValueOp::Literal(Literal::Float(value.to_bits())))
    }

    /// Null reference
    pub fn null_literal(&mut self) -> NodeId {
        self.value(Type::Reference, ValueOp::Literal(Literal::Null))
    }

    /// Function parameter
    pub fn parameter(&mut self, index: u32, ty: Type) -> NodeId {
        self.value(ty, ValueOp::Parameter(index))
    }

    /// Binary operation typed like its left operand
    pub fn binary(&mut self, op: BinaryOp, lhs: NodeId, rhs: NodeId) -> NodeId {
        let ty = self.type_of(lhs);
        self.value(ty, ValueOp::Binary { op, lhs, rhs })
    }

    /// `lhs + rhs`
    pub fn add(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.binary(BinaryOp::Add, lhs, rhs)
    }

    /// `lhs - rhs`
    pub fn sub(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.binary(BinaryOp::Sub, lhs, rhs)
    }

    /// `lhs * rhs`
    pub fn mul(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.binary(BinaryOp::Mul, lhs, rhs)
    }

    /// `lhs / rhs`
    pub fn div(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.binary(BinaryOp::Div, lhs, rhs)
    }

    /// `lhs % rhs`
    pub fn rem(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.binary(BinaryOp::Rem, lhs, rhs)
    }

    /// `lhs >> rhs`
    pub fn shr(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.binary(BinaryOp::Shr, lhs, rhs)
    }

    /// `-input`
    pub fn neg(&mut self, input: NodeId) -> NodeId {
        let ty = self.type_of(input);
        self.value(ty, ValueOp::Neg(input))
    }

    /// Comparison producing a boolean
    pub fn cmp(&mut self, op: CmpOp, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.value(Type::Boolean, ValueOp::Cmp { op, lhs, rhs })
    }

    /// Conversion of `input` to `ty`
    pub fn conversion(&mut self, op: ConversionOp, input: NodeId, ty: Type) -> NodeId {
        self.value(ty, ValueOp::Conversion { op, input })
    }

    /// `cond ? if_true : if_false`
    pub fn select(&mut self, cond: NodeId, if_true: NodeId, if_false: NodeId) -> NodeId {
        let ty = self.type_of(if_true);
        self.value(
            ty,
            ValueOp::Select {
                cond,
                if_true,
                if_false,
            },
        )
    }

    /// Address of a symbolic pointer
    pub fn pointer_literal(&mut self, pointer: Pointer) -> NodeId {
        let ty = Type::pointer_to(pointer.pointee().clone());
        self.value(ty, ValueOp::PointerLiteral(pointer))
    }

    /// Empty phi merging into the current block
    pub fn phi(&mut self, ty: Type) -> NodeId {
        let phi = PhiId(self.graph.phis.len() as u32);
        let node = self.value(ty, ValueOp::Phi(phi));
        self.graph.phis.push(PhiData {
            node,
            block: self.current,
            incoming: BTreeMap::new(),
        });
        node
    }

    /// Record that `value` flows into `phi` from `predecessor`
    pub fn add_phi_input(&mut self, phi: NodeId, predecessor: BlockId, value: NodeId) -> Result<()> {
        let id = match &self.graph.nodes[phi.0 as usize].kind {
            NodeKind::Value(ValueNode {
                op: ValueOp::Phi(id),
                ..
            }) => *id,
            _ => return Err(Error::internal(format!("Node {} is not a phi", phi))),
        };
        self.graph.phis[id.0 as usize]
            .incoming
            .insert(predecessor, value);
        Ok(())
    }

    /// Memory read of type `ty`
    pub fn load(&mut self, pointer: NodeId, ty: Type, mode: ReadAccessMode) -> NodeId {
        let dependency = self.last_effect;
        self.effect(
            ty,
            ValueOp::Load {
                pointer,
                mode,
                dependency,
            },
        )
    }

    /// Memory write
    pub fn store(&mut self, pointer: NodeId, value: NodeId, mode: WriteAccessMode) -> NodeId {
        let dependency = self.last_effect;
        self.action(ActionNode::Store {
            pointer,
            value,
            mode,
            dependency,
        })
    }

    /// Acquire `object`'s monitor
    pub fn monitor_enter(&mut self, object: NodeId) -> NodeId {
        let dependency = self.last_effect;
        self.action(ActionNode::MonitorEnter { object, dependency })
    }

    /// Release `object`'s monitor
    pub fn monitor_exit(&mut self, object: NodeId) -> NodeId {
        let dependency = self.last_effect;
        self.action(ActionNode::MonitorExit { object, dependency })
    }

    /// Direct call of a known method
    pub fn call(&mut self, method: &Arc<MethodElement>, args: Vec<NodeId>) -> NodeId {
        let dependency = self.last_effect;
        let ty = method.function_type().return_type;
        self.effect(
            ty,
            ValueOp::Call {
                target: CallTarget::Direct(method.clone()),
                args,
                dependency,
            },
        )
    }

    /// Call through a function pointer
    pub fn call_indirect(
        &mut self,
        pointer: NodeId,
        signature: FunctionType,
        args: Vec<NodeId>,
    ) -> NodeId {
        let dependency = self.last_effect;
        let ty = signature.return_type.clone();
        self.effect(
            ty,
            ValueOp::Call {
                target: CallTarget::Indirect {
                    pointer,
                    signature: Arc::new(signature),
                },
                args,
                dependency,
            },
        )
    }

    /// Entry point of `method` for the runtime class of `receiver`
    pub fn virtual_lookup(
        &mut self,
        receiver: NodeId,
        method: &Arc<MethodElement>,
        owner: &Arc<ClassDefinition>,
    ) -> NodeId {
        let ty = Type::pointer_to(Type::Function(Arc::new(method.function_type())));
        self.value(
            ty,
            ValueOp::VirtualLookup {
                receiver,
                method: method.clone(),
                owner: owner.clone(),
            },
        )
    }

    /// Entry point of interface `method` for the runtime class of `receiver`
    pub fn interface_lookup(
        &mut self,
        receiver: NodeId,
        method: &Arc<MethodElement>,
        interface: &Arc<ClassDefinition>,
    ) -> NodeId {
        let ty = Type::pointer_to(Type::Function(Arc::new(method.function_type())));
        self.value(
            ty,
            ValueOp::InterfaceLookup {
                receiver,
                method: method.clone(),
                interface: interface.clone(),
            },
        )
    }

    /// Exception object on entry to a handler block
    pub fn catch_value(&mut self) -> NodeId {
        self.value(Type::Reference, ValueOp::Catch)
    }

    /// Jump to `target`
    pub fn goto(&mut self, target: BlockId) -> NodeId {
        let dependency = self.last_effect;
        self.terminate(TerminatorNode::Goto { target, dependency })
    }

    /// Branch on `cond`
    pub fn if_then_else(&mut self, cond: NodeId, if_true: BlockId, if_false: BlockId) -> NodeId {
        let dependency = self.last_effect;
        self.terminate(TerminatorNode::If {
            cond,
            if_true,
            if_false,
            dependency,
        })
    }

    /// Return `value`
    pub fn return_value(&mut self, value: NodeId) -> NodeId {
        let dependency = self.last_effect;
        self.terminate(TerminatorNode::Return {
            value: Some(value),
            dependency,
        })
    }

    /// Return from a void method
    pub fn return_void(&mut self) -> NodeId {
        let dependency = self.last_effect;
        self.terminate(TerminatorNode::Return {
            value: None,
            dependency,
        })
    }

    /// Mark the end of the current block unreachable
    pub fn unreachable(&mut self) -> NodeId {
        let dependency = self.last_effect;
        self.terminate(TerminatorNode::Unreachable { dependency })
    }

    /// Throw `value`, optionally to a handler block
    pub fn throw(&mut self, value: NodeId, handler: Option<BlockId>) -> NodeId {
        let dependency = self.last_effect;
        self.terminate(TerminatorNode::Throw {
            value,
            handler,
            dependency,
        })
    }

    /// Validate and return the graph
    ///
    /// Fails when a node was added after its block's terminator, or when a
    /// reachable block was never terminated.
    pub fn finish(self) -> Result<Graph> {
        if let Some(error) = self.errors.first() {
            return Err(Error::internal(format!(
                "Malformed graph for {}: {}",
                self.graph.method, error
            )));
        }
        for block in self.graph.calculate_reachable_blocks() {
            self.graph.terminator(block)?;
        }
        Ok(self.graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::program::ClassBuilder;

    fn builder() -> GraphBuilder {
        let class = ClassBuilder::new("T", 20)
            .static_method("run", "(II)I")
            .build()
            .unwrap();
        GraphBuilder::new(class.methods()[0].clone())
    }

    #[test]
    fn test_pure_values_are_hash_consed() {
        let mut b = builder();
        let x = b.parameter(0, Type::signed(4));
        let y = b.parameter(1, Type::signed(4));
        let first = b.add(x, y);
        let second = b.add(x, y);
        let swapped = b.add(y, x);
        assert_eq!(first, second);
        assert_ne!(first, swapped);
        assert_eq!(b.int_literal(Type::signed(4), 7), b.int_literal(Type::signed(4), 7));
        assert_ne!(b.int_literal(Type::signed(4), 7), b.int_literal(Type::unsigned(4), 7));
    }

    #[test]
    fn test_effects_are_chained() {
        let mut b = builder();
        let entry = b.current_block();
        let ptr = b.null_literal();
        let load = b.load(ptr, Type::signed(4), ReadAccessMode::Plain);
        let store = b.store(ptr, load, WriteAccessMode::Release);
        let ret = b.return_value(load);
        let graph = b.finish().unwrap();

        match &graph.node(load).kind {
            NodeKind::Value(ValueNode {
                op: ValueOp::Load { dependency, .. },
                ..
            }) => assert_eq!(*dependency, graph.block(entry).entry),
            other => panic!("unexpected {:?}", other),
        }
        match &graph.node(ret).kind {
            NodeKind::Terminator(t) => assert_eq!(t.dependency(), store),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(graph.node(load).pinned, Some(entry));
    }

    #[test]
    fn test_phi_is_not_hash_consed() {
        let mut b = builder();
        let first = b.phi(Type::signed(4));
        let second = b.phi(Type::signed(4));
        assert_ne!(first, second);
        assert!(b.add_phi_input(first, BlockId(0), second).is_ok());
        let literal = b.bool_literal(false);
        assert!(b.add_phi_input(literal, BlockId(0), second).is_err());
    }

    #[test]
    fn test_finish_rejects_unterminated_block() {
        let b = builder();
        assert!(b.finish().is_err());
    }

    #[test]
    fn test_finish_rejects_node_after_terminator() {
        let mut b = builder();
        b.unreachable();
        let ptr = b.null_literal();
        b.monitor_enter(ptr);
        assert!(b.finish().is_err());
    }
}
