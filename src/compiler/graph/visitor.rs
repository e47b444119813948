//! Visitor contracts over the three node kinds
//!
//! Every per-variant method defaults to the kind's `visit_unknown_*`
//! method, so a consumer that does not handle a variant reports it instead
//! of silently skipping it.

use super::node::*;
use crate::compiler::memory::{ReadAccessMode, WriteAccessMode};
use crate::compiler::pointer::Pointer;
use crate::compiler::program::{ClassDefinition, MethodElement};
use std::sync::Arc;

/// Visits value nodes
#[allow(unused_variables)]
pub trait ValueVisitor {
    /// Result of a visit
    type Output;

    /// Called for any variant the visitor does not handle
    fn visit_unknown_value(&mut self, id: NodeId, node: &ValueNode) -> Self::Output;

    /// Constant
    fn visit_literal(&mut self, id: NodeId, node: &ValueNode, literal: &Literal) -> Self::Output {
        self.visit_unknown_value(id, node)
    }

    /// Function parameter
    fn visit_parameter(&mut self, id: NodeId, node: &ValueNode, index: u32) -> Self::Output {
        self.visit_unknown_value(id, node)
    }

    /// Arithmetic or bitwise operation
    fn visit_binary(
        &mut self,
        id: NodeId,
        node: &ValueNode,
        op: BinaryOp,
        lhs: NodeId,
        rhs: NodeId,
    ) -> Self::Output {
        self.visit_unknown_value(id, node)
    }

    /// Negation
    fn visit_neg(&mut self, id: NodeId, node: &ValueNode, input: NodeId) -> Self::Output {
        self.visit_unknown_value(id, node)
    }

    /// Comparison
    fn visit_cmp(
        &mut self,
        id: NodeId,
        node: &ValueNode,
        op: CmpOp,
        lhs: NodeId,
        rhs: NodeId,
    ) -> Self::Output {
        self.visit_unknown_value(id, node)
    }

    /// Conversion
    fn visit_conversion(
        &mut self,
        id: NodeId,
        node: &ValueNode,
        op: ConversionOp,
        input: NodeId,
    ) -> Self::Output {
        self.visit_unknown_value(id, node)
    }

    /// Select
    fn visit_select(
        &mut self,
        id: NodeId,
        node: &ValueNode,
        cond: NodeId,
        if_true: NodeId,
        if_false: NodeId,
    ) -> Self::Output {
        self.visit_unknown_value(id, node)
    }

    /// Phi
    fn visit_phi(&mut self, id: NodeId, node: &ValueNode, phi: PhiId) -> Self::Output {
        self.visit_unknown_value(id, node)
    }

    /// Pointer literal
    fn visit_pointer_literal(
        &mut self,
        id: NodeId,
        node: &ValueNode,
        pointer: &Pointer,
    ) -> Self::Output {
        self.visit_unknown_value(id, node)
    }

    /// Load
    fn visit_load(
        &mut self,
        id: NodeId,
        node: &ValueNode,
        pointer: NodeId,
        mode: ReadAccessMode,
        dependency: NodeId,
    ) -> Self::Output {
        self.visit_unknown_value(id, node)
    }

    /// Call
    fn visit_call(
        &mut self,
        id: NodeId,
        node: &ValueNode,
        target: &CallTarget,
        args: &[NodeId],
        dependency: NodeId,
    ) -> Self::Output {
        self.visit_unknown_value(id, node)
    }

    /// Virtual method lookup
    fn visit_virtual_lookup(
        &mut self,
        id: NodeId,
        node: &ValueNode,
        receiver: NodeId,
        method: &Arc<MethodElement>,
        owner: &Arc<ClassDefinition>,
    ) -> Self::Output {
        self.visit_unknown_value(id, node)
    }

    /// Interface method lookup
    fn visit_interface_lookup(
        &mut self,
        id: NodeId,
        node: &ValueNode,
        receiver: NodeId,
        method: &Arc<MethodElement>,
        interface: &Arc<ClassDefinition>,
    ) -> Self::Output {
        self.visit_unknown_value(id, node)
    }

    /// Caught exception
    fn visit_catch(&mut self, id: NodeId, node: &ValueNode) -> Self::Output {
        self.visit_unknown_value(id, node)
    }
}

impl ValueNode {
    /// Dispatch to the visitor method for this node's variant
    pub fn accept<V: ValueVisitor>(&self, id: NodeId, visitor: &mut V) -> V::Output {
        match &self.op {
            ValueOp::Literal(literal) => visitor.visit_literal(id, self, literal),
            ValueOp::Parameter(index) => visitor.visit_parameter(id, self, *index),
            ValueOp::Binary { op, lhs, rhs } => visitor.visit_binary(id, self, *op, *lhs, *rhs),
            ValueOp::Neg(input) => visitor.visit_neg(id, self, *input),
            ValueOp::Cmp { op, lhs, rhs } => visitor.visit_cmp(id, self, *op, *lhs, *rhs),
            ValueOp::Conversion { op, input } => visitor.visit_conversion(id, self, *op, *input),
            ValueOp::Select {
                cond,
                if_true,
                if_false,
            } => visitor.visit_select(id, self, *cond, *if_true, *if_false),
            ValueOp::Phi(phi) => visitor.visit_phi(id, self, *phi),
            ValueOp::PointerLiteral(pointer) => visitor.visit_pointer_literal(id, self, pointer),
            ValueOp::Load {
                pointer,
                mode,
                dependency,
            } => visitor.visit_load(id, self, *pointer, *mode, *dependency),
            ValueOp::Call {
                target,
                args,
                dependency,
            } => visitor.visit_call(id, self, target, args, *dependency),
            ValueOp::VirtualLookup {
                receiver,
                method,
                owner,
            } => visitor.visit_virtual_lookup(id, self, *receiver, method, owner),
            ValueOp::InterfaceLookup {
                receiver,
                method,
                interface,
            } => visitor.visit_interface_lookup(id, self, *receiver, method, interface),
            ValueOp::Catch => visitor.visit_catch(id, self),
        }
    }
}

/// Visits action nodes
#[allow(unused_variables)]
pub trait ActionVisitor {
    /// Result of a visit
    type Output;

    /// Called for any variant the visitor does not handle
    fn visit_unknown_action(&mut self, id: NodeId, node: &ActionNode) -> Self::Output;

    /// Block entry marker
    fn visit_block_entry(&mut self, id: NodeId, block: BlockId) -> Self::Output {
        self.visit_unknown_action(id, &ActionNode::BlockEntry(block))
    }

    /// Store
    fn visit_store(
        &mut self,
        id: NodeId,
        node: &ActionNode,
        pointer: NodeId,
        value: NodeId,
        mode: WriteAccessMode,
        dependency: NodeId,
    ) -> Self::Output {
        self.visit_unknown_action(id, node)
    }

    /// Monitor enter
    fn visit_monitor_enter(
        &mut self,
        id: NodeId,
        node: &ActionNode,
        object: NodeId,
        dependency: NodeId,
    ) -> Self::Output {
        self.visit_unknown_action(id, node)
    }

    /// Monitor exit
    fn visit_monitor_exit(
        &mut self,
        id: NodeId,
        node: &ActionNode,
        object: NodeId,
        dependency: NodeId,
    ) -> Self::Output {
        self.visit_unknown_action(id, node)
    }
}

impl ActionNode {
    /// Dispatch to the visitor method for this node's variant
    pub fn accept<V: ActionVisitor>(&self, id: NodeId, visitor: &mut V) -> V::Output {
        match self {
            ActionNode::BlockEntry(block) => visitor.visit_block_entry(id, *block),
            ActionNode::Store {
                pointer,
                value,
                mode,
                dependency,
            } => visitor.visit_store(id, self, *pointer, *value, *mode, *dependency),
            ActionNode::MonitorEnter { object, dependency } => {
                visitor.visit_monitor_enter(id, self, *object, *dependency)
            }
            ActionNode::MonitorExit { object, dependency } => {
                visitor.visit_monitor_exit(id, self, *object, *dependency)
            }
        }
    }
}

/// Visits terminator nodes
#[allow(unused_variables)]
pub trait TerminatorVisitor {
    /// Result of a visit
    type Output;

    /// Called for any variant the visitor does not handle
    fn visit_unknown_terminator(&mut self, id: NodeId, node: &TerminatorNode) -> Self::Output;

    /// Goto
    fn visit_goto(&mut self, id: NodeId, node: &TerminatorNode, target: BlockId) -> Self::Output {
        self.visit_unknown_terminator(id, node)
    }

    /// Conditional branch
    fn visit_if(
        &mut self,
        id: NodeId,
        node: &TerminatorNode,
        cond: NodeId,
        if_true: BlockId,
        if_false: BlockId,
    ) -> Self::Output {
        self.visit_unknown_terminator(id, node)
    }

    /// Return
    fn visit_return(
        &mut self,
        id: NodeId,
        node: &TerminatorNode,
        value: Option<NodeId>,
    ) -> Self::Output {
        self.visit_unknown_terminator(id, node)
    }

    /// Unreachable
    fn visit_unreachable(&mut self, id: NodeId, node: &TerminatorNode) -> Self::Output {
        self.visit_unknown_terminator(id, node)
    }

    /// Throw
    fn visit_throw(
        &mut self,
        id: NodeId,
        node: &TerminatorNode,
        value: NodeId,
        handler: Option<BlockId>,
    ) -> Self::Output {
        self.visit_unknown_terminator(id, node)
    }
}

impl TerminatorNode {
    /// Dispatch to the visitor method for this node's variant
    pub fn accept<V: TerminatorVisitor>(&self, id: NodeId, visitor: &mut V) -> V::Output {
        match self {
            TerminatorNode::Goto { target, .. } => visitor.visit_goto(id, self, *target),
            TerminatorNode::If {
                cond,
                if_true,
                if_false,
                ..
            } => visitor.visit_if(id, self, *cond, *if_true, *if_false),
            TerminatorNode::Return { value, .. } => visitor.visit_return(id, self, *value),
            TerminatorNode::Unreachable { .. } => visitor.visit_unreachable(id, self),
            TerminatorNode::Throw { value, handler, .. } => {
                visitor.visit_throw(id, self, *value, *handler)
            }
        }
    }
}
