//! Node taxonomy
//!
//! Every node is one of three disjoint kinds: a [`ValueNode`] producing a
//! typed result, an [`ActionNode`] performing a side effect, or a
//! [`TerminatorNode`] ending a block. Operands are [`NodeId`] handles into
//! the owning [`super::Graph`].

use crate::compiler::memory::{ReadAccessMode, WriteAccessMode};
use crate::compiler::pointer::Pointer;
use crate::compiler::program::{ClassDefinition, MethodElement};
use crate::compiler::types::{FunctionType, Type};
use std::fmt;
use std::sync::Arc;

/// Handle of a node inside its graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

/// Handle of a basic block inside its graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub u32);

/// Handle of a phi's incoming-value table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhiId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// Provenance of a node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeInfo {
    /// Call node this node was inlined through, if any
    pub call_site: Option<NodeId>,
    /// Source line, `-1` when unknown
    pub line: i32,
    /// Bytecode index, `-1` when unknown
    pub bci: i32,
}

impl fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, bci {}", self.line, self.bci)
    }
}

/// A graph node
#[derive(Debug, Clone)]
pub struct Node {
    /// Provenance
    pub info: NodeInfo,
    /// Block fixed at construction, `None` for floating values
    pub pinned: Option<BlockId>,
    /// What the node is
    pub kind: NodeKind,
}

/// The three node kinds
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Produces a typed value
    Value(ValueNode),
    /// Performs a side effect
    Action(ActionNode),
    /// Ends a block
    Terminator(TerminatorNode),
}

/// A value-producing node
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValueNode {
    /// Result type
    pub ty: Type,
    /// Operation
    pub op: ValueOp,
}

/// Two-operand arithmetic and bitwise operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Rem,
    /// `&`
    And,
    /// `|`
    Or,
    /// `^`
    Xor,
    /// `<<`
    Shl,
    /// `>>`, arithmetic or logical by signedness
    Shr,
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

/// Type conversions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversionOp {
    /// Between integer and floating point
    Convert,
    /// Widening within a numeric family
    Extend,
    /// Narrowing within a numeric family
    Truncate,
    /// Reinterpret bits
    Bitcast,
}

/// Literal constants
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Literal {
    /// `true` / `false`
    Bool(bool),
    /// Integer bits, sign-extended to 64 bits
    Int(i64),
    /// Floating point bits as `f64::to_bits`
    Float(u64),
    /// Null reference
    Null,
}

/// Callee of a call node
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CallTarget {
    /// A known method
    Direct(Arc<MethodElement>),
    /// A function pointer value with its signature
    Indirect {
        /// Pointer value
        pointer: NodeId,
        /// Callee signature
        signature: Arc<FunctionType>,
    },
}

/// Value operations
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueOp {
    /// Constant
    Literal(Literal),
    /// Function parameter by position
    Parameter(u32),
    /// Arithmetic or bitwise operation
    Binary {
        /// Operator
        op: BinaryOp,
        /// Left operand
        lhs: NodeId,
        /// Right operand
        rhs: NodeId,
    },
    /// Arithmetic negation
    Neg(NodeId),
    /// Comparison producing a boolean
    Cmp {
        /// Operator
        op: CmpOp,
        /// Left operand
        lhs: NodeId,
        /// Right operand
        rhs: NodeId,
    },
    /// Conversion to the node's type
    Conversion {
        /// Kind of conversion
        op: ConversionOp,
        /// Converted value
        input: NodeId,
    },
    /// `cond ? if_true : if_false`
    Select {
        /// Boolean condition
        cond: NodeId,
        /// Value when true
        if_true: NodeId,
        /// Value when false
        if_false: NodeId,
    },
    /// Block-entry merge of predecessor values
    Phi(PhiId),
    /// Address of a symbolic pointer
    PointerLiteral(Pointer),
    /// Memory read ordered after `dependency`
    Load {
        /// Address
        pointer: NodeId,
        /// Ordering strength
        mode: ReadAccessMode,
        /// Preceding effect
        dependency: NodeId,
    },
    /// Call ordered after `dependency`
    Call {
        /// Callee
        target: CallTarget,
        /// Arguments
        args: Vec<NodeId>,
        /// Preceding effect
        dependency: NodeId,
    },
    /// Entry point of `method` for the receiver's runtime class
    VirtualLookup {
        /// Receiver object
        receiver: NodeId,
        /// Statically resolved method
        method: Arc<MethodElement>,
        /// Statically known receiver class
        owner: Arc<ClassDefinition>,
    },
    /// Entry point of interface `method` for the receiver's runtime class
    InterfaceLookup {
        /// Receiver object
        receiver: NodeId,
        /// Interface method
        method: Arc<MethodElement>,
        /// Interface declaring the method
        interface: Arc<ClassDefinition>,
    },
    /// Exception object delivered to a handler block
    Catch,
}

impl ValueOp {
    /// Pure values are interchangeable when structurally equal
    pub fn is_pure(&self) -> bool {
        !matches!(
            self,
            ValueOp::Phi(_) | ValueOp::Load { .. } | ValueOp::Call { .. } | ValueOp::Catch
        )
    }

    /// Data operands and effect dependency, in evaluation order
    pub fn inputs(&self) -> Vec<NodeId> {
        match self {
            ValueOp::Literal(_)
            | ValueOp::Parameter(_)
            | ValueOp::Phi(_)
            | ValueOp::PointerLiteral(_)
            | ValueOp::Catch => Vec::new(),
            ValueOp::Binary { lhs, rhs, .. } | ValueOp::Cmp { lhs, rhs, .. } => vec![*lhs, *rhs],
            ValueOp::Neg(input) | ValueOp::Conversion { input, .. } => vec![*input],
            ValueOp::Select {
                cond,
                if_true,
                if_false,
            } => vec![*cond, *if_true, *if_false],
            ValueOp::Load {
                pointer,
                dependency,
                ..
            } => vec![*dependency, *pointer],
            ValueOp::Call {
                target,
                args,
                dependency,
            } => {
                let mut inputs = vec![*dependency];
                if let CallTarget::Indirect { pointer, .. } = target {
                    inputs.push(*pointer);
                }
                inputs.extend(args.iter().copied());
                inputs
            }
            ValueOp::VirtualLookup { receiver, .. } | ValueOp::InterfaceLookup { receiver, .. } => {
                vec![*receiver]
            }
        }
    }
}

/// A side-effecting node
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActionNode {
    /// Marks the start of a block; the root of its effect chain
    BlockEntry(BlockId),
    /// Memory write
    Store {
        /// Address
        pointer: NodeId,
        /// Stored value
        value: NodeId,
        /// Ordering strength
        mode: WriteAccessMode,
        /// Preceding effect
        dependency: NodeId,
    },
    /// Acquire an object's monitor
    MonitorEnter {
        /// Locked object
        object: NodeId,
        /// Preceding effect
        dependency: NodeId,
    },
    /// Release an object's monitor
    MonitorExit {
        /// Unlocked object
        object: NodeId,
        /// Preceding effect
        dependency: NodeId,
    },
}

impl ActionNode {
    /// Data operands and effect dependency, in evaluation order
    pub fn inputs(&self) -> Vec<NodeId> {
        match self {
            ActionNode::BlockEntry(_) => Vec::new(),
            ActionNode::Store {
                pointer,
                value,
                dependency,
                ..
            } => vec![*dependency, *pointer, *value],
            ActionNode::MonitorEnter { object, dependency }
            | ActionNode::MonitorExit { object, dependency } => vec![*dependency, *object],
        }
    }
}

/// A block-ending node
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TerminatorNode {
    /// Unconditional jump
    Goto {
        /// Successor
        target: BlockId,
        /// Last effect of the block
        dependency: NodeId,
    },
    /// Two-way branch
    If {
        /// Boolean condition
        cond: NodeId,
        /// Successor when true
        if_true: BlockId,
        /// Successor when false
        if_false: BlockId,
        /// Last effect of the block
        dependency: NodeId,
    },
    /// Return, with a value unless the method is void
    Return {
        /// Returned value
        value: Option<NodeId>,
        /// Last effect of the block
        dependency: NodeId,
    },
    /// Control never reaches the end of this block
    Unreachable {
        /// Last effect of the block
        dependency: NodeId,
    },
    /// Raise an exception, transferring to `handler` when present
    Throw {
        /// Exception object
        value: NodeId,
        /// Handler block
        handler: Option<BlockId>,
        /// Last effect of the block
        dependency: NodeId,
    },
}

impl TerminatorNode {
    /// Successor blocks in branch order
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            TerminatorNode::Goto { target, .. } => vec![*target],
            TerminatorNode::If {
                if_true, if_false, ..
            } => vec![*if_true, *if_false],
            TerminatorNode::Throw {
                handler: Some(handler),
                ..
            } => vec![*handler],
            TerminatorNode::Return { .. }
            | TerminatorNode::Unreachable { .. }
            | TerminatorNode::Throw { handler: None, .. } => Vec::new(),
        }
    }

    /// Effect chain predecessor
    pub fn dependency(&self) -> NodeId {
        match self {
            TerminatorNode::Goto { dependency, .. }
            | TerminatorNode::If { dependency, .. }
            | TerminatorNode::Return { dependency, .. }
            | TerminatorNode::Unreachable { dependency }
            | TerminatorNode::Throw { dependency, .. } => *dependency,
        }
    }

    /// Data operands and effect dependency, in evaluation order
    pub fn inputs(&self) -> Vec<NodeId> {
        let mut inputs = vec![self.dependency()];
        match self {
            TerminatorNode::If { cond, .. } => inputs.push(*cond),
            TerminatorNode::Return {
                value: Some(value), ..
            } => inputs.push(*value),
            TerminatorNode::Throw { value, .. } => inputs.push(*value),
            _ => {}
        }
        inputs
    }
}

impl NodeKind {
    /// Data operands and effect dependency, in evaluation order
    pub fn inputs(&self) -> Vec<NodeId> {
        match self {
            NodeKind::Value(value) => value.op.inputs(),
            NodeKind::Action(action) => action.inputs(),
            NodeKind::Terminator(terminator) => terminator.inputs(),
        }
    }
}
