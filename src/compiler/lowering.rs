//! # Lowering
//!
//! Translates one scheduled method graph into a target [`Function`]. Every
//! value node lowers to at most one instruction (literals, parameters and
//! pointer literals to none), memoized by node id so a value shared by
//! several consumers is computed once.
//!
//! ## Protocol
//!
//! Lowering starts from the entry block's terminator. Visiting a terminator
//! first lowers the block's effect chain, then the terminator's operands,
//! then installs one control transfer. Branch targets seen for the first
//! time get a target block and are queued; the queue runs until every
//! discovered block is terminated.
//!
//! ## Instruction selection
//!
//! ```text
//! add sub mul        float | integer
//! div rem cmp        float | signed | unsigned
//! shr                signed (ashr) | unsigned (lshr)
//! convert            (float?, other side's signedness)
//! extend             float | signed | unsigned
//! truncate           float | integer
//! ```

use crate::compiler::graph::{
    ActionNode, ActionVisitor, BinaryOp, BlockId, CallTarget, CmpOp, ConversionOp, Graph,
    Literal, NodeId, NodeKind, PhiId, TerminatorNode, TerminatorVisitor, ValueNode, ValueOp,
    ValueVisitor,
};
use crate::compiler::llvm::{
    AtomicOrdering, BinaryOpcode, CastOpcode, Constant, FloatPredicate, Function,
    FunctionSignature, Instruction, IntPredicate, LlvmType, Operand, Phi, Terminator,
};
use crate::compiler::memory::{ReadAccessMode, WriteAccessMode};
use crate::compiler::pointer::{Pointer, PointerKind, RootPointer};
use crate::compiler::program::{ClassDefinition, MethodElement};
use crate::compiler::runtime::RuntimeHelper;
use crate::compiler::schedule::Schedule;
use crate::compiler::types::{CompoundTag, FunctionType, NumericKind, Type};
use crate::compiler::CompilationContext;
use crate::error::{Error, Result};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// Map a frontend type to its target type
///
/// Integers map by width alone. Float widths other than 4 and 8 are an
/// internal error.
pub fn map_type(ty: &Type) -> Result<LlvmType> {
    match ty {
        Type::Void => Ok(LlvmType::Void),
        Type::Boolean => Ok(LlvmType::I1),
        Type::Integer { size, .. } => LlvmType::int_of_bytes(*size as i64)
            .ok_or_else(|| Error::internal(format!("No integer type of width {}", size))),
        Type::Float { size: 4 } => Ok(LlvmType::Float),
        Type::Float { size: 8 } => Ok(LlvmType::Double),
        Type::Float { size } => Err(Error::internal(format!(
            "No floating point type of width {}",
            size
        ))),
        Type::Reference | Type::Pointer(_) | Type::Object(_) | Type::Function(_) => {
            Ok(LlvmType::Ptr)
        }
        Type::Array(array) => Ok(LlvmType::array(
            array.count.max(0) as u64,
            map_type(&array.element)?,
        )),
        Type::Compound(compound) => {
            if compound.tag == CompoundTag::Union {
                return Ok(LlvmType::array(compound.size.max(0) as u64, LlvmType::I8));
            }
            // Explicit offsets: packed, with byte padding where members leave gaps.
            let mut fields = Vec::with_capacity(compound.members.len());
            let mut cursor = 0;
            for member in &compound.members {
                if member.offset > cursor {
                    fields.push(LlvmType::array((member.offset - cursor) as u64, LlvmType::I8));
                }
                fields.push(map_type(&member.ty)?);
                cursor = member.offset + member.ty.size();
            }
            if compound.size > cursor {
                fields.push(LlvmType::array((compound.size - cursor) as u64, LlvmType::I8));
            }
            Ok(LlvmType::Struct {
                packed: true,
                fields,
            })
        }
    }
}

/// Map a frontend function type to a target signature
pub fn map_signature(ty: &FunctionType) -> Result<FunctionSignature> {
    let params = ty.params.iter().map(map_type).collect::<Result<Vec<_>>>()?;
    Ok(FunctionSignature::new(map_type(&ty.return_type)?, params))
}

/// Lower one method graph; the caller adds the result to the module
pub fn lower_method(ctx: &CompilationContext, graph: &Graph) -> Result<Function> {
    let method = graph.method().clone();
    debug!(
        target: "kiln::lowering",
        method = %method,
        nodes = graph.node_count(),
        "lowering method"
    );
    let visitor = LoweringVisitor::new(ctx, graph)?;
    let function = visitor.execute()?;
    debug!(
        target: "kiln::lowering",
        method = %method,
        blocks = function.blocks().len(),
        instructions = function.instruction_count(),
        "lowered method"
    );
    Ok(function)
}

/// Per-method lowering state
pub struct LoweringVisitor<'a, 'g> {
    ctx: &'a CompilationContext,
    graph: &'g Graph,
    schedule: Schedule<'g>,
    function: Function,
    element: String,
    blocks: HashMap<BlockId, usize>,
    pending: VecDeque<BlockId>,
    values: HashMap<NodeId, Operand>,
    effects: HashSet<NodeId>,
    types: HashMap<Type, LlvmType>,
}

impl<'a, 'g> LoweringVisitor<'a, 'g> {
    /// Schedule `graph` and prepare an empty target function
    pub fn new(ctx: &'a CompilationContext, graph: &'g Graph) -> Result<Self> {
        let method = graph.method();
        let signature = map_signature(&method.function_type())?;
        Ok(Self {
            ctx,
            graph,
            schedule: Schedule::new(graph)?,
            function: Function::new(method.symbol(), signature),
            element: method.to_string(),
            blocks: HashMap::new(),
            pending: VecDeque::new(),
            values: HashMap::new(),
            effects: HashSet::new(),
            types: HashMap::new(),
        })
    }

    /// Lower every block reachable from the entry
    pub fn execute(mut self) -> Result<Function> {
        let graph = self.graph;
        self.target_block(graph.entry_block());
        while let Some(block) = self.pending.pop_front() {
            let terminator = graph.terminator(block)?;
            match &graph.node(terminator).kind {
                NodeKind::Terminator(node) => node.accept(terminator, &mut self)?,
                other => {
                    return Err(Error::internal(format!(
                        "Block {} ends in a non-terminator {:?}",
                        block, other
                    )))
                }
            }
        }
        Ok(self.function)
    }

    fn target_block(&mut self, block: BlockId) -> usize {
        if let Some(&index) = self.blocks.get(&block) {
            return index;
        }
        let index = self.function.add_block(block.to_string());
        self.blocks.insert(block, index);
        self.pending.push_back(block);
        index
    }

    fn block_of(&mut self, node: NodeId) -> Result<usize> {
        let block = self.schedule.block_for_node(node)?;
        Ok(self.target_block(block))
    }

    fn emit(&mut self, node: NodeId, instruction: Instruction) -> Result<()> {
        let block = self.block_of(node)?;
        self.function.block_mut(block).push(instruction);
        Ok(())
    }

    fn terminate(&mut self, node: NodeId, terminator: Terminator) -> Result<()> {
        let block = self.block_of(node)?;
        if self.function.block_mut(block).set_terminator(terminator).is_some() {
            return Err(Error::internal(format!(
                "Block {} terminated twice",
                self.function.block(block).label()
            )));
        }
        Ok(())
    }

    fn llvm_type(&mut self, ty: &Type) -> Result<LlvmType> {
        if let Some(mapped) = self.types.get(ty) {
            return Ok(mapped.clone());
        }
        let mapped = map_type(ty)?;
        self.types.insert(ty.clone(), mapped.clone());
        Ok(mapped)
    }

    fn operand_type(&mut self, node: NodeId) -> Result<(Type, LlvmType)> {
        let ty = self.graph.value_type(node)?.clone();
        let mapped = self.llvm_type(&ty)?;
        Ok((ty, mapped))
    }

    fn numeric_kind(&self, node: NodeId) -> Result<NumericKind> {
        let ty = self.graph.value_type(node)?;
        ty.numeric_kind()
            .ok_or_else(|| Error::internal(format!("Operand {} of type {} is not numeric", node, ty)))
    }

    /// Lower a value node, reusing an earlier result
    pub fn lower_value(&mut self, node: NodeId) -> Result<Operand> {
        if let Some(operand) = self.values.get(&node) {
            return Ok(operand.clone());
        }
        self.lower_pure_operands(node)?;
        self.lower_node(node)
    }

    /// Lower the pure operands of `root` bottom-up with an explicit stack,
    /// so that the visitor of `root` only finds memoized operands and long
    /// expression chains do not grow the call stack. Phis, loads, calls and
    /// catches are leaves of the walk: their own visitors lower their inputs
    /// in the order they need.
    fn lower_pure_operands(&mut self, root: NodeId) -> Result<()> {
        let graph = self.graph;
        let mut stack = vec![(root, false)];
        while let Some((node, expanded)) = stack.pop() {
            if self.values.contains_key(&node) {
                continue;
            }
            let NodeKind::Value(value) = &graph.node(node).kind else {
                continue;
            };
            if !value.op.is_pure() {
                if node != root {
                    self.lower_value(node)?;
                }
                continue;
            }
            if expanded {
                if node != root {
                    self.lower_node(node)?;
                }
                continue;
            }
            stack.push((node, true));
            stack.extend(value.op.inputs().into_iter().rev().map(|input| (input, false)));
        }
        Ok(())
    }

    fn lower_node(&mut self, node: NodeId) -> Result<Operand> {
        if let Some(operand) = self.values.get(&node) {
            return Ok(operand.clone());
        }
        let graph = self.graph;
        let operand = match &graph.node(node).kind {
            NodeKind::Value(value) => value.accept(node, self)?,
            other => {
                return Err(Error::internal(format!(
                    "Node {} used as a value: {:?}",
                    node, other
                )))
            }
        };
        self.values.insert(node, operand.clone());
        Ok(operand)
    }

    /// Lower the effect chain ending at `last`, oldest first
    fn lower_effects(&mut self, last: NodeId) -> Result<()> {
        let graph = self.graph;
        let mut chain = Vec::new();
        let mut cursor = last;
        loop {
            if self.effects.contains(&cursor) || self.values.contains_key(&cursor) {
                break;
            }
            match &graph.node(cursor).kind {
                NodeKind::Action(ActionNode::BlockEntry(_)) => {
                    self.effects.insert(cursor);
                    break;
                }
                NodeKind::Action(
                    ActionNode::Store { dependency, .. }
                    | ActionNode::MonitorEnter { dependency, .. }
                    | ActionNode::MonitorExit { dependency, .. },
                ) => {
                    chain.push(cursor);
                    cursor = *dependency;
                }
                NodeKind::Value(ValueNode {
                    op: ValueOp::Load { dependency, .. } | ValueOp::Call { dependency, .. },
                    ..
                }) => {
                    chain.push(cursor);
                    cursor = *dependency;
                }
                other => {
                    return Err(Error::internal(format!(
                        "Node {} on an effect chain is not an effect: {:?}",
                        cursor, other
                    )))
                }
            }
        }

        for node in chain.into_iter().rev() {
            match &graph.node(node).kind {
                NodeKind::Action(action) => {
                    action.accept(node, self)?;
                    self.effects.insert(node);
                }
                _ => {
                    self.lower_value(node)?;
                }
            }
        }
        Ok(())
    }

    fn report(&self, node: NodeId, message: String) {
        let info = &self.graph.node(node).info;
        self.ctx
            .diagnostics()
            .report(&self.element, Some(info), message);
    }

    fn binary_opcode(&self, op: BinaryOp, kind: NumericKind) -> Result<BinaryOpcode> {
        use NumericKind::{Float, Signed, Unsigned};
        let opcode = match (op, kind) {
            (BinaryOp::Add, Float) => BinaryOpcode::FAdd,
            (BinaryOp::Add, _) => BinaryOpcode::Add,
            (BinaryOp::Sub, Float) => BinaryOpcode::FSub,
            (BinaryOp::Sub, _) => BinaryOpcode::Sub,
            (BinaryOp::Mul, Float) => BinaryOpcode::FMul,
            (BinaryOp::Mul, _) => BinaryOpcode::Mul,
            (BinaryOp::Div, Float) => BinaryOpcode::FDiv,
            (BinaryOp::Div, Signed) => BinaryOpcode::SDiv,
            (BinaryOp::Div, Unsigned) => BinaryOpcode::UDiv,
            (BinaryOp::Rem, Float) => BinaryOpcode::FRem,
            (BinaryOp::Rem, Signed) => BinaryOpcode::SRem,
            (BinaryOp::Rem, Unsigned) => BinaryOpcode::URem,
            (BinaryOp::Shr, Signed) => BinaryOpcode::AShr,
            (BinaryOp::Shr, Unsigned) => BinaryOpcode::LShr,
            (BinaryOp::And, Signed | Unsigned) => BinaryOpcode::And,
            (BinaryOp::Or, Signed | Unsigned) => BinaryOpcode::Or,
            (BinaryOp::Xor, Signed | Unsigned) => BinaryOpcode::Xor,
            (BinaryOp::Shl, Signed | Unsigned) => BinaryOpcode::Shl,
            (op, Float) => {
                return Err(Error::internal(format!(
                    "Bitwise {:?} on floating point operands",
                    op
                )))
            }
        };
        Ok(opcode)
    }

    fn call_helper(
        &mut self,
        node: NodeId,
        helper: RuntimeHelper,
        args: Vec<(LlvmType, Operand)>,
    ) -> Result<Option<Operand>> {
        let callee = helper.declare(self.ctx.module());
        let ret = helper.signature().ret;
        let result = if ret == LlvmType::Void {
            None
        } else {
            Some(self.function.fresh_local())
        };
        self.emit(
            node,
            Instruction::Call {
                result,
                ret,
                callee,
                args,
            },
        )?;
        Ok(result.map(Operand::Local))
    }

    fn root_of(pointer: &Pointer) -> Pointer {
        let mut current = pointer.clone();
        loop {
            let base = match current.kind() {
                PointerKind::Root(_) => return current,
                PointerKind::Element { base, .. }
                | PointerKind::Member { base, .. }
                | PointerKind::InstanceField { base, .. }
                | PointerKind::Offset { base, .. } => base.clone(),
            };
            current = base;
        }
    }
}

impl<'a, 'g> ValueVisitor for LoweringVisitor<'a, 'g> {
    type Output = Result<Operand>;

    fn visit_unknown_value(&mut self, id: NodeId, node: &ValueNode) -> Result<Operand> {
        self.report(id, format!("Unsupported value node {:?} of type {}", node.op, node.ty));
        Ok(Operand::Const(Constant::Bool(false)))
    }

    fn visit_literal(&mut self, _id: NodeId, node: &ValueNode, literal: &Literal) -> Result<Operand> {
        let constant = match literal {
            Literal::Bool(value) => Constant::Bool(*value),
            Literal::Int(value) => Constant::Int(*value),
            Literal::Float(bits) => {
                let value = f64::from_bits(*bits);
                match node.ty {
                    // Single precision literals must be exactly representable
                    Type::Float { size: 4 } => Constant::Float(value as f32 as f64),
                    _ => Constant::Float(value),
                }
            }
            Literal::Null => Constant::Null,
        };
        Ok(Operand::Const(constant))
    }

    fn visit_parameter(&mut self, _id: NodeId, _node: &ValueNode, index: u32) -> Result<Operand> {
        self.function
            .params()
            .get(index as usize)
            .map(|local| Operand::Local(*local))
            .ok_or_else(|| {
                Error::internal(format!(
                    "Parameter {} out of range for {}",
                    index,
                    self.function.name()
                ))
            })
    }

    fn visit_binary(
        &mut self,
        id: NodeId,
        _node: &ValueNode,
        op: BinaryOp,
        lhs: NodeId,
        rhs: NodeId,
    ) -> Result<Operand> {
        let kind = self.numeric_kind(lhs)?;
        let opcode = self.binary_opcode(op, kind)?;
        let (_, ty) = self.operand_type(lhs)?;
        let lhs = self.lower_value(lhs)?;
        let rhs = self.lower_value(rhs)?;
        let result = self.function.fresh_local();
        self.emit(
            id,
            Instruction::Binary {
                result,
                op: opcode,
                ty,
                lhs,
                rhs,
            },
        )?;
        Ok(Operand::Local(result))
    }

    fn visit_neg(&mut self, id: NodeId, _node: &ValueNode, input: NodeId) -> Result<Operand> {
        let kind = self.numeric_kind(input)?;
        let (_, ty) = self.operand_type(input)?;
        let value = self.lower_value(input)?;
        let result = self.function.fresh_local();
        let instruction = match kind {
            NumericKind::Float => Instruction::FNeg { result, ty, value },
            NumericKind::Signed | NumericKind::Unsigned => Instruction::Binary {
                result,
                op: BinaryOpcode::Sub,
                ty,
                lhs: Operand::int(0),
                rhs: value,
            },
        };
        self.emit(id, instruction)?;
        Ok(Operand::Local(result))
    }

    fn visit_cmp(
        &mut self,
        id: NodeId,
        _node: &ValueNode,
        op: CmpOp,
        lhs: NodeId,
        rhs: NodeId,
    ) -> Result<Operand> {
        let kind = self.numeric_kind(lhs)?;
        let (_, ty) = self.operand_type(lhs)?;
        let lhs = self.lower_value(lhs)?;
        let rhs = self.lower_value(rhs)?;
        let result = self.function.fresh_local();
        let instruction = match kind {
            NumericKind::Float => {
                let predicate = match op {
                    CmpOp::Eq => FloatPredicate::Oeq,
                    CmpOp::Ne => FloatPredicate::One,
                    CmpOp::Lt => FloatPredicate::Olt,
                    CmpOp::Le => FloatPredicate::Ole,
                    CmpOp::Gt => FloatPredicate::Ogt,
                    CmpOp::Ge => FloatPredicate::Oge,
                };
                Instruction::FCmp {
                    result,
                    predicate,
                    ty,
                    lhs,
                    rhs,
                }
            }
            NumericKind::Signed => {
                let predicate = match op {
                    CmpOp::Eq => IntPredicate::Eq,
                    CmpOp::Ne => IntPredicate::Ne,
                    CmpOp::Lt => IntPredicate::Slt,
                    CmpOp::Le => IntPredicate::Sle,
                    CmpOp::Gt => IntPredicate::Sgt,
                    CmpOp::Ge => IntPredicate::Sge,
                };
                Instruction::ICmp {
                    result,
                    predicate,
                    ty,
                    lhs,
                    rhs,
                }
            }
            NumericKind::Unsigned => {
                let predicate = match op {
                    CmpOp::Eq => IntPredicate::Eq,
                    CmpOp::Ne => IntPredicate::Ne,
                    CmpOp::Lt => IntPredicate::Ult,
                    CmpOp::Le => IntPredicate::Ule,
                    CmpOp::Gt => IntPredicate::Ugt,
                    CmpOp::Ge => IntPredicate::Uge,
                };
                Instruction::ICmp {
                    result,
                    predicate,
                    ty,
                    lhs,
                    rhs,
                }
            }
        };
        self.emit(id, instruction)?;
        Ok(Operand::Local(result))
    }

    fn visit_conversion(
        &mut self,
        id: NodeId,
        node: &ValueNode,
        op: ConversionOp,
        input: NodeId,
    ) -> Result<Operand> {
        let (from_ty, from) = self.operand_type(input)?;
        let to = self.llvm_type(&node.ty)?;
        let opcode = match op {
            ConversionOp::Convert => {
                let source = self.numeric_kind(input)?;
                let target = node.ty.numeric_kind().ok_or_else(|| {
                    Error::internal(format!("Conversion to non-numeric type {}", node.ty))
                })?;
                match (source, target) {
                    (NumericKind::Float, NumericKind::Signed) => CastOpcode::FpToSi,
                    (NumericKind::Float, NumericKind::Unsigned) => CastOpcode::FpToUi,
                    (NumericKind::Signed, NumericKind::Float) => CastOpcode::SiToFp,
                    (NumericKind::Unsigned, NumericKind::Float) => CastOpcode::UiToFp,
                    _ => {
                        return Err(Error::internal(format!(
                            "Numeric conversion from {} to {} does not cross the integer/float boundary",
                            from_ty, node.ty
                        )))
                    }
                }
            }
            ConversionOp::Extend => match self.numeric_kind(input)? {
                NumericKind::Float => CastOpcode::FpExt,
                NumericKind::Signed => CastOpcode::SExt,
                NumericKind::Unsigned => CastOpcode::ZExt,
            },
            ConversionOp::Truncate => {
                if from_ty.is_float() {
                    CastOpcode::FpTrunc
                } else {
                    CastOpcode::Trunc
                }
            }
            ConversionOp::Bitcast => CastOpcode::Bitcast,
        };
        let value = self.lower_value(input)?;
        let result = self.function.fresh_local();
        self.emit(
            id,
            Instruction::Cast {
                result,
                op: opcode,
                from,
                value,
                to,
            },
        )?;
        Ok(Operand::Local(result))
    }

    fn visit_select(
        &mut self,
        id: NodeId,
        node: &ValueNode,
        cond: NodeId,
        if_true: NodeId,
        if_false: NodeId,
    ) -> Result<Operand> {
        let ty = self.llvm_type(&node.ty)?;
        let cond = self.lower_value(cond)?;
        let if_true = self.lower_value(if_true)?;
        let if_false = self.lower_value(if_false)?;
        let result = self.function.fresh_local();
        self.emit(
            id,
            Instruction::Select {
                result,
                cond,
                ty,
                if_true,
                if_false,
            },
        )?;
        Ok(Operand::Local(result))
    }

    fn visit_phi(&mut self, id: NodeId, node: &ValueNode, phi: PhiId) -> Result<Operand> {
        let graph = self.graph;
        let ty = self.llvm_type(&node.ty)?;
        let block = self.block_of(id)?;
        let result = self.function.fresh_local();
        let index = self.function.block_mut(block).push_phi(Phi {
            result,
            ty,
            incoming: Vec::new(),
        });
        // Registered before the inputs so a back edge finds the phi itself.
        self.values.insert(id, Operand::Local(result));

        let incoming = &graph.phi(phi).incoming;
        let predecessors: Vec<BlockId> = self.schedule.reachable_blocks().iter().copied().collect();
        for predecessor in predecessors {
            let Some(&value) = incoming.get(&predecessor) else {
                continue;
            };
            let operand = self.lower_value(value)?;
            let label = {
                let target = self.target_block(predecessor);
                self.function.block(target).label().to_string()
            };
            self.function
                .block_mut(block)
                .phi_mut(index)
                .ok_or_else(|| Error::internal(format!("Phi {} vanished", id)))?
                .incoming
                .push((operand, label));
        }
        Ok(Operand::Local(result))
    }

    fn visit_pointer_literal(
        &mut self,
        id: NodeId,
        _node: &ValueNode,
        pointer: &Pointer,
    ) -> Result<Operand> {
        let root = Self::root_of(pointer);
        let symbol = match pointer.root() {
            RootPointer::Global { symbol } => {
                self.ctx.module().declare_data(symbol, LlvmType::I8);
                symbol.clone()
            }
            RootPointer::MethodAddress { symbol } => {
                if let Type::Function(signature) = root.pointee() {
                    let signature = map_signature(signature)?;
                    self.ctx.module().declare_function(symbol, signature);
                }
                symbol.clone()
            }
            RootPointer::Memory { id: region } => {
                self.report(
                    id,
                    format!("Pointer into build-time memory region {} has no symbol", region),
                );
                return Ok(Operand::Const(Constant::Null));
            }
        };
        Ok(Operand::Const(Constant::SymbolOffset {
            symbol,
            offset: pointer.root_byte_offset(),
        }))
    }

    fn visit_load(
        &mut self,
        id: NodeId,
        node: &ValueNode,
        pointer: NodeId,
        mode: ReadAccessMode,
        dependency: NodeId,
    ) -> Result<Operand> {
        self.lower_effects(dependency)?;
        let ty = self.llvm_type(&node.ty)?;
        let pointer = self.lower_value(pointer)?;
        let (ordering, volatile) = match mode {
            ReadAccessMode::Plain => (None, false),
            ReadAccessMode::Opaque => (Some(AtomicOrdering::Monotonic), false),
            ReadAccessMode::Acquire => (Some(AtomicOrdering::Acquire), false),
            ReadAccessMode::Volatile => (Some(AtomicOrdering::SeqCst), true),
        };
        let result = self.function.fresh_local();
        self.emit(
            id,
            Instruction::Load {
                result,
                ty,
                pointer,
                ordering,
                volatile,
            },
        )?;
        Ok(Operand::Local(result))
    }

    fn visit_call(
        &mut self,
        id: NodeId,
        node: &ValueNode,
        target: &CallTarget,
        args: &[NodeId],
        dependency: NodeId,
    ) -> Result<Operand> {
        self.lower_effects(dependency)?;
        let callee = match target {
            CallTarget::Direct(method) => {
                let signature = map_signature(&method.function_type())?;
                self.ctx
                    .module()
                    .declare_function(&method.symbol(), signature)
            }
            CallTarget::Indirect { pointer, .. } => self.lower_value(*pointer)?,
        };
        let mut lowered = Vec::with_capacity(args.len());
        for &arg in args {
            let (_, ty) = self.operand_type(arg)?;
            lowered.push((ty, self.lower_value(arg)?));
        }
        let ret = self.llvm_type(&node.ty)?;
        let result = if ret == LlvmType::Void {
            None
        } else {
            Some(self.function.fresh_local())
        };
        self.emit(
            id,
            Instruction::Call {
                result,
                ret,
                callee,
                args: lowered,
            },
        )?;
        Ok(result
            .map(Operand::Local)
            .unwrap_or(Operand::Const(Constant::Undef)))
    }

    fn visit_virtual_lookup(
        &mut self,
        id: NodeId,
        _node: &ValueNode,
        receiver: NodeId,
        method: &Arc<MethodElement>,
        owner: &Arc<ClassDefinition>,
    ) -> Result<Operand> {
        let info = self.graph.node(id).info.clone();
        let index = self.ctx.dispatch().get_vtable_index(
            self.ctx.diagnostics(),
            Some(&info),
            method,
            owner,
        )?;
        let receiver = self.lower_value(receiver)?;
        let result = self.call_helper(
            id,
            RuntimeHelper::LookupVirtual,
            vec![
                (LlvmType::Ptr, receiver),
                (LlvmType::I32, Operand::int(index as i64)),
            ],
        )?;
        result.ok_or_else(|| Error::internal("Virtual lookup helper returns void"))
    }

    fn visit_interface_lookup(
        &mut self,
        id: NodeId,
        _node: &ValueNode,
        receiver: NodeId,
        method: &Arc<MethodElement>,
        interface: &Arc<ClassDefinition>,
    ) -> Result<Operand> {
        let info = self.graph.node(id).info.clone();
        let index = self.ctx.dispatch().get_itable_index(
            self.ctx.diagnostics(),
            Some(&info),
            method,
            interface,
        )?;
        let receiver = self.lower_value(receiver)?;
        let result = self.call_helper(
            id,
            RuntimeHelper::LookupInterface,
            vec![
                (LlvmType::Ptr, receiver),
                (LlvmType::I32, Operand::int(interface.type_id() as i64)),
                (LlvmType::I32, Operand::int(index as i64)),
            ],
        )?;
        result.ok_or_else(|| Error::internal("Interface lookup helper returns void"))
    }
}

impl<'a, 'g> ActionVisitor for LoweringVisitor<'a, 'g> {
    type Output = Result<()>;

    fn visit_unknown_action(&mut self, id: NodeId, node: &ActionNode) -> Result<()> {
        self.report(id, format!("Unsupported action node {:?}", node));
        Ok(())
    }

    fn visit_block_entry(&mut self, _id: NodeId, _block: BlockId) -> Result<()> {
        Ok(())
    }

    fn visit_store(
        &mut self,
        id: NodeId,
        _node: &ActionNode,
        pointer: NodeId,
        value: NodeId,
        mode: WriteAccessMode,
        dependency: NodeId,
    ) -> Result<()> {
        self.lower_effects(dependency)?;
        let (_, ty) = self.operand_type(value)?;
        let pointer = self.lower_value(pointer)?;
        let value = self.lower_value(value)?;
        let (ordering, volatile) = match mode {
            WriteAccessMode::Plain => (None, false),
            WriteAccessMode::Opaque => (Some(AtomicOrdering::Monotonic), false),
            WriteAccessMode::Release => (Some(AtomicOrdering::Release), false),
            WriteAccessMode::Volatile => (Some(AtomicOrdering::SeqCst), true),
        };
        self.emit(
            id,
            Instruction::Store {
                ty,
                value,
                pointer,
                ordering,
                volatile,
            },
        )
    }

    fn visit_monitor_enter(
        &mut self,
        id: NodeId,
        _node: &ActionNode,
        object: NodeId,
        dependency: NodeId,
    ) -> Result<()> {
        self.lower_effects(dependency)?;
        let object = self.lower_value(object)?;
        self.call_helper(id, RuntimeHelper::MonitorEnter, vec![(LlvmType::Ptr, object)])?;
        Ok(())
    }

    fn visit_monitor_exit(
        &mut self,
        id: NodeId,
        _node: &ActionNode,
        object: NodeId,
        dependency: NodeId,
    ) -> Result<()> {
        self.lower_effects(dependency)?;
        let object = self.lower_value(object)?;
        self.call_helper(id, RuntimeHelper::MonitorExit, vec![(LlvmType::Ptr, object)])?;
        Ok(())
    }
}

impl<'a, 'g> TerminatorVisitor for LoweringVisitor<'a, 'g> {
    type Output = Result<()>;

    fn visit_unknown_terminator(&mut self, id: NodeId, node: &TerminatorNode) -> Result<()> {
        self.report(id, format!("Unsupported terminator {:?}", node));
        self.terminate(id, Terminator::Unreachable)
    }

    fn visit_goto(&mut self, id: NodeId, node: &TerminatorNode, target: BlockId) -> Result<()> {
        self.lower_effects(node.dependency())?;
        let target = self.target_block(target);
        let label = self.function.block(target).label().to_string();
        self.terminate(id, Terminator::Br(label))
    }

    fn visit_if(
        &mut self,
        id: NodeId,
        node: &TerminatorNode,
        cond: NodeId,
        if_true: BlockId,
        if_false: BlockId,
    ) -> Result<()> {
        self.lower_effects(node.dependency())?;
        let cond = self.lower_value(cond)?;
        let if_true = self.target_block(if_true);
        let if_false = self.target_block(if_false);
        let terminator = Terminator::CondBr {
            cond,
            if_true: self.function.block(if_true).label().to_string(),
            if_false: self.function.block(if_false).label().to_string(),
        };
        self.terminate(id, terminator)
    }

    fn visit_return(
        &mut self,
        id: NodeId,
        node: &TerminatorNode,
        value: Option<NodeId>,
    ) -> Result<()> {
        self.lower_effects(node.dependency())?;
        let returned = match value {
            Some(value) => {
                let (_, ty) = self.operand_type(value)?;
                Some((ty, self.lower_value(value)?))
            }
            None => None,
        };
        self.terminate(id, Terminator::Ret(returned))
    }

    fn visit_unreachable(&mut self, id: NodeId, node: &TerminatorNode) -> Result<()> {
        self.lower_effects(node.dependency())?;
        self.terminate(id, Terminator::Unreachable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::types::{CompoundType, Member};

    #[test]
    fn test_integer_types_map_by_width() {
        assert_eq!(map_type(&Type::signed(4)).unwrap(), LlvmType::I32);
        assert_eq!(map_type(&Type::unsigned(4)).unwrap(), LlvmType::I32);
        assert_eq!(map_type(&Type::unsigned(1)).unwrap(), LlvmType::I8);
        assert_eq!(map_type(&Type::Boolean).unwrap(), LlvmType::I1);
    }

    #[test]
    fn test_float_width_must_be_4_or_8() {
        assert_eq!(map_type(&Type::float(8)).unwrap(), LlvmType::Double);
        assert!(matches!(
            map_type(&Type::float(2)),
            Err(Error::Internal(_))
        ));
    }

    #[test]
    fn test_compound_padding() {
        let compound = CompoundType::new(
            CompoundTag::Struct,
            "s",
            16,
            8,
            vec![
                Member {
                    name: "a".to_string(),
                    offset: 0,
                    ty: Type::signed(4),
                    align: 4,
                },
                Member {
                    name: "b".to_string(),
                    offset: 8,
                    ty: Type::signed(8),
                    align: 8,
                },
            ],
        );
        let mapped = map_type(&Type::Compound(Arc::new(compound))).unwrap();
        assert_eq!(mapped.to_string(), "<{ i32, [4 x i8], i64 }>");
    }
}
