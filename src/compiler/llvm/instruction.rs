//! Target instructions

use super::{LlvmType, LocalId, Operand};
use std::fmt;

/// Arithmetic and bitwise opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOpcode {
    /// `add`
    Add,
    /// `fadd`
    FAdd,
    /// `sub`
    Sub,
    /// `fsub`
    FSub,
    /// `mul`
    Mul,
    /// `fmul`
    FMul,
    /// `sdiv`
    SDiv,
    /// `udiv`
    UDiv,
    /// `fdiv`
    FDiv,
    /// `srem`
    SRem,
    /// `urem`
    URem,
    /// `frem`
    FRem,
    /// `and`
    And,
    /// `or`
    Or,
    /// `xor`
    Xor,
    /// `shl`
    Shl,
    /// `ashr`
    AShr,
    /// `lshr`
    LShr,
}

impl BinaryOpcode {
    /// Assembly mnemonic
    pub fn mnemonic(self) -> &'static str {
        match self {
            BinaryOpcode::Add => "add",
            BinaryOpcode::FAdd => "fadd",
            BinaryOpcode::Sub => "sub",
            BinaryOpcode::FSub => "fsub",
            BinaryOpcode::Mul => "mul",
            BinaryOpcode::FMul => "fmul",
            BinaryOpcode::SDiv => "sdiv",
            BinaryOpcode::UDiv => "udiv",
            BinaryOpcode::FDiv => "fdiv",
            BinaryOpcode::SRem => "srem",
            BinaryOpcode::URem => "urem",
            BinaryOpcode::FRem => "frem",
            BinaryOpcode::And => "and",
            BinaryOpcode::Or => "or",
            BinaryOpcode::Xor => "xor",
            BinaryOpcode::Shl => "shl",
            BinaryOpcode::AShr => "ashr",
            BinaryOpcode::LShr => "lshr",
        }
    }
}

/// `icmp` predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntPredicate {
    /// `eq`
    Eq,
    /// `ne`
    Ne,
    /// `slt`
    Slt,
    /// `sle`
    Sle,
    /// `sgt`
    Sgt,
    /// `sge`
    Sge,
    /// `ult`
    Ult,
    /// `ule`
    Ule,
    /// `ugt`
    Ugt,
    /// `uge`
    Uge,
}

impl fmt::Display for IntPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            IntPredicate::Eq => "eq",
            IntPredicate::Ne => "ne",
            IntPredicate::Slt => "slt",
            IntPredicate::Sle => "sle",
            IntPredicate::Sgt => "sgt",
            IntPredicate::Sge => "sge",
            IntPredicate::Ult => "ult",
            IntPredicate::Ule => "ule",
            IntPredicate::Ugt => "ugt",
            IntPredicate::Uge => "uge",
        };
        write!(f, "{}", text)
    }
}

/// Ordered `fcmp` predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatPredicate {
    /// `oeq`
    Oeq,
    /// `one`
    One,
    /// `olt`
    Olt,
    /// `ole`
    Ole,
    /// `ogt`
    Ogt,
    /// `oge`
    Oge,
}

impl fmt::Display for FloatPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FloatPredicate::Oeq => "oeq",
            FloatPredicate::One => "one",
            FloatPredicate::Olt => "olt",
            FloatPredicate::Ole => "ole",
            FloatPredicate::Ogt => "ogt",
            FloatPredicate::Oge => "oge",
        };
        write!(f, "{}", text)
    }
}

/// Conversion opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CastOpcode {
    /// `fptosi`
    FpToSi,
    /// `fptoui`
    FpToUi,
    /// `sitofp`
    SiToFp,
    /// `uitofp`
    UiToFp,
    /// `fpext`
    FpExt,
    /// `sext`
    SExt,
    /// `zext`
    ZExt,
    /// `fptrunc`
    FpTrunc,
    /// `trunc`
    Trunc,
    /// `bitcast`
    Bitcast,
}

impl fmt::Display for CastOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CastOpcode::FpToSi => "fptosi",
            CastOpcode::FpToUi => "fptoui",
            CastOpcode::SiToFp => "sitofp",
            CastOpcode::UiToFp => "uitofp",
            CastOpcode::FpExt => "fpext",
            CastOpcode::SExt => "sext",
            CastOpcode::ZExt => "zext",
            CastOpcode::FpTrunc => "fptrunc",
            CastOpcode::Trunc => "trunc",
            CastOpcode::Bitcast => "bitcast",
        };
        write!(f, "{}", text)
    }
}

/// Atomic ordering of a load or store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomicOrdering {
    /// `monotonic`
    Monotonic,
    /// `acquire`
    Acquire,
    /// `release`
    Release,
    /// `seq_cst`
    SeqCst,
}

impl fmt::Display for AtomicOrdering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            AtomicOrdering::Monotonic => "monotonic",
            AtomicOrdering::Acquire => "acquire",
            AtomicOrdering::Release => "release",
            AtomicOrdering::SeqCst => "seq_cst",
        };
        write!(f, "{}", text)
    }
}

/// A body instruction
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// Two-operand arithmetic
    Binary {
        /// Result
        result: LocalId,
        /// Opcode
        op: BinaryOpcode,
        /// Operand type
        ty: LlvmType,
        /// Left operand
        lhs: Operand,
        /// Right operand
        rhs: Operand,
    },
    /// Floating point negation
    FNeg {
        /// Result
        result: LocalId,
        /// Operand type
        ty: LlvmType,
        /// Operand
        value: Operand,
    },
    /// Integer comparison
    ICmp {
        /// Result
        result: LocalId,
        /// Predicate
        predicate: IntPredicate,
        /// Operand type
        ty: LlvmType,
        /// Left operand
        lhs: Operand,
        /// Right operand
        rhs: Operand,
    },
    /// Floating point comparison
    FCmp {
        /// Result
        result: LocalId,
        /// Predicate
        predicate: FloatPredicate,
        /// Operand type
        ty: LlvmType,
        /// Left operand
        lhs: Operand,
        /// Right operand
        rhs: Operand,
    },
    /// Conversion
    Cast {
        /// Result
        result: LocalId,
        /// Opcode
        op: CastOpcode,
        /// Source type
        from: LlvmType,
        /// Converted value
        value: Operand,
        /// Destination type
        to: LlvmType,
    },
    /// `select`
    Select {
        /// Result
        result: LocalId,
        /// Condition
        cond: Operand,
        /// Value type
        ty: LlvmType,
        /// Value when true
        if_true: Operand,
        /// Value when false
        if_false: Operand,
    },
    /// Memory read
    Load {
        /// Result
        result: LocalId,
        /// Loaded type
        ty: LlvmType,
        /// Address
        pointer: Operand,
        /// Atomic ordering, `None` for a plain load
        ordering: Option<AtomicOrdering>,
        /// `volatile`
        volatile: bool,
    },
    /// Memory write
    Store {
        /// Stored type
        ty: LlvmType,
        /// Stored value
        value: Operand,
        /// Address
        pointer: Operand,
        /// Atomic ordering, `None` for a plain store
        ordering: Option<AtomicOrdering>,
        /// `volatile`
        volatile: bool,
    },
    /// Function call
    Call {
        /// Result, `None` for void calls
        result: Option<LocalId>,
        /// Return type
        ret: LlvmType,
        /// Callee
        callee: Operand,
        /// Typed arguments
        args: Vec<(LlvmType, Operand)>,
    },
}

impl Instruction {
    /// SSA value defined by this instruction
    pub fn result(&self) -> Option<LocalId> {
        match self {
            Instruction::Binary { result, .. }
            | Instruction::FNeg { result, .. }
            | Instruction::ICmp { result, .. }
            | Instruction::FCmp { result, .. }
            | Instruction::Cast { result, .. }
            | Instruction::Select { result, .. }
            | Instruction::Load { result, .. } => Some(*result),
            Instruction::Call { result, .. } => *result,
            Instruction::Store { .. } => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Binary {
                result,
                op,
                ty,
                lhs,
                rhs,
            } => write!(f, "{} = {} {} {}, {}", result, op.mnemonic(), ty, lhs, rhs),
            Instruction::FNeg { result, ty, value } => {
                write!(f, "{} = fneg {} {}", result, ty, value)
            }
            Instruction::ICmp {
                result,
                predicate,
                ty,
                lhs,
                rhs,
            } => write!(f, "{} = icmp {} {} {}, {}", result, predicate, ty, lhs, rhs),
            Instruction::FCmp {
                result,
                predicate,
                ty,
                lhs,
                rhs,
            } => write!(f, "{} = fcmp {} {} {}, {}", result, predicate, ty, lhs, rhs),
            Instruction::Cast {
                result,
                op,
                from,
                value,
                to,
            } => write!(f, "{} = {} {} {} to {}", result, op, from, value, to),
            Instruction::Select {
                result,
                cond,
                ty,
                if_true,
                if_false,
            } => write!(
                f,
                "{} = select i1 {}, {} {}, {} {}",
                result, cond, ty, if_true, ty, if_false
            ),
            Instruction::Load {
                result,
                ty,
                pointer,
                ordering,
                volatile,
            } => {
                let volatile = if *volatile { " volatile" } else { "" };
                match ordering {
                    Some(ordering) => write!(
                        f,
                        "{} = load atomic{} {}, ptr {} {}, align {}",
                        result,
                        volatile,
                        ty,
                        pointer,
                        ordering,
                        ty.align()
                    ),
                    None => write!(
                        f,
                        "{} = load{} {}, ptr {}, align {}",
                        result,
                        volatile,
                        ty,
                        pointer,
                        ty.align()
                    ),
                }
            }
            Instruction::Store {
                ty,
                value,
                pointer,
                ordering,
                volatile,
            } => {
                let volatile = if *volatile { " volatile" } else { "" };
                match ordering {
                    Some(ordering) => write!(
                        f,
                        "store atomic{} {} {}, ptr {} {}, align {}",
                        volatile,
                        ty,
                        value,
                        pointer,
                        ordering,
                        ty.align()
                    ),
                    None => write!(
                        f,
                        "store{} {} {}, ptr {}, align {}",
                        volatile,
                        ty,
                        value,
                        pointer,
                        ty.align()
                    ),
                }
            }
            Instruction::Call {
                result,
                ret,
                callee,
                args,
            } => {
                if let Some(result) = result {
                    write!(f, "{} = ", result)?;
                }
                write!(f, "call {} {}(", ret, callee)?;
                for (i, (ty, arg)) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} {}", ty, arg)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// A phi at the top of a block
#[derive(Debug, Clone, PartialEq)]
pub struct Phi {
    /// Result
    pub result: LocalId,
    /// Value type
    pub ty: LlvmType,
    /// `(value, predecessor label)` pairs
    pub incoming: Vec<(Operand, String)>,
}

impl fmt::Display for Phi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = phi {} ", self.result, self.ty)?;
        for (i, (value, label)) in self.incoming.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "[ {}, %{} ]", value, label)?;
        }
        Ok(())
    }
}

/// A block terminator
#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    /// `br label %target`
    Br(String),
    /// `br i1 %cond, label %t, label %f`
    CondBr {
        /// Condition
        cond: Operand,
        /// Label when true
        if_true: String,
        /// Label when false
        if_false: String,
    },
    /// `ret`, with a typed value unless void
    Ret(Option<(LlvmType, Operand)>),
    /// `unreachable`
    Unreachable,
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminator::Br(target) => write!(f, "br label %{}", target),
            Terminator::CondBr {
                cond,
                if_true,
                if_false,
            } => write!(f, "br i1 {}, label %{}, label %{}", cond, if_true, if_false),
            Terminator::Ret(Some((ty, value))) => write!(f, "ret {} {}", ty, value),
            Terminator::Ret(None) => write!(f, "ret void"),
            Terminator::Unreachable => write!(f, "unreachable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_load_rendering() {
        let load = Instruction::Load {
            result: LocalId(3),
            ty: LlvmType::I32,
            pointer: Operand::Local(LocalId(1)),
            ordering: Some(AtomicOrdering::Acquire),
            volatile: false,
        };
        assert_eq!(load.to_string(), "%v3 = load atomic i32, ptr %v1 acquire, align 4");
    }

    #[test]
    fn test_phi_rendering() {
        let phi = Phi {
            result: LocalId(4),
            ty: LlvmType::I64,
            incoming: vec![
                (Operand::int(1), "b1".to_string()),
                (Operand::Local(LocalId(2)), "b2".to_string()),
            ],
        };
        assert_eq!(phi.to_string(), "%v4 = phi i64 [ 1, %b1 ], [ %v2, %b2 ]");
    }

    #[test]
    fn test_void_call_rendering() {
        let call = Instruction::Call {
            result: None,
            ret: LlvmType::Void,
            callee: Operand::global("kiln_monitor_enter"),
            args: vec![(LlvmType::Ptr, Operand::Local(LocalId(0)))],
        };
        assert_eq!(call.to_string(), "call void @kiln_monitor_enter(ptr %v0)");
    }
}
