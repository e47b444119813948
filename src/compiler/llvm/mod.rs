//! # Target IR
//!
//! An in-memory subset of textual LLVM IR: just enough types, constants,
//! instructions and functions for lowering to produce, and a `Display`
//! rendering in LLVM assembly syntax for the downstream emitter.
//!
//! Blocks keep their phis, body instructions and terminator apart. Lowering
//! may place a value into a block that already has its terminator; it still
//! renders before the terminator.

mod instruction;

pub use instruction::{
    AtomicOrdering, BinaryOpcode, CastOpcode, FloatPredicate, Instruction, IntPredicate, Phi,
    Terminator,
};

use std::fmt;

/// A target type token
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LlvmType {
    /// `void`
    Void,
    /// `i1`
    I1,
    /// `i8`
    I8,
    /// `i16`
    I16,
    /// `i32`
    I32,
    /// `i64`
    I64,
    /// `float`
    Float,
    /// `double`
    Double,
    /// Opaque `ptr`
    Ptr,
    /// `[len x element]`
    Array {
        /// Element count
        len: u64,
        /// Element type
        element: Box<LlvmType>,
    },
    /// `{ ... }` or packed `<{ ... }>`
    Struct {
        /// Packed layout
        packed: bool,
        /// Field types
        fields: Vec<LlvmType>,
    },
    /// Function type
    Function(Box<FunctionSignature>),
}

impl LlvmType {
    /// Integer type of the given byte width
    pub fn int_of_bytes(size: i64) -> Option<LlvmType> {
        match size {
            1 => Some(LlvmType::I8),
            2 => Some(LlvmType::I16),
            4 => Some(LlvmType::I32),
            8 => Some(LlvmType::I64),
            _ => None,
        }
    }

    /// Array type
    pub fn array(len: u64, element: LlvmType) -> Self {
        LlvmType::Array {
            len,
            element: Box::new(element),
        }
    }

    /// Non-packed struct type
    pub fn structure(fields: Vec<LlvmType>) -> Self {
        LlvmType::Struct {
            packed: false,
            fields,
        }
    }

    /// Natural alignment used for memory accesses
    pub fn align(&self) -> u64 {
        match self {
            LlvmType::Void | LlvmType::I1 | LlvmType::I8 => 1,
            LlvmType::I16 => 2,
            LlvmType::I32 | LlvmType::Float => 4,
            LlvmType::I64 | LlvmType::Double | LlvmType::Ptr | LlvmType::Function(_) => 8,
            LlvmType::Array { element, .. } => element.align(),
            LlvmType::Struct { packed: true, .. } => 1,
            LlvmType::Struct { fields, .. } => fields.iter().map(|f| f.align()).max().unwrap_or(1),
        }
    }

    /// True for `float` and `double`
    pub fn is_float(&self) -> bool {
        matches!(self, LlvmType::Float | LlvmType::Double)
    }
}

impl fmt::Display for LlvmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlvmType::Void => write!(f, "void"),
            LlvmType::I1 => write!(f, "i1"),
            LlvmType::I8 => write!(f, "i8"),
            LlvmType::I16 => write!(f, "i16"),
            LlvmType::I32 => write!(f, "i32"),
            LlvmType::I64 => write!(f, "i64"),
            LlvmType::Float => write!(f, "float"),
            LlvmType::Double => write!(f, "double"),
            LlvmType::Ptr => write!(f, "ptr"),
            LlvmType::Array { len, element } => write!(f, "[{} x {}]", len, element),
            LlvmType::Struct { packed, fields } => {
                let (open, close) = if *packed { ("<{", "}>") } else { ("{", "}") };
                if fields.is_empty() {
                    return write!(f, "{}{}", open, close);
                }
                write!(f, "{} ", open)?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", field)?;
                }
                write!(f, " {}", close)
            }
            LlvmType::Function(signature) => write!(f, "{}", signature),
        }
    }
}

/// Return and parameter types of a function
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionSignature {
    /// Return type
    pub ret: LlvmType,
    /// Parameter types
    pub params: Vec<LlvmType>,
}

impl FunctionSignature {
    /// Create a signature
    pub fn new(ret: LlvmType, params: Vec<LlvmType>) -> Self {
        Self { ret, params }
    }
}

impl fmt::Display for FunctionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (", self.ret)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", param)?;
        }
        write!(f, ")")
    }
}

/// Render a global symbol reference, quoting names LLVM would not accept bare
pub fn global_name(name: &str) -> String {
    let bare = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$'));
    if bare {
        format!("@{}", name)
    } else {
        format!("@\"{}\"", name.replace('\\', "\\5C").replace('"', "\\22"))
    }
}

/// A function-local SSA value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalId(pub u32);

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%v{}", self.0)
    }
}

/// A constant, usable both as an operand and as a global initializer
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// `true` / `false`
    Bool(bool),
    /// Integer
    Int(i64),
    /// Floating point, rendered as exact hexadecimal
    Float(f64),
    /// `null`
    Null,
    /// `zeroinitializer`
    Zero,
    /// `undef`
    Undef,
    /// Address of a global
    Symbol(String),
    /// Address of a global plus a byte offset
    SymbolOffset {
        /// Global symbol
        symbol: String,
        /// Byte offset
        offset: i64,
    },
    /// Array initializer
    Array {
        /// Element type
        element: LlvmType,
        /// Elements
        values: Vec<Constant>,
    },
    /// Struct initializer
    Struct {
        /// Packed layout
        packed: bool,
        /// Typed fields
        fields: Vec<(LlvmType, Constant)>,
    },
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Bool(value) => write!(f, "{}", value),
            Constant::Int(value) => write!(f, "{}", value),
            Constant::Float(value) => write!(f, "0x{:016X}", value.to_bits()),
            Constant::Null => write!(f, "null"),
            Constant::Zero => write!(f, "zeroinitializer"),
            Constant::Undef => write!(f, "undef"),
            Constant::Symbol(symbol) => write!(f, "{}", global_name(symbol)),
            Constant::SymbolOffset { symbol, offset } => {
                if *offset == 0 {
                    write!(f, "{}", global_name(symbol))
                } else {
                    write!(
                        f,
                        "getelementptr (i8, ptr {}, i64 {})",
                        global_name(symbol),
                        offset
                    )
                }
            }
            Constant::Array { element, values } => {
                write!(f, "[")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} {}", element, value)?;
                }
                write!(f, "]")
            }
            Constant::Struct { packed, fields } => {
                let (open, close) = if *packed { ("<{", "}>") } else { ("{", "}") };
                write!(f, "{} ", open)?;
                for (i, (ty, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} {}", ty, value)?;
                }
                write!(f, " {}", close)
            }
        }
    }
}

/// An instruction operand
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// SSA value
    Local(LocalId),
    /// Constant
    Const(Constant),
}

impl Operand {
    /// Integer constant operand
    pub fn int(value: i64) -> Self {
        Operand::Const(Constant::Int(value))
    }

    /// Global symbol operand
    pub fn global(symbol: impl Into<String>) -> Self {
        Operand::Const(Constant::Symbol(symbol.into()))
    }
}

impl From<LocalId> for Operand {
    fn from(local: LocalId) -> Self {
        Operand::Local(local)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Local(local) => write!(f, "{}", local),
            Operand::Const(constant) => write!(f, "{}", constant),
        }
    }
}

/// A basic block of the target function
#[derive(Debug, Clone)]
pub struct BasicBlock {
    label: String,
    phis: Vec<Phi>,
    instructions: Vec<Instruction>,
    terminator: Option<Terminator>,
}

impl BasicBlock {
    /// Label without the leading `%`
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Phis at the top of the block
    pub fn phis(&self) -> &[Phi] {
        &self.phis
    }

    /// Body instructions in order
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Terminator, once set
    pub fn terminator(&self) -> Option<&Terminator> {
        self.terminator.as_ref()
    }

    /// Append a phi, returning its index
    pub fn push_phi(&mut self, phi: Phi) -> usize {
        self.phis.push(phi);
        self.phis.len() - 1
    }

    /// Phi by index
    pub fn phi_mut(&mut self, index: usize) -> Option<&mut Phi> {
        self.phis.get_mut(index)
    }

    /// Append a body instruction; it renders before the terminator
    pub fn push(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    /// Set the terminator; returns the previous one if any
    pub fn set_terminator(&mut self, terminator: Terminator) -> Option<Terminator> {
        self.terminator.replace(terminator)
    }
}

impl fmt::Display for BasicBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.label)?;
        for phi in &self.phis {
            writeln!(f, "  {}", phi)?;
        }
        for instruction in &self.instructions {
            writeln!(f, "  {}", instruction)?;
        }
        if let Some(terminator) = &self.terminator {
            writeln!(f, "  {}", terminator)?;
        }
        Ok(())
    }
}

/// A lowered function
#[derive(Debug, Clone)]
pub struct Function {
    name: String,
    signature: FunctionSignature,
    params: Vec<LocalId>,
    blocks: Vec<BasicBlock>,
    next_local: u32,
}

impl Function {
    /// Create a function with one local per parameter and no blocks
    pub fn new(name: impl Into<String>, signature: FunctionSignature) -> Self {
        let params = (0..signature.params.len() as u32).map(LocalId).collect();
        Self {
            name: name.into(),
            next_local: signature.params.len() as u32,
            signature,
            params,
            blocks: Vec::new(),
        }
    }

    /// Symbol name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signature
    pub fn signature(&self) -> &FunctionSignature {
        &self.signature
    }

    /// Parameter locals
    pub fn params(&self) -> &[LocalId] {
        &self.params
    }

    /// A fresh SSA name
    pub fn fresh_local(&mut self) -> LocalId {
        let local = LocalId(self.next_local);
        self.next_local += 1;
        local
    }

    /// Append an empty block, returning its index
    pub fn add_block(&mut self, label: impl Into<String>) -> usize {
        self.blocks.push(BasicBlock {
            label: label.into(),
            phis: Vec::new(),
            instructions: Vec::new(),
            terminator: None,
        });
        self.blocks.len() - 1
    }

    /// Blocks in creation order; the first is the entry
    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    /// Block by index
    pub fn block(&self, index: usize) -> &BasicBlock {
        &self.blocks[index]
    }

    /// Mutable block by index
    pub fn block_mut(&mut self, index: usize) -> &mut BasicBlock {
        &mut self.blocks[index]
    }

    /// Total phis, body instructions and terminators
    pub fn instruction_count(&self) -> usize {
        self.blocks
            .iter()
            .map(|b| b.phis.len() + b.instructions.len() + b.terminator.is_some() as usize)
            .sum()
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "define {} {}(", self.signature.ret, global_name(&self.name))?;
        for (i, (ty, local)) in self.signature.params.iter().zip(&self.params).enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} {}", ty, local)?;
        }
        writeln!(f, ") {{")?;
        for (i, block) in self.blocks.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", block)?;
        }
        writeln!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_name_quoting() {
        assert_eq!(global_name("main"), "@main");
        assert_eq!(global_name("vtable-java.lang.Object"), "@\"vtable-java.lang.Object\"");
        assert_eq!(global_name("A.f()V"), "@\"A.f()V\"");
    }

    #[test]
    fn test_type_display() {
        let entry = LlvmType::structure(vec![LlvmType::Ptr, LlvmType::I32]);
        assert_eq!(entry.to_string(), "{ ptr, i32 }");
        assert_eq!(LlvmType::array(3, entry).to_string(), "[3 x { ptr, i32 }]");
        let packed = LlvmType::Struct {
            packed: true,
            fields: vec![LlvmType::I8],
        };
        assert_eq!(packed.to_string(), "<{ i8 }>");
    }

    #[test]
    fn test_terminator_renders_after_late_instructions() {
        let mut function = Function::new(
            "f",
            FunctionSignature::new(LlvmType::I32, vec![LlvmType::I32]),
        );
        let block = function.add_block("b0");
        let param = function.params()[0];
        let result = function.fresh_local();
        function.block_mut(block).set_terminator(Terminator::Ret(Some((
            LlvmType::I32,
            Operand::Local(result),
        ))));
        function.block_mut(block).push(Instruction::Binary {
            result,
            op: BinaryOpcode::Add,
            ty: LlvmType::I32,
            lhs: Operand::Local(param),
            rhs: Operand::int(1),
        });
        let text = function.to_string();
        let add = text.find("add i32").unwrap();
        let ret = text.find("ret i32").unwrap();
        assert!(add < ret);
        assert!(text.starts_with("define i32 @f(i32 %v0) {"));
    }
}
