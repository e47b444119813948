//! Output module
//!
//! Collects lowered functions, function declarations and data definitions
//! from every worker. Names are kept sorted so the rendered module does not
//! depend on which worker finished first.

use crate::compiler::llvm::{global_name, Constant, Function, FunctionSignature, LlvmType, Operand};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;

/// Symbol linkage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Linkage {
    /// Visible to other modules
    External,
    /// Module-local, kept in the symbol table
    Internal,
    /// Module-local, not in the symbol table
    Private,
}

impl fmt::Display for Linkage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Linkage::External => Ok(()),
            Linkage::Internal => write!(f, "internal "),
            Linkage::Private => write!(f, "private "),
        }
    }
}

/// A defined global
#[derive(Debug, Clone, PartialEq)]
pub struct DataDefinition {
    /// Symbol name
    pub name: String,
    /// Global type
    pub ty: LlvmType,
    /// Initializer
    pub value: Constant,
    /// Linkage
    pub linkage: Linkage,
    /// Read-only after load
    pub constant: bool,
}

impl fmt::Display for DataDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} = {}{} {} {}, align {}",
            global_name(&self.name),
            self.linkage,
            if self.constant { "constant" } else { "global" },
            self.ty,
            self.value,
            self.ty.align().max(8)
        )
    }
}

#[derive(Debug, Default)]
struct ModuleState {
    functions: BTreeMap<String, Function>,
    declarations: BTreeMap<String, FunctionSignature>,
    external_data: BTreeMap<String, LlvmType>,
    data: BTreeMap<String, DataDefinition>,
}

/// The program-wide output module
#[derive(Debug)]
pub struct ProgramModule {
    name: String,
    pie: bool,
    state: Mutex<ModuleState>,
}

impl ProgramModule {
    /// Empty module
    pub fn new(name: impl Into<String>, pie: bool) -> Self {
        Self {
            name: name.into(),
            pie,
            state: Mutex::new(ModuleState::default()),
        }
    }

    /// Declare an external function unless it is already declared or defined
    pub fn declare_function(&self, name: &str, signature: FunctionSignature) -> Operand {
        let mut state = self.state.lock();
        if !state.functions.contains_key(name) {
            state
                .declarations
                .entry(name.to_string())
                .or_insert(signature);
        }
        Operand::global(name)
    }

    /// Declare external data unless it is already declared or defined
    pub fn declare_data(&self, name: &str, ty: LlvmType) -> Operand {
        let mut state = self.state.lock();
        if !state.data.contains_key(name) {
            state.external_data.entry(name.to_string()).or_insert(ty);
        }
        Operand::global(name)
    }

    /// Define read-only data; a symbol may be defined once
    pub fn add_data(
        &self,
        name: &str,
        ty: LlvmType,
        value: Constant,
        linkage: Linkage,
    ) -> Result<Operand> {
        self.define(name, ty, value, linkage, true)
    }

    /// Define writable data; a symbol may be defined once
    pub fn add_variable(
        &self,
        name: &str,
        ty: LlvmType,
        value: Constant,
        linkage: Linkage,
    ) -> Result<Operand> {
        self.define(name, ty, value, linkage, false)
    }

    fn define(
        &self,
        name: &str,
        ty: LlvmType,
        value: Constant,
        linkage: Linkage,
        constant: bool,
    ) -> Result<Operand> {
        let mut state = self.state.lock();
        if state.data.contains_key(name) {
            return Err(Error::internal(format!("Data symbol {} defined twice", name)));
        }
        state.external_data.remove(name);
        state.data.insert(
            name.to_string(),
            DataDefinition {
                name: name.to_string(),
                ty,
                value,
                linkage,
                constant,
            },
        );
        Ok(Operand::global(name))
    }

    /// Add a lowered function; a symbol may be defined once
    pub fn add_function(&self, function: Function) -> Result<()> {
        let mut state = self.state.lock();
        if state.functions.contains_key(function.name()) {
            return Err(Error::internal(format!(
                "Function {} defined twice",
                function.name()
            )));
        }
        state.declarations.remove(function.name());
        state.functions.insert(function.name().to_string(), function);
        Ok(())
    }

    /// Defined data by name
    pub fn data(&self, name: &str) -> Option<DataDefinition> {
        self.state.lock().data.get(name).cloned()
    }

    /// Names of all defined data
    pub fn data_names(&self) -> Vec<String> {
        self.state.lock().data.keys().cloned().collect()
    }

    /// Defined function by name
    pub fn function(&self, name: &str) -> Option<Function> {
        self.state.lock().functions.get(name).cloned()
    }

    /// Number of defined functions
    pub fn function_count(&self) -> usize {
        self.state.lock().functions.len()
    }

    /// Whether an external function declaration exists
    pub fn is_declared(&self, name: &str) -> bool {
        self.state.lock().declarations.contains_key(name)
    }
}

impl fmt::Display for ProgramModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        writeln!(f, "; ModuleID = '{}'", self.name)?;
        writeln!(f, "source_filename = \"{}\"", self.name)?;

        if !state.data.is_empty() || !state.external_data.is_empty() {
            writeln!(f)?;
        }
        for (name, ty) in &state.external_data {
            writeln!(f, "{} = external global {}", global_name(name), ty)?;
        }
        for data in state.data.values() {
            writeln!(f, "{}", data)?;
        }

        for function in state.functions.values() {
            writeln!(f)?;
            write!(f, "{}", function)?;
        }

        if !state.declarations.is_empty() {
            writeln!(f)?;
        }
        for (name, signature) in &state.declarations {
            let params: Vec<String> = signature.params.iter().map(|p| p.to_string()).collect();
            writeln!(
                f,
                "declare {} {}({})",
                signature.ret,
                global_name(name),
                params.join(", ")
            )?;
        }

        if self.pie {
            writeln!(f)?;
            writeln!(f, "!llvm.module.flags = !{{!0}}")?;
            writeln!(f, "!0 = !{{i32 7, !\"PIE Level\", i32 2}}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_replaces_declaration() {
        let module = ProgramModule::new("test", false);
        module.declare_data("table", LlvmType::Ptr);
        module
            .add_data("table", LlvmType::Ptr, Constant::Null, Linkage::Internal)
            .unwrap();
        let text = module.to_string();
        assert!(text.contains("@table = internal constant ptr null, align 8"));
        assert!(!text.contains("external global"));
    }

    #[test]
    fn test_duplicate_data_is_rejected() {
        let module = ProgramModule::new("test", false);
        module
            .add_data("x", LlvmType::I32, Constant::Int(1), Linkage::External)
            .unwrap();
        assert!(module
            .add_variable("x", LlvmType::I32, Constant::Int(2), Linkage::External)
            .is_err());
    }

    #[test]
    fn test_variable_is_writable() {
        let module = ProgramModule::new("test", false);
        module
            .add_variable("counter", LlvmType::I64, Constant::Int(0), Linkage::Internal)
            .unwrap();
        assert!(module
            .to_string()
            .contains("@counter = internal global i64 0, align 8"));
    }

    #[test]
    fn test_declarations_are_rendered_once() {
        let module = ProgramModule::new("test", true);
        let signature = FunctionSignature::new(LlvmType::Void, vec![LlvmType::Ptr]);
        module.declare_function("helper", signature.clone());
        module.declare_function("helper", signature);
        let text = module.to_string();
        assert_eq!(text.matches("declare void @helper(ptr)").count(), 1);
        assert!(text.contains("PIE Level"));
    }
}
