//! # Kiln compiler backend
//!
//! Lowers per-method program graphs to textual LLVM IR and emits the
//! whole-program data the generated code depends on: dispatch tables and
//! the build-time heap.
//!
//! ## Architecture
//!
//! ```text
//! Program + Reachability ─┐
//!                          ├→ Dispatch tables ─┐
//! Graph per method ─→ Schedule ─→ Lowering ───┼→ ProgramModule → LLVM IR text
//!                          Build-time heap ───┘
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use kiln::compiler::{CompileOptions, Compiler};
//!
//! let compiler = Compiler::new(CompileOptions::default(), program, reachability);
//! let result = compiler.compile(&graphs)?;
//! std::fs::write("program.ll", result.ir)?;
//! ```

pub mod diagnostics;
pub mod dispatch;
pub mod graph;
pub mod heap;
pub mod llvm;
pub mod lowering;
pub mod memory;
pub mod object;
pub mod pointer;
pub mod program;
pub mod runtime;
pub mod schedule;
pub mod types;

pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use dispatch::{DispatchStatistics, DispatchTables, TableInfo, TableKind};
pub use graph::{Graph, GraphBuilder};
pub use heap::{BuildtimeHeap, HeapArray, HeapObject, HeapValue, ObjectRef};
pub use lowering::{lower_method, LoweringVisitor};
pub use object::{Linkage, ProgramModule};
pub use pointer::{Pointer, PointerError};
pub use program::{
    AllReachable, ClassBuilder, ClassDefinition, MethodElement, Program, Reachability,
    ReachableSelectors,
};
pub use runtime::RuntimeHelper;
pub use schedule::Schedule;
pub use types::Type;

use crate::error::{Error, Result};
use crate::parallel::{self, ParallelConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Compilation options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Pointer size in bytes used for table layouts (4 or 8)
    pub pointer_size: i64,
    /// Size in bytes of a type id in itable dictionary entries
    pub type_id_size: i64,
    /// Worker pool settings for table building and lowering
    pub parallel: ParallelConfig,
    /// Log table statistics once tables are emitted
    pub emit_dispatch_statistics: bool,
    /// Mark the output module position independent
    pub pie: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            pointer_size: 8,
            type_id_size: 4,
            parallel: ParallelConfig::default(),
            emit_dispatch_statistics: true,
            pie: false,
        }
    }
}

impl CompileOptions {
    /// Parse options from JSON; missing fields take their defaults
    pub fn from_json(text: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(text)?;
        options.validate()?;
        Ok(options)
    }

    /// Reject settings no target supports
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.pointer_size, 4 | 8) {
            return Err(Error::Config(format!(
                "pointer_size must be 4 or 8, got {}",
                self.pointer_size
            )));
        }
        if !matches!(self.type_id_size, 1 | 2 | 4 | 8) {
            return Err(Error::Config(format!(
                "type_id_size must be 1, 2, 4 or 8, got {}",
                self.type_id_size
            )));
        }
        if self.parallel.max_parallelism == 0 {
            return Err(Error::Config("max_parallelism must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Whole-program state shared by every worker
///
/// Everything here is safe to use from several threads at once. Per-method
/// state lives in [`LoweringVisitor`] and is never shared.
#[derive(Debug)]
pub struct CompilationContext {
    options: CompileOptions,
    program: Arc<Program>,
    diagnostics: Diagnostics,
    dispatch: DispatchTables,
    heap: BuildtimeHeap,
    module: ProgramModule,
}

impl CompilationContext {
    /// Create a context for one program
    pub fn new(
        options: CompileOptions,
        program: Arc<Program>,
        reachability: Arc<dyn Reachability>,
    ) -> Self {
        let dispatch =
            DispatchTables::new(reachability, options.pointer_size, options.type_id_size);
        let module = ProgramModule::new("kiln", options.pie);
        Self {
            options,
            program,
            diagnostics: Diagnostics::new(),
            dispatch,
            heap: BuildtimeHeap::new(),
            module,
        }
    }

    /// Options
    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// The program being compiled
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Diagnostic sink
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Dispatch table builder
    pub fn dispatch(&self) -> &DispatchTables {
        &self.dispatch
    }

    /// Build-time heap
    pub fn heap(&self) -> &BuildtimeHeap {
        &self.heap
    }

    /// Output module
    pub fn module(&self) -> &ProgramModule {
        &self.module
    }
}

/// Compilation result with metadata
#[derive(Debug)]
pub struct CompileResult {
    /// Rendered LLVM IR module
    pub ir: String,
    /// Number of lowered functions
    pub functions: usize,
    /// Number of serialized heap objects
    pub heap_objects: usize,
    /// Emitted dispatch tables
    pub statistics: DispatchStatistics,
    /// Warnings reported along the way
    pub warnings: Vec<Diagnostic>,
}

/// Kiln compiler
#[derive(Debug)]
pub struct Compiler {
    ctx: CompilationContext,
}

impl Compiler {
    /// Create a compiler for `program`
    pub fn new(
        options: CompileOptions,
        program: Arc<Program>,
        reachability: Arc<dyn Reachability>,
    ) -> Self {
        Self {
            ctx: CompilationContext::new(options, program, reachability),
        }
    }

    /// Shared compilation state, for interning heap objects before compiling
    pub fn context(&self) -> &CompilationContext {
        &self.ctx
    }

    /// Compile every method graph and all whole-program data
    pub fn compile(&self, graphs: &[Graph]) -> Result<CompileResult> {
        let ctx = &self.ctx;
        ctx.options.validate()?;
        let classes = ctx.program.classes();

        // Phase 1: Build vtables and itables
        let built = parallel::parallel_map(
            &classes,
            |class| {
                if class.is_interface() {
                    ctx.dispatch.build_itable(class).map(|_| ())
                } else {
                    ctx.dispatch.build_vtable(class).map(|_| ())
                }
            },
            &ctx.options.parallel,
        )?;
        for result in built {
            result?;
        }

        // Phase 2: Emit per-class tables and the global arrays
        for class in &classes {
            ctx.dispatch
                .emit_vtable(&ctx.module, &ctx.diagnostics, class)?;
            ctx.dispatch
                .emit_class_itables(&ctx.module, &ctx.diagnostics, class)?;
        }
        ctx.dispatch.emit_vtable_array(&ctx.module, &ctx.program)?;
        ctx.dispatch.emit_itable_dict_array(&ctx.module, &ctx.program)?;
        ctx.diagnostics.check()?;

        // Phase 3: Lower methods
        let lowered = parallel::lower_methods(ctx, graphs)?;
        let mut first_failure = None;
        for (graph, result) in graphs.iter().zip(lowered) {
            match result {
                Ok(function) => ctx.module.add_function(function)?,
                Err(err) => {
                    warn!(target: "kiln::lowering", method = %graph.method(), error = %err, "lowering aborted");
                    first_failure.get_or_insert(err);
                }
            }
        }
        ctx.diagnostics.check()?;
        if let Some(err) = first_failure {
            return Err(err);
        }

        // Phase 4: Serialize the build-time heap
        let heap_objects = ctx.heap.emit(&ctx.module)?;
        ctx.diagnostics.check()?;

        // Phase 5: Statistics
        let statistics = ctx.dispatch.statistics();
        if ctx.options.emit_dispatch_statistics {
            ctx.dispatch.log_statistics();
        }
        info!(
            target: "kiln::compiler",
            functions = ctx.module.function_count(),
            heap_objects,
            "compilation finished"
        );

        Ok(CompileResult {
            ir: ctx.module.to_string(),
            functions: ctx.module.function_count(),
            heap_objects,
            statistics,
            warnings: ctx
                .diagnostics
                .entries()
                .into_iter()
                .filter(|d| d.severity == Severity::Warning)
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_from_json_uses_defaults() {
        let options = CompileOptions::from_json(r#"{ "pie": true }"#).unwrap();
        assert!(options.pie);
        assert_eq!(options.pointer_size, 8);
        assert_eq!(options.type_id_size, 4);
        assert!(options.emit_dispatch_statistics);
    }

    #[test]
    fn test_options_reject_bad_pointer_size() {
        let err = CompileOptions::from_json(r#"{ "pointer_size": 3 }"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(CompileOptions::from_json("not json").is_err());
    }

    #[test]
    fn test_empty_program_compiles() {
        let compiler = Compiler::new(
            CompileOptions::default(),
            Arc::new(Program::new()),
            Arc::new(AllReachable),
        );
        let result = compiler.compile(&[]).unwrap();
        assert_eq!(result.functions, 0);
        assert!(result.ir.contains("@kiln_vtables = constant [19 x ptr]"));
        assert!(result.ir.contains("@kiln_itable_dicts = constant [19 x ptr]"));
    }
}
