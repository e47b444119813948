//! # Kiln - An Ahead-of-Time Compiler Backend
//!
//! Kiln takes a whole program that a frontend has already analyzed (classes,
//! methods, a reachability predicate and one sea-of-nodes graph per method)
//! and produces a single textual LLVM IR module: one function per method,
//! the vtables, itables and itable dictionaries used for dynamic dispatch,
//! and the objects of the build-time heap.
//!
//! ## Quick Start
//!
//! ```ignore
//! use kiln::compiler::graph::GraphBuilder;
//! use kiln::compiler::{AllReachable, ClassBuilder, CompileOptions, Compiler, Program, Type};
//! use std::sync::Arc;
//!
//! let class = ClassBuilder::new("Adder", 19)
//!     .static_method("add", "(II)I")
//!     .build()?;
//! let mut program = Program::new();
//! program.add(class.clone())?;
//!
//! let mut builder = GraphBuilder::new(class.methods()[0].clone());
//! let a = builder.parameter(0, Type::signed(4));
//! let b = builder.parameter(1, Type::signed(4));
//! let sum = builder.add(a, b);
//! builder.return_value(sum);
//! let graph = builder.finish()?;
//!
//! let compiler = Compiler::new(CompileOptions::default(), Arc::new(program), Arc::new(AllReachable));
//! let result = compiler.compile(&[graph])?;
//! println!("{}", result.ir);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌───────────┐   ┌────────────┐   ┌───────────────┐
//! │ Node graph │ → │ Scheduler │ → │  Lowering  │ → │ ProgramModule │
//! └────────────┘   └───────────┘   └────────────┘   └───────────────┘
//!                                        ↑                  ↑
//!                        Dispatch tables ┘   Build-time heap ┘
//! ```
//!
//! - [`compiler::graph`] - arena graph of values, actions and terminators
//! - [`compiler::schedule`] - block placement of floating values
//! - [`compiler::lowering`] - graph to LLVM IR translation
//! - [`compiler::pointer`] - typed compile-time pointers with offset resolution
//! - [`compiler::memory`] - atomic memory cells for build-time data
//! - [`compiler::dispatch`] - vtables, itables and their global indexes
//! - [`compiler::heap`] - build-time objects serialized as module data
//! - [`compiler::program`] - classes, methods, type ids and reachability
//! - [`parallel`] - per-method worker pool
//!
//! ## Error Handling
//!
//! Problems caused by the input program are collected as diagnostics and
//! fail the build at the end of the phase that found them. Broken internal
//! invariants abort the current method with an [`Error`].

// Module declarations
/// Version of the Kiln backend
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod compiler;
pub mod error;
pub mod parallel;

// Re-export main types
pub use compiler::{CompilationContext, CompileOptions, CompileResult, Compiler};
pub use error::{Error, ErrorSeverity, Result};
