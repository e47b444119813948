//! Error types for the Kiln compiler backend

use crate::compiler::memory::MemoryError;
use crate::compiler::pointer::PointerError;
use thiserror::Error;

/// Kiln compilation errors
///
/// User-attributable problems (a missing method body, an unsupported node) are
/// not represented here; they accumulate in [`crate::compiler::Diagnostics`]
/// and surface as [`Error::CompilationFailed`] at the next join point.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Internal compiler error
    ///
    /// **Triggered by:** a broken invariant inside the backend (an unmappable
    /// type width, a block without a terminator, an instruction selected for
    /// an operand kind it does not support)
    #[error("Internal compiler error: {0}")]
    Internal(String),

    /// A byte offset could not be resolved against a typed pointer
    #[error("Pointer error: {0}")]
    Pointer(#[from] PointerError),

    /// A memory cell was accessed in a way it does not support
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    /// One or more diagnostics were reported during a compilation phase
    #[error("Compilation failed with {errors} error(s)")]
    CompilationFailed {
        /// Number of reported errors
        errors: usize,
    },

    /// Invalid compiler configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Worker pool could not be created
    #[error("Thread pool error: {0}")]
    ThreadPool(String),
}

/// Error severity classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Aborts the current compilation unit
    Fatal,
    /// The build fails but other units may still be processed
    Recoverable,
}

impl Error {
    /// Create an internal compiler error with a message
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Classify error severity
    pub fn classify(&self) -> ErrorSeverity {
        match self {
            Error::Internal(_) => ErrorSeverity::Fatal,
            Error::Pointer(_) => ErrorSeverity::Fatal,
            Error::Memory(_) => ErrorSeverity::Fatal,

            Error::CompilationFailed { .. } => ErrorSeverity::Recoverable,
            Error::Config(_) => ErrorSeverity::Recoverable,
            Error::ThreadPool(_) => ErrorSeverity::Recoverable,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(err.to_string())
    }
}

/// Result type for Kiln operations
pub type Result<T> = std::result::Result<T, Error>;
