//! Runtime helper functions
//!
//! Conditions the compiler cannot rule out statically are compiled into the
//! program as calls to these helpers. The raise helpers never return; the
//! dispatch tables point unresolvable slots at them directly.

use crate::compiler::llvm::{FunctionSignature, LlvmType, Operand};
use crate::compiler::object::ProgramModule;

/// A function provided by the runtime library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RuntimeHelper {
    /// Call of an abstract method
    RaiseAbstractMethodError,
    /// Dispatch through a selector the receiver does not implement
    RaiseIncompatibleClassChangeError,
    /// Call of a native method with no implementation
    RaiseUnsatisfiedLinkError,
    /// Integer division by zero
    RaiseArithmeticException,
    /// Store of an incompatible element into a reference array
    RaiseArrayStoreException,
    /// Allocation with a negative length
    RaiseNegativeArraySizeException,
    /// Dereference of null
    RaiseNullPointerException,
    /// Array index outside of bounds
    RaiseArrayIndexOutOfBoundsException,
    /// Acquire an object monitor
    MonitorEnter,
    /// Release an object monitor
    MonitorExit,
    /// Entry point of a vtable slot for a receiver
    LookupVirtual,
    /// Entry point of an itable slot for a receiver
    LookupInterface,
}

impl RuntimeHelper {
    /// Every helper
    pub const ALL: [RuntimeHelper; 12] = [
        RuntimeHelper::RaiseAbstractMethodError,
        RuntimeHelper::RaiseIncompatibleClassChangeError,
        RuntimeHelper::RaiseUnsatisfiedLinkError,
        RuntimeHelper::RaiseArithmeticException,
        RuntimeHelper::RaiseArrayStoreException,
        RuntimeHelper::RaiseNegativeArraySizeException,
        RuntimeHelper::RaiseNullPointerException,
        RuntimeHelper::RaiseArrayIndexOutOfBoundsException,
        RuntimeHelper::MonitorEnter,
        RuntimeHelper::MonitorExit,
        RuntimeHelper::LookupVirtual,
        RuntimeHelper::LookupInterface,
    ];

    /// Linker symbol
    pub fn symbol(self) -> &'static str {
        match self {
            RuntimeHelper::RaiseAbstractMethodError => "kiln_raise_abstract_method_error",
            RuntimeHelper::RaiseIncompatibleClassChangeError => {
                "kiln_raise_incompatible_class_change_error"
            }
            RuntimeHelper::RaiseUnsatisfiedLinkError => "kiln_raise_unsatisfied_link_error",
            RuntimeHelper::RaiseArithmeticException => "kiln_raise_arithmetic_exception",
            RuntimeHelper::RaiseArrayStoreException => "kiln_raise_array_store_exception",
            RuntimeHelper::RaiseNegativeArraySizeException => {
                "kiln_raise_negative_array_size_exception"
            }
            RuntimeHelper::RaiseNullPointerException => "kiln_raise_null_pointer_exception",
            RuntimeHelper::RaiseArrayIndexOutOfBoundsException => {
                "kiln_raise_array_index_out_of_bounds_exception"
            }
            RuntimeHelper::MonitorEnter => "kiln_monitor_enter",
            RuntimeHelper::MonitorExit => "kiln_monitor_exit",
            RuntimeHelper::LookupVirtual => "kiln_lookup_virtual",
            RuntimeHelper::LookupInterface => "kiln_lookup_interface",
        }
    }

    /// Whether the helper returns to its caller
    pub fn returns(self) -> bool {
        matches!(
            self,
            RuntimeHelper::MonitorEnter
                | RuntimeHelper::MonitorExit
                | RuntimeHelper::LookupVirtual
                | RuntimeHelper::LookupInterface
        )
    }

    /// Function signature
    pub fn signature(self) -> FunctionSignature {
        match self {
            RuntimeHelper::MonitorEnter | RuntimeHelper::MonitorExit => {
                FunctionSignature::new(LlvmType::Void, vec![LlvmType::Ptr])
            }
            // (receiver, slot index)
            RuntimeHelper::LookupVirtual => {
                FunctionSignature::new(LlvmType::Ptr, vec![LlvmType::Ptr, LlvmType::I32])
            }
            // (receiver, interface type id, slot index)
            RuntimeHelper::LookupInterface => FunctionSignature::new(
                LlvmType::Ptr,
                vec![LlvmType::Ptr, LlvmType::I32, LlvmType::I32],
            ),
            _ => FunctionSignature::new(LlvmType::Void, Vec::new()),
        }
    }

    /// Declare the helper in `module` and return its address
    pub fn declare(self, module: &ProgramModule) -> Operand {
        module.declare_function(self.symbol(), self.signature())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_symbols_are_unique() {
        let symbols: HashSet<&str> = RuntimeHelper::ALL.iter().map(|h| h.symbol()).collect();
        assert_eq!(symbols.len(), RuntimeHelper::ALL.len());
    }

    #[test]
    fn test_raise_helpers_do_not_return() {
        assert!(!RuntimeHelper::RaiseAbstractMethodError.returns());
        assert!(RuntimeHelper::MonitorExit.returns());
    }

    #[test]
    fn test_declare() {
        let module = ProgramModule::new("test", false);
        RuntimeHelper::LookupInterface.declare(&module);
        assert!(module.is_declared("kiln_lookup_interface"));
    }
}
