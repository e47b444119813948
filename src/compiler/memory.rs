//! Memory cells
//!
//! A memory cell is a fixed-length homogeneous storage region used for
//! build-time heap contents. Every access names its width and an access
//! mode; a cell that does not store values of the requested width reports
//! [`MemoryError::InvalidAccess`] instead of truncating.
//!
//! # Access modes
//!
//! Reads and writes each form an ordered hierarchy, weakest first:
//!
//! ```text
//! read:  Plain < Opaque < Acquire < Volatile
//! write: Plain < Opaque < Release < Volatile
//! ```
//!
//! Compare-and-exchange takes one of each and picks the narrowest atomic
//! operation satisfying both.

use crate::compiler::pointer::Pointer;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Ordering strength of a load
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReadAccessMode {
    /// No ordering beyond the hardware baseline
    Plain,
    /// Coherent with respect to this location only
    Opaque,
    /// No later access may move before this load
    Acquire,
    /// Sequentially consistent
    Volatile,
}

/// Ordering strength of a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WriteAccessMode {
    /// No ordering beyond the hardware baseline
    Plain,
    /// Coherent with respect to this location only
    Opaque,
    /// No earlier access may move after this store
    Release,
    /// Sequentially consistent
    Volatile,
}

impl ReadAccessMode {
    /// Equivalent atomic ordering for a load
    pub fn ordering(self) -> Ordering {
        match self {
            ReadAccessMode::Plain | ReadAccessMode::Opaque => Ordering::Relaxed,
            ReadAccessMode::Acquire => Ordering::Acquire,
            ReadAccessMode::Volatile => Ordering::SeqCst,
        }
    }
}

impl WriteAccessMode {
    /// Equivalent atomic ordering for a store
    pub fn ordering(self) -> Ordering {
        match self {
            WriteAccessMode::Plain | WriteAccessMode::Opaque => Ordering::Relaxed,
            WriteAccessMode::Release => Ordering::Release,
            WriteAccessMode::Volatile => Ordering::SeqCst,
        }
    }
}

/// Operation chosen for a compare-and-exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeStrategy {
    /// Plain read then conditional plain write
    Plain,
    /// Acquiring exchange, plain write side
    Acquire,
    /// Releasing exchange, plain read side
    Release,
    /// Sequentially consistent exchange
    SeqCst,
}

impl ExchangeStrategy {
    /// Narrowest operation satisfying both modes
    pub fn select(read: ReadAccessMode, write: WriteAccessMode) -> Self {
        match (read, write) {
            (ReadAccessMode::Plain, WriteAccessMode::Plain) => ExchangeStrategy::Plain,
            (r, WriteAccessMode::Plain) if r <= ReadAccessMode::Acquire => {
                ExchangeStrategy::Acquire
            }
            (ReadAccessMode::Plain, w) if w <= WriteAccessMode::Release => {
                ExchangeStrategy::Release
            }
            _ => ExchangeStrategy::SeqCst,
        }
    }
}

/// Width of a memory access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessWidth {
    /// 8-bit
    Bits8,
    /// 16-bit
    Bits16,
    /// 32-bit
    Bits32,
    /// 64-bit
    Bits64,
    /// Object reference
    Reference,
    /// Type id
    TypeId,
    /// Raw pointer
    Pointer,
}

impl fmt::Display for AccessWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessWidth::Bits8 => write!(f, "8-bit"),
            AccessWidth::Bits16 => write!(f, "16-bit"),
            AccessWidth::Bits32 => write!(f, "32-bit"),
            AccessWidth::Bits64 => write!(f, "64-bit"),
            AccessWidth::Reference => write!(f, "reference"),
            AccessWidth::TypeId => write!(f, "type id"),
            AccessWidth::Pointer => write!(f, "pointer"),
        }
    }
}

/// Memory cell contract violations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// The cell does not store values of this width
    InvalidAccess {
        /// Requested width
        width: AccessWidth,
        /// Cell kind
        cell: &'static str,
    },
    /// Byte offset past the end of the cell
    OutOfBounds {
        /// Byte offset of the access
        offset: usize,
        /// Cell size in bytes
        size: usize,
    },
    /// Byte offset not aligned to the access width
    Misaligned {
        /// Byte offset of the access
        offset: usize,
        /// Required alignment
        align: usize,
    },
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::InvalidAccess { width, cell } => {
                write!(f, "Invalid {} access to {}", width, cell)
            }
            MemoryError::OutOfBounds { offset, size } => {
                write!(f, "Offset {} out of bounds for memory of size {}", offset, size)
            }
            MemoryError::Misaligned { offset, align } => {
                write!(f, "Offset {} is not {}-byte aligned", offset, align)
            }
        }
    }
}

impl std::error::Error for MemoryError {}

/// Result of a memory access
pub type MemoryResult<T> = std::result::Result<T, MemoryError>;

/// A fixed-size typed storage region
///
/// Offsets are in bytes. Every access width has a default implementation
/// that rejects the access, so a cell only overrides the widths it stores.
pub trait Memory: fmt::Debug + Send + Sync {
    /// Short cell kind used in diagnostics
    fn kind(&self) -> &'static str;

    /// Size in bytes
    fn size(&self) -> usize;

    /// Load 8 bits
    fn load8(&self, offset: usize, mode: ReadAccessMode) -> MemoryResult<u8> {
        let _ = (offset, mode);
        Err(self.invalid(AccessWidth::Bits8))
    }

    /// Load 16 bits
    fn load16(&self, offset: usize, mode: ReadAccessMode) -> MemoryResult<u16> {
        let _ = (offset, mode);
        Err(self.invalid(AccessWidth::Bits16))
    }

    /// Load 32 bits
    fn load32(&self, offset: usize, mode: ReadAccessMode) -> MemoryResult<u32> {
        let _ = (offset, mode);
        Err(self.invalid(AccessWidth::Bits32))
    }

    /// Load 64 bits
    fn load64(&self, offset: usize, mode: ReadAccessMode) -> MemoryResult<u64> {
        let _ = (offset, mode);
        Err(self.invalid(AccessWidth::Bits64))
    }

    /// Load an object reference; `None` is null
    fn load_ref(&self, offset: usize, mode: ReadAccessMode) -> MemoryResult<Option<Pointer>> {
        let _ = (offset, mode);
        Err(self.invalid(AccessWidth::Reference))
    }

    /// Load a type id
    fn load_type_id(&self, offset: usize, mode: ReadAccessMode) -> MemoryResult<u32> {
        let _ = (offset, mode);
        Err(self.invalid(AccessWidth::TypeId))
    }

    /// Load a raw pointer; `None` is null
    fn load_pointer(&self, offset: usize, mode: ReadAccessMode) -> MemoryResult<Option<Pointer>> {
        let _ = (offset, mode);
        Err(self.invalid(AccessWidth::Pointer))
    }

    /// Store 8 bits
    fn store8(&self, offset: usize, value: u8, mode: WriteAccessMode) -> MemoryResult<()> {
        let _ = (offset, value, mode);
        Err(self.invalid(AccessWidth::Bits8))
    }

    /// Store 16 bits
    fn store16(&self, offset: usize, value: u16, mode: WriteAccessMode) -> MemoryResult<()> {
        let _ = (offset, value, mode);
        Err(self.invalid(AccessWidth::Bits16))
    }

    /// Store 32 bits
    fn store32(&self, offset: usize, value: u32, mode: WriteAccessMode) -> MemoryResult<()> {
        let _ = (offset, value, mode);
        Err(self.invalid(AccessWidth::Bits32))
    }

    /// Store 64 bits
    fn store64(&self, offset: usize, value: u64, mode: WriteAccessMode) -> MemoryResult<()> {
        let _ = (offset, value, mode);
        Err(self.invalid(AccessWidth::Bits64))
    }

    /// Store an object reference
    fn store_ref(
        &self,
        offset: usize,
        value: Option<Pointer>,
        mode: WriteAccessMode,
    ) -> MemoryResult<()> {
        let _ = (offset, value, mode);
        Err(self.invalid(AccessWidth::Reference))
    }

    /// Store a type id
    fn store_type_id(&self, offset: usize, value: u32, mode: WriteAccessMode) -> MemoryResult<()> {
        let _ = (offset, value, mode);
        Err(self.invalid(AccessWidth::TypeId))
    }

    /// Store a raw pointer
    fn store_pointer(
        &self,
        offset: usize,
        value: Option<Pointer>,
        mode: WriteAccessMode,
    ) -> MemoryResult<()> {
        let _ = (offset, value, mode);
        Err(self.invalid(AccessWidth::Pointer))
    }

    /// Compare-and-exchange 8 bits, returning the prior value
    fn compare_and_exchange8(
        &self,
        offset: usize,
        expect: u8,
        update: u8,
        read: ReadAccessMode,
        write: WriteAccessMode,
    ) -> MemoryResult<u8> {
        let _ = (offset, expect, update, read, write);
        Err(self.invalid(AccessWidth::Bits8))
    }

    /// Compare-and-exchange 16 bits, returning the prior value
    fn compare_and_exchange16(
        &self,
        offset: usize,
        expect: u16,
        update: u16,
        read: ReadAccessMode,
        write: WriteAccessMode,
    ) -> MemoryResult<u16> {
        let _ = (offset, expect, update, read, write);
        Err(self.invalid(AccessWidth::Bits16))
    }

    /// Compare-and-exchange 32 bits, returning the prior value
    fn compare_and_exchange32(
        &self,
        offset: usize,
        expect: u32,
        update: u32,
        read: ReadAccessMode,
        write: WriteAccessMode,
    ) -> MemoryResult<u32> {
        let _ = (offset, expect, update, read, write);
        Err(self.invalid(AccessWidth::Bits32))
    }

    /// Compare-and-exchange 64 bits, returning the prior value
    fn compare_and_exchange64(
        &self,
        offset: usize,
        expect: u64,
        update: u64,
        read: ReadAccessMode,
        write: WriteAccessMode,
    ) -> MemoryResult<u64> {
        let _ = (offset, expect, update, read, write);
        Err(self.invalid(AccessWidth::Bits64))
    }

    /// Compare-and-exchange an object reference, returning the prior value
    fn compare_and_exchange_ref(
        &self,
        offset: usize,
        expect: Option<Pointer>,
        update: Option<Pointer>,
        read: ReadAccessMode,
        write: WriteAccessMode,
    ) -> MemoryResult<Option<Pointer>> {
        let _ = (offset, expect, update, read, write);
        Err(self.invalid(AccessWidth::Reference))
    }

    /// Compare-and-exchange a type id, returning the prior value
    fn compare_and_exchange_type_id(
        &self,
        offset: usize,
        expect: u32,
        update: u32,
        read: ReadAccessMode,
        write: WriteAccessMode,
    ) -> MemoryResult<u32> {
        let _ = (offset, expect, update, read, write);
        Err(self.invalid(AccessWidth::TypeId))
    }

    /// Compare-and-exchange a raw pointer, returning the prior value
    fn compare_and_exchange_pointer(
        &self,
        offset: usize,
        expect: Option<Pointer>,
        update: Option<Pointer>,
        read: ReadAccessMode,
        write: WriteAccessMode,
    ) -> MemoryResult<Option<Pointer>> {
        let _ = (offset, expect, update, read, write);
        Err(self.invalid(AccessWidth::Pointer))
    }

    /// A new cell of `new_size` bytes holding this cell's prefix, zero-extended
    fn copy(&self, new_size: usize) -> Box<dyn Memory>;

    /// An exact duplicate
    fn clone_memory(&self) -> Box<dyn Memory> {
        self.copy(self.size())
    }

    /// A cell of the same size with zeroed contents
    fn clone_zeroed(&self) -> Box<dyn Memory>;

    /// Error for an unsupported width
    fn invalid(&self, width: AccessWidth) -> MemoryError {
        MemoryError::InvalidAccess {
            width,
            cell: self.kind(),
        }
    }
}

fn exchange_bool(
    cell: &AtomicBool,
    expect: bool,
    update: bool,
    read: ReadAccessMode,
    write: WriteAccessMode,
) -> bool {
    let result = match ExchangeStrategy::select(read, write) {
        ExchangeStrategy::Plain => {
            let current = cell.load(Ordering::Relaxed);
            if current == expect {
                cell.store(update, Ordering::Relaxed);
            }
            return current;
        }
        ExchangeStrategy::Acquire => {
            cell.compare_exchange(expect, update, Ordering::Acquire, Ordering::Acquire)
        }
        ExchangeStrategy::Release => {
            cell.compare_exchange(expect, update, Ordering::Release, Ordering::Relaxed)
        }
        ExchangeStrategy::SeqCst => {
            cell.compare_exchange(expect, update, Ordering::SeqCst, Ordering::SeqCst)
        }
    };
    match result {
        Ok(prior) | Err(prior) => prior,
    }
}

fn exchange_u64(
    cell: &AtomicU64,
    expect: u64,
    update: u64,
    read: ReadAccessMode,
    write: WriteAccessMode,
) -> u64 {
    let result = match ExchangeStrategy::select(read, write) {
        ExchangeStrategy::Plain => {
            let current = cell.load(Ordering::Relaxed);
            if current == expect {
                cell.store(update, Ordering::Relaxed);
            }
            return current;
        }
        ExchangeStrategy::Acquire => {
            cell.compare_exchange(expect, update, Ordering::Acquire, Ordering::Acquire)
        }
        ExchangeStrategy::Release => {
            cell.compare_exchange(expect, update, Ordering::Release, Ordering::Relaxed)
        }
        ExchangeStrategy::SeqCst => {
            cell.compare_exchange(expect, update, Ordering::SeqCst, Ordering::SeqCst)
        }
    };
    match result {
        Ok(prior) | Err(prior) => prior,
    }
}

/// Memory backed by a boolean array; only 8-bit accesses are valid
#[derive(Debug)]
pub struct BooleanArrayMemory {
    data: Box<[AtomicBool]>,
}

impl BooleanArrayMemory {
    /// Zeroed cell of `len` booleans
    pub fn new(len: usize) -> Self {
        Self {
            data: (0..len).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    /// Cell holding `values`
    pub fn from_values(values: &[bool]) -> Self {
        Self {
            data: values.iter().map(|&v| AtomicBool::new(v)).collect(),
        }
    }

    fn slot(&self, offset: usize) -> MemoryResult<&AtomicBool> {
        self.data.get(offset).ok_or(MemoryError::OutOfBounds {
            offset,
            size: self.data.len(),
        })
    }
}

impl Memory for BooleanArrayMemory {
    fn kind(&self) -> &'static str {
        "boolean array memory"
    }

    fn size(&self) -> usize {
        self.data.len()
    }

    fn load8(&self, offset: usize, mode: ReadAccessMode) -> MemoryResult<u8> {
        Ok(self.slot(offset)?.load(mode.ordering()) as u8)
    }

    fn store8(&self, offset: usize, value: u8, mode: WriteAccessMode) -> MemoryResult<()> {
        self.slot(offset)?.store(value != 0, mode.ordering());
        Ok(())
    }

    fn compare_and_exchange8(
        &self,
        offset: usize,
        expect: u8,
        update: u8,
        read: ReadAccessMode,
        write: WriteAccessMode,
    ) -> MemoryResult<u8> {
        let prior = exchange_bool(self.slot(offset)?, expect != 0, update != 0, read, write);
        Ok(prior as u8)
    }

    fn copy(&self, new_size: usize) -> Box<dyn Memory> {
        let values: Vec<bool> = (0..new_size)
            .map(|i| {
                self.data
                    .get(i)
                    .map(|v| v.load(Ordering::Relaxed))
                    .unwrap_or(false)
            })
            .collect();
        Box::new(Self::from_values(&values))
    }

    fn clone_zeroed(&self) -> Box<dyn Memory> {
        Box::new(Self::new(self.data.len()))
    }
}

/// Memory backed by a 64-bit integer array; only aligned 64-bit accesses are valid
#[derive(Debug)]
pub struct LongArrayMemory {
    data: Box<[AtomicU64]>,
}

impl LongArrayMemory {
    /// Zeroed cell of `len` longs
    pub fn new(len: usize) -> Self {
        Self {
            data: (0..len).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Cell holding `values`
    pub fn from_values(values: &[u64]) -> Self {
        Self {
            data: values.iter().map(|&v| AtomicU64::new(v)).collect(),
        }
    }

    fn slot(&self, offset: usize) -> MemoryResult<&AtomicU64> {
        if offset % 8 != 0 {
            return Err(MemoryError::Misaligned { offset, align: 8 });
        }
        self.data.get(offset / 8).ok_or(MemoryError::OutOfBounds {
            offset,
            size: self.size(),
        })
    }
}

impl Memory for LongArrayMemory {
    fn kind(&self) -> &'static str {
        "long array memory"
    }

    fn size(&self) -> usize {
        self.data.len() * 8
    }

    fn load64(&self, offset: usize, mode: ReadAccessMode) -> MemoryResult<u64> {
        Ok(self.slot(offset)?.load(mode.ordering()))
    }

    fn store64(&self, offset: usize, value: u64, mode: WriteAccessMode) -> MemoryResult<()> {
        self.slot(offset)?.store(value, mode.ordering());
        Ok(())
    }

    fn compare_and_exchange64(
        &self,
        offset: usize,
        expect: u64,
        update: u64,
        read: ReadAccessMode,
        write: WriteAccessMode,
    ) -> MemoryResult<u64> {
        Ok(exchange_u64(self.slot(offset)?, expect, update, read, write))
    }

    /// `new_size` is rounded up to whole longs
    fn copy(&self, new_size: usize) -> Box<dyn Memory> {
        let len = (new_size + 7) / 8;
        let values: Vec<u64> = (0..len)
            .map(|i| {
                self.data
                    .get(i)
                    .map(|v| v.load(Ordering::Relaxed))
                    .unwrap_or(0)
            })
            .collect();
        Box::new(Self::from_values(&values))
    }

    fn clone_zeroed(&self) -> Box<dyn Memory> {
        Box::new(Self::new(self.data.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_strategy_selection() {
        use ReadAccessMode as R;
        use WriteAccessMode as W;
        assert_eq!(ExchangeStrategy::select(R::Plain, W::Plain), ExchangeStrategy::Plain);
        assert_eq!(ExchangeStrategy::select(R::Acquire, W::Plain), ExchangeStrategy::Acquire);
        assert_eq!(ExchangeStrategy::select(R::Opaque, W::Plain), ExchangeStrategy::Acquire);
        assert_eq!(ExchangeStrategy::select(R::Plain, W::Release), ExchangeStrategy::Release);
        assert_eq!(ExchangeStrategy::select(R::Volatile, W::Plain), ExchangeStrategy::SeqCst);
        assert_eq!(ExchangeStrategy::select(R::Acquire, W::Release), ExchangeStrategy::SeqCst);
    }

    #[test]
    fn test_access_mode_order() {
        assert!(ReadAccessMode::Plain < ReadAccessMode::Opaque);
        assert!(ReadAccessMode::Acquire < ReadAccessMode::Volatile);
        assert!(WriteAccessMode::Opaque < WriteAccessMode::Release);
    }

    #[test]
    fn test_long_memory_alignment() {
        let memory = LongArrayMemory::new(2);
        assert_eq!(memory.size(), 16);
        memory.store64(8, 42, WriteAccessMode::Plain).unwrap();
        assert_eq!(memory.load64(8, ReadAccessMode::Plain).unwrap(), 42);
        assert_eq!(
            memory.load64(4, ReadAccessMode::Plain),
            Err(MemoryError::Misaligned { offset: 4, align: 8 })
        );
        assert!(matches!(
            memory.load32(0, ReadAccessMode::Plain),
            Err(MemoryError::InvalidAccess { width: AccessWidth::Bits32, .. })
        ));
    }

    #[test]
    fn test_boolean_out_of_bounds() {
        let memory = BooleanArrayMemory::new(1);
        assert_eq!(
            memory.load8(1, ReadAccessMode::Plain),
            Err(MemoryError::OutOfBounds { offset: 1, size: 1 })
        );
    }
}
