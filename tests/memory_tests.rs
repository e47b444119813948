//! Memory cell tests

use kiln::compiler::memory::{
    AccessWidth, BooleanArrayMemory, LongArrayMemory, Memory, MemoryError, ReadAccessMode,
    WriteAccessMode,
};
use kiln::compiler::pointer::Pointer;
use kiln::compiler::types::Type;
use std::sync::Arc;
use std::thread;

const MODE_PAIRS: [(ReadAccessMode, WriteAccessMode); 4] = [
    (ReadAccessMode::Plain, WriteAccessMode::Plain),
    (ReadAccessMode::Acquire, WriteAccessMode::Plain),
    (ReadAccessMode::Plain, WriteAccessMode::Release),
    (ReadAccessMode::Volatile, WriteAccessMode::Volatile),
];

#[test]
fn test_boolean_compare_and_exchange_in_every_mode() {
    for (read, write) in MODE_PAIRS {
        let memory = BooleanArrayMemory::new(2);

        // success returns the expected prior value and installs the update
        assert_eq!(memory.compare_and_exchange8(1, 0, 1, read, write).unwrap(), 0);
        assert_eq!(memory.load8(1, ReadAccessMode::Plain).unwrap(), 1);

        // failure returns the actual value and leaves it alone
        assert_eq!(memory.compare_and_exchange8(1, 0, 0, read, write).unwrap(), 1);
        assert_eq!(memory.load8(1, ReadAccessMode::Plain).unwrap(), 1);
        assert_eq!(memory.load8(0, ReadAccessMode::Plain).unwrap(), 0);
    }
}

#[test]
fn test_long_compare_and_exchange_in_every_mode() {
    for (read, write) in MODE_PAIRS {
        let memory = LongArrayMemory::from_values(&[7, 9]);
        assert_eq!(memory.compare_and_exchange64(8, 9, 11, read, write).unwrap(), 9);
        assert_eq!(memory.load64(8, ReadAccessMode::Plain).unwrap(), 11);
        assert_eq!(memory.compare_and_exchange64(0, 1, 2, read, write).unwrap(), 7);
        assert_eq!(memory.load64(0, ReadAccessMode::Plain).unwrap(), 7);
    }
}

#[test]
fn test_boolean_memory_rejects_wide_accesses() {
    let memory = BooleanArrayMemory::new(8);
    let invalid = |width| MemoryError::InvalidAccess {
        width,
        cell: "boolean array memory",
    };

    assert_eq!(
        memory.load16(0, ReadAccessMode::Plain),
        Err(invalid(AccessWidth::Bits16))
    );
    assert_eq!(
        memory.load32(0, ReadAccessMode::Acquire),
        Err(invalid(AccessWidth::Bits32))
    );
    assert_eq!(
        memory.store64(0, 1, WriteAccessMode::Release),
        Err(invalid(AccessWidth::Bits64))
    );
    assert_eq!(
        memory.compare_and_exchange32(0, 0, 1, ReadAccessMode::Plain, WriteAccessMode::Plain),
        Err(invalid(AccessWidth::Bits32))
    );
    assert!(matches!(
        memory.load_ref(0, ReadAccessMode::Plain),
        Err(MemoryError::InvalidAccess {
            width: AccessWidth::Reference,
            ..
        })
    ));
    assert!(matches!(
        memory.store_type_id(0, 3, WriteAccessMode::Plain),
        Err(MemoryError::InvalidAccess {
            width: AccessWidth::TypeId,
            ..
        })
    ));
}

fn assert_rejects_wide_exchanges(memory: &dyn Memory, cell: &'static str) {
    let invalid = |width| MemoryError::InvalidAccess { width, cell };
    let target = Some(Pointer::global("target", Type::signed(8)));
    for (read, write) in MODE_PAIRS {
        assert_eq!(
            memory.compare_and_exchange_ref(0, None, target.clone(), read, write),
            Err(invalid(AccessWidth::Reference))
        );
        assert_eq!(
            memory.compare_and_exchange_type_id(0, 0, 21, read, write),
            Err(invalid(AccessWidth::TypeId))
        );
        assert_eq!(
            memory.compare_and_exchange_pointer(0, None, target.clone(), read, write),
            Err(invalid(AccessWidth::Pointer))
        );
    }
}

#[test]
fn test_reference_type_id_and_pointer_exchanges_are_rejected() {
    let booleans = BooleanArrayMemory::new(8);
    assert_rejects_wide_exchanges(&booleans, "boolean array memory");
    // nothing was written
    assert_eq!(booleans.load8(0, ReadAccessMode::Plain).unwrap(), 0);

    let longs = LongArrayMemory::from_values(&[5]);
    assert_rejects_wide_exchanges(&longs, "long array memory");
    assert_eq!(longs.load64(0, ReadAccessMode::Plain).unwrap(), 5);
}

#[test]
fn test_boolean_store_normalizes_to_one() {
    let memory = BooleanArrayMemory::new(1);
    memory.store8(0, 0x80, WriteAccessMode::Opaque).unwrap();
    assert_eq!(memory.load8(0, ReadAccessMode::Opaque).unwrap(), 1);
}

#[test]
fn test_copy_zero_extends_and_truncates() {
    let memory = BooleanArrayMemory::from_values(&[true, false, true]);
    let longer = memory.copy(5);
    assert_eq!(longer.size(), 5);
    assert_eq!(longer.load8(2, ReadAccessMode::Plain).unwrap(), 1);
    assert_eq!(longer.load8(4, ReadAccessMode::Plain).unwrap(), 0);

    let shorter = memory.copy(1);
    assert_eq!(shorter.size(), 1);
    assert!(shorter.load8(1, ReadAccessMode::Plain).is_err());

    let zeroed = memory.clone_zeroed();
    assert_eq!(zeroed.size(), 3);
    assert_eq!(zeroed.load8(0, ReadAccessMode::Plain).unwrap(), 0);

    // copies are independent of the original
    let copy = memory.clone_memory();
    memory.store8(0, 0, WriteAccessMode::Plain).unwrap();
    assert_eq!(copy.load8(0, ReadAccessMode::Plain).unwrap(), 1);
}

#[test]
fn test_long_copy_rounds_up() {
    let memory = LongArrayMemory::from_values(&[1, 2]);
    let copy = memory.copy(9);
    assert_eq!(copy.size(), 16);
    assert_eq!(copy.load64(8, ReadAccessMode::Plain).unwrap(), 2);
}

#[test]
fn test_concurrent_increments_are_not_lost() {
    let memory = Arc::new(LongArrayMemory::new(1));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let memory = memory.clone();
            thread::spawn(move || {
                for _ in 0..1000 {
                    loop {
                        let current = memory.load64(0, ReadAccessMode::Acquire).unwrap();
                        let prior = memory
                            .compare_and_exchange64(
                                0,
                                current,
                                current + 1,
                                ReadAccessMode::Volatile,
                                WriteAccessMode::Volatile,
                            )
                            .unwrap();
                        if prior == current {
                            break;
                        }
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(memory.load64(0, ReadAccessMode::Plain).unwrap(), 4000);
}
