//! Pointer model tests
//!
//! Byte offsets resolve to the most specific structured pointer while the
//! cumulative offset from the root is preserved.

use kiln::compiler::pointer::{Pointer, PointerError, PointerKind, RootPointer};
use kiln::compiler::program::ClassBuilder;
use kiln::compiler::types::{CompoundType, Type};
use proptest::prelude::*;
use std::sync::Arc;

/// `{ i32 tag; i64 value; [4 x i16] lanes }`
fn record() -> Type {
    Type::Compound(Arc::new(CompoundType::layout_struct(
        "record",
        vec![
            ("tag".to_string(), Type::signed(4)),
            ("value".to_string(), Type::signed(8)),
            ("lanes".to_string(), Type::array(Type::signed(2), 4)),
        ],
    )))
}

#[test]
fn test_member_then_element_resolution() {
    let ptr = Pointer::global("table", record());
    // lanes start at 16, lane 2 at 20
    let lane = ptr.offset_in_bytes(20, false).unwrap();
    match lane.kind() {
        PointerKind::Element { base, index } => {
            assert_eq!(*index, 2);
            assert!(matches!(base.kind(), PointerKind::Member { index: 2, .. }));
        }
        other => panic!("expected element pointer, got {:?}", other),
    }
    assert_eq!(lane.root_byte_offset(), 20);
    assert_eq!(lane.pointee(), &Type::signed(2));
    assert_eq!(lane.to_string(), "&(&(&table)->lanes)[2]");
}

#[test]
fn test_padding_and_scalar_interiors_do_not_resolve() {
    let ptr = Pointer::global("table", record());
    // bytes 4..8 are padding after `tag`, past the end of the i32
    let err = ptr.offset_in_bytes(6, false).unwrap_err();
    assert!(matches!(err, PointerError::OutOfBounds { offset: 6, size: 4, .. }));

    // inside `tag` there is nothing finer to resolve to
    let err = ptr.offset_in_bytes(2, false).unwrap_err();
    assert!(matches!(err, PointerError::Unattributable { offset: 2, .. }));
}

#[test]
fn test_object_field_resolution() {
    let class = ClassBuilder::new("Point", 20)
        .field("x", "I")
        .field("y", "I")
        .build()
        .unwrap();
    let ptr = Pointer::global("origin", Type::Object(class));
    let y = ptr.offset_in_bytes(12, false).unwrap();
    assert!(matches!(y.kind(), PointerKind::InstanceField { name, .. } if name == "y"));
    assert_eq!(y.root_byte_offset(), 12);

    // the header has no field
    assert!(ptr.offset_in_bytes(4, false).is_err());
}

#[test]
fn test_sibling_reinterpretation_happens_once() {
    let ptr = Pointer::global("table", record());
    let size = record().size();
    let next = ptr.offset_in_bytes(size + 8, true).unwrap();
    assert_eq!(next.root_byte_offset(), size + 8);

    // without the reinterpretation the end of the pointee is outside it
    let err = ptr.offset_in_bytes(size, false).unwrap_err();
    assert!(matches!(err, PointerError::OutOfBounds { .. }));
}

#[test]
fn test_equality_ignores_derivation() {
    let ptr = Pointer::global("table", record());
    let via_member = ptr.member(1).unwrap();
    let via_offset = ptr.offset_in_bytes(8, false).unwrap();
    assert_eq!(via_member, via_offset);
    assert_ne!(via_member, Pointer::global("other", record()).member(1).unwrap());
}

#[test]
fn test_memory_root_has_no_symbol() {
    let ptr = Pointer::memory(3, Type::signed(8));
    assert_eq!(ptr.root(), &RootPointer::Memory { id: 3 });
    assert!(ptr.root().symbol().is_none());
    assert_eq!(ptr.to_string(), "&memory#3");
}

#[test]
fn test_wrong_pointee_errors() {
    let ptr = Pointer::global("g", Type::signed(4));
    assert!(matches!(ptr.element(0), Err(PointerError::WrongPointee { .. })));
    assert!(matches!(ptr.member(0), Err(PointerError::WrongPointee { .. })));
    assert!(matches!(
        Pointer::global("r", record()).member(9),
        Err(PointerError::NoSuchMember { .. })
    ));
}

#[test]
fn test_offset_overflow_is_reported_not_wrapped() {
    let wide = Pointer::global("wide", Type::signed(8));
    assert!(matches!(
        wide.offset_by_elements(i64::MAX / 4),
        Err(PointerError::Overflow { .. })
    ));

    let arr = Pointer::global("arr", Type::array(Type::signed(8), 4));
    assert!(matches!(arr.element(i64::MAX), Err(PointerError::Overflow { .. })));

    // the stride itself fits, adding the member offset does not
    let value = Pointer::global("table", record()).member(1).unwrap();
    assert_eq!(value.root_byte_offset(), 8);
    assert!(matches!(
        value.offset_in_bytes(i64::MAX, true),
        Err(PointerError::Overflow { .. })
    ));
}

proptest! {
    #[test]
    fn prop_array_offsets_resolve_to_elements(count in 1i64..64, index in 0i64..64) {
        prop_assume!(index < count);
        let ptr = Pointer::global("arr", Type::array(Type::signed(4), count));
        let element = ptr.offset_in_bytes(index * 4, false).unwrap();
        prop_assert_eq!(element.root_byte_offset(), index * 4);
        prop_assert_eq!(element, ptr.element(index).unwrap());
    }

    #[test]
    fn prop_sibling_strides_preserve_offset(stride in -16i64..16, member in 0usize..2) {
        let ptr = Pointer::global("table", record());
        let size = record().size();
        let member_offset = if member == 0 { 0 } else { 8 };
        let offset = stride * size + member_offset;
        let resolved = ptr.offset_in_bytes(offset, true).unwrap();
        prop_assert_eq!(resolved.root_byte_offset(), offset);
    }

    #[test]
    fn prop_resolution_without_siblings_stays_in_bounds(offset in -64i64..64) {
        let ptr = Pointer::global("table", record());
        let size = record().size();
        if let Ok(resolved) = ptr.offset_in_bytes(offset, false) {
            prop_assert!((0..size).contains(&resolved.root_byte_offset()));
            prop_assert_eq!(resolved.root_byte_offset(), offset);
        } else {
            prop_assert!(offset != 0);
        }
    }
}
