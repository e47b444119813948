//! Dispatch table construction and emission tests

use kiln::compiler::diagnostics::Diagnostics;
use kiln::compiler::dispatch::{DispatchTables, TableKind, ITABLE_DICTS_SYMBOL, VTABLES_SYMBOL};
use kiln::compiler::object::ProgramModule;
use kiln::compiler::program::{
    AllReachable, ClassBuilder, ClassDefinition, MethodDescriptor, MethodElement, MethodFlags,
    Program,
};
use std::sync::Arc;
use std::thread;

fn tables() -> DispatchTables {
    DispatchTables::new(Arc::new(AllReachable), 8, 4)
}

/// `A { f, g }` and `B extends A { g, h }`
fn hierarchy() -> (Arc<ClassDefinition>, Arc<ClassDefinition>) {
    let a = ClassBuilder::new("A", 20)
        .method("f", "()V")
        .method("g", "()I")
        .build()
        .unwrap();
    let b = ClassBuilder::new("B", 21)
        .extends(&a)
        .method("g", "()I")
        .method("h", "(J)V")
        .build()
        .unwrap();
    (a, b)
}

fn selector(class: &str, name: &str, descriptor: &str) -> MethodElement {
    MethodElement::new(
        class,
        name,
        MethodDescriptor::parse(descriptor).unwrap(),
        MethodFlags::default(),
        true,
    )
}

#[test]
fn test_vtable_has_one_slot_per_reachable_method() {
    let mut builder = ClassBuilder::new("Wide", 20);
    for i in 0..7 {
        builder = builder.method(&format!("m{}", i), "()V");
    }
    let class = builder.static_method("s", "()V").build().unwrap();

    let tables = DispatchTables::new(Arc::new(AllReachable), 4, 4);
    let table = tables.build_vtable(&class).unwrap();
    assert_eq!(table.kind(), TableKind::Virtual);
    assert_eq!(table.len(), 7);
    assert_eq!(table.ty().size, 28);
    assert_eq!(table.ty().members[6].offset, 24);
}

#[test]
fn test_overrides_keep_inherited_slot_numbers() {
    let (a, b) = hierarchy();
    let tables = tables();
    let diagnostics = Diagnostics::new();

    let vtable = tables.build_vtable(&b).unwrap();
    let slots: Vec<String> = vtable.slots().iter().map(|m| m.to_string()).collect();
    assert_eq!(slots, vec!["A.f()V", "B.g()I", "B.h(J)V"]);

    let g = selector("A", "g", "()I");
    let in_a = tables.get_vtable_index(&diagnostics, None, &g, &a).unwrap();
    let in_b = tables.get_vtable_index(&diagnostics, None, &g, &b).unwrap();
    assert_eq!(in_a, 1);
    assert_eq!(in_a, in_b);
    assert_eq!(diagnostics.error_count(), 0);
}

#[test]
fn test_emitted_vtable_points_at_overrides() {
    let (a, b) = hierarchy();
    let tables = tables();
    let module = ProgramModule::new("test", false);
    let diagnostics = Diagnostics::new();
    tables.emit_vtable(&module, &diagnostics, &a).unwrap();
    tables.emit_vtable(&module, &diagnostics, &b).unwrap();
    // a second request emits nothing new
    tables.emit_vtable(&module, &diagnostics, &b).unwrap();

    let data = module.data("vtable-B").unwrap();
    assert_eq!(data.ty.to_string(), "{ ptr, ptr, ptr }");
    assert_eq!(
        data.value.to_string(),
        r#"{ ptr @"A.f()V", ptr @"B.g()I", ptr @"B.h(J)V" }"#
    );
    assert!(module.is_declared("B.h(J)V"));
    assert_eq!(tables.statistics().vtables, 2);
    assert_eq!(tables.statistics().vtable_slots, 5);
}

#[test]
fn test_missing_vtable_entry_is_reported() {
    let (a, _) = hierarchy();
    let tables = tables();
    let diagnostics = Diagnostics::new();
    let missing = selector("A", "nope", "()V");
    let index = tables
        .get_vtable_index(&diagnostics, None, &missing, &a)
        .unwrap();
    assert_eq!(index, 0);
    assert_eq!(diagnostics.error_count(), 1);
    assert!(diagnostics.error_messages()[0].contains("No vtable entry found for A.nope()V"));
    assert!(diagnostics.check().is_err());
}

#[test]
fn test_method_without_body_is_reported() {
    let class = ClassBuilder::new("Hollow", 20)
        .method_with_flags("run", "()V", MethodFlags::default(), false)
        .native_method("poke", "()V", false)
        .build()
        .unwrap();
    let tables = tables();
    let module = ProgramModule::new("test", false);
    let diagnostics = Diagnostics::new();
    tables.emit_vtable(&module, &diagnostics, &class).unwrap();

    let value = module.data("vtable-Hollow").unwrap().value.to_string();
    assert_eq!(value.matches("@kiln_raise_unsatisfied_link_error").count(), 2);
    // only the non-native method is a user error
    assert_eq!(diagnostics.error_count(), 1);
    assert!(diagnostics.error_messages()[0]
        .contains("Missing method implementation for vtable of Hollow: Hollow.run()V"));
}

#[test]
fn test_itable_slots_resolve_against_the_class() {
    let runnable = ClassBuilder::interface("Runnable", 20)
        .abstract_method("run", "()V")
        .abstract_method("stop", "()V")
        .build()
        .unwrap();
    let task = ClassBuilder::new("Task", 21)
        .implements(&runnable)
        .method("run", "()V")
        .build()
        .unwrap();

    let tables = tables();
    let module = ProgramModule::new("test", false);
    let diagnostics = Diagnostics::new();
    tables
        .emit_class_itables(&module, &diagnostics, &task)
        .unwrap();

    let itable = module.data("itable-Task-Runnable").unwrap();
    assert_eq!(
        itable.value.to_string(),
        r#"{ ptr @"Task.run()V", ptr @kiln_raise_abstract_method_error }"#
    );
    assert_eq!(diagnostics.error_count(), 0);
}

#[test]
fn test_conflicting_defaults_point_at_icce_stub() {
    let left = ClassBuilder::interface("Left", 20)
        .method("greet", "()V")
        .build()
        .unwrap();
    let right = ClassBuilder::interface("Right", 21)
        .method("greet", "()V")
        .build()
        .unwrap();
    let both = ClassBuilder::new("Both", 22)
        .implements(&left)
        .implements(&right)
        .build()
        .unwrap();

    let tables = tables();
    let module = ProgramModule::new("test", false);
    let diagnostics = Diagnostics::new();
    tables
        .emit_class_itables(&module, &diagnostics, &both)
        .unwrap();

    for symbol in ["itable-Both-Left", "itable-Both-Right"] {
        let itable = module.data(symbol).unwrap();
        assert_eq!(
            itable.value.to_string(),
            "{ ptr @kiln_raise_incompatible_class_change_error }"
        );
    }
    assert!(module.is_declared("kiln_raise_incompatible_class_change_error"));
    assert_eq!(diagnostics.error_count(), 0);
}

#[test]
fn test_missing_itable_entry_is_reported() {
    let closeable = ClassBuilder::interface("Closeable", 20)
        .abstract_method("close", "()V")
        .build()
        .unwrap();
    let tables = tables();
    let diagnostics = Diagnostics::new();
    let itable = tables.build_itable(&closeable).unwrap();
    assert_eq!(itable.kind(), TableKind::Interface);

    let close = selector("Closeable", "close", "()V");
    assert_eq!(
        tables
            .get_itable_index(&diagnostics, None, &close, &closeable)
            .unwrap(),
        0
    );
    assert_eq!(diagnostics.error_count(), 0);

    let open = selector("Closeable", "open", "()V");
    tables
        .get_itable_index(&diagnostics, None, &open, &closeable)
        .unwrap();
    assert_eq!(diagnostics.error_count(), 1);
    assert!(diagnostics.error_messages()[0].contains("No itable entry found"));
}

#[test]
fn test_dictionary_sorted_by_type_id_with_sentinel() {
    let second = ClassBuilder::interface("Second", 31)
        .abstract_method("b", "()V")
        .build()
        .unwrap();
    let first = ClassBuilder::interface("First", 30)
        .abstract_method("a", "()V")
        .build()
        .unwrap();
    let marker = ClassBuilder::interface("Marker", 29).build().unwrap();
    let class = ClassBuilder::new("Both", 40)
        .implements(&second)
        .implements(&marker)
        .implements(&first)
        .method("a", "()V")
        .method("b", "()V")
        .build()
        .unwrap();

    let tables = tables();
    let module = ProgramModule::new("test", false);
    let diagnostics = Diagnostics::new();
    tables
        .emit_class_itables(&module, &diagnostics, &class)
        .unwrap();

    let dictionary = module.data("itable-dict-Both").unwrap();
    assert_eq!(dictionary.ty.to_string(), "[3 x { ptr, i32 }]");
    assert_eq!(
        dictionary.value.to_string(),
        r#"[{ ptr, i32 } { ptr @"itable-Both-First", i32 30 }, { ptr, i32 } { ptr @"itable-Both-Second", i32 31 }, { ptr, i32 } zeroinitializer]"#
    );
    // the empty marker itable is never emitted
    assert!(module.data("itable-Both-Marker").is_none());
    assert_eq!(tables.statistics().dictionaries, 1);
    assert_eq!(tables.statistics().itables, 2);
}

#[test]
fn test_global_arrays_index_concrete_classes_by_type_id() {
    let shape = ClassBuilder::new("Shape", 19)
        .abstract_class()
        .abstract_method("area", "()D")
        .build()
        .unwrap();
    let circle = ClassBuilder::new("Circle", 21)
        .extends(&shape)
        .method("area", "()D")
        .build()
        .unwrap();
    let mut program = Program::new();
    program.add(shape).unwrap();
    program.add(circle).unwrap();

    let tables = tables();
    let module = ProgramModule::new("test", false);
    tables.emit_vtable_array(&module, &program).unwrap();
    tables.emit_itable_dict_array(&module, &program).unwrap();

    let vtables = module.data(VTABLES_SYMBOL).unwrap();
    assert_eq!(vtables.ty.to_string(), "[22 x ptr]");
    let rendered = vtables.value.to_string();
    assert!(rendered.ends_with(r#"ptr null, ptr null, ptr @"vtable-Circle"]"#));
    assert_eq!(rendered.matches("ptr null").count(), 21);

    let dicts = module.data(ITABLE_DICTS_SYMBOL).unwrap();
    assert_eq!(dicts.ty.to_string(), "[22 x ptr]");
    assert!(!dicts.value.to_string().contains("itable-dict-Circle"));
    assert_eq!(dicts.value.to_string().matches("ptr null").count(), 22);
}

#[test]
fn test_classes_without_interfaces_get_no_dictionary() {
    let runnable = ClassBuilder::interface("Runnable", 24)
        .abstract_method("run", "()V")
        .build()
        .unwrap();
    let marker = ClassBuilder::interface("Marker", 25).build().unwrap();
    let task = ClassBuilder::new("Task", 26)
        .implements(&runnable)
        .method("run", "()V")
        .build()
        .unwrap();
    let plain = ClassBuilder::new("Plain", 27).build().unwrap();
    let tagged = ClassBuilder::new("Tagged", 28)
        .implements(&marker)
        .build()
        .unwrap();
    let mut program = Program::new();
    for class in [&runnable, &marker, &task, &plain, &tagged] {
        program.add(class.clone()).unwrap();
    }

    let tables = tables();
    let module = ProgramModule::new("test", false);
    let diagnostics = Diagnostics::new();
    for class in [&task, &plain, &tagged] {
        tables
            .emit_class_itables(&module, &diagnostics, class)
            .unwrap();
    }
    tables.emit_itable_dict_array(&module, &program).unwrap();

    assert!(module.data("itable-dict-Task").is_some());
    assert!(module.data("itable-dict-Plain").is_none());
    assert!(module.data("itable-dict-Tagged").is_none());
    assert_eq!(tables.statistics().dictionaries, 1);

    let dicts = module.data(ITABLE_DICTS_SYMBOL).unwrap().value.to_string();
    assert!(dicts.ends_with(r#"ptr @"itable-dict-Task", ptr null, ptr null]"#));
    assert_eq!(dicts.matches("ptr @").count(), 1);
    assert_eq!(diagnostics.error_count(), 0);
}

#[test]
fn test_dictionary_entry_layout() {
    let entry = DispatchTables::new(Arc::new(AllReachable), 8, 4).dictionary_entry_type();
    assert_eq!(entry.members[0].name, "itable");
    assert_eq!(entry.members[1].name, "typeId");
    assert_eq!(entry.members[1].offset, 8);
}

#[test]
fn test_concurrent_builds_converge() {
    let (_, b) = hierarchy();
    let tables = Arc::new(tables());
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let tables = tables.clone();
            let b = b.clone();
            thread::spawn(move || tables.build_vtable(&b).unwrap())
        })
        .collect();
    let built: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let canonical = tables.vtable(21).unwrap();
    for table in built {
        assert!(Arc::ptr_eq(&table, &canonical));
    }
}
