//! # Dispatch tables
//!
//! Built once whole-program reachability is final.
//!
//! - A **vtable** lists a class's reachable instance methods in the order
//!   [`ClassDefinition::instance_methods`] yields them. Inherited slots keep
//!   the superclass numbering; overrides replace the inherited entry.
//! - An **itable** lists an interface's reachable methods. Each concrete
//!   class gets its own copy per implemented interface, with every slot
//!   resolved against the class.
//! - An **itable dictionary** per concrete class holds one
//!   `{ ptr itable, i32 typeId }` entry per implemented interface with a
//!   non-empty itable, sorted by type id and closed by a zero sentinel.
//! - Two **global arrays** indexed by type id point at each concrete class's
//!   vtable and dictionary. Every other slot is null.
//!
//! Slots that cannot be called successfully point at a runtime helper that
//! raises the matching error instead of being left null.

use crate::compiler::diagnostics::Diagnostics;
use crate::compiler::graph::NodeInfo;
use crate::compiler::llvm::{Constant, LlvmType};
use crate::compiler::lowering::map_signature;
use crate::compiler::object::{Linkage, ProgramModule};
use crate::compiler::program::{ClassDefinition, MethodElement, Program, Reachability};
use crate::compiler::runtime::RuntimeHelper;
use crate::compiler::types::{CompoundTag, CompoundType, Member, Type};
use crate::error::{Error, Result};
use dashmap::{DashMap, DashSet};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Symbol of the type-id indexed vtable array
pub const VTABLES_SYMBOL: &str = "kiln_vtables";

/// Symbol of the type-id indexed itable dictionary array
pub const ITABLE_DICTS_SYMBOL: &str = "kiln_itable_dicts";

/// Vtable or itable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    /// Per-class virtual table
    Virtual,
    /// Per-interface table
    Interface,
}

/// Slot layout of one dispatch table
#[derive(Debug)]
pub struct TableInfo {
    kind: TableKind,
    owner: Arc<ClassDefinition>,
    slots: Vec<Arc<MethodElement>>,
    ty: Arc<CompoundType>,
    symbol: String,
}

impl TableInfo {
    fn new(
        kind: TableKind,
        owner: Arc<ClassDefinition>,
        slots: Vec<Arc<MethodElement>>,
        symbol: String,
        pointer_size: i64,
    ) -> Self {
        let members = slots
            .iter()
            .enumerate()
            .map(|(i, method)| Member {
                name: format!("m{}", i),
                offset: i as i64 * pointer_size,
                ty: Type::pointer_to(Type::Function(Arc::new(method.function_type()))),
                align: pointer_size,
            })
            .collect();
        let ty = CompoundType::new(
            CompoundTag::Struct,
            symbol.clone(),
            slots.len() as i64 * pointer_size,
            pointer_size,
            members,
        );
        Self {
            kind,
            owner,
            slots,
            ty: Arc::new(ty),
            symbol,
        }
    }

    /// Vtable or itable
    pub fn kind(&self) -> TableKind {
        self.kind
    }

    /// Class (vtable) or interface (itable) the table belongs to
    pub fn owner(&self) -> &Arc<ClassDefinition> {
        &self.owner
    }

    /// Methods in slot order
    pub fn slots(&self) -> &[Arc<MethodElement>] {
        &self.slots
    }

    /// Layout with one function pointer member per slot
    pub fn ty(&self) -> &Arc<CompoundType> {
        &self.ty
    }

    /// Data symbol of the emitted table
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when no method survived filtering
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slot holding the method with this selector
    pub fn index_of(&self, method: &MethodElement) -> Option<usize> {
        self.slots.iter().position(|m| m.same_selector(method))
    }
}

/// Counts of emitted tables
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStatistics {
    /// Emitted vtables
    pub vtables: usize,
    /// Total vtable slots
    pub vtable_slots: usize,
    /// Emitted per-class itables
    pub itables: usize,
    /// Total per-class itable slots
    pub itable_slots: usize,
    /// Emitted itable dictionaries
    pub dictionaries: usize,
}

impl fmt::Display for DispatchStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} vtables ({} slots), {} itables ({} slots), {} dictionaries",
            self.vtables, self.vtable_slots, self.itables, self.itable_slots, self.dictionaries
        )
    }
}

#[derive(Debug, Default)]
struct Counters {
    vtables: AtomicUsize,
    vtable_slots: AtomicUsize,
    itables: AtomicUsize,
    itable_slots: AtomicUsize,
    dictionaries: AtomicUsize,
}

/// Outcome of resolving one slot against a class
enum SlotTarget {
    Method(Arc<MethodElement>),
    Stub(RuntimeHelper),
}

/// Program-wide dispatch tables
pub struct DispatchTables {
    reachability: Arc<dyn Reachability>,
    pointer_size: i64,
    type_id_size: i64,
    vtables: DashMap<u32, Arc<TableInfo>>,
    itables: DashMap<u32, Arc<TableInfo>>,
    emitted: DashSet<String>,
    counters: Counters,
}

impl fmt::Debug for DispatchTables {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTables")
            .field("pointer_size", &self.pointer_size)
            .field("vtables", &self.vtables.len())
            .field("itables", &self.itables.len())
            .finish()
    }
}

impl DispatchTables {
    /// Empty table set filtering methods through `reachability`
    pub fn new(reachability: Arc<dyn Reachability>, pointer_size: i64, type_id_size: i64) -> Self {
        Self {
            reachability,
            pointer_size,
            type_id_size,
            vtables: DashMap::new(),
            itables: DashMap::new(),
            emitted: DashSet::new(),
            counters: Counters::default(),
        }
    }

    /// Vtable of a class, building it on first request
    pub fn build_vtable(&self, class: &Arc<ClassDefinition>) -> Result<Arc<TableInfo>> {
        if class.is_interface() {
            return Err(Error::internal(format!(
                "Vtable requested for interface {}",
                class.name()
            )));
        }
        if let Some(existing) = self.vtables.get(&class.type_id()) {
            return Ok(existing.value().clone());
        }

        let slots: Vec<Arc<MethodElement>> = class
            .instance_methods()
            .into_iter()
            .filter(|m| self.reachability.is_method_reachable(m))
            .collect();
        let candidate = Arc::new(TableInfo::new(
            TableKind::Virtual,
            class.clone(),
            slots,
            format!("vtable-{}", class.dotted_name()),
            self.pointer_size,
        ));
        debug!(
            target: "kiln::dispatch::tables",
            class = %class.name(),
            slots = candidate.len(),
            "built vtable"
        );
        Ok(self
            .vtables
            .entry(class.type_id())
            .or_insert(candidate)
            .value()
            .clone())
    }

    /// Itable of an interface, building it on first request
    pub fn build_itable(&self, interface: &Arc<ClassDefinition>) -> Result<Arc<TableInfo>> {
        if !interface.is_interface() {
            return Err(Error::internal(format!(
                "Itable requested for class {}",
                interface.name()
            )));
        }
        if let Some(existing) = self.itables.get(&interface.type_id()) {
            return Ok(existing.value().clone());
        }

        let slots: Vec<Arc<MethodElement>> = interface
            .interface_methods()
            .into_iter()
            .filter(|m| self.reachability.is_dispatch_reachable(interface, m))
            .collect();
        let candidate = Arc::new(TableInfo::new(
            TableKind::Interface,
            interface.clone(),
            slots,
            format!("itable-{}", interface.dotted_name()),
            self.pointer_size,
        ));
        debug!(
            target: "kiln::dispatch::tables",
            interface = %interface.name(),
            slots = candidate.len(),
            "built itable"
        );
        Ok(self
            .itables
            .entry(interface.type_id())
            .or_insert(candidate)
            .value()
            .clone())
    }

    /// Previously built vtable
    pub fn vtable(&self, type_id: u32) -> Option<Arc<TableInfo>> {
        self.vtables.get(&type_id).map(|t| t.value().clone())
    }

    /// Previously built itable
    pub fn itable(&self, type_id: u32) -> Option<Arc<TableInfo>> {
        self.itables.get(&type_id).map(|t| t.value().clone())
    }

    /// Slot of `method` in the vtable of `owner`
    ///
    /// A miss means the call site and the reachability analysis disagree;
    /// it is reported and slot 0 is returned so lowering can continue.
    pub fn get_vtable_index(
        &self,
        diagnostics: &Diagnostics,
        location: Option<&NodeInfo>,
        method: &MethodElement,
        owner: &Arc<ClassDefinition>,
    ) -> Result<u32> {
        let table = self.build_vtable(owner)?;
        match table.index_of(method) {
            Some(index) => Ok(index as u32),
            None => {
                diagnostics.report(
                    owner.name(),
                    location,
                    format!("No vtable entry found for {} in {}", method, owner.name()),
                );
                Ok(0)
            }
        }
    }

    /// Slot of `method` in the itable of `interface`
    pub fn get_itable_index(
        &self,
        diagnostics: &Diagnostics,
        location: Option<&NodeInfo>,
        method: &MethodElement,
        interface: &Arc<ClassDefinition>,
    ) -> Result<u32> {
        let table = self.build_itable(interface)?;
        match table.index_of(method) {
            Some(index) => Ok(index as u32),
            None => {
                diagnostics.report(
                    interface.name(),
                    location,
                    format!(
                        "No itable entry found for {} in {}",
                        method,
                        interface.name()
                    ),
                );
                Ok(0)
            }
        }
    }

    /// Layout of one itable dictionary entry
    pub fn dictionary_entry_type(&self) -> CompoundType {
        CompoundType::new(
            CompoundTag::Struct,
            "itable-dict-entry",
            self.pointer_size * 2,
            self.pointer_size,
            vec![
                Member {
                    name: "itable".to_string(),
                    offset: 0,
                    ty: Type::pointer_to(Type::unsigned(1)),
                    align: self.pointer_size,
                },
                Member {
                    name: "typeId".to_string(),
                    offset: self.pointer_size,
                    ty: Type::unsigned(self.type_id_size as u8),
                    align: self.type_id_size,
                },
            ],
        )
    }

    fn type_id_type(&self) -> Result<LlvmType> {
        LlvmType::int_of_bytes(self.type_id_size)
            .ok_or_else(|| Error::internal(format!("Unsupported type id size {}", self.type_id_size)))
    }

    fn dictionary_entry_llvm_type(&self) -> Result<LlvmType> {
        Ok(LlvmType::structure(vec![LlvmType::Ptr, self.type_id_type()?]))
    }

    fn slot_constant(&self, module: &ProgramModule, target: SlotTarget) -> Result<Constant> {
        match target {
            SlotTarget::Method(method) => {
                let symbol = method.symbol();
                module.declare_function(&symbol, map_signature(&method.function_type())?);
                Ok(Constant::Symbol(symbol))
            }
            SlotTarget::Stub(helper) => {
                helper.declare(module);
                Ok(Constant::Symbol(helper.symbol().to_string()))
            }
        }
    }

    fn table_constant(
        &self,
        module: &ProgramModule,
        targets: Vec<SlotTarget>,
    ) -> Result<(LlvmType, Constant)> {
        let mut fields = Vec::with_capacity(targets.len());
        for target in targets {
            fields.push((LlvmType::Ptr, self.slot_constant(module, target)?));
        }
        let ty = LlvmType::structure(vec![LlvmType::Ptr; fields.len()]);
        Ok((
            ty,
            Constant::Struct {
                packed: false,
                fields,
            },
        ))
    }

    /// Emit the vtable of a concrete class; other classes emit nothing
    pub fn emit_vtable(
        &self,
        module: &ProgramModule,
        diagnostics: &Diagnostics,
        class: &Arc<ClassDefinition>,
    ) -> Result<()> {
        if !class.is_concrete() {
            return Ok(());
        }
        let table = self.build_vtable(class)?;
        if !self.emitted.insert(table.symbol().to_string()) {
            return Ok(());
        }

        let targets: Vec<SlotTarget> = table
            .slots()
            .iter()
            .map(|method| {
                if method.is_abstract() {
                    SlotTarget::Stub(RuntimeHelper::RaiseAbstractMethodError)
                } else if method.is_native() && !method.has_body() {
                    SlotTarget::Stub(RuntimeHelper::RaiseUnsatisfiedLinkError)
                } else if !method.has_body() {
                    diagnostics.report(
                        class.name(),
                        None,
                        format!(
                            "Missing method implementation for vtable of {}: {}",
                            class.name(),
                            method
                        ),
                    );
                    SlotTarget::Stub(RuntimeHelper::RaiseUnsatisfiedLinkError)
                } else {
                    SlotTarget::Method(method.clone())
                }
            })
            .collect();
        let (ty, value) = self.table_constant(module, targets)?;
        module.add_data(table.symbol(), ty, value, Linkage::Internal)?;

        self.counters.vtables.fetch_add(1, Ordering::Relaxed);
        self.counters
            .vtable_slots
            .fetch_add(table.len(), Ordering::Relaxed);
        debug!(
            target: "kiln::dispatch::tables",
            symbol = %table.symbol(),
            slots = table.len(),
            "emitted vtable"
        );
        Ok(())
    }

    /// Emit the per-interface itables and the itable dictionary of a
    /// concrete class; other classes emit nothing
    pub fn emit_class_itables(
        &self,
        module: &ProgramModule,
        diagnostics: &Diagnostics,
        class: &Arc<ClassDefinition>,
    ) -> Result<()> {
        if !class.is_concrete() {
            return Ok(());
        }
        if !self.has_itables(class)? {
            return Ok(());
        }
        let dictionary = format!("itable-dict-{}", class.dotted_name());
        if !self.emitted.insert(dictionary.clone()) {
            return Ok(());
        }

        let id_type = self.type_id_type()?;
        let entry_type = self.dictionary_entry_llvm_type()?;
        let mut entries = Vec::new();
        for interface in class.all_interfaces() {
            let itable = self.build_itable(&interface)?;
            if itable.is_empty() {
                continue;
            }

            let targets: Vec<SlotTarget> = itable
                .slots()
                .iter()
                .map(|slot| self.resolve_itable_slot(diagnostics, class, slot))
                .collect();
            let symbol = format!("itable-{}-{}", class.dotted_name(), interface.dotted_name());
            let (ty, value) = self.table_constant(module, targets)?;
            module.add_data(&symbol, ty, value, Linkage::Internal)?;
            self.counters.itables.fetch_add(1, Ordering::Relaxed);
            self.counters
                .itable_slots
                .fetch_add(itable.len(), Ordering::Relaxed);

            entries.push(Constant::Struct {
                packed: false,
                fields: vec![
                    (LlvmType::Ptr, Constant::Symbol(symbol)),
                    (id_type.clone(), Constant::Int(interface.type_id() as i64)),
                ],
            });
        }
        let interfaces = entries.len();
        entries.push(Constant::Zero);

        module.add_data(
            &dictionary,
            LlvmType::array(entries.len() as u64, entry_type.clone()),
            Constant::Array {
                element: entry_type,
                values: entries,
            },
            Linkage::Internal,
        )?;
        self.counters.dictionaries.fetch_add(1, Ordering::Relaxed);
        debug!(
            target: "kiln::dispatch::tables",
            symbol = %dictionary,
            interfaces,
            "emitted itable dictionary"
        );
        Ok(())
    }

    /// Whether any interface of `class` has a non-empty itable.
    /// Classes without one get no dictionary and a null dictionary slot.
    pub fn has_itables(&self, class: &ClassDefinition) -> Result<bool> {
        for interface in class.all_interfaces() {
            if !self.build_itable(&interface)?.is_empty() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn resolve_itable_slot(
        &self,
        diagnostics: &Diagnostics,
        class: &ClassDefinition,
        slot: &MethodElement,
    ) -> SlotTarget {
        match class.resolve_method(slot.name(), slot.descriptor()) {
            None => SlotTarget::Stub(RuntimeHelper::RaiseIncompatibleClassChangeError),
            Some(method) if method.is_abstract() => {
                SlotTarget::Stub(RuntimeHelper::RaiseAbstractMethodError)
            }
            Some(method) if method.is_native() && !method.has_body() => {
                SlotTarget::Stub(RuntimeHelper::RaiseUnsatisfiedLinkError)
            }
            Some(method) if !method.has_body() => {
                diagnostics.report(
                    class.name(),
                    None,
                    format!(
                        "Missing method implementation for itable of {}: {}",
                        class.name(),
                        method
                    ),
                );
                SlotTarget::Stub(RuntimeHelper::RaiseUnsatisfiedLinkError)
            }
            Some(method) => SlotTarget::Method(method),
        }
    }

    fn emit_global_array(
        &self,
        module: &ProgramModule,
        program: &Program,
        symbol: &str,
        table_symbol: impl Fn(&Arc<ClassDefinition>) -> Result<Option<String>>,
    ) -> Result<()> {
        let len = program.max_type_id() as usize + 1;
        let mut values: Vec<Option<Constant>> = vec![None; len];
        for class in program.classes().iter().filter(|c| c.is_concrete()) {
            let slot = &mut values[class.type_id() as usize];
            assert!(
                slot.is_none(),
                "{} slot {} assigned twice",
                symbol,
                class.type_id()
            );
            *slot = table_symbol(class)?.map(Constant::Symbol);
        }
        let values = values
            .into_iter()
            .map(|v| v.unwrap_or(Constant::Null))
            .collect();
        module.add_data(
            symbol,
            LlvmType::array(len as u64, LlvmType::Ptr),
            Constant::Array {
                element: LlvmType::Ptr,
                values,
            },
            Linkage::External,
        )?;
        Ok(())
    }

    /// Emit the type-id indexed array of vtables
    pub fn emit_vtable_array(&self, module: &ProgramModule, program: &Program) -> Result<()> {
        self.emit_global_array(module, program, VTABLES_SYMBOL, |class| {
            Ok(Some(self.build_vtable(class)?.symbol().to_string()))
        })
    }

    /// Emit the type-id indexed array of itable dictionaries. Slots of
    /// classes that implement no interface methods stay null.
    pub fn emit_itable_dict_array(&self, module: &ProgramModule, program: &Program) -> Result<()> {
        self.emit_global_array(module, program, ITABLE_DICTS_SYMBOL, |class| {
            Ok(self
                .has_itables(class)?
                .then(|| format!("itable-dict-{}", class.dotted_name())))
        })
    }

    /// Counts of everything emitted so far
    pub fn statistics(&self) -> DispatchStatistics {
        DispatchStatistics {
            vtables: self.counters.vtables.load(Ordering::Relaxed),
            vtable_slots: self.counters.vtable_slots.load(Ordering::Relaxed),
            itables: self.counters.itables.load(Ordering::Relaxed),
            itable_slots: self.counters.itable_slots.load(Ordering::Relaxed),
            dictionaries: self.counters.dictionaries.load(Ordering::Relaxed),
        }
    }

    /// Log [`Self::statistics`]
    pub fn log_statistics(&self) {
        let stats = self.statistics();
        info!(target: "kiln::dispatch::stats", "{}", stats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::program::{AllReachable, ClassBuilder, ReachableSelectors};

    fn tables() -> DispatchTables {
        DispatchTables::new(Arc::new(AllReachable), 8, 4)
    }

    #[test]
    fn test_vtable_layout() {
        let class = ClassBuilder::new("p/A", 20)
            .method("f", "()V")
            .method("g", "(I)I")
            .build()
            .unwrap();
        let table = tables().build_vtable(&class).unwrap();
        assert_eq!(table.symbol(), "vtable-p.A");
        assert_eq!(table.ty().members.len(), 2);
        assert_eq!(table.ty().members[1].offset, 8);
        assert_eq!(table.ty().size, 16);
    }

    #[test]
    fn test_unreachable_methods_are_filtered() {
        let class = ClassBuilder::new("A", 20)
            .method("f", "()V")
            .method("g", "()V")
            .method("h", "()V")
            .build()
            .unwrap();
        let mut live = ReachableSelectors::new();
        live.insert("f", "()V");
        live.insert("h", "()V");
        let tables = DispatchTables::new(Arc::new(live), 8, 4);
        let table = tables.build_vtable(&class).unwrap();
        let names: Vec<&str> = table.slots().iter().map(|m| m.name()).collect();
        assert_eq!(names, vec!["f", "h"]);
    }

    #[test]
    fn test_interface_has_no_vtable() {
        let interface = ClassBuilder::interface("I", 20)
            .abstract_method("f", "()V")
            .build()
            .unwrap();
        assert!(tables().build_vtable(&interface).is_err());
        assert_eq!(tables().build_itable(&interface).unwrap().len(), 1);
    }

    #[test]
    fn test_tables_are_built_once() {
        let class = ClassBuilder::new("A", 20).method("f", "()V").build().unwrap();
        let tables = tables();
        let first = tables.build_vtable(&class).unwrap();
        let second = tables.build_vtable(&class).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_abstract_slot_points_at_stub() {
        let base = ClassBuilder::new("Base", 20)
            .abstract_class()
            .abstract_method("f", "()V")
            .build()
            .unwrap();
        let tables = tables();
        let module = ProgramModule::new("test", false);
        let diagnostics = Diagnostics::new();
        tables.emit_vtable(&module, &diagnostics, &base).unwrap();
        assert!(module.data("vtable-Base").is_none());

        let child = ClassBuilder::new("Child", 21)
            .extends(&base)
            .build()
            .unwrap();
        tables.emit_vtable(&module, &diagnostics, &child).unwrap();
        let data = module.data("vtable-Child").unwrap();
        assert!(data
            .value
            .to_string()
            .contains("@kiln_raise_abstract_method_error"));
        assert!(module.is_declared("kiln_raise_abstract_method_error"));
        assert_eq!(diagnostics.error_count(), 0);
    }
}
