//! Build-time heap
//!
//! Objects created while compiling (string literals, precomputed constants)
//! are serialized into the output module as initialized data so the program
//! starts with them already in place. Each object gets one symbol named
//! `kiln_initial_heap_obj_<n>`: strings are interned by value, every other
//! object by identity.
//!
//! Instances are laid out as a packed struct following the class layout:
//!
//! ```text
//! <{ i32 typeId, [4 x i8] header padding, fields at their offsets... }>
//! ```
//!
//! Arrays use `{ i32 typeId, i32 length, [N x T] content }`.

use crate::compiler::llvm::{Constant, LlvmType};
use crate::compiler::object::{Linkage, ProgramModule};
use crate::compiler::pointer::Pointer;
use crate::compiler::program::{
    ClassDefinition, Program, TypeDescriptor, FIRST_PRIMITIVE_ARRAY_TYPE_ID,
    FIRST_PRIMITIVE_TYPE_ID, OBJECT_HEADER_SIZE, REFERENCE_ARRAY_TYPE_ID,
};
use crate::compiler::types::{CompoundType, Type};
use crate::error::{Error, Result};
use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Prefix of every heap object symbol
pub const HEAP_SYMBOL_PREFIX: &str = "kiln_initial_heap_obj_";

/// Shared handle to a heap object; identity is the allocation
pub type ObjectRef = Arc<HeapObject>;

/// A field value
#[derive(Debug, Clone)]
pub enum HeapValue {
    /// `Z`
    Boolean(bool),
    /// `B`
    Byte(i8),
    /// `C`
    Char(u16),
    /// `S`
    Short(i16),
    /// `I`
    Int(i32),
    /// `F`
    Float(f32),
    /// `J`
    Long(i64),
    /// `D`
    Double(f64),
    /// Class or array reference
    Reference(Option<ObjectRef>),
}

impl HeapValue {
    /// Zero value of a field descriptor
    pub fn default_for(descriptor: &TypeDescriptor) -> Self {
        match descriptor {
            TypeDescriptor::Boolean => HeapValue::Boolean(false),
            TypeDescriptor::Byte => HeapValue::Byte(0),
            TypeDescriptor::Char => HeapValue::Char(0),
            TypeDescriptor::Short => HeapValue::Short(0),
            TypeDescriptor::Int => HeapValue::Int(0),
            TypeDescriptor::Float => HeapValue::Float(0.0),
            TypeDescriptor::Long => HeapValue::Long(0),
            TypeDescriptor::Double => HeapValue::Double(0.0),
            TypeDescriptor::Void | TypeDescriptor::Class(_) | TypeDescriptor::Array(_) => {
                HeapValue::Reference(None)
            }
        }
    }

    fn fits(&self, descriptor: &TypeDescriptor) -> bool {
        matches!(
            (self, descriptor),
            (HeapValue::Boolean(_), TypeDescriptor::Boolean)
                | (HeapValue::Byte(_), TypeDescriptor::Byte)
                | (HeapValue::Char(_), TypeDescriptor::Char)
                | (HeapValue::Short(_), TypeDescriptor::Short)
                | (HeapValue::Int(_), TypeDescriptor::Int)
                | (HeapValue::Float(_), TypeDescriptor::Float)
                | (HeapValue::Long(_), TypeDescriptor::Long)
                | (HeapValue::Double(_), TypeDescriptor::Double)
                | (HeapValue::Reference(_), TypeDescriptor::Class(_))
                | (HeapValue::Reference(_), TypeDescriptor::Array(_))
        )
    }
}

/// Contents of an array object
#[derive(Debug)]
pub enum HeapArray {
    /// `boolean[]`
    Boolean(Vec<bool>),
    /// `byte[]`
    Byte(Vec<i8>),
    /// `char[]`
    Char(Vec<u16>),
    /// `short[]`
    Short(Vec<i16>),
    /// `int[]`
    Int(Vec<i32>),
    /// `float[]`
    Float(Vec<f32>),
    /// `long[]`
    Long(Vec<i64>),
    /// `double[]`
    Double(Vec<f64>),
    /// Any reference array
    Reference(RwLock<Vec<Option<ObjectRef>>>),
}

impl HeapArray {
    /// Number of elements
    pub fn len(&self) -> usize {
        match self {
            HeapArray::Boolean(v) => v.len(),
            HeapArray::Byte(v) => v.len(),
            HeapArray::Char(v) => v.len(),
            HeapArray::Short(v) => v.len(),
            HeapArray::Int(v) => v.len(),
            HeapArray::Float(v) => v.len(),
            HeapArray::Long(v) => v.len(),
            HeapArray::Double(v) => v.len(),
            HeapArray::Reference(v) => v.read().len(),
        }
    }

    /// True for zero-length arrays
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn element_descriptor(&self) -> Option<TypeDescriptor> {
        match self {
            HeapArray::Boolean(_) => Some(TypeDescriptor::Boolean),
            HeapArray::Byte(_) => Some(TypeDescriptor::Byte),
            HeapArray::Char(_) => Some(TypeDescriptor::Char),
            HeapArray::Short(_) => Some(TypeDescriptor::Short),
            HeapArray::Int(_) => Some(TypeDescriptor::Int),
            HeapArray::Float(_) => Some(TypeDescriptor::Float),
            HeapArray::Long(_) => Some(TypeDescriptor::Long),
            HeapArray::Double(_) => Some(TypeDescriptor::Double),
            HeapArray::Reference(_) => None,
        }
    }

    /// Type id of the array pseudo-class
    pub fn type_id(&self) -> u32 {
        match self
            .element_descriptor()
            .and_then(|d| d.primitive_type_id())
        {
            Some(id) => id - FIRST_PRIMITIVE_TYPE_ID + FIRST_PRIMITIVE_ARRAY_TYPE_ID,
            None => REFERENCE_ARRAY_TYPE_ID,
        }
    }

    fn element_type(&self) -> Type {
        match self.element_descriptor() {
            Some(TypeDescriptor::Boolean) => Type::unsigned(1),
            Some(descriptor) => descriptor.value_type(),
            None => Type::Reference,
        }
    }
}

/// An instance of a class
#[derive(Debug)]
pub struct InstanceObject {
    class: Arc<ClassDefinition>,
    fields: RwLock<BTreeMap<String, HeapValue>>,
}

/// An object living in the build-time heap
#[derive(Debug)]
pub enum HeapObject {
    /// Class instance
    Instance(InstanceObject),
    /// Array
    Array(HeapArray),
}

impl HeapObject {
    /// New instance with every field at its zero value
    pub fn instance(class: &Arc<ClassDefinition>) -> Result<ObjectRef> {
        if !class.is_concrete() {
            return Err(Error::internal(format!(
                "Cannot instantiate {} {}",
                if class.is_interface() { "interface" } else { "abstract class" },
                class.name()
            )));
        }
        Ok(Arc::new(HeapObject::Instance(InstanceObject {
            class: class.clone(),
            fields: RwLock::new(BTreeMap::new()),
        })))
    }

    /// New array object
    pub fn array(contents: HeapArray) -> ObjectRef {
        Arc::new(HeapObject::Array(contents))
    }

    /// New reference array object
    pub fn reference_array(elements: Vec<Option<ObjectRef>>) -> ObjectRef {
        Self::array(HeapArray::Reference(RwLock::new(elements)))
    }

    /// Type id stored in the object header
    pub fn type_id(&self) -> u32 {
        match self {
            HeapObject::Instance(instance) => instance.class.type_id(),
            HeapObject::Array(array) => array.type_id(),
        }
    }

    /// Set an instance field, checking it exists and matches the value kind
    pub fn set_field(&self, name: &str, value: HeapValue) -> Result<()> {
        let HeapObject::Instance(instance) = self else {
            return Err(Error::internal(format!("Field {} set on an array", name)));
        };
        let field = instance.class.instance_field(name).ok_or_else(|| {
            Error::internal(format!(
                "No instance field {} in {}",
                name,
                instance.class.name()
            ))
        })?;
        if !value.fits(&field.descriptor) {
            return Err(Error::internal(format!(
                "Value {:?} does not fit field {}.{} of type {}",
                value,
                instance.class.name(),
                name,
                field.descriptor
            )));
        }
        instance.fields.write().insert(name.to_string(), value);
        Ok(())
    }

    /// Current value of an instance field
    pub fn field(&self, name: &str) -> Option<HeapValue> {
        match self {
            HeapObject::Instance(instance) => instance.fields.read().get(name).cloned(),
            HeapObject::Array(_) => None,
        }
    }

    /// Store into a reference array
    pub fn set_element(&self, index: usize, value: Option<ObjectRef>) -> Result<()> {
        let HeapObject::Array(HeapArray::Reference(elements)) = self else {
            return Err(Error::internal("Element store into a non-reference array"));
        };
        let mut elements = elements.write();
        let len = elements.len();
        let slot = elements.get_mut(index).ok_or_else(|| {
            Error::internal(format!("Index {} out of bounds for length {}", index, len))
        })?;
        *slot = value;
        Ok(())
    }

    /// Type a pointer to this object points at
    pub fn pointee_type(&self) -> Type {
        match self {
            HeapObject::Instance(instance) => Type::Object(instance.class.clone()),
            HeapObject::Array(array) => Type::Compound(Arc::new(CompoundType::layout_struct(
                format!("array-{}", array.type_id()),
                vec![
                    ("typeId".to_string(), Type::unsigned(4)),
                    ("length".to_string(), Type::signed(4)),
                    (
                        "content".to_string(),
                        Type::array(array.element_type(), array.len() as i64),
                    ),
                ],
            ))),
        }
    }
}

#[derive(Debug)]
struct Interned {
    index: usize,
    symbol: String,
    object: ObjectRef,
}

/// Objects to be serialized into the output module
#[derive(Debug, Default)]
pub struct BuildtimeHeap {
    next: AtomicUsize,
    objects: DashMap<usize, Arc<Interned>>,
    strings: DashMap<String, String>,
    emitted: DashSet<String>,
}

impl BuildtimeHeap {
    /// Empty heap
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of interned objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// True when nothing was interned
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Symbol of `object`, reserving one on first use
    ///
    /// Only the symbol is reserved here; contents are serialized by
    /// [`Self::emit`], so reference cycles need no special handling.
    pub fn serialize_object(&self, object: &ObjectRef) -> String {
        let key = Arc::as_ptr(object) as usize;
        if let Some(existing) = self.objects.get(&key) {
            return existing.symbol.clone();
        }
        let interned = self.objects.entry(key).or_insert_with(|| {
            let index = self.next.fetch_add(1, Ordering::Relaxed);
            let symbol = format!("{}{}", HEAP_SYMBOL_PREFIX, index);
            debug!(target: "kiln::heap", symbol = %symbol, type_id = object.type_id(), "interned object");
            Arc::new(Interned {
                index,
                symbol,
                object: object.clone(),
            })
        });
        interned.symbol.clone()
    }

    /// Symbol of a string literal; equal strings share one object
    ///
    /// The string is an instance of `java/lang/String` whose `value` field
    /// holds the characters as `char[]` (UTF-16) or `byte[]` (UTF-8).
    pub fn serialize_string(&self, program: &Program, value: &str) -> Result<String> {
        if let Some(existing) = self.strings.get(value) {
            return Ok(existing.value().clone());
        }
        let class = program
            .class("java/lang/String")
            .ok_or_else(|| Error::internal("String literal without a java/lang/String class"))?;
        let string = HeapObject::instance(class)?;
        let field = class
            .instance_field("value")
            .ok_or_else(|| Error::internal("java/lang/String has no value field"))?;
        let contents = match &field.descriptor {
            TypeDescriptor::Array(element) if **element == TypeDescriptor::Char => {
                HeapArray::Char(value.encode_utf16().collect())
            }
            TypeDescriptor::Array(element) if **element == TypeDescriptor::Byte => {
                HeapArray::Byte(value.bytes().map(|b| b as i8).collect())
            }
            other => {
                return Err(Error::internal(format!(
                    "Unsupported java/lang/String value field type {}",
                    other
                )))
            }
        };
        string.set_field("value", HeapValue::Reference(Some(HeapObject::array(contents))))?;

        let candidate = self.serialize_object(&string);
        Ok(self
            .strings
            .entry(value.to_string())
            .or_insert(candidate)
            .value()
            .clone())
    }

    /// Pointer to an object, interning it
    pub fn pointer_to(&self, object: &ObjectRef) -> Pointer {
        Pointer::global(self.serialize_object(object), object.pointee_type())
    }

    /// Add every interned object to `module` as writable data
    ///
    /// Serializing an object may intern the objects it references; those
    /// are emitted in later rounds. Returns the number of objects emitted.
    pub fn emit(&self, module: &ProgramModule) -> Result<usize> {
        let mut emitted = 0;
        loop {
            let mut round: Vec<Arc<Interned>> = self
                .objects
                .iter()
                .filter(|entry| !self.emitted.contains(&entry.value().symbol))
                .map(|entry| entry.value().clone())
                .collect();
            if round.is_empty() {
                break;
            }
            round.sort_by_key(|interned| interned.index);
            for interned in round {
                if !self.emitted.insert(interned.symbol.clone()) {
                    continue;
                }
                let (ty, value) = self.literal(&interned.object)?;
                module.add_variable(&interned.symbol, ty, value, Linkage::Internal)?;
                emitted += 1;
            }
        }
        debug!(target: "kiln::heap", objects = emitted, "emitted build-time heap");
        Ok(emitted)
    }

    fn literal(&self, object: &ObjectRef) -> Result<(LlvmType, Constant)> {
        match object.as_ref() {
            HeapObject::Instance(instance) => self.instance_literal(instance),
            HeapObject::Array(array) => self.array_literal(array),
        }
    }

    fn instance_literal(&self, instance: &InstanceObject) -> Result<(LlvmType, Constant)> {
        let class = &instance.class;
        let values = instance.fields.read();
        let mut fields: Vec<(LlvmType, Constant)> = vec![(
            LlvmType::I32,
            Constant::Int(class.type_id() as i64),
        )];
        let mut cursor = 4;

        let mut layout = class.instance_fields();
        layout.sort_by_key(|f| f.offset);
        for field in layout {
            if field.offset < cursor {
                return Err(Error::internal(format!(
                    "Field {} of {} overlaps the previous field",
                    field.name,
                    class.name()
                )));
            }
            if field.offset > cursor {
                fields.push(padding(field.offset - cursor));
            }
            let value = values
                .get(&field.name)
                .cloned()
                .unwrap_or_else(|| HeapValue::default_for(&field.descriptor));
            fields.push(self.value_literal(&field.descriptor, &value)?);
            cursor = field.offset + field.size();
        }
        let end = class.instance_size().max(OBJECT_HEADER_SIZE);
        if end > cursor {
            fields.push(padding(end - cursor));
        }

        let ty = LlvmType::Struct {
            packed: true,
            fields: fields.iter().map(|(ty, _)| ty.clone()).collect(),
        };
        Ok((
            ty,
            Constant::Struct {
                packed: true,
                fields,
            },
        ))
    }

    fn value_literal(
        &self,
        descriptor: &TypeDescriptor,
        value: &HeapValue,
    ) -> Result<(LlvmType, Constant)> {
        Ok(match (descriptor, value) {
            (TypeDescriptor::Boolean, HeapValue::Boolean(v)) => (LlvmType::I8, Constant::Int(*v as i64)),
            (TypeDescriptor::Byte, HeapValue::Byte(v)) => (LlvmType::I8, Constant::Int(*v as i64)),
            (TypeDescriptor::Char, HeapValue::Char(v)) => (LlvmType::I16, Constant::Int(*v as i64)),
            (TypeDescriptor::Short, HeapValue::Short(v)) => (LlvmType::I16, Constant::Int(*v as i64)),
            (TypeDescriptor::Int, HeapValue::Int(v)) => (LlvmType::I32, Constant::Int(*v as i64)),
            (TypeDescriptor::Float, HeapValue::Float(v)) => (LlvmType::Float, Constant::Float(*v as f64)),
            (TypeDescriptor::Long, HeapValue::Long(v)) => (LlvmType::I64, Constant::Int(*v)),
            (TypeDescriptor::Double, HeapValue::Double(v)) => (LlvmType::Double, Constant::Float(*v)),
            (TypeDescriptor::Class(_) | TypeDescriptor::Array(_), HeapValue::Reference(None)) => {
                (LlvmType::Ptr, Constant::Null)
            }
            (TypeDescriptor::Class(_) | TypeDescriptor::Array(_), HeapValue::Reference(Some(target))) => {
                (LlvmType::Ptr, Constant::Symbol(self.serialize_object(target)))
            }
            (descriptor, value) => {
                return Err(Error::internal(format!(
                    "Cannot serialize {:?} as {}",
                    value, descriptor
                )))
            }
        })
    }

    fn array_literal(&self, array: &HeapArray) -> Result<(LlvmType, Constant)> {
        let (element, values): (LlvmType, Vec<Constant>) = match array {
            HeapArray::Boolean(v) => (LlvmType::I8, v.iter().map(|&x| Constant::Int(x as i64)).collect()),
            HeapArray::Byte(v) => (LlvmType::I8, v.iter().map(|&x| Constant::Int(x as i64)).collect()),
            HeapArray::Char(v) => (LlvmType::I16, v.iter().map(|&x| Constant::Int(x as i64)).collect()),
            HeapArray::Short(v) => (LlvmType::I16, v.iter().map(|&x| Constant::Int(x as i64)).collect()),
            HeapArray::Int(v) => (LlvmType::I32, v.iter().map(|&x| Constant::Int(x as i64)).collect()),
            HeapArray::Float(v) => (LlvmType::Float, v.iter().map(|&x| Constant::Float(x as f64)).collect()),
            HeapArray::Long(v) => (LlvmType::I64, v.iter().map(|&x| Constant::Int(x)).collect()),
            HeapArray::Double(v) => (LlvmType::Double, v.iter().map(|&x| Constant::Float(x)).collect()),
            HeapArray::Reference(v) => (
                LlvmType::Ptr,
                v.read()
                    .iter()
                    .map(|element| match element {
                        Some(target) => Constant::Symbol(self.serialize_object(target)),
                        None => Constant::Null,
                    })
                    .collect(),
            ),
        };
        let len = values.len();
        let content_type = LlvmType::array(len as u64, element.clone());
        let ty = LlvmType::structure(vec![LlvmType::I32, LlvmType::I32, content_type.clone()]);
        let content = if values.is_empty() {
            Constant::Zero
        } else {
            Constant::Array { element, values }
        };
        Ok((
            ty,
            Constant::Struct {
                packed: false,
                fields: vec![
                    (LlvmType::I32, Constant::Int(array.type_id() as i64)),
                    (LlvmType::I32, Constant::Int(len as i64)),
                    (content_type, content),
                ],
            },
        ))
    }
}

fn padding(bytes: i64) -> (LlvmType, Constant) {
    (LlvmType::array(bytes as u64, LlvmType::I8), Constant::Zero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::program::ClassBuilder;

    fn node_class() -> Arc<ClassDefinition> {
        ClassBuilder::new("Node", 20)
            .field("value", "I")
            .field("next", "LNode;")
            .build()
            .unwrap()
    }

    #[test]
    fn test_identity_interning() {
        let heap = BuildtimeHeap::new();
        let class = node_class();
        let a = HeapObject::instance(&class).unwrap();
        let b = HeapObject::instance(&class).unwrap();
        assert_eq!(heap.serialize_object(&a), heap.serialize_object(&a));
        assert_ne!(heap.serialize_object(&a), heap.serialize_object(&b));
        assert_eq!(heap.len(), 2);
    }

    #[test]
    fn test_cycle_terminates() {
        let heap = BuildtimeHeap::new();
        let class = node_class();
        let a = HeapObject::instance(&class).unwrap();
        let b = HeapObject::instance(&class).unwrap();
        a.set_field("next", HeapValue::Reference(Some(b.clone()))).unwrap();
        b.set_field("next", HeapValue::Reference(Some(a.clone()))).unwrap();
        a.set_field("value", HeapValue::Int(7)).unwrap();

        let module = ProgramModule::new("heap", false);
        let symbol = heap.serialize_object(&a);
        assert_eq!(heap.emit(&module).unwrap(), 2);

        let data = module.data(&symbol).unwrap();
        let text = data.to_string();
        assert!(text.contains("i32 20"), "{}", text);
        assert!(text.contains("i32 7"), "{}", text);
        assert!(text.contains("kiln_initial_heap_obj_1"), "{}", text);
    }

    #[test]
    fn test_field_type_is_checked() {
        let a = HeapObject::instance(&node_class()).unwrap();
        assert!(a.set_field("value", HeapValue::Long(1)).is_err());
        assert!(a.set_field("missing", HeapValue::Int(1)).is_err());
    }

    #[test]
    fn test_array_layout() {
        let heap = BuildtimeHeap::new();
        let array = HeapObject::array(HeapArray::Int(vec![1, 2, 3]));
        assert_eq!(array.type_id(), FIRST_PRIMITIVE_ARRAY_TYPE_ID + 4);
        let symbol = heap.serialize_object(&array);
        let module = ProgramModule::new("heap", false);
        heap.emit(&module).unwrap();
        let data = module.data(&symbol).unwrap();
        assert_eq!(data.ty.to_string(), "{ i32, i32, [3 x i32] }");
        assert!(!data.constant);
    }
}
