//! Class, method and field model
//!
//! The backend does not resolve classes itself. A frontend hands it fully
//! built [`ClassDefinition`]s (through [`ClassBuilder`]) registered in a
//! [`Program`], together with a [`Reachability`] predicate from whole-program
//! analysis.

use crate::compiler::types::{align_up, FunctionType, Type};
use crate::error::{Error, Result};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

// Dense type-id numbering. Ids below FIRST_CLASS_TYPE_ID are reserved for
// the void and primitive types and the array pseudo-types, in descriptor
// order V Z B S C I F J D.

/// Never assigned
pub const INVALID_TYPE_ID: u32 = 0;
/// `void`
pub const VOID_TYPE_ID: u32 = 1;
/// First primitive type id (`boolean`); primitives occupy 2..=9
pub const FIRST_PRIMITIVE_TYPE_ID: u32 = 2;
/// First primitive array type id (`boolean[]`); primitive arrays occupy 10..=17
pub const FIRST_PRIMITIVE_ARRAY_TYPE_ID: u32 = 10;
/// Reference array pseudo-type
pub const REFERENCE_ARRAY_TYPE_ID: u32 = 18;
/// Lowest type id a class or interface may receive
pub const FIRST_CLASS_TYPE_ID: u32 = 19;

/// Bytes reserved at the start of every object for its type id and monitor word
pub const OBJECT_HEADER_SIZE: i64 = 8;

/// A field or return type descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDescriptor {
    /// `V`
    Void,
    /// `Z`
    Boolean,
    /// `B`
    Byte,
    /// `S`
    Short,
    /// `C`
    Char,
    /// `I`
    Int,
    /// `F`
    Float,
    /// `J`
    Long,
    /// `D`
    Double,
    /// `Lname;`
    Class(String),
    /// `[T`
    Array(Box<TypeDescriptor>),
}

impl TypeDescriptor {
    /// Parse a complete descriptor string
    pub fn parse(text: &str) -> Result<Self> {
        let mut chars = text.chars().peekable();
        let descriptor = Self::parse_next(&mut chars, text)?;
        if chars.next().is_some() {
            return Err(Error::internal(format!(
                "Trailing characters in descriptor '{}'",
                text
            )));
        }
        Ok(descriptor)
    }

    fn parse_next(
        chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
        text: &str,
    ) -> Result<Self> {
        let malformed = || Error::internal(format!("Malformed descriptor '{}'", text));
        let c = chars.next().ok_or_else(malformed)?;
        Ok(match c {
            'V' => TypeDescriptor::Void,
            'Z' => TypeDescriptor::Boolean,
            'B' => TypeDescriptor::Byte,
            'S' => TypeDescriptor::Short,
            'C' => TypeDescriptor::Char,
            'I' => TypeDescriptor::Int,
            'F' => TypeDescriptor::Float,
            'J' => TypeDescriptor::Long,
            'D' => TypeDescriptor::Double,
            'L' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some(';') => break,
                        Some(ch) => name.push(ch),
                        None => return Err(malformed()),
                    }
                }
                if name.is_empty() {
                    return Err(malformed());
                }
                TypeDescriptor::Class(name)
            }
            '[' => TypeDescriptor::Array(Box::new(Self::parse_next(chars, text)?)),
            _ => return Err(malformed()),
        })
    }

    /// True for class and array descriptors
    pub fn is_reference(&self) -> bool {
        matches!(self, TypeDescriptor::Class(_) | TypeDescriptor::Array(_))
    }

    /// The value type a field or local of this descriptor holds
    pub fn value_type(&self) -> Type {
        match self {
            TypeDescriptor::Void => Type::Void,
            TypeDescriptor::Boolean => Type::Boolean,
            TypeDescriptor::Byte => Type::signed(1),
            TypeDescriptor::Short => Type::signed(2),
            TypeDescriptor::Char => Type::unsigned(2),
            TypeDescriptor::Int => Type::signed(4),
            TypeDescriptor::Float => Type::float(4),
            TypeDescriptor::Long => Type::signed(8),
            TypeDescriptor::Double => Type::float(8),
            TypeDescriptor::Class(_) | TypeDescriptor::Array(_) => Type::Reference,
        }
    }

    /// Type id of a primitive descriptor, `None` for references
    pub fn primitive_type_id(&self) -> Option<u32> {
        let index = match self {
            TypeDescriptor::Void => return Some(VOID_TYPE_ID),
            TypeDescriptor::Boolean => 0,
            TypeDescriptor::Byte => 1,
            TypeDescriptor::Short => 2,
            TypeDescriptor::Char => 3,
            TypeDescriptor::Int => 4,
            TypeDescriptor::Float => 5,
            TypeDescriptor::Long => 6,
            TypeDescriptor::Double => 7,
            TypeDescriptor::Class(_) | TypeDescriptor::Array(_) => return None,
        };
        Some(FIRST_PRIMITIVE_TYPE_ID + index)
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescriptor::Void => write!(f, "V"),
            TypeDescriptor::Boolean => write!(f, "Z"),
            TypeDescriptor::Byte => write!(f, "B"),
            TypeDescriptor::Short => write!(f, "S"),
            TypeDescriptor::Char => write!(f, "C"),
            TypeDescriptor::Int => write!(f, "I"),
            TypeDescriptor::Float => write!(f, "F"),
            TypeDescriptor::Long => write!(f, "J"),
            TypeDescriptor::Double => write!(f, "D"),
            TypeDescriptor::Class(name) => write!(f, "L{};", name),
            TypeDescriptor::Array(element) => write!(f, "[{}", element),
        }
    }
}

/// Parameter and return descriptors of a method
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    /// Parameter descriptors
    pub params: Vec<TypeDescriptor>,
    /// Return descriptor
    pub return_type: TypeDescriptor,
}

impl MethodDescriptor {
    /// Parse a descriptor of the form `(params)ret`
    pub fn parse(text: &str) -> Result<Self> {
        let malformed = || Error::internal(format!("Malformed method descriptor '{}'", text));
        let inner = text.strip_prefix('(').ok_or_else(malformed)?;
        let close = inner.find(')').ok_or_else(malformed)?;
        let (params_text, ret_text) = (&inner[..close], &inner[close + 1..]);

        let mut params = Vec::new();
        let mut chars = params_text.chars().peekable();
        while chars.peek().is_some() {
            params.push(TypeDescriptor::parse_next(&mut chars, text)?);
        }
        Ok(Self {
            params,
            return_type: TypeDescriptor::parse(ret_text)?,
        })
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for param in &self.params {
            write!(f, "{}", param)?;
        }
        write!(f, "){}", self.return_type)
    }
}

/// Method access flags relevant to dispatch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MethodFlags {
    /// `static`
    pub is_static: bool,
    /// `abstract`
    pub is_abstract: bool,
    /// `native`
    pub is_native: bool,
    /// `private`
    pub is_private: bool,
}

/// A method of a class or interface
#[derive(Debug, Clone)]
pub struct MethodElement {
    enclosing: String,
    name: String,
    descriptor: MethodDescriptor,
    flags: MethodFlags,
    has_body: bool,
}

impl MethodElement {
    /// Create a method element
    pub fn new(
        enclosing: impl Into<String>,
        name: impl Into<String>,
        descriptor: MethodDescriptor,
        flags: MethodFlags,
        has_body: bool,
    ) -> Self {
        Self {
            enclosing: enclosing.into(),
            name: name.into(),
            descriptor,
            flags,
            has_body: has_body && !flags.is_abstract,
        }
    }

    /// Internal name of the declaring class
    pub fn enclosing(&self) -> &str {
        &self.enclosing
    }

    /// Method name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Method descriptor
    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }

    /// Access flags
    pub fn flags(&self) -> MethodFlags {
        self.flags
    }

    /// `static`
    pub fn is_static(&self) -> bool {
        self.flags.is_static
    }

    /// `abstract`
    pub fn is_abstract(&self) -> bool {
        self.flags.is_abstract
    }

    /// `native`
    pub fn is_native(&self) -> bool {
        self.flags.is_native
    }

    /// True when an implementation is available to link against
    pub fn has_body(&self) -> bool {
        self.has_body
    }

    /// Instance methods that take part in virtual dispatch
    pub fn is_virtual(&self) -> bool {
        !self.flags.is_static && !self.flags.is_private && !self.name.starts_with('<')
    }

    /// Same name and descriptor
    pub fn same_selector(&self, other: &MethodElement) -> bool {
        self.name == other.name && self.descriptor == other.descriptor
    }

    /// Matches a name and descriptor
    pub fn matches(&self, name: &str, descriptor: &MethodDescriptor) -> bool {
        self.name == name && &self.descriptor == descriptor
    }

    /// Global symbol of the compiled method
    pub fn symbol(&self) -> String {
        format!(
            "{}.{}{}",
            self.enclosing.replace('/', "."),
            self.name,
            self.descriptor
        )
    }

    /// Signature of the compiled function; instance methods take the
    /// receiver as a leading reference parameter
    pub fn function_type(&self) -> FunctionType {
        let mut params = Vec::with_capacity(self.descriptor.params.len() + 1);
        if !self.flags.is_static {
            params.push(Type::Reference);
        }
        params.extend(self.descriptor.params.iter().map(TypeDescriptor::value_type));
        FunctionType {
            return_type: self.descriptor.return_type.value_type(),
            params,
        }
    }
}

impl PartialEq for MethodElement {
    fn eq(&self, other: &Self) -> bool {
        self.enclosing == other.enclosing && self.same_selector(other)
    }
}

impl Eq for MethodElement {}

impl Hash for MethodElement {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.enclosing.hash(state);
        self.name.hash(state);
        self.descriptor.hash(state);
    }
}

impl fmt::Display for MethodElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.enclosing, self.name, self.descriptor)
    }
}

/// A field of a class
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldElement {
    /// Field name
    pub name: String,
    /// Field descriptor
    pub descriptor: TypeDescriptor,
    /// `static`
    pub is_static: bool,
    /// Byte offset inside the instance; zero for static fields
    pub offset: i64,
}

impl FieldElement {
    /// Value type of the field
    pub fn ty(&self) -> Type {
        self.descriptor.value_type()
    }

    /// Storage size in bytes
    pub fn size(&self) -> i64 {
        self.ty().size()
    }
}

/// Class, abstract class or interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassKind {
    /// Instantiable class
    Concrete,
    /// `abstract class`
    Abstract,
    /// `interface`
    Interface,
}

/// A fully resolved class or interface
#[derive(Debug)]
pub struct ClassDefinition {
    name: String,
    type_id: u32,
    kind: ClassKind,
    super_class: Option<Arc<ClassDefinition>>,
    interfaces: Vec<Arc<ClassDefinition>>,
    methods: Vec<Arc<MethodElement>>,
    fields: Vec<FieldElement>,
    instance_size: i64,
}

impl ClassDefinition {
    /// Internal name, `/` separated
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name with `/` replaced by `.`
    pub fn dotted_name(&self) -> String {
        self.name.replace('/', ".")
    }

    /// Dense type id
    pub fn type_id(&self) -> u32 {
        self.type_id
    }

    /// Class kind
    pub fn kind(&self) -> ClassKind {
        self.kind
    }

    /// True for interfaces
    pub fn is_interface(&self) -> bool {
        self.kind == ClassKind::Interface
    }

    /// True for instantiable classes
    pub fn is_concrete(&self) -> bool {
        self.kind == ClassKind::Concrete
    }

    /// Direct superclass
    pub fn super_class(&self) -> Option<&Arc<ClassDefinition>> {
        self.super_class.as_ref()
    }

    /// Directly implemented (or, for interfaces, extended) interfaces
    pub fn interfaces(&self) -> &[Arc<ClassDefinition>] {
        &self.interfaces
    }

    /// Declared methods in declaration order
    pub fn methods(&self) -> &[Arc<MethodElement>] {
        &self.methods
    }

    /// Declared fields in declaration order
    pub fn fields(&self) -> &[FieldElement] {
        &self.fields
    }

    /// Instance size in bytes, header included
    pub fn instance_size(&self) -> i64 {
        self.instance_size
    }

    /// Instance alignment in bytes
    pub fn instance_align(&self) -> i64 {
        OBJECT_HEADER_SIZE
    }

    /// Non-static fields of this class and all superclasses, superclass first
    pub fn instance_fields(&self) -> Vec<&FieldElement> {
        let mut fields = match &self.super_class {
            Some(parent) => parent.instance_fields(),
            None => Vec::new(),
        };
        fields.extend(self.fields.iter().filter(|f| !f.is_static));
        fields
    }

    /// Look up an instance field by name, searching superclasses
    pub fn instance_field(&self, name: &str) -> Option<&FieldElement> {
        self.fields
            .iter()
            .find(|f| !f.is_static && f.name == name)
            .or_else(|| self.super_class.as_ref()?.instance_field(name))
    }

    /// Virtual methods visible on instances: the superclass list with
    /// overrides replaced in place, followed by newly declared methods in
    /// declaration order.
    pub fn instance_methods(&self) -> Vec<Arc<MethodElement>> {
        let mut methods = match &self.super_class {
            Some(parent) => parent.instance_methods(),
            None => Vec::new(),
        };
        for method in self.methods.iter().filter(|m| m.is_virtual()) {
            match methods.iter().position(|m| m.same_selector(method)) {
                Some(slot) => methods[slot] = method.clone(),
                None => methods.push(method.clone()),
            }
        }
        methods
    }

    /// Methods invocable through this interface: its own, then those
    /// inherited from superinterfaces that are not redeclared
    pub fn interface_methods(&self) -> Vec<Arc<MethodElement>> {
        let mut methods: Vec<Arc<MethodElement>> = self
            .methods
            .iter()
            .filter(|m| m.is_virtual())
            .cloned()
            .collect();
        for parent in &self.interfaces {
            for method in parent.interface_methods() {
                if !methods.iter().any(|m| m.same_selector(&method)) {
                    methods.push(method);
                }
            }
        }
        methods
    }

    /// Every interface this class implements, directly or through its
    /// superclasses and superinterfaces, ordered by type id
    pub fn all_interfaces(&self) -> Vec<Arc<ClassDefinition>> {
        let mut found: BTreeMap<u32, Arc<ClassDefinition>> = BTreeMap::new();
        let mut stack: Vec<Arc<ClassDefinition>> = self.interfaces.clone();
        let mut current = self.super_class.clone();
        while let Some(class) = current {
            stack.extend(class.interfaces.iter().cloned());
            current = class.super_class.clone();
        }
        while let Some(interface) = stack.pop() {
            if found.contains_key(&interface.type_id) {
                continue;
            }
            stack.extend(interface.interfaces.iter().cloned());
            found.insert(interface.type_id, interface);
        }
        found.into_values().collect()
    }

    /// Virtual method resolution
    ///
    /// The class chain is searched first. Otherwise the maximally specific
    /// interface methods decide: a single default method wins, several
    /// conflicting defaults resolve to nothing, and with no default at all
    /// the first abstract declaration is returned.
    pub fn resolve_method(
        &self,
        name: &str,
        descriptor: &MethodDescriptor,
    ) -> Option<Arc<MethodElement>> {
        let mut current: Option<&ClassDefinition> = Some(self);
        while let Some(class) = current {
            if let Some(method) = class
                .methods
                .iter()
                .find(|m| !m.is_static() && m.matches(name, descriptor))
            {
                return Some(method.clone());
            }
            current = class.super_class.as_deref();
        }

        let candidates: Vec<(Arc<ClassDefinition>, Arc<MethodElement>)> = self
            .all_interfaces()
            .into_iter()
            .filter_map(|interface| {
                let method = interface
                    .methods
                    .iter()
                    .find(|m| m.is_virtual() && m.matches(name, descriptor))?
                    .clone();
                Some((interface, method))
            })
            .collect();
        let maximal: Vec<&Arc<MethodElement>> = candidates
            .iter()
            .filter(|(interface, _)| {
                !candidates
                    .iter()
                    .any(|(other, _)| other.extends_interface(interface))
            })
            .map(|(_, method)| method)
            .collect();

        let defaults: Vec<&&Arc<MethodElement>> =
            maximal.iter().filter(|m| !m.is_abstract()).collect();
        match defaults.len() {
            0 => maximal.first().map(|m| (*m).clone()),
            1 => Some((**defaults[0]).clone()),
            _ => None,
        }
    }

    /// Whether `interface` is a proper superinterface of this interface
    pub fn extends_interface(&self, interface: &ClassDefinition) -> bool {
        self.type_id != interface.type_id
            && self
                .all_interfaces()
                .iter()
                .any(|i| i.type_id == interface.type_id)
    }
}

impl PartialEq for ClassDefinition {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.name == other.name
    }
}

impl Eq for ClassDefinition {}

impl Hash for ClassDefinition {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        self.name.hash(state);
    }
}

/// Builder for [`ClassDefinition`]
///
/// Instance fields are laid out in declaration order after the superclass
/// fields (or the object header), each aligned to its own size.
#[derive(Debug)]
pub struct ClassBuilder {
    name: String,
    type_id: u32,
    kind: ClassKind,
    super_class: Option<Arc<ClassDefinition>>,
    interfaces: Vec<Arc<ClassDefinition>>,
    methods: Vec<(String, String, MethodFlags, bool)>,
    fields: Vec<(String, String, bool)>,
}

impl ClassBuilder {
    /// Start a concrete class
    pub fn new(name: impl Into<String>, type_id: u32) -> Self {
        Self {
            name: name.into(),
            type_id,
            kind: ClassKind::Concrete,
            super_class: None,
            interfaces: Vec::new(),
            methods: Vec::new(),
            fields: Vec::new(),
        }
    }

    /// Start an interface
    pub fn interface(name: impl Into<String>, type_id: u32) -> Self {
        Self {
            kind: ClassKind::Interface,
            ..Self::new(name, type_id)
        }
    }

    /// Mark the class abstract
    pub fn abstract_class(mut self) -> Self {
        self.kind = ClassKind::Abstract;
        self
    }

    /// Set the superclass
    pub fn extends(mut self, parent: &Arc<ClassDefinition>) -> Self {
        self.super_class = Some(parent.clone());
        self
    }

    /// Add an implemented (or extended) interface
    pub fn implements(mut self, interface: &Arc<ClassDefinition>) -> Self {
        self.interfaces.push(interface.clone());
        self
    }

    /// Declare a virtual method with a body
    pub fn method(self, name: &str, descriptor: &str) -> Self {
        self.method_with_flags(name, descriptor, MethodFlags::default(), true)
    }

    /// Declare an abstract method
    pub fn abstract_method(self, name: &str, descriptor: &str) -> Self {
        let flags = MethodFlags {
            is_abstract: true,
            ..MethodFlags::default()
        };
        self.method_with_flags(name, descriptor, flags, false)
    }

    /// Declare a native method, optionally with a linkable implementation
    pub fn native_method(self, name: &str, descriptor: &str, has_body: bool) -> Self {
        let flags = MethodFlags {
            is_native: true,
            ..MethodFlags::default()
        };
        self.method_with_flags(name, descriptor, flags, has_body)
    }

    /// Declare a static method with a body
    pub fn static_method(self, name: &str, descriptor: &str) -> Self {
        let flags = MethodFlags {
            is_static: true,
            ..MethodFlags::default()
        };
        self.method_with_flags(name, descriptor, flags, true)
    }

    /// Declare a method with explicit flags
    pub fn method_with_flags(
        mut self,
        name: &str,
        descriptor: &str,
        flags: MethodFlags,
        has_body: bool,
    ) -> Self {
        self.methods
            .push((name.to_string(), descriptor.to_string(), flags, has_body));
        self
    }

    /// Declare an instance field
    pub fn field(mut self, name: &str, descriptor: &str) -> Self {
        self.fields
            .push((name.to_string(), descriptor.to_string(), false));
        self
    }

    /// Declare a static field
    pub fn static_field(mut self, name: &str, descriptor: &str) -> Self {
        self.fields
            .push((name.to_string(), descriptor.to_string(), true));
        self
    }

    /// Resolve descriptors and compute the instance layout
    pub fn build(self) -> Result<Arc<ClassDefinition>> {
        let methods = self
            .methods
            .into_iter()
            .map(|(name, descriptor, flags, has_body)| {
                let descriptor = MethodDescriptor::parse(&descriptor)?;
                Ok(Arc::new(MethodElement::new(
                    self.name.clone(),
                    name,
                    descriptor,
                    flags,
                    has_body,
                )))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut cursor = match (&self.super_class, self.kind) {
            (_, ClassKind::Interface) => 0,
            (Some(parent), _) => parent.instance_size(),
            (None, _) => OBJECT_HEADER_SIZE,
        };
        let mut fields = Vec::with_capacity(self.fields.len());
        for (name, descriptor, is_static) in self.fields {
            let descriptor = TypeDescriptor::parse(&descriptor)?;
            let offset = if is_static {
                0
            } else {
                let size = descriptor.value_type().size();
                let offset = align_up(cursor, size);
                cursor = offset + size;
                offset
            };
            fields.push(FieldElement {
                name,
                descriptor,
                is_static,
                offset,
            });
        }

        Ok(Arc::new(ClassDefinition {
            name: self.name,
            type_id: self.type_id,
            kind: self.kind,
            super_class: self.super_class,
            interfaces: self.interfaces,
            methods,
            fields,
            instance_size: align_up(cursor, OBJECT_HEADER_SIZE),
        }))
    }
}

/// All classes of the program, keyed by name
#[derive(Debug, Default)]
pub struct Program {
    classes: BTreeMap<String, Arc<ClassDefinition>>,
}

impl Program {
    /// Empty program
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class; its type id must be unique and outside the reserved range
    pub fn add(&mut self, class: Arc<ClassDefinition>) -> Result<()> {
        if class.type_id() < FIRST_CLASS_TYPE_ID {
            return Err(Error::internal(format!(
                "Class {} uses reserved type id {}",
                class.name(),
                class.type_id()
            )));
        }
        if let Some(other) = self
            .classes
            .values()
            .find(|c| c.type_id() == class.type_id())
        {
            return Err(Error::internal(format!(
                "Type id {} assigned to both {} and {}",
                class.type_id(),
                other.name(),
                class.name()
            )));
        }
        if self.classes.contains_key(class.name()) {
            return Err(Error::internal(format!(
                "Class {} registered twice",
                class.name()
            )));
        }
        self.classes.insert(class.name().to_string(), class);
        Ok(())
    }

    /// Look up a class by internal name
    pub fn class(&self, name: &str) -> Option<&Arc<ClassDefinition>> {
        self.classes.get(name)
    }

    /// All classes ordered by type id
    pub fn classes(&self) -> Vec<Arc<ClassDefinition>> {
        let mut classes: Vec<_> = self.classes.values().cloned().collect();
        classes.sort_by_key(|c| c.type_id());
        classes
    }

    /// Highest assigned type id, or the last reserved id for an empty program
    pub fn max_type_id(&self) -> u32 {
        self.classes
            .values()
            .map(|c| c.type_id())
            .max()
            .unwrap_or(FIRST_CLASS_TYPE_ID - 1)
    }
}

/// Liveness predicate supplied by whole-program analysis
pub trait Reachability: Send + Sync {
    /// Whether the method may be dispatched to virtually
    fn is_method_reachable(&self, method: &MethodElement) -> bool;

    /// Whether the method may be invoked through `interface`
    fn is_dispatch_reachable(&self, interface: &ClassDefinition, method: &MethodElement) -> bool {
        let _ = interface;
        self.is_method_reachable(method)
    }
}

/// Treats every method as live
#[derive(Debug, Clone, Copy, Default)]
pub struct AllReachable;

impl Reachability for AllReachable {
    fn is_method_reachable(&self, _method: &MethodElement) -> bool {
        true
    }
}

/// An explicit set of live methods
///
/// Methods are identified by `name + descriptor`, so marking `f()V` live
/// marks every override of it live as well.
#[derive(Debug, Clone, Default)]
pub struct ReachableSelectors {
    selectors: HashSet<String>,
}

impl ReachableSelectors {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a selector live
    pub fn insert(&mut self, name: &str, descriptor: &str) {
        self.selectors.insert(format!("{}{}", name, descriptor));
    }
}

impl Reachability for ReachableSelectors {
    fn is_method_reachable(&self, method: &MethodElement) -> bool {
        self.selectors
            .contains(&format!("{}{}", method.name(), method.descriptor()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_method_descriptor() {
        let descriptor = MethodDescriptor::parse("(I[JLjava/lang/String;)Z").unwrap();
        assert_eq!(descriptor.params.len(), 3);
        assert_eq!(descriptor.params[0], TypeDescriptor::Int);
        assert_eq!(
            descriptor.params[1],
            TypeDescriptor::Array(Box::new(TypeDescriptor::Long))
        );
        assert_eq!(
            descriptor.params[2],
            TypeDescriptor::Class("java/lang/String".to_string())
        );
        assert_eq!(descriptor.return_type, TypeDescriptor::Boolean);
        assert_eq!(descriptor.to_string(), "(I[JLjava/lang/String;)Z");
    }

    #[test]
    fn test_malformed_descriptor() {
        assert!(MethodDescriptor::parse("I)V").is_err());
        assert!(TypeDescriptor::parse("Ljava/lang/Object").is_err());
        assert!(TypeDescriptor::parse("II").is_err());
    }

    #[test]
    fn test_field_layout() {
        let base = ClassBuilder::new("Base", 20)
            .field("flag", "Z")
            .field("count", "J")
            .build()
            .unwrap();
        assert_eq!(base.instance_field("flag").unwrap().offset, 8);
        assert_eq!(base.instance_field("count").unwrap().offset, 16);
        assert_eq!(base.instance_size(), 24);

        let derived = ClassBuilder::new("Derived", 21)
            .extends(&base)
            .field("x", "I")
            .static_field("shared", "I")
            .build()
            .unwrap();
        assert_eq!(derived.instance_field("x").unwrap().offset, 24);
        assert_eq!(derived.instance_fields().len(), 3);
        assert_eq!(derived.instance_size(), 32);
    }

    #[test]
    fn test_instance_methods_replace_overrides_in_place() {
        let a = ClassBuilder::new("A", 20)
            .method("f", "()V")
            .method("g", "()V")
            .build()
            .unwrap();
        let b = ClassBuilder::new("B", 21)
            .extends(&a)
            .method("g", "()V")
            .method("h", "()V")
            .static_method("s", "()V")
            .build()
            .unwrap();
        let methods = b.instance_methods();
        let names: Vec<String> = methods.iter().map(|m| m.to_string()).collect();
        assert_eq!(names, vec!["A.f()V", "B.g()V", "B.h()V"]);
    }

    #[test]
    fn test_resolve_prefers_default_over_abstract() {
        let i = ClassBuilder::interface("I", 20)
            .abstract_method("run", "()V")
            .build()
            .unwrap();
        let j = ClassBuilder::interface("J", 21)
            .implements(&i)
            .method("run", "()V")
            .build()
            .unwrap();
        let c = ClassBuilder::new("C", 22).implements(&j).build().unwrap();
        let descriptor = MethodDescriptor::parse("()V").unwrap();
        let resolved = c.resolve_method("run", &descriptor).unwrap();
        assert_eq!(resolved.enclosing(), "J");
        assert_eq!(c.all_interfaces().len(), 2);
    }

    #[test]
    fn test_conflicting_defaults_do_not_resolve() {
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
        let descriptor = MethodDescriptor::parse("()V").unwrap();
        assert!(both.resolve_method("greet", &descriptor).is_none());
        assert!(!left.extends_interface(&right));
    }

    #[test]
    fn test_program_rejects_reserved_and_duplicate_ids() {
        let mut program = Program::new();
        let reserved = ClassBuilder::new("R", 5).build().unwrap();
        assert!(program.add(reserved).is_err());

        let a = ClassBuilder::new("A", 19).build().unwrap();
        let b = ClassBuilder::new("B", 19).build().unwrap();
        program.add(a).unwrap();
        assert!(program.add(b).is_err());
        assert_eq!(program.max_type_id(), 19);
    }
}
