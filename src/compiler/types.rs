//! Frontend type system
//!
//! The closed set of types carried by graph nodes and pointers. Signedness
//! is part of the integer type but never changes its storage width; it only
//! steers instruction selection during lowering.

use crate::compiler::program::ClassDefinition;
use std::fmt;
use std::sync::Arc;

/// Size of a pointer (and of a reference) in bytes
pub const POINTER_SIZE: i64 = 8;

/// Integer signedness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signedness {
    /// Two's complement signed
    Signed,
    /// Unsigned
    Unsigned,
}

/// Numeric classification used for instruction selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumericKind {
    /// IEEE floating point
    Float,
    /// Signed integer
    Signed,
    /// Unsigned integer, boolean, or address
    Unsigned,
}

/// A frontend type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// No value
    Void,
    /// Single bit truth value
    Boolean,
    /// Integer of a byte width in {1, 2, 4, 8}
    Integer {
        /// Signed or unsigned
        signedness: Signedness,
        /// Width in bytes
        size: u8,
    },
    /// Floating point of a byte width in {4, 8}
    Float {
        /// Width in bytes
        size: u8,
    },
    /// Opaque object reference
    Reference,
    /// Pointer to a typed location
    Pointer(Box<Type>),
    /// Fixed-length array
    Array(ArrayType),
    /// Structure or union with explicit member layout
    Compound(Arc<CompoundType>),
    /// Instance of a class, laid out by its field offsets
    Object(Arc<ClassDefinition>),
    /// Function signature
    Function(Arc<FunctionType>),
}

/// Element type and length of an array
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArrayType {
    /// Element type
    pub element: Box<Type>,
    /// Declared element count
    pub count: i64,
}

/// Function signature
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionType {
    /// Return type
    pub return_type: Type,
    /// Parameter types in order
    pub params: Vec<Type>,
}

impl Type {
    /// Signed integer of the given byte width
    pub fn signed(size: u8) -> Self {
        Type::Integer {
            signedness: Signedness::Signed,
            size,
        }
    }

    /// Unsigned integer of the given byte width
    pub fn unsigned(size: u8) -> Self {
        Type::Integer {
            signedness: Signedness::Unsigned,
            size,
        }
    }

    /// Floating point type of the given byte width
    pub fn float(size: u8) -> Self {
        Type::Float { size }
    }

    /// Pointer to `pointee`
    pub fn pointer_to(pointee: Type) -> Self {
        Type::Pointer(Box::new(pointee))
    }

    /// Array of `count` elements
    pub fn array(element: Type, count: i64) -> Self {
        Type::Array(ArrayType {
            element: Box::new(element),
            count,
        })
    }

    /// Size in bytes
    pub fn size(&self) -> i64 {
        match self {
            Type::Void => 0,
            Type::Boolean => 1,
            Type::Integer { size, .. } | Type::Float { size } => *size as i64,
            Type::Reference | Type::Pointer(_) => POINTER_SIZE,
            Type::Array(array) => array.element.size() * array.count,
            Type::Compound(compound) => compound.size,
            Type::Object(class) => class.instance_size(),
            Type::Function(_) => 0,
        }
    }

    /// Alignment in bytes
    pub fn align(&self) -> i64 {
        match self {
            Type::Void | Type::Function(_) => 1,
            Type::Array(array) => array.element.align(),
            Type::Compound(compound) => compound.align,
            Type::Object(class) => class.instance_align(),
            other => other.size().max(1),
        }
    }

    /// True for floating point types
    pub fn is_float(&self) -> bool {
        matches!(self, Type::Float { .. })
    }

    /// True for signed integer types
    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            Type::Integer {
                signedness: Signedness::Signed,
                ..
            }
        )
    }

    /// Classify a scalar type for instruction selection
    ///
    /// Returns `None` for aggregates, `Void` and function types.
    pub fn numeric_kind(&self) -> Option<NumericKind> {
        match self {
            Type::Float { .. } => Some(NumericKind::Float),
            Type::Integer {
                signedness: Signedness::Signed,
                ..
            } => Some(NumericKind::Signed),
            Type::Integer {
                signedness: Signedness::Unsigned,
                ..
            }
            | Type::Boolean
            | Type::Reference
            | Type::Pointer(_) => Some(NumericKind::Unsigned),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Boolean => write!(f, "boolean"),
            Type::Integer {
                signedness: Signedness::Signed,
                size,
            } => write!(f, "s{}", *size as u32 * 8),
            Type::Integer {
                signedness: Signedness::Unsigned,
                size,
            } => write!(f, "u{}", *size as u32 * 8),
            Type::Float { size } => write!(f, "f{}", *size as u32 * 8),
            Type::Reference => write!(f, "ref"),
            Type::Pointer(pointee) => write!(f, "{}*", pointee),
            Type::Array(array) => write!(f, "[{} x {}]", array.count, array.element),
            Type::Compound(compound) => write!(f, "{} {}", compound.tag, compound.name),
            Type::Object(class) => write!(f, "object {}", class.name()),
            Type::Function(func) => {
                write!(f, "{} (", func.return_type)?;
                for (i, param) in func.params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", param)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Compound tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompoundTag {
    /// `struct`
    Struct,
    /// `union`
    Union,
}

impl fmt::Display for CompoundTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompoundTag::Struct => write!(f, "struct"),
            CompoundTag::Union => write!(f, "union"),
        }
    }
}

/// A member of a compound type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Member {
    /// Member name
    pub name: String,
    /// Byte offset from the start of the compound
    pub offset: i64,
    /// Member type
    pub ty: Type,
    /// Member alignment in bytes
    pub align: i64,
}

/// Structure or union with explicit member layout
///
/// Members are kept in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompoundType {
    /// Struct or union
    pub tag: CompoundTag,
    /// Type name
    pub name: String,
    /// Members in declaration order
    pub members: Vec<Member>,
    /// Total size in bytes
    pub size: i64,
    /// Alignment in bytes
    pub align: i64,
}

impl CompoundType {
    /// Create a compound with fully explicit layout
    pub fn new(
        tag: CompoundTag,
        name: impl Into<String>,
        size: i64,
        align: i64,
        members: Vec<Member>,
    ) -> Self {
        Self {
            tag,
            name: name.into(),
            members,
            size,
            align,
        }
    }

    /// Lay out a C-style struct: each member at the next offset aligned to
    /// the member's alignment, total size rounded up to the largest alignment.
    pub fn layout_struct(name: impl Into<String>, fields: Vec<(String, Type)>) -> Self {
        let mut members = Vec::with_capacity(fields.len());
        let mut offset = 0;
        let mut align = 1;
        for (name, ty) in fields {
            let member_align = ty.align();
            offset = align_up(offset, member_align);
            align = align.max(member_align);
            let size = ty.size();
            members.push(Member {
                name,
                offset,
                ty,
                align: member_align,
            });
            offset += size;
        }
        Self::new(
            CompoundTag::Struct,
            name,
            align_up(offset, align),
            align,
            members,
        )
    }

    /// Look up a member by name
    pub fn member(&self, name: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.name == name)
    }

    /// The last member in declaration order starting at or before `offset`
    pub fn member_at_or_before(&self, offset: i64) -> Option<(usize, &Member)> {
        self.members
            .iter()
            .enumerate()
            .filter(|(_, m)| m.offset <= offset)
            .last()
    }
}

/// Round `value` up to the next multiple of `align`
pub fn align_up(value: i64, align: i64) -> i64 {
    if align <= 1 {
        value
    } else {
        (value + align - 1) / align * align
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_sizes() {
        assert_eq!(Type::Boolean.size(), 1);
        assert_eq!(Type::signed(4).size(), 4);
        assert_eq!(Type::float(8).size(), 8);
        assert_eq!(Type::Reference.size(), POINTER_SIZE);
        assert_eq!(Type::array(Type::unsigned(2), 5).size(), 10);
    }

    #[test]
    fn test_numeric_kind() {
        assert_eq!(Type::float(4).numeric_kind(), Some(NumericKind::Float));
        assert_eq!(Type::signed(8).numeric_kind(), Some(NumericKind::Signed));
        assert_eq!(Type::unsigned(1).numeric_kind(), Some(NumericKind::Unsigned));
        assert_eq!(Type::Boolean.numeric_kind(), Some(NumericKind::Unsigned));
        assert_eq!(Type::Void.numeric_kind(), None);
    }

    #[test]
    fn test_layout_struct_pads_members() {
        let compound = CompoundType::layout_struct(
            "pair",
            vec![
                ("tag".to_string(), Type::signed(1)),
                ("value".to_string(), Type::signed(8)),
                ("flag".to_string(), Type::Boolean),
            ],
        );
        let offsets: Vec<i64> = compound.members.iter().map(|m| m.offset).collect();
        assert_eq!(offsets, vec![0, 8, 16]);
        assert_eq!(compound.size, 24);
        assert_eq!(compound.align, 8);
    }

    #[test]
    fn test_member_at_or_before_picks_last() {
        let compound = CompoundType::new(
            CompoundTag::Union,
            "u",
            8,
            8,
            vec![
                Member {
                    name: "a".to_string(),
                    offset: 0,
                    ty: Type::signed(4),
                    align: 4,
                },
                Member {
                    name: "b".to_string(),
                    offset: 0,
                    ty: Type::signed(8),
                    align: 8,
                },
            ],
        );
        let (index, member) = compound.member_at_or_before(4).unwrap();
        assert_eq!(index, 1);
        assert_eq!(member.name, "b");
    }
}
