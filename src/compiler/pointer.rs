//! Symbolic pointer model
//!
//! A [`Pointer`] is a typed address expressed as a root plus a byte offset.
//! Derived pointers (array elements, compound members, object fields and raw
//! element strides) wrap the pointer they were derived from, so a pointer
//! remembers how it was reached while still comparing equal to any other
//! pointer with the same root and cumulative offset.
//!
//! [`Pointer::offset_in_bytes`] goes the other way: it turns a raw byte
//! displacement into the most specific structured pointer it can find.

use crate::compiler::program::MethodElement;
use crate::compiler::types::{FunctionType, Type};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use thiserror::Error;

/// Failure to derive a pointer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PointerError {
    /// The offset falls outside the pointee and sibling reinterpretation was not allowed
    #[error("Offset {offset} is outside of pointee {pointee} of size {size}")]
    OutOfBounds {
        /// Requested byte offset
        offset: i64,
        /// Pointee size in bytes
        size: i64,
        /// Pointee type
        pointee: String,
    },

    /// A non-zero offset into a pointee with no storage
    #[error("Offset {offset} into zero-sized pointee {pointee}")]
    ZeroSized {
        /// Requested byte offset
        offset: i64,
        /// Pointee type
        pointee: String,
    },

    /// No member, element or field of the pointee covers the offset
    #[error("Offset {offset} cannot be attributed to any part of {pointee}")]
    Unattributable {
        /// Requested byte offset
        offset: i64,
        /// Pointee type
        pointee: String,
    },

    /// A structured derivation was applied to the wrong pointee type
    #[error("Cannot take {what} of pointer to {pointee}")]
    WrongPointee {
        /// Derivation attempted
        what: &'static str,
        /// Pointee type
        pointee: String,
    },

    /// Member index or field name does not exist
    #[error("No {what} '{name}' in {pointee}")]
    NoSuchMember {
        /// Member or field
        what: &'static str,
        /// Requested member
        name: String,
        /// Pointee type
        pointee: String,
    },

    /// The cumulative byte offset does not fit in 64 bits
    #[error("Byte offset overflows deriving {what} of {pointee}")]
    Overflow {
        /// Derivation attempted
        what: &'static str,
        /// Pointee type
        pointee: String,
    },
}

/// The non-decomposable base of a pointer
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RootPointer {
    /// A global data symbol
    Global {
        /// Symbol name
        symbol: String,
    },
    /// The entry address of a compiled method
    MethodAddress {
        /// Method symbol
        symbol: String,
    },
    /// A build-time memory region with no symbol of its own
    Memory {
        /// Region identity
        id: u64,
    },
}

impl RootPointer {
    /// Symbol name, if the root has one
    pub fn symbol(&self) -> Option<&str> {
        match self {
            RootPointer::Global { symbol } | RootPointer::MethodAddress { symbol } => Some(symbol),
            RootPointer::Memory { .. } => None,
        }
    }
}

/// How a pointer was derived from its base
#[derive(Debug, Clone)]
pub enum PointerKind {
    /// The root itself
    Root(RootPointer),
    /// Element `index` of an array pointee
    Element {
        /// Array pointer
        base: Pointer,
        /// Element index, possibly past the declared count
        index: i64,
    },
    /// A member of a compound pointee
    Member {
        /// Compound pointer
        base: Pointer,
        /// Index into the compound's members
        index: usize,
    },
    /// An instance field of an object pointee
    InstanceField {
        /// Object pointer
        base: Pointer,
        /// Field name
        name: String,
    },
    /// `count` whole pointees past the base
    Offset {
        /// Base pointer
        base: Pointer,
        /// Stride count
        count: i64,
    },
}

#[derive(Debug)]
struct PointerData {
    kind: PointerKind,
    pointee: Type,
    root: RootPointer,
    offset: i64,
}

/// A typed symbolic address
#[derive(Debug, Clone)]
pub struct Pointer(Arc<PointerData>);

impl Pointer {
    fn derive(kind: PointerKind, pointee: Type, root: RootPointer, offset: i64) -> Self {
        Pointer(Arc::new(PointerData {
            kind,
            pointee,
            root,
            offset,
        }))
    }

    /// Pointer to a global data symbol
    pub fn global(symbol: impl Into<String>, pointee: Type) -> Self {
        let root = RootPointer::Global {
            symbol: symbol.into(),
        };
        Self::derive(PointerKind::Root(root.clone()), pointee, root, 0)
    }

    /// Pointer to the entry of a compiled method
    pub fn method(method: &MethodElement) -> Self {
        let root = RootPointer::MethodAddress {
            symbol: method.symbol(),
        };
        let pointee = Type::Function(Arc::new(method.function_type()));
        Self::derive(PointerKind::Root(root.clone()), pointee, root, 0)
    }

    /// Pointer to the start of a build-time memory region
    pub fn memory(id: u64, pointee: Type) -> Self {
        let root = RootPointer::Memory { id };
        Self::derive(PointerKind::Root(root.clone()), pointee, root, 0)
    }

    /// Pointer to a function with the given signature at a symbol
    pub fn function(symbol: impl Into<String>, signature: FunctionType) -> Self {
        let root = RootPointer::MethodAddress {
            symbol: symbol.into(),
        };
        let pointee = Type::Function(Arc::new(signature));
        Self::derive(PointerKind::Root(root.clone()), pointee, root, 0)
    }

    /// The pointed-to type
    pub fn pointee(&self) -> &Type {
        &self.0.pointee
    }

    /// Derivation of this pointer
    pub fn kind(&self) -> &PointerKind {
        &self.0.kind
    }

    /// Root pointer
    pub fn root(&self) -> &RootPointer {
        &self.0.root
    }

    /// Cumulative byte offset from the root
    pub fn root_byte_offset(&self) -> i64 {
        self.0.offset
    }

    fn describe(&self) -> String {
        self.pointee().to_string()
    }

    /// `base + count * stride` from this pointer's offset, or an overflow error
    fn displaced(&self, what: &'static str, count: i64, stride: i64) -> Result<i64, PointerError> {
        count
            .checked_mul(stride)
            .and_then(|delta| self.0.offset.checked_add(delta))
            .ok_or_else(|| PointerError::Overflow {
                what,
                pointee: self.describe(),
            })
    }

    /// Element `index` of an array pointee; the index is not bounds checked
    pub fn element(&self, index: i64) -> Result<Pointer, PointerError> {
        let Type::Array(array) = self.pointee() else {
            return Err(PointerError::WrongPointee {
                what: "an element",
                pointee: self.describe(),
            });
        };
        let element = (*array.element).clone();
        let offset = self.displaced("an element", index, element.size())?;
        Ok(Self::derive(
            PointerKind::Element {
                base: self.clone(),
                index,
            },
            element,
            self.0.root.clone(),
            offset,
        ))
    }

    /// Member `index` of a compound pointee
    pub fn member(&self, index: usize) -> Result<Pointer, PointerError> {
        let Type::Compound(compound) = self.pointee() else {
            return Err(PointerError::WrongPointee {
                what: "a member",
                pointee: self.describe(),
            });
        };
        let member = compound
            .members
            .get(index)
            .ok_or_else(|| PointerError::NoSuchMember {
                what: "member",
                name: index.to_string(),
                pointee: self.describe(),
            })?;
        Ok(Self::derive(
            PointerKind::Member {
                base: self.clone(),
                index,
            },
            member.ty.clone(),
            self.0.root.clone(),
            self.displaced("a member", 1, member.offset)?,
        ))
    }

    /// Instance field `name` of an object pointee
    pub fn instance_field(&self, name: &str) -> Result<Pointer, PointerError> {
        let Type::Object(class) = self.pointee() else {
            return Err(PointerError::WrongPointee {
                what: "a field",
                pointee: self.describe(),
            });
        };
        let field = class
            .instance_field(name)
            .ok_or_else(|| PointerError::NoSuchMember {
                what: "field",
                name: name.to_string(),
                pointee: self.describe(),
            })?;
        Ok(Self::derive(
            PointerKind::InstanceField {
                base: self.clone(),
                name: name.to_string(),
            },
            field.ty(),
            self.0.root.clone(),
            self.displaced("a field", 1, field.offset)?,
        ))
    }

    /// Stride `count` whole pointees; zero returns the same pointer
    pub fn offset_by_elements(&self, count: i64) -> Result<Pointer, PointerError> {
        if count == 0 {
            return Ok(self.clone());
        }
        let offset = self.displaced("an element stride", count, self.0.pointee.size())?;
        Ok(Self::derive(
            PointerKind::Offset {
                base: self.clone(),
                count,
            },
            self.0.pointee.clone(),
            self.0.root.clone(),
            offset,
        ))
    }

    /// Resolve a byte displacement into the most specific structured pointer
    ///
    /// With `sibling_array` set, an offset outside the pointee is read as a
    /// stride over an implied array of pointees; that reinterpretation is
    /// allowed at most once. Bounds are half-open: an offset equal to the
    /// pointee size is outside it.
    pub fn offset_in_bytes(&self, offset: i64, sibling_array: bool) -> Result<Pointer, PointerError> {
        if offset == 0 {
            return Ok(self.clone());
        }

        if let Type::Array(array) = self.pointee() {
            let element_size = array.element.size();
            if element_size == 0 {
                return Err(PointerError::ZeroSized {
                    offset,
                    pointee: self.describe(),
                });
            }
            let index = offset.div_euclid(element_size);
            let remainder = offset.rem_euclid(element_size);
            return self.element(index)?.offset_in_bytes(remainder, false);
        }

        let size = self.pointee().size();
        if size == 0 {
            return Err(PointerError::ZeroSized {
                offset,
                pointee: self.describe(),
            });
        }
        if offset < 0 || offset >= size {
            if !sibling_array {
                return Err(PointerError::OutOfBounds {
                    offset,
                    size,
                    pointee: self.describe(),
                });
            }
            let count = offset.div_euclid(size);
            let remainder = offset.rem_euclid(size);
            return self
                .offset_by_elements(count)?
                .offset_in_bytes(remainder, false);
        }

        match self.pointee() {
            Type::Compound(compound) => {
                let (index, member) = compound.member_at_or_before(offset).ok_or_else(|| {
                    PointerError::Unattributable {
                        offset,
                        pointee: self.describe(),
                    }
                })?;
                let residual = offset - member.offset;
                self.member(index)?.offset_in_bytes(residual, false)
            }
            Type::Object(class) => {
                let field = class
                    .instance_fields()
                    .into_iter()
                    .find(|f| f.offset <= offset && offset < f.offset + f.size())
                    .ok_or_else(|| PointerError::Unattributable {
                        offset,
                        pointee: self.describe(),
                    })?;
                let residual = offset - field.offset;
                self.instance_field(&field.name)?
                    .offset_in_bytes(residual, false)
            }
            _ => Err(PointerError::Unattributable {
                offset,
                pointee: self.describe(),
            }),
        }
    }
}

impl PartialEq for Pointer {
    fn eq(&self, other: &Self) -> bool {
        self.0.root == other.0.root && self.0.offset == other.0.offset
    }
}

impl Eq for Pointer {}

impl Hash for Pointer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let mut root = std::collections::hash_map::DefaultHasher::new();
        self.0.root.hash(&mut root);
        let combined = root
            .finish()
            .wrapping_mul(19)
            .wrapping_add(self.0.offset as u64);
        state.write_u64(combined);
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            PointerKind::Root(RootPointer::Global { symbol }) => write!(f, "&{}", symbol),
            PointerKind::Root(RootPointer::MethodAddress { symbol }) => write!(f, "&{}", symbol),
            PointerKind::Root(RootPointer::Memory { id }) => write!(f, "&memory#{}", id),
            PointerKind::Element { base, index } => write!(f, "&({})[{}]", base, index),
            PointerKind::Member { base, index } => match base.pointee() {
                Type::Compound(compound) => {
                    write!(f, "&({})->{}", base, compound.members[*index].name)
                }
                _ => write!(f, "&({})->#{}", base, index),
            },
            PointerKind::InstanceField { base, name } => write!(f, "&({})->{}", base, name),
            PointerKind::Offset { base, count } => write!(f, "({} + {})", base, count),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::types::CompoundType;

    fn pair() -> Type {
        Type::Compound(Arc::new(CompoundType::layout_struct(
            "pair",
            vec![
                ("a".to_string(), Type::signed(4)),
                ("b".to_string(), Type::signed(4)),
            ],
        )))
    }

    #[test]
    fn test_zero_offset_is_identity() {
        let ptr = Pointer::global("g", pair());
        let same = ptr.offset_in_bytes(0, false).unwrap();
        assert!(matches!(same.kind(), PointerKind::Root(_)));
        assert_eq!(same, ptr);
    }

    #[test]
    fn test_compound_member_resolution() {
        let ptr = Pointer::global("g", pair());
        let member = ptr.offset_in_bytes(4, false).unwrap();
        assert!(matches!(member.kind(), PointerKind::Member { index: 1, .. }));
        assert_eq!(member.root_byte_offset(), 4);
    }

    #[test]
    fn test_offset_equal_to_size_is_out_of_bounds() {
        let ptr = Pointer::global("g", pair());
        let err = ptr.offset_in_bytes(8, false).unwrap_err();
        assert!(matches!(err, PointerError::OutOfBounds { offset: 8, size: 8, .. }));

        let sibling = ptr.offset_in_bytes(8, true).unwrap();
        assert!(matches!(sibling.kind(), PointerKind::Offset { count: 1, .. }));
    }

    #[test]
    fn test_negative_sibling_offset() {
        let ptr = Pointer::global("g", pair());
        let back = ptr.offset_in_bytes(-4, true).unwrap();
        assert_eq!(back.root_byte_offset(), -4);
        assert!(matches!(back.kind(), PointerKind::Member { index: 1, .. }));
    }

    #[test]
    fn test_scalar_pointee_is_unattributable() {
        let ptr = Pointer::global("g", Type::signed(8));
        let err = ptr.offset_in_bytes(3, false).unwrap_err();
        assert!(matches!(err, PointerError::Unattributable { offset: 3, .. }));
    }

    #[test]
    fn test_stride_overflow_is_an_error() {
        let ptr = Pointer::global("g", Type::signed(8));
        assert!(matches!(
            ptr.offset_by_elements(i64::MAX / 4),
            Err(PointerError::Overflow { .. })
        ));
        assert_eq!(ptr.offset_by_elements(0).unwrap(), ptr);
        assert_eq!(ptr.offset_by_elements(-2).unwrap().root_byte_offset(), -16);
    }

    #[test]
    fn test_zero_sized_pointee() {
        let ptr = Pointer::global("g", Type::Void);
        assert!(matches!(
            ptr.offset_in_bytes(1, true),
            Err(PointerError::ZeroSized { .. })
        ));
    }
}
