//! The verifier's type model.
//!
//! Two layers exist. [`EngineType`] is the coarse lattice every stack slot
//! is tagged with; [`Type`] is the precise type reference handed out by the
//! metadata system. A [`StackItem`] pairs the two.

use std::fmt;

/// Coarse engine type of an evaluation-stack slot.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineType {
    /// 32-bit integer.
    I4 = 0,
    /// 64-bit integer.
    I8 = 1,
    /// Native-width integer.
    I = 2,
    /// Floating point.
    F = 3,
    /// Managed pointer.
    M = 4,
    /// Object reference.
    O = 5,
    /// Unmanaged / transient pointer.
    T = 6,
    /// Managed value (struct).
    MV = 7,
    /// Invalid or unreachable.
    Invalid = 8,
}

/// The eight valid engine types, in table order.
pub const ALL_ENGINE_TYPES: [EngineType; 8] = [
    EngineType::I4,
    EngineType::I8,
    EngineType::I,
    EngineType::F,
    EngineType::M,
    EngineType::O,
    EngineType::T,
    EngineType::MV,
];

impl EngineType {
    /// Row/column index into the 8x8 inference tables, `None` for `Invalid`.
    pub fn table_index(self) -> Option<usize> {
        match self {
            EngineType::Invalid => None,
            other => Some(other as usize),
        }
    }

    /// Numeric categories carry no precise type.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            EngineType::I4 | EngineType::I8 | EngineType::I | EngineType::F
        )
    }

    /// Integer categories.
    pub fn is_integer(self) -> bool {
        matches!(self, EngineType::I4 | EngineType::I8 | EngineType::I)
    }

    /// Managed or transient pointers.
    pub fn is_pointer(self) -> bool {
        matches!(self, EngineType::M | EngineType::T)
    }
}

impl fmt::Display for EngineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineType::I4 => "I4",
            EngineType::I8 => "I8",
            EngineType::I => "I",
            EngineType::F => "F",
            EngineType::M => "M",
            EngineType::O => "O",
            EngineType::T => "T",
            EngineType::MV => "MV",
            EngineType::Invalid => "Invalid",
        };
        f.write_str(name)
    }
}

/// Built-in element types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Void,
    Boolean,
    Char,
    I1,
    U1,
    I2,
    U2,
    I4,
    U4,
    I8,
    U8,
    R4,
    R8,
    /// Native int.
    I,
    /// Native unsigned int.
    U,
    /// The typed-reference struct built by `mkrefany`.
    TypedRef,
}

impl Primitive {
    /// Collapse signedness: the verification form of a primitive.
    pub fn reduce(self) -> Primitive {
        match self {
            Primitive::Boolean | Primitive::U1 => Primitive::I1,
            Primitive::Char | Primitive::U2 => Primitive::I2,
            Primitive::U4 => Primitive::I4,
            Primitive::U8 => Primitive::I8,
            Primitive::U => Primitive::I,
            other => other,
        }
    }

    /// Engine type a value of this primitive occupies on the stack.
    pub fn engine_type(self) -> EngineType {
        match self {
            Primitive::Boolean
            | Primitive::Char
            | Primitive::I1
            | Primitive::U1
            | Primitive::I2
            | Primitive::U2
            | Primitive::I4
            | Primitive::U4 => EngineType::I4,
            Primitive::I8 | Primitive::U8 => EngineType::I8,
            Primitive::I | Primitive::U => EngineType::I,
            Primitive::R4 | Primitive::R8 => EngineType::F,
            Primitive::TypedRef => EngineType::MV,
            Primitive::Void => EngineType::Invalid,
        }
    }
}

/// Opaque handle to a class, interface or value type owned by the
/// metadata system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

/// A precise type reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Primitive(Primitive),
    /// Reference class or interface.
    Class(ClassId),
    /// Non-primitive value type (struct or enum).
    ValueType(ClassId),
    /// Single-dimensional, zero-based array.
    Array(Box<Type>),
    /// Managed pointer to the inner type.
    ByRef(Box<Type>),
    /// Unmanaged pointer to the inner type.
    Pointer(Box<Type>),
    /// Type of the `null` literal; assignable to every reference type.
    Null,
}

impl Type {
    pub fn array(element: Type) -> Type {
        Type::Array(Box::new(element))
    }

    pub fn by_ref(inner: Type) -> Type {
        Type::ByRef(Box::new(inner))
    }

    pub fn pointer(inner: Type) -> Type {
        Type::Pointer(Box::new(inner))
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Primitive(Primitive::Void))
    }

    /// Reference types live in `O` slots.
    pub fn is_reference(&self) -> bool {
        matches!(self, Type::Class(_) | Type::Array(_) | Type::Null)
    }
}

impl From<Primitive> for Type {
    fn from(p: Primitive) -> Self {
        Type::Primitive(p)
    }
}

/// One simulated evaluation-stack slot.
///
/// `ty` holds the object type for `O`, the value type for `MV` and the
/// *pointee* type for `M` and `T`. Numeric slots carry no precise type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StackItem {
    pub engine: EngineType,
    pub ty: Option<Type>,
}

impl StackItem {
    /// A numeric slot.
    pub fn numeric(engine: EngineType) -> Self {
        Self { engine, ty: None }
    }

    pub fn i4() -> Self {
        Self::numeric(EngineType::I4)
    }

    pub fn i8() -> Self {
        Self::numeric(EngineType::I8)
    }

    pub fn native_int() -> Self {
        Self::numeric(EngineType::I)
    }

    pub fn float() -> Self {
        Self::numeric(EngineType::F)
    }

    /// The `null` literal.
    pub fn null() -> Self {
        Self::object(Type::Null)
    }

    pub fn object(ty: Type) -> Self {
        Self {
            engine: EngineType::O,
            ty: Some(ty),
        }
    }

    pub fn value(ty: Type) -> Self {
        Self {
            engine: EngineType::MV,
            ty: Some(ty),
        }
    }

    /// Managed pointer to `pointee`.
    pub fn managed_ptr(pointee: Type) -> Self {
        Self {
            engine: EngineType::M,
            ty: Some(pointee),
        }
    }

    /// Transient pointer to `pointee`.
    pub fn transient_ptr(pointee: Type) -> Self {
        Self {
            engine: EngineType::T,
            ty: Some(pointee),
        }
    }

    pub fn is_null(&self) -> bool {
        self.engine == EngineType::O && self.ty == Some(Type::Null)
    }
}

impl fmt::Display for StackItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ty {
            Some(ty) => write!(f, "{}({:?})", self.engine, ty),
            None => write!(f, "{}", self.engine),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_indices_are_dense() {
        for (i, engine) in ALL_ENGINE_TYPES.iter().enumerate() {
            assert_eq!(engine.table_index(), Some(i));
        }
        assert_eq!(EngineType::Invalid.table_index(), None);
    }

    #[test]
    fn reduce_collapses_signedness() {
        assert_eq!(Primitive::U1.reduce(), Primitive::I1);
        assert_eq!(Primitive::Boolean.reduce(), Primitive::I1);
        assert_eq!(Primitive::Char.reduce(), Primitive::I2);
        assert_eq!(Primitive::U8.reduce(), Primitive::I8);
        assert_eq!(Primitive::U.reduce(), Primitive::I);
        assert_eq!(Primitive::I4.reduce(), Primitive::I4);
    }

    #[test]
    fn primitive_engine_types() {
        assert_eq!(Primitive::Boolean.engine_type(), EngineType::I4);
        assert_eq!(Primitive::U8.engine_type(), EngineType::I8);
        assert_eq!(Primitive::U.engine_type(), EngineType::I);
        assert_eq!(Primitive::R4.engine_type(), EngineType::F);
        assert_eq!(Primitive::TypedRef.engine_type(), EngineType::MV);
        assert_eq!(Primitive::Void.engine_type(), EngineType::Invalid);
    }

    #[test]
    fn null_item() {
        let null = StackItem::null();
        assert!(null.is_null());
        assert_eq!(null.engine, EngineType::O);
        assert!(!StackItem::object(Type::Class(ClassId(1))).is_null());
    }

    #[test]
    fn display_items() {
        assert_eq!(StackItem::i4().to_string(), "I4");
        assert_eq!(
            StackItem::object(Type::Class(ClassId(3))).to_string(),
            "O(Class(ClassId(3)))"
        );
    }
}
