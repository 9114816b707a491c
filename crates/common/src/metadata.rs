//! Read-only boundary with the external metadata system.
//!
//! The verifier never builds classes, fields or methods itself. It asks a
//! [`TypeSystem`] to resolve tokens and answer subtyping questions, and
//! treats every answer as immutable for the length of a session.

use bitflags::bitflags;

use crate::types::{ClassId, Primitive, Type};

/// A metadata token as it appears inline in the instruction stream.
pub type Token = u32;

bitflags! {
    /// ECMA-335 `MethodAttributes` bits the verifier consults.
    pub struct MethodAttributes: u16 {
        const STATIC = 0x0010;
        const FINAL = 0x0020;
        const VIRTUAL = 0x0040;
        const ABSTRACT = 0x0400;
        const SPECIAL_NAME = 0x0800;
        const RT_SPECIAL_NAME = 0x1000;
    }
}

bitflags! {
    /// ECMA-335 `FieldAttributes` bits the verifier consults.
    pub struct FieldAttributes: u16 {
        const STATIC = 0x0010;
        const INIT_ONLY = 0x0020;
        const LITERAL = 0x0040;
    }
}

/// A method signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    /// The method takes a `this` argument.
    pub has_this: bool,
    /// Variable-argument calling convention.
    pub vararg: bool,
    /// Declared parameters, excluding `this`.
    pub params: Vec<Type>,
    /// Return type; `Primitive::Void` when nothing is returned.
    pub ret: Type,
}

impl Signature {
    /// A static signature.
    pub fn new(params: Vec<Type>, ret: Type) -> Self {
        Self {
            has_this: false,
            vararg: false,
            params,
            ret,
        }
    }

    /// An instance signature.
    pub fn instance(params: Vec<Type>, ret: Type) -> Self {
        Self {
            has_this: true,
            ..Self::new(params, ret)
        }
    }

    /// The return type, or `None` for void.
    pub fn returns(&self) -> Option<&Type> {
        if self.ret.is_void() {
            None
        } else {
            Some(&self.ret)
        }
    }
}

/// A resolved field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldRef {
    /// Declaring type: `Type::Class` or `Type::ValueType`.
    pub owner: Type,
    pub name: String,
    pub ty: Type,
    pub attributes: FieldAttributes,
}

impl FieldRef {
    pub fn is_static(&self) -> bool {
        self.attributes.contains(FieldAttributes::STATIC)
    }
}

/// A resolved method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodRef {
    /// Declaring type: `Type::Class` or `Type::ValueType`.
    pub owner: Type,
    pub name: String,
    pub signature: Signature,
    pub attributes: MethodAttributes,
}

impl MethodRef {
    pub fn is_static(&self) -> bool {
        self.attributes.contains(MethodAttributes::STATIC)
    }

    pub fn is_virtual(&self) -> bool {
        self.attributes.contains(MethodAttributes::VIRTUAL)
    }

    pub fn is_abstract(&self) -> bool {
        self.attributes.contains(MethodAttributes::ABSTRACT)
    }

    /// Instance constructors are named `.ctor` and flagged runtime-special.
    pub fn is_constructor(&self) -> bool {
        self.name == ".ctor"
            && self.attributes.contains(MethodAttributes::RT_SPECIAL_NAME)
            && !self.is_static()
    }
}

/// What an `ldtoken` operand resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Type(Type),
    Field(FieldRef),
    Method(MethodRef),
}

/// Classes the verifier needs by identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WellKnown {
    Object,
    String,
    /// Base class of every catchable exception.
    Exception,
    ValueType,
    RuntimeTypeHandle,
    RuntimeFieldHandle,
    RuntimeMethodHandle,
    RuntimeArgumentHandle,
}

/// Queries against the external class/type system.
///
/// Every query is read-only. Resolution failures are reported as `None`
/// (or `false`) and become verification `TypeError`s.
pub trait TypeSystem {
    /// Resolve a TypeDef/TypeRef/TypeSpec token.
    fn resolve_type(&self, token: Token) -> Option<Type>;

    /// Resolve a field token.
    fn resolve_field(&self, token: Token) -> Option<FieldRef>;

    /// Resolve a method token.
    fn resolve_method(&self, token: Token) -> Option<MethodRef>;

    /// Resolve a stand-alone signature token (`calli`).
    fn resolve_signature(&self, token: Token) -> Option<Signature>;

    /// Whether a user-string token exists (`ldstr`).
    fn resolve_string(&self, token: Token) -> bool;

    /// Resolve an `ldtoken` operand of any kind.
    fn resolve_token(&self, token: Token) -> Option<TokenKind> {
        if let Some(ty) = self.resolve_type(token) {
            return Some(TokenKind::Type(ty));
        }
        if let Some(field) = self.resolve_field(token) {
            return Some(TokenKind::Field(field));
        }
        self.resolve_method(token).map(TokenKind::Method)
    }

    /// Direct base class; `None` for `Object` and interfaces.
    fn parent(&self, class: ClassId) -> Option<ClassId>;

    /// Reflexive: `class` is `ancestor` or derives from it.
    fn is_subclass(&self, class: ClassId, ancestor: ClassId) -> bool;

    /// `class` (or one of its ancestors) implements `interface`.
    fn implements(&self, class: ClassId, interface: ClassId) -> bool;

    fn is_interface(&self, class: ClassId) -> bool;

    /// Underlying primitive of an enum value type.
    fn enum_underlying(&self, class: ClassId) -> Option<Primitive>;

    /// Whether the method being verified may name `ty`.
    fn is_accessible(&self, ty: &Type) -> bool;

    fn well_known(&self, which: WellKnown) -> ClassId;

    /// The class a boxed primitive becomes.
    fn primitive_class(&self, primitive: Primitive) -> Option<ClassId>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn void_signature_returns_nothing() {
        let sig = Signature::new(vec![Type::Primitive(Primitive::I4)], Primitive::Void.into());
        assert_eq!(sig.returns(), None);
        assert!(!sig.has_this);
        let sig = Signature::instance(vec![], Primitive::I8.into());
        assert_eq!(sig.returns(), Some(&Type::Primitive(Primitive::I8)));
        assert!(sig.has_this);
    }

    #[test]
    fn constructor_detection() {
        let ctor = MethodRef {
            owner: Type::Class(ClassId(4)),
            name: ".ctor".to_string(),
            signature: Signature::instance(vec![], Primitive::Void.into()),
            attributes: MethodAttributes::SPECIAL_NAME | MethodAttributes::RT_SPECIAL_NAME,
        };
        assert!(ctor.is_constructor());

        let cctor = MethodRef {
            name: ".cctor".to_string(),
            attributes: ctor.attributes | MethodAttributes::STATIC,
            ..ctor.clone()
        };
        assert!(!cctor.is_constructor());
    }

    #[test]
    fn field_static_flag() {
        let field = FieldRef {
            owner: Type::Class(ClassId(1)),
            name: "count".to_string(),
            ty: Primitive::I4.into(),
            attributes: FieldAttributes::STATIC | FieldAttributes::INIT_ONLY,
        };
        assert!(field.is_static());
    }
}
