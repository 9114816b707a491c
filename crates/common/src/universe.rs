//! An in-memory [`TypeSystem`].
//!
//! Loaders that materialise types programmatically (and tests) can build a
//! [`TypeUniverse`] class by class and hand out tokens for types, members,
//! signatures and strings. A fresh universe already contains the core
//! library classes the verifier asks for by identity.

use std::collections::{HashMap, HashSet};

use crate::metadata::{FieldRef, MethodRef, Signature, Token, TypeSystem, WellKnown};
use crate::types::{ClassId, Primitive, Type};

/// Token table numbers, as in the high byte of an ECMA-335 token.
const TABLE_FIELD: u32 = 0x04;
const TABLE_METHOD: u32 = 0x06;
const TABLE_SIGNATURE: u32 = 0x11;
const TABLE_TYPE_SPEC: u32 = 0x1B;
const TABLE_STRING: u32 = 0x70;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClassKind {
    Class,
    Interface,
    ValueType,
    Enum(Primitive),
}

#[derive(Debug, Clone)]
struct ClassData {
    name: String,
    kind: ClassKind,
    parent: Option<ClassId>,
    interfaces: Vec<ClassId>,
    accessible: bool,
}

/// A self-contained class universe.
#[derive(Debug, Clone)]
pub struct TypeUniverse {
    classes: Vec<ClassData>,
    well_known: HashMap<WellKnown, ClassId>,
    boxed: HashMap<Primitive, ClassId>,
    types: HashMap<Token, Type>,
    fields: HashMap<Token, FieldRef>,
    methods: HashMap<Token, MethodRef>,
    signatures: HashMap<Token, Signature>,
    strings: HashMap<Token, String>,
    next_row: HashMap<u32, u32>,
}

impl Default for TypeUniverse {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeUniverse {
    /// A universe holding the core library classes.
    pub fn new() -> Self {
        let mut universe = Self {
            classes: Vec::new(),
            well_known: HashMap::new(),
            boxed: HashMap::new(),
            types: HashMap::new(),
            fields: HashMap::new(),
            methods: HashMap::new(),
            signatures: HashMap::new(),
            strings: HashMap::new(),
            next_row: HashMap::new(),
        };

        let object = universe.insert("System.Object", ClassKind::Class, None);
        let value_type = universe.insert("System.ValueType", ClassKind::Class, Some(object));
        let string = universe.insert("System.String", ClassKind::Class, Some(object));
        let exception = universe.insert("System.Exception", ClassKind::Class, Some(object));
        universe.well_known.insert(WellKnown::Object, object);
        universe.well_known.insert(WellKnown::ValueType, value_type);
        universe.well_known.insert(WellKnown::String, string);
        universe.well_known.insert(WellKnown::Exception, exception);

        for (which, name) in [
            (WellKnown::RuntimeTypeHandle, "System.RuntimeTypeHandle"),
            (WellKnown::RuntimeFieldHandle, "System.RuntimeFieldHandle"),
            (WellKnown::RuntimeMethodHandle, "System.RuntimeMethodHandle"),
            (WellKnown::RuntimeArgumentHandle, "System.RuntimeArgumentHandle"),
        ] {
            let id = universe.insert(name, ClassKind::ValueType, Some(value_type));
            universe.well_known.insert(which, id);
        }

        for (primitive, name) in [
            (Primitive::Boolean, "System.Boolean"),
            (Primitive::Char, "System.Char"),
            (Primitive::I1, "System.SByte"),
            (Primitive::U1, "System.Byte"),
            (Primitive::I2, "System.Int16"),
            (Primitive::U2, "System.UInt16"),
            (Primitive::I4, "System.Int32"),
            (Primitive::U4, "System.UInt32"),
            (Primitive::I8, "System.Int64"),
            (Primitive::U8, "System.UInt64"),
            (Primitive::R4, "System.Single"),
            (Primitive::R8, "System.Double"),
            (Primitive::I, "System.IntPtr"),
            (Primitive::U, "System.UIntPtr"),
        ] {
            let id = universe.insert(name, ClassKind::ValueType, Some(value_type));
            universe.boxed.insert(primitive, id);
        }

        universe
    }

    fn insert(&mut self, name: &str, kind: ClassKind, parent: Option<ClassId>) -> ClassId {
        let id = ClassId(self.classes.len() as u32);
        self.classes.push(ClassData {
            name: name.to_string(),
            kind,
            parent,
            interfaces: Vec::new(),
            accessible: true,
        });
        id
    }

    /// Add a reference class deriving from `parent`.
    pub fn add_class(&mut self, name: &str, parent: ClassId) -> ClassId {
        self.insert(name, ClassKind::Class, Some(parent))
    }

    pub fn add_interface(&mut self, name: &str) -> ClassId {
        self.insert(name, ClassKind::Interface, None)
    }

    /// Add a struct deriving from `System.ValueType`.
    pub fn add_value_type(&mut self, name: &str) -> ClassId {
        let parent = self.well_known(WellKnown::ValueType);
        self.insert(name, ClassKind::ValueType, Some(parent))
    }

    /// Add an enum with the given underlying primitive.
    pub fn add_enum(&mut self, name: &str, underlying: Primitive) -> ClassId {
        let parent = self.well_known(WellKnown::ValueType);
        self.insert(name, ClassKind::Enum(underlying), Some(parent))
    }

    /// Record that `class` implements `interface` (or that one interface extends another).
    pub fn add_implementation(&mut self, class: ClassId, interface: ClassId) {
        if let Some(data) = self.classes.get_mut(class.0 as usize) {
            data.interfaces.push(interface);
        }
    }

    /// Hide a class from the method being verified.
    pub fn set_accessible(&mut self, class: ClassId, accessible: bool) {
        if let Some(data) = self.classes.get_mut(class.0 as usize) {
            data.accessible = accessible;
        }
    }

    /// Name a class was registered with.
    pub fn name(&self, class: ClassId) -> Option<&str> {
        self.classes.get(class.0 as usize).map(|c| c.name.as_str())
    }

    fn next_token(&mut self, table: u32) -> Token {
        let row = self.next_row.entry(table).or_insert(0);
        *row += 1;
        (table << 24) | *row
    }

    /// Hand out a type token for `ty`.
    pub fn type_token(&mut self, ty: Type) -> Token {
        let token = self.next_token(TABLE_TYPE_SPEC);
        self.types.insert(token, ty);
        token
    }

    pub fn field_token(&mut self, field: FieldRef) -> Token {
        let token = self.next_token(TABLE_FIELD);
        self.fields.insert(token, field);
        token
    }

    pub fn method_token(&mut self, method: MethodRef) -> Token {
        let token = self.next_token(TABLE_METHOD);
        self.methods.insert(token, method);
        token
    }

    pub fn signature_token(&mut self, signature: Signature) -> Token {
        let token = self.next_token(TABLE_SIGNATURE);
        self.signatures.insert(token, signature);
        token
    }

    pub fn string_token(&mut self, value: &str) -> Token {
        let token = self.next_token(TABLE_STRING);
        self.strings.insert(token, value.to_string());
        token
    }

    fn class(&self, id: ClassId) -> Option<&ClassData> {
        self.classes.get(id.0 as usize)
    }
}

impl TypeSystem for TypeUniverse {
    fn resolve_type(&self, token: Token) -> Option<Type> {
        self.types.get(&token).cloned()
    }

    fn resolve_field(&self, token: Token) -> Option<FieldRef> {
        self.fields.get(&token).cloned()
    }

    fn resolve_method(&self, token: Token) -> Option<MethodRef> {
        self.methods.get(&token).cloned()
    }

    fn resolve_signature(&self, token: Token) -> Option<Signature> {
        self.signatures.get(&token).cloned()
    }

    fn resolve_string(&self, token: Token) -> bool {
        self.strings.contains_key(&token)
    }

    fn parent(&self, class: ClassId) -> Option<ClassId> {
        self.class(class).and_then(|c| c.parent)
    }

    fn is_subclass(&self, class: ClassId, ancestor: ClassId) -> bool {
        let mut current = Some(class);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.class(id).and_then(|c| c.parent);
        }
        false
    }

    fn implements(&self, class: ClassId, interface: ClassId) -> bool {
        let mut to_visit = vec![class];
        let mut seen = HashSet::new();
        seen.insert(class);

        while let Some(id) = to_visit.pop() {
            if id == interface {
                return true;
            }
            let Some(data) = self.class(id) else {
                continue;
            };
            for next in data.parent.iter().chain(data.interfaces.iter()) {
                if seen.insert(*next) {
                    to_visit.push(*next);
                }
            }
        }
        false
    }

    fn is_interface(&self, class: ClassId) -> bool {
        self.class(class)
            .map_or(false, |c| c.kind == ClassKind::Interface)
    }

    fn enum_underlying(&self, class: ClassId) -> Option<Primitive> {
        match self.class(class)?.kind {
            ClassKind::Enum(underlying) => Some(underlying),
            _ => None,
        }
    }

    fn is_accessible(&self, ty: &Type) -> bool {
        match ty {
            Type::Class(id) | Type::ValueType(id) => self.class(*id).map_or(false, |c| c.accessible),
            Type::Array(inner) | Type::ByRef(inner) | Type::Pointer(inner) => {
                self.is_accessible(inner)
            }
            Type::Primitive(_) | Type::Null => true,
        }
    }

    fn well_known(&self, which: WellKnown) -> ClassId {
        // Every WellKnown entry is registered in `new`.
        self.well_known.get(&which).copied().unwrap_or(ClassId(0))
    }

    fn primitive_class(&self, primitive: Primitive) -> Option<ClassId> {
        self.boxed.get(&primitive).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_classes_exist() {
        let u = TypeUniverse::new();
        let object = u.well_known(WellKnown::Object);
        let exception = u.well_known(WellKnown::Exception);
        assert_eq!(u.name(object), Some("System.Object"));
        assert!(u.is_subclass(exception, object));
        assert!(!u.is_subclass(object, exception));
        assert!(u.primitive_class(Primitive::I4).is_some());
        assert!(u.primitive_class(Primitive::TypedRef).is_none());
    }

    #[test]
    fn subclass_is_reflexive_and_transitive() {
        let mut u = TypeUniverse::new();
        let object = u.well_known(WellKnown::Object);
        let animal = u.add_class("Animal", object);
        let dog = u.add_class("Dog", animal);
        assert!(u.is_subclass(dog, dog));
        assert!(u.is_subclass(dog, animal));
        assert!(u.is_subclass(dog, object));
        assert!(!u.is_subclass(animal, dog));
        assert_eq!(u.parent(dog), Some(animal));
        assert_eq!(u.parent(object), None);
    }

    #[test]
    fn interfaces_through_ancestors_and_extension() {
        let mut u = TypeUniverse::new();
        let object = u.well_known(WellKnown::Object);
        let enumerable = u.add_interface("IEnumerable");
        let collection = u.add_interface("ICollection");
        u.add_implementation(collection, enumerable);
        let base = u.add_class("Base", object);
        u.add_implementation(base, collection);
        let derived = u.add_class("Derived", base);
        assert!(u.is_interface(enumerable));
        assert!(!u.is_interface(base));
        assert!(u.implements(derived, collection));
        assert!(u.implements(derived, enumerable));
        assert!(!u.implements(object, enumerable));
    }

    #[test]
    fn enums_report_underlying() {
        let mut u = TypeUniverse::new();
        let color = u.add_enum("Color", Primitive::U1);
        let point = u.add_value_type("Point");
        assert_eq!(u.enum_underlying(color), Some(Primitive::U1));
        assert_eq!(u.enum_underlying(point), None);
    }

    #[test]
    fn tokens_resolve_by_table() {
        let mut u = TypeUniverse::new();
        let string = u.well_known(WellKnown::String);
        let t = u.type_token(Type::Class(string));
        let s = u.string_token("hello");
        assert_eq!(t >> 24, TABLE_TYPE_SPEC);
        assert_eq!(s >> 24, TABLE_STRING);
        assert_eq!(u.resolve_type(t), Some(Type::Class(string)));
        assert!(u.resolve_string(s));
        assert!(!u.resolve_string(t));
        assert_eq!(u.resolve_type(s), None);
    }

    #[test]
    fn accessibility_follows_element_types() {
        let mut u = TypeUniverse::new();
        let object = u.well_known(WellKnown::Object);
        let secret = u.add_class("Secret", object);
        u.set_accessible(secret, false);
        assert!(!u.is_accessible(&Type::Class(secret)));
        assert!(!u.is_accessible(&Type::array(Type::Class(secret))));
        assert!(u.is_accessible(&Type::Class(object)));
    }
}
