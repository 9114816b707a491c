//! Type inference tables and assignment compatibility.
//!
//! Binary operators are checked against 8x8 tables keyed by the engine
//! types of the left and right operand, in [`EngineType::table_index`]
//! order. An `Invalid` cell rejects the pair.

use ilvm_common::{EngineType, Primitive, StackItem, Type, TypeSystem, WellKnown};

use ilvm_common::EngineType::{Invalid as X, F, I, I4, I8, M, MV, O, T};

type Table = [[EngineType; 8]; 8];

/// `add`, `sub`, `mul`, `div`, `rem`, `neg`.
pub const NUMERIC_TABLE: Table = [
    //  I4  I8  I   F   M   O   T   MV
    [I4, X, I, X, X, X, X, X], // I4
    [X, I8, X, X, X, X, X, X], // I8
    [I, X, I, X, X, X, X, X],  // I
    [X, X, X, F, X, X, X, X],  // F
    [X, X, X, X, X, X, X, X],  // M
    [X, X, X, X, X, X, X, X],  // O
    [X, X, X, X, X, X, X, X],  // T
    [X, X, X, X, X, X, X, X],  // MV
];

/// `and`, `or`, `xor`, `div.un`, `rem.un` and the overflow-checked forms.
pub const INTEGER_TABLE: Table = [
    //  I4  I8  I   F   M   O   T   MV
    [I4, X, I, X, X, X, X, X], // I4
    [X, I8, X, X, X, X, X, X], // I8
    [I, X, I, X, X, X, X, X],  // I
    [X, X, X, X, X, X, X, X],  // F
    [X, X, X, X, X, X, X, X],  // M
    [X, X, X, X, X, X, X, X],  // O
    [X, X, X, X, X, X, X, X],  // T
    [X, X, X, X, X, X, X, X],  // MV
];

/// Value (row) shifted by amount (column). The result keeps the value's type.
pub const SHIFT_TABLE: Table = [
    //  I4  I8  I   F   M   O   T   MV
    [I4, X, I4, X, X, X, X, X], // I4
    [I8, X, I8, X, X, X, X, X], // I8
    [I, X, I, X, X, X, X, X],   // I
    [X, X, X, X, X, X, X, X],   // F
    [X, X, X, X, X, X, X, X],   // M
    [X, X, X, X, X, X, X, X],   // O
    [X, X, X, X, X, X, X, X],   // T
    [X, X, X, X, X, X, X, X],   // MV
];

/// `clt`, `cgt`, `blt`, `bge` and friends. Cells hold `I4` for valid pairs.
pub const ORDERED_TABLE: Table = [
    //  I4  I8  I   F   M   O   T   MV
    [I4, X, I4, X, X, X, X, X], // I4
    [X, I4, X, X, X, X, X, X],  // I8
    [I4, X, I4, X, X, X, X, X], // I
    [X, X, X, I4, X, X, X, X],  // F
    [X, X, X, X, I4, X, X, X],  // M
    [X, X, X, X, X, X, X, X],   // O
    [X, X, X, X, X, X, X, X],   // T
    [X, X, X, X, X, X, X, X],   // MV
];

/// `ceq`, `beq`, `bne.un`, `cgt.un`: the ordered pairs plus object references.
pub const EQUALITY_TABLE: Table = [
    //  I4  I8  I   F   M   O   T   MV
    [I4, X, I4, X, X, X, X, X], // I4
    [X, I4, X, X, X, X, X, X],  // I8
    [I4, X, I4, X, X, X, X, X], // I
    [X, X, X, I4, X, X, X, X],  // F
    [X, X, X, X, I4, X, X, X],  // M
    [X, X, X, X, X, I4, X, X],  // O
    [X, X, X, X, X, X, X, X],   // T
    [X, X, X, X, X, X, X, X],   // MV
];

/// Pointer arithmetic accepted only in unverifiable-pointer mode.
///
/// Consulted after the verifiable table rejects a pair. Arithmetic cells
/// give the pointer result; `M - M` and `T - T` give a native int;
/// comparisons treat any non-`Invalid` cell as valid.
pub const UNSAFE_TABLE: Table = [
    //  I4  I8  I   F   M   O   T   MV
    [X, X, X, X, M, X, T, X], // I4
    [X, X, X, X, X, X, X, X], // I8
    [X, X, X, X, M, X, T, X], // I
    [X, X, X, X, X, X, X, X], // F
    [M, X, M, X, I, X, X, X], // M
    [X, X, X, X, X, X, X, X], // O
    [T, X, T, X, X, X, I, X], // T
    [X, X, X, X, X, X, X, X], // MV
];

/// Look up the result of a binary operator.
pub fn lookup(table: &Table, left: EngineType, right: EngineType) -> EngineType {
    match (left.table_index(), right.table_index()) {
        (Some(l), Some(r)) => table[l][r],
        _ => EngineType::Invalid,
    }
}

/// Result of an arithmetic operator, consulting the unsafe table when
/// `allow_unsafe` and `pointer_arith` are both set.
pub fn arithmetic(
    table: &Table,
    left: EngineType,
    right: EngineType,
    pointer_arith: bool,
    allow_unsafe: bool,
) -> EngineType {
    let result = lookup(table, left, right);
    if result != EngineType::Invalid || !(pointer_arith && allow_unsafe) {
        return result;
    }
    lookup(&UNSAFE_TABLE, left, right)
}

/// Whether a comparison of `left` and `right` is valid.
pub fn comparable(table: &Table, left: EngineType, right: EngineType, allow_unsafe: bool) -> bool {
    if lookup(table, left, right) != EngineType::Invalid {
        return true;
    }
    allow_unsafe
        && (left == T || right == T)
        && lookup(&UNSAFE_TABLE, left, right) != EngineType::Invalid
}

/// Comparisons touching pointers or references use the coder's pointer form.
pub fn is_pointer_compare(left: EngineType, right: EngineType) -> bool {
    matches!(left, M | T | O) || matches!(right, M | T | O)
}

/// The stack item a value of declared type `ty` occupies.
///
/// Enums collapse to their underlying numeric type. Returns `None` for
/// `void`.
pub fn stack_item<S: TypeSystem + ?Sized>(types: &S, ty: &Type) -> Option<StackItem> {
    let item = match ty {
        Type::Primitive(Primitive::Void) => return None,
        Type::Primitive(Primitive::TypedRef) => StackItem::value(ty.clone()),
        Type::Primitive(p) => StackItem::numeric(p.engine_type()),
        Type::Class(_) | Type::Array(_) | Type::Null => StackItem::object(ty.clone()),
        Type::ValueType(id) => match types.enum_underlying(*id) {
            Some(underlying) => StackItem::numeric(underlying.engine_type()),
            None => StackItem::value(ty.clone()),
        },
        Type::ByRef(inner) => StackItem::managed_ptr((**inner).clone()),
        Type::Pointer(inner) => StackItem::transient_ptr((**inner).clone()),
    };
    Some(item)
}

/// Verification form of a location type: signedness and enums collapse.
pub fn reduce<S: TypeSystem + ?Sized>(types: &S, ty: &Type) -> Type {
    match ty {
        Type::Primitive(p) => Type::Primitive(p.reduce()),
        Type::ValueType(id) => match types.enum_underlying(*id) {
            Some(underlying) => Type::Primitive(underlying.reduce()),
            None => ty.clone(),
        },
        Type::Array(inner) => Type::array(reduce(types, inner)),
        Type::ByRef(inner) => Type::by_ref(reduce(types, inner)),
        Type::Pointer(inner) => Type::pointer(reduce(types, inner)),
        Type::Class(_) | Type::Null => ty.clone(),
    }
}

/// Two location types are the same after reduction.
pub fn same_location<S: TypeSystem + ?Sized>(types: &S, a: &Type, b: &Type) -> bool {
    a == b || reduce(types, a) == reduce(types, b)
}

/// An object of type `from` can be stored where `to` is expected.
pub fn object_assignable<S: TypeSystem + ?Sized>(types: &S, from: &Type, to: &Type) -> bool {
    if from == to {
        return true;
    }
    match (from, to) {
        (Type::Null, to) => to.is_reference(),
        (_, Type::Null) => false,
        (Type::Class(_) | Type::Array(_), Type::Class(target))
            if *target == types.well_known(WellKnown::Object) =>
        {
            true
        }
        (Type::Class(source), Type::Class(target)) => {
            types.is_subclass(*source, *target)
                || (types.is_interface(*target) && types.implements(*source, *target))
        }
        (Type::Array(source), Type::Array(target)) => {
            if source.is_reference() && target.is_reference() {
                object_assignable(types, source, target)
            } else {
                same_location(types, source, target)
            }
        }
        _ => false,
    }
}

/// Nearest class both object types can be stored as.
///
/// Walks `a`'s base classes; anything else (arrays, interfaces, a
/// hierarchy deeper than the walk allows) meets at `Object`.
pub fn common_ancestor<S: TypeSystem + ?Sized>(types: &S, a: &Type, b: &Type) -> Type {
    const MAX_DEPTH: usize = 1024;

    if object_assignable(types, a, b) {
        return b.clone();
    }
    if object_assignable(types, b, a) {
        return a.clone();
    }
    if let Type::Class(start) = a {
        let ancestors = std::iter::successors(Some(*start), |id| types.parent(*id));
        for id in ancestors.take(MAX_DEPTH) {
            let candidate = Type::Class(id);
            if object_assignable(types, b, &candidate) {
                return candidate;
            }
        }
    }
    Type::Class(types.well_known(WellKnown::Object))
}

/// Assignment compatibility of a stack item with a declared location type.
pub fn assignable_to<S: TypeSystem + ?Sized>(
    types: &S,
    from: &StackItem,
    to: &Type,
    allow_unsafe: bool,
) -> bool {
    match stack_item(types, to) {
        Some(target) => item_assignable(types, from, &target, allow_unsafe),
        None => false,
    }
}

/// Assignment compatibility between two stack items.
pub fn item_assignable<S: TypeSystem + ?Sized>(
    types: &S,
    from: &StackItem,
    to: &StackItem,
    allow_unsafe: bool,
) -> bool {
    if from.engine != to.engine {
        return allow_unsafe
            && matches!((from.engine, to.engine), (I, T) | (T, I) | (M, T));
    }
    match from.engine {
        I4 | I8 | I | F => true,
        O => match (&from.ty, &to.ty) {
            (Some(source), Some(target)) => object_assignable(types, source, target),
            _ => false,
        },
        MV => from.ty == to.ty,
        M => match (&from.ty, &to.ty) {
            (Some(a), Some(b)) => same_location(types, a, b),
            _ => false,
        },
        T => {
            allow_unsafe
                || match (&from.ty, &to.ty) {
                    (Some(a), Some(b)) => same_location(types, a, b),
                    _ => false,
                }
        }
        X => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ilvm_common::types::ALL_ENGINE_TYPES;
    use ilvm_common::TypeUniverse;

    #[test]
    fn common_ancestor_of_siblings() {
        let mut u = TypeUniverse::new();
        let object = u.well_known(WellKnown::Object);
        let animal = u.add_class("Animal", object);
        let dog = Type::Class(u.add_class("Dog", animal));
        let cat = Type::Class(u.add_class("Cat", animal));
        let animal = Type::Class(animal);

        assert_eq!(common_ancestor(&u, &dog, &cat), animal);
        assert_eq!(common_ancestor(&u, &dog, &animal), animal);
        assert_eq!(common_ancestor(&u, &Type::Null, &cat), cat);
        let string = Type::Class(u.well_known(WellKnown::String));
        assert_eq!(common_ancestor(&u, &dog, &string), Type::Class(object));
        let dogs = Type::array(dog.clone());
        assert_eq!(common_ancestor(&u, &dogs, &cat), Type::Class(object));
    }

    #[test]
    fn numeric_table_rows() {
        assert_eq!(lookup(&NUMERIC_TABLE, I4, I4), I4);
        assert_eq!(lookup(&NUMERIC_TABLE, I4, I8), X);
        assert_eq!(lookup(&NUMERIC_TABLE, I, I4), I);
        assert_eq!(lookup(&NUMERIC_TABLE, F, F), F);
        assert_eq!(lookup(&INTEGER_TABLE, F, F), X);
        assert_eq!(lookup(&NUMERIC_TABLE, X, I4), X);
    }

    #[test]
    fn tables_never_produce_references() {
        for table in [
            &NUMERIC_TABLE,
            &INTEGER_TABLE,
            &SHIFT_TABLE,
            &ORDERED_TABLE,
            &EQUALITY_TABLE,
        ] {
            for &l in &ALL_ENGINE_TYPES {
                for &r in &ALL_ENGINE_TYPES {
                    let result = lookup(table, l, r);
                    assert!(!matches!(result, O | MV | T), "{l} x {r}");
                }
            }
        }
    }

    #[test]
    fn symmetric_tables() {
        for table in [&NUMERIC_TABLE, &INTEGER_TABLE, &ORDERED_TABLE, &EQUALITY_TABLE] {
            for &l in &ALL_ENGINE_TYPES {
                for &r in &ALL_ENGINE_TYPES {
                    assert_eq!(lookup(table, l, r), lookup(table, r, l), "{l} x {r}");
                }
            }
        }
    }

    #[test]
    fn shift_keeps_value_type() {
        assert_eq!(lookup(&SHIFT_TABLE, I8, I4), I8);
        assert_eq!(lookup(&SHIFT_TABLE, I4, I8), X);
        assert_eq!(lookup(&SHIFT_TABLE, F, I4), X);
    }

    #[test]
    fn unsafe_pointer_arithmetic() {
        assert_eq!(arithmetic(&NUMERIC_TABLE, T, I4, true, false), X);
        assert_eq!(arithmetic(&NUMERIC_TABLE, T, I4, true, true), T);
        assert_eq!(arithmetic(&NUMERIC_TABLE, M, M, true, true), I);
        assert_eq!(arithmetic(&NUMERIC_TABLE, T, I4, false, true), X);
        assert!(!comparable(&ORDERED_TABLE, T, T, false));
        assert!(comparable(&ORDERED_TABLE, T, T, true));
        assert!(comparable(&EQUALITY_TABLE, O, O, false));
        assert!(!comparable(&ORDERED_TABLE, O, O, true));
    }

    #[test]
    fn pointer_compare_variant() {
        assert!(is_pointer_compare(O, O));
        assert!(is_pointer_compare(I, M));
        assert!(!is_pointer_compare(I4, I));
    }

    #[test]
    fn enums_collapse_to_underlying() {
        let mut u = TypeUniverse::new();
        let color = u.add_enum("Color", Primitive::U2);
        let item = stack_item(&u, &Type::ValueType(color)).unwrap();
        assert_eq!(item, StackItem::i4());
        assert_eq!(reduce(&u, &Type::ValueType(color)), Type::Primitive(Primitive::I2));
        assert!(same_location(&u, &Type::ValueType(color), &Primitive::Char.into()));
        assert!(!same_location(&u, &Primitive::R4.into(), &Primitive::R8.into()));
    }

    #[test]
    fn void_has_no_stack_item() {
        let u = TypeUniverse::new();
        assert_eq!(stack_item(&u, &Primitive::Void.into()), None);
        assert_eq!(
            stack_item(&u, &Type::by_ref(Primitive::I4.into())),
            Some(StackItem::managed_ptr(Primitive::I4.into()))
        );
    }

    #[test]
    fn object_subtyping() {
        let mut u = TypeUniverse::new();
        let object = u.well_known(WellKnown::Object);
        let shape = u.add_class("Shape", object);
        let circle = u.add_class("Circle", shape);
        let drawable = u.add_interface("IDrawable");
        u.add_implementation(shape, drawable);

        let circle_t = Type::Class(circle);
        assert!(object_assignable(&u, &circle_t, &Type::Class(shape)));
        assert!(object_assignable(&u, &circle_t, &Type::Class(drawable)));
        assert!(object_assignable(&u, &Type::Null, &Type::Class(shape)));
        assert!(!object_assignable(&u, &Type::Class(shape), &circle_t));
        assert!(!object_assignable(&u, &Type::Class(shape), &Type::Null));
        assert!(object_assignable(
            &u,
            &Type::array(circle_t.clone()),
            &Type::array(Type::Class(shape))
        ));
        assert!(object_assignable(&u, &Type::array(circle_t), &Type::Class(object)));
        assert!(object_assignable(
            &u,
            &Type::array(Primitive::U4.into()),
            &Type::array(Primitive::I4.into())
        ));
        assert!(!object_assignable(
            &u,
            &Type::array(Primitive::I4.into()),
            &Type::array(Primitive::I8.into())
        ));
    }

    #[test]
    fn item_assignability() {
        let mut u = TypeUniverse::new();
        let point = u.add_value_type("Point");
        let other = u.add_value_type("Other");
        let value = StackItem::value(Type::ValueType(point));
        assert!(assignable_to(&u, &value, &Type::ValueType(point), false));
        assert!(!assignable_to(&u, &value, &Type::ValueType(other), false));
        assert!(assignable_to(&u, &StackItem::i4(), &Primitive::Boolean.into(), false));
        assert!(!assignable_to(&u, &StackItem::i4(), &Primitive::I8.into(), false));
        assert!(!assignable_to(&u, &StackItem::i4(), &Primitive::Void.into(), false));

        let p_int = StackItem::transient_ptr(Primitive::I4.into());
        let to_long = Type::pointer(Primitive::I8.into());
        assert!(!assignable_to(&u, &p_int, &to_long, false));
        assert!(assignable_to(&u, &p_int, &to_long, true));
        assert!(assignable_to(&u, &StackItem::native_int(), &to_long, true));

        let m_int = StackItem::managed_ptr(Primitive::U4.into());
        assert!(assignable_to(&u, &m_int, &Type::by_ref(Primitive::I4.into()), false));
        assert!(!assignable_to(&u, &m_int, &Type::by_ref(Primitive::I8.into()), true));
    }
}
