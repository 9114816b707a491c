//! The coder protocol: callbacks a backend implements to interpret or
//! compile a method while it is being verified.
//!
//! The engine calls exactly one operation per verified instruction, in
//! address order, with operand types already resolved. Prefix and
//! annotation instructions never produce a call of their own; prefixes
//! are reported through [`Coder::prefixes`] just before the instruction
//! they modify.

use bitflags::bitflags;

use ilvm_common::{EngineType, FieldRef, MethodBody, MethodRef, Primitive, Signature, StackItem, Type};

pub use ilvm_common::TokenKind;

/// What the backend wants after a completed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoderStatus {
    /// Code was produced; the session is over.
    Done,
    /// The backend ran out of code cache; rerun the whole session.
    Restart,
}

bitflags! {
    /// Instruction prefixes in effect for the next instruction.
    pub struct Prefixes: u8 {
        const UNALIGNED = 0x01;
        const VOLATILE = 0x02;
        const TAIL = 0x04;
        const CONSTRAINED = 0x08;
        const NO_CHECK = 0x10;
        const READONLY = 0x20;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    DivUn,
    Rem,
    RemUn,
    And,
    Or,
    Xor,
    AddOvf,
    AddOvfUn,
    SubOvf,
    SubOvfUn,
    MulOvf,
    MulOvfUn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShiftOp {
    Shl,
    Shr,
    ShrUn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Relation tested by a compare or compare-and-branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    NeUn,
    Gt,
    GtUn,
    Ge,
    GeUn,
    Lt,
    LtUn,
    Le,
    LeUn,
}

/// Condition of a single-operand branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchCondition {
    True,
    False,
}

/// A numeric conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Conversion {
    /// Target primitive; `R8` for `conv.r.un`.
    pub target: Primitive,
    /// Throws on overflow (`conv.ovf.*`).
    pub checked: bool,
    /// The source is treated as unsigned (`*.un`).
    pub unsigned_source: bool,
}

/// How a method is being invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Static,
    /// Non-virtual call of an instance method.
    Instance,
    Virtual,
    Interface,
}

/// Backend callbacks.
///
/// Stack items passed in are the verifier's view: numeric slots carry only
/// their engine type, reference and pointer slots carry precise types.
pub trait Coder {
    // --- Lifecycle ---
    /// Start of a session (called again after every restart).
    fn setup(&mut self, method: &MethodBody);
    /// End of a successful session.
    fn finish(&mut self) -> CoderStatus;
    /// The session failed; discard anything produced.
    fn abandon(&mut self);

    // --- Control-flow bookkeeping ---
    /// A jump target begins at `offset`.
    fn label(&mut self, offset: u32);
    /// The simulated stack was reset at a join.
    fn stack_refresh(&mut self, stack: &[StackItem]);
    /// Prefixes that apply to the next operation.
    fn prefixes(&mut self, prefixes: Prefixes, constrained: Option<&Type>);

    fn nop(&mut self);
    fn breakpoint(&mut self);

    // --- Constants ---
    fn load_null(&mut self);
    fn load_i4(&mut self, value: i32);
    fn load_i8(&mut self, value: i64);
    fn load_r4(&mut self, value: f32);
    fn load_r8(&mut self, value: f64);
    fn load_string(&mut self, token: u32);
    fn load_token(&mut self, token: &TokenKind);

    // --- Arguments and locals ---
    fn load_arg(&mut self, index: u16, item: &StackItem);
    fn store_arg(&mut self, index: u16, item: &StackItem);
    fn load_arg_addr(&mut self, index: u16, ty: &Type);
    fn load_local(&mut self, index: u16, item: &StackItem);
    fn store_local(&mut self, index: u16, item: &StackItem);
    fn load_local_addr(&mut self, index: u16, ty: &Type);
    fn arglist(&mut self);

    // --- Stack ---
    fn dup(&mut self, item: &StackItem);
    fn pop(&mut self, item: &StackItem);

    // --- Arithmetic ---
    fn binary(&mut self, op: BinaryOp, left: EngineType, right: EngineType, result: EngineType);
    fn shift(&mut self, op: ShiftOp, value: EngineType, amount: EngineType);
    fn unary(&mut self, op: UnaryOp, operand: EngineType);
    fn convert(&mut self, conversion: Conversion, from: EngineType);
    fn check_finite(&mut self);
    fn compare(&mut self, op: CompareOp, left: EngineType, right: EngineType);
    /// Comparison where either side is a reference or pointer.
    fn compare_ptr(&mut self, op: CompareOp, left: &StackItem, right: &StackItem);

    // --- Branches ---
    fn branch(&mut self, target: u32);
    fn branch_unary(&mut self, condition: BranchCondition, operand: &StackItem, target: u32);
    fn branch_compare(&mut self, op: CompareOp, left: EngineType, right: EngineType, target: u32);
    fn branch_compare_ptr(&mut self, op: CompareOp, left: &StackItem, right: &StackItem, target: u32);
    fn switch(&mut self, value: EngineType, targets: &[u32]);
    fn leave(&mut self, target: u32);
    fn end_finally(&mut self);
    fn end_filter(&mut self);
    fn throw(&mut self, exception: &StackItem);
    fn rethrow(&mut self);
    fn ret(&mut self, value: Option<&StackItem>);
    fn jmp(&mut self, method: &MethodRef);

    // --- Indirect access and blocks ---
    fn load_indirect(&mut self, ty: &Type);
    fn store_indirect(&mut self, ty: &Type);
    fn load_object(&mut self, ty: &Type);
    fn store_object(&mut self, ty: &Type);
    fn copy_object(&mut self, ty: &Type);
    fn init_object(&mut self, ty: &Type);
    fn size_of(&mut self, ty: &Type);
    fn localloc(&mut self);
    fn copy_block(&mut self);
    fn init_block(&mut self);

    // --- Calls ---
    fn call(&mut self, kind: CallKind, method: &MethodRef, args: &[StackItem], ret: Option<&StackItem>);
    fn call_indirect(&mut self, signature: &Signature, args: &[StackItem], ret: Option<&StackItem>);
    fn new_object(&mut self, ctor: &MethodRef, args: &[StackItem], result: &StackItem);
    fn load_function(&mut self, method: &MethodRef);
    fn load_virtual_function(&mut self, method: &MethodRef);

    // --- Objects ---
    fn cast_class(&mut self, ty: &Type);
    fn is_inst(&mut self, ty: &Type);
    fn box_value(&mut self, ty: &Type);
    fn unbox(&mut self, ty: &Type);
    fn unbox_any(&mut self, ty: &Type);

    // --- Fields ---
    fn load_field(&mut self, field: &FieldRef, object: &StackItem);
    fn load_field_addr(&mut self, field: &FieldRef, object: &StackItem);
    fn store_field(&mut self, field: &FieldRef, object: &StackItem, value: &StackItem);
    fn load_static(&mut self, field: &FieldRef);
    fn load_static_addr(&mut self, field: &FieldRef);
    fn store_static(&mut self, field: &FieldRef, value: &StackItem);

    // --- Arrays ---
    fn new_array(&mut self, element: &Type);
    fn array_length(&mut self);
    fn load_element(&mut self, element: &Type);
    fn load_element_addr(&mut self, element: &Type);
    fn store_element(&mut self, element: &Type);

    // --- Typed references ---
    fn make_refany(&mut self, ty: &Type);
    fn refany_val(&mut self, ty: &Type);
    fn refany_type(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_flags_combine() {
        let p = Prefixes::VOLATILE | Prefixes::UNALIGNED;
        assert!(p.contains(Prefixes::VOLATILE));
        assert!(!p.contains(Prefixes::TAIL));
        assert!(Prefixes::empty().is_empty());
    }
}
