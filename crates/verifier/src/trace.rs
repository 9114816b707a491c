//! A diagnostic coder that records every callback as a line of text.
//!
//! Useful for inspecting what a backend would be asked to do, and for
//! driving the restart loop: it can be told to report cache exhaustion a
//! fixed number of times before accepting.

use log::trace;

use crate::coder::{
    BinaryOp, BranchCondition, CallKind, Coder, CoderStatus, CompareOp, Conversion, Prefixes,
    ShiftOp, TokenKind, UnaryOp,
};
use ilvm_common::{EngineType, FieldRef, MethodBody, MethodRef, Signature, StackItem, Type};

/// Records one line per coder callback.
#[derive(Debug, Clone, Default)]
pub struct TraceCoder {
    lines: Vec<String>,
    pending_restarts: u32,
    setups: u32,
    abandoned: bool,
}

impl TraceCoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A coder that asks for `count` restarts before finishing.
    pub fn with_restarts(count: u32) -> Self {
        Self {
            pending_restarts: count,
            ..Self::default()
        }
    }

    /// Lines recorded by the most recent session.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// How many sessions were started.
    pub fn setups(&self) -> u32 {
        self.setups
    }

    /// Whether the last session failed.
    pub fn abandoned(&self) -> bool {
        self.abandoned
    }

    fn emit(&mut self, line: String) {
        trace!("coder: {line}");
        self.lines.push(line);
    }
}

fn items(items: &[StackItem]) -> String {
    let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
    format!("[{}]", parts.join(", "))
}

fn optional(item: Option<&StackItem>) -> String {
    item.map_or_else(|| "void".to_string(), ToString::to_string)
}

impl Coder for TraceCoder {
    fn setup(&mut self, method: &MethodBody) {
        self.lines.clear();
        self.setups += 1;
        self.abandoned = false;
        trace!("coder: setup ({} bytes)", method.code.len());
    }

    fn finish(&mut self) -> CoderStatus {
        if self.pending_restarts > 0 {
            self.pending_restarts -= 1;
            CoderStatus::Restart
        } else {
            CoderStatus::Done
        }
    }

    fn abandon(&mut self) {
        self.abandoned = true;
    }

    fn label(&mut self, offset: u32) {
        self.emit(format!("label {offset}"));
    }

    fn stack_refresh(&mut self, stack: &[StackItem]) {
        self.emit(format!("refresh {}", items(stack)));
    }

    fn prefixes(&mut self, prefixes: Prefixes, constrained: Option<&Type>) {
        match constrained {
            Some(ty) => self.emit(format!("prefix {prefixes:?} {ty:?}")),
            None => self.emit(format!("prefix {prefixes:?}")),
        }
    }

    fn nop(&mut self) {
        self.emit("nop".to_string());
    }

    fn breakpoint(&mut self) {
        self.emit("break".to_string());
    }

    fn load_null(&mut self) {
        self.emit("ldnull".to_string());
    }

    fn load_i4(&mut self, value: i32) {
        self.emit(format!("ldc.i4 {value}"));
    }

    fn load_i8(&mut self, value: i64) {
        self.emit(format!("ldc.i8 {value}"));
    }

    fn load_r4(&mut self, value: f32) {
        self.emit(format!("ldc.r4 {value}"));
    }

    fn load_r8(&mut self, value: f64) {
        self.emit(format!("ldc.r8 {value}"));
    }

    fn load_string(&mut self, token: u32) {
        self.emit(format!("ldstr {token:#010x}"));
    }

    fn load_token(&mut self, token: &TokenKind) {
        self.emit(format!("ldtoken {token:?}"));
    }

    fn load_arg(&mut self, index: u16, item: &StackItem) {
        self.emit(format!("ldarg {index} {item}"));
    }

    fn store_arg(&mut self, index: u16, item: &StackItem) {
        self.emit(format!("starg {index} {item}"));
    }

    fn load_arg_addr(&mut self, index: u16, ty: &Type) {
        self.emit(format!("ldarga {index} {ty:?}"));
    }

    fn load_local(&mut self, index: u16, item: &StackItem) {
        self.emit(format!("ldloc {index} {item}"));
    }

    fn store_local(&mut self, index: u16, item: &StackItem) {
        self.emit(format!("stloc {index} {item}"));
    }

    fn load_local_addr(&mut self, index: u16, ty: &Type) {
        self.emit(format!("ldloca {index} {ty:?}"));
    }

    fn arglist(&mut self) {
        self.emit("arglist".to_string());
    }

    fn dup(&mut self, item: &StackItem) {
        self.emit(format!("dup {item}"));
    }

    fn pop(&mut self, item: &StackItem) {
        self.emit(format!("pop {item}"));
    }

    fn binary(&mut self, op: BinaryOp, left: EngineType, right: EngineType, result: EngineType) {
        self.emit(format!("{op:?} {left} {right} -> {result}"));
    }

    fn shift(&mut self, op: ShiftOp, value: EngineType, amount: EngineType) {
        self.emit(format!("{op:?} {value} {amount}"));
    }

    fn unary(&mut self, op: UnaryOp, operand: EngineType) {
        self.emit(format!("{op:?} {operand}"));
    }

    fn convert(&mut self, conversion: Conversion, from: EngineType) {
        let mut line = format!("conv {:?}", conversion.target);
        if conversion.checked {
            line.push_str(" ovf");
        }
        if conversion.unsigned_source {
            line.push_str(" un");
        }
        self.emit(format!("{line} from {from}"));
    }

    fn check_finite(&mut self) {
        self.emit("ckfinite".to_string());
    }

    fn compare(&mut self, op: CompareOp, left: EngineType, right: EngineType) {
        self.emit(format!("cmp {op:?} {left} {right}"));
    }

    fn compare_ptr(&mut self, op: CompareOp, left: &StackItem, right: &StackItem) {
        self.emit(format!("cmp.ptr {op:?} {left} {right}"));
    }

    fn branch(&mut self, target: u32) {
        self.emit(format!("br {target}"));
    }

    fn branch_unary(&mut self, condition: BranchCondition, operand: &StackItem, target: u32) {
        self.emit(format!("br.{condition:?} {operand} {target}"));
    }

    fn branch_compare(&mut self, op: CompareOp, left: EngineType, right: EngineType, target: u32) {
        self.emit(format!("b{op:?} {left} {right} {target}"));
    }

    fn branch_compare_ptr(&mut self, op: CompareOp, left: &StackItem, right: &StackItem, target: u32) {
        self.emit(format!("b.ptr{op:?} {left} {right} {target}"));
    }

    fn switch(&mut self, value: EngineType, targets: &[u32]) {
        self.emit(format!("switch {value} {targets:?}"));
    }

    fn leave(&mut self, target: u32) {
        self.emit(format!("leave {target}"));
    }

    fn end_finally(&mut self) {
        self.emit("endfinally".to_string());
    }

    fn end_filter(&mut self) {
        self.emit("endfilter".to_string());
    }

    fn throw(&mut self, exception: &StackItem) {
        self.emit(format!("throw {exception}"));
    }

    fn rethrow(&mut self) {
        self.emit("rethrow".to_string());
    }

    fn ret(&mut self, value: Option<&StackItem>) {
        match value {
            Some(item) => self.emit(format!("ret {item}")),
            None => self.emit("ret".to_string()),
        }
    }

    fn jmp(&mut self, method: &MethodRef) {
        self.emit(format!("jmp {}", method.name));
    }

    fn load_indirect(&mut self, ty: &Type) {
        self.emit(format!("ldind {ty:?}"));
    }

    fn store_indirect(&mut self, ty: &Type) {
        self.emit(format!("stind {ty:?}"));
    }

    fn load_object(&mut self, ty: &Type) {
        self.emit(format!("ldobj {ty:?}"));
    }

    fn store_object(&mut self, ty: &Type) {
        self.emit(format!("stobj {ty:?}"));
    }

    fn copy_object(&mut self, ty: &Type) {
        self.emit(format!("cpobj {ty:?}"));
    }

    fn init_object(&mut self, ty: &Type) {
        self.emit(format!("initobj {ty:?}"));
    }

    fn size_of(&mut self, ty: &Type) {
        self.emit(format!("sizeof {ty:?}"));
    }

    fn localloc(&mut self) {
        self.emit("localloc".to_string());
    }

    fn copy_block(&mut self) {
        self.emit("cpblk".to_string());
    }

    fn init_block(&mut self) {
        self.emit("initblk".to_string());
    }

    fn call(&mut self, kind: CallKind, method: &MethodRef, args: &[StackItem], ret: Option<&StackItem>) {
        self.emit(format!(
            "call {kind:?} {} {} -> {}",
            method.name,
            items(args),
            optional(ret)
        ));
    }

    fn call_indirect(&mut self, _signature: &Signature, args: &[StackItem], ret: Option<&StackItem>) {
        self.emit(format!("calli {} -> {}", items(args), optional(ret)));
    }

    fn new_object(&mut self, ctor: &MethodRef, args: &[StackItem], result: &StackItem) {
        self.emit(format!("newobj {} {} -> {result}", ctor.name, items(args)));
    }

    fn load_function(&mut self, method: &MethodRef) {
        self.emit(format!("ldftn {}", method.name));
    }

    fn load_virtual_function(&mut self, method: &MethodRef) {
        self.emit(format!("ldvirtftn {}", method.name));
    }

    fn cast_class(&mut self, ty: &Type) {
        self.emit(format!("castclass {ty:?}"));
    }

    fn is_inst(&mut self, ty: &Type) {
        self.emit(format!("isinst {ty:?}"));
    }

    fn box_value(&mut self, ty: &Type) {
        self.emit(format!("box {ty:?}"));
    }

    fn unbox(&mut self, ty: &Type) {
        self.emit(format!("unbox {ty:?}"));
    }

    fn unbox_any(&mut self, ty: &Type) {
        self.emit(format!("unbox.any {ty:?}"));
    }

    fn load_field(&mut self, field: &FieldRef, object: &StackItem) {
        self.emit(format!("ldfld {} {object}", field.name));
    }

    fn load_field_addr(&mut self, field: &FieldRef, object: &StackItem) {
        self.emit(format!("ldflda {} {object}", field.name));
    }

    fn store_field(&mut self, field: &FieldRef, object: &StackItem, value: &StackItem) {
        self.emit(format!("stfld {} {object} {value}", field.name));
    }

    fn load_static(&mut self, field: &FieldRef) {
        self.emit(format!("ldsfld {}", field.name));
    }

    fn load_static_addr(&mut self, field: &FieldRef) {
        self.emit(format!("ldsflda {}", field.name));
    }

    fn store_static(&mut self, field: &FieldRef, value: &StackItem) {
        self.emit(format!("stsfld {} {value}", field.name));
    }

    fn new_array(&mut self, element: &Type) {
        self.emit(format!("newarr {element:?}"));
    }

    fn array_length(&mut self) {
        self.emit("ldlen".to_string());
    }

    fn load_element(&mut self, element: &Type) {
        self.emit(format!("ldelem {element:?}"));
    }

    fn load_element_addr(&mut self, element: &Type) {
        self.emit(format!("ldelema {element:?}"));
    }

    fn store_element(&mut self, element: &Type) {
        self.emit(format!("stelem {element:?}"));
    }

    fn make_refany(&mut self, ty: &Type) {
        self.emit(format!("mkrefany {ty:?}"));
    }

    fn refany_val(&mut self, ty: &Type) {
        self.emit(format!("refanyval {ty:?}"));
    }

    fn refany_type(&mut self) {
        self.emit("refanytype".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ilvm_common::Primitive;

    #[test]
    fn restarts_count_down() {
        let mut coder = TraceCoder::with_restarts(2);
        assert_eq!(coder.finish(), CoderStatus::Restart);
        assert_eq!(coder.finish(), CoderStatus::Restart);
        assert_eq!(coder.finish(), CoderStatus::Done);
    }

    #[test]
    fn setup_clears_previous_session() {
        let body = MethodBody::new(
            vec![0x2A],
            0,
            Signature::new(vec![], Primitive::Void.into()),
        );
        let mut coder = TraceCoder::new();
        coder.setup(&body);
        coder.load_i4(1);
        coder.abandon();
        assert!(coder.abandoned());
        coder.setup(&body);
        assert!(coder.lines().is_empty());
        assert!(!coder.abandoned());
        assert_eq!(coder.setups(), 2);
    }

    #[test]
    fn line_formats() {
        let mut coder = TraceCoder::new();
        coder.binary(BinaryOp::Add, EngineType::I4, EngineType::I4, EngineType::I4);
        coder.stack_refresh(&[StackItem::i4(), StackItem::float()]);
        coder.ret(None);
        coder.convert(
            Conversion {
                target: Primitive::U1,
                checked: true,
                unsigned_source: true,
            },
            EngineType::I8,
        );
        assert_eq!(
            coder.lines(),
            &[
                "Add I4 I4 -> I4".to_string(),
                "refresh [I4, F]".to_string(),
                "ret".to_string(),
                "conv U1 ovf un from I8".to_string(),
            ]
        );
    }
}
