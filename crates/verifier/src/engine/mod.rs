//! The Type Inference Engine.
//!
//! Walks a method's instructions in address order, simulating the
//! evaluation stack with engine types. Each instruction pops and checks
//! its operands, pushes its results and produces exactly one coder call.
//! At jump targets the live stack is unified with the label store.
//!
//! Opcode families live in submodules:
//! - [`arith`]: arithmetic, shifts, conversions, comparisons
//! - [`branch`]: branches, switch and every control transfer
//! - [`call`]: calls, constructors and function pointers
//! - [`memory`]: indirect access, block operations and fields
//! - [`object`]: casts, boxing, arrays and typed references

mod arith;
mod branch;
mod call;
mod memory;
mod object;

use log::trace;

use crate::coder::{BinaryOp, BranchCondition, Coder, CompareOp, Prefixes, ShiftOp, UnaryOp};
use crate::error::{StackFault, VerifyError};
use crate::labels::LabelStore;
use crate::limits::VerifyOptions;
use crate::scanner::JumpMask;
use crate::stack::EvalStack;
use crate::types;
use ilvm_common::{
    instructions, EngineType, FieldRef, Instruction, MethodBody, MethodRef, Opcode, Operand,
    StackItem, Type, TypeSystem, WellKnown,
};

/// One pass of stack simulation over a method body.
pub(crate) struct Engine<'a, S: TypeSystem + ?Sized, C: Coder + ?Sized> {
    method: &'a MethodBody,
    types: &'a S,
    coder: &'a mut C,
    options: &'a VerifyOptions,
    mask: &'a JumpMask,
    labels: &'a mut LabelStore,
    stack: EvalStack,
    /// Offset of the instruction being verified.
    at: u32,
    prefixes: Prefixes,
    constrained: Option<Type>,
    /// Offset of a `tail.` call still waiting for its `ret`.
    tail_call: Option<u32>,
    prev_unconditional: bool,
}

impl<'a, S: TypeSystem + ?Sized, C: Coder + ?Sized> Engine<'a, S, C> {
    pub(crate) fn new(
        method: &'a MethodBody,
        types: &'a S,
        coder: &'a mut C,
        options: &'a VerifyOptions,
        mask: &'a JumpMask,
        labels: &'a mut LabelStore,
    ) -> Result<Self, VerifyError> {
        Ok(Self {
            method,
            types,
            coder,
            options,
            mask,
            labels,
            stack: EvalStack::new(method.max_stack)?,
            at: 0,
            prefixes: Prefixes::empty(),
            constrained: None,
            tail_call: None,
            prev_unconditional: false,
        })
    }

    /// Verify every instruction. Returns the highest stack height reached.
    pub(crate) fn run(mut self) -> Result<u32, VerifyError> {
        let method = self.method;
        let mut last = None;

        for instr in instructions(&method.code) {
            let instr = instr?;
            self.at = instr.offset;
            self.enter(instr.offset)?;
            if instr.opcode.is_annotation() {
                trace!("{:>6}: {} (skipped)", instr.offset, instr.opcode.mnemonic());
                continue;
            }
            if let Some(call_at) = self.tail_call.take() {
                if instr.opcode != Opcode::Ret {
                    return Err(VerifyError::type_error(call_at, "tail."));
                }
            }
            trace!(
                "{:>6}: {} depth={}",
                instr.offset,
                instr.opcode.mnemonic(),
                self.stack.len()
            );

            if instr.opcode.is_prefix() {
                self.prefix(&instr)?;
                self.prev_unconditional = false;
            } else {
                if !self.prefixes.is_empty() {
                    self.check_prefixes(instr.opcode)?;
                    self.coder.prefixes(self.prefixes, self.constrained.as_ref());
                }
                self.step(&instr)?;
                self.prefixes = Prefixes::empty();
                self.constrained = None;
                self.prev_unconditional = instr.opcode.is_unconditional();
            }
            last = Some(instr.offset);
        }

        match last {
            None => Err(VerifyError::FallOffEnd { at: 0 }),
            Some(at) if !self.prev_unconditional || !self.prefixes.is_empty() => {
                Err(VerifyError::FallOffEnd { at })
            }
            Some(_) => Ok(self.stack.high_water()),
        }
    }

    /// Reconcile the live stack with the label store before `pc` runs.
    fn enter(&mut self, pc: u32) -> Result<(), VerifyError> {
        if !self.mask.is_jump_target(pc) {
            if self.prev_unconditional && !self.stack.is_empty() {
                return Err(VerifyError::stack(pc, StackFault::NonEmptyAfterTransfer));
            }
            return Ok(());
        }
        if !self.prefixes.is_empty() {
            return Err(VerifyError::type_error(pc, "prefix"));
        }

        let id = if self.prev_unconditional {
            self.labels.reload(pc)?
        } else {
            self.labels.observe_or_record(self.types, pc, self.stack.items())?
        };
        self.stack.load(pc, self.labels.get(id))?;
        self.labels.mark_visited(id);
        self.prev_unconditional = false;

        self.coder.label(pc);
        self.coder.stack_refresh(self.stack.items());
        Ok(())
    }

    fn step(&mut self, instr: &Instruction) -> Result<(), VerifyError> {
        use Opcode::*;

        let opcode = instr.opcode;
        match opcode {
            Nop => self.coder.nop(),
            Break => self.coder.breakpoint(),

            Ldarg0 | Ldarg1 | Ldarg2 | Ldarg3 => self.load_arg(opcode.index() - Ldarg0.index())?,
            LdargS | Ldarg => self.load_arg(self.index(instr)?)?,
            LdargaS | Ldarga => self.load_arg_addr(self.index(instr)?)?,
            StargS | Starg => self.store_arg(self.index(instr)?)?,
            Ldloc0 | Ldloc1 | Ldloc2 | Ldloc3 => {
                self.load_local(opcode.index() - Ldloc0.index())?
            }
            LdlocS | Ldloc => self.load_local(self.index(instr)?)?,
            LdlocaS | Ldloca => self.load_local_addr(self.index(instr)?)?,
            Stloc0 | Stloc1 | Stloc2 | Stloc3 => {
                self.store_local(opcode.index() - Stloc0.index())?
            }
            StlocS | Stloc => self.store_local(self.index(instr)?)?,
            Arglist => self.arglist()?,

            Ldnull => {
                self.push(StackItem::null())?;
                self.coder.load_null();
            }
            LdcI4M1 => self.load_i4(-1)?,
            LdcI40 | LdcI41 | LdcI42 | LdcI43 | LdcI44 | LdcI45 | LdcI46 | LdcI47 | LdcI48 => {
                self.load_i4(i32::from(opcode.index() - LdcI40.index()))?
            }
            LdcI4S | LdcI4 => {
                let value = match instr.operand {
                    Operand::Int8(v) => i32::from(v),
                    Operand::Int32(v) => v,
                    _ => return Err(self.te("operand")),
                };
                self.load_i4(value)?
            }
            LdcI8 => {
                let Operand::Int64(value) = instr.operand else {
                    return Err(self.te("operand"));
                };
                self.push(StackItem::i8())?;
                self.coder.load_i8(value);
            }
            LdcR4 => {
                let Operand::Float32(value) = instr.operand else {
                    return Err(self.te("operand"));
                };
                self.push(StackItem::float())?;
                self.coder.load_r4(value);
            }
            LdcR8 => {
                let Operand::Float64(value) = instr.operand else {
                    return Err(self.te("operand"));
                };
                self.push(StackItem::float())?;
                self.coder.load_r8(value);
            }
            Ldstr => self.load_string(instr)?,
            Ldtoken => self.load_token(instr)?,

            Dup => {
                let top = self.stack.peek(self.at, 0)?.clone();
                self.push(top.clone())?;
                self.coder.dup(&top);
            }
            Pop => {
                let item = self.pop()?;
                self.coder.pop(&item);
            }

            Add => self.binary(BinaryOp::Add)?,
            Sub => self.binary(BinaryOp::Sub)?,
            Mul => self.binary(BinaryOp::Mul)?,
            Div => self.binary(BinaryOp::Div)?,
            DivUn => self.binary(BinaryOp::DivUn)?,
            Rem => self.binary(BinaryOp::Rem)?,
            RemUn => self.binary(BinaryOp::RemUn)?,
            And => self.binary(BinaryOp::And)?,
            Or => self.binary(BinaryOp::Or)?,
            Xor => self.binary(BinaryOp::Xor)?,
            AddOvf => self.binary(BinaryOp::AddOvf)?,
            AddOvfUn => self.binary(BinaryOp::AddOvfUn)?,
            SubOvf => self.binary(BinaryOp::SubOvf)?,
            SubOvfUn => self.binary(BinaryOp::SubOvfUn)?,
            MulOvf => self.binary(BinaryOp::MulOvf)?,
            MulOvfUn => self.binary(BinaryOp::MulOvfUn)?,
            Shl => self.shift(ShiftOp::Shl)?,
            Shr => self.shift(ShiftOp::Shr)?,
            ShrUn => self.shift(ShiftOp::ShrUn)?,
            Neg => self.unary(UnaryOp::Neg)?,
            Not => self.unary(UnaryOp::Not)?,
            Ckfinite => self.check_finite()?,
            Ceq => self.compare(CompareOp::Eq)?,
            Cgt => self.compare(CompareOp::Gt)?,
            CgtUn => self.compare(CompareOp::GtUn)?,
            Clt => self.compare(CompareOp::Lt)?,
            CltUn => self.compare(CompareOp::LtUn)?,
            ConvI1 | ConvI2 | ConvI4 | ConvI8 | ConvR4 | ConvR8 | ConvU4 | ConvU8 | ConvRUn
            | ConvU2 | ConvU1 | ConvI | ConvU | ConvOvfI1Un | ConvOvfI2Un | ConvOvfI4Un
            | ConvOvfI8Un | ConvOvfU1Un | ConvOvfU2Un | ConvOvfU4Un | ConvOvfU8Un
            | ConvOvfIUn | ConvOvfUUn | ConvOvfI1 | ConvOvfU1 | ConvOvfI2 | ConvOvfU2
            | ConvOvfI4 | ConvOvfU4 | ConvOvfI8 | ConvOvfU8 | ConvOvfI | ConvOvfU => {
                self.convert(opcode)?
            }

            Br | BrS => self.branch(instr)?,
            Brtrue | BrtrueS => self.branch_unary(BranchCondition::True, instr)?,
            Brfalse | BrfalseS => self.branch_unary(BranchCondition::False, instr)?,
            Beq | BeqS => self.branch_compare(CompareOp::Eq, instr)?,
            BneUn | BneUnS => self.branch_compare(CompareOp::NeUn, instr)?,
            Bge | BgeS => self.branch_compare(CompareOp::Ge, instr)?,
            BgeUn | BgeUnS => self.branch_compare(CompareOp::GeUn, instr)?,
            Bgt | BgtS => self.branch_compare(CompareOp::Gt, instr)?,
            BgtUn | BgtUnS => self.branch_compare(CompareOp::GtUn, instr)?,
            Ble | BleS => self.branch_compare(CompareOp::Le, instr)?,
            BleUn | BleUnS => self.branch_compare(CompareOp::LeUn, instr)?,
            Blt | BltS => self.branch_compare(CompareOp::Lt, instr)?,
            BltUn | BltUnS => self.branch_compare(CompareOp::LtUn, instr)?,
            Switch => self.switch(instr)?,
            Leave | LeaveS => self.leave(instr)?,
            Endfinally => self.end_finally()?,
            Endfilter => self.end_filter()?,
            Throw => self.throw()?,
            Rethrow => self.rethrow()?,
            Ret => self.ret()?,
            Jmp => self.jmp(instr)?,

            Call | Callvirt => self.call(instr)?,
            Calli => self.call_indirect(instr)?,
            Newobj => self.new_object(instr)?,
            Ldftn => self.load_function(instr)?,
            Ldvirtftn => self.load_virtual_function(instr)?,

            LdindI1 | LdindU1 | LdindI2 | LdindU2 | LdindI4 | LdindU4 | LdindI8 | LdindI
            | LdindR4 | LdindR8 | LdindRef => self.load_indirect(opcode)?,
            StindRef | StindI1 | StindI2 | StindI4 | StindI8 | StindR4 | StindR8 | StindI => {
                self.store_indirect(opcode)?
            }
            Ldobj => self.load_object(instr)?,
            Stobj => self.store_object(instr)?,
            Cpobj => self.copy_object(instr)?,
            Initobj => self.init_object(instr)?,
            Sizeof => {
                let ty = self.resolve_type(instr)?;
                self.push(StackItem::i4())?;
                self.coder.size_of(&ty);
            }
            Localloc => self.localloc()?,
            Cpblk => self.copy_block()?,
            Initblk => self.init_block()?,

            Ldfld => self.load_field(instr)?,
            Ldflda => self.load_field_addr(instr)?,
            Stfld => self.store_field(instr)?,
            Ldsfld => self.load_static(instr)?,
            Ldsflda => self.load_static_addr(instr)?,
            Stsfld => self.store_static(instr)?,

            Castclass => self.cast(instr, false)?,
            Isinst => self.cast(instr, true)?,
            Box => self.box_value(instr)?,
            Unbox => self.unbox(instr)?,
            UnboxAny => self.unbox_any(instr)?,

            Newarr => self.new_array(instr)?,
            Ldlen => self.array_length()?,
            Ldelema => self.load_element_addr(instr)?,
            LdelemI1 | LdelemU1 | LdelemI2 | LdelemU2 | LdelemI4 | LdelemU4 | LdelemI8
            | LdelemI | LdelemR4 | LdelemR8 | LdelemRef | Ldelem => self.load_element(instr)?,
            StelemI | StelemI1 | StelemI2 | StelemI4 | StelemI8 | StelemR4 | StelemR8
            | StelemRef | Stelem => self.store_element(instr)?,

            Mkrefany => self.make_refany(instr)?,
            Refanyval => self.refany_val(instr)?,
            Refanytype => self.refany_type()?,

            Unaligned | Volatile | Tail | Constrained | No | Readonly | AnnDataS | AnnData => {
                return Err(self.te("prefix"))
            }
        }
        Ok(())
    }

    // ========================================================================
    // Prefixes
    // ========================================================================

    fn prefix(&mut self, instr: &Instruction) -> Result<(), VerifyError> {
        let flag = match instr.opcode {
            Opcode::Unaligned => {
                if !matches!(instr.operand, Operand::UInt8(1 | 2 | 4)) {
                    return Err(self.te("prefix"));
                }
                Prefixes::UNALIGNED
            }
            Opcode::Volatile => Prefixes::VOLATILE,
            Opcode::Tail => Prefixes::TAIL,
            Opcode::Constrained => {
                self.constrained = Some(self.resolve_type(instr)?);
                Prefixes::CONSTRAINED
            }
            Opcode::No => Prefixes::NO_CHECK,
            Opcode::Readonly => Prefixes::READONLY,
            _ => return Err(self.te("prefix")),
        };
        if self.prefixes.contains(flag) {
            return Err(self.te("prefix"));
        }
        self.prefixes |= flag;
        Ok(())
    }

    /// Each prefix may only precede the instructions it modifies.
    fn check_prefixes(&self, opcode: Opcode) -> Result<(), VerifyError> {
        use Opcode::*;

        let unaligned_target = memory::indirect_type(opcode).is_some()
            || matches!(
                opcode,
                LdindRef | StindRef | Ldfld | Stfld | Ldobj | Stobj | Initblk | Cpblk
            );
        let allowed = [
            (Prefixes::UNALIGNED, unaligned_target),
            (
                Prefixes::VOLATILE,
                unaligned_target || matches!(opcode, Ldsfld | Stsfld),
            ),
            (Prefixes::TAIL, matches!(opcode, Call | Callvirt | Calli)),
            (Prefixes::CONSTRAINED, opcode == Callvirt),
            (Prefixes::READONLY, opcode == Ldelema),
        ];
        for (flag, ok) in allowed {
            if self.prefixes.contains(flag) && !ok {
                return Err(self.te("prefix"));
            }
        }
        Ok(())
    }

    // ========================================================================
    // Arguments, locals, constants
    // ========================================================================

    fn arg_type(&self, index: u16) -> Result<Type, VerifyError> {
        self.method
            .arg_type(usize::from(index))
            .cloned()
            .ok_or_else(|| self.te("argument"))
    }

    fn local_type(&self, index: u16) -> Result<Type, VerifyError> {
        self.method
            .locals
            .get(usize::from(index))
            .cloned()
            .ok_or_else(|| self.te("local"))
    }

    fn load_arg(&mut self, index: u16) -> Result<(), VerifyError> {
        let ty = self.arg_type(index)?;
        let item = self.item_of(&ty, "argument")?;
        self.push(item.clone())?;
        self.coder.load_arg(index, &item);
        Ok(())
    }

    fn store_arg(&mut self, index: u16) -> Result<(), VerifyError> {
        let ty = self.arg_type(index)?;
        let value = self.pop_into(&ty, "value")?;
        self.coder.store_arg(index, &value);
        Ok(())
    }

    fn load_arg_addr(&mut self, index: u16) -> Result<(), VerifyError> {
        let ty = self.arg_type(index)?;
        if matches!(ty, Type::ByRef(_)) {
            return Err(self.te("argument"));
        }
        self.push(StackItem::managed_ptr(ty.clone()))?;
        self.coder.load_arg_addr(index, &ty);
        Ok(())
    }

    fn load_local(&mut self, index: u16) -> Result<(), VerifyError> {
        let ty = self.local_type(index)?;
        if !self.method.init_locals && !self.allow_unsafe() {
            return Err(self.te("local"));
        }
        let item = self.item_of(&ty, "local")?;
        self.push(item.clone())?;
        self.coder.load_local(index, &item);
        Ok(())
    }

    fn store_local(&mut self, index: u16) -> Result<(), VerifyError> {
        let ty = self.local_type(index)?;
        let value = self.pop_into(&ty, "value")?;
        self.coder.store_local(index, &value);
        Ok(())
    }

    fn load_local_addr(&mut self, index: u16) -> Result<(), VerifyError> {
        let ty = self.local_type(index)?;
        if matches!(ty, Type::ByRef(_)) {
            return Err(self.te("local"));
        }
        self.push(StackItem::managed_ptr(ty.clone()))?;
        self.coder.load_local_addr(index, &ty);
        Ok(())
    }

    fn arglist(&mut self) -> Result<(), VerifyError> {
        if !self.method.signature.vararg {
            return Err(self.te("arglist"));
        }
        let handle = Type::ValueType(self.types.well_known(WellKnown::RuntimeArgumentHandle));
        self.push(StackItem::value(handle))?;
        self.coder.arglist();
        Ok(())
    }

    fn load_i4(&mut self, value: i32) -> Result<(), VerifyError> {
        self.push(StackItem::i4())?;
        self.coder.load_i4(value);
        Ok(())
    }

    fn load_string(&mut self, instr: &Instruction) -> Result<(), VerifyError> {
        let token = self.token(instr)?;
        if !self.types.resolve_string(token) {
            return Err(self.te("token"));
        }
        let string = Type::Class(self.types.well_known(WellKnown::String));
        self.push(StackItem::object(string))?;
        self.coder.load_string(token);
        Ok(())
    }

    fn load_token(&mut self, instr: &Instruction) -> Result<(), VerifyError> {
        use ilvm_common::TokenKind;

        let token = self.token(instr)?;
        let kind = self
            .types
            .resolve_token(token)
            .ok_or_else(|| self.te("token"))?;
        let (owner, handle) = match &kind {
            TokenKind::Type(ty) => (ty, WellKnown::RuntimeTypeHandle),
            TokenKind::Field(field) => (&field.owner, WellKnown::RuntimeFieldHandle),
            TokenKind::Method(method) => (&method.owner, WellKnown::RuntimeMethodHandle),
        };
        if !self.types.is_accessible(owner) {
            return Err(self.te("token"));
        }
        let handle = Type::ValueType(self.types.well_known(handle));
        self.push(StackItem::value(handle))?;
        self.coder.load_token(&kind);
        Ok(())
    }

    // ========================================================================
    // Shared helpers
    // ========================================================================

    fn allow_unsafe(&self) -> bool {
        self.options.unsafe_pointers
    }

    /// A type error at the current instruction naming `operand`.
    fn te(&self, operand: &'static str) -> VerifyError {
        VerifyError::type_error(self.at, operand)
    }

    /// Operands fail an inference table.
    fn mismatch(&self) -> VerifyError {
        VerifyError::TypeError {
            at: self.at,
            operand: None,
        }
    }

    fn push(&mut self, item: StackItem) -> Result<(), VerifyError> {
        self.stack.push(self.at, item)
    }

    fn pop(&mut self) -> Result<StackItem, VerifyError> {
        self.stack.pop(self.at)
    }

    /// Pop an item whose engine type is one of `accept`.
    fn pop_engine(
        &mut self,
        operand: &'static str,
        accept: &[EngineType],
    ) -> Result<StackItem, VerifyError> {
        let item = self.pop()?;
        if accept.contains(&item.engine) {
            Ok(item)
        } else {
            Err(self.te(operand))
        }
    }

    /// Pop a value that must be assignable to a location of type `ty`.
    fn pop_into(&mut self, ty: &Type, operand: &'static str) -> Result<StackItem, VerifyError> {
        let item = self.pop()?;
        if types::assignable_to(self.types, &item, ty, self.allow_unsafe()) {
            Ok(item)
        } else {
            Err(self.te(operand))
        }
    }

    /// Pop the arguments for `params`, bottom-to-top, checking each.
    fn pop_args(&mut self, params: &[Type]) -> Result<Vec<StackItem>, VerifyError> {
        let args = self.stack.pop_n(self.at, params.len())?;
        for (arg, param) in args.iter().zip(params) {
            if !types::assignable_to(self.types, arg, param, self.allow_unsafe()) {
                return Err(self.te("argument"));
            }
        }
        Ok(args)
    }

    fn item_of(&self, ty: &Type, operand: &'static str) -> Result<StackItem, VerifyError> {
        types::stack_item(self.types, ty).ok_or_else(|| self.te(operand))
    }

    /// The stack must be empty once a transfer's own operands are gone.
    fn expect_empty(&self) -> Result<(), VerifyError> {
        if self.stack.is_empty() {
            Ok(())
        } else {
            Err(VerifyError::stack(self.at, StackFault::NonEmptyAfterTransfer))
        }
    }

    fn index(&self, instr: &Instruction) -> Result<u16, VerifyError> {
        instr.index_operand().ok_or_else(|| self.te("operand"))
    }

    fn token(&self, instr: &Instruction) -> Result<u32, VerifyError> {
        instr.token().ok_or_else(|| self.te("token"))
    }

    fn resolve_type(&self, instr: &Instruction) -> Result<Type, VerifyError> {
        let token = self.token(instr)?;
        self.types
            .resolve_type(token)
            .filter(|ty| self.types.is_accessible(ty))
            .ok_or_else(|| self.te("token"))
    }

    fn resolve_field(&self, instr: &Instruction) -> Result<FieldRef, VerifyError> {
        let token = self.token(instr)?;
        self.types
            .resolve_field(token)
            .filter(|field| self.types.is_accessible(&field.owner))
            .ok_or_else(|| self.te("token"))
    }

    fn resolve_method(&self, instr: &Instruction) -> Result<MethodRef, VerifyError> {
        let token = self.token(instr)?;
        self.types
            .resolve_method(token)
            .filter(|method| self.types.is_accessible(&method.owner))
            .ok_or_else(|| self.te("token"))
    }
}
