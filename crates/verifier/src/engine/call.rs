use super::Engine;
use crate::coder::{CallKind, Coder, Prefixes};
use crate::error::VerifyError;
use crate::types;
use ilvm_common::{
    EngineType, Instruction, MethodRef, Opcode, Signature, StackItem, Type, TypeSystem,
};

impl<S: TypeSystem + ?Sized, C: Coder + ?Sized> Engine<'_, S, C> {
    /// `call` and `callvirt`.
    pub(super) fn call(&mut self, instr: &Instruction) -> Result<(), VerifyError> {
        let method = self.resolve_method(instr)?;
        let virtual_call = instr.opcode == Opcode::Callvirt;
        if virtual_call && method.is_static() {
            return Err(self.te("token"));
        }
        if !virtual_call && method.is_abstract() {
            return Err(self.te("token"));
        }

        let params = self.pop_args(&method.signature.params)?;
        let mut args = Vec::new();
        args.try_reserve_exact(params.len() + 1)?;
        if method.signature.has_this {
            let this = self.pop()?;
            self.check_this(&method.owner, &this)?;
            args.push(this);
        }
        args.extend(params);

        let kind = self.call_kind(&method, virtual_call);
        let ret = self.return_item(&method.signature)?;
        self.note_tail_call(instr.offset)?;
        if let Some(item) = &ret {
            self.push(item.clone())?;
        }
        self.coder.call(kind, &method, &args, ret.as_ref());
        Ok(())
    }

    pub(super) fn call_indirect(&mut self, instr: &Instruction) -> Result<(), VerifyError> {
        let token = self.token(instr)?;
        let signature = self
            .types
            .resolve_signature(token)
            .ok_or_else(|| self.te("token"))?;

        self.pop_engine("function", &[EngineType::I])?;
        let params = self.pop_args(&signature.params)?;
        let mut args = Vec::new();
        args.try_reserve_exact(params.len() + 1)?;
        if signature.has_this {
            args.push(self.pop_engine("this", &[EngineType::O, EngineType::M])?);
        }
        args.extend(params);

        let ret = self.return_item(&signature)?;
        self.note_tail_call(instr.offset)?;
        if let Some(item) = &ret {
            self.push(item.clone())?;
        }
        self.coder.call_indirect(&signature, &args, ret.as_ref());
        Ok(())
    }

    pub(super) fn new_object(&mut self, instr: &Instruction) -> Result<(), VerifyError> {
        let ctor = self.resolve_method(instr)?;
        if !ctor.is_constructor() {
            return Err(self.te("token"));
        }
        let owner = match &ctor.owner {
            Type::Class(id) if self.types.is_interface(*id) => return Err(self.te("token")),
            owner @ (Type::Class(_) | Type::ValueType(_)) => owner.clone(),
            _ => return Err(self.te("token")),
        };

        let args = self.pop_args(&ctor.signature.params)?;
        let result = self.item_of(&owner, "token")?;
        self.push(result.clone())?;
        self.coder.new_object(&ctor, &args, &result);
        Ok(())
    }

    pub(super) fn load_function(&mut self, instr: &Instruction) -> Result<(), VerifyError> {
        let method = self.resolve_method(instr)?;
        self.push(StackItem::native_int())?;
        self.coder.load_function(&method);
        Ok(())
    }

    pub(super) fn load_virtual_function(&mut self, instr: &Instruction) -> Result<(), VerifyError> {
        let method = self.resolve_method(instr)?;
        if method.is_static() {
            return Err(self.te("token"));
        }
        let object = self.pop_engine("this", &[EngineType::O])?;
        self.check_this(&method.owner, &object)?;
        self.push(StackItem::native_int())?;
        self.coder.load_virtual_function(&method);
        Ok(())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Check the `this` argument against the declaring type.
    ///
    /// Reference owners take an object reference; value-type owners take a
    /// managed pointer to the value. After `constrained.` the pointer's
    /// pointee must be the constraint type instead.
    fn check_this(&self, owner: &Type, this: &StackItem) -> Result<(), VerifyError> {
        if let Some(constraint) = &self.constrained {
            return match (this.engine, &this.ty) {
                (EngineType::M, Some(pointee))
                    if types::same_location(self.types, pointee, constraint) =>
                {
                    Ok(())
                }
                _ => Err(self.te("this")),
            };
        }

        let ok = match (this.engine, &this.ty, owner) {
            (EngineType::O, Some(object), Type::Class(_) | Type::Array(_)) => {
                types::object_assignable(self.types, object, owner)
            }
            (EngineType::M, Some(pointee), Type::ValueType(_)) => {
                types::same_location(self.types, pointee, owner)
            }
            (EngineType::T, _, _) => self.allow_unsafe(),
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(self.te("this"))
        }
    }

    fn call_kind(&self, method: &MethodRef, virtual_call: bool) -> CallKind {
        if method.is_static() {
            return CallKind::Static;
        }
        if !virtual_call || !method.is_virtual() {
            return CallKind::Instance;
        }
        match method.owner {
            Type::Class(id) if self.types.is_interface(id) => CallKind::Interface,
            _ => CallKind::Virtual,
        }
    }

    fn return_item(&self, signature: &Signature) -> Result<Option<StackItem>, VerifyError> {
        signature
            .returns()
            .map(|ty| self.item_of(ty, "return"))
            .transpose()
    }

    /// A `tail.` call leaves nothing but its own result behind.
    fn note_tail_call(&mut self, at: u32) -> Result<(), VerifyError> {
        if !self.prefixes.contains(Prefixes::TAIL) {
            return Ok(());
        }
        if !self.stack.is_empty() {
            return Err(self.te("tail."));
        }
        self.tail_call = Some(at);
        Ok(())
    }
}
