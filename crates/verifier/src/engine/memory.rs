use super::Engine;
use crate::coder::Coder;
use crate::error::VerifyError;
use crate::types;
use ilvm_common::{
    EngineType, FieldRef, Instruction, Opcode, Primitive, StackItem, Type, TypeSystem, WellKnown,
};

/// Location type of a typed `ldind`/`stind`. `None` for the `.ref` forms
/// and for every other opcode.
pub(super) fn indirect_type(opcode: Opcode) -> Option<Type> {
    use Opcode::*;

    let primitive = match opcode {
        LdindI1 | StindI1 => Primitive::I1,
        LdindU1 => Primitive::U1,
        LdindI2 | StindI2 => Primitive::I2,
        LdindU2 => Primitive::U2,
        LdindI4 | StindI4 => Primitive::I4,
        LdindU4 => Primitive::U4,
        LdindI8 | StindI8 => Primitive::I8,
        LdindI | StindI => Primitive::I,
        LdindR4 | StindR4 => Primitive::R4,
        LdindR8 | StindR8 => Primitive::R8,
        _ => return None,
    };
    Some(Type::Primitive(primitive))
}

impl<S: TypeSystem + ?Sized, C: Coder + ?Sized> Engine<'_, S, C> {
    pub(super) fn load_indirect(&mut self, opcode: Opcode) -> Result<(), VerifyError> {
        let address = self.pop()?;
        let (ty, item) = match indirect_type(opcode) {
            Some(ty) => {
                self.check_pointee(&address, &ty)?;
                let item = self.item_of(&ty, "address")?;
                (ty, item)
            }
            None => {
                let ty = self.reference_pointee(&address)?;
                (ty.clone(), StackItem::object(ty))
            }
        };
        self.push(item)?;
        self.coder.load_indirect(&ty);
        Ok(())
    }

    pub(super) fn store_indirect(&mut self, opcode: Opcode) -> Result<(), VerifyError> {
        let value = self.pop()?;
        let address = self.pop()?;
        let ty = match indirect_type(opcode) {
            Some(ty) => {
                self.check_pointee(&address, &ty)?;
                ty
            }
            None => self.reference_pointee(&address)?,
        };
        if !types::assignable_to(self.types, &value, &ty, self.allow_unsafe()) {
            return Err(self.te("value"));
        }
        self.coder.store_indirect(&ty);
        Ok(())
    }

    pub(super) fn load_object(&mut self, instr: &Instruction) -> Result<(), VerifyError> {
        let ty = self.resolve_type(instr)?;
        let address = self.pop()?;
        self.check_pointee(&address, &ty)?;
        let item = self.item_of(&ty, "token")?;
        self.push(item)?;
        self.coder.load_object(&ty);
        Ok(())
    }

    pub(super) fn store_object(&mut self, instr: &Instruction) -> Result<(), VerifyError> {
        let ty = self.resolve_type(instr)?;
        self.pop_into(&ty, "value")?;
        let address = self.pop()?;
        self.check_pointee(&address, &ty)?;
        self.coder.store_object(&ty);
        Ok(())
    }

    pub(super) fn copy_object(&mut self, instr: &Instruction) -> Result<(), VerifyError> {
        let ty = self.resolve_type(instr)?;
        let source = self.pop()?;
        let destination = self.pop()?;
        self.check_pointee(&source, &ty)?;
        self.check_pointee(&destination, &ty)?;
        self.coder.copy_object(&ty);
        Ok(())
    }

    pub(super) fn init_object(&mut self, instr: &Instruction) -> Result<(), VerifyError> {
        let ty = self.resolve_type(instr)?;
        let address = self.pop()?;
        self.check_pointee(&address, &ty)?;
        self.coder.init_object(&ty);
        Ok(())
    }

    pub(super) fn localloc(&mut self) -> Result<(), VerifyError> {
        if !self.allow_unsafe() {
            return Err(self.te("localloc"));
        }
        self.pop_engine("size", &[EngineType::I4, EngineType::I])?;
        if !self.stack.is_empty() {
            return Err(self.te("localloc"));
        }
        self.push(StackItem::transient_ptr(Primitive::U1.into()))?;
        self.coder.localloc();
        Ok(())
    }

    pub(super) fn copy_block(&mut self) -> Result<(), VerifyError> {
        if !self.allow_unsafe() {
            return Err(self.te("cpblk"));
        }
        self.pop_engine("size", &[EngineType::I4])?;
        self.pop_block_address("source")?;
        self.pop_block_address("destination")?;
        self.coder.copy_block();
        Ok(())
    }

    pub(super) fn init_block(&mut self) -> Result<(), VerifyError> {
        if !self.allow_unsafe() {
            return Err(self.te("initblk"));
        }
        self.pop_engine("size", &[EngineType::I4])?;
        self.pop_engine("value", &[EngineType::I4])?;
        self.pop_block_address("address")?;
        self.coder.init_block();
        Ok(())
    }

    // ========================================================================
    // Fields
    // ========================================================================

    pub(super) fn load_field(&mut self, instr: &Instruction) -> Result<(), VerifyError> {
        let field = self.instance_field(instr)?;
        let object = self.pop()?;
        self.check_field_object(&field, &object, true)?;
        let item = self.item_of(&field.ty, "token")?;
        self.push(item)?;
        self.coder.load_field(&field, &object);
        Ok(())
    }

    pub(super) fn load_field_addr(&mut self, instr: &Instruction) -> Result<(), VerifyError> {
        let field = self.instance_field(instr)?;
        let object = self.pop()?;
        self.check_field_object(&field, &object, false)?;
        self.push(StackItem::managed_ptr(field.ty.clone()))?;
        self.coder.load_field_addr(&field, &object);
        Ok(())
    }

    pub(super) fn store_field(&mut self, instr: &Instruction) -> Result<(), VerifyError> {
        let field = self.instance_field(instr)?;
        let value = self.pop_into(&field.ty, "value")?;
        let object = self.pop()?;
        self.check_field_object(&field, &object, false)?;
        self.coder.store_field(&field, &object, &value);
        Ok(())
    }

    pub(super) fn load_static(&mut self, instr: &Instruction) -> Result<(), VerifyError> {
        let field = self.static_field(instr)?;
        let item = self.item_of(&field.ty, "token")?;
        self.push(item)?;
        self.coder.load_static(&field);
        Ok(())
    }

    pub(super) fn load_static_addr(&mut self, instr: &Instruction) -> Result<(), VerifyError> {
        let field = self.static_field(instr)?;
        self.push(StackItem::managed_ptr(field.ty.clone()))?;
        self.coder.load_static_addr(&field);
        Ok(())
    }

    pub(super) fn store_static(&mut self, instr: &Instruction) -> Result<(), VerifyError> {
        let field = self.static_field(instr)?;
        let value = self.pop_into(&field.ty, "value")?;
        self.coder.store_static(&field, &value);
        Ok(())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// An address operand must point at `expected`. Unmanaged addresses
    /// are taken on trust in unsafe mode.
    fn check_pointee(&self, address: &StackItem, expected: &Type) -> Result<(), VerifyError> {
        let ok = match (address.engine, &address.ty) {
            (EngineType::M, Some(pointee)) => types::same_location(self.types, pointee, expected),
            (EngineType::T | EngineType::I, _) => self.allow_unsafe(),
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(self.te("address"))
        }
    }

    /// Pointee of an address used by `ldind.ref`/`stind.ref`.
    fn reference_pointee(&self, address: &StackItem) -> Result<Type, VerifyError> {
        match (address.engine, &address.ty) {
            (EngineType::M, Some(pointee)) if pointee.is_reference() => Ok(pointee.clone()),
            (EngineType::T | EngineType::I, _) if self.allow_unsafe() => {
                Ok(Type::Class(self.types.well_known(WellKnown::Object)))
            }
            _ => Err(self.te("address")),
        }
    }

    fn pop_block_address(&mut self, operand: &'static str) -> Result<StackItem, VerifyError> {
        self.pop_engine(operand, &[EngineType::M, EngineType::T, EngineType::I])
    }

    fn instance_field(&self, instr: &Instruction) -> Result<FieldRef, VerifyError> {
        let field = self.resolve_field(instr)?;
        if field.is_static() {
            return Err(self.te("token"));
        }
        Ok(field)
    }

    fn static_field(&self, instr: &Instruction) -> Result<FieldRef, VerifyError> {
        let field = self.resolve_field(instr)?;
        if !field.is_static() {
            return Err(self.te("token"));
        }
        Ok(field)
    }

    /// The object operand of an instance field access: a reference to a
    /// class owner, a pointer to a value-type owner, or (loads only) the
    /// value itself.
    fn check_field_object(
        &self,
        field: &FieldRef,
        object: &StackItem,
        allow_value: bool,
    ) -> Result<(), VerifyError> {
        let owner = &field.owner;
        let ok = match (object.engine, &object.ty) {
            (EngineType::O, Some(ty)) => {
                matches!(owner, Type::Class(_)) && types::object_assignable(self.types, ty, owner)
            }
            (EngineType::M, Some(pointee)) => {
                if matches!(owner, Type::ValueType(_)) {
                    types::same_location(self.types, pointee, owner)
                } else {
                    pointee.is_reference() && types::object_assignable(self.types, pointee, owner)
                }
            }
            (EngineType::MV, Some(ty)) => allow_value && ty == owner,
            (EngineType::T | EngineType::I, _) => self.allow_unsafe(),
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(self.te("object"))
        }
    }
}
