use super::Engine;
use crate::coder::Coder;
use crate::error::VerifyError;
use crate::types;
use ilvm_common::{
    EngineType, Instruction, Opcode, Primitive, StackItem, Type, TypeSystem, WellKnown,
};

/// Element type fixed by an `ldelem.*`/`stelem.*` opcode. `None` for the
/// `.ref` and token forms.
fn element_type(opcode: Opcode) -> Option<Type> {
    use Opcode::*;

    let primitive = match opcode {
        LdelemI1 | StelemI1 => Primitive::I1,
        LdelemU1 => Primitive::U1,
        LdelemI2 | StelemI2 => Primitive::I2,
        LdelemU2 => Primitive::U2,
        LdelemI4 | StelemI4 => Primitive::I4,
        LdelemU4 => Primitive::U4,
        LdelemI8 | StelemI8 => Primitive::I8,
        LdelemI | StelemI => Primitive::I,
        LdelemR4 | StelemR4 => Primitive::R4,
        LdelemR8 | StelemR8 => Primitive::R8,
        _ => return None,
    };
    Some(Type::Primitive(primitive))
}

impl<S: TypeSystem + ?Sized, C: Coder + ?Sized> Engine<'_, S, C> {
    /// `castclass` and `isinst`.
    pub(super) fn cast(&mut self, instr: &Instruction, test: bool) -> Result<(), VerifyError> {
        let ty = self.resolve_type(instr)?;
        let target = self.boxed(&ty)?;
        self.pop_engine("object", &[EngineType::O])?;
        self.push(StackItem::object(target))?;
        if test {
            self.coder.is_inst(&ty);
        } else {
            self.coder.cast_class(&ty);
        }
        Ok(())
    }

    pub(super) fn box_value(&mut self, instr: &Instruction) -> Result<(), VerifyError> {
        let ty = self.resolve_type(instr)?;
        let boxed = self.boxed(&ty)?;
        self.pop_into(&ty, "value")?;
        self.push(StackItem::object(boxed))?;
        self.coder.box_value(&ty);
        Ok(())
    }

    pub(super) fn unbox(&mut self, instr: &Instruction) -> Result<(), VerifyError> {
        let ty = self.resolve_type(instr)?;
        let is_value_type = match &ty {
            Type::ValueType(_) => true,
            Type::Primitive(p) => *p != Primitive::Void,
            _ => false,
        };
        if !is_value_type {
            return Err(self.te("token"));
        }
        self.pop_engine("object", &[EngineType::O])?;
        self.push(StackItem::managed_ptr(ty.clone()))?;
        self.coder.unbox(&ty);
        Ok(())
    }

    pub(super) fn unbox_any(&mut self, instr: &Instruction) -> Result<(), VerifyError> {
        let ty = self.resolve_type(instr)?;
        let item = self.item_of(&ty, "token")?;
        self.pop_engine("object", &[EngineType::O])?;
        self.push(item)?;
        self.coder.unbox_any(&ty);
        Ok(())
    }

    // ========================================================================
    // Arrays
    // ========================================================================

    pub(super) fn new_array(&mut self, instr: &Instruction) -> Result<(), VerifyError> {
        let element = self.resolve_type(instr)?;
        if element.is_void() || matches!(element, Type::ByRef(_) | Type::Null) {
            return Err(self.te("token"));
        }
        self.pop_engine("size", &[EngineType::I4, EngineType::I])?;
        self.push(StackItem::object(Type::array(element.clone())))?;
        self.coder.new_array(&element);
        Ok(())
    }

    pub(super) fn array_length(&mut self) -> Result<(), VerifyError> {
        self.pop_array()?;
        self.push(StackItem::native_int())?;
        self.coder.array_length();
        Ok(())
    }

    /// `ldelem.*`, `ldelem.ref` and `ldelem <token>`.
    pub(super) fn load_element(&mut self, instr: &Instruction) -> Result<(), VerifyError> {
        let declared = self.declared_element(instr)?;
        self.pop_index()?;
        let actual = self.pop_array()?;

        let (ty, item) = match declared {
            Some(ty) => {
                if let Some(actual) = &actual {
                    if !self.element_matches(actual, &ty) {
                        return Err(self.te("array"));
                    }
                }
                let item = self.item_of(&ty, "token")?;
                (ty, item)
            }
            None => {
                let ty = match actual {
                    Some(actual) if actual.is_reference() => actual,
                    Some(_) => return Err(self.te("array")),
                    None => Type::Class(self.types.well_known(WellKnown::Object)),
                };
                (ty.clone(), StackItem::object(ty))
            }
        };
        self.push(item)?;
        self.coder.load_element(&ty);
        Ok(())
    }

    pub(super) fn load_element_addr(&mut self, instr: &Instruction) -> Result<(), VerifyError> {
        let ty = self.resolve_type(instr)?;
        self.pop_index()?;
        if let Some(actual) = self.pop_array()? {
            if !types::same_location(self.types, &actual, &ty) {
                return Err(self.te("array"));
            }
        }
        self.push(StackItem::managed_ptr(ty.clone()))?;
        self.coder.load_element_addr(&ty);
        Ok(())
    }

    /// `stelem.*`, `stelem.ref` and `stelem <token>`.
    pub(super) fn store_element(&mut self, instr: &Instruction) -> Result<(), VerifyError> {
        let declared = self.declared_element(instr)?;
        let value = self.pop()?;
        self.pop_index()?;
        let actual = self.pop_array()?;

        let ty = match declared {
            Some(ty) => {
                if let Some(actual) = &actual {
                    if !self.element_matches(actual, &ty) {
                        return Err(self.te("array"));
                    }
                }
                ty
            }
            // Covariant stores are checked at run time.
            None => match actual {
                Some(actual) if actual.is_reference() => actual,
                Some(_) => return Err(self.te("array")),
                None => Type::Class(self.types.well_known(WellKnown::Object)),
            },
        };
        let ok = if ty.is_reference() {
            value.engine == EngineType::O
        } else {
            types::assignable_to(self.types, &value, &ty, self.allow_unsafe())
        };
        if !ok {
            return Err(self.te("value"));
        }
        self.coder.store_element(&ty);
        Ok(())
    }

    // ========================================================================
    // Typed references
    // ========================================================================

    pub(super) fn make_refany(&mut self, instr: &Instruction) -> Result<(), VerifyError> {
        let ty = self.resolve_type(instr)?;
        let address = self.pop_engine("address", &[EngineType::M])?;
        match &address.ty {
            Some(pointee) if types::same_location(self.types, pointee, &ty) => {}
            _ => return Err(self.te("address")),
        }
        self.push(StackItem::value(Primitive::TypedRef.into()))?;
        self.coder.make_refany(&ty);
        Ok(())
    }

    pub(super) fn refany_val(&mut self, instr: &Instruction) -> Result<(), VerifyError> {
        let ty = self.resolve_type(instr)?;
        self.pop_typed_ref()?;
        self.push(StackItem::managed_ptr(ty.clone()))?;
        self.coder.refany_val(&ty);
        Ok(())
    }

    pub(super) fn refany_type(&mut self) -> Result<(), VerifyError> {
        self.pop_typed_ref()?;
        let handle = Type::ValueType(self.types.well_known(WellKnown::RuntimeTypeHandle));
        self.push(StackItem::value(handle))?;
        self.coder.refany_type();
        Ok(())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// The reference type a value of `ty` becomes when boxed.
    fn boxed(&self, ty: &Type) -> Result<Type, VerifyError> {
        match ty {
            Type::Class(_) | Type::Array(_) => Ok(ty.clone()),
            Type::ValueType(id) => Ok(Type::Class(*id)),
            Type::Primitive(p) => self
                .types
                .primitive_class(*p)
                .map(Type::Class)
                .ok_or_else(|| self.te("token")),
            Type::ByRef(_) | Type::Pointer(_) | Type::Null => Err(self.te("token")),
        }
    }

    /// Element type named by the opcode or its token; `None` for `.ref` forms.
    fn declared_element(&self, instr: &Instruction) -> Result<Option<Type>, VerifyError> {
        match instr.opcode {
            Opcode::Ldelem | Opcode::Stelem => self.resolve_type(instr).map(Some),
            opcode => Ok(element_type(opcode)),
        }
    }

    /// Pop an array reference and return its element type, or `None` for `null`.
    fn pop_array(&mut self) -> Result<Option<Type>, VerifyError> {
        let array = self.pop_engine("array", &[EngineType::O])?;
        match array.ty {
            Some(Type::Array(element)) => Ok(Some(*element)),
            Some(Type::Null) => Ok(None),
            _ => Err(self.te("array")),
        }
    }

    fn pop_index(&mut self) -> Result<(), VerifyError> {
        self.pop_engine("index", &[EngineType::I4, EngineType::I])?;
        Ok(())
    }

    fn pop_typed_ref(&mut self) -> Result<(), VerifyError> {
        let value = self.pop_engine("value", &[EngineType::MV])?;
        if value.ty != Some(Type::Primitive(Primitive::TypedRef)) {
            return Err(self.te("value"));
        }
        Ok(())
    }

    /// An array's element type agrees with the one an instruction names.
    fn element_matches(&self, actual: &Type, declared: &Type) -> bool {
        if declared.is_reference() {
            actual.is_reference() && types::object_assignable(self.types, actual, declared)
        } else {
            types::same_location(self.types, actual, declared)
        }
    }
}
