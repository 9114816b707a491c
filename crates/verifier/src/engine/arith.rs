use super::Engine;
use crate::coder::{BinaryOp, Coder, CompareOp, Conversion, ShiftOp, UnaryOp};
use crate::error::VerifyError;
use crate::types::{
    arithmetic, comparable, is_pointer_compare, lookup, EQUALITY_TABLE, INTEGER_TABLE,
    NUMERIC_TABLE, ORDERED_TABLE, SHIFT_TABLE,
};
use ilvm_common::{EngineType, Opcode, Primitive, StackItem, TypeSystem};

impl<S: TypeSystem + ?Sized, C: Coder + ?Sized> Engine<'_, S, C> {
    pub(super) fn binary(&mut self, op: BinaryOp) -> Result<(), VerifyError> {
        let right = self.pop()?;
        let left = self.pop()?;

        let (table, pointer_arith) = match op {
            BinaryOp::Add | BinaryOp::Sub => (&NUMERIC_TABLE, true),
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => (&NUMERIC_TABLE, false),
            BinaryOp::AddOvfUn | BinaryOp::SubOvfUn => (&INTEGER_TABLE, true),
            _ => (&INTEGER_TABLE, false),
        };
        let result = arithmetic(
            table,
            left.engine,
            right.engine,
            pointer_arith,
            self.allow_unsafe(),
        );
        if result == EngineType::Invalid {
            return Err(self.mismatch());
        }

        // Pointer results keep the pointee of the pointer operand.
        let item = if result.is_pointer() {
            if left.engine == result {
                left.clone()
            } else {
                right.clone()
            }
        } else {
            StackItem::numeric(result)
        };
        self.push(item)?;
        self.coder.binary(op, left.engine, right.engine, result);
        Ok(())
    }

    pub(super) fn shift(&mut self, op: ShiftOp) -> Result<(), VerifyError> {
        let amount = self.pop()?;
        let value = self.pop()?;
        let result = lookup(&SHIFT_TABLE, value.engine, amount.engine);
        if result == EngineType::Invalid {
            return Err(self.mismatch());
        }
        self.push(StackItem::numeric(result))?;
        self.coder.shift(op, value.engine, amount.engine);
        Ok(())
    }

    pub(super) fn unary(&mut self, op: UnaryOp) -> Result<(), VerifyError> {
        let value = self.pop()?;
        let table = match op {
            UnaryOp::Neg => &NUMERIC_TABLE,
            UnaryOp::Not => &INTEGER_TABLE,
        };
        let result = lookup(table, value.engine, value.engine);
        if result == EngineType::Invalid {
            return Err(self.te("value"));
        }
        self.push(StackItem::numeric(result))?;
        self.coder.unary(op, value.engine);
        Ok(())
    }

    pub(super) fn convert(&mut self, opcode: Opcode) -> Result<(), VerifyError> {
        let conversion = conversion(opcode).ok_or_else(|| self.te("operand"))?;
        let value = self.pop()?;

        let pointer_source = self.allow_unsafe()
            && value.engine.is_pointer()
            && matches!(
                conversion.target,
                Primitive::I | Primitive::U | Primitive::I8 | Primitive::U8
            );
        if !value.engine.is_numeric() && !pointer_source {
            return Err(self.te("value"));
        }

        self.push(StackItem::numeric(conversion.target.engine_type()))?;
        self.coder.convert(conversion, value.engine);
        Ok(())
    }

    pub(super) fn check_finite(&mut self) -> Result<(), VerifyError> {
        self.pop_engine("value", &[EngineType::F])?;
        self.push(StackItem::float())?;
        self.coder.check_finite();
        Ok(())
    }

    pub(super) fn compare(&mut self, op: CompareOp) -> Result<(), VerifyError> {
        let (left, right) = self.pop_comparison(op)?;
        self.push(StackItem::i4())?;
        if is_pointer_compare(left.engine, right.engine) {
            self.coder.compare_ptr(op, &left, &right);
        } else {
            self.coder.compare(op, left.engine, right.engine);
        }
        Ok(())
    }

    /// Pop and check both operands of a comparison, left first.
    pub(super) fn pop_comparison(
        &mut self,
        op: CompareOp,
    ) -> Result<(StackItem, StackItem), VerifyError> {
        let right = self.pop()?;
        let left = self.pop()?;
        // Object references only support equality, plus `cgt.un` against null.
        let table = match op {
            CompareOp::Eq | CompareOp::NeUn | CompareOp::GtUn => &EQUALITY_TABLE,
            _ => &ORDERED_TABLE,
        };
        if !comparable(table, left.engine, right.engine, self.allow_unsafe()) {
            return Err(self.mismatch());
        }
        Ok((left, right))
    }
}

/// The conversion performed by a `conv.*` opcode.
pub(super) fn conversion(opcode: Opcode) -> Option<Conversion> {
    use Opcode::*;

    let (target, checked, unsigned_source) = match opcode {
        ConvI1 => (Primitive::I1, false, false),
        ConvI2 => (Primitive::I2, false, false),
        ConvI4 => (Primitive::I4, false, false),
        ConvI8 => (Primitive::I8, false, false),
        ConvR4 => (Primitive::R4, false, false),
        ConvR8 => (Primitive::R8, false, false),
        ConvU1 => (Primitive::U1, false, false),
        ConvU2 => (Primitive::U2, false, false),
        ConvU4 => (Primitive::U4, false, false),
        ConvU8 => (Primitive::U8, false, false),
        ConvI => (Primitive::I, false, false),
        ConvU => (Primitive::U, false, false),
        ConvRUn => (Primitive::R8, false, true),

        ConvOvfI1 => (Primitive::I1, true, false),
        ConvOvfI2 => (Primitive::I2, true, false),
        ConvOvfI4 => (Primitive::I4, true, false),
        ConvOvfI8 => (Primitive::I8, true, false),
        ConvOvfU1 => (Primitive::U1, true, false),
        ConvOvfU2 => (Primitive::U2, true, false),
        ConvOvfU4 => (Primitive::U4, true, false),
        ConvOvfU8 => (Primitive::U8, true, false),
        ConvOvfI => (Primitive::I, true, false),
        ConvOvfU => (Primitive::U, true, false),

        ConvOvfI1Un => (Primitive::I1, true, true),
        ConvOvfI2Un => (Primitive::I2, true, true),
        ConvOvfI4Un => (Primitive::I4, true, true),
        ConvOvfI8Un => (Primitive::I8, true, true),
        ConvOvfU1Un => (Primitive::U1, true, true),
        ConvOvfU2Un => (Primitive::U2, true, true),
        ConvOvfU4Un => (Primitive::U4, true, true),
        ConvOvfU8Un => (Primitive::U8, true, true),
        ConvOvfIUn => (Primitive::I, true, true),
        ConvOvfUUn => (Primitive::U, true, true),
        _ => return None,
    };
    Some(Conversion {
        target,
        checked,
        unsigned_source,
    })
}
