use super::Engine;
use crate::coder::{BranchCondition, Coder, CompareOp};
use crate::error::VerifyError;
use crate::types;
use ilvm_common::{EngineType, Instruction, Operand, RegionKind, TypeSystem};

impl<S: TypeSystem + ?Sized, C: Coder + ?Sized> Engine<'_, S, C> {
    pub(super) fn branch(&mut self, instr: &Instruction) -> Result<(), VerifyError> {
        let target = self.target(instr)?;
        self.observe(target)?;
        self.coder.branch(target);
        Ok(())
    }

    pub(super) fn branch_unary(
        &mut self,
        condition: BranchCondition,
        instr: &Instruction,
    ) -> Result<(), VerifyError> {
        let target = self.target(instr)?;
        let value = self.pop()?;
        let accepted = matches!(
            value.engine,
            EngineType::I4 | EngineType::I8 | EngineType::I | EngineType::O | EngineType::M
        ) || (value.engine == EngineType::T && self.allow_unsafe());
        if !accepted {
            return Err(self.te("value"));
        }
        self.observe(target)?;
        self.coder.branch_unary(condition, &value, target);
        Ok(())
    }

    pub(super) fn branch_compare(
        &mut self,
        op: CompareOp,
        instr: &Instruction,
    ) -> Result<(), VerifyError> {
        let target = self.target(instr)?;
        let (left, right) = self.pop_comparison(op)?;
        self.observe(target)?;
        if types::is_pointer_compare(left.engine, right.engine) {
            self.coder.branch_compare_ptr(op, &left, &right, target);
        } else {
            self.coder
                .branch_compare(op, left.engine, right.engine, target);
        }
        Ok(())
    }

    pub(super) fn switch(&mut self, instr: &Instruction) -> Result<(), VerifyError> {
        let Operand::Switch(cases) = &instr.operand else {
            return Err(self.te("operand"));
        };
        let mut targets = Vec::new();
        targets.try_reserve_exact(cases.len())?;
        for &case in cases {
            targets.push(self.absolute(case)?);
        }

        let value = self.pop_engine("value", &[EngineType::I4, EngineType::I])?;
        for &target in &targets {
            self.observe(target)?;
        }
        self.coder.switch(value.engine, &targets);
        Ok(())
    }

    /// `leave` empties the stack and may not escape a filter or a
    /// finally/fault handler.
    pub(super) fn leave(&mut self, instr: &Instruction) -> Result<(), VerifyError> {
        let target = self.target(instr)?;
        let pc = self.at;
        let escapes = self.method.regions.iter().any(|region| {
            region.in_filter(pc)
                || (matches!(region.kind, RegionKind::Finally | RegionKind::Fault)
                    && region.in_handler(pc)
                    && !region.in_handler(target))
        });
        if escapes {
            return Err(self.te("leave"));
        }
        self.stack.clear();
        self.observe(target)?;
        self.coder.leave(target);
        Ok(())
    }

    pub(super) fn end_finally(&mut self) -> Result<(), VerifyError> {
        let pc = self.at;
        let inside = self.method.regions.iter().any(|region| {
            matches!(region.kind, RegionKind::Finally | RegionKind::Fault) && region.in_handler(pc)
        });
        if !inside {
            return Err(self.te("endfinally"));
        }
        self.stack.clear();
        self.coder.end_finally();
        Ok(())
    }

    pub(super) fn end_filter(&mut self) -> Result<(), VerifyError> {
        let pc = self.at;
        if !self.method.regions.iter().any(|region| region.in_filter(pc)) {
            return Err(self.te("endfilter"));
        }
        self.pop_engine("value", &[EngineType::I4])?;
        self.expect_empty()?;
        self.coder.end_filter();
        Ok(())
    }

    pub(super) fn throw(&mut self) -> Result<(), VerifyError> {
        let exception = self.pop_engine("value", &[EngineType::O])?;
        self.stack.clear();
        self.coder.throw(&exception);
        Ok(())
    }

    pub(super) fn rethrow(&mut self) -> Result<(), VerifyError> {
        let pc = self.at;
        let inside = self.method.regions.iter().any(|region| {
            matches!(region.kind, RegionKind::Catch { .. } | RegionKind::Filter { .. })
                && region.in_handler(pc)
        });
        if !inside {
            return Err(self.te("rethrow"));
        }
        self.stack.clear();
        self.coder.rethrow();
        Ok(())
    }

    pub(super) fn ret(&mut self) -> Result<(), VerifyError> {
        if self.in_region() {
            return Err(self.te("ret"));
        }
        let method = self.method;
        let value = match method.signature.returns() {
            Some(ty) => Some(self.pop_into(ty, "return")?),
            None => None,
        };
        self.expect_empty()?;
        self.coder.ret(value.as_ref());
        Ok(())
    }

    /// `jmp` hands the current arguments to a method with the same signature.
    pub(super) fn jmp(&mut self, instr: &Instruction) -> Result<(), VerifyError> {
        if !self.allow_unsafe() || self.in_region() {
            return Err(self.te("jmp"));
        }
        let callee = self.resolve_method(instr)?;
        if callee.signature != self.method.signature {
            return Err(self.te("token"));
        }
        self.expect_empty()?;
        self.coder.jmp(&callee);
        Ok(())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn target(&self, instr: &Instruction) -> Result<u32, VerifyError> {
        let target = instr
            .branch_target()
            .ok_or_else(|| self.te("operand"))?;
        self.absolute(target)
    }

    fn absolute(&self, target: i64) -> Result<u32, VerifyError> {
        u32::try_from(target)
            .ok()
            .filter(|&t| t < self.mask.len())
            .ok_or(VerifyError::BranchOutOfRange {
                at: self.at,
                target,
            })
    }

    /// Unify the live stack with the label at `target`.
    fn observe(&mut self, target: u32) -> Result<(), VerifyError> {
        self.labels
            .observe_or_record(self.types, target, self.stack.items())?;
        Ok(())
    }

    /// The current instruction lies in a try block, handler or filter.
    fn in_region(&self) -> bool {
        let pc = self.at;
        self.method
            .regions
            .iter()
            .any(|region| region.in_try(pc) || region.in_handler(pc) || region.in_filter(pc))
    }
}
