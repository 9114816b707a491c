//! Jump-target prepass.
//!
//! One forward pass over the code validates instruction framing and marks
//! three facts per byte offset: instruction start, jump target and special
//! jump target. A second pass confirms every jump target is also an
//! instruction start, catching branches into the middle of an instruction.

use log::trace;

use crate::bitset::BitSet;
use crate::error::VerifyError;
use ilvm_common::{instructions, Instruction, Operand, OperandClass};

/// Per-offset control-flow facts for one method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JumpMask {
    starts: BitSet,
    targets: BitSet,
    special: BitSet,
    len: u32,
}

impl JumpMask {
    fn new(len: u32) -> Result<Self, VerifyError> {
        let n = len as usize;
        Ok(Self {
            starts: BitSet::new_empty(n)?,
            targets: BitSet::new_empty(n)?,
            special: BitSet::new_empty(n)?,
            len,
        })
    }

    /// Code length the mask covers.
    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_instruction_start(&self, offset: u32) -> bool {
        self.starts.get(offset as usize)
    }

    pub fn is_jump_target(&self, offset: u32) -> bool {
        self.targets.get(offset as usize)
    }

    /// Reachable only through exception dispatch or a region boundary.
    pub fn is_special(&self, offset: u32) -> bool {
        self.special.get(offset as usize)
    }

    /// Number of offsets marked as jump targets.
    pub fn target_count(&self) -> usize {
        self.targets.count()
    }

    pub(crate) fn mark_target(&mut self, offset: u32) {
        self.targets.set(offset as usize);
    }

    pub(crate) fn mark_special(&mut self, offset: u32) {
        self.targets.set(offset as usize);
        self.special.set(offset as usize);
    }
}

/// Scan `code` and build its jump mask.
pub fn scan(code: &[u8]) -> Result<JumpMask, VerifyError> {
    let len = code.len() as u32;
    let mut mask = JumpMask::new(len)?;

    for instr in instructions(code) {
        let instr = instr?;
        mask.starts.set(instr.offset as usize);

        match instr.opcode.info().class() {
            OperandClass::ShortJump | OperandClass::LongJump => {
                if let Some(target) = instr.branch_target() {
                    mark_branch(&mut mask, &instr, target)?;
                }
            }
            OperandClass::Switch => {
                if let Operand::Switch(cases) = &instr.operand {
                    for &target in cases {
                        mark_branch(&mut mask, &instr, target)?;
                    }
                }
            }
            // Decoding already proved the payload fits.
            OperandClass::VarAnnotation | OperandClass::None => {}
            OperandClass::Invalid => {
                return Err(VerifyError::InvalidOpcode { at: instr.offset });
            }
        }
    }

    check_targets(code, &mask)?;
    trace!(
        "scanned {} bytes, {} jump targets",
        len,
        mask.target_count()
    );
    Ok(mask)
}

fn mark_branch(mask: &mut JumpMask, instr: &Instruction, target: i64) -> Result<(), VerifyError> {
    if target < 0 || target >= mask.len as i64 {
        return Err(VerifyError::BranchOutOfRange {
            at: instr.offset,
            target,
        });
    }
    mask.mark_target(target as u32);
    Ok(())
}

/// Every jump target must begin an instruction.
fn check_targets(code: &[u8], mask: &JumpMask) -> Result<(), VerifyError> {
    match mask.targets.first_not_in(&mask.starts) {
        None => Ok(()),
        Some(target) => Err(VerifyError::BranchOutOfRange {
            at: branch_source(code, target as i64),
            target: target as i64,
        }),
    }
}

/// Offset of the first instruction that branches to `target`.
fn branch_source(code: &[u8], target: i64) -> u32 {
    instructions(code)
        .filter_map(Result::ok)
        .find(|instr| match &instr.operand {
            Operand::Branch(t) => *t == target,
            Operand::Switch(cases) => cases.contains(&target),
            _ => false,
        })
        .map_or(0, |instr| instr.offset)
}

/// Region boundaries must begin an instruction or sit at the end of the code.
pub(crate) fn is_boundary(mask: &JumpMask, offset: u32) -> bool {
    offset == mask.len || mask.is_instruction_start(offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ilvm_common::{CodeWriter, Opcode};

    #[test]
    fn marks_starts_and_targets() {
        let mut w = CodeWriter::new();
        let done = w.label();
        w.op(Opcode::Ldarg0);
        w.branch(Opcode::BrfalseS, done);
        w.ldc_i4(1).op(Opcode::Pop);
        w.mark(done).op(Opcode::Ret);
        let code = w.finish().unwrap();

        let mask = scan(&code).unwrap();
        assert!(mask.is_instruction_start(0));
        assert!(mask.is_instruction_start(1));
        assert!(mask.is_instruction_start(3));
        assert!(!mask.is_instruction_start(4));
        assert!(mask.is_jump_target(9));
        assert!(!mask.is_jump_target(3));
        assert!(!mask.is_special(9));
        assert_eq!(mask.target_count(), 1);
    }

    #[test]
    fn branch_before_start() {
        let mut w = CodeWriter::new();
        w.branch_raw(Opcode::BrS, -3).op(Opcode::Ret);
        let code = w.finish().unwrap();
        assert_eq!(
            scan(&code),
            Err(VerifyError::BranchOutOfRange { at: 0, target: -1 })
        );
    }

    #[test]
    fn branch_at_code_length() {
        let mut w = CodeWriter::new();
        w.branch_raw(Opcode::Br, 1).op(Opcode::Ret);
        let code = w.finish().unwrap();
        assert_eq!(
            scan(&code),
            Err(VerifyError::BranchOutOfRange { at: 0, target: 6 })
        );
    }

    #[test]
    fn branch_into_instruction_middle() {
        let mut w = CodeWriter::new();
        w.branch_raw(Opcode::BrS, 1);
        w.ldc_i4(7).op(Opcode::Ret);
        let code = w.finish().unwrap();
        assert_eq!(
            scan(&code),
            Err(VerifyError::BranchOutOfRange { at: 0, target: 3 })
        );
    }

    #[test]
    fn switch_case_out_of_range() {
        let mut w = CodeWriter::new();
        w.op(Opcode::Ldarg0);
        w.raw(&[0x45, 1, 0, 0, 0, 0x40, 0, 0, 0]);
        w.op(Opcode::Ret);
        let code = w.finish().unwrap();
        assert!(matches!(
            scan(&code),
            Err(VerifyError::BranchOutOfRange { at: 1, .. })
        ));
    }

    #[test]
    fn framing_errors() {
        assert_eq!(scan(&[0x20, 0x01]), Err(VerifyError::Truncated { at: 0 }));
        assert_eq!(scan(&[0x00, 0x24]), Err(VerifyError::InvalidOpcode { at: 1 }));
        assert_eq!(
            scan(&[0xFE, 0x22, 0x09, 0x00]),
            Err(VerifyError::Truncated { at: 0 })
        );
    }

    #[test]
    fn annotations_are_skipped() {
        let mut w = CodeWriter::new();
        w.annotation(&[0x2A, 0x2A]).op(Opcode::Ret);
        let code = w.finish().unwrap();
        let mask = scan(&code).unwrap();
        assert!(mask.is_instruction_start(0));
        assert!(!mask.is_instruction_start(3));
        assert!(mask.is_instruction_start(5));
    }

    #[test]
    fn empty_code_scans() {
        let mask = scan(&[]).unwrap();
        assert!(mask.is_empty());
    }
}
