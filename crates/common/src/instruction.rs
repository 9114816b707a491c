//! Decoding of variable-length instructions from a method's code bytes.
//!
//! Layout of one instruction:
//! ```text
//! [0xFE]? opcode   fixed operand bytes   variable tail (switch / annotation)
//! ```
//! All multi-byte operands are little-endian. Branch displacements are
//! relative to the address of the *next* instruction.

use crate::error::DecodeError;
use crate::opcode::{Inline, Opcode, PREFIXED_BASE, PREFIX_BYTE};

/// A decoded inline operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    Int8(i8),
    UInt8(u8),
    UInt16(u16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Token(u32),
    /// Absolute branch destination. May lie outside the method; the
    /// jump-target prepass rejects those.
    Branch(i64),
    /// Absolute switch destinations, in case order.
    Switch(Vec<i64>),
    /// Length of an annotation payload.
    Annotation(u32),
}

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Byte offset of the first opcode byte.
    pub offset: u32,
    /// The operation.
    pub opcode: Opcode,
    /// Total size in bytes, including any variable-length tail.
    pub size: u32,
    /// The inline operand.
    pub operand: Operand,
}

impl Instruction {
    /// Decode the instruction starting at `offset`.
    pub fn decode(code: &[u8], offset: u32) -> Result<Self, DecodeError> {
        let at = offset as usize;
        let truncated = DecodeError::Truncated { at: offset };

        let first = *code.get(at).ok_or(truncated.clone())?;
        let (index, opcode_len) = if first == PREFIX_BYTE {
            let second = *code.get(at + 1).ok_or(truncated.clone())?;
            (PREFIXED_BASE + second as u16, 2usize)
        } else {
            (first as u16, 1usize)
        };
        let opcode =
            Opcode::from_index(index).ok_or(DecodeError::InvalidOpcode { at: offset })?;
        let info = opcode.info();

        let fixed = info.size as usize;
        if at + fixed > code.len() {
            return Err(truncated);
        }
        let arg = at + opcode_len;

        // Sizes are computed in u64 so a hostile count cannot wrap.
        let tail: u64 = match info.inline {
            Inline::Switch => read_u32(code, arg) as u64 * 4,
            Inline::Annotation8 => code[arg] as u64,
            Inline::Annotation32 => read_u32(code, arg) as u64,
            _ => 0,
        };
        let total = fixed as u64 + tail;
        if at as u64 + total > code.len() as u64 {
            return Err(truncated);
        }
        let size = total as u32;
        let next = offset as i64 + total as i64;

        let operand = match info.inline {
            Inline::None => Operand::None,
            Inline::Int8 => Operand::Int8(code[arg] as i8),
            Inline::UInt8 => Operand::UInt8(code[arg]),
            Inline::UInt16 => Operand::UInt16(u16::from_le_bytes([code[arg], code[arg + 1]])),
            Inline::Int32 => Operand::Int32(read_u32(code, arg) as i32),
            Inline::Int64 => Operand::Int64(read_u64(code, arg) as i64),
            Inline::Float32 => Operand::Float32(f32::from_bits(read_u32(code, arg))),
            Inline::Float64 => Operand::Float64(f64::from_bits(read_u64(code, arg))),
            Inline::Token => Operand::Token(read_u32(code, arg)),
            Inline::ShortBranch => Operand::Branch(next + (code[arg] as i8) as i64),
            Inline::Branch => Operand::Branch(next + (read_u32(code, arg) as i32) as i64),
            Inline::Switch => {
                let count = read_u32(code, arg) as usize;
                let targets = (0..count)
                    .map(|case| {
                        let disp = read_u32(code, arg + 4 + case * 4) as i32;
                        next + disp as i64
                    })
                    .collect();
                Operand::Switch(targets)
            }
            Inline::Annotation8 => Operand::Annotation(code[arg] as u32),
            Inline::Annotation32 => Operand::Annotation(read_u32(code, arg)),
        };

        Ok(Self {
            offset,
            opcode,
            size,
            operand,
        })
    }

    /// Offset of the instruction that follows this one.
    pub fn next(&self) -> u32 {
        self.offset + self.size
    }

    /// The metadata token operand, if this instruction has one.
    pub fn token(&self) -> Option<u32> {
        match self.operand {
            Operand::Token(token) => Some(token),
            _ => None,
        }
    }

    /// The single branch destination, if this is a branch.
    pub fn branch_target(&self) -> Option<i64> {
        match self.operand {
            Operand::Branch(target) => Some(target),
            _ => None,
        }
    }

    /// A small unsigned index operand (`ldarg.s`, `ldloc`, ...).
    pub fn index_operand(&self) -> Option<u16> {
        match self.operand {
            Operand::UInt8(v) => Some(v as u16),
            Operand::UInt16(v) => Some(v),
            _ => None,
        }
    }
}

/// Iterate over the instructions of a code block in address order.
///
/// Iteration stops after the first decode error.
pub fn instructions(code: &[u8]) -> Instructions<'_> {
    Instructions {
        code,
        offset: 0,
        failed: false,
    }
}

/// Iterator returned by [`instructions`].
pub struct Instructions<'a> {
    code: &'a [u8],
    offset: u32,
    failed: bool,
}

impl Iterator for Instructions<'_> {
    type Item = Result<Instruction, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset as usize >= self.code.len() {
            return None;
        }
        match Instruction::decode(self.code, self.offset) {
            Ok(instr) => {
                self.offset = instr.next();
                Some(Ok(instr))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

fn read_u32(code: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([code[at], code[at + 1], code[at + 2], code[at + 3]])
}

fn read_u64(code: &[u8], at: usize) -> u64 {
    let lo = read_u32(code, at) as u64;
    let hi = read_u32(code, at + 4) as u64;
    lo | (hi << 32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_simple_opcode() {
        let instr = Instruction::decode(&[0x58], 0).unwrap();
        assert_eq!(instr.opcode, Opcode::Add);
        assert_eq!(instr.size, 1);
        assert_eq!(instr.operand, Operand::None);
    }

    #[test]
    fn decode_ldc_i4() {
        let code = [0x20, 0x2A, 0x00, 0x00, 0x00];
        let instr = Instruction::decode(&code, 0).unwrap();
        assert_eq!(instr.opcode, Opcode::LdcI4);
        assert_eq!(instr.operand, Operand::Int32(42));
        assert_eq!(instr.next(), 5);
    }

    #[test]
    fn decode_prefixed_opcode() {
        let code = [0x00, 0xFE, 0x01];
        let instr = Instruction::decode(&code, 1).unwrap();
        assert_eq!(instr.opcode, Opcode::Ceq);
        assert_eq!(instr.size, 2);
    }

    #[test]
    fn short_branch_is_relative_to_next_instruction() {
        // br.s -2 at offset 0 jumps back to itself
        let instr = Instruction::decode(&[0x2B, 0xFE], 0).unwrap();
        assert_eq!(instr.branch_target(), Some(0));
    }

    #[test]
    fn long_branch_can_point_outside() {
        let code = [0x38, 0x10, 0x00, 0x00, 0x00];
        let instr = Instruction::decode(&code, 0).unwrap();
        assert_eq!(instr.branch_target(), Some(21));
    }

    #[test]
    fn decode_switch() {
        let code = [
            0x45, 0x02, 0x00, 0x00, 0x00, // switch (2 cases)
            0x00, 0x00, 0x00, 0x00, // -> 13
            0xF3, 0xFF, 0xFF, 0xFF, // -> 0
        ];
        let instr = Instruction::decode(&code, 0).unwrap();
        assert_eq!(instr.size, 13);
        assert_eq!(instr.operand, Operand::Switch(vec![13, 0]));
    }

    #[test]
    fn switch_count_exceeding_code_is_truncated() {
        let code = [0x45, 0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(
            Instruction::decode(&code, 0),
            Err(DecodeError::Truncated { at: 0 })
        );
    }

    #[test]
    fn decode_annotation() {
        let code = [0xFE, 0x22, 0x03, 0xAA, 0xBB, 0xCC, 0x00];
        let instr = Instruction::decode(&code, 0).unwrap();
        assert_eq!(instr.opcode, Opcode::AnnDataS);
        assert_eq!(instr.size, 6);
        assert_eq!(instr.operand, Operand::Annotation(3));
    }

    #[test]
    fn truncated_operand() {
        assert_eq!(
            Instruction::decode(&[0x20, 0x01], 0),
            Err(DecodeError::Truncated { at: 0 })
        );
        assert_eq!(
            Instruction::decode(&[0xFE], 0),
            Err(DecodeError::Truncated { at: 0 })
        );
    }

    #[test]
    fn invalid_opcodes() {
        assert_eq!(
            Instruction::decode(&[0x24], 0),
            Err(DecodeError::InvalidOpcode { at: 0 })
        );
        assert_eq!(
            Instruction::decode(&[0xFE, 0x08], 0),
            Err(DecodeError::InvalidOpcode { at: 0 })
        );
    }

    #[test]
    fn iterator_walks_in_order() {
        let code = [0x16, 0x17, 0x58, 0x2A];
        let ops: Vec<Opcode> = instructions(&code).map(|i| i.unwrap().opcode).collect();
        assert_eq!(
            ops,
            vec![Opcode::LdcI40, Opcode::LdcI41, Opcode::Add, Opcode::Ret]
        );
    }

    #[test]
    fn iterator_stops_after_error() {
        let code = [0x00, 0x24, 0x00];
        let results: Vec<_> = instructions(&code).collect();
        assert_eq!(results.len(), 2);
        assert!(results[1].is_err());
    }
}
