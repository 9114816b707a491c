//! Byte-level instruction emitter.
//!
//! `CodeWriter` appends encoded instructions and resolves forward and
//! backward branch labels when finished. It performs no validation beyond
//! displacement range; producing ill-typed code is allowed.

use crate::error::EmitError;
use crate::opcode::{Inline, Opcode};

/// A branch destination handed out by [`CodeWriter::label`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(usize);

#[derive(Debug, Clone)]
struct Fixup {
    /// Position of the displacement bytes.
    patch: usize,
    /// Offset the displacement is relative to.
    base: u32,
    /// Offset of the branching instruction, for diagnostics.
    at: u32,
    label: Label,
    short: bool,
}

/// Accumulates an instruction byte stream.
#[derive(Debug, Clone, Default)]
pub struct CodeWriter {
    code: Vec<u8>,
    labels: Vec<Option<u32>>,
    fixups: Vec<Fixup>,
}

impl CodeWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offset the next instruction will start at.
    pub fn offset(&self) -> u32 {
        self.code.len() as u32
    }

    /// Allocate an unbound label.
    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind `label` to the current offset.
    pub fn mark(&mut self, label: Label) -> &mut Self {
        let here = self.offset();
        if let Some(slot) = self.labels.get_mut(label.0) {
            *slot = Some(here);
        }
        self
    }

    /// Allocate a label bound to the current offset.
    pub fn here(&mut self) -> Label {
        let label = self.label();
        self.mark(label);
        label
    }

    fn opcode_bytes(&mut self, opcode: Opcode) {
        let (bytes, len) = opcode.encoding();
        self.code.extend_from_slice(&bytes[..len]);
    }

    /// Emit an instruction without an operand.
    pub fn op(&mut self, opcode: Opcode) -> &mut Self {
        self.opcode_bytes(opcode);
        self
    }

    /// Emit an instruction with a one-byte operand (`ldarg.s`, `unaligned.`, ...).
    pub fn op_u1(&mut self, opcode: Opcode, value: u8) -> &mut Self {
        self.opcode_bytes(opcode);
        self.code.push(value);
        self
    }

    /// Emit an instruction with a two-byte index operand (`ldloc`, `starg`, ...).
    pub fn op_u2(&mut self, opcode: Opcode, value: u16) -> &mut Self {
        self.opcode_bytes(opcode);
        self.code.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Emit an instruction with a four-byte operand, usually a token.
    pub fn op_u4(&mut self, opcode: Opcode, value: u32) -> &mut Self {
        self.opcode_bytes(opcode);
        self.code.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Emit a token-carrying instruction.
    pub fn token(&mut self, opcode: Opcode, token: u32) -> &mut Self {
        self.op_u4(opcode, token)
    }

    pub fn ldc_i4(&mut self, value: i32) -> &mut Self {
        self.op_u4(Opcode::LdcI4, value as u32)
    }

    pub fn ldc_i4_s(&mut self, value: i8) -> &mut Self {
        self.op_u1(Opcode::LdcI4S, value as u8)
    }

    pub fn ldc_i8(&mut self, value: i64) -> &mut Self {
        self.opcode_bytes(Opcode::LdcI8);
        self.code.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn ldc_r4(&mut self, value: f32) -> &mut Self {
        self.op_u4(Opcode::LdcR4, value.to_bits())
    }

    pub fn ldc_r8(&mut self, value: f64) -> &mut Self {
        self.opcode_bytes(Opcode::LdcR8);
        self.code.extend_from_slice(&value.to_bits().to_le_bytes());
        self
    }

    /// Emit a branch to `label`. Short or long form follows the opcode.
    pub fn branch(&mut self, opcode: Opcode, label: Label) -> &mut Self {
        let at = self.offset();
        self.opcode_bytes(opcode);
        let short = opcode.info().inline == Inline::ShortBranch;
        let patch = self.code.len();
        let width = if short { 1 } else { 4 };
        self.code.extend(std::iter::repeat(0).take(width));
        self.fixups.push(Fixup {
            patch,
            base: self.offset(),
            at,
            label,
            short,
        });
        self
    }

    /// Emit a branch with a raw displacement, bypassing labels.
    pub fn branch_raw(&mut self, opcode: Opcode, displacement: i32) -> &mut Self {
        self.opcode_bytes(opcode);
        if opcode.info().inline == Inline::ShortBranch {
            self.code.push(displacement as i8 as u8);
        } else {
            self.code.extend_from_slice(&displacement.to_le_bytes());
        }
        self
    }

    /// Emit a `switch` over `cases`.
    pub fn switch(&mut self, cases: &[Label]) -> &mut Self {
        let at = self.offset();
        self.opcode_bytes(Opcode::Switch);
        self.code
            .extend_from_slice(&(cases.len() as u32).to_le_bytes());
        let table = self.code.len();
        let base = at + 5 + 4 * cases.len() as u32;
        for (i, &label) in cases.iter().enumerate() {
            self.fixups.push(Fixup {
                patch: table + i * 4,
                base,
                at,
                label,
                short: false,
            });
        }
        self.code.extend(std::iter::repeat(0).take(cases.len() * 4));
        self
    }

    /// Emit an annotation carrying `payload`, short form when it fits.
    pub fn annotation(&mut self, payload: &[u8]) -> &mut Self {
        match u8::try_from(payload.len()) {
            Ok(len) => {
                self.opcode_bytes(Opcode::AnnDataS);
                self.code.push(len);
            }
            Err(_) => {
                self.opcode_bytes(Opcode::AnnData);
                self.code
                    .extend_from_slice(&(payload.len() as u32).to_le_bytes());
            }
        }
        self.code.extend_from_slice(payload);
        self
    }

    /// Append raw bytes.
    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.code.extend_from_slice(bytes);
        self
    }

    /// Resolve every branch and return the code bytes.
    pub fn finish(&self) -> Result<Vec<u8>, EmitError> {
        let mut code = self.code.clone();
        for fixup in &self.fixups {
            let target = self
                .labels
                .get(fixup.label.0)
                .copied()
                .flatten()
                .ok_or(EmitError::UnboundLabel {
                    label: fixup.label.0,
                })?;
            let displacement = target as i64 - fixup.base as i64;
            if fixup.short {
                let byte = i8::try_from(displacement).map_err(|_| {
                    EmitError::DisplacementOverflow {
                        at: fixup.at,
                        displacement,
                    }
                })?;
                code[fixup.patch] = byte as u8;
            } else {
                let bytes = (displacement as i32).to_le_bytes();
                code[fixup.patch..fixup.patch + 4].copy_from_slice(&bytes);
            }
        }
        Ok(code)
    }
}
