//! Errors for decoding and emitting ILVM instruction streams.

use thiserror::Error;

/// Errors that occur while decoding a single instruction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The instruction's declared size runs past the end of the code.
    #[error("truncated instruction at offset {at}")]
    Truncated { at: u32 },

    /// The byte (or prefixed byte pair) at `at` is not an assigned opcode.
    #[error("invalid opcode at offset {at}")]
    InvalidOpcode { at: u32 },
}

impl DecodeError {
    /// Offset of the instruction that failed to decode.
    pub fn offset(&self) -> u32 {
        match self {
            DecodeError::Truncated { at } | DecodeError::InvalidOpcode { at } => *at,
        }
    }
}

/// Errors from [`CodeWriter::finish`](crate::emit::CodeWriter::finish).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmitError {
    /// A branch refers to a label that was never marked.
    #[error("label {label} was never marked")]
    UnboundLabel { label: usize },

    /// A short branch at `at` cannot reach its label.
    #[error("short branch at offset {at} cannot reach displacement {displacement}")]
    DisplacementOverflow { at: u32, displacement: i64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_truncated() {
        assert_eq!(
            DecodeError::Truncated { at: 7 }.to_string(),
            "truncated instruction at offset 7"
        );
    }

    #[test]
    fn display_invalid_opcode() {
        assert_eq!(
            DecodeError::InvalidOpcode { at: 0 }.to_string(),
            "invalid opcode at offset 0"
        );
    }

    #[test]
    fn offset_accessor() {
        assert_eq!(DecodeError::Truncated { at: 3 }.offset(), 3);
        assert_eq!(DecodeError::InvalidOpcode { at: 9 }.offset(), 9);
    }

    #[test]
    fn display_emit_errors() {
        assert_eq!(
            EmitError::UnboundLabel { label: 2 }.to_string(),
            "label 2 was never marked"
        );
        assert_eq!(
            EmitError::DisplacementOverflow {
                at: 4,
                displacement: 300
            }
            .to_string(),
            "short branch at offset 4 cannot reach displacement 300"
        );
    }
}
