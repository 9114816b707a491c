//! Verification errors for the ILVM verifier.
//!
//! Every variant except `OutOfMemory` carries the bytecode offset (`at`)
//! of the instruction or boundary that failed. The first error ends the
//! session; nothing is collected or retried.

use ilvm_common::DecodeError;
use thiserror::Error;

/// Which stack rule a [`VerifyError::StackError`] broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackFault {
    /// Popped more than the live stack holds.
    Underflow,
    /// Pushed past the declared max-stack.
    Overflow,
    /// Two paths reach a join with different heights.
    HeightMismatch,
    /// Two paths reach a join with incompatible slots.
    SlotMismatch,
    /// Unreachable code after an unconditional transfer starts with a non-empty stack.
    NonEmptyAfterTransfer,
    /// Two exception regions seed the same offset with different stacks.
    ConflictingSeed,
}

impl std::fmt::Display for StackFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            StackFault::Underflow => "underflow",
            StackFault::Overflow => "overflow",
            StackFault::HeightMismatch => "height mismatch at join",
            StackFault::SlotMismatch => "slot mismatch at join",
            StackFault::NonEmptyAfterTransfer => "non-empty stack after unconditional transfer",
            StackFault::ConflictingSeed => "conflicting handler seed",
        };
        f.write_str(text)
    }
}

/// Reasons a method fails verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    // --- Framing ---
    /// An instruction's declared size runs past the end of the code.
    #[error("truncated instruction at offset {at}")]
    Truncated { at: u32 },

    /// Unassigned opcode byte.
    #[error("invalid opcode at offset {at}")]
    InvalidOpcode { at: u32 },

    /// A branch, switch case or region boundary outside the method or
    /// inside another instruction.
    #[error("branch out of range at offset {at}: target {target}")]
    BranchOutOfRange { at: u32, target: i64 },

    // --- Stack ---
    #[error("stack error at offset {at}: {fault}")]
    StackError { at: u32, fault: StackFault },

    // --- Types ---
    /// An operand fails the instruction's inference rule, or a token does
    /// not resolve.
    #[error("type error at offset {at}{}", operand_suffix(.operand))]
    TypeError {
        at: u32,
        operand: Option<&'static str>,
    },

    // --- Session ---
    /// A label was recorded but control never reached it.
    #[error("unresolved label at offset {at}")]
    UnresolvedLabel { at: u32 },

    /// The last instruction lets control run past the end of the method.
    #[error("control falls off the end of the method after offset {at}")]
    FallOffEnd { at: u32 },

    /// The session arena could not grow, or the backend kept restarting.
    #[error("out of memory during verification")]
    OutOfMemory,
}

fn operand_suffix(operand: &Option<&'static str>) -> String {
    match operand {
        Some(name) => format!(" ({name})"),
        None => String::new(),
    }
}

impl VerifyError {
    /// Bytecode offset of the failure, if it has one.
    pub fn offset(&self) -> Option<u32> {
        match self {
            VerifyError::Truncated { at }
            | VerifyError::InvalidOpcode { at }
            | VerifyError::BranchOutOfRange { at, .. }
            | VerifyError::StackError { at, .. }
            | VerifyError::TypeError { at, .. }
            | VerifyError::UnresolvedLabel { at }
            | VerifyError::FallOffEnd { at } => Some(*at),
            VerifyError::OutOfMemory => None,
        }
    }

    /// Host resource failures, as opposed to a rejected program.
    pub fn is_fatal(&self) -> bool {
        matches!(self, VerifyError::OutOfMemory)
    }

    pub(crate) fn type_error(at: u32, operand: &'static str) -> Self {
        VerifyError::TypeError {
            at,
            operand: Some(operand),
        }
    }

    pub(crate) fn stack(at: u32, fault: StackFault) -> Self {
        VerifyError::StackError { at, fault }
    }
}

impl From<DecodeError> for VerifyError {
    fn from(e: DecodeError) -> Self {
        match e {
            DecodeError::Truncated { at } => VerifyError::Truncated { at },
            DecodeError::InvalidOpcode { at } => VerifyError::InvalidOpcode { at },
        }
    }
}

impl From<std::collections::TryReserveError> for VerifyError {
    fn from(_: std::collections::TryReserveError) -> Self {
        VerifyError::OutOfMemory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            VerifyError::BranchOutOfRange { at: 3, target: -2 }.to_string(),
            "branch out of range at offset 3: target -2"
        );
        assert_eq!(
            VerifyError::stack(5, StackFault::Underflow).to_string(),
            "stack error at offset 5: underflow"
        );
        assert_eq!(
            VerifyError::type_error(8, "value").to_string(),
            "type error at offset 8 (value)"
        );
        assert_eq!(
            VerifyError::TypeError { at: 8, operand: None }.to_string(),
            "type error at offset 8"
        );
    }

    #[test]
    fn offsets() {
        assert_eq!(VerifyError::FallOffEnd { at: 12 }.offset(), Some(12));
        assert_eq!(VerifyError::OutOfMemory.offset(), None);
    }

    #[test]
    fn only_out_of_memory_is_fatal() {
        assert!(VerifyError::OutOfMemory.is_fatal());
        assert!(!VerifyError::UnresolvedLabel { at: 0 }.is_fatal());
        assert!(!VerifyError::stack(0, StackFault::Overflow).is_fatal());
    }

    #[test]
    fn decode_errors_convert() {
        assert_eq!(
            VerifyError::from(DecodeError::Truncated { at: 4 }),
            VerifyError::Truncated { at: 4 }
        );
        assert_eq!(
            VerifyError::from(DecodeError::InvalidOpcode { at: 1 }),
            VerifyError::InvalidOpcode { at: 1 }
        );
    }
}
