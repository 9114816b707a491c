//! ILVM common types and instruction encoding.
//!
//! This crate provides the leaf data the verifier is built on:
//!
//! - [`Opcode`] and [`OpcodeInfo`]: the static opcode catalogue
//! - [`Instruction`]: variable-length instruction decoding
//! - [`EngineType`], [`Type`], [`StackItem`]: the verifier's type model
//! - [`MethodBody`] and [`ExceptionRegion`]: the decoded method descriptor
//! - [`TypeSystem`]: the read-only metadata boundary, with an in-memory
//!   [`TypeUniverse`] implementation
//! - [`CodeWriter`]: an instruction byte emitter
//! - [`DecodeError`] and [`EmitError`]

pub mod emit;
pub mod error;
pub mod instruction;
pub mod metadata;
pub mod method;
pub mod opcode;
pub mod types;
pub mod universe;

// Re-export commonly used types at the crate root.
pub use emit::{CodeWriter, Label};
pub use error::{DecodeError, EmitError};
pub use instruction::{instructions, Instruction, Operand};
pub use metadata::{
    FieldAttributes, FieldRef, MethodAttributes, MethodRef, Signature, Token, TokenKind,
    TypeSystem, WellKnown,
};
pub use method::{ClauseFlags, ExceptionRegion, MethodBody, RegionKind};
pub use opcode::{Inline, Opcode, OpcodeInfo, OperandClass, StackCount};
pub use types::{ClassId, EngineType, Primitive, StackItem, Type};
pub use universe::TypeUniverse;
