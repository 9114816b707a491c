//! ILVM verifier: type inference for stack-machine method bodies.
//!
//! A verification session checks one method and drives a [`Coder`] with
//! resolved operand types as it goes, so a backend can interpret or
//! compile the method in the same pass.
//!
//! # Usage
//!
//! ```
//! use ilvm_common::{CodeWriter, MethodBody, Opcode, Primitive, Signature, TypeUniverse};
//! use ilvm_verifier::{verify, TraceCoder, VerifyOptions};
//!
//! let mut w = CodeWriter::new();
//! w.ldc_i4(5).ldc_i4(3).op(Opcode::Add).op(Opcode::Ret);
//! let body = MethodBody::new(
//!     w.finish().unwrap(),
//!     2,
//!     Signature::new(vec![], Primitive::I4.into()),
//! );
//!
//! let mut coder = TraceCoder::new();
//! let verified = verify(&body, &TypeUniverse::new(), &mut coder, &VerifyOptions::default());
//! assert_eq!(verified.unwrap().max_stack, 2);
//! assert_eq!(coder.lines().last().map(String::as_str), Some("ret I4"));
//! ```
//!
//! # Phases
//!
//! 1. **Limits**: code length and declared max-stack, checked once
//! 2. **Scanner**: instruction boundaries and branch targets
//! 3. **Exception regions**: range checks and handler entry seeds
//! 4. **Engine**: stack simulation, one coder call per instruction
//! 5. **Resolution**: every recorded label was reached
//!
//! The coder may ask for the whole session to be rerun; see [`verify`].

mod bitset;
pub mod coder;
mod engine;
pub mod error;
pub mod exceptions;
pub mod labels;
pub mod limits;
pub mod scanner;
pub mod stack;
pub mod trace;
pub mod types;

pub use coder::{
    BinaryOp, BranchCondition, CallKind, Coder, CoderStatus, CompareOp, Conversion, Prefixes,
    ShiftOp, UnaryOp,
};
pub use error::{StackFault, VerifyError};
pub use labels::LabelStore;
pub use limits::VerifyOptions;
pub use scanner::{scan, JumpMask};
pub use trace::TraceCoder;

use log::debug;

use engine::Engine;
use ilvm_common::{MethodBody, TypeSystem};

/// Summary of a successful verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verified {
    /// Sessions rerun at the coder's request.
    pub restarts: u32,
    /// Labels in the final session.
    pub labels: usize,
    /// Highest stack height reached.
    pub max_stack: u32,
}

/// Verify `method`, driving `coder` with every instruction.
///
/// The first error ends verification and the coder is told to
/// [`abandon`](Coder::abandon) its work. When the coder's
/// [`finish`](Coder::finish) asks for a restart, all session state is
/// dropped and the method is verified again from the top; more than
/// `options.max_restarts` restarts is reported as
/// [`VerifyError::OutOfMemory`].
pub fn verify<S, C>(
    method: &MethodBody,
    types: &S,
    coder: &mut C,
    options: &VerifyOptions,
) -> Result<Verified, VerifyError>
where
    S: TypeSystem + ?Sized,
    C: Coder + ?Sized,
{
    debug!(
        "verify: {} bytes, max_stack={}, {} regions",
        method.code.len(),
        method.max_stack,
        method.regions.len()
    );

    // Nothing has been handed to the coder yet, so there is nothing to abandon.
    limits::check_limits(method)?;

    let mut restarts = 0;
    loop {
        let (max_stack, labels) = match session(method, types, coder, options) {
            Ok(done) => done,
            Err(err) => {
                debug!("verify: rejected: {err}");
                coder.abandon();
                return Err(err);
            }
        };

        match coder.finish() {
            CoderStatus::Done => {
                debug!("verify: ok after {restarts} restarts, {labels} labels");
                return Ok(Verified {
                    restarts,
                    labels,
                    max_stack,
                });
            }
            CoderStatus::Restart => {
                restarts += 1;
                if restarts > options.max_restarts {
                    debug!("verify: giving up after {restarts} restarts");
                    coder.abandon();
                    return Err(VerifyError::OutOfMemory);
                }
                debug!("verify: coder restart {restarts}");
            }
        }
    }
}

/// One pass over the method with fresh session state.
fn session<S, C>(
    method: &MethodBody,
    types: &S,
    coder: &mut C,
    options: &VerifyOptions,
) -> Result<(u32, usize), VerifyError>
where
    S: TypeSystem + ?Sized,
    C: Coder + ?Sized,
{
    coder.setup(method);

    let mut mask = scan(&method.code)?;
    let mut labels = LabelStore::new(options.max_labels);
    exceptions::validate_regions(method, types, &mut mask, &mut labels)?;

    let max_stack = Engine::new(method, types, coder, options, &mask, &mut labels)?.run()?;
    if let Some(at) = labels.first_unresolved() {
        return Err(VerifyError::UnresolvedLabel { at });
    }
    Ok((max_stack, labels.len()))
}
