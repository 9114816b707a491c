//! Hard limits and per-call configuration.
//!
//! Limits are checked before scanning so hostile descriptors cannot make
//! the session allocate a jump mask or stack proportional to garbage.

use crate::error::{StackFault, VerifyError};
use ilvm_common::MethodBody;

/// Maximum code length in bytes.
pub const MAX_CODE_LENGTH: usize = 16 * 1024 * 1024 - 1;

/// Maximum declared max-stack.
pub const MAX_STACK_DEPTH: u32 = 65_535;

/// Default ceiling on backend-driven restarts.
pub const DEFAULT_MAX_RESTARTS: u32 = 8;

/// Default ceiling on labels per session.
pub const DEFAULT_MAX_LABELS: usize = 65_536;

/// Options for one call to [`verify`](crate::verify).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyOptions {
    /// Accept unverifiable pointer code: transient-pointer arithmetic,
    /// `localloc`, block copies and indirect access through `T` slots.
    pub unsafe_pointers: bool,
    /// Restarts beyond this many are reported as `OutOfMemory`.
    pub max_restarts: u32,
    /// Labels beyond this many are reported as `OutOfMemory`.
    pub max_labels: usize,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            unsafe_pointers: false,
            max_restarts: DEFAULT_MAX_RESTARTS,
            max_labels: DEFAULT_MAX_LABELS,
        }
    }
}

impl VerifyOptions {
    /// Options with unverifiable pointer code allowed.
    pub fn unsafe_pointers() -> Self {
        Self {
            unsafe_pointers: true,
            ..Self::default()
        }
    }
}

/// Run the limits check.
pub fn check_limits(method: &MethodBody) -> Result<(), VerifyError> {
    if method.code.len() > MAX_CODE_LENGTH {
        return Err(VerifyError::Truncated { at: 0 });
    }
    if method.max_stack > MAX_STACK_DEPTH {
        return Err(VerifyError::stack(0, StackFault::Overflow));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ilvm_common::{Primitive, Signature};

    fn body(code: Vec<u8>, max_stack: u32) -> MethodBody {
        MethodBody::new(code, max_stack, Signature::new(vec![], Primitive::Void.into()))
    }

    #[test]
    fn small_method_passes() {
        assert_eq!(check_limits(&body(vec![0x2A], 8)), Ok(()));
    }

    #[test]
    fn absurd_max_stack() {
        assert_eq!(
            check_limits(&body(vec![0x2A], MAX_STACK_DEPTH + 1)),
            Err(VerifyError::StackError {
                at: 0,
                fault: StackFault::Overflow
            })
        );
    }

    #[test]
    fn oversized_code() {
        assert_eq!(
            check_limits(&body(vec![0; MAX_CODE_LENGTH + 1], 0)),
            Err(VerifyError::Truncated { at: 0 })
        );
    }

    #[test]
    fn default_options() {
        let options = VerifyOptions::default();
        assert!(!options.unsafe_pointers);
        assert_eq!(options.max_restarts, 8);
        assert_eq!(options.max_labels, 65_536);
        assert!(VerifyOptions::unsafe_pointers().unsafe_pointers);
    }
}
