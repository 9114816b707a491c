//! The decoded method-body descriptor handed to the verifier.
//!
//! Header parsing (tiny vs. fat headers, inline exception sections) is the
//! loader's job; this module only holds the already-decoded result.

use bitflags::bitflags;

use crate::metadata::{Signature, Token};
use crate::types::Type;

bitflags! {
    /// Raw ECMA-335 exception clause flags.
    pub struct ClauseFlags: u32 {
        const EXCEPTION = 0x0000;
        const FILTER = 0x0001;
        const FINALLY = 0x0002;
        const FAULT = 0x0004;
    }
}

/// What kind of handler an exception region has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionKind {
    /// Typed catch; the token names the caught class.
    Catch { class_token: Token },
    /// Filter block starting at `filter_offset`, ending where the handler begins.
    Filter { filter_offset: u32 },
    Finally,
    Fault,
}

/// One try/handler pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExceptionRegion {
    pub kind: RegionKind,
    pub try_offset: u32,
    pub try_length: u32,
    pub handler_offset: u32,
    pub handler_length: u32,
}

impl ExceptionRegion {
    /// Build a region from a raw clause as laid out in the exception section.
    ///
    /// `class_or_filter` is the class token for typed catches and the
    /// filter offset for filter clauses. Returns `None` for unknown flags.
    pub fn from_clause(
        flags: u32,
        try_offset: u32,
        try_length: u32,
        handler_offset: u32,
        handler_length: u32,
        class_or_filter: u32,
    ) -> Option<Self> {
        let flags = ClauseFlags::from_bits(flags)?;
        let kind = if flags.is_empty() {
            RegionKind::Catch {
                class_token: class_or_filter,
            }
        } else if flags == ClauseFlags::FILTER {
            RegionKind::Filter {
                filter_offset: class_or_filter,
            }
        } else if flags == ClauseFlags::FINALLY {
            RegionKind::Finally
        } else if flags == ClauseFlags::FAULT {
            RegionKind::Fault
        } else {
            return None;
        };
        Some(Self {
            kind,
            try_offset,
            try_length,
            handler_offset,
            handler_length,
        })
    }

    /// `offset` lies inside the try block. Wrapping ends are treated as empty.
    pub fn in_try(&self, offset: u32) -> bool {
        contains(self.try_offset, self.try_length, offset)
    }

    /// `offset` lies inside the handler block.
    pub fn in_handler(&self, offset: u32) -> bool {
        contains(self.handler_offset, self.handler_length, offset)
    }

    /// `offset` lies inside the filter block of a filter clause.
    pub fn in_filter(&self, offset: u32) -> bool {
        match self.kind {
            RegionKind::Filter { filter_offset } => {
                offset >= filter_offset && offset < self.handler_offset
            }
            _ => false,
        }
    }
}

fn contains(start: u32, length: u32, offset: u32) -> bool {
    match start.checked_add(length) {
        Some(end) => offset >= start && offset < end,
        None => false,
    }
}

/// Everything the verifier needs to know about one method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodBody {
    /// Raw instruction bytes.
    pub code: Vec<u8>,
    /// Declared maximum evaluation-stack height.
    pub max_stack: u32,
    /// Local variable types, in slot order.
    pub locals: Vec<Type>,
    /// Locals are zero-initialised on entry.
    pub init_locals: bool,
    /// Exception regions, innermost first.
    pub regions: Vec<ExceptionRegion>,
    /// The method's own signature.
    pub signature: Signature,
    /// Type of argument 0 for instance methods.
    pub this_type: Option<Type>,
}

impl MethodBody {
    /// A static method with no locals and no exception regions.
    pub fn new(code: Vec<u8>, max_stack: u32, signature: Signature) -> Self {
        Self {
            code,
            max_stack,
            locals: Vec::new(),
            init_locals: true,
            regions: Vec::new(),
            signature,
            this_type: None,
        }
    }

    /// Length of the code in bytes.
    pub fn code_len(&self) -> u32 {
        self.code.len() as u32
    }

    /// Number of arguments including `this`.
    pub fn arg_count(&self) -> usize {
        self.signature.params.len() + usize::from(self.signature.has_this)
    }

    /// Declared type of argument `index`, counting `this` as argument 0.
    pub fn arg_type(&self, index: usize) -> Option<&Type> {
        if self.signature.has_this {
            if index == 0 {
                return self.this_type.as_ref();
            }
            self.signature.params.get(index - 1)
        } else {
            self.signature.params.get(index)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClassId, Primitive};

    #[test]
    fn clause_kinds_from_flags() {
        let catch = ExceptionRegion::from_clause(0, 0, 4, 4, 2, 0x0100_0002).unwrap();
        assert_eq!(
            catch.kind,
            RegionKind::Catch {
                class_token: 0x0100_0002
            }
        );
        let filter = ExceptionRegion::from_clause(1, 0, 4, 8, 2, 4).unwrap();
        assert_eq!(filter.kind, RegionKind::Filter { filter_offset: 4 });
        assert_eq!(
            ExceptionRegion::from_clause(2, 0, 4, 4, 2, 0).unwrap().kind,
            RegionKind::Finally
        );
        assert_eq!(
            ExceptionRegion::from_clause(4, 0, 4, 4, 2, 0).unwrap().kind,
            RegionKind::Fault
        );
        assert!(ExceptionRegion::from_clause(3, 0, 4, 4, 2, 0).is_none());
        assert!(ExceptionRegion::from_clause(0x10, 0, 4, 4, 2, 0).is_none());
    }

    #[test]
    fn region_membership() {
        let region = ExceptionRegion::from_clause(1, 0, 4, 8, 2, 4).unwrap();
        assert!(region.in_try(0));
        assert!(region.in_try(3));
        assert!(!region.in_try(4));
        assert!(region.in_filter(4));
        assert!(region.in_filter(7));
        assert!(!region.in_filter(8));
        assert!(region.in_handler(9));
        assert!(!region.in_handler(10));
    }

    #[test]
    fn overflowing_range_contains_nothing() {
        let region = ExceptionRegion {
            kind: RegionKind::Finally,
            try_offset: u32::MAX - 1,
            try_length: 10,
            handler_offset: 0,
            handler_length: 1,
        };
        assert!(!region.in_try(u32::MAX - 1));
    }

    #[test]
    fn argument_types_count_this() {
        let mut body = MethodBody::new(
            vec![0x2A],
            0,
            Signature::instance(vec![Primitive::I4.into()], Primitive::Void.into()),
        );
        body.this_type = Some(Type::Class(ClassId(7)));
        assert_eq!(body.arg_count(), 2);
        assert_eq!(body.arg_type(0), Some(&Type::Class(ClassId(7))));
        assert_eq!(body.arg_type(1), Some(&Type::Primitive(Primitive::I4)));
        assert_eq!(body.arg_type(2), None);
    }
}
