//! Exception region validation.
//!
//! Checks every region's byte ranges against the method length and the
//! instruction boundaries found by the scanner, marks region boundaries as
//! special jump targets, and seeds the label store with the stack each
//! entry point starts from.

use log::trace;

use crate::error::VerifyError;
use crate::labels::LabelStore;
use crate::scanner::{is_boundary, JumpMask};
use ilvm_common::{ExceptionRegion, MethodBody, RegionKind, StackItem, Type, TypeSystem, WellKnown};

/// Validate every region of `method` and seed its entry points.
pub fn validate_regions<S: TypeSystem + ?Sized>(
    method: &MethodBody,
    types: &S,
    mask: &mut JumpMask,
    labels: &mut LabelStore,
) -> Result<(), VerifyError> {
    for region in &method.regions {
        validate_region(region, types, mask, labels)?;
    }
    if !method.regions.is_empty() {
        trace!("validated {} exception regions", method.regions.len());
    }
    Ok(())
}

fn validate_region<S: TypeSystem + ?Sized>(
    region: &ExceptionRegion,
    types: &S,
    mask: &mut JumpMask,
    labels: &mut LabelStore,
) -> Result<(), VerifyError> {
    let try_end = check_range(mask, region.try_offset, region.try_length)?;
    let handler_end = check_range(mask, region.handler_offset, region.handler_length)?;

    mark(mask, region.try_offset);
    mark(mask, try_end);
    mark(mask, region.handler_offset);
    mark(mask, handler_end);
    labels.seed(region.try_offset, &[])?;

    match region.kind {
        RegionKind::Catch { class_token } => {
            let class = types
                .resolve_type(class_token)
                .filter(|ty| ty.is_reference() && types.is_accessible(ty))
                .ok_or(VerifyError::type_error(region.handler_offset, "catch type"))?;
            labels.seed(region.handler_offset, &[StackItem::object(class)])?;
        }
        RegionKind::Filter { filter_offset } => {
            if filter_offset >= region.handler_offset || !mask.is_instruction_start(filter_offset) {
                return Err(VerifyError::BranchOutOfRange {
                    at: region.handler_offset,
                    target: filter_offset as i64,
                });
            }
            let exception = Type::Class(types.well_known(WellKnown::Exception));
            if !types.is_accessible(&exception) {
                return Err(VerifyError::type_error(filter_offset, "exception type"));
            }
            mark(mask, filter_offset);
            let entry = [StackItem::object(exception)];
            labels.seed(filter_offset, &entry)?;
            labels.seed(region.handler_offset, &entry)?;
        }
        RegionKind::Finally | RegionKind::Fault => {
            labels.seed(region.handler_offset, &[])?;
        }
    }
    Ok(())
}

/// Check `[start, start + length)` and return its end.
fn check_range(mask: &JumpMask, start: u32, length: u32) -> Result<u32, VerifyError> {
    let out_of_range = |target: i64| VerifyError::BranchOutOfRange { at: start, target };
    if length == 0 {
        return Err(out_of_range(start as i64));
    }
    let end = start
        .checked_add(length)
        .ok_or(out_of_range(start as i64 + length as i64))?;
    if end > mask.len() {
        return Err(out_of_range(end as i64));
    }
    if !is_boundary(mask, start) {
        return Err(out_of_range(start as i64));
    }
    if !is_boundary(mask, end) {
        return Err(out_of_range(end as i64));
    }
    Ok(end)
}

fn mark(mask: &mut JumpMask, offset: u32) {
    if offset < mask.len() {
        mask.mark_special(offset);
    }
}
