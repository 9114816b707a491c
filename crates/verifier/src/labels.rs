//! The Label Store: required stack snapshots at branch targets.
//!
//! Labels are created lazily, at most one per offset, and live in a
//! session-local vector addressed by [`LabelId`]. The whole store is
//! dropped on restart.

use std::collections::HashMap;

use log::trace;

use crate::error::{StackFault, VerifyError};
use crate::types;
use ilvm_common::{EngineType, StackItem, TypeSystem};

/// Handle to a label inside one [`LabelStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LabelId(u32);

#[derive(Debug, Clone)]
struct Label {
    offset: u32,
    snapshot: Vec<StackItem>,
    /// The instruction at `offset` has been verified against the snapshot.
    visited: bool,
    /// Recorded by an exception region rather than a branch.
    seeded: bool,
}

/// Offset-keyed stack snapshots for one session.
#[derive(Debug, Clone)]
pub struct LabelStore {
    labels: Vec<Label>,
    by_offset: HashMap<u32, LabelId>,
    max_labels: usize,
}

impl LabelStore {
    pub fn new(max_labels: usize) -> Self {
        Self {
            labels: Vec::new(),
            by_offset: HashMap::new(),
            max_labels,
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn id(&self, offset: u32) -> Option<LabelId> {
        self.by_offset.get(&offset).copied()
    }

    /// The snapshot recorded at `offset`.
    pub fn snapshot(&self, offset: u32) -> Option<&[StackItem]> {
        self.id(offset)
            .map(|id| self.labels[id.0 as usize].snapshot.as_slice())
    }

    pub fn is_visited(&self, offset: u32) -> bool {
        self.id(offset)
            .map_or(false, |id| self.labels[id.0 as usize].visited)
    }

    fn create(
        &mut self,
        offset: u32,
        snapshot: &[StackItem],
        seeded: bool,
    ) -> Result<LabelId, VerifyError> {
        if self.labels.len() >= self.max_labels {
            return Err(VerifyError::OutOfMemory);
        }
        self.labels.try_reserve(1)?;
        self.by_offset.try_reserve(1)?;
        let mut copy = Vec::new();
        copy.try_reserve_exact(snapshot.len())?;
        copy.extend_from_slice(snapshot);

        let id = LabelId(self.labels.len() as u32);
        self.labels.push(Label {
            offset,
            snapshot: copy,
            visited: false,
            seeded,
        });
        self.by_offset.insert(offset, id);
        Ok(id)
    }

    /// Compare `incoming` with the label at `offset`, recording it if none exists.
    ///
    /// Engine types must match slot for slot. Object slots accept a
    /// subtype of the recorded type; a recorded `null` or subtype widens
    /// to the incoming type while the label has not been visited. Seeded
    /// labels never widen. Other
    /// pointer and value slots need exact identity.
    pub fn observe_or_record<S: TypeSystem + ?Sized>(
        &mut self,
        types: &S,
        offset: u32,
        incoming: &[StackItem],
    ) -> Result<LabelId, VerifyError> {
        let Some(id) = self.id(offset) else {
            trace!("label {offset}: record {} items", incoming.len());
            return self.create(offset, incoming, false);
        };

        let label = &mut self.labels[id.0 as usize];
        if label.snapshot.len() != incoming.len() {
            return Err(VerifyError::stack(offset, StackFault::HeightMismatch));
        }
        let visited = label.visited || label.seeded;
        for (recorded, item) in label.snapshot.iter_mut().zip(incoming) {
            unify_slot(types, offset, recorded, item, visited)?;
        }
        trace!("label {offset}: observe {} items", incoming.len());
        Ok(id)
    }

    /// The snapshot to continue from at a jump target reached only by
    /// branches. A never-seen loop head is assumed to start empty.
    pub fn reload(&mut self, offset: u32) -> Result<LabelId, VerifyError> {
        match self.id(offset) {
            Some(id) => {
                trace!("label {offset}: reload");
                Ok(id)
            }
            None => {
                trace!("label {offset}: reload of unseen label, assuming empty stack");
                self.create(offset, &[], false)
            }
        }
    }

    /// Force a snapshot from an exception region. The first seed wins;
    /// a different later seed is a conflict.
    pub fn seed(&mut self, offset: u32, snapshot: &[StackItem]) -> Result<LabelId, VerifyError> {
        match self.id(offset) {
            None => self.create(offset, snapshot, true),
            Some(id) => {
                let label = &self.labels[id.0 as usize];
                if label.snapshot.as_slice() == snapshot {
                    Ok(id)
                } else {
                    Err(VerifyError::stack(offset, StackFault::ConflictingSeed))
                }
            }
        }
    }

    pub fn is_seeded(&self, offset: u32) -> bool {
        self.id(offset)
            .map_or(false, |id| self.labels[id.0 as usize].seeded)
    }

    /// Record that the instruction at the label has been verified.
    pub fn mark_visited(&mut self, id: LabelId) {
        if let Some(label) = self.labels.get_mut(id.0 as usize) {
            label.visited = true;
        }
    }

    /// Snapshot of a label by handle.
    pub fn get(&self, id: LabelId) -> &[StackItem] {
        self.labels
            .get(id.0 as usize)
            .map(|label| label.snapshot.as_slice())
            .unwrap_or(&[])
    }

    /// Lowest offset of a label that control never reached.
    pub fn first_unresolved(&self) -> Option<u32> {
        self.labels
            .iter()
            .filter(|label| !label.visited)
            .map(|label| label.offset)
            .min()
    }
}

fn unify_slot<S: TypeSystem + ?Sized>(
    types: &S,
    offset: u32,
    recorded: &mut StackItem,
    incoming: &StackItem,
    visited: bool,
) -> Result<(), VerifyError> {
    let mismatch = VerifyError::stack(offset, StackFault::SlotMismatch);
    if recorded.engine != incoming.engine {
        return Err(mismatch);
    }
    match recorded.engine {
        EngineType::O => {
            let (Some(have), Some(new)) = (&recorded.ty, &incoming.ty) else {
                return Err(mismatch);
            };
            if incoming.is_null() || types::object_assignable(types, new, have) {
                return Ok(());
            }
            if visited {
                return Err(mismatch);
            }
            let widened = types::common_ancestor(types, have, new);
            trace!("label {offset}: widen {have:?} and {new:?} to {widened:?}");
            *recorded = StackItem::object(widened);
            Ok(())
        }
        EngineType::M | EngineType::T | EngineType::MV => {
            if recorded.ty == incoming.ty {
                Ok(())
            } else {
                Err(mismatch)
            }
        }
        _ => Ok(()),
    }
}
