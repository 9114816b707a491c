//! The simulated evaluation stack.
//!
//! Tracks the live stack item by item, rejecting underflow and any push
//! beyond the method's declared max-stack.

use crate::error::{StackFault, VerifyError};
use ilvm_common::StackItem;

/// The live abstract stack for one session.
#[derive(Debug, Clone, Default)]
pub struct EvalStack {
    items: Vec<StackItem>,
    max: u32,
    high_water: u32,
}

impl EvalStack {
    /// An empty stack bounded by `max` items.
    pub fn new(max: u32) -> Result<Self, VerifyError> {
        let mut items = Vec::new();
        items.try_reserve(max as usize)?;
        Ok(Self {
            items,
            max,
            high_water: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Bottom-to-top view of the live items.
    pub fn items(&self) -> &[StackItem] {
        &self.items
    }

    /// The highest height reached so far.
    pub fn high_water(&self) -> u32 {
        self.high_water
    }

    pub fn push(&mut self, at: u32, item: StackItem) -> Result<(), VerifyError> {
        if self.items.len() as u32 >= self.max {
            return Err(VerifyError::stack(at, StackFault::Overflow));
        }
        self.items.push(item);
        self.high_water = self.high_water.max(self.items.len() as u32);
        Ok(())
    }

    pub fn pop(&mut self, at: u32) -> Result<StackItem, VerifyError> {
        self.items
            .pop()
            .ok_or(VerifyError::stack(at, StackFault::Underflow))
    }

    /// Pop `n` items, returned bottom-to-top.
    pub fn pop_n(&mut self, at: u32, n: usize) -> Result<Vec<StackItem>, VerifyError> {
        if n > self.items.len() {
            return Err(VerifyError::stack(at, StackFault::Underflow));
        }
        let split = self.items.len() - n;
        Ok(self.items.split_off(split))
    }

    /// The item `depth` slots below the top.
    pub fn peek(&self, at: u32, depth: usize) -> Result<&StackItem, VerifyError> {
        self.items
            .len()
            .checked_sub(depth + 1)
            .and_then(|i| self.items.get(i))
            .ok_or(VerifyError::stack(at, StackFault::Underflow))
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Replace the live stack with `snapshot`.
    pub fn load(&mut self, at: u32, snapshot: &[StackItem]) -> Result<(), VerifyError> {
        if snapshot.len() as u32 > self.max {
            return Err(VerifyError::stack(at, StackFault::Overflow));
        }
        self.items.clear();
        self.items.extend_from_slice(snapshot);
        self.high_water = self.high_water.max(self.items.len() as u32);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_balance() {
        let mut stack = EvalStack::new(2).unwrap();
        stack.push(0, StackItem::i4()).unwrap();
        stack.push(1, StackItem::i8()).unwrap();
        assert_eq!(stack.high_water(), 2);
        assert_eq!(stack.pop(2).unwrap(), StackItem::i8());
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn overflow_past_max() {
        let mut stack = EvalStack::new(1).unwrap();
        stack.push(0, StackItem::i4()).unwrap();
        assert_eq!(
            stack.push(5, StackItem::i4()),
            Err(VerifyError::StackError {
                at: 5,
                fault: StackFault::Overflow
            })
        );
    }

    #[test]
    fn underflow_on_empty() {
        let mut stack = EvalStack::new(4).unwrap();
        assert_eq!(
            stack.pop(3),
            Err(VerifyError::StackError {
                at: 3,
                fault: StackFault::Underflow
            })
        );
        stack.push(0, StackItem::float()).unwrap();
        assert!(stack.pop_n(1, 2).is_err());
        assert!(stack.peek(1, 1).is_err());
        assert_eq!(stack.peek(1, 0).unwrap(), &StackItem::float());
    }

    #[test]
    fn pop_n_keeps_order() {
        let mut stack = EvalStack::new(3).unwrap();
        stack.push(0, StackItem::i4()).unwrap();
        stack.push(0, StackItem::i8()).unwrap();
        stack.push(0, StackItem::float()).unwrap();
        let args = stack.pop_n(0, 2).unwrap();
        assert_eq!(args, vec![StackItem::i8(), StackItem::float()]);
        assert_eq!(stack.items(), &[StackItem::i4()]);
    }

    #[test]
    fn load_respects_max() {
        let mut stack = EvalStack::new(0).unwrap();
        assert!(stack.load(0, &[StackItem::null()]).is_err());
        assert!(stack.load(0, &[]).is_ok());
    }
}
