//! A small bitset indexed by bytecode offset.

use std::collections::TryReserveError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct BitSet {
    bits: Vec<u64>,
    len: usize,
}

impl BitSet {
    /// An all-clear set of `len` bits, failing if the words cannot be allocated.
    pub(crate) fn new_empty(len: usize) -> Result<Self, TryReserveError> {
        let words = len.div_ceil(64);
        let mut bits = Vec::new();
        bits.try_reserve_exact(words)?;
        bits.resize(words, 0);
        Ok(Self { bits, len })
    }

    pub(crate) fn get(&self, idx: usize) -> bool {
        if idx >= self.len {
            return false;
        }
        let w = idx / 64;
        let b = idx % 64;
        (self.bits[w] >> b) & 1 == 1
    }

    pub(crate) fn set(&mut self, idx: usize) {
        if idx >= self.len {
            return;
        }
        let w = idx / 64;
        let b = idx % 64;
        self.bits[w] |= 1_u64 << b;
    }

    /// Lowest index set here but not in `other`.
    pub(crate) fn first_not_in(&self, other: &Self) -> Option<usize> {
        for (w, (a, b)) in self.bits.iter().zip(other.bits.iter()).enumerate() {
            let extra = *a & !*b;
            if extra != 0 {
                return Some(w * 64 + extra.trailing_zeros() as usize);
            }
        }
        None
    }

    pub(crate) fn count(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }
}
