//! # Position tokens
//!
//! Ordered collections (children of a shape, fills, borders, pages) are
//! ordered by comparable keys instead of plain indices, so inserting between
//! two neighbours never renumbers untouched siblings.
//!
//! A [`PositionKey`] is a sequence of base-65536 digits compared
//! lexicographically. Generated keys never end in a zero digit, which keeps
//! room below every key.
//!
//! Two replicas may generate the same key for concurrent inserts between the
//! same neighbours. [`Slot`] breaks that tie with the order (server version)
//! of the op that placed the element, and callers finally fall back to the
//! element id.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

const BASE: u32 = 1 << 16;

/// Order used for elements placed by speculative (unacknowledged) ops.
pub const SPECULATIVE_ORDER: u64 = u64::MAX;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct PositionKey(Vec<u16>);

impl PositionKey {
    pub fn from_digits(digits: Vec<u16>) -> Self {
        Self(digits)
    }

    pub fn digits(&self) -> &[u16] {
        &self.0
    }

    /// Key for the first element of an empty collection.
    pub fn first() -> Self {
        Self::between(None, None)
    }

    /// Key strictly after `key`.
    pub fn after(key: &PositionKey) -> Self {
        Self::between(Some(key), None)
    }

    /// Key strictly before `key`.
    pub fn before(key: &PositionKey) -> Self {
        Self::between(None, Some(key))
    }

    /// Generate a key strictly between `lo` and `hi` (either may be open).
    pub fn between(lo: Option<&PositionKey>, hi: Option<&PositionKey>) -> Self {
        let lo_digits: &[u16] = lo.map(|k| k.0.as_slice()).unwrap_or(&[]);
        let hi_digits: Option<&[u16]> = hi.map(|k| k.0.as_slice());
        debug_assert!(
            match (lo, hi) {
                (Some(l), Some(h)) => l < h,
                _ => true,
            },
            "position bounds out of order"
        );

        let mut digits = Vec::new();
        let mut hi_tight = hi_digits.is_some();
        let mut i = 0;

        loop {
            let l = lo_digits.get(i).copied().unwrap_or(0) as u32;
            let h = match hi_digits {
                // a hi that ran out while tight means the bounds were not ordered
                Some(h) if hi_tight => h.get(i).map(|d| *d as u32).unwrap_or(BASE),
                _ => BASE,
            };

            if h > l + 1 {
                digits.push(((l + h) / 2) as u16);
                return Self(digits);
            }

            digits.push(l as u16);
            if h != l {
                hi_tight = false;
            }
            i += 1;
        }
    }
}

/// Placement of an element among its siblings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Slot {
    pub key: PositionKey,
    /// Version of the op that placed the element, [`SPECULATIVE_ORDER`] while
    /// that op is still local.
    #[serde(default)]
    pub order: u64,
}

impl Slot {
    pub fn new(key: PositionKey, order: u64) -> Self {
        Self { key, order }
    }

    pub fn speculative(key: PositionKey) -> Self {
        Self::new(key, SPECULATIVE_ORDER)
    }
}

impl PartialOrd for Slot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Slot {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| self.order.cmp(&other.order))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_between_open_bounds() {
        let first = PositionKey::first();
        let after = PositionKey::after(&first);
        let before = PositionKey::before(&first);
        assert!(before < first);
        assert!(first < after);
    }

    #[test]
    fn test_between_adjacent_digits() {
        let lo = PositionKey::from_digits(vec![5]);
        let hi = PositionKey::from_digits(vec![6]);
        let mid = PositionKey::between(Some(&lo), Some(&hi));
        assert!(lo < mid && mid < hi);
        assert_eq!(mid.digits().len(), 2);
    }

    #[test]
    fn test_between_prefix_bounds() {
        let lo = PositionKey::from_digits(vec![5]);
        let hi = PositionKey::from_digits(vec![5, 1]);
        let mid = PositionKey::between(Some(&lo), Some(&hi));
        assert!(lo < mid && mid < hi);
    }

    #[test]
    fn test_repeated_insertion_stays_ordered() {
        let lo = PositionKey::first();
        let mut hi = PositionKey::after(&lo);
        for _ in 0..64 {
            let mid = PositionKey::between(Some(&lo), Some(&hi));
            assert!(lo < mid && mid < hi);
            hi = mid;
        }
    }

    #[test]
    fn test_slot_tie_breaks_on_order() {
        let key = PositionKey::first();
        let a = Slot::new(key.clone(), 4);
        let b = Slot::new(key.clone(), 7);
        let local = Slot::speculative(key);
        assert!(a < b);
        assert!(b < local);
    }
}
