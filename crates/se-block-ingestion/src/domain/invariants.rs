//! # Domain Invariants
//!
//! Rules that must always hold for request sequences and configuration.

use super::value_objects::Height;

/// Lowest height a chain can have. Height 0 is never requested.
pub const FIRST_HEIGHT: Height = 1;

/// Separator used by stores when composing `(chain_id, height)` keys.
pub const CHAIN_ID_SEPARATOR: char = ':';

/// Maximum chain identifier length in bytes.
pub const MAX_CHAIN_ID_LEN: usize = 64;

/// Default capacity of the hand-off queues between stages.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;

/// Default number of write attempts per block before it is abandoned.
pub const DEFAULT_WRITE_ATTEMPTS: u32 = 5;

/// Invariant: a request sequence is strictly increasing (no duplicates).
pub fn invariant_strictly_increasing(heights: &[Height]) -> bool {
    heights.windows(2).all(|w| w[0] < w[1])
}

/// Invariant: every requested height lies in `[FIRST_HEIGHT, tip]`.
pub fn invariant_within_tip(heights: &[Height], tip: Height) -> bool {
    heights.iter().all(|h| (FIRST_HEIGHT..=tip).contains(h))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strictly_increasing() {
        assert!(invariant_strictly_increasing(&[]));
        assert!(invariant_strictly_increasing(&[1, 2, 5]));
        assert!(!invariant_strictly_increasing(&[1, 1, 2]));
        assert!(!invariant_strictly_increasing(&[3, 2]));
    }

    #[test]
    fn test_within_tip() {
        assert!(invariant_within_tip(&[1, 5], 5));
        assert!(!invariant_within_tip(&[6], 5));
        assert!(!invariant_within_tip(&[0], 5));
    }
}
