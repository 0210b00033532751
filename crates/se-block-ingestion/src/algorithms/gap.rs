//! # Gap Calculator
//!
//! Computes the heights missing from the store between the scan start and
//! the captured tip.
//!
//! The scan starts at [`FIRST_HEIGHT`] for a fresh store and at the lowest
//! persisted height otherwise; heights below the lowest persisted height are
//! never revisited.

use std::ops::RangeInclusive;

use crate::domain::{Height, PersistedHeights, FIRST_HEIGHT};

/// First height the calculator scans for `persisted`.
pub fn scan_start(persisted: &PersistedHeights) -> Height {
    persisted
        .lowest()
        .map_or(FIRST_HEIGHT, |lowest| lowest.max(FIRST_HEIGHT))
}

/// Lazy, strictly increasing sequence of missing heights in `[start, tip]`.
///
/// Owns (or borrows) the snapshot so large backfills can be streamed into
/// the request channel without materialising every height.
#[derive(Clone, Debug)]
pub struct MissingHeights<P: AsRef<PersistedHeights>> {
    persisted: P,
    next: Option<Height>,
    tip: Height,
}

impl<P: AsRef<PersistedHeights>> MissingHeights<P> {
    /// Sequence of heights absent from `persisted` up to and including `tip`.
    pub fn new(persisted: P, tip: Height) -> Self {
        let start = scan_start(persisted.as_ref());
        Self {
            persisted,
            next: Some(start),
            tip,
        }
    }
}

impl<P: AsRef<PersistedHeights>> Iterator for MissingHeights<P> {
    type Item = Height;

    fn next(&mut self) -> Option<Height> {
        while let Some(height) = self.next {
            if height > self.tip {
                self.next = None;
                return None;
            }
            self.next = height.checked_add(1);
            if !self.persisted.as_ref().contains(height) {
                return Some(height);
            }
        }
        None
    }
}

/// Collect every missing height in ascending order.
pub fn compute_gaps(persisted: &PersistedHeights, tip: Height) -> Vec<Height> {
    MissingHeights::new(persisted, tip).collect()
}

/// Compress an ascending gap sequence into inclusive ranges, for logging.
pub fn gap_ranges(heights: &[Height]) -> Vec<RangeInclusive<Height>> {
    let mut ranges: Vec<RangeInclusive<Height>> = Vec::new();
    for &height in heights {
        match ranges.last_mut() {
            Some(last) if last.end().checked_add(1) == Some(height) => {
                *last = *last.start()..=height;
            }
            _ => ranges.push(height..=height),
        }
    }
    ranges
}

/// What a run has to do, derived once from the startup snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GapPlan {
    /// First height scanned.
    pub start: Height,
    /// Tip captured at connection time.
    pub tip: Height,
    /// Number of heights that will be requested.
    pub missing: u64,
    /// Height whose settlement completes the run; `None` when nothing is missing.
    pub completion_target: Option<Height>,
}

impl GapPlan {
    /// Plan a run for `persisted` against `tip`.
    pub fn new(persisted: &PersistedHeights, tip: Height) -> Self {
        let start = scan_start(persisted);
        if tip < start {
            return Self {
                start,
                tip,
                missing: 0,
                completion_target: None,
            };
        }

        let span = tip - start + 1;
        let missing = span - persisted.count_in(start..=tip);
        let completion_target = if missing == 0 {
            None
        } else {
            highest_missing(persisted, start, tip)
        };

        Self {
            start,
            tip,
            missing,
            completion_target,
        }
    }

    /// True when the store is already caught up with the tip.
    pub fn is_empty(&self) -> bool {
        self.missing == 0
    }
}

/// Tip when it is missing, otherwise the highest missing height below it.
fn highest_missing(persisted: &PersistedHeights, start: Height, tip: Height) -> Option<Height> {
    (start..=tip).rev().find(|h| !persisted.contains(*h))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{invariant_strictly_increasing, invariant_within_tip};
    use proptest::prelude::*;

    fn set(heights: &[Height]) -> PersistedHeights {
        heights.iter().copied().collect()
    }

    #[test]
    fn test_fresh_store_backfills_from_first_height() {
        assert_eq!(compute_gaps(&PersistedHeights::empty(), 5), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_heights_below_lowest_are_not_revisited() {
        assert_eq!(compute_gaps(&set(&[2, 3]), 5), vec![4, 5]);
    }

    #[test]
    fn test_interior_gaps_are_filled() {
        assert_eq!(compute_gaps(&set(&[1, 3]), 4), vec![2, 4]);
    }

    #[test]
    fn test_caught_up_store_yields_nothing() {
        assert!(compute_gaps(&set(&[1, 2, 3]), 3).is_empty());
        assert!(compute_gaps(&set(&[1, 2, 3, 4]), 3).is_empty());
    }

    #[test]
    fn test_zero_tip_yields_nothing() {
        assert!(compute_gaps(&PersistedHeights::empty(), 0).is_empty());
    }

    #[test]
    fn test_tip_below_persisted_yields_nothing() {
        assert!(compute_gaps(&set(&[10, 11]), 5).is_empty());
    }

    #[test]
    fn test_persisted_genesis_zero_never_requested() {
        assert_eq!(compute_gaps(&set(&[0]), 2), vec![1, 2]);
    }

    #[test]
    fn test_iterator_stops_at_max_height() {
        let tip = Height::MAX;
        let persisted = set(&[tip - 1]);
        let gaps: Vec<_> = MissingHeights::new(&persisted, tip).collect();
        assert_eq!(gaps, vec![tip]);
    }

    #[test]
    fn test_gap_ranges() {
        assert_eq!(gap_ranges(&[2, 4, 5, 6, 9]), vec![2..=2, 4..=6, 9..=9]);
        assert!(gap_ranges(&[]).is_empty());
    }

    #[test]
    fn test_plan_targets_tip_when_missing() {
        let plan = GapPlan::new(&set(&[1, 3]), 4);
        assert_eq!(plan.missing, 2);
        assert_eq!(plan.completion_target, Some(4));
    }

    #[test]
    fn test_plan_targets_highest_gap_when_tip_stored() {
        let plan = GapPlan::new(&set(&[1, 4]), 4);
        assert_eq!(plan.missing, 2);
        assert_eq!(plan.completion_target, Some(3));
    }

    #[test]
    fn test_plan_empty_when_caught_up() {
        let plan = GapPlan::new(&set(&[1, 2, 3]), 3);
        assert!(plan.is_empty());
        assert_eq!(plan.completion_target, None);
    }

    #[test]
    fn test_plan_empty_for_zero_tip() {
        assert!(GapPlan::new(&PersistedHeights::empty(), 0).is_empty());
    }

    proptest! {
        #[test]
        fn prop_gaps_are_sorted_bounded_and_absent(
            stored in proptest::collection::btree_set(1u64..200, 0..60),
            tip in 0u64..220,
        ) {
            let persisted: PersistedHeights = stored.iter().copied().collect();
            let gaps = compute_gaps(&persisted, tip);

            prop_assert!(invariant_strictly_increasing(&gaps));
            prop_assert!(invariant_within_tip(&gaps, tip));
            prop_assert!(gaps.iter().all(|h| !persisted.contains(*h)));
            if let Some(&first) = gaps.first() {
                prop_assert!(first >= scan_start(&persisted));
            }
        }

        #[test]
        fn prop_gaps_plus_persisted_cover_scan_window(
            stored in proptest::collection::btree_set(1u64..100, 0..40),
            tip in 0u64..120,
        ) {
            let persisted: PersistedHeights = stored.iter().copied().collect();
            let gaps = compute_gaps(&persisted, tip);
            let start = scan_start(&persisted);
            for h in start..=tip {
                prop_assert!(persisted.contains(h) ^ gaps.contains(&h));
            }
        }

        #[test]
        fn prop_plan_agrees_with_sequence(
            stored in proptest::collection::btree_set(1u64..100, 0..40),
            tip in 0u64..120,
        ) {
            let persisted: PersistedHeights = stored.iter().copied().collect();
            let gaps = compute_gaps(&persisted, tip);
            let plan = GapPlan::new(&persisted, tip);
            prop_assert_eq!(plan.missing, gaps.len() as u64);
            prop_assert_eq!(plan.completion_target, gaps.last().copied());
        }
    }
}
