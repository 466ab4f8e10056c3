//! Key-only planning for the switch transformations.
//!
//! Nothing here looks at a CFG: the functions take the sorted case keys of one switch
//! and decide how to partition them.

use std::ops::Range;

/// `true` if the keys within `keys` fill at least half of their span.
fn dense(keys: &[i32]) -> bool {
    crate::ir::encoding::is_packed(keys)
}

/// Maximal packed runs of `keys` (sorted, distinct), as index ranges in key order.
///
/// Scanning left to right, each run starts at the first key not yet covered and
/// extends to the last key that keeps the run's density at 50% or more. Runs of a
/// single key are not reported.
#[must_use]
pub fn packed_runs(keys: &[i32]) -> Vec<Range<usize>> {
    let mut runs = Vec::new();
    let mut start = 0;
    while start < keys.len() {
        let end = (start + 1..keys.len())
            .rev()
            .find(|&end| dense(&keys[start..=end]));
        match end {
            Some(end) => {
                runs.push(start..end + 1);
                start = end + 1;
            }
            None => start += 1,
        }
    }
    runs
}

/// Number of segments a split of `n` keys may produce: `ceil(log2 n)`.
#[must_use]
pub fn max_segments(n: usize) -> usize {
    match n {
        0 | 1 => 0,
        n => (usize::BITS - (n - 1).leading_zeros()) as usize,
    }
}

/// The packed segments a split of `keys` hoists out, in key order.
///
/// At most [`max_segments`] of the longest [`packed_runs`] are kept; among runs of
/// equal length the earlier one wins.
#[must_use]
pub fn split_segments(keys: &[i32]) -> Vec<Range<usize>> {
    let mut runs = packed_runs(keys);
    runs.sort_by(|a, b| b.len().cmp(&a.len()).then(a.start.cmp(&b.start)));
    runs.truncate(max_segments(keys.len()));
    runs.sort_by_key(|r| r.start);
    runs
}

/// How a multiplexed switch hashes its selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiplexPlan {
    /// Number of buckets, a power of two.
    pub buckets: u32,
    /// Right shift applied to the selector before masking.
    pub shift: u32,
    /// Key indices per bucket, in key order.
    pub groups: Vec<Vec<usize>>,
}

impl MultiplexPlan {
    /// The bucket `key` falls into.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn bucket_of(&self, key: i32) -> i32 {
        (key >> self.shift) & (self.buckets as i32 - 1)
    }

    /// Keys in the fullest bucket.
    #[must_use]
    pub fn largest(&self) -> usize {
        self.groups.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// How far the fullest bucket exceeds a perfectly even spread.
    #[must_use]
    pub fn inefficiency(&self) -> usize {
        let n: usize = self.groups.iter().map(Vec::len).sum();
        self.largest() - n.div_ceil(self.buckets as usize)
    }

    /// `true` if the hash splits the keys well enough to be worth emitting: no bucket
    /// holds more than half of them.
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        let n: usize = self.groups.iter().map(Vec::len).sum();
        self.largest() * 2 <= n
    }
}

/// Bucket count for `n` keys: the power of two at or above `ceil(sqrt n)`, at least 2.
#[must_use]
pub fn bucket_count(n: usize) -> u32 {
    let mut root: u32 = 1;
    while (root as usize) * (root as usize) < n {
        root += 1;
    }
    root.next_power_of_two().max(2)
}

/// Picks the shift that spreads `keys` most evenly over [`bucket_count`] buckets.
///
/// Shifts are ranked by the size of the fullest bucket, then by the sum of squared
/// bucket sizes; the smallest shift wins a tie.
#[must_use]
pub fn plan_multiplexing(keys: &[i32]) -> MultiplexPlan {
    let buckets = bucket_count(keys.len());
    let mut best: Option<((usize, usize), MultiplexPlan)> = None;
    for shift in 0..32 {
        let mut plan = MultiplexPlan {
            buckets,
            shift,
            groups: vec![Vec::new(); buckets as usize],
        };
        for (i, &key) in keys.iter().enumerate() {
            #[allow(clippy::cast_sign_loss)]
            let bucket = plan.bucket_of(key) as usize;
            plan.groups[bucket].push(i);
        }
        let squares = plan.groups.iter().map(|g| g.len() * g.len()).sum();
        let score = (plan.largest(), squares);
        if best.as_ref().map_or(true, |(s, _)| score < *s) {
            best = Some((score, plan));
        }
    }
    best.map_or_else(
        || MultiplexPlan {
            buckets,
            shift: 0,
            groups: Vec::new(),
        },
        |(_, plan)| plan,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_are_maximal_and_dense() {
        assert_eq!(packed_runs(&[0, 50, 100, 101]), vec![2..4]);
        assert_eq!(packed_runs(&[1, 2, 3, 10, 20, 21, 23]), vec![0..3, 4..7]);
        assert_eq!(packed_runs(&[0, 3, 6, 9, 12]), vec![0..2, 2..4]);
        assert!(packed_runs(&[0, 100, 200]).is_empty());
    }

    #[test]
    fn segment_budget() {
        assert_eq!(max_segments(1), 0);
        assert_eq!(max_segments(2), 1);
        assert_eq!(max_segments(4), 2);
        assert_eq!(max_segments(5), 3);
        assert_eq!(max_segments(16), 4);

        let keys = [0, 1, 100, 101, 102, 103, 500, 501];
        assert_eq!(split_segments(&keys), vec![0..2, 2..6, 6..8]);
        // four equal runs, budget of three: the earliest win
        let keys = [0, 1, 10, 11, 20, 21, 30, 31];
        assert_eq!(split_segments(&keys), vec![0..2, 2..4, 4..6]);
    }

    #[test]
    fn multiplexing_choices() {
        let plan = plan_multiplexing(&[0, 3, 6, 9, 12]);
        assert_eq!((plan.buckets, plan.shift), (4, 0));
        assert_eq!(plan.groups, vec![vec![0, 4], vec![3], vec![2], vec![1]]);
        assert_eq!(plan.inefficiency(), 0);
        assert!(plan.is_balanced());

        let plan = plan_multiplexing(&[0, 6, 12, 18, 24]);
        assert_eq!((plan.buckets, plan.shift), (4, 1));
        assert_eq!(plan.bucket_of(18), 1);

        let clustered: Vec<i32> = (0..8).map(|k| k << 20).chain([1]).collect();
        let plan = plan_multiplexing(&clustered);
        assert_eq!((plan.buckets, plan.shift, plan.largest()), (4, 20, 3));

        assert!(!plan_multiplexing(&[0, 1, 2]).is_balanced());
    }
}
