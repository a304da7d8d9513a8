//! Chronological train/test splits
//!
//! Rows arrive ordered by date; a split never shuffles, so the test rows
//! are always the most recent ones.

use std::ops::Range;

/// Index ranges of the train and test rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPlan {
    pub train: Range<usize>,
    pub test: Range<usize>,
}

impl SplitPlan {
    pub fn n_train(&self) -> usize {
        self.train.len()
    }

    pub fn n_test(&self) -> usize {
        self.test.len()
    }

    /// Train and test rows overlap (evaluation on the training data).
    pub fn is_in_sample(&self) -> bool {
        self.test.start < self.train.end
    }
}

/// Population split: the trailing `test_fraction` of rows is held out.
///
/// Below `small_threshold` rows there is nothing meaningful to hold out and
/// both train and test cover every row. Otherwise at least one row lands
/// on each side.
pub fn global_split(n: usize, test_fraction: f64, small_threshold: usize) -> SplitPlan {
    if n < small_threshold || n < 2 {
        return SplitPlan {
            train: 0..n,
            test: 0..n,
        };
    }
    let cut = ((n as f64 * (1.0 - test_fraction)) as usize).clamp(1, n - 1);
    SplitPlan {
        train: 0..cut,
        test: cut..n,
    }
}

/// Per-user split: `test_fraction` held out for long histories,
/// `small_test_fraction` below `large_threshold` rows.
pub fn user_split(
    n: usize,
    test_fraction: f64,
    small_test_fraction: f64,
    large_threshold: usize,
) -> SplitPlan {
    let cut = if n >= large_threshold {
        (n as f64 * (1.0 - test_fraction)) as usize
    } else {
        ((n as f64 * (1.0 - small_test_fraction)) as usize).max(1)
    };
    let cut = cut.min(n);
    SplitPlan {
        train: 0..cut,
        test: cut..n,
    }
}
