//! Label vectors and the unstable sentinel.
//!
//! A label vector assigns every observation an `i32` group id. The value
//! [`UNSTABLE`] (−1) marks observations that failed the stability check;
//! every other value belongs to a dense range starting at 0 once
//! [`renumber`] has run.

use std::collections::{BTreeMap, BTreeSet};

/// Group id of an observation.
pub type Label = i32;

/// Sentinel for unstable / outlier / unassigned observations.
pub const UNSTABLE: Label = -1;

/// Renumbers non-sentinel labels to `0..m` in ascending order of their
/// current value. Sentinel entries are left untouched.
///
/// ```
/// use u_consensus::labels::{renumber, UNSTABLE};
///
/// let mut labels = vec![0, 2, UNSTABLE, 2, 5];
/// renumber(&mut labels);
/// assert_eq!(labels, vec![0, 1, UNSTABLE, 1, 2]);
/// ```
pub fn renumber(labels: &mut [Label]) {
    let distinct: BTreeSet<Label> = labels.iter().copied().filter(|&l| l != UNSTABLE).collect();
    let mapping: BTreeMap<Label, Label> = distinct
        .into_iter()
        .enumerate()
        .map(|(dense, old)| (old, dense as Label))
        .collect();
    for l in labels.iter_mut() {
        if let Some(&dense) = mapping.get(l) {
            *l = dense;
        }
    }
}

/// Number of observations per label, sentinel included if present.
pub fn cluster_sizes(labels: &[Label]) -> BTreeMap<Label, usize> {
    let mut sizes = BTreeMap::new();
    for &l in labels {
        *sizes.entry(l).or_insert(0) += 1;
    }
    sizes
}

/// Indices of the observations carrying `label`.
pub fn members(labels: &[Label], label: Label) -> Vec<usize> {
    labels
        .iter()
        .enumerate()
        .filter_map(|(i, &l)| (l == label).then_some(i))
        .collect()
}

/// Number of observations marked [`UNSTABLE`].
pub fn outlier_count(labels: &[Label]) -> usize {
    labels.iter().filter(|&&l| l == UNSTABLE).count()
}

/// Distinct non-sentinel labels in ascending order.
pub fn stable_labels(labels: &[Label]) -> Vec<Label> {
    labels
        .iter()
        .copied()
        .filter(|&l| l != UNSTABLE)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
