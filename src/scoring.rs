//! Per-cluster stability scores.
//!
//! For a cluster with N members the score is one minus the mean pairwise
//! consensus distance inside it:
//!
//! ```text
//! score = 1 − 2·Σ_{i<j} M[i][j] / (N·(N−1))
//! ```
//!
//! A single-member cluster scores 1. The sentinel label is scored like any
//! other group, and is present with score 1 when nobody was pruned.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::consensus::ConsensusMatrix;
use crate::error::ConsensusError;
use crate::labels::{Label, UNSTABLE};

/// Ordered map from label to score. Always contains [`UNSTABLE`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterScores(BTreeMap<Label, f64>);

impl ClusterScores {
    pub fn get(&self, label: Label) -> Option<f64> {
        self.0.get(&label).copied()
    }

    /// Scores in ascending label order, sentinel first.
    pub fn iter(&self) -> impl Iterator<Item = (Label, f64)> + '_ {
        self.0.iter().map(|(&l, &s)| (l, s))
    }

    /// Number of entries, sentinel included.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Lowest score among non-sentinel clusters, or `None` if there are
    /// none.
    pub fn worst(&self) -> Option<f64> {
        self.0
            .iter()
            .filter(|(&l, _)| l != UNSTABLE)
            .map(|(_, &s)| s)
            .min_by(f64::total_cmp)
    }

    pub fn into_inner(self) -> BTreeMap<Label, f64> {
        self.0
    }
}

/// Scores every label of `labels` against `matrix`.
///
/// With [`UncoveredPolicy::Exclude`](crate::consensus::UncoveredPolicy)
/// the mean runs over known pairs only; a group whose pairs are all
/// unknown scores 1.
pub fn score_clusters(matrix: &ConsensusMatrix, labels: &[Label]) -> Result<ClusterScores, ConsensusError> {
    if labels.len() != matrix.n() {
        return Err(ConsensusError::DimensionMismatch {
            expected: matrix.n(),
            actual: labels.len(),
        });
    }

    let mut groups: BTreeMap<Label, Vec<usize>> = BTreeMap::new();
    for (i, &l) in labels.iter().enumerate() {
        groups.entry(l).or_default().push(i);
    }

    let mut scores = BTreeMap::new();
    for (&label, members) in &groups {
        let mut sum = 0.0;
        let mut pairs = 0usize;
        for (a, &i) in members.iter().enumerate() {
            for &j in &members[a + 1..] {
                if let Some(v) = matrix.get(i, j) {
                    sum += v;
                    pairs += 1;
                }
            }
        }
        let score = if pairs == 0 { 1.0 } else { 1.0 - sum / pairs as f64 };
        scores.insert(label, score);
    }
    scores.entry(UNSTABLE).or_insert(1.0);

    Ok(ClusterScores(scores))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix() -> ConsensusMatrix {
        ConsensusMatrix::from_dense(&[
            vec![0.0, 0.2, 0.4, 1.0],
            vec![0.2, 0.0, 0.6, 1.0],
            vec![0.4, 0.6, 0.0, 1.0],
            vec![1.0, 1.0, 1.0, 0.0],
        ])
        .unwrap()
    }

    #[test]
    fn mean_pair_distance() {
        let scores = score_clusters(&matrix(), &[0, 0, 0, 1]).unwrap();
        // 1 − 2·1.2/(3·2)
        assert!((scores.get(0).unwrap() - 0.6).abs() < 1e-12);
        assert_eq!(scores.get(1), Some(1.0));
        assert_eq!(scores.get(UNSTABLE), Some(1.0));
        assert_eq!(scores.len(), 3);
    }

    #[test]
    fn sentinel_is_scored_when_present() {
        let scores = score_clusters(&matrix(), &[0, 0, UNSTABLE, UNSTABLE]).unwrap();
        assert!((scores.get(0).unwrap() - 0.8).abs() < 1e-12);
        assert_eq!(scores.get(UNSTABLE), Some(0.0));
        assert!((scores.worst().unwrap() - 0.8).abs() < 1e-12);
    }

    #[test]
    fn worst_skips_sentinel() {
        let scores = score_clusters(&matrix(), &[UNSTABLE; 4]).unwrap();
        assert_eq!(scores.worst(), None);
        let scores = score_clusters(&matrix(), &[0, 1, 0, 1]).unwrap();
        assert_eq!(scores.worst(), Some(0.0));
    }

    #[test]
    fn length_mismatch() {
        assert!(matches!(
            score_clusters(&matrix(), &[0, 0]),
            Err(ConsensusError::DimensionMismatch { expected: 4, actual: 2 })
        ));
    }

    #[test]
    fn serializes_as_map() {
        let scores = score_clusters(&matrix(), &[0, 0, 0, 1]).unwrap();
        let json = serde_json::to_string(&scores).unwrap();
        assert!(json.starts_with(r#"{"-1":1.0,"0":"#));
        let back: ClusterScores = serde_json::from_str(&json).unwrap();
        for ((la, sa), (lb, sb)) in back.iter().zip(scores.iter()) {
            assert_eq!(la, lb);
            assert!((sa - sb).abs() < 1e-12);
        }
    }
}
