//! Agglomeration of a consensus matrix with instability pruning.
//!
//! The consensus matrix is used directly as a precomputed distance matrix:
//! it is agglomerated with the configured linkage and cut into exactly `k`
//! provisional groups. A point whose mean consensus distance to the other
//! members of its provisional group exceeds the threshold is relabelled
//! [`UNSTABLE`]; the surviving groups are then renumbered densely in
//! ascending order of their provisional label.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::consensus::ConsensusMatrix;
use crate::error::ConsensusError;
use crate::hierarchy::{agglomerate, Linkage};
use crate::labels::{renumber, Label, UNSTABLE};

/// Parameters of [`cluster_from_consensus`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
    /// Number of provisional groups cut from the dendrogram.
    pub n_clusters: usize,
    /// Maximum tolerated mean in-group consensus distance, in [0, 1].
    /// Default: 0.3.
    pub threshold: f64,
    /// Default: Ward.
    pub linkage: Linkage,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            n_clusters: 2,
            threshold: 0.3,
            linkage: Linkage::Ward,
        }
    }
}

impl StabilityConfig {
    pub fn new(n_clusters: usize) -> Self {
        Self {
            n_clusters,
            ..Self::default()
        }
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn linkage(mut self, linkage: Linkage) -> Self {
        self.linkage = linkage;
        self
    }

    /// Checks the threshold range and that `n_clusters` is in `1..=n`.
    pub fn validate(&self, n: usize) -> Result<(), ConsensusError> {
        let t = self.threshold;
        if !(0.0..=1.0).contains(&t) {
            return Err(ConsensusError::invalid_parameter(
                "threshold",
                format!("must lie in [0, 1], got {t}"),
            ));
        }
        if self.n_clusters == 0 || self.n_clusters > n {
            return Err(ConsensusError::invalid_parameter(
                "n_clusters",
                format!(
                    "must be between 1 and {n} (number of observations), got {}",
                    self.n_clusters
                ),
            ));
        }
        Ok(())
    }
}

/// Turns a consensus matrix into final labels with [`UNSTABLE`] for pruned
/// points.
///
/// # Example
///
/// ```
/// use u_consensus::consensus::ConsensusMatrix;
/// use u_consensus::labels::UNSTABLE;
/// use u_consensus::stability::{cluster_from_consensus, StabilityConfig};
///
/// // Points 0-1 always together, 2-3 always together, 4 undecided.
/// let m = ConsensusMatrix::from_dense(&[
///     vec![0.0, 0.0, 1.0, 1.0, 0.5],
///     vec![0.0, 0.0, 1.0, 1.0, 0.5],
///     vec![1.0, 1.0, 0.0, 0.0, 0.5],
///     vec![1.0, 1.0, 0.0, 0.0, 0.5],
///     vec![0.5, 0.5, 0.5, 0.5, 0.0],
/// ])
/// .unwrap();
/// let labels = cluster_from_consensus(&m, &StabilityConfig::new(2)).unwrap();
/// assert_eq!(labels[0], labels[1]);
/// assert_eq!(labels[2], labels[3]);
/// assert_ne!(labels[0], labels[2]);
/// assert_eq!(labels[4], UNSTABLE);
/// ```
pub fn cluster_from_consensus(
    matrix: &ConsensusMatrix,
    config: &StabilityConfig,
) -> Result<Vec<Label>, ConsensusError> {
    let n = matrix.n();
    config.validate(n)?;

    let dendrogram = agglomerate(n, matrix.linkage_distances(), config.linkage)?;
    let provisional = dendrogram.cut(config.n_clusters)?;
    let unstable = unstable_members(matrix, &provisional, config.threshold);

    let mut labels: Vec<Label> = provisional.iter().map(|&g| g as Label).collect();
    for &i in &unstable {
        labels[i] = UNSTABLE;
    }
    renumber(&mut labels);

    debug!(
        n,
        k = config.n_clusters,
        unstable = unstable.len(),
        "consensus labels assigned"
    );
    Ok(labels)
}

/// Points whose mean consensus distance to the rest of their provisional
/// group exceeds `threshold`, ascending.
///
/// Members of singleton groups are stable. Unknown cells are skipped; a
/// point with no known cell in its group is stable.
pub fn unstable_members(matrix: &ConsensusMatrix, provisional: &[usize], threshold: f64) -> Vec<usize> {
    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, &g) in provisional.iter().enumerate() {
        groups.entry(g).or_default().push(i);
    }

    let mut unstable = Vec::new();
    for members in groups.values().filter(|m| m.len() > 1) {
        for &i in members {
            let (sum, count) = members
                .iter()
                .filter(|&&j| j != i)
                .filter_map(|&j| matrix.get(i, j))
                .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
            if count > 0 && sum / count as f64 > threshold {
                unstable.push(i);
            }
        }
    }
    unstable.sort_unstable();
    unstable
}

// ── Tests ─────────────────────────────────────────────────────────────
