//! Consensus matrix construction and the one-shot consensus clustering
//! façade.
//!
//! The consensus distance between two observations is the fraction of
//! rounds in which they were co-sampled and split:
//!
//! ```text
//! M[i][j] = disagreement[i][j] / co_sampled[i][j]    if co_sampled > 0
//!         = fallback                                 otherwise
//! ```
//!
//! `M` is symmetric, lies in [0, 1] and has a zero diagonal. Pairs that were
//! never co-sampled are resolved by an [`UncoveredPolicy`]; the default fills
//! them with 0 ("assume same cluster"), which is optimistic when `n` is large
//! and rounds are few. [`ConsensusMatrix::coverage`] tells which cells were
//! actually observed.
//!
//! # Example
//!
//! ```
//! use u_consensus::consensus::ConsensusClustering;
//! use u_consensus::labels::UNSTABLE;
//!
//! let mut data = Vec::new();
//! for i in 0..6 {
//!     data.push(vec![i as f64 * 0.1, 0.0]);
//!     data.push(vec![8.0 + i as f64 * 0.1, 0.0]);
//! }
//! let result = ConsensusClustering::new(2).rounds(30).fit_predict(&data).unwrap();
//!
//! assert!(result.labels.iter().all(|&l| l != UNSTABLE));
//! assert_eq!(result.labels[0], result.labels[2]);
//! assert_ne!(result.labels[0], result.labels[1]);
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::accumulator::{
    accumulate, AccumulationReport, CancelToken, CoAssociation, FailurePolicy, Parallelism,
    ResamplingConfig,
};
use crate::base::{BaseAlgorithm, BaseClusterer};
use crate::error::ConsensusError;
use crate::hierarchy::{condensed_index, condensed_len, Linkage};
use crate::labels::{cluster_sizes, Label};
use crate::scoring::{score_clusters, ClusterScores};
use crate::stability::{cluster_from_consensus, StabilityConfig};

/// Distance handed to the agglomeration step for cells excluded as unknown.
pub const UNKNOWN_LINKAGE_DISTANCE: f64 = 0.5;

/// Resolution of pairs that were never co-sampled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UncoveredPolicy {
    /// Use this value (in [0, 1]) as the consensus distance.
    Fill(f64),
    /// Mark the cell unknown: skipped by pruning and scoring, seen as
    /// [`UNKNOWN_LINKAGE_DISTANCE`] by the agglomeration step.
    Exclude,
}

impl Default for UncoveredPolicy {
    fn default() -> Self {
        Self::Fill(0.0)
    }
}

impl UncoveredPolicy {
    pub(crate) fn validate(self) -> Result<(), ConsensusError> {
        match self {
            Self::Fill(v) if !(0.0..=1.0).contains(&v) => Err(ConsensusError::invalid_parameter(
                "uncovered",
                format!("fill value must lie in [0, 1], got {v}"),
            )),
            _ => Ok(()),
        }
    }
}

// ── Consensus matrix ──────────────────────────────────────────────────

/// Symmetric n×n consensus distance matrix with values in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct ConsensusMatrix {
    n: usize,
    values: Vec<f64>,
    covered: Vec<bool>,
    policy: UncoveredPolicy,
}

impl ConsensusMatrix {
    /// Builds a fully covered matrix from a condensed upper triangle.
    pub fn from_condensed(n: usize, values: Vec<f64>) -> Result<Self, ConsensusError> {
        if values.len() != condensed_len(n) {
            return Err(ConsensusError::DimensionMismatch {
                expected: condensed_len(n),
                actual: values.len(),
            });
        }
        if let Some(bad) = values.iter().find(|v| !(0.0..=1.0).contains(*v)) {
            return Err(ConsensusError::invalid_parameter(
                "consensus",
                format!("entries must lie in [0, 1], got {bad}"),
            ));
        }
        Ok(Self {
            n,
            covered: vec![true; values.len()],
            values,
            policy: UncoveredPolicy::default(),
        })
    }

    /// Builds a fully covered matrix from square rows. The input must be
    /// symmetric with a zero diagonal.
    pub fn from_dense(rows: &[Vec<f64>]) -> Result<Self, ConsensusError> {
        let n = rows.len();
        if let Some(row) = rows.iter().find(|r| r.len() != n) {
            return Err(ConsensusError::DimensionMismatch {
                expected: n,
                actual: row.len(),
            });
        }
        let mut values = Vec::with_capacity(condensed_len(n));
        for (i, row) in rows.iter().enumerate() {
            if row[i] != 0.0 {
                return Err(ConsensusError::invalid_parameter(
                    "consensus",
                    format!("diagonal entry {i} must be 0, got {}", row[i]),
                ));
            }
            for j in (i + 1)..n {
                if (row[j] - rows[j][i]).abs() > 1e-12 {
                    return Err(ConsensusError::invalid_parameter(
                        "consensus",
                        format!("matrix is not symmetric at ({i}, {j})"),
                    ));
                }
                values.push(row[j]);
            }
        }
        Self::from_condensed(n, values)
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn policy(&self) -> UncoveredPolicy {
        self.policy
    }

    /// Consensus distance of (i, j), or `None` for cells excluded as
    /// unknown. The diagonal is 0.
    pub fn get(&self, i: usize, j: usize) -> Option<f64> {
        if i == j {
            return Some(0.0);
        }
        let c = condensed_index(self.n, i.min(j), i.max(j));
        if !self.covered[c] && self.policy == UncoveredPolicy::Exclude {
            None
        } else {
            Some(self.values[c])
        }
    }

    /// Whether (i, j) was co-sampled at least once. The diagonal counts as
    /// covered.
    pub fn is_covered(&self, i: usize, j: usize) -> bool {
        i == j || self.covered[condensed_index(self.n, i.min(j), i.max(j))]
    }

    /// Boolean `co_sampled > 0` matrix.
    pub fn coverage(&self) -> Vec<Vec<bool>> {
        (0..self.n)
            .map(|i| (0..self.n).map(|j| self.is_covered(i, j)).collect())
            .collect()
    }

    /// Number of unordered pairs never co-sampled.
    pub fn uncovered_pairs(&self) -> usize {
        self.covered.iter().filter(|&&c| !c).count()
    }

    /// Condensed distances as seen by the agglomeration step.
    pub fn linkage_distances(&self) -> &[f64] {
        &self.values
    }

    /// Square view; unknown cells are NaN.
    pub fn to_dense(&self) -> Vec<Vec<f64>> {
        (0..self.n)
            .map(|i| {
                (0..self.n)
                    .map(|j| self.get(i, j).unwrap_or(f64::NAN))
                    .collect()
            })
            .collect()
    }
}

/// Divides disagreement by co-sampling counts cell by cell.
pub fn normalize(
    co_association: &CoAssociation,
    policy: UncoveredPolicy,
) -> Result<ConsensusMatrix, ConsensusError> {
    policy.validate()?;
    let (disagreement, co_sampled) = co_association.condensed();
    let fallback = match policy {
        UncoveredPolicy::Fill(v) => v,
        UncoveredPolicy::Exclude => UNKNOWN_LINKAGE_DISTANCE,
    };

    let mut values = Vec::with_capacity(co_sampled.len());
    let mut covered = Vec::with_capacity(co_sampled.len());
    for (&dis, &co) in disagreement.iter().zip(co_sampled) {
        if co > 0 {
            values.push(f64::from(dis) / f64::from(co));
            covered.push(true);
        } else {
            values.push(fallback);
            covered.push(false);
        }
    }

    Ok(ConsensusMatrix {
        n: co_association.n(),
        values,
        covered,
        policy,
    })
}

// ── Configuration ─────────────────────────────────────────────────────

/// Resampling parameters plus the uncovered-cell policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    #[serde(flatten)]
    pub resampling: ResamplingConfig,
    pub uncovered: UncoveredPolicy,
}

impl ConsensusConfig {
    /// Sets the fraction of rows drawn per round.
    pub fn resampling_ratio(mut self, ratio: f64) -> Self {
        self.resampling.resampling_ratio = ratio;
        self
    }

    /// Sets an explicit number of rows per round.
    pub fn sample_size(mut self, size: usize) -> Self {
        self.resampling.sample_size = Some(size);
        self
    }

    /// Sets the number of rounds.
    pub fn rounds(mut self, rounds: usize) -> Self {
        self.resampling.rounds = rounds;
        self
    }

    /// Sets the master seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.resampling.seed = seed;
        self
    }

    /// Sets the scheduling mode.
    pub fn parallelism(mut self, parallelism: Parallelism) -> Self {
        self.resampling.parallelism = parallelism;
        self
    }

    /// Sets the clusterer failure policy.
    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.resampling.failure_policy = policy;
        self
    }

    /// Attaches a cancellation token.
    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.resampling.cancel = Some(token);
        self
    }

    /// Sets the policy for never co-sampled pairs.
    pub fn uncovered(mut self, policy: UncoveredPolicy) -> Self {
        self.uncovered = policy;
        self
    }
}

/// Consensus matrix plus the raw counts and report behind it.
#[derive(Debug, Clone)]
pub struct ConsensusRun {
    pub matrix: ConsensusMatrix,
    pub co_association: CoAssociation,
    pub report: AccumulationReport,
}

/// Accumulates resampling rounds and normalises them into a consensus
/// matrix.
#[instrument(skip_all, fields(n = data.len(), clusterers = clusterers.len()))]
pub fn build_consensus_matrix(
    data: &[Vec<f64>],
    clusterers: &[Box<dyn BaseClusterer>],
    config: &ConsensusConfig,
) -> Result<ConsensusRun, ConsensusError> {
    config.uncovered.validate()?;
    let accumulation = accumulate(data, clusterers, &config.resampling)?;
    let matrix = normalize(&accumulation.co_association, config.uncovered)?;
    debug!(
        uncovered = matrix.uncovered_pairs(),
        "consensus matrix normalised"
    );
    Ok(ConsensusRun {
        matrix,
        co_association: accumulation.co_association,
        report: accumulation.report,
    })
}

// ── Façade ────────────────────────────────────────────────────────────

/// Result of [`ConsensusClustering::fit_predict`].
#[derive(Debug, Clone)]
pub struct ConsensusResult {
    /// Final labels, [`UNSTABLE`](crate::labels::UNSTABLE) for pruned points.
    pub labels: Vec<Label>,
    /// Per-cluster stability scores.
    pub scores: ClusterScores,
    /// Observations per label.
    pub cluster_sizes: BTreeMap<Label, usize>,
    pub matrix: ConsensusMatrix,
    pub report: AccumulationReport,
}

impl ConsensusResult {
    /// Number of observations marked unstable.
    pub fn outlier_count(&self) -> usize {
        self.cluster_sizes
            .get(&crate::labels::UNSTABLE)
            .copied()
            .unwrap_or(0)
    }
}

/// Consensus clustering with a built-in base algorithm: resample, build the
/// consensus matrix, agglomerate, prune unstable points, score.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusClustering {
    pub algorithm: BaseAlgorithm,
    pub stability: StabilityConfig,
    pub consensus: ConsensusConfig,
}

impl ConsensusClustering {
    /// `k` clusters, K-Means rounds, defaults everywhere else.
    pub fn new(k: usize) -> Self {
        Self {
            stability: StabilityConfig::new(k),
            ..Self::default()
        }
    }

    /// Sets the base algorithm.
    pub fn algorithm(mut self, algorithm: BaseAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Sets the pruning threshold.
    pub fn threshold(mut self, threshold: f64) -> Self {
        self.stability.threshold = threshold;
        self
    }

    /// Sets the agglomeration linkage.
    pub fn linkage(mut self, linkage: Linkage) -> Self {
        self.stability.linkage = linkage;
        self
    }

    /// Sets the number of rounds.
    pub fn rounds(mut self, rounds: usize) -> Self {
        self.consensus.resampling.rounds = rounds;
        self
    }

    /// Sets the fraction of rows drawn per round.
    pub fn resampling_ratio(mut self, ratio: f64) -> Self {
        self.consensus.resampling.resampling_ratio = ratio;
        self
    }

    /// Sets the master seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.consensus.resampling.seed = seed;
        self
    }

    /// Replaces the whole consensus configuration.
    pub fn consensus(mut self, consensus: ConsensusConfig) -> Self {
        self.consensus = consensus;
        self
    }

    /// Runs the full chain on `data`.
    pub fn fit_predict(&self, data: &[Vec<f64>]) -> Result<ConsensusResult, ConsensusError> {
        self.stability.validate(data.len())?;
        let clusterers = vec![self.algorithm.build(self.stability.n_clusters)];
        let run = build_consensus_matrix(data, &clusterers, &self.consensus)?;
        let labels = cluster_from_consensus(&run.matrix, &self.stability)?;
        let scores = score_clusters(&run.matrix, &labels)?;
        Ok(ConsensusResult {
            cluster_sizes: cluster_sizes(&labels),
            labels,
            scores,
            matrix: run.matrix,
            report: run.report,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::RoundContribution;

    fn counts() -> CoAssociation {
        let mut acc = CoAssociation::new(4);
        acc.absorb(&RoundContribution {
            round: 0,
            indices: vec![0, 1, 2],
            labels: vec![0, 0, 1],
        });
        acc.absorb(&RoundContribution {
            round: 1,
            indices: vec![0, 1, 2],
            labels: vec![0, 1, 1],
        });
        acc
    }

    #[test]
    fn divides_counts() {
        let m = normalize(&counts(), UncoveredPolicy::default()).unwrap();
        assert_eq!(m.get(0, 1), Some(0.5));
        assert_eq!(m.get(1, 0), Some(0.5));
        assert_eq!(m.get(0, 2), Some(1.0));
        assert_eq!(m.get(1, 2), Some(0.5));
        assert_eq!(m.get(2, 2), Some(0.0));
    }

    #[test]
    fn fill_policy_for_uncovered_pairs() {
        let m = normalize(&counts(), UncoveredPolicy::Fill(0.0)).unwrap();
        assert_eq!(m.get(0, 3), Some(0.0));
        assert!(!m.is_covered(0, 3));
        assert_eq!(m.uncovered_pairs(), 3);

        let m = normalize(&counts(), UncoveredPolicy::Fill(1.0)).unwrap();
        assert_eq!(m.get(3, 2), Some(1.0));
    }

    #[test]
    fn exclude_policy_marks_unknown() {
        let m = normalize(&counts(), UncoveredPolicy::Exclude).unwrap();
        assert_eq!(m.get(0, 3), None);
        assert_eq!(m.get(0, 1), Some(0.5));
        assert!(m.to_dense()[3][0].is_nan());
        let c = condensed_index(4, 0, 3);
        assert_eq!(m.linkage_distances()[c], UNKNOWN_LINKAGE_DISTANCE);
    }

    #[test]
    fn rejects_bad_fill() {
        assert!(normalize(&counts(), UncoveredPolicy::Fill(1.5))
            .unwrap_err()
            .is_configuration());
    }

    #[test]
    fn dense_round_trip() {
        let rows = vec![
            vec![0.0, 0.2, 0.9],
            vec![0.2, 0.0, 0.4],
            vec![0.9, 0.4, 0.0],
        ];
        let m = ConsensusMatrix::from_dense(&rows).unwrap();
        assert_eq!(m.to_dense(), rows);
        assert!(m.coverage().iter().flatten().all(|&c| c));
    }

    #[test]
    fn dense_validation() {
        assert!(ConsensusMatrix::from_dense(&[vec![0.0, 0.1], vec![0.2, 0.0]]).is_err());
        assert!(ConsensusMatrix::from_dense(&[vec![0.5]]).is_err());
        assert!(ConsensusMatrix::from_dense(&[vec![0.0, 2.0], vec![2.0, 0.0]]).is_err());
        assert!(ConsensusMatrix::from_dense(&[vec![0.0], vec![0.0]]).is_err());
        // Only the last row is short.
        let ragged = [vec![0.0, 0.1, 0.2], vec![0.1, 0.0, 0.3], vec![0.2]];
        assert!(matches!(
            ConsensusMatrix::from_dense(&ragged),
            Err(ConsensusError::DimensionMismatch { expected: 3, actual: 1 })
        ));
    }

    #[test]
    fn facade_reports_sizes() {
        let mut data = Vec::new();
        for i in 0..5 {
            data.push(vec![i as f64 * 0.1]);
        }
        for i in 0..5 {
            data.push(vec![20.0 + i as f64 * 0.1]);
        }
        let result = ConsensusClustering::new(2)
            .rounds(20)
            .resampling_ratio(0.8)
            .fit_predict(&data)
            .unwrap();
        assert_eq!(result.cluster_sizes[&0], 5);
        assert_eq!(result.cluster_sizes[&1], 5);
        assert_eq!(result.outlier_count(), 0);
        assert_eq!(result.scores.get(crate::labels::UNSTABLE), Some(1.0));
        assert_eq!(result.report.rounds_completed, 20);
    }

    #[test]
    fn facade_rejects_bad_threshold() {
        let data = vec![vec![0.0], vec![1.0], vec![2.0]];
        let err = ConsensusClustering::new(2)
            .threshold(1.2)
            .fit_predict(&data)
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = ConsensusConfig::default()
            .rounds(12)
            .seed(3)
            .parallelism(Parallelism::Parallel { workers: Some(2) })
            .uncovered(UncoveredPolicy::Exclude);
        let json = serde_json::to_string(&config).unwrap();
        let back: ConsensusConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);

        let partial: ConsensusConfig = serde_json::from_str(r#"{"rounds": 5}"#).unwrap();
        assert_eq!(partial.resampling.rounds, 5);
        assert_eq!(partial.resampling.resampling_ratio, 0.7);
        assert_eq!(partial.uncovered, UncoveredPolicy::Fill(0.0));
    }
}
