//! Enrichment of predicted clusters in reference categories.
//!
//! Cross-tabulates a reference labelling (diagnosis, condition, any
//! categorical annotation) against predicted cluster labels and, for every
//! predicted cluster, tests whether its category composition differs from
//! the overall one. The test runs on the R × 2 table whose columns are the
//! cluster's per-category counts and the overall per-category totals:
//! Fisher's exact test when there are two categories, Pearson's χ² test
//! (no continuity correction) otherwise.
//!
//! Each cluster gets the signed score `±−log10 p` (p = 0 maps to 300). The
//! sign follows the cluster's share of the second category (in sorted
//! order) relative to its overall share, so with a binary reference a
//! positive score means the cluster is enriched in the "positive" class.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConsensusError;
use crate::labels::Label;
use crate::special::{chi2_sf, fisher_exact};

/// Score assigned when the p-value underflows to zero.
pub const MAX_SCORE: f64 = 300.0;

/// Denominator used by [`ContingencyTable::normalized`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalize {
    /// Each cluster column sums to 1.
    #[default]
    ByPredicted,
    /// Each reference row sums to 1.
    ByReference,
    /// The whole table sums to 1.
    Overall,
}

/// Options for [`cluster_enrichment_with`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// Denominator for [`Enrichment::normalized`].
    pub normalize: Normalize,
    /// Rescale each cluster's counts to the size of the first reference
    /// category before testing, so large clusters do not dominate the
    /// p-values by sample size alone.
    pub scaled: bool,
}

impl EnrichmentConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn normalize(mut self, normalize: Normalize) -> Self {
        self.normalize = normalize;
        self
    }

    pub fn scaled(mut self, scaled: bool) -> Self {
        self.scaled = scaled;
        self
    }
}

/// Test used for the per-cluster scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentTest {
    FisherExact,
    ChiSquared,
}

/// Counts of reference categories (rows) × predicted clusters (columns).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContingencyTable<R> {
    /// Reference categories, ascending.
    pub categories: Vec<R>,
    /// Predicted labels, ascending (sentinel first if present).
    pub clusters: Vec<Label>,
    /// `counts[row][col]`.
    pub counts: Vec<Vec<u64>>,
}

impl<R: Ord + Clone> ContingencyTable<R> {
    /// Cross-tabulates two equally long labellings.
    pub fn new(reference: &[R], predicted: &[Label]) -> Result<Self, ConsensusError> {
        if reference.len() != predicted.len() {
            return Err(ConsensusError::DimensionMismatch {
                expected: reference.len(),
                actual: predicted.len(),
            });
        }
        if reference.is_empty() {
            return Err(ConsensusError::insufficient_data(1, 0));
        }

        let mut cells: BTreeMap<(&R, Label), u64> = BTreeMap::new();
        for (r, &p) in reference.iter().zip(predicted) {
            *cells.entry((r, p)).or_insert(0) += 1;
        }
        let categories: Vec<R> = cells
            .keys()
            .map(|(r, _)| *r)
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .cloned()
            .collect();
        let clusters: Vec<Label> = cells
            .keys()
            .map(|&(_, p)| p)
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();

        let counts = categories
            .iter()
            .map(|r| {
                clusters
                    .iter()
                    .map(|&p| cells.get(&(r, p)).copied().unwrap_or(0))
                    .collect()
            })
            .collect();

        Ok(Self {
            categories,
            clusters,
            counts,
        })
    }
}

impl<R> ContingencyTable<R> {
    /// Observations per reference category.
    pub fn row_totals(&self) -> Vec<u64> {
        self.counts.iter().map(|row| row.iter().sum()).collect()
    }

    /// Observations per predicted cluster.
    pub fn column_totals(&self) -> Vec<u64> {
        (0..self.clusters.len())
            .map(|c| self.counts.iter().map(|row| row[c]).sum())
            .collect()
    }

    pub fn total(&self) -> u64 {
        self.row_totals().iter().sum()
    }

    /// Table of fractions.
    pub fn normalized(&self, normalize: Normalize) -> Vec<Vec<f64>> {
        let rows = self.row_totals();
        let cols = self.column_totals();
        let total = self.total() as f64;
        self.counts
            .iter()
            .enumerate()
            .map(|(r, row)| {
                row.iter()
                    .enumerate()
                    .map(|(c, &v)| {
                        let denom = match normalize {
                            Normalize::ByPredicted => cols[c] as f64,
                            Normalize::ByReference => rows[r] as f64,
                            Normalize::Overall => total,
                        };
                        v as f64 / denom
                    })
                    .collect()
            })
            .collect()
    }
}

/// Output of [`cluster_enrichment`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enrichment<R> {
    pub table: ContingencyTable<R>,
    pub normalized: Vec<Vec<f64>>,
    pub test: EnrichmentTest,
    /// Signed `−log10 p` per predicted cluster.
    pub scores: BTreeMap<Label, f64>,
}

/// Tests every predicted cluster for enrichment in the reference
/// categories.
///
/// ```
/// use u_consensus::enrichment::{cluster_enrichment, EnrichmentTest, Normalize};
///
/// let reference = ["healthy", "healthy", "healthy", "sick", "sick", "sick"];
/// let predicted = [0, 0, 0, 1, 1, 1];
/// let e = cluster_enrichment(&reference, &predicted, Normalize::ByPredicted).unwrap();
///
/// assert_eq!(e.test, EnrichmentTest::FisherExact);
/// assert!(e.scores[&1] > 0.0); // enriched in "sick"
/// assert!(e.scores[&0] < 0.0);
/// ```
pub fn cluster_enrichment<R: Ord + Clone>(
    reference: &[R],
    predicted: &[Label],
    normalize: Normalize,
) -> Result<Enrichment<R>, ConsensusError> {
    cluster_enrichment_with(reference, predicted, &EnrichmentConfig::new().normalize(normalize))
}

/// [`cluster_enrichment`] with every option exposed.
pub fn cluster_enrichment_with<R: Ord + Clone>(
    reference: &[R],
    predicted: &[Label],
    config: &EnrichmentConfig,
) -> Result<Enrichment<R>, ConsensusError> {
    let table = ContingencyTable::new(reference, predicted)?;
    if table.categories.len() < 2 {
        return Err(ConsensusError::DegenerateData {
            reason: "reference labels need at least 2 categories".into(),
        });
    }

    let test = if table.categories.len() == 2 {
        EnrichmentTest::FisherExact
    } else {
        EnrichmentTest::ChiSquared
    };
    let totals = table.row_totals();
    let n = table.total() as f64;
    let columns = table.column_totals();

    let mut scores = BTreeMap::new();
    for (c, &label) in table.clusters.iter().enumerate() {
        let mut counts: Vec<u64> = table.counts.iter().map(|row| row[c]).collect();
        let shift = counts[1] as f64 / columns[c] as f64 - totals[1] as f64 / n;
        if config.scaled {
            let target = totals[0] as f64;
            for v in &mut counts {
                *v = (*v as f64 / columns[c] as f64 * target).round_ties_even() as u64;
            }
        }
        let p = match test {
            EnrichmentTest::FisherExact => {
                fisher_exact([[counts[0], totals[0]], [counts[1], totals[1]]])
            }
            EnrichmentTest::ChiSquared => chi_squared_independence(&counts, &totals),
        };

        let sign = if shift > 0.0 {
            1.0
        } else if shift < 0.0 {
            -1.0
        } else {
            0.0
        };
        let magnitude = if p == 0.0 { MAX_SCORE } else { -p.log10() };
        debug!(cluster = label, p, "enrichment tested");
        scores.insert(label, sign * magnitude);
    }

    Ok(Enrichment {
        normalized: table.normalized(config.normalize),
        table,
        test,
        scores,
    })
}

/// Runs [`cluster_enrichment_with`] once per named reference column.
pub fn enrich_columns<R: Ord + Clone>(
    columns: &BTreeMap<String, Vec<R>>,
    predicted: &[Label],
    config: &EnrichmentConfig,
) -> Result<BTreeMap<String, Enrichment<R>>, ConsensusError> {
    columns
        .iter()
        .map(|(name, reference)| {
            cluster_enrichment_with(reference, predicted, config).map(|e| (name.clone(), e))
        })
        .collect()
}

/// p-value of Pearson's χ² test on the R × 2 table `[a | b]`.
fn chi_squared_independence(a: &[u64], b: &[u64]) -> f64 {
    let col_a: u64 = a.iter().sum();
    let col_b: u64 = b.iter().sum();
    let n = (col_a + col_b) as f64;

    let mut statistic = 0.0;
    for (&x, &y) in a.iter().zip(b) {
        let row = (x + y) as f64;
        for (observed, col) in [(x, col_a), (y, col_b)] {
            let expected = row * col as f64 / n;
            if expected > 0.0 {
                let diff = observed as f64 - expected;
                statistic += diff * diff / expected;
            }
        }
    }
    chi2_sf(statistic, (a.len() - 1) as f64)
}
