//! Base clusterers: the partitioning algorithm run inside each resampling
//! round.
//!
//! Anything that can label a subset of rows implements [`BaseClusterer`].
//! The consensus accumulator picks one clusterer per round from a list the
//! caller supplies and passes it the round's own seed, so every round is
//! reproducible regardless of the order rounds execute in.

use serde::{Deserialize, Serialize};

use crate::error::ConsensusError;
use crate::kmeans::{kmeans, KMeansConfig};
use crate::mixture::{gaussian_mixture, MixtureConfig};

/// A partition-producing algorithm with a fit-predict contract.
pub trait BaseClusterer: Send + Sync {
    /// Short name used in failure reports and logs.
    fn name(&self) -> &str;

    /// Fits on `subset` and returns one label per row.
    fn fit_predict(&self, subset: &[Vec<f64>], seed: u64) -> Result<Vec<usize>, ConsensusError>;
}

/// K-Means adapter. The round seed replaces the configured seed.
#[derive(Debug, Clone)]
pub struct KMeansClusterer {
    pub config: KMeansConfig,
}

impl KMeansClusterer {
    pub fn new(k: usize) -> Self {
        Self {
            config: KMeansConfig::new(k),
        }
    }
}

impl BaseClusterer for KMeansClusterer {
    fn name(&self) -> &str {
        "kmeans"
    }

    fn fit_predict(&self, subset: &[Vec<f64>], seed: u64) -> Result<Vec<usize>, ConsensusError> {
        let config = self.config.clone().seed(seed);
        Ok(kmeans(subset, &config)?.labels)
    }
}

/// Diagonal Gaussian mixture adapter.
#[derive(Debug, Clone)]
pub struct GaussianMixtureClusterer {
    pub config: MixtureConfig,
}

impl GaussianMixtureClusterer {
    pub fn new(k: usize) -> Self {
        Self {
            config: MixtureConfig::new(k),
        }
    }
}

impl BaseClusterer for GaussianMixtureClusterer {
    fn name(&self) -> &str {
        "gaussian_mixture"
    }

    fn fit_predict(&self, subset: &[Vec<f64>], seed: u64) -> Result<Vec<usize>, ConsensusError> {
        let config = self.config.clone().seed(seed);
        Ok(gaussian_mixture(subset, &config)?.labels)
    }
}

/// Built-in base algorithm selector, used where a clusterer has to be
/// built for a given k (façade, multilevel candidates).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseAlgorithm {
    #[default]
    KMeans,
    GaussianMixture,
}

impl BaseAlgorithm {
    /// Boxed clusterer producing `k` groups.
    pub fn build(self, k: usize) -> Box<dyn BaseClusterer> {
        match self {
            Self::KMeans => Box::new(KMeansClusterer::new(k)),
            Self::GaussianMixture => Box::new(GaussianMixtureClusterer::new(k)),
        }
    }
}
