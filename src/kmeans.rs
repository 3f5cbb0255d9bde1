//! K-Means clustering with K-Means++ initialization.
//!
//! The default base algorithm of a resampling round. Lloyd's iterative
//! refinement, `n_init` seeded restarts, lowest WCSS kept.
//!
//! # Example
//!
//! ```
//! use u_consensus::kmeans::{kmeans, KMeansConfig};
//!
//! let data = vec![
//!     vec![1.0, 1.0], vec![1.5, 1.5], vec![1.2, 1.3],
//!     vec![8.0, 8.0], vec![8.5, 8.5], vec![8.2, 8.3],
//! ];
//! let result = kmeans(&data, &KMeansConfig::new(2)).unwrap();
//!
//! assert_eq!(result.k, 2);
//! assert_eq!(result.labels[0], result.labels[1]);
//! assert_ne!(result.labels[0], result.labels[3]);
//! ```

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::{validate_points, ConsensusError};

// ── Configuration ─────────────────────────────────────────────────────

/// Configuration for K-Means clustering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KMeansConfig {
    /// Number of clusters.
    pub k: usize,
    /// Maximum iterations. Default: 300.
    pub max_iter: usize,
    /// Convergence tolerance (centroid movement). Default: 1e-6.
    pub tol: f64,
    /// Number of random restarts (best result kept). Default: 10.
    pub n_init: usize,
    /// Random seed. Default: 42.
    pub seed: u64,
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self::new(2)
    }
}

impl KMeansConfig {
    /// Creates a config for a fixed number of clusters with default parameters.
    pub fn new(k: usize) -> Self {
        Self {
            k,
            max_iter: 300,
            tol: 1e-6,
            n_init: 10,
            seed: 42,
        }
    }

    /// Sets the maximum number of iterations.
    pub fn max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Sets the convergence tolerance.
    pub fn tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    /// Sets the number of random restarts.
    pub fn n_init(mut self, n_init: usize) -> Self {
        self.n_init = n_init;
        self
    }

    /// Sets the random seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

// ── Result ────────────────────────────────────────────────────────────

/// Result of K-Means clustering.
#[derive(Debug, Clone)]
pub struct KMeansResult {
    /// Number of clusters.
    pub k: usize,
    /// Cluster centroids (k × d).
    pub centroids: Vec<Vec<f64>>,
    /// Cluster label for each data point (0..k).
    pub labels: Vec<usize>,
    /// Within-Cluster Sum of Squares (total).
    pub wcss: f64,
    /// Number of iterations of the kept restart.
    pub iterations: usize,
}

// ── Algorithm ─────────────────────────────────────────────────────────

/// Runs K-Means clustering with K-Means++ initialization.
///
/// Restart `r` is seeded with `config.seed + r`, so equal configs give
/// equal labels.
pub fn kmeans(data: &[Vec<f64>], config: &KMeansConfig) -> Result<KMeansResult, ConsensusError> {
    let n = data.len();
    let k = config.k;

    validate_points(data)?;
    if k == 0 || k > n {
        return Err(ConsensusError::invalid_parameter(
            "k",
            format!("must be between 1 and {n} (number of data points), got {k}"),
        ));
    }
    if config.n_init == 0 {
        return Err(ConsensusError::invalid_parameter(
            "n_init",
            "must be at least 1",
        ));
    }

    let mut best: Option<KMeansResult> = None;
    for init_idx in 0..config.n_init {
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed.wrapping_add(init_idx as u64));
        let result = lloyd(data, k, config.max_iter, config.tol, &mut rng);
        if best.as_ref().is_none_or(|b| result.wcss < b.wcss) {
            best = Some(result);
        }
    }

    best.ok_or_else(|| ConsensusError::ComputationFailed {
        operation: "k-means".into(),
        detail: "no restart produced a result".into(),
    })
}

fn lloyd(
    data: &[Vec<f64>],
    k: usize,
    max_iter: usize,
    tol: f64,
    rng: &mut ChaCha8Rng,
) -> KMeansResult {
    let n = data.len();
    let d = data[0].len();

    let mut centroids = kmeans_plus_plus(data, k, rng);
    let mut labels = vec![0usize; n];
    let mut iterations = 0;

    for iter in 0..max_iter {
        iterations = iter + 1;

        for (label, point) in labels.iter_mut().zip(data) {
            *label = nearest(point, &centroids).0;
        }

        let mut sums = vec![vec![0.0; d]; k];
        let mut counts = vec![0usize; k];
        for (point, &c) in data.iter().zip(&labels) {
            counts[c] += 1;
            for (s, &v) in sums[c].iter_mut().zip(point) {
                *s += v;
            }
        }

        let mut max_shift = 0.0f64;
        for c in 0..k {
            // Empty cluster keeps its old centroid.
            if counts[c] == 0 {
                continue;
            }
            for s in &mut sums[c] {
                *s /= counts[c] as f64;
            }
            max_shift = max_shift.max(sq_dist(&centroids[c], &sums[c]).sqrt());
            std::mem::swap(&mut centroids[c], &mut sums[c]);
        }

        if max_shift < tol {
            break;
        }
    }

    let mut wcss = 0.0;
    for (label, point) in labels.iter_mut().zip(data) {
        let (c, dist) = nearest(point, &centroids);
        *label = c;
        wcss += dist;
    }

    KMeansResult {
        k,
        centroids,
        labels,
        wcss,
        iterations,
    }
}

/// K-Means++ seeding: distance²-proportional sampling of initial centroids.
///
/// Reference: Arthur & Vassilvitskii (2007). "k-means++: The advantages
/// of careful seeding."
fn kmeans_plus_plus(data: &[Vec<f64>], k: usize, rng: &mut ChaCha8Rng) -> Vec<Vec<f64>> {
    let n = data.len();
    let mut centroids: Vec<Vec<f64>> = Vec::with_capacity(k);
    centroids.push(data[rng.gen_range(0..n)].clone());

    let mut min_dists = vec![f64::INFINITY; n];
    for _ in 1..k {
        let last = &centroids[centroids.len() - 1];
        for (m, point) in min_dists.iter_mut().zip(data) {
            *m = m.min(sq_dist(point, last));
        }

        let total: f64 = min_dists.iter().sum();
        if total < 1e-15 {
            // All points coincide with a centroid.
            centroids.push(data[rng.gen_range(0..n)].clone());
            continue;
        }

        let target = rng.gen::<f64>() * total;
        let mut cumulative = 0.0;
        let mut chosen = n - 1;
        for (i, &dist) in min_dists.iter().enumerate() {
            cumulative += dist;
            if cumulative >= target {
                chosen = i;
                break;
            }
        }
        centroids.push(data[chosen].clone());
    }

    centroids
}

#[inline]
fn nearest(point: &[f64], centroids: &[Vec<f64>]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (c, centroid) in centroids.iter().enumerate() {
        let dist = sq_dist(point, centroid);
        if dist < best.1 {
            best = (c, dist);
        }
    }
    best
}

#[inline]
pub(crate) fn sq_dist(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&ai, &bi)| {
            let diff = ai - bi;
            diff * diff
        })
        .sum()
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn make_two_clusters() -> Vec<Vec<f64>> {
        vec![
            vec![0.0, 0.0],
            vec![0.5, 0.5],
            vec![0.2, 0.3],
            vec![0.1, 0.4],
            vec![10.0, 10.0],
            vec![10.5, 10.5],
            vec![10.2, 10.3],
            vec![10.1, 10.4],
        ]
    }

    fn make_three_clusters() -> Vec<Vec<f64>> {
        vec![
            vec![0.0, 0.0],
            vec![0.5, 0.5],
            vec![0.2, 0.3],
            vec![10.0, 0.0],
            vec![10.5, 0.5],
            vec![10.2, 0.3],
            vec![5.0, 10.0],
            vec![5.5, 10.5],
            vec![5.2, 10.3],
        ]
    }

    #[test]
    fn two_clusters() {
        let result = kmeans(&make_two_clusters(), &KMeansConfig::new(2)).unwrap();
        assert_eq!(result.labels.len(), 8);
        for i in 1..4 {
            assert_eq!(result.labels[0], result.labels[i]);
            assert_eq!(result.labels[4], result.labels[4 + i]);
        }
        assert_ne!(result.labels[0], result.labels[4]);
        assert!(result.wcss < 2.0);
    }

    #[test]
    fn three_clusters() {
        let result = kmeans(&make_three_clusters(), &KMeansConfig::new(3)).unwrap();
        let l = &result.labels;
        assert_eq!(l[0], l[1]);
        assert_eq!(l[0], l[2]);
        assert_eq!(l[3], l[5]);
        assert_eq!(l[6], l[8]);
        assert_ne!(l[0], l[3]);
        assert_ne!(l[0], l[6]);
        assert_ne!(l[3], l[6]);
    }

    #[test]
    fn single_cluster() {
        let data = vec![vec![1.0, 2.0], vec![1.5, 2.5], vec![1.2, 2.3]];
        let result = kmeans(&data, &KMeansConfig::new(1)).unwrap();
        assert!(result.labels.iter().all(|&l| l == 0));
    }

    #[test]
    fn same_seed_same_labels() {
        let data = make_three_clusters();
        let config = KMeansConfig::new(3).seed(7).n_init(2);
        let a = kmeans(&data, &config).unwrap();
        let b = kmeans(&data, &config).unwrap();
        assert_eq!(a.labels, b.labels);
    }

    #[test]
    fn identical_points() {
        let data = vec![vec![1.0, 1.0]; 5];
        let result = kmeans(&data, &KMeansConfig::new(2)).unwrap();
        assert_eq!(result.labels.len(), 5);
        assert!(result.wcss < 1e-12);
    }

    #[test]
    fn rejects_bad_k() {
        let data = make_two_clusters();
        assert!(kmeans(&data, &KMeansConfig::new(0)).is_err());
        assert!(kmeans(&data, &KMeansConfig::new(9)).is_err());
        assert!(kmeans(&data, &KMeansConfig::new(2).n_init(0)).is_err());
    }

    #[test]
    fn rejects_non_finite() {
        let data = vec![vec![0.0], vec![f64::INFINITY]];
        assert_eq!(
            kmeans(&data, &KMeansConfig::new(1)).unwrap_err(),
            ConsensusError::NonFiniteValue { row: 1 }
        );
    }
}
