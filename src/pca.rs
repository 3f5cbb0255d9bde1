//! Principal Component Analysis (PCA).
//!
//! Projects data onto the directions of maximum variance via an
//! eigen-decomposition of the covariance matrix (`nalgebra`'s symmetric
//! eigen solver). With `auto_scale` each feature is z-scored first, so PCA
//! runs on the correlation matrix and every feature carries equal weight.
//!
//! # Example
//!
//! ```
//! use u_consensus::pca::{pca, PcaConfig};
//!
//! let data = vec![
//!     vec![1.0, 0.1, 0.01],
//!     vec![2.0, 0.2, 0.02],
//!     vec![3.0, 0.3, 0.03],
//!     vec![4.0, 0.4, 0.04],
//!     vec![5.0, 0.5, 0.05],
//!     vec![6.0, 0.6, 0.06],
//! ];
//! let result = pca(&data, &PcaConfig::new(2)).unwrap();
//!
//! assert_eq!(result.n_components, 2);
//! assert!(result.explained_variance_ratio[0] > 0.99);
//! assert_eq!(result.scores.len(), 6);
//! ```

use nalgebra::{DMatrix, SymmetricEigen};

use crate::error::{validate_points, ConsensusError};

// ── Configuration ─────────────────────────────────────────────────────

/// Configuration for PCA.
#[derive(Debug, Clone)]
pub struct PcaConfig {
    /// Number of principal components to retain.
    pub n_components: usize,
    /// If true, z-score standardize each feature before PCA. Default: false.
    pub auto_scale: bool,
}

impl PcaConfig {
    /// Creates a PCA config retaining `n_components` principal components.
    pub fn new(n_components: usize) -> Self {
        Self {
            n_components,
            auto_scale: false,
        }
    }

    /// Enables auto-scaling (z-score standardization).
    pub fn auto_scale(mut self, auto_scale: bool) -> Self {
        self.auto_scale = auto_scale;
        self
    }
}

// ── Result ────────────────────────────────────────────────────────────

/// Result of PCA.
#[derive(Debug, Clone)]
pub struct PcaResult {
    /// Number of components retained.
    pub n_components: usize,
    /// Variance along each retained component, descending.
    pub eigenvalues: Vec<f64>,
    /// Fraction of total variance explained by each component.
    pub explained_variance_ratio: Vec<f64>,
    /// Component loadings: n_components rows × d columns.
    pub loadings: Vec<Vec<f64>>,
    /// Projected scores: one row per data point (n × n_components).
    pub scores: Vec<Vec<f64>>,
    /// Feature means used for centering (length d).
    pub means: Vec<f64>,
    /// Feature scales (length d). All 1.0 if auto_scale=false.
    pub stds: Vec<f64>,
}

// ── Algorithm ─────────────────────────────────────────────────────────

/// Runs Principal Component Analysis on `data` (n points × d features).
pub fn pca(data: &[Vec<f64>], config: &PcaConfig) -> Result<PcaResult, ConsensusError> {
    let n = data.len();
    if n < 2 {
        return Err(ConsensusError::insufficient_data(2, n));
    }
    let d = validate_points(data)?;
    let k = config.n_components;
    if k == 0 || k > d {
        return Err(ConsensusError::invalid_parameter(
            "n_components",
            format!("must be between 1 and {d} (number of features), got {k}"),
        ));
    }

    let means = column_means(data);
    let stds = if config.auto_scale {
        column_stds(data, &means)
    } else {
        vec![1.0; d]
    };

    let centered = DMatrix::from_fn(n, d, |i, j| (data[i][j] - means[j]) / stds[j]);
    let cov = (centered.transpose() * &centered) / (n - 1) as f64;

    let eigen = SymmetricEigen::new(cov);
    if eigen.eigenvalues.iter().any(|v| !v.is_finite()) {
        return Err(ConsensusError::ComputationFailed {
            operation: "eigenvalue decomposition".into(),
            detail: "non-finite eigenvalue".into(),
        });
    }

    // nalgebra does not order eigenpairs.
    let mut order: Vec<usize> = (0..d).collect();
    order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));

    // Round-off can leave tiny negative variances.
    let eigenvalues: Vec<f64> = order[..k]
        .iter()
        .map(|&c| eigen.eigenvalues[c].max(0.0))
        .collect();
    let total: f64 = eigen.eigenvalues.iter().map(|v| v.max(0.0)).sum();
    let explained_variance_ratio = if total > 1e-15 {
        eigenvalues.iter().map(|&ev| ev / total).collect()
    } else {
        vec![0.0; k]
    };

    let loadings: Vec<Vec<f64>> = order[..k]
        .iter()
        .map(|&c| eigen.eigenvectors.column(c).iter().copied().collect())
        .collect();

    let scores = (0..n)
        .map(|i| {
            loadings
                .iter()
                .map(|w| (0..d).map(|j| centered[(i, j)] * w[j]).sum())
                .collect()
        })
        .collect();

    Ok(PcaResult {
        n_components: k,
        eigenvalues,
        explained_variance_ratio,
        loadings,
        scores,
        means,
        stds,
    })
}

pub(crate) fn column_means(data: &[Vec<f64>]) -> Vec<f64> {
    let d = data[0].len();
    let mut means = vec![0.0; d];
    for point in data {
        for (m, &v) in means.iter_mut().zip(point) {
            *m += v;
        }
    }
    for m in &mut means {
        *m /= data.len() as f64;
    }
    means
}

/// Sample standard deviations; constant features get 1.0.
pub(crate) fn column_stds(data: &[Vec<f64>], means: &[f64]) -> Vec<f64> {
    let n = data.len();
    let mut vars = vec![0.0; means.len()];
    for point in data {
        for ((v, &x), &m) in vars.iter_mut().zip(point).zip(means) {
            let diff = x - m;
            *v += diff * diff;
        }
    }
    vars.iter()
        .map(|&v| {
            let s = (v / (n.max(2) - 1) as f64).sqrt();
            if s < 1e-12 {
                1.0
            } else {
                s
            }
        })
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn make_linear_3d() -> Vec<Vec<f64>> {
        vec![
            vec![1.0, 0.1, 0.01],
            vec![2.0, 0.2, 0.02],
            vec![3.0, 0.3, 0.03],
            vec![4.0, 0.4, 0.04],
            vec![5.0, 0.5, 0.05],
            vec![6.0, 0.6, 0.06],
        ]
    }

    #[test]
    fn shapes() {
        let result = pca(&make_linear_3d(), &PcaConfig::new(2)).unwrap();
        assert_eq!(result.eigenvalues.len(), 2);
        assert_eq!(result.loadings.len(), 2);
        assert_eq!(result.loadings[0].len(), 3);
        assert_eq!(result.scores.len(), 6);
        assert_eq!(result.scores[0].len(), 2);
    }

    #[test]
    fn eigenvalues_descending() {
        let data = vec![
            vec![1.0, 10.0, 0.0],
            vec![2.0, 18.0, 1.0],
            vec![3.0, 33.0, 0.0],
            vec![4.0, 41.0, 1.0],
            vec![5.0, 49.0, 0.0],
        ];
        let result = pca(&data, &PcaConfig::new(3)).unwrap();
        for w in result.eigenvalues.windows(2) {
            assert!(w[0] >= w[1]);
        }
        let sum: f64 = result.explained_variance_ratio.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn scores_are_centered() {
        let result = pca(&make_linear_3d(), &PcaConfig::new(1)).unwrap();
        let mean: f64 = result.scores.iter().map(|s| s[0]).sum::<f64>() / 6.0;
        assert!(mean.abs() < 1e-9);
    }

    #[test]
    fn auto_scale_equalizes_features() {
        // Two independent features on very different scales.
        let data = vec![
            vec![1.0, 1000.0],
            vec![-1.0, 1000.0],
            vec![1.0, -1000.0],
            vec![-1.0, -1000.0],
        ];
        let raw = pca(&data, &PcaConfig::new(2)).unwrap();
        assert!(raw.explained_variance_ratio[0] > 0.99);
        let scaled = pca(&data, &PcaConfig::new(2).auto_scale(true)).unwrap();
        assert!((scaled.explained_variance_ratio[0] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn constant_feature_keeps_unit_scale() {
        let data = vec![vec![1.0, 5.0], vec![2.0, 5.0], vec![3.0, 5.0]];
        let result = pca(&data, &PcaConfig::new(1).auto_scale(true)).unwrap();
        assert_eq!(result.stds[1], 1.0);
        assert!((result.explained_variance_ratio[0] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn errors() {
        assert!(pca(&[vec![1.0, 2.0]], &PcaConfig::new(1)).is_err());
        assert!(pca(&make_linear_3d(), &PcaConfig::new(0)).is_err());
        assert!(pca(&make_linear_3d(), &PcaConfig::new(4)).is_err());
    }
}
