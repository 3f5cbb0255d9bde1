//! Gaussian Mixture Model with diagonal covariances, fitted by EM.
//!
//! Second base algorithm for resampling rounds. Components are initialised
//! from a K-Means partition, then refined by expectation–maximisation in
//! log space. Labels are the component with the highest responsibility.
//!
//! # Example
//!
//! ```
//! use u_consensus::mixture::{gaussian_mixture, MixtureConfig};
//!
//! let data = vec![
//!     vec![0.0, 0.1], vec![0.2, 0.0], vec![0.1, 0.3], vec![0.3, 0.2],
//!     vec![9.0, 9.1], vec![9.2, 9.0], vec![9.1, 9.3], vec![9.3, 9.2],
//! ];
//! let result = gaussian_mixture(&data, &MixtureConfig::new(2)).unwrap();
//! assert_eq!(result.labels[0], result.labels[3]);
//! assert_ne!(result.labels[0], result.labels[4]);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ConsensusError;
use crate::kmeans::{kmeans, KMeansConfig};

const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// Configuration for the Gaussian mixture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixtureConfig {
    /// Number of mixture components.
    pub k: usize,
    /// Maximum EM iterations. Default: 100.
    pub max_iter: usize,
    /// Convergence tolerance on the mean log-likelihood. Default: 1e-3.
    pub tol: f64,
    /// Variance floor added to every diagonal entry. Default: 1e-6.
    pub reg_covar: f64,
    /// Seed for the K-Means initialisation. Default: 42.
    pub seed: u64,
}

impl Default for MixtureConfig {
    fn default() -> Self {
        Self::new(2)
    }
}

impl MixtureConfig {
    /// Creates a config with `k` components and default parameters.
    pub fn new(k: usize) -> Self {
        Self {
            k,
            max_iter: 100,
            tol: 1e-3,
            reg_covar: 1e-6,
            seed: 42,
        }
    }

    /// Sets the maximum number of EM iterations.
    pub fn max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Sets the convergence tolerance.
    pub fn tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    /// Sets the variance floor.
    pub fn reg_covar(mut self, reg_covar: f64) -> Self {
        self.reg_covar = reg_covar;
        self
    }

    /// Sets the initialisation seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// A fitted mixture.
#[derive(Debug, Clone)]
pub struct MixtureResult {
    /// Mixing weights (sum to 1).
    pub weights: Vec<f64>,
    /// Component means (k × d).
    pub means: Vec<Vec<f64>>,
    /// Diagonal variances (k × d).
    pub variances: Vec<Vec<f64>>,
    /// Most responsible component for each point.
    pub labels: Vec<usize>,
    /// Mean log-likelihood per point at the last iteration.
    pub log_likelihood: f64,
    /// EM iterations performed.
    pub iterations: usize,
    /// Whether the tolerance was reached before `max_iter`.
    pub converged: bool,
}

/// Fits a diagonal-covariance Gaussian mixture and labels every point.
pub fn gaussian_mixture(
    data: &[Vec<f64>],
    config: &MixtureConfig,
) -> Result<MixtureResult, ConsensusError> {
    if !(config.reg_covar >= 0.0 && config.reg_covar.is_finite()) {
        return Err(ConsensusError::invalid_parameter(
            "reg_covar",
            format!("must be a non-negative finite number, got {}", config.reg_covar),
        ));
    }

    // Validates data and k.
    let init = kmeans(data, &KMeansConfig::new(config.k).seed(config.seed).n_init(1))?;

    let n = data.len();
    let k = config.k;
    let d = data[0].len();

    // Hard responsibilities from the K-Means partition.
    let mut resp = vec![vec![0.0; k]; n];
    for (r, &l) in resp.iter_mut().zip(&init.labels) {
        r[l] = 1.0;
    }
    let (mut weights, mut means, mut variances) = m_step(data, &resp, k, d, config.reg_covar);

    let mut log_likelihood = f64::NEG_INFINITY;
    let mut iterations = 0;
    let mut converged = false;

    for iter in 0..config.max_iter {
        iterations = iter + 1;
        let ll = e_step(data, &weights, &means, &variances, &mut resp);
        let (w, m, v) = m_step(data, &resp, k, d, config.reg_covar);
        weights = w;
        means = m;
        variances = v;

        if (ll - log_likelihood).abs() < config.tol {
            log_likelihood = ll;
            converged = true;
            break;
        }
        log_likelihood = ll;
    }

    if !log_likelihood.is_finite() {
        return Err(ConsensusError::ComputationFailed {
            operation: "gaussian mixture EM".into(),
            detail: format!("log-likelihood diverged to {log_likelihood}"),
        });
    }

    e_step(data, &weights, &means, &variances, &mut resp);
    let labels = resp
        .iter()
        .map(|r| {
            r.iter()
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |best, (c, &p)| {
                    if p > best.1 {
                        (c, p)
                    } else {
                        best
                    }
                })
                .0
        })
        .collect();

    Ok(MixtureResult {
        weights,
        means,
        variances,
        labels,
        log_likelihood,
        iterations,
        converged,
    })
}

/// Fills `resp` with normalised responsibilities; returns the mean
/// log-likelihood.
fn e_step(
    data: &[Vec<f64>],
    weights: &[f64],
    means: &[Vec<f64>],
    variances: &[Vec<f64>],
    resp: &mut [Vec<f64>],
) -> f64 {
    let mut total = 0.0;
    let mut log_p = vec![0.0; weights.len()];

    for (point, r) in data.iter().zip(resp.iter_mut()) {
        for (c, lp) in log_p.iter_mut().enumerate() {
            *lp = if weights[c] > 0.0 {
                weights[c].ln() + log_density(point, &means[c], &variances[c])
            } else {
                f64::NEG_INFINITY
            };
        }
        let max = log_p.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let sum: f64 = log_p.iter().map(|&lp| (lp - max).exp()).sum();
        let log_norm = max + sum.ln();
        for (rc, &lp) in r.iter_mut().zip(&log_p) {
            *rc = (lp - log_norm).exp();
        }
        total += log_norm;
    }

    total / data.len() as f64
}

type Params = (Vec<f64>, Vec<Vec<f64>>, Vec<Vec<f64>>);

fn m_step(data: &[Vec<f64>], resp: &[Vec<f64>], k: usize, d: usize, reg_covar: f64) -> Params {
    let n = data.len() as f64;
    let mut nk = vec![10.0 * f64::EPSILON; k];
    let mut means = vec![vec![0.0; d]; k];

    for (point, r) in data.iter().zip(resp) {
        for c in 0..k {
            nk[c] += r[c];
            for (m, &x) in means[c].iter_mut().zip(point) {
                *m += r[c] * x;
            }
        }
    }
    for c in 0..k {
        for m in &mut means[c] {
            *m /= nk[c];
        }
    }

    let mut variances = vec![vec![0.0; d]; k];
    for (point, r) in data.iter().zip(resp) {
        for c in 0..k {
            for ((v, &x), &m) in variances[c].iter_mut().zip(point).zip(&means[c]) {
                let diff = x - m;
                *v += r[c] * diff * diff;
            }
        }
    }
    for c in 0..k {
        for v in &mut variances[c] {
            *v = *v / nk[c] + reg_covar;
            // Floor for components collapsed onto identical points.
            if *v < 1e-12 {
                *v = 1e-12;
            }
        }
    }

    let weights = nk.iter().map(|&w| w / n).collect();
    (weights, means, variances)
}

fn log_density(point: &[f64], mean: &[f64], var: &[f64]) -> f64 {
    let mut mahal_sq = 0.0;
    let mut log_det = 0.0;
    for ((&x, &m), &v) in point.iter().zip(mean).zip(var) {
        let diff = x - m;
        mahal_sq += diff * diff / v;
        log_det += v.ln();
    }
    -0.5 * (point.len() as f64 * LN_2PI + log_det + mahal_sq)
}
