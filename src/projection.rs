//! Dimensionality reduction applied to a group before it is re-clustered.

use crate::error::ConsensusError;
use crate::pca::{pca, PcaConfig};

/// "standardize + reduce(subset, target_dim) → projected rows".
pub trait Projector: Send + Sync {
    fn project(&self, subset: &[Vec<f64>], target_dim: usize) -> Result<Vec<Vec<f64>>, ConsensusError>;
}

/// Z-scores every feature, then keeps the leading principal components.
///
/// A target larger than the feature count is clipped to the feature count.
#[derive(Debug, Clone, Copy, Default)]
pub struct PcaProjector;

impl Projector for PcaProjector {
    fn project(&self, subset: &[Vec<f64>], target_dim: usize) -> Result<Vec<Vec<f64>>, ConsensusError> {
        let d = subset.first().map_or(0, Vec::len);
        let dim = target_dim.min(d);
        Ok(pca(subset, &PcaConfig::new(dim).auto_scale(true))?.scores)
    }
}

/// Passes rows through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityProjector;

impl Projector for IdentityProjector {
    fn project(&self, subset: &[Vec<f64>], _target_dim: usize) -> Result<Vec<Vec<f64>>, ConsensusError> {
        Ok(subset.to_vec())
    }
}
