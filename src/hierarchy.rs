//! Hierarchical agglomerative clustering over a precomputed distance matrix.
//!
//! Bottom-up merging with single, complete, average (UPGMA) or Ward linkage,
//! producing a dendrogram that is cut into a fixed number of flat groups.
//! Distances are given as a condensed upper triangle (row-major, `i < j`),
//! which is how [`ConsensusMatrix`](crate::consensus::ConsensusMatrix)
//! stores its cells.
//!
//! # References
//!
//! - Lance, G.N. & Williams, W.T. (1967). "A general theory of
//!   classificatory sorting strategies: Hierarchical systems".
//! - Murtagh & Legendre (2014). "Ward's hierarchical agglomerative
//!   clustering method: which algorithms implement Ward's criterion?"
//!
//! # Example
//!
//! ```
//! use u_consensus::hierarchy::{agglomerate, Linkage};
//!
//! // 4 points: {0, 1} close, {2, 3} close, groups far apart.
//! // Condensed order: (0,1) (0,2) (0,3) (1,2) (1,3) (2,3)
//! let dist = [0.1, 0.9, 0.9, 0.9, 0.9, 0.1];
//! let dendrogram = agglomerate(4, &dist, Linkage::Average).unwrap();
//! let labels = dendrogram.cut(2).unwrap();
//! assert_eq!(labels, vec![0, 0, 1, 1]);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ConsensusError;

/// Linkage criterion for hierarchical agglomerative clustering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Linkage {
    /// Minimum distance between any pair of points across clusters.
    Single,
    /// Maximum distance between any pair of points across clusters.
    Complete,
    /// Size-weighted average (UPGMA) of pairwise distances.
    Average,
    /// Minimum-variance merging. Inputs are squared internally and merge
    /// heights reported on the original scale.
    #[default]
    Ward,
}

/// A single merge step in the dendrogram.
#[derive(Debug, Clone, PartialEq)]
pub struct Merge {
    /// First cluster merged (original points use 0..n, merged clusters
    /// use n, n+1, …).
    pub cluster_a: usize,
    /// Second cluster merged.
    pub cluster_b: usize,
    /// Height at which the merge occurred.
    pub distance: f64,
    /// Size of the newly formed cluster.
    pub size: usize,
}

/// Merge history of an agglomeration over `n` points. Length = n − 1.
#[derive(Debug, Clone)]
pub struct Dendrogram {
    n: usize,
    merges: Vec<Merge>,
}

/// Number of cells in a condensed matrix over `n` points.
#[inline]
pub(crate) fn condensed_len(n: usize) -> usize {
    n * n.saturating_sub(1) / 2
}

/// Condensed index for pair (i, j) where i < j.
#[inline]
pub(crate) fn condensed_index(n: usize, i: usize, j: usize) -> usize {
    debug_assert!(i < j && j < n);
    i * n - i * (i + 1) / 2 + j - i - 1
}

/// Agglomerates `n` points from a condensed distance matrix.
///
/// O(n³) time (scan for the closest pair each step), O(n²) space. Ties are
/// resolved towards the lowest cluster indices, so equal inputs always give
/// the same dendrogram.
pub fn agglomerate(n: usize, dist: &[f64], linkage: Linkage) -> Result<Dendrogram, ConsensusError> {
    if n == 0 {
        return Err(ConsensusError::insufficient_data(1, 0));
    }
    if dist.len() != condensed_len(n) {
        return Err(ConsensusError::DimensionMismatch {
            expected: condensed_len(n),
            actual: dist.len(),
        });
    }
    if let Some(bad) = dist.iter().find(|d| !d.is_finite() || **d < 0.0) {
        return Err(ConsensusError::invalid_parameter(
            "dist",
            format!("distances must be finite and non-negative, got {bad}"),
        ));
    }

    let use_sq = linkage == Linkage::Ward;
    let mut d: Vec<f64> = if use_sq {
        dist.iter().map(|v| v * v).collect()
    } else {
        dist.to_vec()
    };

    let mut active: Vec<usize> = (0..n).collect();
    let mut sizes = vec![1usize; n];
    // Slot i holds the dendrogram id of the cluster currently living there.
    let mut ids: Vec<usize> = (0..n).collect();
    let mut merges = Vec::with_capacity(n.saturating_sub(1));

    for step in 0..n.saturating_sub(1) {
        let (mut bi, mut bj, mut best) = (0, 0, f64::INFINITY);
        for (a, &ci) in active.iter().enumerate() {
            for &cj in &active[a + 1..] {
                let v = d[condensed_index(n, ci, cj)];
                if v < best {
                    (bi, bj, best) = (ci, cj, v);
                }
            }
        }

        let (si, sj) = (sizes[bi], sizes[bj]);
        for &ck in &active {
            if ck == bi || ck == bj {
                continue;
            }
            let ik = condensed_index(n, bi.min(ck), bi.max(ck));
            let jk = condensed_index(n, bj.min(ck), bj.max(ck));
            d[ik] = lance_williams(linkage, d[ik], d[jk], best, si, sj, sizes[ck]);
        }

        merges.push(Merge {
            cluster_a: ids[bi],
            cluster_b: ids[bj],
            distance: if use_sq { best.sqrt() } else { best },
            size: si + sj,
        });

        // bi becomes the merged cluster; bj retires.
        sizes[bi] = si + sj;
        ids[bi] = n + step;
        active.retain(|&c| c != bj);
    }

    Ok(Dendrogram { n, merges })
}

/// Lance-Williams update of the distance from a merged cluster i∪j to k.
///
/// d(i∪j, k) = αi·d(i,k) + αj·d(j,k) + β·d(i,j) + γ·|d(i,k)-d(j,k)|
fn lance_williams(
    linkage: Linkage,
    d_ik: f64,
    d_jk: f64,
    d_ij: f64,
    si: usize,
    sj: usize,
    sk: usize,
) -> f64 {
    match linkage {
        Linkage::Single => d_ik.min(d_jk),
        Linkage::Complete => d_ik.max(d_jk),
        Linkage::Average => {
            let (ni, nj) = (si as f64, sj as f64);
            (ni * d_ik + nj * d_jk) / (ni + nj)
        }
        Linkage::Ward => {
            let (ni, nj, nk) = (si as f64, sj as f64, sk as f64);
            ((ni + nk) * d_ik + (nj + nk) * d_jk - nk * d_ij) / (ni + nj + nk)
        }
    }
}

impl Dendrogram {
    /// Number of leaves.
    pub fn n_points(&self) -> usize {
        self.n
    }

    /// Merge history in execution order.
    pub fn merges(&self) -> &[Merge] {
        &self.merges
    }

    /// Cuts the tree into exactly `k` flat groups by applying the first
    /// n − k merges. Labels are 0-based in order of first appearance.
    pub fn cut(&self, k: usize) -> Result<Vec<usize>, ConsensusError> {
        let n = self.n;
        if k == 0 || k > n {
            return Err(ConsensusError::invalid_parameter(
                "n_clusters",
                format!("must be between 1 and {n} (number of data points), got {k}"),
            ));
        }

        let mut parent: Vec<usize> = (0..(2 * n)).collect();
        for (step, merge) in self.merges.iter().take(n - k).enumerate() {
            let new_id = n + step;
            let ra = find(&mut parent, merge.cluster_a);
            let rb = find(&mut parent, merge.cluster_b);
            parent[ra] = new_id;
            parent[rb] = new_id;
        }

        let mut root_label = std::collections::HashMap::new();
        let mut labels = Vec::with_capacity(n);
        for i in 0..n {
            let root = find(&mut parent, i);
            let next = root_label.len();
            labels.push(*root_label.entry(root).or_insert(next));
        }
        Ok(labels)
    }
}

fn find(parent: &mut [usize], mut x: usize) -> usize {
    while parent[x] != x {
        parent[x] = parent[parent[x]];
        x = parent[x];
    }
    x
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// Condensed Euclidean distances of 1-D points.
    fn line(points: &[f64]) -> Vec<f64> {
        let n = points.len();
        let mut dist = vec![0.0; condensed_len(n)];
        for i in 0..n {
            for j in (i + 1)..n {
                dist[condensed_index(n, i, j)] = (points[i] - points[j]).abs();
            }
        }
        dist
    }

    #[test]
    fn condensed_layout() {
        assert_eq!(condensed_len(4), 6);
        assert_eq!(condensed_index(4, 0, 1), 0);
        assert_eq!(condensed_index(4, 0, 3), 2);
        assert_eq!(condensed_index(4, 1, 2), 3);
        assert_eq!(condensed_index(4, 2, 3), 5);
    }

    #[test]
    fn every_linkage_finds_two_groups() {
        let dist = line(&[0.0, 0.5, 0.2, 10.0, 10.5, 10.2]);
        for linkage in [
            Linkage::Single,
            Linkage::Complete,
            Linkage::Average,
            Linkage::Ward,
        ] {
            let labels = agglomerate(6, &dist, linkage).unwrap().cut(2).unwrap();
            assert_eq!(labels, vec![0, 0, 0, 1, 1, 1], "{linkage:?}");
        }
    }

    #[test]
    fn dendrogram_structure() {
        let dist = line(&[0.0, 1.0, 5.0]);
        let tree = agglomerate(3, &dist, Linkage::Single).unwrap();
        let merges = tree.merges();
        assert_eq!(merges.len(), 2);
        assert_eq!((merges[0].cluster_a, merges[0].cluster_b), (0, 1));
        assert!((merges[0].distance - 1.0).abs() < 1e-12);
        assert_eq!((merges[1].cluster_a, merges[1].cluster_b), (3, 2));
        assert!((merges[1].distance - 4.0).abs() < 1e-12);
        assert_eq!(merges[1].size, 3);
    }

    #[test]
    fn complete_linkage_uses_farthest_pair() {
        let dist = line(&[0.0, 1.0, 5.0]);
        let tree = agglomerate(3, &dist, Linkage::Complete).unwrap();
        assert!((tree.merges()[1].distance - 5.0).abs() < 1e-12);
    }

    #[test]
    fn ward_heights_are_monotone() {
        let dist = line(&[0.0, 0.3, 1.0, 4.0, 4.2, 9.0, 9.9]);
        let tree = agglomerate(7, &dist, Linkage::Ward).unwrap();
        for w in tree.merges().windows(2) {
            assert!(w[0].distance <= w[1].distance + 1e-12);
        }
    }

    #[test]
    fn cut_extremes() {
        let dist = line(&[0.0, 1.0, 2.0, 3.0]);
        let tree = agglomerate(4, &dist, Linkage::Average).unwrap();
        assert_eq!(tree.cut(4).unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(tree.cut(1).unwrap(), vec![0, 0, 0, 0]);
        assert!(tree.cut(0).is_err());
        assert!(tree.cut(5).is_err());
    }

    #[test]
    fn single_point() {
        let tree = agglomerate(1, &[], Linkage::Ward).unwrap();
        assert!(tree.merges().is_empty());
        assert_eq!(tree.cut(1).unwrap(), vec![0]);
    }

    #[test]
    fn all_zero_distances_are_deterministic() {
        let dist = vec![0.0; condensed_len(5)];
        let a = agglomerate(5, &dist, Linkage::Ward).unwrap().cut(2).unwrap();
        let b = agglomerate(5, &dist, Linkage::Ward).unwrap().cut(2).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(agglomerate(0, &[], Linkage::Ward).is_err());
        assert!(agglomerate(3, &[1.0], Linkage::Ward).is_err());
        assert!(agglomerate(2, &[f64::NAN], Linkage::Ward).is_err());
        assert!(agglomerate(2, &[-1.0], Linkage::Ward).is_err());
    }
}
