//! # u-consensus
//!
//! Stability-aware consensus clustering engine with C FFI bindings.
//!
//! Instead of trusting one run of a clustering algorithm, u-consensus
//! clusters many random subsamples of a feature matrix, records how often
//! each pair of observations is split apart, and uses that disagreement
//! rate as a distance. Agglomerating the consensus matrix yields labels;
//! observations whose in-group disagreement stays high are marked unstable
//! (label −1), and every group gets a stability score.
//!
//! ## Modules
//!
//! - [`base`] — Base clusterer contract plus K-Means and Gaussian mixture adapters
//! - [`kmeans`] — K-Means++ with Lloyd refinement and restarts
//! - [`mixture`] — Diagonal-covariance Gaussian mixture (EM)
//! - [`accumulator`] — Resampling rounds, co-association counts, sequential/parallel accumulation
//! - [`consensus`] — Consensus matrix, uncovered-pair policy, one-shot façade
//! - [`hierarchy`] — Agglomerative clustering on a precomputed distance matrix (4 linkages)
//! - [`stability`] — Dendrogram cut with instability pruning
//! - [`scoring`] — Per-cluster stability scores
//! - [`labels`] — Unstable sentinel, dense renumbering, label bookkeeping
//! - [`pca`] / [`projection`] — Standardized PCA projection used between levels
//! - [`multilevel`] — Recursive refinement into a level hierarchy
//! - [`enrichment`] — Cluster enrichment against reference categories (Fisher, χ²)
//! - [`special`] — Log-gamma, incomplete gamma, Fisher exact test
//! - [`ffi`] — C FFI bindings
//! - [`error`] — Error types
//!
//! ## Quick Start
//!
//! ```
//! use u_consensus::base::{BaseClusterer, KMeansClusterer};
//! use u_consensus::consensus::{build_consensus_matrix, ConsensusConfig};
//! use u_consensus::scoring::score_clusters;
//! use u_consensus::stability::{cluster_from_consensus, StabilityConfig};
//!
//! let mut data = Vec::new();
//! for i in 0..6 {
//!     data.push(vec![i as f64 * 0.1, 0.0]);
//! }
//! for i in 0..6 {
//!     data.push(vec![10.0 + i as f64 * 0.1, 0.0]);
//! }
//!
//! let clusterers: Vec<Box<dyn BaseClusterer>> = vec![Box::new(KMeansClusterer::new(2))];
//! let run = build_consensus_matrix(&data, &clusterers, &ConsensusConfig::default().rounds(50)).unwrap();
//! let labels = cluster_from_consensus(&run.matrix, &StabilityConfig::new(2)).unwrap();
//! let scores = score_clusters(&run.matrix, &labels).unwrap();
//!
//! assert_eq!(&labels[..6], &[0; 6]);
//! assert_eq!(&labels[6..], &[1; 6]);
//! assert!(scores.worst().unwrap() > 0.8);
//! ```

pub mod accumulator;
pub mod base;
pub mod consensus;
pub mod enrichment;
pub mod error;
pub mod ffi;
pub mod hierarchy;
pub mod kmeans;
pub mod labels;
pub mod mixture;
pub mod multilevel;
pub mod pca;
pub mod projection;
pub mod scoring;
pub mod special;
pub mod stability;
