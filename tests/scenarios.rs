//! End-to-end consensus clustering on small synthetic datasets.

use u_consensus::accumulator::Parallelism;
use u_consensus::base::{BaseClusterer, KMeansClusterer};
use u_consensus::consensus::{build_consensus_matrix, ConsensusConfig};
use u_consensus::labels::{outlier_count, stable_labels, UNSTABLE};
use u_consensus::multilevel::{multilevel_cluster, GroupOutcome, MultiLevelConfig};
use u_consensus::projection::PcaProjector;
use u_consensus::scoring::score_clusters;
use u_consensus::stability::{cluster_from_consensus, StabilityConfig};

const OFFSETS: [(f64, f64); 6] = [
    (0.0, 0.0),
    (0.4, 0.5),
    (0.8, -0.3),
    (1.2, 0.2),
    (0.3, -0.6),
    (1.0, 0.7),
];

/// Cluster A near the origin, cluster B its mirror image around x = 5.
fn two_clusters() -> Vec<Vec<f64>> {
    let a = OFFSETS.iter().map(|&(x, y)| vec![x, y]);
    let b = OFFSETS.iter().map(|&(x, y)| vec![10.0 - x, y]);
    a.chain(b).collect()
}

fn kmeans2() -> Vec<Box<dyn BaseClusterer>> {
    vec![Box::new(KMeansClusterer::new(2))]
}

fn config() -> ConsensusConfig {
    ConsensusConfig::default().rounds(100).resampling_ratio(0.8)
}

#[test]
fn two_separated_clusters_are_recovered() {
    let data = two_clusters();
    let run = build_consensus_matrix(&data, &kmeans2(), &config()).unwrap();
    let labels = cluster_from_consensus(&run.matrix, &StabilityConfig::new(2).threshold(0.3)).unwrap();
    let scores = score_clusters(&run.matrix, &labels).unwrap();

    assert_eq!(stable_labels(&labels), vec![0, 1]);
    assert_eq!(outlier_count(&labels), 0);
    assert_eq!(&labels[..6], &[0; 6]);
    assert_eq!(&labels[6..], &[1; 6]);
    assert!(scores.get(0).unwrap() > 0.8);
    assert!(scores.get(1).unwrap() > 0.8);
    assert_eq!(scores.get(UNSTABLE), Some(1.0));
    assert_eq!(run.report.rounds_completed, 100);
}

#[test]
fn point_between_clusters_is_marked_unstable() {
    // Equidistant from both clusters: it joins either side about half the
    // time, so its mean disagreement with any group is near 0.5.
    let mut data = two_clusters();
    data.push(vec![5.0, 6.0]);

    let run = build_consensus_matrix(&data, &kmeans2(), &config()).unwrap();
    let labels = cluster_from_consensus(&run.matrix, &StabilityConfig::new(2)).unwrap();

    assert_eq!(labels[12], UNSTABLE);
    assert_eq!(&labels[..6], &[0; 6]);
    assert_eq!(&labels[6..12], &[1; 6]);

    let scores = score_clusters(&run.matrix, &labels).unwrap();
    assert_eq!(scores.get(UNSTABLE), Some(1.0));
    assert!(scores.worst().unwrap() > 0.8);
}

#[test]
fn parallel_and_sequential_runs_agree_end_to_end() {
    let data = two_clusters();
    let sequential = config().parallelism(Parallelism::Sequential);
    let parallel = config().parallelism(Parallelism::Parallel { workers: Some(3) });
    let a = build_consensus_matrix(&data, &kmeans2(), &sequential).unwrap();
    let b = build_consensus_matrix(&data, &kmeans2(), &parallel).unwrap();
    assert_eq!(a.co_association, b.co_association);
    assert_eq!(a.matrix, b.matrix);
}

/// Two top clusters (features 0..3), each holding two subclusters
/// (feature 3).
fn nested_clusters() -> Vec<Vec<f64>> {
    let mut data = Vec::new();
    for top in 0..2 {
        for sub in 0..2 {
            for i in 0..8 {
                let noise = ((i * 7 + top * 3 + sub) % 5) as f64 * 0.05 - 0.1;
                let t = top as f64 * 20.0;
                data.push(vec![t, t, t, sub as f64 * 10.0 + noise]);
            }
        }
    }
    data
}

#[test]
fn multilevel_refines_nested_clusters() {
    let data = nested_clusters();
    let config = MultiLevelConfig::new()
        .candidate_ks(vec![2, 3])
        .levels(2)
        .threshold(0.3)
        .projection_dim(2)
        .outlier_cap(5);
    let hierarchy = multilevel_cluster(&data, &config, &PcaProjector).unwrap();

    assert_eq!(hierarchy.depth(), 2);
    assert_eq!(hierarchy.level(0).unwrap(), &[0; 32]);

    let level1 = hierarchy.level(1).unwrap();
    assert_eq!(stable_labels(level1), vec![0, 1]);
    assert_eq!(&level1[..16], &[0; 16]);
    assert_eq!(&level1[16..], &[1; 16]);

    let level2 = hierarchy.level(2).unwrap();
    assert_eq!(stable_labels(level2), vec![0, 1, 2, 3]);
    for (block, label) in level2.chunks(8).zip(0..) {
        assert_eq!(block, &[label; 8]);
    }

    assert!(hierarchy.is_refinement(0, 1));
    assert!(hierarchy.is_refinement(1, 2));
    assert!(!hierarchy.is_refinement(2, 1));

    // One decision for the root, one for each top cluster.
    let decisions = hierarchy.decisions();
    assert_eq!(decisions.len(), 3);
    assert!(decisions.iter().all(|d| d.outcome == GroupOutcome::Split));
    assert!(decisions.iter().all(|d| d.chosen_k == Some(2)));
    assert!(decisions.iter().all(|d| d.candidates.len() == 2));
}
