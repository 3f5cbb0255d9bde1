//! Configuration and result types load from and save to JSON.

use u_consensus::accumulator::{FailurePolicy, Parallelism};
use u_consensus::base::BaseAlgorithm;
use u_consensus::consensus::{ConsensusClustering, UncoveredPolicy};
use u_consensus::hierarchy::Linkage;
use u_consensus::multilevel::{multilevel_cluster, LevelHierarchy, MultiLevelConfig};
use u_consensus::projection::IdentityProjector;

#[test]
fn multilevel_config_from_partial_json() {
    let json = r#"{
        "candidate_ks": [2, 3, 4],
        "levels": 3,
        "linkage": "average",
        "algorithm": "gaussian_mixture",
        "consensus": { "rounds": 25, "parallelism": "sequential", "uncovered": "exclude" }
    }"#;
    let config: MultiLevelConfig = serde_json::from_str(json).unwrap();

    assert_eq!(config.candidate_ks, vec![2, 3, 4]);
    assert_eq!(config.levels, 3);
    assert_eq!(config.linkage, Linkage::Average);
    assert_eq!(config.algorithm, BaseAlgorithm::GaussianMixture);
    assert_eq!(config.consensus.resampling.rounds, 25);
    assert_eq!(config.consensus.resampling.parallelism, Parallelism::Sequential);
    assert_eq!(config.consensus.uncovered, UncoveredPolicy::Exclude);
    // Untouched fields keep their defaults.
    assert_eq!(config.threshold, 0.3);
    assert_eq!(config.outlier_cap, 100);
    assert_eq!(config.consensus.resampling.resampling_ratio, 0.7);
    assert_eq!(config.consensus.resampling.failure_policy, FailurePolicy::Lenient);
}

#[test]
fn facade_round_trip() {
    let clustering = ConsensusClustering::new(4)
        .linkage(Linkage::Complete)
        .threshold(0.25)
        .rounds(40)
        .seed(7);
    let json = serde_json::to_string(&clustering).unwrap();
    let back: ConsensusClustering = serde_json::from_str(&json).unwrap();
    assert_eq!(back, clustering);
}

#[test]
fn explicit_fill_and_parallel_workers() {
    let json = r#"{ "uncovered": { "fill": 1.0 }, "parallelism": { "parallel": { "workers": 4 } } }"#;
    let config: u_consensus::consensus::ConsensusConfig = serde_json::from_str(json).unwrap();
    assert_eq!(config.uncovered, UncoveredPolicy::Fill(1.0));
    assert_eq!(
        config.resampling.parallelism,
        Parallelism::Parallel { workers: Some(4) }
    );
}

#[test]
fn hierarchy_survives_persistence() {
    let mut data = Vec::new();
    for i in 0..6 {
        data.push(vec![i as f64 * 0.1]);
        data.push(vec![50.0 + i as f64 * 0.1]);
    }
    let config = MultiLevelConfig::new()
        .candidate_ks(vec![2])
        .levels(1)
        .consensus(u_consensus::consensus::ConsensusConfig::default().rounds(15));
    let hierarchy = multilevel_cluster(&data, &config, &IdentityProjector).unwrap();

    let json = serde_json::to_string(&hierarchy).unwrap();
    let back: LevelHierarchy = serde_json::from_str(&json).unwrap();
    assert_eq!(back.levels(), hierarchy.levels());
    assert_eq!(back.terminal_groups(1), hierarchy.terminal_groups(1));
    assert_eq!(back.decisions().len(), hierarchy.decisions().len());
}
