//! Recursive (multilevel) consensus clustering.
//!
//! Level 0 puts every observation in one group. To build level `l + 1`,
//! each stable, non-terminal group of level `l` is projected onto a
//! standardized low-dimensional space and run through the full consensus
//! chain once per candidate cluster count. The candidate with the best
//! worst-case cluster score wins (ties: fewer outliers, then smaller k).
//! If the winner prunes fewer points than the outlier cap its labels
//! replace the group's, shifted by a running label offset so every level
//! stays dense and globally unique. Otherwise the group is carried forward
//! unchanged and never attempted again.
//!
//! Points pruned at any level keep [`UNSTABLE`] in every later level.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::base::BaseAlgorithm;
use crate::consensus::{ConsensusClustering, ConsensusConfig};
use crate::error::{validate_points, ConsensusError};
use crate::hierarchy::Linkage;
use crate::labels::{members, outlier_count, stable_labels, Label, UNSTABLE};
use crate::projection::Projector;
use crate::stability::StabilityConfig;

// ── Configuration ─────────────────────────────────────────────────────

/// Parameters of [`multilevel_cluster`] and [`resume`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiLevelConfig {
    /// Cluster counts tried for every group. Default: `[2, 3]`.
    pub candidate_ks: Vec<usize>,
    /// Number of refinement levels below the root. Default: 2.
    pub levels: usize,
    /// Pruning threshold of every consensus pass. Default: 0.3.
    pub threshold: f64,
    /// Target dimension of the projection, clipped to the feature count.
    /// Default: 10.
    pub projection_dim: usize,
    /// A split is accepted only if it prunes fewer points than this.
    /// Default: 100.
    pub outlier_cap: usize,
    /// Groups smaller than this are terminal. Default: 4.
    pub min_group_size: usize,
    pub linkage: Linkage,
    pub algorithm: BaseAlgorithm,
    /// Resampling settings shared by every consensus pass.
    pub consensus: ConsensusConfig,
}

impl Default for MultiLevelConfig {
    fn default() -> Self {
        Self {
            candidate_ks: vec![2, 3],
            levels: 2,
            threshold: 0.3,
            projection_dim: 10,
            outlier_cap: 100,
            min_group_size: 4,
            linkage: Linkage::Ward,
            algorithm: BaseAlgorithm::KMeans,
            consensus: ConsensusConfig::default(),
        }
    }
}

impl MultiLevelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn candidate_ks(mut self, ks: Vec<usize>) -> Self {
        self.candidate_ks = ks;
        self
    }

    pub fn levels(mut self, levels: usize) -> Self {
        self.levels = levels;
        self
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn projection_dim(mut self, dim: usize) -> Self {
        self.projection_dim = dim;
        self
    }

    pub fn outlier_cap(mut self, cap: usize) -> Self {
        self.outlier_cap = cap;
        self
    }

    pub fn min_group_size(mut self, size: usize) -> Self {
        self.min_group_size = size;
        self
    }

    pub fn linkage(mut self, linkage: Linkage) -> Self {
        self.linkage = linkage;
        self
    }

    pub fn algorithm(mut self, algorithm: BaseAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn consensus(mut self, consensus: ConsensusConfig) -> Self {
        self.consensus = consensus;
        self
    }

    /// Rejects configurations that could only fail later.
    pub fn validate(&self) -> Result<(), ConsensusError> {
        if self.candidate_ks.is_empty() {
            return Err(ConsensusError::invalid_parameter(
                "candidate_ks",
                "at least one candidate cluster count is required",
            ));
        }
        if let Some(&k) = self.candidate_ks.iter().find(|&&k| k < 2) {
            return Err(ConsensusError::invalid_parameter(
                "candidate_ks",
                format!("candidate cluster counts must be at least 2, got {k}"),
            ));
        }
        let t = self.threshold;
        if !(0.0..=1.0).contains(&t) {
            return Err(ConsensusError::invalid_parameter(
                "threshold",
                format!("must lie in [0, 1], got {t}"),
            ));
        }
        if self.projection_dim == 0 {
            return Err(ConsensusError::invalid_parameter(
                "projection_dim",
                "must be at least 1",
            ));
        }
        if self.min_group_size < 2 {
            return Err(ConsensusError::invalid_parameter(
                "min_group_size",
                format!("must be at least 2, got {}", self.min_group_size),
            ));
        }
        self.consensus.uncovered.validate()?;
        // Groups too small to resample are carried forward, not rejected.
        self.consensus.resampling.validate_sampling()?;
        Ok(())
    }

    fn pass(&self, k: usize) -> ConsensusClustering {
        ConsensusClustering {
            algorithm: self.algorithm,
            stability: StabilityConfig {
                n_clusters: k,
                threshold: self.threshold,
                linkage: self.linkage,
            },
            consensus: self.consensus.clone(),
        }
    }

    /// Whether candidate `k` can run on a group of `size` members.
    fn feasible(&self, size: usize, k: usize) -> bool {
        k <= size
            && self
                .consensus
                .resampling
                .round_size(size)
                .is_ok_and(|round| round >= k)
    }
}

// ── Hierarchy ─────────────────────────────────────────────────────────

/// Result of evaluating one candidate cluster count on one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSummary {
    pub k: usize,
    /// Minimum score over non-sentinel clusters; `None` if every point was
    /// pruned.
    pub worst_score: Option<f64>,
    pub outliers: usize,
}

impl CandidateSummary {
    /// Strict ordering used for selection.
    fn beats(&self, other: &Self) -> bool {
        let a = self.worst_score.unwrap_or(f64::NEG_INFINITY);
        let b = other.worst_score.unwrap_or(f64::NEG_INFINITY);
        a.total_cmp(&b)
            .then_with(|| other.outliers.cmp(&self.outliers))
            .then_with(|| other.k.cmp(&self.k))
            .is_gt()
    }
}

/// What happened to a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupOutcome {
    /// The chosen candidate was written into the next level.
    Split,
    /// The chosen candidate pruned too many points; the group is terminal.
    Rejected,
    /// No candidate could run on a group this small; the group is terminal.
    TooSmall,
}

/// Log entry for one attempted group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupDecision {
    /// Level the group belongs to.
    pub level: usize,
    pub group: Label,
    pub size: usize,
    pub candidates: Vec<CandidateSummary>,
    pub chosen_k: Option<usize>,
    pub outcome: GroupOutcome,
}

/// One label vector per level plus the decisions that produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelHierarchy {
    levels: Vec<Vec<Label>>,
    /// Labels of each level that will not be split again.
    terminal: Vec<BTreeSet<Label>>,
    decisions: Vec<GroupDecision>,
}

impl LevelHierarchy {
    /// Level 0 only: every observation in group 0.
    pub fn root(n: usize) -> Self {
        Self {
            levels: vec![vec![0; n]],
            terminal: vec![BTreeSet::new()],
            decisions: Vec::new(),
        }
    }

    /// Index of the deepest level.
    pub fn depth(&self) -> usize {
        self.levels.len() - 1
    }

    pub fn n_observations(&self) -> usize {
        self.levels[0].len()
    }

    pub fn level(&self, l: usize) -> Option<&[Label]> {
        self.levels.get(l).map(Vec::as_slice)
    }

    pub fn levels(&self) -> &[Vec<Label>] {
        &self.levels
    }

    pub fn decisions(&self) -> &[GroupDecision] {
        &self.decisions
    }

    /// Groups of level `l` that are carried forward unsplit.
    pub fn terminal_groups(&self, l: usize) -> Option<&BTreeSet<Label>> {
        self.terminal.get(l)
    }

    /// True when every non-sentinel label of level `fine` sits inside
    /// exactly one label of level `coarse`, and points unstable at
    /// `coarse` stay unstable at `fine`.
    pub fn is_refinement(&self, coarse: usize, fine: usize) -> bool {
        let (Some(c), Some(f)) = (self.level(coarse), self.level(fine)) else {
            return false;
        };
        let mut parent = std::collections::BTreeMap::new();
        c.iter().zip(f).all(|(&cl, &fl)| {
            if fl == UNSTABLE {
                return true;
            }
            if cl == UNSTABLE {
                return false;
            }
            *parent.entry(fl).or_insert(cl) == cl
        })
    }

    fn truncate(&mut self, level: usize) {
        self.levels.truncate(level + 1);
        self.terminal.truncate(level + 1);
        self.decisions.retain(|d| d.level < level);
    }
}

// ── Orchestration ─────────────────────────────────────────────────────

/// Builds a hierarchy of `config.levels` levels below the root.
///
/// # Example
///
/// ```
/// use u_consensus::multilevel::{multilevel_cluster, MultiLevelConfig};
/// use u_consensus::projection::IdentityProjector;
/// use u_consensus::consensus::ConsensusConfig;
///
/// let mut data = Vec::new();
/// for i in 0..8 {
///     data.push(vec![i as f64 * 0.1]);
///     data.push(vec![30.0 + i as f64 * 0.1]);
/// }
/// let config = MultiLevelConfig::new()
///     .candidate_ks(vec![2])
///     .levels(1)
///     .consensus(ConsensusConfig::default().rounds(20));
/// let hierarchy = multilevel_cluster(&data, &config, &IdentityProjector).unwrap();
///
/// assert_eq!(hierarchy.depth(), 1);
/// let level = hierarchy.level(1).unwrap();
/// assert_eq!(level[0], 0);
/// assert_eq!(level[1], 1);
/// ```
#[instrument(skip_all, fields(n = data.len(), levels = config.levels))]
pub fn multilevel_cluster(
    data: &[Vec<f64>],
    config: &MultiLevelConfig,
    projector: &dyn Projector,
) -> Result<LevelHierarchy, ConsensusError> {
    resume(data, LevelHierarchy::root(data.len()), 0, config, projector)
}

/// Discards everything below `start_level` and refines from there down to
/// `config.levels`.
#[instrument(skip_all, fields(n = data.len(), start_level, levels = config.levels))]
pub fn resume(
    data: &[Vec<f64>],
    mut hierarchy: LevelHierarchy,
    start_level: usize,
    config: &MultiLevelConfig,
    projector: &dyn Projector,
) -> Result<LevelHierarchy, ConsensusError> {
    if start_level > config.levels {
        return Err(ConsensusError::invalid_parameter(
            "start_level",
            format!("{start_level} exceeds the configured {} levels", config.levels),
        ));
    }
    if start_level > hierarchy.depth() {
        return Err(ConsensusError::invalid_parameter(
            "start_level",
            format!("hierarchy only has levels 0..={}", hierarchy.depth()),
        ));
    }
    validate_points(data)?;
    if hierarchy.n_observations() != data.len() {
        return Err(ConsensusError::DimensionMismatch {
            expected: hierarchy.n_observations(),
            actual: data.len(),
        });
    }
    config.validate()?;

    hierarchy.truncate(start_level);
    for level in start_level..config.levels {
        let (labels, terminal, decisions) = refine_level(
            data,
            &hierarchy.levels[level],
            &hierarchy.terminal[level],
            level,
            config,
            projector,
        )?;
        info!(
            level = level + 1,
            groups = stable_labels(&labels).len(),
            outliers = outlier_count(&labels),
            "level complete"
        );
        hierarchy.levels.push(labels);
        hierarchy.terminal.push(terminal);
        hierarchy.decisions.extend(decisions);
    }
    Ok(hierarchy)
}

type Level = (Vec<Label>, BTreeSet<Label>, Vec<GroupDecision>);

fn refine_level(
    data: &[Vec<f64>],
    current: &[Label],
    terminal: &BTreeSet<Label>,
    level: usize,
    config: &MultiLevelConfig,
    projector: &dyn Projector,
) -> Result<Level, ConsensusError> {
    let mut next = vec![UNSTABLE; current.len()];
    let mut next_terminal = BTreeSet::new();
    let mut decisions = Vec::new();
    let mut offset: Label = 0;

    for group in stable_labels(current) {
        let idx = members(current, group);
        if terminal.contains(&group) {
            next_terminal.insert(offset);
            offset = write_group(&mut next, &idx, None, offset);
            continue;
        }

        let (decision, sub) = split_group(data, &idx, group, level, config, projector)?;
        if decision.outcome != GroupOutcome::Split {
            next_terminal.insert(offset);
        }
        offset = write_group(&mut next, &idx, sub.as_deref(), offset);
        decisions.push(decision);
    }

    Ok((next, next_terminal, decisions))
}

/// Writes a group's labels at `idx` starting from `offset` and returns the
/// next free label. Without sub-labels the group keeps a single label.
fn write_group(next: &mut [Label], idx: &[usize], sub: Option<&[Label]>, offset: Label) -> Label {
    match sub {
        None => {
            for &i in idx {
                next[i] = offset;
            }
            offset + 1
        }
        Some(sub) => {
            for (&i, &l) in idx.iter().zip(sub) {
                next[i] = if l == UNSTABLE { UNSTABLE } else { l + offset };
            }
            offset + stable_labels(sub).len() as Label
        }
    }
}

/// Evaluates every feasible candidate on one group. Returns the accepted
/// sub-labels (dense, sentinel kept) when the split goes through.
fn split_group(
    data: &[Vec<f64>],
    idx: &[usize],
    group: Label,
    level: usize,
    config: &MultiLevelConfig,
    projector: &dyn Projector,
) -> Result<(GroupDecision, Option<Vec<Label>>), ConsensusError> {
    let mut decision = GroupDecision {
        level,
        group,
        size: idx.len(),
        candidates: Vec::new(),
        chosen_k: None,
        outcome: GroupOutcome::TooSmall,
    };

    let ks: Vec<usize> = config
        .candidate_ks
        .iter()
        .copied()
        .filter(|&k| config.feasible(idx.len(), k))
        .collect();
    if idx.len() < config.min_group_size || ks.is_empty() {
        debug!(level, group, size = idx.len(), "group too small to split");
        return Ok((decision, None));
    }

    let subset: Vec<Vec<f64>> = idx.iter().map(|&i| data[i].clone()).collect();
    let projected = projector.project(&subset, config.projection_dim)?;

    let mut best: Option<(CandidateSummary, Vec<Label>)> = None;
    for k in ks {
        let result = config.pass(k).fit_predict(&projected)?;
        let summary = CandidateSummary {
            k,
            worst_score: result.scores.worst(),
            outliers: result.outlier_count(),
        };
        debug!(level, group, k, worst = ?summary.worst_score, outliers = summary.outliers, "candidate evaluated");
        decision.candidates.push(summary.clone());
        if best.as_ref().map_or(true, |(b, _)| summary.beats(b)) {
            best = Some((summary, result.labels));
        }
    }

    let Some((chosen, labels)) = best else {
        return Ok((decision, None));
    };
    decision.chosen_k = Some(chosen.k);
    if chosen.outliers < config.outlier_cap {
        decision.outcome = GroupOutcome::Split;
        Ok((decision, Some(labels)))
    } else {
        warn!(
            level,
            group,
            k = chosen.k,
            outliers = chosen.outliers,
            cap = config.outlier_cap,
            "split rejected, group is terminal"
        );
        decision.outcome = GroupOutcome::Rejected;
        Ok((decision, None))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
