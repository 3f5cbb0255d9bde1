//! Co-association accumulation over resampling rounds.
//!
//! Each round draws a random subset of rows, labels it with one of the
//! caller's base clusterers, and contributes, for every pair of sampled
//! rows, one co-sampling count and (if the pair was split) one disagreement
//! count.
//!
//! # Execution modes
//!
//! - [`Parallelism::Sequential`]: rounds run one after another and are
//!   folded straight into the accumulator.
//! - [`Parallelism::Parallel`]: every round runs as an isolated rayon task
//!   and returns a [`RoundContribution`] value; contributions are summed by a
//!   single reduction step after all tasks finish. Workers never touch the
//!   shared matrices.
//!
//! The random draw of round `r` comes from a ChaCha stream keyed by
//! `(seed, r)`, so both modes produce bit-identical counts for any worker
//! count.
//!
//! # Failure policy
//!
//! A clusterer error aborts everything under [`FailurePolicy::Strict`]; under
//! [`FailurePolicy::Lenient`] the round contributes nothing and is listed in
//! the [`AccumulationReport`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::base::BaseClusterer;
use crate::error::{validate_points, ConsensusError};
use crate::hierarchy::{condensed_index, condensed_len};

// ── Configuration ─────────────────────────────────────────────────────

/// How rounds are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parallelism {
    /// Accumulate directly, one round at a time.
    Sequential,
    /// One task per round on a rayon pool. `workers: None` uses rayon's
    /// default thread count.
    Parallel { workers: Option<usize> },
    /// Same as `Parallel { workers: None }`.
    #[default]
    Auto,
}

/// What a clusterer error inside a round does to the accumulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// The round is dropped and recorded in the report.
    #[default]
    Lenient,
    /// The first failure aborts the accumulation.
    Strict,
}

/// Shared flag that aborts an accumulation in progress.
///
/// Cancellation discards every partial result; nothing is merged.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl PartialEq for CancelToken {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Resampling parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResamplingConfig {
    /// Fraction of rows drawn per round, in (0, 1]. Default: 0.7.
    pub resampling_ratio: f64,
    /// Explicit rows per round; overrides `resampling_ratio` when set.
    pub sample_size: Option<usize>,
    /// Number of rounds. Default: 100.
    pub rounds: usize,
    /// Master seed; round `r` uses stream `r` of this seed. Default: 42.
    pub seed: u64,
    /// Scheduling mode. Default: `Auto`.
    pub parallelism: Parallelism,
    /// Clusterer failure handling. Default: `Lenient`.
    pub failure_policy: FailurePolicy,
    #[serde(skip)]
    pub cancel: Option<CancelToken>,
}

impl Default for ResamplingConfig {
    fn default() -> Self {
        Self {
            resampling_ratio: 0.7,
            sample_size: None,
            rounds: 100,
            seed: 42,
            parallelism: Parallelism::Auto,
            failure_policy: FailurePolicy::Lenient,
            cancel: None,
        }
    }
}

impl ResamplingConfig {
    /// Checks the sampling settings that do not depend on the data size.
    pub(crate) fn validate_sampling(&self) -> Result<(), ConsensusError> {
        match self.sample_size {
            Some(size) if size < 2 => Err(ConsensusError::invalid_parameter(
                "sample_size",
                format!("round size must be at least 2, got {size}"),
            )),
            Some(_) => Ok(()),
            None => {
                let r = self.resampling_ratio;
                if r > 0.0 && r <= 1.0 {
                    Ok(())
                } else {
                    Err(ConsensusError::invalid_parameter(
                        "resampling_ratio",
                        format!("must lie in (0, 1], got {r}"),
                    ))
                }
            }
        }
    }

    /// Rows drawn per round for `n` observations. Fails if the size is
    /// outside `2..=n` or the ratio is outside (0, 1].
    pub fn round_size(&self, n: usize) -> Result<usize, ConsensusError> {
        self.validate_sampling()?;
        let size = match self.sample_size {
            Some(size) => size,
            None => (self.resampling_ratio * n as f64).round_ties_even() as usize,
        };
        if size > n {
            return Err(ConsensusError::invalid_parameter(
                "sample_size",
                format!("round size {size} exceeds the {n} available observations"),
            ));
        }
        if size < 2 {
            return Err(ConsensusError::invalid_parameter(
                "sample_size",
                format!("round size must be at least 2, got {size}"),
            ));
        }
        Ok(size)
    }

    fn validate(&self, n: usize, n_clusterers: usize) -> Result<usize, ConsensusError> {
        if n_clusterers == 0 {
            return Err(ConsensusError::invalid_parameter(
                "clusterers",
                "at least one base clusterer is required",
            ));
        }
        if let Parallelism::Parallel { workers: Some(0) } = self.parallelism {
            return Err(ConsensusError::invalid_parameter(
                "workers",
                "must be at least 1",
            ));
        }
        self.round_size(n)
    }
}

// ── Rounds and contributions ──────────────────────────────────────────

/// One randomized trial: which rows, which clusterer, which seed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResamplingRound {
    pub index: usize,
    /// Selected rows, ascending.
    pub indices: Vec<usize>,
    /// Position of the chosen clusterer in the caller's list.
    pub clusterer: usize,
    /// Seed handed to the clusterer.
    pub clusterer_seed: u64,
}

impl ResamplingRound {
    /// Draws round `index` deterministically from `seed`.
    pub fn draw(index: usize, n: usize, size: usize, n_clusterers: usize, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        rng.set_stream(index as u64);
        let mut indices = rand::seq::index::sample(&mut rng, n, size).into_vec();
        indices.sort_unstable();
        let clusterer = rng.gen_range(0..n_clusterers);
        let clusterer_seed = rng.gen();
        Self {
            index,
            indices,
            clusterer,
            clusterer_seed,
        }
    }
}

/// Pairwise increment implied by one round for rows `i < j`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairIncrement {
    pub i: usize,
    pub j: usize,
    /// 1 if the pair was split in this round, else 0.
    pub disagreement: u32,
}

/// Sparse result of one round: the sampled rows and their labels.
///
/// The pair increments are implied and expanded by [`pairs`](Self::pairs);
/// storing the labels keeps a contribution O(size) instead of O(size²).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundContribution {
    pub round: usize,
    pub indices: Vec<usize>,
    pub labels: Vec<usize>,
}

impl RoundContribution {
    /// Every unordered pair of sampled rows with its disagreement bit.
    pub fn pairs(&self) -> impl Iterator<Item = PairIncrement> + '_ {
        let m = self.indices.len();
        (0..m).flat_map(move |a| {
            ((a + 1)..m).map(move |b| PairIncrement {
                i: self.indices[a],
                j: self.indices[b],
                disagreement: u32::from(self.labels[a] != self.labels[b]),
            })
        })
    }
}

/// A round that contributed nothing because its clusterer failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundFailure {
    pub round: usize,
    pub clusterer: String,
    pub message: String,
}

/// Summary of an accumulation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccumulationReport {
    pub rounds_requested: usize,
    pub rounds_completed: usize,
    /// Rounds dropped under the lenient policy, in round order.
    pub failures: Vec<RoundFailure>,
}

impl AccumulationReport {
    /// Failed round count per clusterer name.
    pub fn failure_summary(&self) -> BTreeMap<String, usize> {
        let mut summary = BTreeMap::new();
        for f in &self.failures {
            *summary.entry(f.clusterer.clone()).or_insert(0) += 1;
        }
        summary
    }
}

// ── Accumulator ───────────────────────────────────────────────────────

/// Disagreement and co-sampling counts for every pair of observations.
///
/// Both matrices are symmetric with a zero diagonal and are stored as
/// condensed upper triangles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoAssociation {
    n: usize,
    disagreement: Vec<u32>,
    co_sampled: Vec<u32>,
    rounds: usize,
}

impl CoAssociation {
    /// All-zero accumulator over `n` observations.
    pub fn new(n: usize) -> Self {
        Self {
            n,
            disagreement: vec![0; condensed_len(n)],
            co_sampled: vec![0; condensed_len(n)],
            rounds: 0,
        }
    }

    pub fn n(&self) -> usize {
        self.n
    }

    /// Number of contributions absorbed.
    pub fn rounds(&self) -> usize {
        self.rounds
    }

    /// Rounds in which `i` and `j` were co-sampled and split.
    pub fn disagreement(&self, i: usize, j: usize) -> u32 {
        self.cell(&self.disagreement, i, j)
    }

    /// Rounds in which `i` and `j` were both sampled.
    pub fn co_sampled(&self, i: usize, j: usize) -> u32 {
        self.cell(&self.co_sampled, i, j)
    }

    fn cell(&self, values: &[u32], i: usize, j: usize) -> u32 {
        match i.cmp(&j) {
            std::cmp::Ordering::Equal => 0,
            std::cmp::Ordering::Less => values[condensed_index(self.n, i, j)],
            std::cmp::Ordering::Greater => values[condensed_index(self.n, j, i)],
        }
    }

    pub(crate) fn condensed(&self) -> (&[u32], &[u32]) {
        (&self.disagreement, &self.co_sampled)
    }

    /// Folds one round into the counts.
    pub fn absorb(&mut self, contribution: &RoundContribution) {
        for p in contribution.pairs() {
            let c = condensed_index(self.n, p.i, p.j);
            self.co_sampled[c] += 1;
            self.disagreement[c] += p.disagreement;
        }
        self.rounds += 1;
    }

    /// Adds another accumulator over the same observations.
    pub fn merge(&mut self, other: &CoAssociation) -> Result<(), ConsensusError> {
        if other.n != self.n {
            return Err(ConsensusError::DimensionMismatch {
                expected: self.n,
                actual: other.n,
            });
        }
        for (a, b) in self.disagreement.iter_mut().zip(&other.disagreement) {
            *a += b;
        }
        for (a, b) in self.co_sampled.iter_mut().zip(&other.co_sampled) {
            *a += b;
        }
        self.rounds += other.rounds;
        Ok(())
    }
}

/// Counts plus the report of how they were obtained.
#[derive(Debug, Clone)]
pub struct Accumulation {
    pub co_association: CoAssociation,
    pub report: AccumulationReport,
}

enum RoundOutcome {
    Done(RoundContribution),
    Failed(RoundFailure),
    Cancelled,
}

fn execute_round(
    data: &[Vec<f64>],
    clusterers: &[Box<dyn BaseClusterer>],
    round: &ResamplingRound,
    cancel: Option<&CancelToken>,
) -> RoundOutcome {
    if cancel.is_some_and(CancelToken::is_cancelled) {
        return RoundOutcome::Cancelled;
    }

    let clusterer = &clusterers[round.clusterer];
    let subset: Vec<Vec<f64>> = round.indices.iter().map(|&i| data[i].clone()).collect();
    let failure = |message: String| {
        RoundOutcome::Failed(RoundFailure {
            round: round.index,
            clusterer: clusterer.name().to_string(),
            message,
        })
    };

    match clusterer.fit_predict(&subset, round.clusterer_seed) {
        Ok(labels) if labels.len() == subset.len() => {
            debug!(
                round = round.index,
                clusterer = clusterer.name(),
                size = subset.len(),
                "round complete"
            );
            RoundOutcome::Done(RoundContribution {
                round: round.index,
                indices: round.indices.clone(),
                labels,
            })
        }
        Ok(labels) => failure(format!(
            "returned {} labels for {} rows",
            labels.len(),
            subset.len()
        )),
        Err(e) => failure(e.to_string()),
    }
}

/// Runs `config.rounds` resampling rounds and accumulates their counts.
///
/// Configuration errors (empty clusterer list, bad ratio, round size
/// outside `2..=n`) are returned before any round runs.
#[instrument(skip_all, fields(n = data.len(), rounds = config.rounds))]
pub fn accumulate(
    data: &[Vec<f64>],
    clusterers: &[Box<dyn BaseClusterer>],
    config: &ResamplingConfig,
) -> Result<Accumulation, ConsensusError> {
    let n = data.len();
    validate_points(data)?;
    let size = config.validate(n, clusterers.len())?;
    let cancel = config.cancel.as_ref();

    let draw = |r: usize| ResamplingRound::draw(r, n, size, clusterers.len(), config.seed);

    let mut co_association = CoAssociation::new(n);
    let mut report = AccumulationReport {
        rounds_requested: config.rounds,
        ..AccumulationReport::default()
    };

    let workers = match config.parallelism {
        Parallelism::Sequential => {
            for r in 0..config.rounds {
                let outcome = execute_round(data, clusterers, &draw(r), cancel);
                fold_outcome(outcome, config.failure_policy, &mut co_association, &mut report)?;
            }
            info!(
                completed = report.rounds_completed,
                failed = report.failures.len(),
                "sequential accumulation complete"
            );
            return Ok(Accumulation {
                co_association,
                report,
            });
        }
        Parallelism::Parallel { workers } => workers.unwrap_or(0),
        Parallelism::Auto => 0,
    };

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| ConsensusError::ComputationFailed {
            operation: "thread pool construction".into(),
            detail: e.to_string(),
        })?;

    let outcomes: Vec<RoundOutcome> = pool.install(|| {
        (0..config.rounds)
            .into_par_iter()
            .map(|r| execute_round(data, clusterers, &draw(r), cancel))
            .collect()
    });

    if cancel.is_some_and(CancelToken::is_cancelled) {
        return Err(ConsensusError::Cancelled);
    }
    for outcome in outcomes {
        fold_outcome(outcome, config.failure_policy, &mut co_association, &mut report)?;
    }

    info!(
        workers = pool.current_num_threads(),
        completed = report.rounds_completed,
        failed = report.failures.len(),
        "parallel accumulation complete"
    );
    Ok(Accumulation {
        co_association,
        report,
    })
}

fn fold_outcome(
    outcome: RoundOutcome,
    policy: FailurePolicy,
    co_association: &mut CoAssociation,
    report: &mut AccumulationReport,
) -> Result<(), ConsensusError> {
    match outcome {
        RoundOutcome::Done(contribution) => {
            co_association.absorb(&contribution);
            report.rounds_completed += 1;
            Ok(())
        }
        RoundOutcome::Failed(f) => match policy {
            FailurePolicy::Strict => Err(ConsensusError::BaseAlgorithm {
                clusterer: f.clusterer,
                round: f.round,
                message: f.message,
            }),
            FailurePolicy::Lenient => {
                warn!(round = f.round, clusterer = %f.clusterer, message = %f.message, "round dropped");
                report.failures.push(f);
                Ok(())
            }
        },
        RoundOutcome::Cancelled => Err(ConsensusError::Cancelled),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
