//! The sample-consensus loop.
//!
//! This implementation is deliberately minimal and does not panic on
//! failure: degenerate subsets and failed preliminary fits are skipped (the
//! iteration still counts toward the budget), and only exhausting the budget
//! without ever producing a candidate is an error.

use log::debug;
use thiserror::Error;

use super::sample::{SamplingStrategy, SubsetSampler};
use super::score::{CandidateScore, ScoringRule};
use super::{ConsensusOptions, RobustMethod};
use crate::Real;

/// Errors raised by [`consensus_fit`].
#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("need at least {needed} readings, got {got}")]
    TooFewReadings { needed: usize, got: usize },
    #[error("the selected sampling strategy requires quality scores")]
    QualityScoresRequired,
    #[error("quality scores length {got} does not match reading count {expected}")]
    QualityScoresLength { expected: usize, got: usize },
    #[error("no consensus model found within {0} iterations")]
    Exhausted(usize),
}

/// Model fitter driven by the consensus loop.
///
/// Implement this for your measurement models; the engine stays agnostic of
/// what the model is (a position, a power/path-loss pair, ...).
pub trait SampleConsensusProblem {
    /// The candidate model type.
    type Model: Clone;

    /// Total number of readings.
    fn num_readings(&self) -> usize;

    /// Size of the preliminary subset drawn each iteration.
    fn subset_size(&self) -> usize;

    /// Fit a candidate model on exactly the given subset.
    ///
    /// Return `None` if the subset is degenerate or the fit fails; the
    /// iteration is skipped, not fatal.
    fn fit(&self, subset: &[usize]) -> Option<Self::Model>;

    /// Non-negative residual of one reading against a candidate model, in
    /// the same units as the inlier threshold.
    fn residual(&self, model: &Self::Model, index: usize) -> Real;

    /// Optional cheap degeneracy check run before fitting.
    fn is_degenerate(&self, _subset: &[usize]) -> bool {
        false
    }
}

/// Notifications emitted while the loop runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConsensusEvent {
    /// One sampling attempt completed (1-based iteration index).
    NextIteration(usize),
    /// Normalized progress crossed the configured delta; values are
    /// monotonically non-decreasing within one run.
    Progress(Real),
}

/// Output of a successful consensus run.
#[derive(Debug, Clone)]
pub struct ConsensusOutcome<M> {
    /// Best candidate model found.
    pub model: M,
    /// Indices of readings accepted as inliers of the best candidate.
    pub inliers: Vec<usize>,
    /// Per-reading inlier mask, parallel to the reading set.
    pub inlier_mask: Vec<bool>,
    /// Per-reading residuals against the best candidate.
    pub residuals: Vec<Real>,
    /// Number of iterations actually performed.
    pub iterations: usize,
    /// Score of the best candidate.
    pub score: CandidateScore,
}

/// Run the consensus loop with the sampling/scoring policies of `method`.
pub fn consensus_fit<P: SampleConsensusProblem>(
    problem: &P,
    method: RobustMethod,
    opts: &ConsensusOptions,
    quality: Option<&[Real]>,
    observer: &mut dyn FnMut(ConsensusEvent),
) -> Result<ConsensusOutcome<P::Model>, ConsensusError> {
    consensus_fit_with_policy(
        problem,
        method.sampling(),
        method.scoring(opts.threshold),
        opts,
        quality,
        observer,
    )
}

/// Run the consensus loop with an explicit policy combination.
pub fn consensus_fit_with_policy<P: SampleConsensusProblem>(
    problem: &P,
    strategy: SamplingStrategy,
    rule: ScoringRule,
    opts: &ConsensusOptions,
    quality: Option<&[Real]>,
    observer: &mut dyn FnMut(ConsensusEvent),
) -> Result<ConsensusOutcome<P::Model>, ConsensusError> {
    let n = problem.num_readings();
    let m = problem.subset_size();
    if n < m {
        return Err(ConsensusError::TooFewReadings { needed: m, got: n });
    }
    if strategy != SamplingStrategy::Uniform {
        let q = quality.ok_or(ConsensusError::QualityScoresRequired)?;
        if q.len() != n {
            return Err(ConsensusError::QualityScoresLength {
                expected: n,
                got: q.len(),
            });
        }
    }

    let mut sampler = SubsetSampler::new(strategy, n, quality, opts.seed);

    // Median scoring has no inlier ratio to adapt on: its bound is derived
    // once from the confidence at the 0.5 worst-case inlier ratio and the
    // loop always runs to that bound.
    let mut bound = match rule {
        ScoringRule::MedianOfSquares => {
            iteration_bound(opts.confidence, 0.5, m, 0, opts.max_iterations)
        }
        _ => opts.max_iterations,
    };

    let mut best: Option<(P::Model, CandidateScore, Vec<Real>)> = None;
    let mut subset: Vec<usize> = Vec::with_capacity(m);
    let mut iteration = 0usize;
    let mut last_progress = 0.0;

    while iteration < bound {
        sampler.draw(iteration, m, &mut subset);
        iteration += 1;

        if !problem.is_degenerate(&subset) {
            if let Some(model) = problem.fit(&subset) {
                let residuals: Vec<Real> =
                    (0..n).map(|i| problem.residual(&model, i)).collect();
                let score = rule.score(&residuals);
                let improved = best
                    .as_ref()
                    .map_or(true, |(_, best_score, _)| rule.better(&score, best_score));
                if improved {
                    debug!(
                        "consensus: new best candidate at iteration {} ({} inliers, cost {:.6})",
                        iteration, score.inlier_count, score.cost
                    );
                    if let Some(ratio) = rule.inlier_ratio(&score, n) {
                        bound = iteration_bound(
                            opts.confidence,
                            ratio,
                            m,
                            iteration,
                            opts.max_iterations,
                        );
                    }
                    best = Some((model, score, residuals));
                }
            }
        }

        observer(ConsensusEvent::NextIteration(iteration));
        let progress = (iteration as Real / bound.max(1) as Real)
            .min(1.0)
            .max(last_progress);
        if progress - last_progress >= opts.progress_delta {
            last_progress = progress;
            observer(ConsensusEvent::Progress(progress));
        }
    }

    let (model, score, residuals) = best.ok_or(ConsensusError::Exhausted(iteration))?;
    let inlier_mask = rule.inlier_mask(&residuals, m, score.cost);
    let inliers: Vec<usize> = inlier_mask
        .iter()
        .enumerate()
        .filter_map(|(i, &keep)| keep.then_some(i))
        .collect();

    Ok(ConsensusOutcome {
        model,
        inliers,
        inlier_mask,
        residuals,
        iterations: iteration,
        score,
    })
}

/// Iteration bound for the target confidence given the current inlier ratio:
/// `log(1 − confidence) / log(1 − ratio^subset_size)`, never below the
/// iterations already spent and never above the user ceiling.
fn iteration_bound(
    confidence: Real,
    inlier_ratio: Real,
    subset_size: usize,
    iterations_so_far: usize,
    max_iterations: usize,
) -> usize {
    if confidence <= 0.0 || inlier_ratio <= 0.0 {
        return max_iterations;
    }

    let denom = (1.0 - inlier_ratio.powf(subset_size as Real)).max(1e-12).ln();
    if denom >= 0.0 {
        return max_iterations;
    }

    let bound = ((1.0 - confidence).ln() / denom).ceil() as usize;
    bound.clamp(iterations_so_far.max(1), max_iterations)
}
