//! Preliminary-subset sampling strategies.

use rand::prelude::IndexedRandom;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::Real;

/// How preliminary subsets are drawn each iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SamplingStrategy {
    /// Uniformly at random, without replacement.
    Uniform,
    /// Random without replacement, biased by normalized quality score:
    /// higher-quality readings are picked with higher probability.
    QualityWeighted,
    /// Deterministic growing window over readings ordered by quality
    /// (descending, ties broken by ascending original index): iteration `t`
    /// samples from the best `subset_size + t` readings, always including
    /// the newest entrant of the window.
    ProgressiveOrdered,
}

/// Stateful subset sampler; one instance per consensus run.
pub(crate) struct SubsetSampler {
    strategy: SamplingStrategy,
    rng: StdRng,
    /// All indices, `0..n`.
    indices: Vec<usize>,
    /// Indices sorted by quality (descending, stable), for the
    /// quality-driven strategies; empty for `Uniform`.
    order: Vec<usize>,
    /// Raw quality scores, for `QualityWeighted`; empty otherwise.
    weights: Vec<Real>,
}

impl SubsetSampler {
    /// Build a sampler. `quality` must already be validated (finite, length
    /// `n`) for the non-uniform strategies.
    pub(crate) fn new(
        strategy: SamplingStrategy,
        n: usize,
        quality: Option<&[Real]>,
        seed: u64,
    ) -> Self {
        let indices: Vec<usize> = (0..n).collect();
        let (order, weights) = match (strategy, quality) {
            (SamplingStrategy::Uniform, _) => (Vec::new(), Vec::new()),
            (_, Some(q)) => {
                let mut order = indices.clone();
                order.sort_by(|&a, &b| {
                    q[b].partial_cmp(&q[a])
                        .unwrap_or(Ordering::Equal)
                        .then(a.cmp(&b))
                });
                let weights = if strategy == SamplingStrategy::QualityWeighted {
                    normalize(q)
                } else {
                    Vec::new()
                };
                (order, weights)
            }
            // The engine rejects quality-driven strategies without scores
            // before constructing a sampler.
            (_, None) => (indices.clone(), Vec::new()),
        };
        Self {
            strategy,
            rng: StdRng::seed_from_u64(seed),
            indices,
            order,
            weights,
        }
    }

    /// Draw a subset of `m` distinct indices for 0-based `iteration`.
    pub(crate) fn draw(&mut self, iteration: usize, m: usize, out: &mut Vec<usize>) {
        out.clear();
        match self.strategy {
            SamplingStrategy::Uniform => {
                out.extend(self.indices.as_slice().choose_multiple(&mut self.rng, m));
            }
            SamplingStrategy::QualityWeighted => {
                let mut pool: Vec<usize> = self.indices.clone();
                let mut weights: Vec<Real> = self.weights.clone();
                for _ in 0..m {
                    let total: Real = weights.iter().sum();
                    let pick = if total > 0.0 {
                        let mut u = self.rng.random::<Real>() * total;
                        let mut chosen = pool.len() - 1;
                        for (j, w) in weights.iter().enumerate() {
                            if u < *w {
                                chosen = j;
                                break;
                            }
                            u -= *w;
                        }
                        chosen
                    } else {
                        self.rng.random_range(0..pool.len())
                    };
                    out.push(pool.swap_remove(pick));
                    weights.swap_remove(pick);
                }
            }
            SamplingStrategy::ProgressiveOrdered => {
                let n = self.order.len();
                let window = (m + iteration).min(n);
                if window <= m {
                    out.extend_from_slice(&self.order[..m]);
                } else {
                    // Newest entrant of the window plus m-1 from the rest.
                    out.extend(
                        self.order[..window - 1]
                            .choose_multiple(&mut self.rng, m - 1),
                    );
                    out.push(self.order[window - 1]);
                }
            }
        }
    }
}

/// Scale scores into non-negative sampling weights.
fn normalize(scores: &[Real]) -> Vec<Real> {
    let min = scores.iter().cloned().fold(Real::INFINITY, Real::min);
    let shift = if min < 0.0 { -min } else { 0.0 };
    // A small floor keeps zero-quality readings reachable.
    scores.iter().map(|s| s + shift + 1e-9).collect()
}
