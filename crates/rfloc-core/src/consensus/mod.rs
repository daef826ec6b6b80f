//! Generic, model-agnostic sample-consensus estimation.
//!
//! To use this module, implement [`SampleConsensusProblem`] for your model
//! fitter and call [`consensus_fit`] with a [`RobustMethod`] and some
//! [`ConsensusOptions`].
//!
//! The robust families are decomposed into two orthogonal policies instead of
//! one implementation per method: a [`SamplingStrategy`] (how preliminary
//! subsets are drawn) and a [`ScoringRule`] (how a candidate model is scored
//! against all readings). [`consensus_fit_with_policy`] accepts any
//! combination directly.

pub mod engine;
pub mod sample;
pub mod score;

pub use engine::{
    consensus_fit, consensus_fit_with_policy, ConsensusError, ConsensusEvent, ConsensusOutcome,
    SampleConsensusProblem,
};
pub use sample::SamplingStrategy;
pub use score::{CandidateScore, ScoringRule};

use serde::{Deserialize, Serialize};

use crate::Real;

/// Robust-regression family selector.
///
/// Each method resolves to a sampling strategy and a scoring rule; see
/// [`RobustMethod::sampling`] and [`RobustMethod::scoring`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RobustMethod {
    /// Uniform sampling, inlier counting against a fixed threshold.
    #[default]
    Ransac,
    /// Uniform sampling, least-median-of-squares cost; no threshold.
    Lmeds,
    /// Uniform sampling, bounded (truncated quadratic) cost.
    Msac,
    /// Quality-ordered progressive sampling, inlier counting.
    Prosac,
    /// Quality-ordered progressive sampling, least-median cost.
    Promeds,
}

impl RobustMethod {
    /// Sampling strategy used by this method.
    pub fn sampling(self) -> SamplingStrategy {
        match self {
            RobustMethod::Ransac | RobustMethod::Lmeds | RobustMethod::Msac => {
                SamplingStrategy::Uniform
            }
            RobustMethod::Prosac | RobustMethod::Promeds => SamplingStrategy::ProgressiveOrdered,
        }
    }

    /// Scoring rule used by this method, binding the inlier `threshold`
    /// where the rule needs one.
    pub fn scoring(self, threshold: Real) -> ScoringRule {
        match self {
            RobustMethod::Ransac | RobustMethod::Prosac => ScoringRule::InlierCount { threshold },
            RobustMethod::Msac => ScoringRule::BoundedCost { threshold },
            RobustMethod::Lmeds | RobustMethod::Promeds => ScoringRule::MedianOfSquares,
        }
    }

    /// True for methods whose sampling is biased by quality scores.
    pub fn needs_quality_scores(self) -> bool {
        matches!(self, RobustMethod::Prosac | RobustMethod::Promeds)
    }

    /// True for methods that interpret [`ConsensusOptions::threshold`].
    ///
    /// Least-median methods have no fixed inlier threshold; they minimize the
    /// median squared residual and recover inliers from a robust scale
    /// estimate afterwards.
    pub fn uses_threshold(self) -> bool {
        !matches!(self, RobustMethod::Lmeds | RobustMethod::Promeds)
    }
}

/// Configuration parameters for the consensus engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusOptions {
    /// Inlier residual threshold, in residual units. Ignored by
    /// least-median scoring.
    pub threshold: Real,
    /// Desired confidence in `(0, 1)` of having drawn at least one
    /// outlier-free subset.
    pub confidence: Real,
    /// Hard ceiling on sampling iterations.
    pub max_iterations: usize,
    /// Minimum progress increase between two progress notifications.
    pub progress_delta: Real,
    /// Random-number generator seed (for reproducibility).
    pub seed: u64,
}

impl Default for ConsensusOptions {
    fn default() -> Self {
        Self {
            threshold: 1.0,
            confidence: 0.99,
            max_iterations: 5000,
            progress_delta: 0.05,
            seed: 1_234_567,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_policy_mapping() {
        assert_eq!(RobustMethod::Ransac.sampling(), SamplingStrategy::Uniform);
        assert_eq!(
            RobustMethod::Prosac.sampling(),
            SamplingStrategy::ProgressiveOrdered
        );
        assert!(RobustMethod::Promeds.needs_quality_scores());
        assert!(!RobustMethod::Msac.needs_quality_scores());
        assert!(!RobustMethod::Lmeds.uses_threshold());
        assert!(matches!(
            RobustMethod::Msac.scoring(2.0),
            ScoringRule::BoundedCost { .. }
        ));
        assert!(matches!(
            RobustMethod::Promeds.scoring(2.0),
            ScoringRule::MedianOfSquares
        ));
    }

    #[test]
    fn options_serialization() {
        let opts = ConsensusOptions {
            threshold: 0.5,
            ..Default::default()
        };
        let json = serde_json::to_string(&opts).unwrap();
        let restored: ConsensusOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(opts, restored);
    }
}
