//! Candidate scoring rules.

use serde::{Deserialize, Serialize};

use crate::Real;

/// How a candidate model is scored against the full reading set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ScoringRule {
    /// Count residuals at or below `threshold`; more inliers wins, ties go
    /// to the smaller inlier-residual sum.
    InlierCount {
        /// Inlier residual threshold.
        threshold: Real,
    },
    /// Truncated quadratic cost `Σ min(r², threshold²)`; smaller wins.
    /// Outliers contribute a bounded amount instead of being ignored.
    BoundedCost {
        /// Truncation threshold.
        threshold: Real,
    },
    /// Median of squared residuals; smaller wins. No fixed threshold —
    /// inliers are recovered from a robust scale estimate at the end.
    MedianOfSquares,
}

/// Score of one candidate model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateScore {
    /// Number of readings accepted by the rule's threshold (0 for
    /// median scoring, where acceptance is decided after the loop).
    pub inlier_count: usize,
    /// Rule-specific cost; always "smaller is better".
    pub cost: Real,
}

impl ScoringRule {
    /// Score a candidate from its residuals against all readings.
    pub fn score(&self, residuals: &[Real]) -> CandidateScore {
        match *self {
            ScoringRule::InlierCount { threshold } => {
                let mut count = 0;
                let mut cost = 0.0;
                for &r in residuals {
                    if r <= threshold {
                        count += 1;
                        cost += r;
                    }
                }
                CandidateScore {
                    inlier_count: count,
                    cost,
                }
            }
            ScoringRule::BoundedCost { threshold } => {
                let t2 = threshold * threshold;
                let mut count = 0;
                let mut cost = 0.0;
                for &r in residuals {
                    let r2 = r * r;
                    if r <= threshold {
                        count += 1;
                    }
                    cost += r2.min(t2);
                }
                CandidateScore {
                    inlier_count: count,
                    cost,
                }
            }
            ScoringRule::MedianOfSquares => CandidateScore {
                inlier_count: 0,
                cost: median_of_squares(residuals),
            },
        }
    }

    /// True when `new` beats `best` under this rule.
    pub fn better(&self, new: &CandidateScore, best: &CandidateScore) -> bool {
        match self {
            ScoringRule::InlierCount { .. } => {
                new.inlier_count > best.inlier_count
                    || (new.inlier_count == best.inlier_count && new.cost < best.cost)
            }
            ScoringRule::BoundedCost { .. } | ScoringRule::MedianOfSquares => new.cost < best.cost,
        }
    }

    /// Inlier ratio driving the adaptive iteration bound, or `None` for
    /// rules without a fixed threshold (deterministic bound instead).
    pub fn inlier_ratio(&self, score: &CandidateScore, n: usize) -> Option<Real> {
        match self {
            ScoringRule::MedianOfSquares => None,
            _ if n == 0 => None,
            _ => Some(score.inlier_count as Real / n as Real),
        }
    }

    /// Final inlier mask for the best candidate.
    ///
    /// Threshold rules accept residuals at or below the threshold. Median
    /// scoring derives the robust scale
    /// `σ̂ = 1.4826 (1 + 5/(n − m)) √median(r²)` (Rousseeuw-Leroy) and
    /// accepts residuals within `2.5 σ̂`.
    pub fn inlier_mask(&self, residuals: &[Real], subset_size: usize, best_cost: Real) -> Vec<bool> {
        match *self {
            ScoringRule::InlierCount { threshold } | ScoringRule::BoundedCost { threshold } => {
                residuals.iter().map(|&r| r <= threshold).collect()
            }
            ScoringRule::MedianOfSquares => {
                let n = residuals.len();
                let correction = if n > subset_size {
                    1.0 + 5.0 / (n - subset_size) as Real
                } else {
                    1.0
                };
                let sigma = 1.4826 * correction * best_cost.max(0.0).sqrt();
                let cutoff = 2.5 * sigma;
                residuals.iter().map(|&r| r.abs() <= cutoff).collect()
            }
        }
    }
}

/// Upper median of the squared values.
fn median_of_squares(values: &[Real]) -> Real {
    if values.is_empty() {
        return Real::INFINITY;
    }
    let mut squared: Vec<Real> = values.iter().map(|v| v * v).collect();
    let mid = squared.len() / 2;
    squared.select_nth_unstable_by(mid, |a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    squared[mid]
}
