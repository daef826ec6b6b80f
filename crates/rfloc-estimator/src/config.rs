use serde::{Deserialize, Serialize};

use rfloc_core::{ConsensusOptions, Real, RobustMethod};

use crate::EstimatorError;

/// Robust-loop settings for one estimation stage.
///
/// `method == None` selects the plain (non-robust) solve over all readings;
/// the sequential estimator carries one instance per stage so ranging and
/// RSSI can be tuned separately.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RobustSettings {
    /// Robust family, or `None` for the non-robust direct solve.
    pub method: Option<RobustMethod>,
    /// Inlier residual threshold, in the stage's residual units (meters for
    /// ranging, dB for RSSI). Ignored by least-median methods.
    pub threshold: Real,
    /// Consensus confidence in `(0, 1)`.
    pub confidence: Real,
    /// Hard iteration ceiling.
    pub max_iterations: usize,
    /// Minimum progress increase between progress notifications.
    pub progress_delta: Real,
    /// Sampling seed.
    pub seed: u64,
}

impl Default for RobustSettings {
    fn default() -> Self {
        Self {
            method: Some(RobustMethod::Ransac),
            threshold: 1.0,
            confidence: 0.99,
            max_iterations: 5000,
            progress_delta: 0.05,
            seed: 1_234_567,
        }
    }
}

impl RobustSettings {
    pub(crate) fn consensus_options(&self) -> ConsensusOptions {
        ConsensusOptions {
            threshold: self.threshold,
            confidence: self.confidence,
            max_iterations: self.max_iterations,
            progress_delta: self.progress_delta,
            seed: self.seed,
        }
    }
}

pub(crate) fn check_threshold(threshold: Real) -> Result<(), EstimatorError> {
    if threshold.is_finite() && threshold > 0.0 {
        Ok(())
    } else {
        Err(EstimatorError::InvalidArgument(
            "threshold must be positive and finite",
        ))
    }
}

pub(crate) fn check_confidence(confidence: Real) -> Result<(), EstimatorError> {
    if confidence.is_finite() && confidence > 0.0 && confidence < 1.0 {
        Ok(())
    } else {
        Err(EstimatorError::InvalidArgument(
            "confidence must lie strictly between 0 and 1",
        ))
    }
}

pub(crate) fn check_max_iterations(max_iterations: usize) -> Result<(), EstimatorError> {
    if max_iterations >= 1 {
        Ok(())
    } else {
        Err(EstimatorError::InvalidArgument(
            "max iterations must be at least 1",
        ))
    }
}

pub(crate) fn check_progress_delta(progress_delta: Real) -> Result<(), EstimatorError> {
    if progress_delta.is_finite() && (0.0..1.0).contains(&progress_delta) {
        Ok(())
    } else {
        Err(EstimatorError::InvalidArgument(
            "progress delta must lie in [0, 1)",
        ))
    }
}

pub(crate) fn check_std_dev(std_dev: Real) -> Result<(), EstimatorError> {
    if std_dev.is_finite() && std_dev > 0.0 {
        Ok(())
    } else {
        Err(EstimatorError::InvalidArgument(
            "standard deviation must be positive and finite",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        let s = RobustSettings::default();
        assert!(check_threshold(s.threshold).is_ok());
        assert!(check_confidence(s.confidence).is_ok());
        assert!(check_max_iterations(s.max_iterations).is_ok());
        assert!(check_progress_delta(s.progress_delta).is_ok());
    }

    #[test]
    fn range_checks_reject_bad_values() {
        assert!(check_threshold(0.0).is_err());
        assert!(check_threshold(Real::NAN).is_err());
        assert!(check_confidence(0.0).is_err());
        assert!(check_confidence(1.0).is_err());
        assert!(check_max_iterations(0).is_err());
        assert!(check_progress_delta(1.0).is_err());
        assert!(check_progress_delta(-0.1).is_err());
        assert!(check_std_dev(-1.0).is_err());
    }

    #[test]
    fn settings_serialization() {
        let s = RobustSettings {
            method: Some(RobustMethod::Promeds),
            threshold: 2.5,
            ..Default::default()
        };
        let json = serde_json::to_string(&s).unwrap();
        let restored: RobustSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(s, restored);
    }
}
