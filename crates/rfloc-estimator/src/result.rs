//! Estimation result value objects.
//!
//! Results are replaced wholesale on every successful `estimate()` call and
//! never patched incrementally.

use rfloc_core::{dbm_to_milliwatts, Covariance, Position, RadioSourceId, Real};

/// Which readings the best consensus model accepted.
///
/// The accepted count is always recorded; the boolean mask and the raw
/// residual vector are retained only when the corresponding keep flags are
/// set, to save memory on large reading sets.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InliersData {
    count: usize,
    mask: Option<Vec<bool>>,
    residuals: Option<Vec<Real>>,
}

impl InliersData {
    pub(crate) fn new(
        count: usize,
        mask: Option<Vec<bool>>,
        residuals: Option<Vec<Real>>,
    ) -> Self {
        Self {
            count,
            mask,
            residuals,
        }
    }

    /// Number of readings accepted as inliers.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Per-reading inlier mask, when kept.
    pub fn mask(&self) -> Option<&[bool]> {
        self.mask.as_deref()
    }

    /// Per-reading residuals against the best consensus model, when kept.
    pub fn residuals(&self) -> Option<&[Real]> {
        self.residuals.as_deref()
    }
}

/// Result of a ranging-only estimation.
#[derive(Debug, Clone, PartialEq)]
pub struct RangingEstimate<const D: usize> {
    /// Estimated emitter position.
    pub position: Position<D>,
    /// Position covariance; present iff the result was refined nonlinearly,
    /// covariance keeping is enabled and the normal matrix was invertible.
    pub position_covariance: Option<Covariance<D>>,
    /// Consensus inlier bookkeeping.
    pub inliers: InliersData,
    /// Sampling iterations spent (0 for the non-robust solve).
    pub iterations: usize,
}

impl<const D: usize> RangingEstimate<D> {
    /// Root-mean-square positional accuracy, `√(tr(Σ)/D)`, when a
    /// covariance is available.
    pub fn average_accuracy(&self) -> Option<Real> {
        self.position_covariance
            .as_ref()
            .map(|c| (c.trace() / D as Real).max(0.0).sqrt())
    }
}

/// Result of an RSSI estimation.
#[derive(Debug, Clone, PartialEq)]
pub struct RssiEstimate<const D: usize> {
    /// Emitter position: estimated, or echoed back when held fixed.
    pub position: Position<D>,
    /// Position covariance, when the position was estimated and refined.
    pub position_covariance: Option<Covariance<D>>,
    /// Transmitted power at 1 m, dBm.
    pub transmitted_power_dbm: Real,
    /// Variance of the power estimate, when power was estimated and refined.
    pub transmitted_power_variance: Option<Real>,
    /// Path-loss exponent.
    pub path_loss_exponent: Real,
    /// Variance of the exponent estimate, when it was estimated and refined.
    pub path_loss_exponent_variance: Option<Real>,
    /// Consensus inlier bookkeeping.
    pub inliers: InliersData,
    /// Sampling iterations spent (0 for the non-robust solve).
    pub iterations: usize,
}

impl<const D: usize> RssiEstimate<D> {
    /// Transmitted power in milliwatts.
    pub fn transmitted_power_milliwatts(&self) -> Real {
        dbm_to_milliwatts(self.transmitted_power_dbm)
    }
}

/// Result of a sequential ranging + RSSI estimation.
///
/// The position covariance comes from the ranging stage and the power /
/// exponent variances from the RSSI stage; the blocks stay independent by
/// design, there is no joint covariance.
#[derive(Debug, Clone, PartialEq)]
pub struct SequentialEstimate<const D: usize> {
    /// Position from the ranging stage.
    pub position: Position<D>,
    /// Ranging-stage position covariance.
    pub position_covariance: Option<Covariance<D>>,
    /// Transmitted power at 1 m, dBm (estimated, or the fixed initial value).
    pub transmitted_power_dbm: Real,
    /// RSSI-stage power variance.
    pub transmitted_power_variance: Option<Real>,
    /// Path-loss exponent (estimated, or the fixed initial value).
    pub path_loss_exponent: Real,
    /// RSSI-stage exponent variance.
    pub path_loss_exponent_variance: Option<Real>,
    /// Ranging-stage inlier bookkeeping.
    pub ranging_inliers: InliersData,
    /// RSSI-stage inlier bookkeeping; `None` when the stage was skipped.
    pub rssi_inliers: Option<InliersData>,
    /// Total sampling iterations across both stages.
    pub iterations: usize,
}

impl<const D: usize> SequentialEstimate<D> {
    /// Transmitted power in milliwatts.
    pub fn transmitted_power_milliwatts(&self) -> Real {
        dbm_to_milliwatts(self.transmitted_power_dbm)
    }

    /// Root-mean-square positional accuracy from the ranging covariance.
    pub fn average_accuracy(&self) -> Option<Real> {
        self.position_covariance
            .as_ref()
            .map(|c| (c.trace() / D as Real).max(0.0).sqrt())
    }
}

/// A located radio source: the input identity combined with the estimated
/// geometry and power.
#[derive(Debug, Clone, PartialEq)]
pub struct LocatedRadioSource<const D: usize> {
    /// Identity shared by the input readings.
    pub id: RadioSourceId,
    /// Estimated position.
    pub position: Position<D>,
    /// Position covariance, when available.
    pub position_covariance: Option<Covariance<D>>,
    /// Transmitted power at 1 m in dBm, when estimated or supplied.
    pub transmitted_power_dbm: Option<Real>,
    /// Path-loss exponent, when estimated or supplied.
    pub path_loss_exponent: Option<Real>,
}

impl<const D: usize> LocatedRadioSource<D> {
    /// Transmitted power in milliwatts, when known.
    pub fn transmitted_power_milliwatts(&self) -> Option<Real> {
        self.transmitted_power_dbm.map(dbm_to_milliwatts)
    }
}
