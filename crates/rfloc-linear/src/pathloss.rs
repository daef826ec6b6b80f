//! Log-linear fits of the path-loss model at a fixed position.
//!
//! With the emitter position known, `rssi_i = P − 10·k·log10(d_i)` is linear
//! in the transmitted power `P` (dBm) and the path-loss exponent `k`, so
//! either or both come from a small weighted least-squares system.

use nalgebra::{Matrix2, Vector2};
use thiserror::Error;

use rfloc_core::{Real, MIN_MODEL_DISTANCE};

#[derive(Debug, Error)]
pub enum PathLossError {
    #[error("need at least {needed} readings, got {got}")]
    NotEnoughReadings { needed: usize, got: usize },
    #[error("mismatched input lengths")]
    MismatchedLengths,
    #[error("distances must be positive and finite")]
    InvalidDistance,
    #[error("both power and path-loss exponent are fixed; nothing to fit")]
    NothingToEstimate,
    #[error("readings do not constrain the fit (all receivers equidistant)")]
    DegenerateGeometry,
}

/// Result of a closed-form path-loss fit.
///
/// Fixed quantities are echoed back unchanged with no variance. Variances
/// are the diagonal of the inverse weighted normal-equations matrix; with
/// unit weights they are in squared dB.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathLossFit {
    /// Transmitted power at 1 m, dBm.
    pub power_dbm: Real,
    /// Path-loss exponent.
    pub exponent: Real,
    /// Variance of the estimated power, when power was estimated.
    pub power_variance: Option<Real>,
    /// Variance of the estimated exponent, when it was estimated.
    pub exponent_variance: Option<Real>,
}

/// Weighted log-linear path-loss fit with the position held fixed.
///
/// `distances` are emitter-receiver distances in meters, `rssi` the observed
/// samples in dBm, `weights` optional per-reading inverse standard
/// deviations. Passing `Some` for `fixed_power_dbm`/`fixed_exponent` holds
/// that quantity constant; at least one must be free.
pub fn fit_path_loss(
    distances: &[Real],
    rssi: &[Real],
    weights: Option<&[Real]>,
    fixed_power_dbm: Option<Real>,
    fixed_exponent: Option<Real>,
) -> Result<PathLossFit, PathLossError> {
    let n = distances.len();
    if rssi.len() != n || weights.is_some_and(|w| w.len() != n) {
        return Err(PathLossError::MismatchedLengths);
    }
    if distances.iter().any(|d| !d.is_finite() || *d <= 0.0) {
        return Err(PathLossError::InvalidDistance);
    }

    let needed = match (fixed_power_dbm, fixed_exponent) {
        (Some(_), Some(_)) => return Err(PathLossError::NothingToEstimate),
        (None, None) => 2,
        _ => 1,
    };
    if n < needed {
        return Err(PathLossError::NotEnoughReadings { needed, got: n });
    }

    // Design row per reading: rssi = 1·P + x·k with x = −10·log10(d).
    let x = |i: usize| -10.0 * distances[i].max(MIN_MODEL_DISTANCE).log10();
    let w2 = |i: usize| weights.map_or(1.0, |w| w[i] * w[i]);

    match (fixed_power_dbm, fixed_exponent) {
        (None, None) => {
            let mut normal = Matrix2::<Real>::zeros();
            let mut rhs = Vector2::<Real>::zeros();
            for i in 0..n {
                let (xi, wi) = (x(i), w2(i));
                normal[(0, 0)] += wi;
                normal[(0, 1)] += wi * xi;
                normal[(1, 0)] += wi * xi;
                normal[(1, 1)] += wi * xi * xi;
                rhs[0] += wi * rssi[i];
                rhs[1] += wi * xi * rssi[i];
            }
            let inv = normal
                .try_inverse()
                .ok_or(PathLossError::DegenerateGeometry)?;
            if !inv.iter().all(|v| v.is_finite()) {
                return Err(PathLossError::DegenerateGeometry);
            }
            let solution = inv * rhs;
            Ok(PathLossFit {
                power_dbm: solution[0],
                exponent: solution[1],
                power_variance: Some(inv[(0, 0)]),
                exponent_variance: Some(inv[(1, 1)]),
            })
        }
        (None, Some(k)) => {
            let mut num = 0.0;
            let mut den = 0.0;
            for i in 0..n {
                let wi = w2(i);
                num += wi * (rssi[i] - x(i) * k);
                den += wi;
            }
            if den <= 0.0 {
                return Err(PathLossError::DegenerateGeometry);
            }
            Ok(PathLossFit {
                power_dbm: num / den,
                exponent: k,
                power_variance: Some(1.0 / den),
                exponent_variance: None,
            })
        }
        (Some(p), None) => {
            let mut num = 0.0;
            let mut den = 0.0;
            for i in 0..n {
                let (xi, wi) = (x(i), w2(i));
                num += wi * xi * (rssi[i] - p);
                den += wi * xi * xi;
            }
            // All receivers at exactly 1 m leave the exponent unobservable.
            if den <= 1e-12 {
                return Err(PathLossError::DegenerateGeometry);
            }
            Ok(PathLossFit {
                power_dbm: p,
                exponent: num / den,
                power_variance: None,
                exponent_variance: Some(1.0 / den),
            })
        }
        (Some(_), Some(_)) => unreachable!("rejected above"),
    }
}
