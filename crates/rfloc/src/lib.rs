//! High-level entry crate for the `rfloc` radio-source localization toolbox.
//!
//! `rfloc` estimates the position (and optionally transmitted power and
//! path-loss exponent) of a stationary emitter — a Wi-Fi access point or a
//! BLE beacon — from noisy measurements collected by a moving receiver at
//! known positions.
//!
//! ```no_run
//! use rfloc::prelude::*;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let readings: Vec<Reading<2>> = /* collected ranging measurements */
//! # vec![];
//!
//! let estimator = RangingSourceEstimator::<2>::with_readings(readings)?;
//! estimator.set_robust_method(Some(RobustMethod::Msac))?;
//! estimator.set_threshold(0.5)?;
//!
//! let estimate = estimator.estimate()?;
//! println!("position: {}", estimate.position);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module organization
//!
//! - **[`core`]**: measurement model, radio-source identity, the generic
//!   sample-consensus engine
//! - **[`linear`]**: closed-form multilateration and path-loss fits
//! - **[`optim`]**: nonlinear least-squares refinement and covariances
//! - **[`estimator`]**: the ranging / RSSI / sequential estimator surfaces
//! - **[`prelude`]**: convenient re-exports for common use cases
//!
//! ## Stability
//!
//! The `rfloc` crate is the public compatibility boundary. Lower-level
//! crates are intended for advanced usage and may evolve more quickly.

/// Measurement model, radio-source identity and consensus primitives.
pub mod core {
    pub use rfloc_core::*;
}

/// Closed-form initialization solvers.
pub mod linear {
    pub use rfloc_linear::*;
}

/// Nonlinear least-squares refinement.
pub mod optim {
    pub use rfloc_optim::*;
}

/// Estimator surfaces: ranging, RSSI and sequential.
pub mod estimator {
    pub use rfloc_estimator::*;
}

/// Convenient re-exports for common use cases.
///
/// Import with `use rfloc::prelude::*;` to get started quickly.
pub mod prelude {
    pub use crate::core::{
        dbm_to_milliwatts, milliwatts_to_dbm, Covariance, Position, Position2, Position3,
        RadioSourceId, Reading, Real, RobustMethod,
    };
    pub use crate::estimator::{
        EstimateListener, EstimatorError, EstimatorState, InliersData, LocatedRadioSource,
        RangingSourceEstimator, RobustSettings, RssiSourceEstimator, SequentialSourceEstimator,
        Stage,
    };
    pub use crate::linear::LinearFormulation;
}
