//! Robust radio-source estimators.
//!
//! Three stateful estimator surfaces over the `rfloc-core` consensus engine,
//! the `rfloc-linear` closed forms and the `rfloc-optim` refinement layer:
//!
//! - [`RangingSourceEstimator`]: position from ranging readings,
//! - [`RssiSourceEstimator`]: transmitted power / path-loss exponent (and
//!   optionally position) from RSSI readings,
//! - [`SequentialSourceEstimator`]: the two-phase composition over readings
//!   carrying both measurements.
//!
//! All of them share the same lifecycle: configure through validated
//! setters, check [`is_ready`](RangingSourceEstimator::is_ready), call
//! `estimate()`. Estimation runs synchronously on the caller's thread with
//! the estimator locked; mutators called meanwhile (for instance from a
//! listener callback) fail with [`EstimatorError::Locked`].

mod config;
mod error;
mod listener;
mod ranging;
mod result;
mod rssi;
mod sequential;
mod solve;
mod state;

pub use config::RobustSettings;
pub use error::EstimatorError;
pub use listener::EstimateListener;
pub use ranging::RangingSourceEstimator;
pub use result::{
    InliersData, LocatedRadioSource, RangingEstimate, RssiEstimate, SequentialEstimate,
};
pub use rssi::RssiSourceEstimator;
pub use sequential::{SequentialSourceEstimator, Stage};
pub use state::EstimatorState;
