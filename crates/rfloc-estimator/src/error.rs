use thiserror::Error;

/// Errors raised by the estimator surface.
///
/// Configuration errors ([`Locked`](EstimatorError::Locked),
/// [`InvalidArgument`](EstimatorError::InvalidArgument)) fail fast with no
/// partial state change. Estimation failures distinguish insufficient input
/// ([`NotReady`](EstimatorError::NotReady)) from an exhausted consensus
/// budget ([`NoConsensus`](EstimatorError::NoConsensus)), so callers can
/// decide whether to add data or relax thresholds.
#[derive(Debug, Error)]
pub enum EstimatorError {
    #[error("estimator is locked while an estimation is running")]
    Locked,
    #[error("estimator is not ready: {0}")]
    NotReady(&'static str),
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("no consensus model found within the iteration budget")]
    NoConsensus,
    #[error("final refinement failed: {0}")]
    Refinement(&'static str),
}
