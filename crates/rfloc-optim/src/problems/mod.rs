//! Least-squares problems for the radio measurement models.

use thiserror::Error;

/// Ranging residuals over an unknown position.
pub mod ranging;

/// Path-loss residuals over any free subset of position, power, exponent.
pub mod pathloss;

/// Construction errors shared by the measurement problems.
#[derive(Debug, Error)]
pub enum ProblemError {
    #[error("mismatched input lengths")]
    MismatchedLengths,
    #[error("problem has no free parameters")]
    NoFreeParameters,
    #[error("need at least one residual")]
    Empty,
}
