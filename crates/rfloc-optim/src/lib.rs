//! Nonlinear least-squares refinement for `rfloc`.
//!
//! The linear solvers in `rfloc-linear` seed the problems defined here,
//! which a Levenberg-Marquardt backend polishes; the refined fit is the
//! only place estimate covariances come from.

/// Levenberg-Marquardt solver backend and covariance extraction.
pub mod backend_lm;
/// Measurement-model least-squares problems.
pub mod problems;
/// Core optimization traits and option types.
pub mod traits;

pub use backend_lm::{covariance_from_jacobian, LmBackend};
pub use problems::pathloss::PathLossProblem;
pub use problems::ranging::RangingProblem;
pub use problems::ProblemError;
pub use traits::{NllsProblem, NllsSolverBackend, SolveOptions, SolveReport};
