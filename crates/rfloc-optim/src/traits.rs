use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use rfloc_core::Real;

/// Generic nonlinear least-squares problem with dense parameter/residual
/// vectors. Residual rows are expected to be pre-weighted (divided by their
/// standard deviation), so `(JᵀJ)⁻¹` at convergence is the parameter
/// covariance.
pub trait NllsProblem {
    /// Number of parameters in the optimization vector.
    fn num_params(&self) -> usize;
    /// Number of residual rows in the problem.
    fn num_residuals(&self) -> usize;

    /// Weighted residuals for the current parameters.
    fn residuals(&self, x: &DVector<Real>) -> DVector<Real>;
    /// Weighted Jacobian for the current parameters.
    fn jacobian(&self, x: &DVector<Real>) -> DMatrix<Real>;
}

/// Backend-agnostic solver options.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolveOptions {
    /// Maximum number of solver iterations before termination.
    ///
    /// Backends may interpret this as a function-evaluation cap.
    pub max_iters: usize,
    /// Relative tolerance on the objective (cost) reduction.
    pub ftol: Real,
    /// Orthogonality/gradient tolerance.
    pub gtol: Real,
    /// Relative tolerance on parameter updates.
    pub xtol: Real,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            max_iters: 200,
            ftol: 1e-10,
            gtol: 1e-10,
            xtol: 1e-10,
        }
    }
}

/// Summary of one solver run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolveReport {
    pub iterations: usize,
    pub final_cost: Real,
    pub converged: bool,
}

/// A nonlinear least-squares solver backend.
pub trait NllsSolverBackend {
    fn solve<P: NllsProblem>(
        &self,
        problem: &P,
        x0: DVector<Real>,
        opts: &SolveOptions,
    ) -> (DVector<Real>, SolveReport);
}
