//! Ranging refinement problem: position from distance measurements.

use nalgebra::{DMatrix, DVector};

use rfloc_core::{Covariance, Position, Real, MIN_MODEL_DISTANCE};

use super::ProblemError;
use crate::NllsProblem;

/// Weighted ranging residuals `(‖x − p_i‖ − d_i) / σ_i` over an unknown
/// emitter position `x`.
///
/// The per-reading standard deviation optionally absorbs the receiver
/// position covariance projected on the current line of sight:
/// `σ_i² = σ_d,i² + uᵀ Σ_p,i u`.
#[derive(Debug, Clone)]
pub struct RangingProblem<const D: usize> {
    anchors: Vec<Position<D>>,
    distances: Vec<Real>,
    std_devs: Vec<Real>,
    covariances: Vec<Option<Covariance<D>>>,
}

impl<const D: usize> RangingProblem<D> {
    /// Build a problem with uniform standard deviation `default_std_dev`.
    pub fn new(
        anchors: Vec<Position<D>>,
        distances: Vec<Real>,
        default_std_dev: Real,
    ) -> Result<Self, ProblemError> {
        if anchors.is_empty() {
            return Err(ProblemError::Empty);
        }
        if anchors.len() != distances.len() {
            return Err(ProblemError::MismatchedLengths);
        }
        let n = anchors.len();
        Ok(Self {
            anchors,
            distances,
            std_devs: vec![default_std_dev.max(MIN_MODEL_DISTANCE); n],
            covariances: vec![None; n],
        })
    }

    /// Per-reading ranging standard deviations.
    pub fn with_std_devs(mut self, std_devs: Vec<Real>) -> Result<Self, ProblemError> {
        if std_devs.len() != self.anchors.len() {
            return Err(ProblemError::MismatchedLengths);
        }
        self.std_devs = std_devs
            .into_iter()
            .map(|s| s.max(MIN_MODEL_DISTANCE))
            .collect();
        Ok(self)
    }

    /// Per-reading receiver position covariances, folded into the residual
    /// weights along the current line of sight.
    pub fn with_position_covariances(
        mut self,
        covariances: Vec<Option<Covariance<D>>>,
    ) -> Result<Self, ProblemError> {
        if covariances.len() != self.anchors.len() {
            return Err(ProblemError::MismatchedLengths);
        }
        self.covariances = covariances;
        Ok(self)
    }

    /// Pack a position into a parameter vector.
    pub fn pack(position: &Position<D>) -> DVector<Real> {
        DVector::from_iterator(D, position.iter().cloned())
    }

    /// Unpack a parameter vector into a position.
    pub fn unpack(params: &DVector<Real>) -> Position<D> {
        Position::<D>::from_fn(|r, _| params[r])
    }

    /// Direction and effective sigma of reading `i` at the position `x`.
    fn geometry(&self, x: &Position<D>, i: usize) -> (Position<D>, Real, Real) {
        let delta = x - self.anchors[i];
        let dist = delta.norm().max(MIN_MODEL_DISTANCE);
        let u = delta / dist;
        let mut var = self.std_devs[i] * self.std_devs[i];
        if let Some(cov) = &self.covariances[i] {
            var += (u.transpose() * cov * u)[0].max(0.0);
        }
        (u, dist, var.sqrt())
    }
}

impl<const D: usize> NllsProblem for RangingProblem<D> {
    fn num_params(&self) -> usize {
        D
    }

    fn num_residuals(&self) -> usize {
        self.anchors.len()
    }

    fn residuals(&self, x: &DVector<Real>) -> DVector<Real> {
        let pos = Self::unpack(x);
        DVector::from_iterator(
            self.anchors.len(),
            (0..self.anchors.len()).map(|i| {
                let (_, dist, sigma) = self.geometry(&pos, i);
                (dist - self.distances[i]) / sigma
            }),
        )
    }

    fn jacobian(&self, x: &DVector<Real>) -> DMatrix<Real> {
        let pos = Self::unpack(x);
        let mut j = DMatrix::<Real>::zeros(self.anchors.len(), D);
        for i in 0..self.anchors.len() {
            let (u, _, sigma) = self.geometry(&pos, i);
            for c in 0..D {
                j[(i, c)] = u[c] / sigma;
            }
        }
        j
    }
}
