//! Path-loss refinement problem: any free subset of position, transmitted
//! power and path-loss exponent from RSSI measurements.

use nalgebra::{DMatrix, DVector};

use rfloc_core::{Position, Real, MIN_MODEL_DISTANCE};

use super::ProblemError;
use crate::NllsProblem;

const LN10: Real = std::f64::consts::LN_10;

/// Weighted RSSI residuals `(rssi_i − (P − 10·k·log10‖x − p_i‖)) / σ_i`.
///
/// Parameters are packed `[position (D, if free), power (if free),
/// exponent (if free)]`; fixed quantities enter the model as constants.
#[derive(Debug, Clone)]
pub struct PathLossProblem<const D: usize> {
    anchors: Vec<Position<D>>,
    rssi: Vec<Real>,
    std_devs: Vec<Real>,
    fixed_position: Option<Position<D>>,
    fixed_power_dbm: Option<Real>,
    fixed_exponent: Option<Real>,
}

impl<const D: usize> PathLossProblem<D> {
    /// Build a problem with uniform standard deviation `default_std_dev`.
    /// Passing `Some` fixes a quantity; at least one must stay free.
    pub fn new(
        anchors: Vec<Position<D>>,
        rssi: Vec<Real>,
        default_std_dev: Real,
        fixed_position: Option<Position<D>>,
        fixed_power_dbm: Option<Real>,
        fixed_exponent: Option<Real>,
    ) -> Result<Self, ProblemError> {
        if anchors.is_empty() {
            return Err(ProblemError::Empty);
        }
        if anchors.len() != rssi.len() {
            return Err(ProblemError::MismatchedLengths);
        }
        if fixed_position.is_some() && fixed_power_dbm.is_some() && fixed_exponent.is_some() {
            return Err(ProblemError::NoFreeParameters);
        }
        let n = anchors.len();
        Ok(Self {
            anchors,
            rssi,
            std_devs: vec![default_std_dev.max(MIN_MODEL_DISTANCE); n],
            fixed_position,
            fixed_power_dbm,
            fixed_exponent,
        })
    }

    /// Per-reading RSSI standard deviations.
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

    /// True when the position is a free parameter.
    pub fn position_free(&self) -> bool {
        self.fixed_position.is_none()
    }

    /// True when the transmitted power is a free parameter.
    pub fn power_free(&self) -> bool {
        self.fixed_power_dbm.is_none()
    }

    /// True when the path-loss exponent is a free parameter.
    pub fn exponent_free(&self) -> bool {
        self.fixed_exponent.is_none()
    }

    /// Column offset of the power parameter, when free.
    pub fn power_index(&self) -> Option<usize> {
        self.power_free()
            .then(|| if self.position_free() { D } else { 0 })
    }

    /// Column offset of the exponent parameter, when free.
    pub fn exponent_index(&self) -> Option<usize> {
        self.exponent_free().then(|| {
            (if self.position_free() { D } else { 0 })
                + usize::from(self.power_free())
        })
    }

    /// Pack the free quantities into a parameter vector.
    pub fn pack(&self, position: &Position<D>, power_dbm: Real, exponent: Real) -> DVector<Real> {
        let mut params = Vec::with_capacity(self.num_params());
        if self.position_free() {
            params.extend(position.iter().cloned());
        }
        if self.power_free() {
            params.push(power_dbm);
        }
        if self.exponent_free() {
            params.push(exponent);
        }
        DVector::from_vec(params)
    }

    /// Unpack a parameter vector, substituting fixed quantities.
    pub fn unpack(&self, params: &DVector<Real>) -> (Position<D>, Real, Real) {
        let position = match self.fixed_position {
            Some(p) => p,
            None => Position::<D>::from_fn(|r, _| params[r]),
        };
        let power = self
            .fixed_power_dbm
            .unwrap_or_else(|| params[self.power_index().expect("power is free")]);
        let exponent = self
            .fixed_exponent
            .unwrap_or_else(|| params[self.exponent_index().expect("exponent is free")]);
        (position, power, exponent)
    }
}

impl<const D: usize> NllsProblem for PathLossProblem<D> {
    fn num_params(&self) -> usize {
        (if self.position_free() { D } else { 0 })
            + usize::from(self.power_free())
            + usize::from(self.exponent_free())
    }

    fn num_residuals(&self) -> usize {
        self.anchors.len()
    }

    fn residuals(&self, x: &DVector<Real>) -> DVector<Real> {
        let (pos, power, exponent) = self.unpack(x);
        DVector::from_iterator(
            self.anchors.len(),
            (0..self.anchors.len()).map(|i| {
                let dist = (pos - self.anchors[i]).norm().max(MIN_MODEL_DISTANCE);
                let model = power - 10.0 * exponent * dist.log10();
                (self.rssi[i] - model) / self.std_devs[i]
            }),
        )
    }

    fn jacobian(&self, x: &DVector<Real>) -> DMatrix<Real> {
        let (pos, _, exponent) = self.unpack(x);
        let mut j = DMatrix::<Real>::zeros(self.anchors.len(), self.num_params());
        for i in 0..self.anchors.len() {
            let delta = pos - self.anchors[i];
            let dist = delta.norm().max(MIN_MODEL_DISTANCE);
            let sigma = self.std_devs[i];
            if self.position_free() {
                // ∂r/∂x = 10·k·(x − p_i)ᵀ / (ln10 · d² · σ)
                let scale = 10.0 * exponent / (LN10 * dist * dist * sigma);
                for c in 0..D {
                    j[(i, c)] = scale * delta[c];
                }
            }
            if let Some(col) = self.power_index() {
                j[(i, col)] = -1.0 / sigma;
            }
            if let Some(col) = self.exponent_index() {
                j[(i, col)] = 10.0 * dist.log10() / sigma;
            }
        }
        j
    }
}
