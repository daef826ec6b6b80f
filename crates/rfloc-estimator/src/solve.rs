//! Shared stage solvers: linear initialization → sample consensus →
//! nonlinear refinement → covariance extraction.
//!
//! The public estimators are thin stateful surfaces over these routines;
//! the sequential estimator chains the two with a fixed position.

use log::debug;

use rfloc_core::{
    consensus_fit, expected_rssi, rssi_to_distance, ConsensusError, ConsensusEvent, Covariance,
    Position, Real, Reading,
};
use rfloc_core::SampleConsensusProblem;
use rfloc_linear::{fit_path_loss, trilaterate, LinearFormulation};
use rfloc_optim::{
    covariance_from_jacobian, LmBackend, NllsProblem, NllsSolverBackend, PathLossProblem,
    RangingProblem, SolveOptions,
};

use crate::{EstimatorError, RobustSettings};

fn consensus_error(err: ConsensusError) -> EstimatorError {
    match err {
        ConsensusError::Exhausted(_) => EstimatorError::NoConsensus,
        ConsensusError::TooFewReadings { .. } => {
            EstimatorError::NotReady("too few readings for the preliminary subset")
        }
        ConsensusError::QualityScoresRequired => {
            EstimatorError::NotReady("the robust method requires quality scores")
        }
        ConsensusError::QualityScoresLength { .. } => {
            EstimatorError::NotReady("quality scores length does not match the readings")
        }
    }
}

fn gather<T: Copy>(values: &[T], indices: &[usize]) -> Vec<T> {
    indices.iter().map(|&i| values[i]).collect()
}

fn has_duplicate_anchor<const D: usize>(anchors: &[Position<D>], subset: &[usize]) -> bool {
    subset
        .iter()
        .enumerate()
        .any(|(j, &a)| subset[..j].iter().any(|&b| anchors[a] == anchors[b]))
}

// ---------------------------------------------------------------------------
// Ranging stage
// ---------------------------------------------------------------------------

/// Flattened ranging measurement arrays with per-reading dispersion.
pub(crate) struct RangingInputs<const D: usize> {
    pub anchors: Vec<Position<D>>,
    pub distances: Vec<Real>,
    pub std_devs: Vec<Real>,
    pub covariances: Vec<Option<Covariance<D>>>,
}

pub(crate) fn ranging_inputs<const D: usize>(
    readings: &[Reading<D>],
    fallback_std_dev: Real,
    use_position_covariance: bool,
) -> RangingInputs<D> {
    let mut inputs = RangingInputs {
        anchors: Vec::with_capacity(readings.len()),
        distances: Vec::with_capacity(readings.len()),
        std_devs: Vec::with_capacity(readings.len()),
        covariances: Vec::with_capacity(readings.len()),
    };
    for reading in readings {
        inputs.anchors.push(*reading.position());
        // Readiness guarantees the distance is present.
        inputs.distances.push(reading.distance().unwrap_or(Real::NAN));
        inputs
            .std_devs
            .push(reading.distance_std_dev().unwrap_or(fallback_std_dev));
        inputs.covariances.push(if use_position_covariance {
            reading.position_covariance().copied()
        } else {
            None
        });
    }
    inputs
}

pub(crate) struct RangingSolveConfig<const D: usize> {
    pub settings: RobustSettings,
    pub formulation: LinearFormulation,
    pub nonlinear: bool,
    pub refine: bool,
    pub keep_covariance: bool,
    pub solve_opts: SolveOptions,
    pub initial_position: Option<Position<D>>,
}

pub(crate) struct RangingSolution<const D: usize> {
    pub position: Position<D>,
    pub covariance: Option<Covariance<D>>,
    pub inlier_mask: Vec<bool>,
    pub residuals: Vec<Real>,
    pub inlier_count: usize,
    pub iterations: usize,
}

struct RangingConsensus<'a, const D: usize> {
    inputs: &'a RangingInputs<D>,
    formulation: LinearFormulation,
}

impl<const D: usize> SampleConsensusProblem for RangingConsensus<'_, D> {
    type Model = Position<D>;

    fn num_readings(&self) -> usize {
        self.inputs.anchors.len()
    }

    fn subset_size(&self) -> usize {
        D + 1
    }

    fn fit(&self, subset: &[usize]) -> Option<Position<D>> {
        let anchors = gather(&self.inputs.anchors, subset);
        let distances = gather(&self.inputs.distances, subset);
        let weights: Vec<Real> = subset.iter().map(|&i| 1.0 / self.inputs.std_devs[i]).collect();
        trilaterate(&anchors, &distances, Some(&weights), self.formulation).ok()
    }

    fn residual(&self, model: &Position<D>, index: usize) -> Real {
        ((model - self.inputs.anchors[index]).norm() - self.inputs.distances[index]).abs()
    }

    fn is_degenerate(&self, subset: &[usize]) -> bool {
        has_duplicate_anchor(&self.inputs.anchors, subset)
    }
}

/// Ranging position solve; robust when a method is configured, direct
/// weighted least squares over all readings otherwise.
pub(crate) fn solve_ranging<const D: usize>(
    inputs: &RangingInputs<D>,
    cfg: &RangingSolveConfig<D>,
    quality: Option<&[Real]>,
    observer: &mut dyn FnMut(ConsensusEvent),
) -> Result<RangingSolution<D>, EstimatorError> {
    let n = inputs.anchors.len();
    match cfg.settings.method {
        None => {
            let all: Vec<usize> = (0..n).collect();
            let (position, covariance) = refit_ranging(inputs, &all, cfg, None)?;
            let residuals: Vec<Real> = (0..n)
                .map(|i| ((position - inputs.anchors[i]).norm() - inputs.distances[i]).abs())
                .collect();
            Ok(RangingSolution {
                position,
                covariance,
                inlier_mask: vec![true; n],
                residuals,
                inlier_count: n,
                iterations: 0,
            })
        }
        Some(method) => {
            let problem = RangingConsensus {
                inputs,
                formulation: cfg.formulation,
            };
            let outcome = consensus_fit(
                &problem,
                method,
                &cfg.settings.consensus_options(),
                quality,
                observer,
            )
            .map_err(consensus_error)?;
            debug!(
                "ranging consensus: {} inliers of {} after {} iterations",
                outcome.inliers.len(),
                n,
                outcome.iterations
            );

            let (position, covariance) = if cfg.refine {
                refit_ranging(inputs, &outcome.inliers, cfg, Some(outcome.model))?
            } else {
                (outcome.model, None)
            };
            Ok(RangingSolution {
                position,
                covariance,
                inlier_count: outcome.inliers.len(),
                inlier_mask: outcome.inlier_mask,
                residuals: outcome.residuals,
                iterations: outcome.iterations,
            })
        }
    }
}

fn refit_ranging<const D: usize>(
    inputs: &RangingInputs<D>,
    indices: &[usize],
    cfg: &RangingSolveConfig<D>,
    seed: Option<Position<D>>,
) -> Result<(Position<D>, Option<Covariance<D>>), EstimatorError> {
    if indices.len() < D + 1 {
        return Err(EstimatorError::Refinement("too few inliers to refit"));
    }
    let anchors = gather(&inputs.anchors, indices);
    let distances = gather(&inputs.distances, indices);
    let std_devs = gather(&inputs.std_devs, indices);
    let covariances = gather(&inputs.covariances, indices);
    let weights: Vec<Real> = std_devs.iter().map(|s| 1.0 / s).collect();

    let linear = trilaterate(&anchors, &distances, Some(&weights), cfg.formulation).ok();
    if !cfg.nonlinear {
        return linear
            .map(|p| (p, None))
            .ok_or(EstimatorError::Refinement("linear refit failed"));
    }

    let start = seed
        .or(cfg.initial_position)
        .or(linear)
        .ok_or(EstimatorError::Refinement("no usable starting point"))?;

    let problem = RangingProblem::new(anchors, distances, 1.0)
        .and_then(|p| p.with_std_devs(std_devs))
        .and_then(|p| p.with_position_covariances(covariances))
        .map_err(|_| EstimatorError::Refinement("inconsistent refit inputs"))?;

    let x0 = RangingProblem::<D>::pack(&start);
    let (x, _report) = LmBackend.solve(&problem, x0, &cfg.solve_opts);
    let position = RangingProblem::<D>::unpack(&x);
    if !position.iter().all(|c| c.is_finite()) {
        return Err(EstimatorError::Refinement("refinement diverged"));
    }

    let covariance = if cfg.keep_covariance {
        covariance_from_jacobian(&problem.jacobian(&x))
            .map(|m| Covariance::<D>::from_fn(|r, c| m[(r, c)]))
    } else {
        None
    };
    Ok((position, covariance))
}

// ---------------------------------------------------------------------------
// Path-loss (RSSI) stage
// ---------------------------------------------------------------------------

/// Flattened RSSI measurement arrays with per-reading dispersion.
pub(crate) struct RssiInputs<const D: usize> {
    pub anchors: Vec<Position<D>>,
    pub rssi: Vec<Real>,
    pub std_devs: Vec<Real>,
}

pub(crate) fn rssi_inputs<const D: usize>(
    readings: &[Reading<D>],
    fallback_std_dev: Real,
) -> RssiInputs<D> {
    let mut inputs = RssiInputs {
        anchors: Vec::with_capacity(readings.len()),
        rssi: Vec::with_capacity(readings.len()),
        std_devs: Vec::with_capacity(readings.len()),
    };
    for reading in readings {
        inputs.anchors.push(*reading.position());
        // Readiness guarantees the RSSI sample is present.
        inputs.rssi.push(reading.rssi().unwrap_or(Real::NAN));
        inputs
            .std_devs
            .push(reading.rssi_std_dev().unwrap_or(fallback_std_dev));
    }
    inputs
}

/// Candidate model of the RSSI stage.
#[derive(Debug, Clone)]
pub(crate) struct RssiModel<const D: usize> {
    pub position: Position<D>,
    pub power_dbm: Real,
    pub exponent: Real,
}

pub(crate) struct PathLossSolveConfig<const D: usize> {
    pub settings: RobustSettings,
    pub formulation: LinearFormulation,
    pub nonlinear: bool,
    pub refine: bool,
    pub keep_covariance: bool,
    pub solve_opts: SolveOptions,
    pub estimate_position: bool,
    pub estimate_power: bool,
    pub estimate_exponent: bool,
    /// Initial guess while the position is free; the fixed position
    /// otherwise.
    pub initial_position: Option<Position<D>>,
    pub initial_power_dbm: Real,
    pub initial_exponent: Real,
}

impl<const D: usize> PathLossSolveConfig<D> {
    /// Minimum readings determined by the free quantities, floored at
    /// `D + 1` whenever the position is solved from converted distances.
    pub(crate) fn min_readings(&self) -> usize {
        let flags = usize::from(self.estimate_power) + usize::from(self.estimate_exponent);
        if self.estimate_position {
            (D + flags).max(D + 1)
        } else {
            flags.max(1)
        }
    }

    /// Preliminary subsets carry one extra reading for conditioning.
    pub(crate) fn subset_size(&self) -> usize {
        self.min_readings() + 1
    }
}

pub(crate) struct PathLossSolution<const D: usize> {
    pub position: Position<D>,
    pub position_covariance: Option<Covariance<D>>,
    pub power_dbm: Real,
    pub power_variance: Option<Real>,
    pub exponent: Real,
    pub exponent_variance: Option<Real>,
    pub inlier_mask: Vec<bool>,
    pub residuals: Vec<Real>,
    pub inlier_count: usize,
    pub iterations: usize,
}

/// Closed-form candidate fit on a subset: invert RSSI to distances through
/// the current initial power/exponent, multilaterate when the position is
/// free, then fit the free power/exponent at that position.
fn preliminary_pathloss_fit<const D: usize>(
    inputs: &RssiInputs<D>,
    cfg: &PathLossSolveConfig<D>,
    subset: &[usize],
) -> Option<RssiModel<D>> {
    let position = if cfg.estimate_position {
        let anchors = gather(&inputs.anchors, subset);
        let implied: Vec<Real> = subset
            .iter()
            .map(|&i| rssi_to_distance(inputs.rssi[i], cfg.initial_power_dbm, cfg.initial_exponent))
            .collect();
        trilaterate(&anchors, &implied, None, cfg.formulation).ok()?
    } else {
        cfg.initial_position?
    };

    if !cfg.estimate_power && !cfg.estimate_exponent {
        return Some(RssiModel {
            position,
            power_dbm: cfg.initial_power_dbm,
            exponent: cfg.initial_exponent,
        });
    }

    let distances: Vec<Real> = subset
        .iter()
        .map(|&i| (position - inputs.anchors[i]).norm())
        .collect();
    let rssi = gather(&inputs.rssi, subset);
    let weights: Vec<Real> = subset.iter().map(|&i| 1.0 / inputs.std_devs[i]).collect();
    let fit = fit_path_loss(
        &distances,
        &rssi,
        Some(&weights),
        (!cfg.estimate_power).then_some(cfg.initial_power_dbm),
        (!cfg.estimate_exponent).then_some(cfg.initial_exponent),
    )
    .ok()?;
    Some(RssiModel {
        position,
        power_dbm: fit.power_dbm,
        exponent: fit.exponent,
    })
}

struct RssiConsensus<'a, const D: usize> {
    inputs: &'a RssiInputs<D>,
    cfg: &'a PathLossSolveConfig<D>,
}

impl<const D: usize> SampleConsensusProblem for RssiConsensus<'_, D> {
    type Model = RssiModel<D>;

    fn num_readings(&self) -> usize {
        self.inputs.anchors.len()
    }

    fn subset_size(&self) -> usize {
        self.cfg.subset_size()
    }

    fn fit(&self, subset: &[usize]) -> Option<RssiModel<D>> {
        preliminary_pathloss_fit(self.inputs, self.cfg, subset)
    }

    fn residual(&self, model: &RssiModel<D>, index: usize) -> Real {
        let dist = (model.position - self.inputs.anchors[index]).norm();
        (self.inputs.rssi[index] - expected_rssi(model.power_dbm, model.exponent, dist)).abs()
    }

    fn is_degenerate(&self, subset: &[usize]) -> bool {
        self.cfg.estimate_position && has_duplicate_anchor(&self.inputs.anchors, subset)
    }
}

/// RSSI solve for any free subset of position, power and exponent; robust
/// when a method is configured.
pub(crate) fn solve_pathloss<const D: usize>(
    inputs: &RssiInputs<D>,
    cfg: &PathLossSolveConfig<D>,
    quality: Option<&[Real]>,
    observer: &mut dyn FnMut(ConsensusEvent),
) -> Result<PathLossSolution<D>, EstimatorError> {
    let n = inputs.anchors.len();
    match cfg.settings.method {
        None => {
            let all: Vec<usize> = (0..n).collect();
            let seed = preliminary_pathloss_fit(inputs, cfg, &all)
                .ok_or(EstimatorError::Refinement("linear initialization failed"))?;
            let (model, position_covariance, power_variance, exponent_variance) =
                refit_pathloss(inputs, &all, cfg, &seed)?;
            let residuals: Vec<Real> = (0..n)
                .map(|i| {
                    let dist = (model.position - inputs.anchors[i]).norm();
                    (inputs.rssi[i] - expected_rssi(model.power_dbm, model.exponent, dist)).abs()
                })
                .collect();
            Ok(PathLossSolution {
                position: model.position,
                position_covariance,
                power_dbm: model.power_dbm,
                power_variance,
                exponent: model.exponent,
                exponent_variance,
                inlier_mask: vec![true; n],
                residuals,
                inlier_count: n,
                iterations: 0,
            })
        }
        Some(method) => {
            let problem = RssiConsensus { inputs, cfg };
            let outcome = consensus_fit(
                &problem,
                method,
                &cfg.settings.consensus_options(),
                quality,
                observer,
            )
            .map_err(consensus_error)?;
            debug!(
                "rssi consensus: {} inliers of {} after {} iterations",
                outcome.inliers.len(),
                n,
                outcome.iterations
            );

            let (model, position_covariance, power_variance, exponent_variance) = if cfg.refine {
                refit_pathloss(inputs, &outcome.inliers, cfg, &outcome.model)?
            } else {
                (outcome.model, None, None, None)
            };
            Ok(PathLossSolution {
                position: model.position,
                position_covariance,
                power_dbm: model.power_dbm,
                power_variance,
                exponent: model.exponent,
                exponent_variance,
                inlier_count: outcome.inliers.len(),
                inlier_mask: outcome.inlier_mask,
                residuals: outcome.residuals,
                iterations: outcome.iterations,
            })
        }
    }
}

type RefinedPathLoss<const D: usize> = (
    RssiModel<D>,
    Option<Covariance<D>>,
    Option<Real>,
    Option<Real>,
);

fn refit_pathloss<const D: usize>(
    inputs: &RssiInputs<D>,
    indices: &[usize],
    cfg: &PathLossSolveConfig<D>,
    seed: &RssiModel<D>,
) -> Result<RefinedPathLoss<D>, EstimatorError> {
    if indices.len() < cfg.min_readings() {
        return Err(EstimatorError::Refinement("too few inliers to refit"));
    }
    if !cfg.estimate_position && !cfg.estimate_power && !cfg.estimate_exponent {
        // Nothing free: echo the fixed quantities.
        return Ok((seed.clone(), None, None, None));
    }

    if !cfg.nonlinear {
        let model = preliminary_pathloss_fit(inputs, cfg, indices)
            .ok_or(EstimatorError::Refinement("closed-form refit failed"))?;
        return Ok((model, None, None, None));
    }

    let anchors = gather(&inputs.anchors, indices);
    let rssi = gather(&inputs.rssi, indices);
    let std_devs = gather(&inputs.std_devs, indices);

    let problem = PathLossProblem::new(
        anchors,
        rssi,
        1.0,
        (!cfg.estimate_position).then_some(seed.position),
        (!cfg.estimate_power).then_some(cfg.initial_power_dbm),
        (!cfg.estimate_exponent).then_some(cfg.initial_exponent),
    )
    .and_then(|p| p.with_std_devs(std_devs))
    .map_err(|_| EstimatorError::Refinement("inconsistent refit inputs"))?;

    let x0 = problem.pack(&seed.position, seed.power_dbm, seed.exponent);
    let (x, _report) = LmBackend.solve(&problem, x0, &cfg.solve_opts);
    let (position, power_dbm, exponent) = problem.unpack(&x);
    if !position.iter().all(|c| c.is_finite()) || !power_dbm.is_finite() || !exponent.is_finite() {
        return Err(EstimatorError::Refinement("refinement diverged"));
    }

    let mut position_covariance = None;
    let mut power_variance = None;
    let mut exponent_variance = None;
    if cfg.keep_covariance {
        if let Some(cov) = covariance_from_jacobian(&problem.jacobian(&x)) {
            if cfg.estimate_position {
                position_covariance = Some(Covariance::<D>::from_fn(|r, c| cov[(r, c)]));
            }
            if let Some(idx) = problem.power_index() {
                power_variance = Some(cov[(idx, idx)]);
            }
            if let Some(idx) = problem.exponent_index() {
                exponent_variance = Some(cov[(idx, idx)]);
            }
        }
    }

    Ok((
        RssiModel {
            position,
            power_dbm,
            exponent,
        },
        position_covariance,
        power_variance,
        exponent_variance,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg2(
        estimate_position: bool,
        estimate_power: bool,
        estimate_exponent: bool,
    ) -> PathLossSolveConfig<2> {
        PathLossSolveConfig {
            settings: RobustSettings::default(),
            formulation: LinearFormulation::default(),
            nonlinear: true,
            refine: true,
            keep_covariance: true,
            solve_opts: SolveOptions::default(),
            estimate_position,
            estimate_power,
            estimate_exponent,
            initial_position: None,
            initial_power_dbm: 0.0,
            initial_exponent: 2.0,
        }
    }

    #[test]
    fn pathloss_min_readings_follows_the_flags() {
        // Free position alone still needs D + 1 anchors.
        assert_eq!(cfg2(true, false, false).min_readings(), 3);
        // Position + power: D + 1 unknowns.
        assert_eq!(cfg2(true, true, false).min_readings(), 3);
        // Position + power + exponent: D + 2 unknowns.
        assert_eq!(cfg2(true, true, true).min_readings(), 4);
        // Fixed position: one reading per free scalar.
        assert_eq!(cfg2(false, true, false).min_readings(), 1);
        assert_eq!(cfg2(false, true, true).min_readings(), 2);
        // Subsets carry one extra reading.
        assert_eq!(cfg2(true, true, false).subset_size(), 4);
    }
}
