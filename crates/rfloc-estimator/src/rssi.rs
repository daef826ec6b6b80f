//! Robust transmitted-power / path-loss / position estimation from RSSI
//! readings.

use std::cell::{Cell, Ref, RefCell};

use rfloc_core::{
    distinct_position_count, homogeneous_source, milliwatts_to_dbm, valid_quality_scores,
    ConsensusEvent, Covariance, Position, Real, Reading, RobustMethod,
    DEFAULT_PATH_LOSS_EXPONENT,
};
use rfloc_linear::LinearFormulation;
use rfloc_optim::SolveOptions;

use crate::config::{
    check_confidence, check_max_iterations, check_progress_delta, check_std_dev, check_threshold,
};
use crate::solve::{rssi_inputs, solve_pathloss, PathLossSolveConfig};
use crate::state::RunGuard;
use crate::{
    EstimateListener, EstimatorError, EstimatorState, InliersData, LocatedRadioSource,
    RobustSettings, RssiEstimate,
};

/// Estimates transmitted power, path-loss exponent and/or position of a
/// stationary emitter from RSSI readings.
///
/// In sequential mode the position is held fixed (disable position
/// estimation and supply it as the initial position); standalone use can
/// jointly estimate the position as well. Thresholds are in dB.
pub struct RssiSourceEstimator<const D: usize> {
    state: Cell<EstimatorState>,
    readings: RefCell<Vec<Reading<D>>>,
    quality_scores: RefCell<Option<Vec<Real>>>,
    robust: Cell<RobustSettings>,
    formulation: Cell<LinearFormulation>,
    initial_position: Cell<Option<Position<D>>>,
    initial_transmitted_power_dbm: Cell<Real>,
    initial_path_loss_exponent: Cell<Real>,
    estimate_position: Cell<bool>,
    estimate_transmitted_power: Cell<bool>,
    estimate_path_loss_exponent: Cell<bool>,
    nonlinear_solver_enabled: Cell<bool>,
    refine_result: Cell<bool>,
    keep_covariance: Cell<bool>,
    keep_inliers: Cell<bool>,
    keep_residuals: Cell<bool>,
    fallback_rssi_std_dev: Cell<Real>,
    listener: RefCell<Option<Box<dyn EstimateListener<Self>>>>,
    result: RefCell<Option<RssiEstimate<D>>>,
}

impl<const D: usize> Default for RssiSourceEstimator<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const D: usize> RssiSourceEstimator<D> {
    /// Fresh estimator: position and transmitted power estimated, path-loss
    /// exponent fixed at the free-space default.
    pub fn new() -> Self {
        Self {
            state: Cell::new(EstimatorState::Idle),
            readings: RefCell::new(Vec::new()),
            quality_scores: RefCell::new(None),
            robust: Cell::new(RobustSettings {
                threshold: 2.0,
                ..RobustSettings::default()
            }),
            formulation: Cell::new(LinearFormulation::default()),
            initial_position: Cell::new(None),
            initial_transmitted_power_dbm: Cell::new(0.0),
            initial_path_loss_exponent: Cell::new(DEFAULT_PATH_LOSS_EXPONENT),
            estimate_position: Cell::new(true),
            estimate_transmitted_power: Cell::new(true),
            estimate_path_loss_exponent: Cell::new(false),
            nonlinear_solver_enabled: Cell::new(true),
            refine_result: Cell::new(true),
            keep_covariance: Cell::new(true),
            keep_inliers: Cell::new(false),
            keep_residuals: Cell::new(false),
            fallback_rssi_std_dev: Cell::new(1.0),
            listener: RefCell::new(None),
            result: RefCell::new(None),
        }
    }

    /// Fresh estimator over the given readings.
    pub fn with_readings(readings: Vec<Reading<D>>) -> Result<Self, EstimatorError> {
        let estimator = Self::new();
        estimator.set_readings(readings)?;
        Ok(estimator)
    }

    fn check_unlocked(&self) -> Result<(), EstimatorError> {
        if self.state.get() == EstimatorState::Running {
            Err(EstimatorError::Locked)
        } else {
            Ok(())
        }
    }

    fn refresh_state(&self) {
        self.state.set(if self.is_ready() {
            EstimatorState::Ready
        } else {
            EstimatorState::Idle
        });
    }

    fn solve_config(&self) -> PathLossSolveConfig<D> {
        PathLossSolveConfig {
            settings: self.robust.get(),
            formulation: self.formulation.get(),
            nonlinear: self.nonlinear_solver_enabled.get(),
            refine: self.refine_result.get(),
            keep_covariance: self.keep_covariance.get(),
            solve_opts: SolveOptions::default(),
            estimate_position: self.estimate_position.get(),
            estimate_power: self.estimate_transmitted_power.get(),
            estimate_exponent: self.estimate_path_loss_exponent.get(),
            initial_position: self.initial_position.get(),
            initial_power_dbm: self.initial_transmitted_power_dbm.get(),
            initial_exponent: self.initial_path_loss_exponent.get(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EstimatorState {
        self.state.get()
    }

    /// Minimum readings for the current estimation flags.
    pub fn min_readings(&self) -> usize {
        self.solve_config().min_readings()
    }

    fn required_readings(&self) -> usize {
        let cfg = self.solve_config();
        if cfg.settings.method.is_some() {
            cfg.subset_size()
        } else {
            cfg.min_readings()
        }
    }

    /// True when `estimate()` would be accepted.
    pub fn is_ready(&self) -> bool {
        let cfg = self.solve_config();
        if !cfg.estimate_position && cfg.initial_position.is_none() {
            return false;
        }
        if !cfg.estimate_position && !cfg.estimate_power && !cfg.estimate_exponent {
            return false;
        }
        let readings = self.readings.borrow();
        if readings.is_empty() || !homogeneous_source(&readings) {
            return false;
        }
        if readings.iter().any(|r| r.rssi().is_none()) {
            return false;
        }
        if cfg.estimate_position && distinct_position_count(&readings) < D + 1 {
            return false;
        }
        if readings.len() < self.required_readings() {
            return false;
        }
        if cfg
            .settings
            .method
            .is_some_and(|m| m.needs_quality_scores())
        {
            match self.quality_scores.borrow().as_ref() {
                Some(scores) => scores.len() == readings.len(),
                None => false,
            }
        } else {
            true
        }
    }

    // --- configuration -----------------------------------------------------

    /// Replace the reading set.
    pub fn set_readings(&self, readings: Vec<Reading<D>>) -> Result<(), EstimatorError> {
        self.check_unlocked()?;
        if readings.is_empty() {
            return Err(EstimatorError::InvalidArgument("readings must not be empty"));
        }
        *self.readings.borrow_mut() = readings;
        self.refresh_state();
        Ok(())
    }

    /// Quality scores parallel to the readings.
    pub fn set_quality_scores(&self, scores: Option<Vec<Real>>) -> Result<(), EstimatorError> {
        self.check_unlocked()?;
        if let Some(scores) = &scores {
            if !valid_quality_scores(scores) {
                return Err(EstimatorError::InvalidArgument(
                    "quality scores must be non-empty and finite",
                ));
            }
        }
        *self.quality_scores.borrow_mut() = scores;
        self.refresh_state();
        Ok(())
    }

    /// Initial position guess; the fixed position when position estimation
    /// is disabled.
    pub fn set_initial_position(&self, position: Option<Position<D>>) -> Result<(), EstimatorError> {
        self.check_unlocked()?;
        if let Some(p) = &position {
            if !p.iter().all(|c| c.is_finite()) {
                return Err(EstimatorError::InvalidArgument(
                    "initial position must be finite",
                ));
            }
        }
        self.initial_position.set(position);
        self.refresh_state();
        Ok(())
    }

    /// Initial transmitted power at 1 m, in dBm.
    pub fn set_initial_transmitted_power_dbm(&self, power_dbm: Real) -> Result<(), EstimatorError> {
        self.check_unlocked()?;
        if !power_dbm.is_finite() {
            return Err(EstimatorError::InvalidArgument(
                "transmitted power must be finite",
            ));
        }
        self.initial_transmitted_power_dbm.set(power_dbm);
        Ok(())
    }

    /// Initial transmitted power in milliwatts (converted to dBm).
    pub fn set_initial_transmitted_power_milliwatts(
        &self,
        milliwatts: Real,
    ) -> Result<(), EstimatorError> {
        self.check_unlocked()?;
        if !milliwatts.is_finite() || milliwatts <= 0.0 {
            return Err(EstimatorError::InvalidArgument(
                "transmitted power must be positive and finite",
            ));
        }
        self.initial_transmitted_power_dbm
            .set(milliwatts_to_dbm(milliwatts));
        Ok(())
    }

    /// Initial path-loss exponent (free space is 2).
    pub fn set_initial_path_loss_exponent(&self, exponent: Real) -> Result<(), EstimatorError> {
        self.check_unlocked()?;
        if !exponent.is_finite() || exponent <= 0.0 {
            return Err(EstimatorError::InvalidArgument(
                "path-loss exponent must be positive and finite",
            ));
        }
        self.initial_path_loss_exponent.set(exponent);
        Ok(())
    }

    /// Estimate the position, or hold it at the initial position.
    pub fn set_position_estimation_enabled(&self, enabled: bool) -> Result<(), EstimatorError> {
        self.check_unlocked()?;
        self.estimate_position.set(enabled);
        self.refresh_state();
        Ok(())
    }

    /// Estimate the transmitted power, or hold it at the initial value.
    pub fn set_transmitted_power_estimation_enabled(
        &self,
        enabled: bool,
    ) -> Result<(), EstimatorError> {
        self.check_unlocked()?;
        self.estimate_transmitted_power.set(enabled);
        self.refresh_state();
        Ok(())
    }

    /// Estimate the path-loss exponent, or hold it at the initial value.
    pub fn set_path_loss_exponent_estimation_enabled(
        &self,
        enabled: bool,
    ) -> Result<(), EstimatorError> {
        self.check_unlocked()?;
        self.estimate_path_loss_exponent.set(enabled);
        self.refresh_state();
        Ok(())
    }

    /// Robust family, or `None` for the plain (non-robust) solve.
    pub fn set_robust_method(&self, method: Option<RobustMethod>) -> Result<(), EstimatorError> {
        self.check_unlocked()?;
        self.robust.set(RobustSettings {
            method,
            ..self.robust.get()
        });
        self.refresh_state();
        Ok(())
    }

    /// Inlier threshold in dB.
    pub fn set_threshold(&self, threshold: Real) -> Result<(), EstimatorError> {
        self.check_unlocked()?;
        check_threshold(threshold)?;
        self.robust.set(RobustSettings {
            threshold,
            ..self.robust.get()
        });
        Ok(())
    }

    /// Consensus confidence in `(0, 1)`.
    pub fn set_confidence(&self, confidence: Real) -> Result<(), EstimatorError> {
        self.check_unlocked()?;
        check_confidence(confidence)?;
        self.robust.set(RobustSettings {
            confidence,
            ..self.robust.get()
        });
        Ok(())
    }

    /// Hard iteration ceiling for the consensus loop.
    pub fn set_max_iterations(&self, max_iterations: usize) -> Result<(), EstimatorError> {
        self.check_unlocked()?;
        check_max_iterations(max_iterations)?;
        self.robust.set(RobustSettings {
            max_iterations,
            ..self.robust.get()
        });
        Ok(())
    }

    /// Progress notification granularity in `[0, 1)`.
    pub fn set_progress_delta(&self, progress_delta: Real) -> Result<(), EstimatorError> {
        self.check_unlocked()?;
        check_progress_delta(progress_delta)?;
        self.robust.set(RobustSettings {
            progress_delta,
            ..self.robust.get()
        });
        Ok(())
    }

    /// Sampling seed, for reproducible runs.
    pub fn set_seed(&self, seed: u64) -> Result<(), EstimatorError> {
        self.check_unlocked()?;
        self.robust.set(RobustSettings {
            seed,
            ..self.robust.get()
        });
        Ok(())
    }

    /// Linear multilateration formulation for free-position candidate fits.
    pub fn set_linear_formulation(
        &self,
        formulation: LinearFormulation,
    ) -> Result<(), EstimatorError> {
        self.check_unlocked()?;
        self.formulation.set(formulation);
        Ok(())
    }

    /// Enable the Levenberg-Marquardt refinement stage. Only this stage can
    /// produce covariances and variances.
    pub fn set_nonlinear_solver_enabled(&self, enabled: bool) -> Result<(), EstimatorError> {
        self.check_unlocked()?;
        self.nonlinear_solver_enabled.set(enabled);
        Ok(())
    }

    /// Re-fit the model on the final inlier set (robust methods only).
    pub fn set_refine_result(&self, enabled: bool) -> Result<(), EstimatorError> {
        self.check_unlocked()?;
        self.refine_result.set(enabled);
        Ok(())
    }

    /// Keep the covariance/variances of the refined fit.
    pub fn set_keep_covariance(&self, enabled: bool) -> Result<(), EstimatorError> {
        self.check_unlocked()?;
        self.keep_covariance.set(enabled);
        Ok(())
    }

    /// Retain the per-reading inlier mask on the result.
    pub fn set_keep_inliers(&self, enabled: bool) -> Result<(), EstimatorError> {
        self.check_unlocked()?;
        self.keep_inliers.set(enabled);
        Ok(())
    }

    /// Retain the per-reading residual vector on the result.
    pub fn set_keep_residuals(&self, enabled: bool) -> Result<(), EstimatorError> {
        self.check_unlocked()?;
        self.keep_residuals.set(enabled);
        Ok(())
    }

    /// RSSI standard deviation assumed for readings that carry none.
    pub fn set_fallback_rssi_std_dev(&self, std_dev: Real) -> Result<(), EstimatorError> {
        self.check_unlocked()?;
        check_std_dev(std_dev)?;
        self.fallback_rssi_std_dev.set(std_dev);
        Ok(())
    }

    /// Progress listener; callbacks run synchronously while locked.
    pub fn set_listener(
        &self,
        listener: Option<Box<dyn EstimateListener<Self>>>,
    ) -> Result<(), EstimatorError> {
        self.check_unlocked()?;
        *self.listener.borrow_mut() = listener;
        Ok(())
    }

    // --- accessors ----------------------------------------------------------

    /// Current readings.
    pub fn readings(&self) -> Ref<'_, Vec<Reading<D>>> {
        self.readings.borrow()
    }

    /// Current robust settings.
    pub fn robust_settings(&self) -> RobustSettings {
        self.robust.get()
    }

    /// Result of the last successful `estimate()`.
    pub fn last_estimate(&self) -> Option<RssiEstimate<D>> {
        self.result.borrow().clone()
    }

    /// Estimated (or fixed) position of the last successful `estimate()`.
    pub fn estimated_position(&self) -> Option<Position<D>> {
        self.result.borrow().as_ref().map(|r| r.position)
    }

    /// Position covariance of the last successful `estimate()`.
    pub fn estimated_position_covariance(&self) -> Option<Covariance<D>> {
        self.result.borrow().as_ref().and_then(|r| r.position_covariance)
    }

    /// Estimated transmitted power in dBm.
    pub fn estimated_transmitted_power_dbm(&self) -> Option<Real> {
        self.result.borrow().as_ref().map(|r| r.transmitted_power_dbm)
    }

    /// Estimated transmitted power in milliwatts.
    pub fn estimated_transmitted_power_milliwatts(&self) -> Option<Real> {
        self.result
            .borrow()
            .as_ref()
            .map(|r| r.transmitted_power_milliwatts())
    }

    /// Variance of the estimated transmitted power.
    pub fn estimated_transmitted_power_variance(&self) -> Option<Real> {
        self.result
            .borrow()
            .as_ref()
            .and_then(|r| r.transmitted_power_variance)
    }

    /// Estimated path-loss exponent.
    pub fn estimated_path_loss_exponent(&self) -> Option<Real> {
        self.result.borrow().as_ref().map(|r| r.path_loss_exponent)
    }

    /// Variance of the estimated path-loss exponent.
    pub fn estimated_path_loss_exponent_variance(&self) -> Option<Real> {
        self.result
            .borrow()
            .as_ref()
            .and_then(|r| r.path_loss_exponent_variance)
    }

    /// Inlier bookkeeping of the last successful `estimate()`.
    pub fn inliers_data(&self) -> Option<InliersData> {
        self.result.borrow().as_ref().map(|r| r.inliers.clone())
    }

    /// Input identity combined with the estimated geometry and power.
    pub fn estimated_radio_source(&self) -> Option<LocatedRadioSource<D>> {
        let result = self.result.borrow();
        let estimate = result.as_ref()?;
        let readings = self.readings.borrow();
        Some(LocatedRadioSource {
            id: readings.first()?.source().clone(),
            position: estimate.position,
            position_covariance: estimate.position_covariance,
            transmitted_power_dbm: Some(estimate.transmitted_power_dbm),
            path_loss_exponent: Some(estimate.path_loss_exponent),
        })
    }

    // --- estimation ---------------------------------------------------------

    /// Run the estimation on the caller's thread.
    pub fn estimate(&self) -> Result<RssiEstimate<D>, EstimatorError> {
        self.check_unlocked()?;
        if !self.is_ready() {
            return Err(EstimatorError::NotReady(
                "readings are missing, insufficient or inconsistent",
            ));
        }
        let guard = RunGuard::new(&self.state);

        let readings = self.readings.borrow().clone();
        let quality = self.quality_scores.borrow().clone();
        let keep_inliers = self.keep_inliers.get();
        let keep_residuals = self.keep_residuals.get();

        let inputs = rssi_inputs(&readings, self.fallback_rssi_std_dev.get());
        let cfg = self.solve_config();

        self.result.borrow_mut().take();

        let mut listener = self.listener.borrow_mut();
        if let Some(l) = listener.as_deref_mut() {
            l.on_estimate_start(self);
        }

        let listener_ref = &mut *listener;
        let solution = solve_pathloss(&inputs, &cfg, quality.as_deref(), &mut |event| {
            if let Some(l) = listener_ref.as_deref_mut() {
                match event {
                    ConsensusEvent::NextIteration(i) => l.on_estimate_next_iteration(self, i),
                    ConsensusEvent::Progress(p) => l.on_estimate_progress_change(self, p),
                }
            }
        })?;

        let estimate = RssiEstimate {
            position: solution.position,
            position_covariance: solution.position_covariance,
            transmitted_power_dbm: solution.power_dbm,
            transmitted_power_variance: solution.power_variance,
            path_loss_exponent: solution.exponent,
            path_loss_exponent_variance: solution.exponent_variance,
            inliers: InliersData::new(
                solution.inlier_count,
                keep_inliers.then_some(solution.inlier_mask),
                keep_residuals.then_some(solution.residuals),
            ),
            iterations: solution.iterations,
        };
        *self.result.borrow_mut() = Some(estimate.clone());

        if let Some(l) = listener.as_deref_mut() {
            l.on_estimate_end(self);
        }
        drop(listener);

        self.state.set(EstimatorState::Succeeded);
        drop(guard);
        Ok(estimate)
    }
}
