//! Sequential ranging + RSSI estimation.
//!
//! Two dependent robust passes over readings that carry both a distance and
//! an RSSI sample: position (and its covariance) from ranging first, then
//! transmitted power and/or path-loss exponent from RSSI with that position
//! held fixed. Each stage keeps its own robust method, threshold, confidence,
//! iteration ceiling and seed — ranging and RSSI noise differ and are tuned
//! separately. The two covariance blocks stay independent.

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
use crate::solve::{
    ranging_inputs, rssi_inputs, solve_pathloss, solve_ranging, PathLossSolveConfig,
    RangingSolveConfig,
};
use crate::state::RunGuard;
use crate::{
    EstimateListener, EstimatorError, EstimatorState, InliersData, LocatedRadioSource,
    RobustSettings, SequentialEstimate,
};

/// Which stage a per-stage setter addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// The ranging position solve.
    Ranging,
    /// The RSSI power/path-loss solve.
    Rssi,
}

/// Two-phase ranging + RSSI estimator.
pub struct SequentialSourceEstimator<const D: usize> {
    state: Cell<EstimatorState>,
    readings: RefCell<Vec<Reading<D>>>,
    quality_scores: RefCell<Option<Vec<Real>>>,
    ranging_robust: Cell<RobustSettings>,
    rssi_robust: Cell<RobustSettings>,
    formulation: Cell<LinearFormulation>,
    initial_position: Cell<Option<Position<D>>>,
    initial_transmitted_power_dbm: Cell<Real>,
    initial_path_loss_exponent: Cell<Real>,
    estimate_transmitted_power: Cell<bool>,
    estimate_path_loss_exponent: Cell<bool>,
    nonlinear_solver_enabled: Cell<bool>,
    use_position_covariance: Cell<bool>,
    refine_result: Cell<bool>,
    keep_covariance: Cell<bool>,
    keep_inliers: Cell<bool>,
    keep_residuals: Cell<bool>,
    fallback_distance_std_dev: Cell<Real>,
    fallback_rssi_std_dev: Cell<Real>,
    listener: RefCell<Option<Box<dyn EstimateListener<Self>>>>,
    result: RefCell<Option<SequentialEstimate<D>>>,
}

impl<const D: usize> Default for SequentialSourceEstimator<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const D: usize> SequentialSourceEstimator<D> {
    /// Fresh estimator: transmitted power estimated, path-loss exponent
    /// fixed at the free-space default.
    pub fn new() -> Self {
        Self {
            state: Cell::new(EstimatorState::Idle),
            readings: RefCell::new(Vec::new()),
            quality_scores: RefCell::new(None),
            ranging_robust: Cell::new(RobustSettings::default()),
            rssi_robust: Cell::new(RobustSettings {
                threshold: 2.0,
                ..RobustSettings::default()
            }),
            formulation: Cell::new(LinearFormulation::default()),
            initial_position: Cell::new(None),
            initial_transmitted_power_dbm: Cell::new(0.0),
            initial_path_loss_exponent: Cell::new(DEFAULT_PATH_LOSS_EXPONENT),
            estimate_transmitted_power: Cell::new(true),
            estimate_path_loss_exponent: Cell::new(false),
            nonlinear_solver_enabled: Cell::new(true),
            use_position_covariance: Cell::new(false),
            refine_result: Cell::new(true),
            keep_covariance: Cell::new(true),
            keep_inliers: Cell::new(false),
            keep_residuals: Cell::new(false),
            fallback_distance_std_dev: Cell::new(1.0),
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

    fn stage_settings(&self, stage: Stage) -> &Cell<RobustSettings> {
        match stage {
            Stage::Ranging => &self.ranging_robust,
            Stage::Rssi => &self.rssi_robust,
        }
    }

    fn rssi_stage_enabled(&self) -> bool {
        self.estimate_transmitted_power.get() || self.estimate_path_loss_exponent.get()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EstimatorState {
        self.state.get()
    }

    /// `D + flags`, floored at `D + 1` so the ranging stage is always
    /// solvable.
    pub fn min_readings(&self) -> usize {
        let flags = usize::from(self.estimate_transmitted_power.get())
            + usize::from(self.estimate_path_loss_exponent.get());
        (D + flags).max(D + 1)
    }

    fn required_readings(&self) -> usize {
        let mut required = self.min_readings();
        let ranging = self.ranging_robust.get();
        if ranging.method.is_some_and(|m| m.needs_quality_scores()) {
            required = required.max(D + 2);
        }
        if self.rssi_stage_enabled() {
            let rssi = self.rssi_robust.get();
            if rssi.method.is_some() {
                // The RSSI stage draws subsets one larger than its unknowns.
                let flags = usize::from(self.estimate_transmitted_power.get())
                    + usize::from(self.estimate_path_loss_exponent.get());
                required = required.max(flags + 1);
            }
        }
        required
    }

    /// True when `estimate()` would be accepted: every reading carries both
    /// a distance and an RSSI sample of one emitter, with enough distinct
    /// anchors and matching quality scores where required.
    pub fn is_ready(&self) -> bool {
        let readings = self.readings.borrow();
        if readings.is_empty() || !homogeneous_source(&readings) {
            return false;
        }
        if readings
            .iter()
            .any(|r| r.distance().is_none() || r.rssi().is_none())
        {
            return false;
        }
        if distinct_position_count(&readings) < D + 1 {
            return false;
        }
        if readings.len() < self.required_readings() {
            return false;
        }
        let needs_quality = self
            .ranging_robust
            .get()
            .method
            .is_some_and(|m| m.needs_quality_scores())
            || (self.rssi_stage_enabled()
                && self
                    .rssi_robust
                    .get()
                    .method
                    .is_some_and(|m| m.needs_quality_scores()));
        if needs_quality {
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

    /// Quality scores parallel to the readings, reused by both stages.
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

    /// Starting point for the ranging refinement.
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
        Ok(())
    }

    /// Initial transmitted power at 1 m, in dBm; the fixed value when power
    /// estimation is disabled.
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

    /// Initial path-loss exponent; the fixed value when exponent estimation
    /// is disabled.
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

    /// Estimate the transmitted power in the RSSI stage.
    pub fn set_transmitted_power_estimation_enabled(
        &self,
        enabled: bool,
    ) -> Result<(), EstimatorError> {
        self.check_unlocked()?;
        self.estimate_transmitted_power.set(enabled);
        self.refresh_state();
        Ok(())
    }

    /// Estimate the path-loss exponent in the RSSI stage.
    pub fn set_path_loss_exponent_estimation_enabled(
        &self,
        enabled: bool,
    ) -> Result<(), EstimatorError> {
        self.check_unlocked()?;
        self.estimate_path_loss_exponent.set(enabled);
        self.refresh_state();
        Ok(())
    }

    /// Robust family of one stage, or `None` for its plain solve.
    pub fn set_robust_method(
        &self,
        stage: Stage,
        method: Option<RobustMethod>,
    ) -> Result<(), EstimatorError> {
        self.check_unlocked()?;
        let cell = self.stage_settings(stage);
        cell.set(RobustSettings {
            method,
            ..cell.get()
        });
        self.refresh_state();
        Ok(())
    }

    /// Inlier threshold of one stage (meters for ranging, dB for RSSI).
    pub fn set_threshold(&self, stage: Stage, threshold: Real) -> Result<(), EstimatorError> {
        self.check_unlocked()?;
        check_threshold(threshold)?;
        let cell = self.stage_settings(stage);
        cell.set(RobustSettings {
            threshold,
            ..cell.get()
        });
        Ok(())
    }

    /// Consensus confidence of one stage, in `(0, 1)`.
    pub fn set_confidence(&self, stage: Stage, confidence: Real) -> Result<(), EstimatorError> {
        self.check_unlocked()?;
        check_confidence(confidence)?;
        let cell = self.stage_settings(stage);
        cell.set(RobustSettings {
            confidence,
            ..cell.get()
        });
        Ok(())
    }

    /// Iteration ceiling of one stage.
    pub fn set_max_iterations(
        &self,
        stage: Stage,
        max_iterations: usize,
    ) -> Result<(), EstimatorError> {
        self.check_unlocked()?;
        check_max_iterations(max_iterations)?;
        let cell = self.stage_settings(stage);
        cell.set(RobustSettings {
            max_iterations,
            ..cell.get()
        });
        Ok(())
    }

    /// Sampling seed of one stage.
    pub fn set_seed(&self, stage: Stage, seed: u64) -> Result<(), EstimatorError> {
        self.check_unlocked()?;
        let cell = self.stage_settings(stage);
        cell.set(RobustSettings { seed, ..cell.get() });
        Ok(())
    }

    /// Progress notification granularity in `[0, 1)`, shared by both stages.
    pub fn set_progress_delta(&self, progress_delta: Real) -> Result<(), EstimatorError> {
        self.check_unlocked()?;
        check_progress_delta(progress_delta)?;
        for cell in [&self.ranging_robust, &self.rssi_robust] {
            cell.set(RobustSettings {
                progress_delta,
                ..cell.get()
            });
        }
        Ok(())
    }

    /// Linear multilateration formulation.
    pub fn set_linear_formulation(
        &self,
        formulation: LinearFormulation,
    ) -> Result<(), EstimatorError> {
        self.check_unlocked()?;
        self.formulation.set(formulation);
        Ok(())
    }

    /// Enable the Levenberg-Marquardt refinement stages.
    pub fn set_nonlinear_solver_enabled(&self, enabled: bool) -> Result<(), EstimatorError> {
        self.check_unlocked()?;
        self.nonlinear_solver_enabled.set(enabled);
        Ok(())
    }

    /// Fold receiver-position covariances into the ranging weights.
    pub fn set_use_position_covariance(&self, enabled: bool) -> Result<(), EstimatorError> {
        self.check_unlocked()?;
        self.use_position_covariance.set(enabled);
        Ok(())
    }

    /// Re-fit each stage on its final inlier set.
    pub fn set_refine_result(&self, enabled: bool) -> Result<(), EstimatorError> {
        self.check_unlocked()?;
        self.refine_result.set(enabled);
        Ok(())
    }

    /// Keep covariances/variances of the refined fits.
    pub fn set_keep_covariance(&self, enabled: bool) -> Result<(), EstimatorError> {
        self.check_unlocked()?;
        self.keep_covariance.set(enabled);
        Ok(())
    }

    /// Retain per-reading inlier masks on the result.
    pub fn set_keep_inliers(&self, enabled: bool) -> Result<(), EstimatorError> {
        self.check_unlocked()?;
        self.keep_inliers.set(enabled);
        Ok(())
    }

    /// Retain per-reading residual vectors on the result.
    pub fn set_keep_residuals(&self, enabled: bool) -> Result<(), EstimatorError> {
        self.check_unlocked()?;
        self.keep_residuals.set(enabled);
        Ok(())
    }

    /// Ranging standard deviation assumed for readings that carry none.
    pub fn set_fallback_distance_std_dev(&self, std_dev: Real) -> Result<(), EstimatorError> {
        self.check_unlocked()?;
        check_std_dev(std_dev)?;
        self.fallback_distance_std_dev.set(std_dev);
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

    /// Robust settings of one stage.
    pub fn robust_settings(&self, stage: Stage) -> RobustSettings {
        self.stage_settings(stage).get()
    }

    /// Result of the last successful `estimate()`.
    pub fn last_estimate(&self) -> Option<SequentialEstimate<D>> {
        self.result.borrow().clone()
    }

    /// Estimated position of the last successful `estimate()`.
    pub fn estimated_position(&self) -> Option<Position<D>> {
        self.result.borrow().as_ref().map(|r| r.position)
    }

    /// Ranging-stage position covariance.
    pub fn estimated_position_covariance(&self) -> Option<Covariance<D>> {
        self.result.borrow().as_ref().and_then(|r| r.position_covariance)
    }

    /// Transmitted power in dBm (estimated, or the fixed initial value).
    pub fn estimated_transmitted_power_dbm(&self) -> Option<Real> {
        self.result.borrow().as_ref().map(|r| r.transmitted_power_dbm)
    }

    /// Transmitted power in milliwatts.
    pub fn estimated_transmitted_power_milliwatts(&self) -> Option<Real> {
        self.result
            .borrow()
            .as_ref()
            .map(|r| r.transmitted_power_milliwatts())
    }

    /// RSSI-stage power variance.
    pub fn estimated_transmitted_power_variance(&self) -> Option<Real> {
        self.result
            .borrow()
            .as_ref()
            .and_then(|r| r.transmitted_power_variance)
    }

    /// Path-loss exponent (estimated, or the fixed initial value).
    pub fn estimated_path_loss_exponent(&self) -> Option<Real> {
        self.result.borrow().as_ref().map(|r| r.path_loss_exponent)
    }

    /// RSSI-stage exponent variance.
    pub fn estimated_path_loss_exponent_variance(&self) -> Option<Real> {
        self.result
            .borrow()
            .as_ref()
            .and_then(|r| r.path_loss_exponent_variance)
    }

    /// Ranging-stage inlier bookkeeping.
    pub fn ranging_inliers_data(&self) -> Option<InliersData> {
        self.result.borrow().as_ref().map(|r| r.ranging_inliers.clone())
    }

    /// RSSI-stage inlier bookkeeping, when the stage ran.
    pub fn rssi_inliers_data(&self) -> Option<InliersData> {
        self.result.borrow().as_ref().and_then(|r| r.rssi_inliers.clone())
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

    /// Run both stages on the caller's thread.
    ///
    /// Listener progress maps the ranging stage to `[0, ½]` and the RSSI
    /// stage to `[½, 1]`; iteration indices continue across the stages.
    pub fn estimate(&self) -> Result<SequentialEstimate<D>, EstimatorError> {
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

        self.result.borrow_mut().take();

        let mut listener = self.listener.borrow_mut();
        if let Some(l) = listener.as_deref_mut() {
            l.on_estimate_start(self);
        }
        let listener_ref = &mut *listener;

        // Stage 1: position from ranging.
        let ranging_cfg = RangingSolveConfig {
            settings: self.ranging_robust.get(),
            formulation: self.formulation.get(),
            nonlinear: self.nonlinear_solver_enabled.get(),
            refine: self.refine_result.get(),
            keep_covariance: self.keep_covariance.get(),
            solve_opts: SolveOptions::default(),
            initial_position: self.initial_position.get(),
        };
        let ranging_in = ranging_inputs(
            &readings,
            self.fallback_distance_std_dev.get(),
            self.use_position_covariance.get(),
        );
        let ranging = solve_ranging(&ranging_in, &ranging_cfg, quality.as_deref(), &mut |event| {
            if let Some(l) = listener_ref.as_deref_mut() {
                match event {
                    ConsensusEvent::NextIteration(i) => l.on_estimate_next_iteration(self, i),
                    ConsensusEvent::Progress(p) => {
                        l.on_estimate_progress_change(self, 0.5 * p)
                    }
                }
            }
        })?;

        // Stage 2: power / path-loss from RSSI at the fixed position.
        let stage1_iterations = ranging.iterations;
        let mut power_dbm = self.initial_transmitted_power_dbm.get();
        let mut power_variance = None;
        let mut exponent = self.initial_path_loss_exponent.get();
        let mut exponent_variance = None;
        let mut rssi_inliers = None;
        let mut total_iterations = stage1_iterations;

        if self.rssi_stage_enabled() {
            let pathloss_cfg = PathLossSolveConfig {
                settings: self.rssi_robust.get(),
                formulation: self.formulation.get(),
                nonlinear: self.nonlinear_solver_enabled.get(),
                refine: self.refine_result.get(),
                keep_covariance: self.keep_covariance.get(),
                solve_opts: SolveOptions::default(),
                estimate_position: false,
                estimate_power: self.estimate_transmitted_power.get(),
                estimate_exponent: self.estimate_path_loss_exponent.get(),
                initial_position: Some(ranging.position),
                initial_power_dbm: power_dbm,
                initial_exponent: exponent,
            };
            let rssi_in = rssi_inputs(&readings, self.fallback_rssi_std_dev.get());
            let pathloss =
                solve_pathloss(&rssi_in, &pathloss_cfg, quality.as_deref(), &mut |event| {
                    if let Some(l) = listener_ref.as_deref_mut() {
                        match event {
                            ConsensusEvent::NextIteration(i) => {
                                l.on_estimate_next_iteration(self, stage1_iterations + i)
                            }
                            ConsensusEvent::Progress(p) => {
                                l.on_estimate_progress_change(self, 0.5 + 0.5 * p)
                            }
                        }
                    }
                })?;

            power_dbm = pathloss.power_dbm;
            power_variance = pathloss.power_variance;
            exponent = pathloss.exponent;
            exponent_variance = pathloss.exponent_variance;
            total_iterations += pathloss.iterations;
            rssi_inliers = Some(InliersData::new(
                pathloss.inlier_count,
                keep_inliers.then_some(pathloss.inlier_mask),
                keep_residuals.then_some(pathloss.residuals),
            ));
        }

        let estimate = SequentialEstimate {
            position: ranging.position,
            position_covariance: ranging.covariance,
            transmitted_power_dbm: power_dbm,
            transmitted_power_variance: power_variance,
            path_loss_exponent: exponent,
            path_loss_exponent_variance: exponent_variance,
            ranging_inliers: InliersData::new(
                ranging.inlier_count,
                keep_inliers.then_some(ranging.inlier_mask),
                keep_residuals.then_some(ranging.residuals),
            ),
            rssi_inliers,
            iterations: total_iterations,
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
