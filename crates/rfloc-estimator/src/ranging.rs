//! Robust position estimation from ranging readings.

use std::cell::{Cell, Ref, RefCell};

use rfloc_core::{
    distinct_position_count, homogeneous_source, valid_quality_scores, ConsensusEvent, Covariance,
    Position, Real, Reading, RobustMethod,
};
use rfloc_linear::LinearFormulation;
use rfloc_optim::SolveOptions;

use crate::config::{
    check_confidence, check_max_iterations, check_progress_delta, check_std_dev, check_threshold,
};
use crate::solve::{ranging_inputs, solve_ranging, RangingSolveConfig};
use crate::state::RunGuard;
use crate::{
    EstimateListener, EstimatorError, EstimatorState, InliersData, LocatedRadioSource,
    RangingEstimate, RobustSettings,
};

/// Estimates a stationary emitter position from ranging readings.
///
/// Configuration is mutable whenever no estimation is running; every setter
/// checks the lock first and validates its argument before mutating, so a
/// failed call leaves the estimator unchanged. `estimate()` runs the
/// configured robust consensus loop (or a direct weighted solve when no
/// robust method is selected), refines the consensus set and publishes the
/// result through the accessors.
pub struct RangingSourceEstimator<const D: usize> {
    state: Cell<EstimatorState>,
    readings: RefCell<Vec<Reading<D>>>,
    quality_scores: RefCell<Option<Vec<Real>>>,
    robust: Cell<RobustSettings>,
    formulation: Cell<LinearFormulation>,
    initial_position: Cell<Option<Position<D>>>,
    nonlinear_solver_enabled: Cell<bool>,
    use_position_covariance: Cell<bool>,
    refine_result: Cell<bool>,
    keep_covariance: Cell<bool>,
    keep_inliers: Cell<bool>,
    keep_residuals: Cell<bool>,
    fallback_distance_std_dev: Cell<Real>,
    listener: RefCell<Option<Box<dyn EstimateListener<Self>>>>,
    result: RefCell<Option<RangingEstimate<D>>>,
}

impl<const D: usize> Default for RangingSourceEstimator<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const D: usize> RangingSourceEstimator<D> {
    /// Fresh estimator with default configuration (RANSAC, nonlinear
    /// refinement enabled, covariance kept).
    pub fn new() -> Self {
        Self {
            state: Cell::new(EstimatorState::Idle),
            readings: RefCell::new(Vec::new()),
            quality_scores: RefCell::new(None),
            robust: Cell::new(RobustSettings::default()),
            formulation: Cell::new(LinearFormulation::default()),
            initial_position: Cell::new(None),
            nonlinear_solver_enabled: Cell::new(true),
            use_position_covariance: Cell::new(false),
            refine_result: Cell::new(true),
            keep_covariance: Cell::new(true),
            keep_inliers: Cell::new(false),
            keep_residuals: Cell::new(false),
            fallback_distance_std_dev: Cell::new(1.0),
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

    /// Current lifecycle state.
    pub fn state(&self) -> EstimatorState {
        self.state.get()
    }

    /// Minimum readings: `D + 1` distinct anchors pin down a position.
    pub fn min_readings(&self) -> usize {
        D + 1
    }

    fn required_readings(&self) -> usize {
        let needs_split = self
            .robust
            .get()
            .method
            .is_some_and(|m| m.needs_quality_scores());
        self.min_readings() + usize::from(needs_split)
    }

    /// True when `estimate()` would be accepted: readings present with
    /// ranging data and a homogeneous source, enough distinct anchors, and
    /// matching quality scores for quality-driven robust methods.
    pub fn is_ready(&self) -> bool {
        let readings = self.readings.borrow();
        if readings.is_empty() || !homogeneous_source(&readings) {
            return false;
        }
        if readings.iter().any(|r| r.distance().is_none()) {
            return false;
        }
        if distinct_position_count(&readings) < self.min_readings() {
            return false;
        }
        if readings.len() < self.required_readings() {
            return false;
        }
        if self
            .robust
            .get()
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

    /// Replace the reading set. The set must be non-empty; source
    /// homogeneity and sufficiency are readiness conditions.
    pub fn set_readings(&self, readings: Vec<Reading<D>>) -> Result<(), EstimatorError> {
        self.check_unlocked()?;
        if readings.is_empty() {
            return Err(EstimatorError::InvalidArgument("readings must not be empty"));
        }
        *self.readings.borrow_mut() = readings;
        self.refresh_state();
        Ok(())
    }

    /// Quality scores parallel to the readings (higher = more trustworthy).
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

    /// Starting point for the nonlinear refinement.
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

    /// Inlier threshold in meters.
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

    /// Linear multilateration formulation.
    pub fn set_linear_formulation(
        &self,
        formulation: LinearFormulation,
    ) -> Result<(), EstimatorError> {
        self.check_unlocked()?;
        self.formulation.set(formulation);
        Ok(())
    }

    /// Enable the Levenberg-Marquardt refinement stage. Only this stage can
    /// produce a position covariance.
    pub fn set_nonlinear_solver_enabled(&self, enabled: bool) -> Result<(), EstimatorError> {
        self.check_unlocked()?;
        self.nonlinear_solver_enabled.set(enabled);
        Ok(())
    }

    /// Fold receiver-position covariances into the residual weights.
    pub fn set_use_position_covariance(&self, enabled: bool) -> Result<(), EstimatorError> {
        self.check_unlocked()?;
        self.use_position_covariance.set(enabled);
        Ok(())
    }

    /// Re-fit the model on the final inlier set (robust methods only).
    pub fn set_refine_result(&self, enabled: bool) -> Result<(), EstimatorError> {
        self.check_unlocked()?;
        self.refine_result.set(enabled);
        Ok(())
    }

    /// Keep the covariance of the refined fit.
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

    /// Ranging standard deviation assumed for readings that carry none.
    pub fn set_fallback_distance_std_dev(&self, std_dev: Real) -> Result<(), EstimatorError> {
        self.check_unlocked()?;
        check_std_dev(std_dev)?;
        self.fallback_distance_std_dev.set(std_dev);
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
    pub fn last_estimate(&self) -> Option<RangingEstimate<D>> {
        self.result.borrow().clone()
    }

    /// Estimated position of the last successful `estimate()`.
    pub fn estimated_position(&self) -> Option<Position<D>> {
        self.result.borrow().as_ref().map(|r| r.position)
    }

    /// Position covariance of the last successful `estimate()`.
    pub fn estimated_position_covariance(&self) -> Option<Covariance<D>> {
        self.result.borrow().as_ref().and_then(|r| r.position_covariance)
    }

    /// Inlier bookkeeping of the last successful `estimate()`.
    pub fn inliers_data(&self) -> Option<InliersData> {
        self.result.borrow().as_ref().map(|r| r.inliers.clone())
    }

    /// Input identity combined with the estimated geometry.
    pub fn estimated_radio_source(&self) -> Option<LocatedRadioSource<D>> {
        let result = self.result.borrow();
        let estimate = result.as_ref()?;
        let readings = self.readings.borrow();
        Some(LocatedRadioSource {
            id: readings.first()?.source().clone(),
            position: estimate.position,
            position_covariance: estimate.position_covariance,
            transmitted_power_dbm: None,
            path_loss_exponent: None,
        })
    }

    // --- estimation ---------------------------------------------------------

    /// Run the estimation on the caller's thread.
    ///
    /// The estimator is locked for the duration; the lock clears on every
    /// exit path. A successful run replaces the previous result wholesale.
    pub fn estimate(&self) -> Result<RangingEstimate<D>, EstimatorError> {
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

        let inputs = ranging_inputs(
            &readings,
            self.fallback_distance_std_dev.get(),
            self.use_position_covariance.get(),
        );
        let cfg = RangingSolveConfig {
            settings: self.robust.get(),
            formulation: self.formulation.get(),
            nonlinear: self.nonlinear_solver_enabled.get(),
            refine: self.refine_result.get(),
            keep_covariance: self.keep_covariance.get(),
            solve_opts: SolveOptions::default(),
            initial_position: self.initial_position.get(),
        };

        self.result.borrow_mut().take();

        let mut listener = self.listener.borrow_mut();
        if let Some(l) = listener.as_deref_mut() {
            l.on_estimate_start(self);
        }

        let listener_ref = &mut *listener;
        let solution = solve_ranging(&inputs, &cfg, quality.as_deref(), &mut |event| {
            if let Some(l) = listener_ref.as_deref_mut() {
                match event {
                    ConsensusEvent::NextIteration(i) => l.on_estimate_next_iteration(self, i),
                    ConsensusEvent::Progress(p) => l.on_estimate_progress_change(self, p),
                }
            }
        })?;

        let estimate = RangingEstimate {
            position: solution.position,
            position_covariance: solution.covariance,
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
