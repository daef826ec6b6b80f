//! Locking, state and listener protocol tests.

mod common;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use common::ranging_readings;
use rfloc_core::{Real, RobustMethod};
use rfloc_estimator::{
    EstimateListener, EstimatorError, EstimatorState, RangingSourceEstimator,
};

/// Records every callback and tries to mutate the estimator from inside
/// them, capturing what the mutators returned.
#[derive(Default)]
struct Probe {
    starts: Rc<Cell<usize>>,
    ends: Rc<Cell<usize>>,
    iterations: Rc<RefCell<Vec<usize>>>,
    progresses: Rc<RefCell<Vec<Real>>>,
    mutation_errors: Rc<RefCell<Vec<EstimatorError>>>,
}

impl Probe {
    fn poke(&self, estimator: &RangingSourceEstimator<2>) {
        // Every mutator must observe the lock while a callback runs.
        for result in [
            estimator.set_threshold(5.0),
            estimator.set_confidence(0.5),
            estimator.set_readings(ranging_readings(99, 10, 0.0, 0.0)),
            estimator.set_listener(None),
        ] {
            if let Err(e) = result {
                self.mutation_errors.borrow_mut().push(e);
            }
        }
        // Accessors keep working while locked.
        assert_eq!(estimator.state(), EstimatorState::Running);
        let _ = estimator.is_ready();
    }
}

impl EstimateListener<RangingSourceEstimator<2>> for Probe {
    fn on_estimate_start(&mut self, estimator: &RangingSourceEstimator<2>) {
        self.starts.set(self.starts.get() + 1);
        self.poke(estimator);
    }

    fn on_estimate_next_iteration(
        &mut self,
        estimator: &RangingSourceEstimator<2>,
        iteration: usize,
    ) {
        self.iterations.borrow_mut().push(iteration);
        if iteration == 1 {
            self.poke(estimator);
        }
    }

    fn on_estimate_progress_change(
        &mut self,
        _estimator: &RangingSourceEstimator<2>,
        progress: Real,
    ) {
        self.progresses.borrow_mut().push(progress);
    }

    fn on_estimate_end(&mut self, estimator: &RangingSourceEstimator<2>) {
        self.ends.set(self.ends.get() + 1);
        self.poke(estimator);
    }
}

#[test]
fn mutators_inside_callbacks_observe_the_lock() {
    let estimator =
        RangingSourceEstimator::<2>::with_readings(ranging_readings(1, 40, 0.0, 10.0)).unwrap();
    estimator
        .set_robust_method(Some(RobustMethod::Ransac))
        .unwrap();

    let probe = Probe::default();
    let starts = probe.starts.clone();
    let ends = probe.ends.clone();
    let iterations = probe.iterations.clone();
    let progresses = probe.progresses.clone();
    let mutation_errors = probe.mutation_errors.clone();
    estimator.set_listener(Some(Box::new(probe))).unwrap();

    let threshold_before = estimator.robust_settings().threshold;
    estimator.estimate().unwrap();

    assert_eq!(starts.get(), 1);
    assert_eq!(ends.get(), 1);
    assert!(!iterations.borrow().is_empty());
    assert!(iterations.borrow().windows(2).all(|w| w[1] == w[0] + 1));
    assert!(progresses.borrow().windows(2).all(|w| w[1] >= w[0]));

    // Three callbacks poked four mutators each; every attempt was rejected
    // with the lock error and changed nothing.
    let errors = mutation_errors.borrow();
    assert_eq!(errors.len(), 12, "some mutators did not observe the lock");
    assert!(errors.iter().all(|e| matches!(e, EstimatorError::Locked)));
    assert_eq!(estimator.robust_settings().threshold, threshold_before);
    assert_eq!(estimator.readings().len(), 40);
}

#[test]
fn setters_work_before_and_after_estimation() {
    let estimator =
        RangingSourceEstimator::<2>::with_readings(ranging_readings(2, 30, 0.0, 0.0)).unwrap();
    estimator.set_threshold(0.5).unwrap();
    estimator.set_confidence(0.95).unwrap();

    estimator.estimate().unwrap();
    assert_eq!(estimator.state(), EstimatorState::Succeeded);

    estimator.set_threshold(2.0).unwrap();
    assert_eq!(estimator.robust_settings().threshold, 2.0);
    estimator.estimate().unwrap();
}

#[test]
fn invalid_arguments_leave_state_untouched() {
    let estimator =
        RangingSourceEstimator::<2>::with_readings(ranging_readings(3, 30, 0.0, 0.0)).unwrap();
    let before = estimator.robust_settings();

    assert!(matches!(
        estimator.set_confidence(0.0),
        Err(EstimatorError::InvalidArgument(_))
    ));
    assert!(matches!(
        estimator.set_confidence(1.0),
        Err(EstimatorError::InvalidArgument(_))
    ));
    assert!(matches!(
        estimator.set_threshold(-1.0),
        Err(EstimatorError::InvalidArgument(_))
    ));
    assert!(matches!(
        estimator.set_max_iterations(0),
        Err(EstimatorError::InvalidArgument(_))
    ));
    assert!(matches!(
        estimator.set_progress_delta(1.0),
        Err(EstimatorError::InvalidArgument(_))
    ));
    assert!(matches!(
        estimator.set_readings(Vec::new()),
        Err(EstimatorError::InvalidArgument(_))
    ));
    assert!(matches!(
        estimator.set_quality_scores(Some(vec![Real::NAN])),
        Err(EstimatorError::InvalidArgument(_))
    ));

    assert_eq!(estimator.robust_settings(), before);
    assert_eq!(estimator.readings().len(), 30);
    assert!(estimator.is_ready());
}

#[test]
fn state_machine_lifecycle() {
    let estimator = RangingSourceEstimator::<2>::new();
    assert_eq!(estimator.state(), EstimatorState::Idle);
    assert!(matches!(
        estimator.estimate(),
        Err(EstimatorError::NotReady(_))
    ));

    estimator
        .set_readings(ranging_readings(4, 30, 0.0, 0.0))
        .unwrap();
    assert_eq!(estimator.state(), EstimatorState::Ready);

    estimator.estimate().unwrap();
    assert_eq!(estimator.state(), EstimatorState::Succeeded);

    // Mutating after success re-evaluates readiness.
    estimator
        .set_readings(ranging_readings(5, 30, 0.0, 0.0))
        .unwrap();
    assert_eq!(estimator.state(), EstimatorState::Ready);
}

#[test]
fn progress_values_stay_within_unit_range() {
    let estimator =
        RangingSourceEstimator::<2>::with_readings(ranging_readings(6, 40, 0.1, 10.0)).unwrap();
    estimator.set_progress_delta(0.01).unwrap();

    #[derive(Default)]
    struct ProgressOnly {
        seen: Rc<RefCell<Vec<Real>>>,
    }
    impl EstimateListener<RangingSourceEstimator<2>> for ProgressOnly {
        fn on_estimate_progress_change(
            &mut self,
            _estimator: &RangingSourceEstimator<2>,
            progress: Real,
        ) {
            self.seen.borrow_mut().push(progress);
        }
    }

    let listener = ProgressOnly::default();
    let seen = listener.seen.clone();
    estimator.set_listener(Some(Box::new(listener))).unwrap();
    estimator.estimate().unwrap();

    let seen = seen.borrow();
    assert!(!seen.is_empty());
    assert!(seen.iter().all(|p| (0.0..=1.0).contains(p)));
    assert!(seen.windows(2).all(|w| w[1] >= w[0]));
}
