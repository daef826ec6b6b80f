//! End-to-end ranging estimation scenarios.

mod common;

use common::{outlier_aware_quality, ranging_readings, true_position};
use rfloc_core::RobustMethod;
use rfloc_estimator::{EstimatorError, EstimatorState, RangingSourceEstimator};

#[test]
fn base_estimator_recovers_exact_position() {
    let estimator =
        RangingSourceEstimator::<2>::with_readings(ranging_readings(1, 60, 0.0, 0.0)).unwrap();
    estimator.set_robust_method(None).unwrap();
    assert!(estimator.is_ready());

    let estimate = estimator.estimate().unwrap();
    let err = (estimate.position - true_position()).norm();
    assert!(err < 1e-6, "position off by {} m", err);
    assert!(
        estimate.position_covariance.is_some(),
        "nonlinear solve should produce a covariance"
    );
    assert_eq!(estimator.state(), EstimatorState::Succeeded);
    assert_eq!(estimate.inliers.count(), 60);

    // A second run replaces the result without stale state.
    let again = estimator.estimate().unwrap();
    assert!((again.position - estimate.position).norm() < 1e-12);
    assert!(again.position_covariance.is_some());
}

#[test]
fn ransac_survives_20_percent_outliers() {
    let estimator =
        RangingSourceEstimator::<2>::with_readings(ranging_readings(2, 60, 0.0, 10.0)).unwrap();
    estimator
        .set_robust_method(Some(RobustMethod::Ransac))
        .unwrap();
    estimator.set_threshold(1.0).unwrap();
    estimator.set_refine_result(true).unwrap();
    estimator.set_keep_inliers(true).unwrap();
    estimator.set_keep_residuals(true).unwrap();

    let estimate = estimator.estimate().unwrap();
    let err = (estimate.position - true_position()).norm();
    assert!(err < 0.5, "position off by {} m", err);

    // 12 of 60 readings were offset by +10 m; the consensus set is the
    // clean 80%.
    assert_eq!(estimate.inliers.count(), 48);
    let mask = estimate.inliers.mask().expect("mask kept");
    assert_eq!(mask.iter().filter(|&&b| b).count(), 48);
    assert!((0..60).filter(|i| i % 5 == 0).all(|i| !mask[i]));
    let residuals = estimate.inliers.residuals().expect("residuals kept");
    assert_eq!(residuals.len(), 60);
    assert!(estimate.position_covariance.is_some());
}

#[test]
fn every_robust_method_survives_outliers() {
    let readings = ranging_readings(3, 60, 0.0, 10.0);
    let quality = outlier_aware_quality(60);

    for method in [
        RobustMethod::Ransac,
        RobustMethod::Lmeds,
        RobustMethod::Msac,
        RobustMethod::Prosac,
        RobustMethod::Promeds,
    ] {
        let estimator = RangingSourceEstimator::<2>::with_readings(readings.clone()).unwrap();
        estimator.set_robust_method(Some(method)).unwrap();
        estimator.set_threshold(1.0).unwrap();
        if method.needs_quality_scores() {
            estimator.set_quality_scores(Some(quality.clone())).unwrap();
        }

        let estimate = estimator
            .estimate()
            .unwrap_or_else(|e| panic!("{:?} failed: {}", method, e));
        let err = (estimate.position - true_position()).norm();
        assert!(err < 0.5, "{:?} position off by {} m", method, err);
    }
}

#[test]
fn same_seed_is_deterministic() {
    let run = || {
        let estimator =
            RangingSourceEstimator::<2>::with_readings(ranging_readings(4, 40, 0.1, 10.0))
                .unwrap();
        estimator
            .set_robust_method(Some(RobustMethod::Msac))
            .unwrap();
        estimator.set_threshold(1.0).unwrap();
        estimator.set_seed(77).unwrap();
        estimator.estimate().unwrap()
    };
    let a = run();
    let b = run();
    assert_eq!(a.position, b.position);
    assert_eq!(a.iterations, b.iterations);
    assert_eq!(a.inliers.count(), b.inliers.count());
}

#[test]
fn error_shrinks_with_noise_level() {
    let mut errors = Vec::new();
    for noise_std in [1.0, 0.01] {
        let estimator =
            RangingSourceEstimator::<2>::with_readings(ranging_readings(5, 40, noise_std, 0.0))
                .unwrap();
        estimator.set_robust_method(None).unwrap();
        let estimate = estimator.estimate().unwrap();
        errors.push((estimate.position - true_position()).norm());
    }
    assert!(
        errors[1] < errors[0],
        "error did not shrink with noise: {:?}",
        errors
    );
    assert!(errors[1] < 0.1, "low-noise error too large: {:?}", errors);
}

#[test]
fn covariance_requires_the_nonlinear_stage() {
    let readings = ranging_readings(6, 30, 0.0, 0.0);

    let estimator = RangingSourceEstimator::<2>::with_readings(readings.clone()).unwrap();
    estimator.set_robust_method(None).unwrap();
    estimator.set_nonlinear_solver_enabled(false).unwrap();
    let estimate = estimator.estimate().unwrap();
    assert!(estimate.position_covariance.is_none());
    assert!((estimate.position - true_position()).norm() < 1e-6);

    // Robust path with refinement disabled publishes the best candidate
    // as-is, also without covariance.
    let estimator = RangingSourceEstimator::<2>::with_readings(readings).unwrap();
    estimator
        .set_robust_method(Some(RobustMethod::Ransac))
        .unwrap();
    estimator.set_refine_result(false).unwrap();
    let estimate = estimator.estimate().unwrap();
    assert!(estimate.position_covariance.is_none());
}

#[test]
fn readiness_rules() {
    // Too few readings.
    let estimator =
        RangingSourceEstimator::<2>::with_readings(ranging_readings(7, 2, 0.0, 0.0)).unwrap();
    assert!(!estimator.is_ready());
    assert!(matches!(
        estimator.estimate(),
        Err(EstimatorError::NotReady(_))
    ));

    // Quality-driven method without scores.
    let estimator =
        RangingSourceEstimator::<2>::with_readings(ranging_readings(8, 30, 0.0, 0.0)).unwrap();
    estimator
        .set_robust_method(Some(RobustMethod::Prosac))
        .unwrap();
    assert!(!estimator.is_ready());
    estimator
        .set_quality_scores(Some(vec![1.0; 29]))
        .unwrap();
    assert!(!estimator.is_ready(), "length mismatch must not be ready");
    estimator.set_quality_scores(Some(vec![1.0; 30])).unwrap();
    assert!(estimator.is_ready());

    // Heterogeneous sources invalidate the set.
    let mut readings = ranging_readings(9, 30, 0.0, 0.0);
    let other = rfloc_core::RadioSourceId::Beacon {
        identifier: "beacon-1".into(),
        frequency_hz: 2.4e9,
    };
    readings[0] = rfloc_core::Reading::ranging(other, *readings[0].position(), 1.0).unwrap();
    let estimator = RangingSourceEstimator::<2>::with_readings(readings).unwrap();
    assert!(!estimator.is_ready());
}

#[test]
fn works_in_three_dimensions() {
    use rfloc_core::synthetic::uniform_positions;
    use rfloc_core::Position3;

    let truth = Position3::new(4.0, -9.0, 2.5);
    let readings: Vec<rfloc_core::Reading<3>> = uniform_positions::<3>(11, 40, 30.0)
        .into_iter()
        .enumerate()
        .map(|(i, p)| {
            let mut d = (truth - p).norm().max(1e-3);
            if i % 5 == 0 {
                d += 10.0;
            }
            rfloc_core::Reading::ranging(common::access_point(), p, d).unwrap()
        })
        .collect();

    let estimator = RangingSourceEstimator::<3>::with_readings(readings).unwrap();
    estimator
        .set_robust_method(Some(RobustMethod::Msac))
        .unwrap();
    estimator.set_threshold(1.0).unwrap();

    let estimate = estimator.estimate().unwrap();
    let err = (estimate.position - truth).norm();
    assert!(err < 0.5, "3D position off by {} m", err);
    assert_eq!(estimate.inliers.count(), 32);
    assert!(estimate.position_covariance.is_some());
}

#[test]
fn estimated_radio_source_combines_identity_and_geometry() {
    let estimator =
        RangingSourceEstimator::<2>::with_readings(ranging_readings(10, 30, 0.0, 0.0)).unwrap();
    estimator.set_robust_method(None).unwrap();
    assert!(estimator.estimated_radio_source().is_none());

    estimator.estimate().unwrap();
    let source = estimator.estimated_radio_source().unwrap();
    assert_eq!(source.id, common::access_point());
    assert!((source.position - true_position()).norm() < 1e-6);
    assert!(source.position_covariance.is_some());
    assert!(source.transmitted_power_dbm.is_none());
}
