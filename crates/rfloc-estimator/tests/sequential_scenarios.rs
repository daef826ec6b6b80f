//! End-to-end sequential (ranging + RSSI) estimation scenarios.

mod common;

use common::{combined_readings, true_position, TRUE_EXPONENT, TRUE_POWER_DBM};
use rfloc_core::RobustMethod;
use rfloc_estimator::{SequentialSourceEstimator, Stage};

#[test]
fn fixed_power_and_exponent_pass_through_exactly() {
    let estimator =
        SequentialSourceEstimator::<2>::with_readings(combined_readings(1, 40, 0.0, 0.0, 0.0))
            .unwrap();
    estimator.set_robust_method(Stage::Ranging, None).unwrap();
    estimator
        .set_transmitted_power_estimation_enabled(false)
        .unwrap();
    estimator
        .set_path_loss_exponent_estimation_enabled(false)
        .unwrap();
    estimator
        .set_initial_transmitted_power_dbm(TRUE_POWER_DBM)
        .unwrap();
    estimator
        .set_initial_path_loss_exponent(TRUE_EXPONENT)
        .unwrap();
    assert!(estimator.is_ready());

    let estimate = estimator.estimate().unwrap();
    // Both quantities were held fixed: returned exactly, only position
    // estimated; the skipped RSSI stage leaves no inlier data.
    assert_eq!(estimate.transmitted_power_dbm, TRUE_POWER_DBM);
    assert_eq!(estimate.path_loss_exponent, TRUE_EXPONENT);
    assert!(estimate.transmitted_power_variance.is_none());
    assert!(estimate.path_loss_exponent_variance.is_none());
    assert!(estimate.rssi_inliers.is_none());

    let err = (estimate.position - true_position()).norm();
    assert!(err < 1e-6, "position off by {} m", err);
    assert!(estimate.position_covariance.is_some());
}

#[test]
fn estimates_power_at_the_ranging_position() {
    let estimator =
        SequentialSourceEstimator::<2>::with_readings(combined_readings(2, 40, 0.0, 0.0, 0.0))
            .unwrap();
    estimator.set_robust_method(Stage::Ranging, None).unwrap();
    estimator.set_robust_method(Stage::Rssi, None).unwrap();
    estimator
        .set_initial_path_loss_exponent(TRUE_EXPONENT)
        .unwrap();

    let estimate = estimator.estimate().unwrap();
    assert!(
        (estimate.transmitted_power_dbm - TRUE_POWER_DBM).abs() < 1e-6,
        "power {}",
        estimate.transmitted_power_dbm
    );
    assert!(estimate.transmitted_power_variance.is_some());
    // Exponent stays at its fixed initial value.
    assert_eq!(estimate.path_loss_exponent, TRUE_EXPONENT);
    assert!(estimate.rssi_inliers.is_some());

    // Power accessors agree across units.
    let mw = estimator.estimated_transmitted_power_milliwatts().unwrap();
    let dbm = estimator.estimated_transmitted_power_dbm().unwrap();
    assert!((rfloc_core::dbm_to_milliwatts(dbm) - mw).abs() < 1e-9 * mw.max(1.0));
}

#[test]
fn estimates_power_and_exponent_jointly() {
    let estimator =
        SequentialSourceEstimator::<2>::with_readings(combined_readings(3, 50, 0.0, 0.0, 0.0))
            .unwrap();
    estimator.set_robust_method(Stage::Ranging, None).unwrap();
    estimator.set_robust_method(Stage::Rssi, None).unwrap();
    estimator
        .set_path_loss_exponent_estimation_enabled(true)
        .unwrap();

    let estimate = estimator.estimate().unwrap();
    assert!(
        (estimate.transmitted_power_dbm - TRUE_POWER_DBM).abs() < 1e-6,
        "power {}",
        estimate.transmitted_power_dbm
    );
    assert!(
        (estimate.path_loss_exponent - TRUE_EXPONENT).abs() < 1e-6,
        "exponent {}",
        estimate.path_loss_exponent
    );
    assert!(estimate.transmitted_power_variance.is_some());
    assert!(estimate.path_loss_exponent_variance.is_some());
}

#[test]
fn per_stage_robust_methods_are_independent() {
    // 20% of the readings are corrupted in both measurements.
    let estimator =
        SequentialSourceEstimator::<2>::with_readings(combined_readings(4, 60, 0.0, 10.0, 20.0))
            .unwrap();
    estimator
        .set_robust_method(Stage::Ranging, Some(RobustMethod::Ransac))
        .unwrap();
    estimator.set_threshold(Stage::Ranging, 1.0).unwrap();
    estimator
        .set_robust_method(Stage::Rssi, Some(RobustMethod::Msac))
        .unwrap();
    estimator.set_threshold(Stage::Rssi, 2.0).unwrap();
    estimator.set_seed(Stage::Ranging, 11).unwrap();
    estimator.set_seed(Stage::Rssi, 12).unwrap();
    estimator
        .set_initial_path_loss_exponent(TRUE_EXPONENT)
        .unwrap();
    estimator.set_keep_inliers(true).unwrap();

    let estimate = estimator.estimate().unwrap();
    let err = (estimate.position - true_position()).norm();
    assert!(err < 0.5, "position off by {} m", err);
    assert!(
        (estimate.transmitted_power_dbm - TRUE_POWER_DBM).abs() < 1.0,
        "power {}",
        estimate.transmitted_power_dbm
    );

    // Both stages rejected the corrupted 20%.
    assert_eq!(estimate.ranging_inliers.count(), 48);
    assert_eq!(estimate.rssi_inliers.as_ref().unwrap().count(), 48);

    let settings = estimator.robust_settings(Stage::Ranging);
    assert_eq!(settings.method, Some(RobustMethod::Ransac));
    let settings = estimator.robust_settings(Stage::Rssi);
    assert_eq!(settings.method, Some(RobustMethod::Msac));
}

#[test]
fn estimate_twice_replaces_the_result() {
    let estimator =
        SequentialSourceEstimator::<2>::with_readings(combined_readings(5, 40, 0.1, 0.0, 0.0))
            .unwrap();
    estimator
        .set_initial_path_loss_exponent(TRUE_EXPONENT)
        .unwrap();

    let first = estimator.estimate().unwrap();
    let second = estimator.estimate().unwrap();
    assert_eq!(first.position, second.position);
    assert_eq!(
        first.transmitted_power_dbm,
        second.transmitted_power_dbm
    );
    assert_eq!(first.position_covariance, second.position_covariance);
}
