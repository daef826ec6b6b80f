//! Localize a synthetic access point from combined ranging + RSSI readings,
//! with a fifth of the measurements grossly corrupted.

use anyhow::Result;
use rfloc::core::synthetic::{uniform_positions, MeasurementNoise};
use rfloc::core::expected_rssi;
use rfloc::prelude::*;

fn main() -> Result<()> {
    let truth = Position2::new(8.0, -14.0);
    let power_dbm = -6.0;
    let exponent = 1.8;

    let source = RadioSourceId::AccessPoint {
        bssid: "aa:bb:cc:dd:ee:ff".into(),
        frequency_hz: 2.4e9,
        ssid: Some("office".into()),
    };

    let noise = MeasurementNoise {
        seed: 42,
        std_dev: 0.2,
    };
    let readings: Vec<Reading<2>> = uniform_positions::<2>(42, 80, 40.0)
        .into_iter()
        .enumerate()
        .map(|(i, p)| {
            let range = (truth - p).norm();
            let mut distance = noise.apply(i, range).max(0.01);
            if i % 5 == 0 {
                // Gross multipath outlier.
                distance += 15.0;
            }
            let rssi = expected_rssi(power_dbm, exponent, range);
            Reading::ranging_and_rssi(source.clone(), p, distance, rssi)
        })
        .collect::<Result<_, _>>()?;

    let estimator = SequentialSourceEstimator::<2>::with_readings(readings)?;
    estimator.set_robust_method(Stage::Ranging, Some(RobustMethod::Msac))?;
    estimator.set_threshold(Stage::Ranging, 1.0)?;
    estimator.set_initial_path_loss_exponent(exponent)?;
    estimator.set_keep_inliers(true)?;

    let estimate = estimator.estimate()?;
    println!("true position:      {:>8.3} {:>8.3}", truth.x, truth.y);
    println!(
        "estimated position: {:>8.3} {:>8.3}",
        estimate.position.x, estimate.position.y
    );
    println!(
        "position error:     {:.3} m (accuracy {:.3} m)",
        (estimate.position - truth).norm(),
        estimate.average_accuracy().unwrap_or(f64::NAN)
    );
    println!(
        "transmitted power:  {:.2} dBm (true {:.2} dBm)",
        estimate.transmitted_power_dbm, power_dbm
    );
    println!(
        "ranging inliers:    {} of {}",
        estimate.ranging_inliers.count(),
        estimator.readings().len()
    );

    Ok(())
}
