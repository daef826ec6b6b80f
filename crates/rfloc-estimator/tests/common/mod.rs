//! Shared synthetic scenario builders for the estimator tests.
#![allow(dead_code)]

use rfloc_core::synthetic::{uniform_positions, MeasurementNoise};
use rfloc_core::{expected_rssi, Position2, RadioSourceId, Reading, Real};

pub const TRUE_POWER_DBM: Real = -8.0;
pub const TRUE_EXPONENT: Real = 1.9;

pub fn true_position() -> Position2 {
    Position2::new(12.0, -25.0)
}

pub fn access_point() -> RadioSourceId {
    RadioSourceId::AccessPoint {
        bssid: "aa:bb:cc:dd:ee:ff".into(),
        frequency_hz: 2.4e9,
        ssid: Some("lab".into()),
    }
}

/// Ranging readings from receivers placed uniformly in `[-50, 50]²`.
///
/// `outlier_offset` is added to the distance of every fifth reading (20% of
/// the set) when non-zero.
pub fn ranging_readings(
    seed: u64,
    count: usize,
    noise_std: Real,
    outlier_offset: Real,
) -> Vec<Reading<2>> {
    let noise = MeasurementNoise {
        seed,
        std_dev: noise_std,
    };
    uniform_positions::<2>(seed, count, 50.0)
        .into_iter()
        .enumerate()
        .map(|(i, p)| {
            let mut d = noise.apply(i, (true_position() - p).norm()).max(1e-3);
            if outlier_offset != 0.0 && i % 5 == 0 {
                d += outlier_offset;
            }
            Reading::ranging(access_point(), p, d).unwrap()
        })
        .collect()
}

/// Combined ranging + RSSI readings with the same placement and outlier
/// pattern as [`ranging_readings`]; RSSI outliers are offset by
/// `rssi_outlier_offset` dB on the same indices.
pub fn combined_readings(
    seed: u64,
    count: usize,
    noise_std: Real,
    outlier_offset: Real,
    rssi_outlier_offset: Real,
) -> Vec<Reading<2>> {
    let noise = MeasurementNoise {
        seed,
        std_dev: noise_std,
    };
    uniform_positions::<2>(seed, count, 50.0)
        .into_iter()
        .enumerate()
        .map(|(i, p)| {
            let range = (true_position() - p).norm();
            let mut d = noise.apply(i, range).max(1e-3);
            let mut rssi = expected_rssi(TRUE_POWER_DBM, TRUE_EXPONENT, range);
            if i % 5 == 0 {
                d += outlier_offset;
                rssi += rssi_outlier_offset;
            }
            Reading::ranging_and_rssi(access_point(), p, d, rssi).unwrap()
        })
        .collect()
}

/// Quality scores favoring the readings [`ranging_readings`] left clean.
pub fn outlier_aware_quality(count: usize) -> Vec<Real> {
    (0..count)
        .map(|i| if i % 5 == 0 { 0.05 } else { 1.0 })
        .collect()
}
