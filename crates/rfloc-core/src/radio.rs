//! Radio-source identity and signal-model helpers.
//!
//! The identity value objects carry just enough to tell emitters apart and
//! to tag estimation results; frequency is kept because path-loss behaviour
//! is band dependent and callers usually want it alongside the estimate.

use serde::{Deserialize, Serialize};

use crate::Real;

/// Path-loss exponent of free-space propagation, the usual default.
pub const DEFAULT_PATH_LOSS_EXPONENT: Real = 2.0;

/// Distances below this are clamped before taking logarithms.
pub const MIN_MODEL_DISTANCE: Real = 1e-12;

/// Identity of a stationary radio emitter.
///
/// Readings referencing different identities must not be mixed within one
/// estimation; see [`crate::reading::homogeneous_source`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RadioSourceId {
    /// Wi-Fi access point keyed by BSSID.
    AccessPoint {
        /// BSSID in `aa:bb:cc:dd:ee:ff` form.
        bssid: String,
        /// Center frequency in Hz.
        frequency_hz: Real,
        /// Human-readable network name, if known.
        ssid: Option<String>,
    },
    /// BLE beacon keyed by its advertised identifier.
    Beacon {
        /// Beacon identifier (UUID or vendor-specific).
        identifier: String,
        /// Center frequency in Hz.
        frequency_hz: Real,
    },
}

impl RadioSourceId {
    /// Center frequency of the emitter in Hz.
    pub fn frequency_hz(&self) -> Real {
        match self {
            RadioSourceId::AccessPoint { frequency_hz, .. } => *frequency_hz,
            RadioSourceId::Beacon { frequency_hz, .. } => *frequency_hz,
        }
    }
}

/// Convert a power level from dBm to milliwatts.
pub fn dbm_to_milliwatts(dbm: Real) -> Real {
    (10.0 as Real).powf(dbm / 10.0)
}

/// Convert a power level from milliwatts to dBm.
///
/// The caller is responsible for ensuring `milliwatts > 0`.
pub fn milliwatts_to_dbm(milliwatts: Real) -> Real {
    10.0 * milliwatts.log10()
}

/// Expected RSSI (dBm) at `distance` meters under the log-distance model
/// `rssi = P − 10·k·log10(d)`.
pub fn expected_rssi(power_dbm: Real, exponent: Real, distance: Real) -> Real {
    power_dbm - 10.0 * exponent * distance.max(MIN_MODEL_DISTANCE).log10()
}

/// Distance (meters) implied by an RSSI sample under the log-distance model.
///
/// This is the exact inverse of [`expected_rssi`] for positive distances.
pub fn rssi_to_distance(rssi: Real, power_dbm: Real, exponent: Real) -> Real {
    (10.0 as Real).powf((power_dbm - rssi) / (10.0 * exponent))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dbm_milliwatts_round_trip() {
        for dbm in [-90.0, -40.0, -17.5, 0.0, 20.0] {
            let back = milliwatts_to_dbm(dbm_to_milliwatts(dbm));
            assert!(
                (back - dbm).abs() < 1e-6,
                "round trip failed for {} dBm: got {}",
                dbm,
                back
            );
        }
        assert!((dbm_to_milliwatts(0.0) - 1.0).abs() < 1e-12);
        assert!((dbm_to_milliwatts(10.0) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn rssi_distance_inversion() {
        let power = -5.0;
        let k = 1.8;
        for d in [0.5, 1.0, 7.3, 40.0] {
            let rssi = expected_rssi(power, k, d);
            let back = rssi_to_distance(rssi, power, k);
            assert!(
                (back - d).abs() < 1e-9,
                "distance inversion failed for {} m: got {}",
                d,
                back
            );
        }
    }

    #[test]
    fn rssi_decreases_with_distance() {
        let near = expected_rssi(0.0, DEFAULT_PATH_LOSS_EXPONENT, 1.0);
        let far = expected_rssi(0.0, DEFAULT_PATH_LOSS_EXPONENT, 10.0);
        assert!(near > far);
        assert!((near - far - 20.0).abs() < 1e-9);
    }

    #[test]
    fn source_id_serialization() {
        let id = RadioSourceId::AccessPoint {
            bssid: "aa:bb:cc:dd:ee:ff".into(),
            frequency_hz: 2.4e9,
            ssid: Some("lab".into()),
        };
        let json = serde_json::to_string(&id).unwrap();
        let restored: RadioSourceId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, restored);
        assert!((restored.frequency_hz() - 2.4e9).abs() < 1.0);
    }
}
