//! Immutable measurement records.
//!
//! A [`Reading`] pairs the receiver's known position at measurement time with
//! a ranging distance, an RSSI sample, or both, plus optional dispersion
//! information. Readings validate eagerly on construction and are immutable
//! afterwards; the estimators never mutate them.

use thiserror::Error;

use crate::{Covariance, Position, RadioSourceId, Real};

/// Validation errors raised while constructing a [`Reading`].
#[derive(Debug, Error)]
pub enum ReadingError {
    #[error("receiver position must be finite")]
    InvalidPosition,
    #[error("distance must be positive and finite, got {0}")]
    InvalidDistance(Real),
    #[error("rssi must be finite, got {0}")]
    InvalidRssi(Real),
    #[error("standard deviation must be positive and finite, got {0}")]
    InvalidStdDev(Real),
    #[error("position covariance entries must be finite")]
    InvalidCovariance,
}

/// One measurement of a stationary emitter taken at a known receiver position.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading<const D: usize> {
    source: RadioSourceId,
    position: Position<D>,
    distance: Option<Real>,
    rssi: Option<Real>,
    distance_std_dev: Option<Real>,
    rssi_std_dev: Option<Real>,
    position_covariance: Option<Covariance<D>>,
}

impl<const D: usize> Reading<D> {
    /// Ranging-only reading.
    pub fn ranging(
        source: RadioSourceId,
        position: Position<D>,
        distance: Real,
    ) -> Result<Self, ReadingError> {
        Self::build(source, position, Some(distance), None)
    }

    /// RSSI-only reading (dBm).
    pub fn rssi_only(
        source: RadioSourceId,
        position: Position<D>,
        rssi: Real,
    ) -> Result<Self, ReadingError> {
        Self::build(source, position, None, Some(rssi))
    }

    /// Combined ranging + RSSI reading, as consumed by the sequential
    /// estimator.
    pub fn ranging_and_rssi(
        source: RadioSourceId,
        position: Position<D>,
        distance: Real,
        rssi: Real,
    ) -> Result<Self, ReadingError> {
        Self::build(source, position, Some(distance), Some(rssi))
    }

    fn build(
        source: RadioSourceId,
        position: Position<D>,
        distance: Option<Real>,
        rssi: Option<Real>,
    ) -> Result<Self, ReadingError> {
        if !position.iter().all(|c| c.is_finite()) {
            return Err(ReadingError::InvalidPosition);
        }
        if let Some(d) = distance {
            if !d.is_finite() || d <= 0.0 {
                return Err(ReadingError::InvalidDistance(d));
            }
        }
        if let Some(r) = rssi {
            if !r.is_finite() {
                return Err(ReadingError::InvalidRssi(r));
            }
        }
        Ok(Self {
            source,
            position,
            distance,
            rssi,
            distance_std_dev: None,
            rssi_std_dev: None,
            position_covariance: None,
        })
    }

    /// Attach a ranging standard deviation (meters).
    pub fn with_distance_std_dev(mut self, std_dev: Real) -> Result<Self, ReadingError> {
        if !std_dev.is_finite() || std_dev <= 0.0 {
            return Err(ReadingError::InvalidStdDev(std_dev));
        }
        self.distance_std_dev = Some(std_dev);
        Ok(self)
    }

    /// Attach an RSSI standard deviation (dB).
    pub fn with_rssi_std_dev(mut self, std_dev: Real) -> Result<Self, ReadingError> {
        if !std_dev.is_finite() || std_dev <= 0.0 {
            return Err(ReadingError::InvalidStdDev(std_dev));
        }
        self.rssi_std_dev = Some(std_dev);
        Ok(self)
    }

    /// Attach a receiver-position covariance (D×D, positive semidefinite).
    pub fn with_position_covariance(
        mut self,
        covariance: Covariance<D>,
    ) -> Result<Self, ReadingError> {
        if !covariance.iter().all(|c| c.is_finite()) {
            return Err(ReadingError::InvalidCovariance);
        }
        self.position_covariance = Some(covariance);
        Ok(self)
    }

    /// Emitter this reading refers to.
    pub fn source(&self) -> &RadioSourceId {
        &self.source
    }

    /// Receiver position at measurement time.
    pub fn position(&self) -> &Position<D> {
        &self.position
    }

    /// Ranging distance in meters, if measured.
    pub fn distance(&self) -> Option<Real> {
        self.distance
    }

    /// Received signal strength in dBm, if measured.
    pub fn rssi(&self) -> Option<Real> {
        self.rssi
    }

    /// Ranging standard deviation in meters, if known.
    pub fn distance_std_dev(&self) -> Option<Real> {
        self.distance_std_dev
    }

    /// RSSI standard deviation in dB, if known.
    pub fn rssi_std_dev(&self) -> Option<Real> {
        self.rssi_std_dev
    }

    /// Receiver-position covariance, if known.
    pub fn position_covariance(&self) -> Option<&Covariance<D>> {
        self.position_covariance.as_ref()
    }
}

/// True when every reading references the same radio source.
///
/// An empty slice is vacuously homogeneous.
pub fn homogeneous_source<const D: usize>(readings: &[Reading<D>]) -> bool {
    match readings.split_first() {
        Some((first, rest)) => rest.iter().all(|r| r.source == first.source),
        None => true,
    }
}

/// Number of pairwise-distinct receiver positions in the set.
///
/// Colocated receivers contribute a single usable anchor to the linear
/// multilateration system, so readiness checks count distinct positions.
pub fn distinct_position_count<const D: usize>(readings: &[Reading<D>]) -> usize {
    let mut count = 0;
    for (i, r) in readings.iter().enumerate() {
        if readings[..i].iter().all(|p| p.position != r.position) {
            count += 1;
        }
    }
    count
}

/// True when a quality-score vector is usable: non-empty and all finite.
///
/// Length agreement with the reading set is checked separately at readiness
/// time, since readings and scores are configured independently.
pub fn valid_quality_scores(scores: &[Real]) -> bool {
    !scores.is_empty() && scores.iter().all(|s| s.is_finite())
}
