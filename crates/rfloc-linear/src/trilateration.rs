//! Linear multilateration of a position from ranging distances.
//!
//! Subtracting the first distance equation from the rest removes the
//! quadratic term and leaves a linear system in the unknown position:
//! `2 (p_i − p_0)ᵀ x = (‖p_i‖² − d_i²) − (‖p_0‖² − d_0²)`.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use rfloc_core::{Position, Real};

/// Rank/scale tolerance relative to the largest singular value.
const RANK_TOL: Real = 1e-10;

#[derive(Debug, Error)]
pub enum TrilaterationError {
    #[error("need at least {needed} readings, got {got}")]
    NotEnoughReadings { needed: usize, got: usize },
    #[error("mismatched input lengths")]
    MismatchedLengths,
    #[error("distances must be positive and finite")]
    InvalidDistance,
    #[error("receiver geometry is degenerate (colinear or coplanar anchors)")]
    DegenerateGeometry,
    #[error("svd failed")]
    SvdFailed,
}

/// Coordinate formulation of the linear solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LinearFormulation {
    /// Solve `A x = b` directly by least squares.
    #[default]
    Inhomogeneous,
    /// Solve `[A | −b] h = 0` for the homogeneous vector `h` and
    /// dehomogenize. More tolerant of a poorly scaled right-hand side.
    Homogeneous,
}

/// Weighted linear multilateration.
///
/// `weights`, when given, are per-reading inverse standard deviations; each
/// difference equation is scaled by the weight of its non-reference reading.
/// Requires at least `D + 1` readings.
pub fn trilaterate<const D: usize>(
    positions: &[Position<D>],
    distances: &[Real],
    weights: Option<&[Real]>,
    formulation: LinearFormulation,
) -> Result<Position<D>, TrilaterationError> {
    let n = positions.len();
    if n < D + 1 {
        return Err(TrilaterationError::NotEnoughReadings {
            needed: D + 1,
            got: n,
        });
    }
    if distances.len() != n || weights.is_some_and(|w| w.len() != n) {
        return Err(TrilaterationError::MismatchedLengths);
    }
    if distances.iter().any(|d| !d.is_finite() || *d <= 0.0) {
        return Err(TrilaterationError::InvalidDistance);
    }

    let p0 = positions[0];
    let c0 = p0.norm_squared() - distances[0] * distances[0];

    let rows = n - 1;
    let mut a = DMatrix::<Real>::zeros(rows, D);
    let mut b = DVector::<Real>::zeros(rows);
    for i in 1..n {
        let w = weights.map_or(1.0, |w| w[i]);
        let row = 2.0 * (positions[i] - p0);
        for c in 0..D {
            a[(i - 1, c)] = w * row[c];
        }
        b[i - 1] = w * (positions[i].norm_squared() - distances[i] * distances[i] - c0);
    }

    match formulation {
        LinearFormulation::Inhomogeneous => {
            let svd = a.svd(true, true);
            let sv = &svd.singular_values;
            if sv[0] <= 0.0 || sv[sv.len() - 1] <= RANK_TOL * sv[0] {
                return Err(TrilaterationError::DegenerateGeometry);
            }
            let x = svd
                .solve(&b, RANK_TOL)
                .map_err(|_| TrilaterationError::SvdFailed)?;
            Ok(Position::<D>::from_fn(|r, _| x[r]))
        }
        LinearFormulation::Homogeneous => {
            let mut m = DMatrix::<Real>::zeros(rows, D + 1);
            m.view_mut((0, 0), (rows, D)).copy_from(&a);
            m.view_mut((0, D), (rows, 1)).copy_from(&(-b));

            let svd = m.svd(false, true);
            let sv = &svd.singular_values;
            // One vanishing direction is the solution; a second one means
            // the anchors do not pin the position down.
            if sv.len() > 1 && sv[sv.len() - 2] <= RANK_TOL * sv[0] {
                return Err(TrilaterationError::DegenerateGeometry);
            }
            let v_t = svd.v_t.ok_or(TrilaterationError::SvdFailed)?;
            let h = v_t.row(v_t.nrows() - 1);

            let scale = h[D];
            if scale.abs() <= RANK_TOL {
                return Err(TrilaterationError::DegenerateGeometry);
            }
            Ok(Position::<D>::from_fn(|r, _| h[r] / scale))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rfloc_core::{Position2, Position3};

    fn ranges<const D: usize>(anchors: &[Position<D>], truth: &Position<D>) -> Vec<Real> {
        anchors.iter().map(|p| (truth - p).norm()).collect()
    }

    #[test]
    fn exact_recovery_2d_both_formulations() {
        let anchors = vec![
            Position2::new(0.0, 0.0),
            Position2::new(10.0, 0.0),
            Position2::new(0.0, 10.0),
            Position2::new(7.0, 8.0),
        ];
        let truth = Position2::new(3.2, -1.7);
        let d = ranges(&anchors, &truth);

        for formulation in [LinearFormulation::Inhomogeneous, LinearFormulation::Homogeneous] {
            let est = trilaterate(&anchors, &d, None, formulation).unwrap();
            assert!(
                (est - truth).norm() < 1e-6,
                "{:?}: error {}",
                formulation,
                (est - truth).norm()
            );
        }
    }

    #[test]
    fn exact_recovery_with_minimal_reading_set() {
        // D + 1 readings give a square linear system with a unique solution.
        let anchors = vec![
            Position2::new(0.0, 0.0),
            Position2::new(10.0, 1.0),
            Position2::new(2.0, 9.0),
        ];
        let truth = Position2::new(4.2, 5.6);
        let d = ranges(&anchors, &truth);

        let est = trilaterate(&anchors, &d, None, LinearFormulation::default()).unwrap();
        assert!((est - truth).norm() < 1e-6, "error {}", (est - truth).norm());
    }

    #[test]
    fn exact_recovery_3d() {
        let anchors = vec![
            Position3::new(0.0, 0.0, 0.0),
            Position3::new(10.0, 0.0, 0.0),
            Position3::new(0.0, 10.0, 0.0),
            Position3::new(0.0, 0.0, 10.0),
            Position3::new(5.0, 5.0, 5.0),
        ];
        let truth = Position3::new(2.0, 3.0, -4.0);
        let d = ranges(&anchors, &truth);

        let est = trilaterate(&anchors, &d, None, LinearFormulation::default()).unwrap();
        assert!((est - truth).norm() < 1e-6, "error {}", (est - truth).norm());
    }

    #[test]
    fn weights_favor_accurate_readings() {
        let anchors = vec![
            Position2::new(0.0, 0.0),
            Position2::new(10.0, 0.0),
            Position2::new(0.0, 10.0),
            Position2::new(10.0, 10.0),
            Position2::new(5.0, -5.0),
        ];
        let truth = Position2::new(4.0, 4.0);
        let mut d = ranges(&anchors, &truth);
        // Corrupt one reading, then down-weight it hard.
        d[3] += 5.0;
        let weights = [1.0, 1.0, 1.0, 1e-3, 1.0];

        let biased = trilaterate(&anchors, &d, None, LinearFormulation::default()).unwrap();
        let weighted =
            trilaterate(&anchors, &d, Some(&weights), LinearFormulation::default()).unwrap();
        assert!((weighted - truth).norm() < (biased - truth).norm());
        assert!((weighted - truth).norm() < 0.1);
    }

    #[test]
    fn colinear_anchors_are_degenerate() {
        let anchors = vec![
            Position2::new(0.0, 0.0),
            Position2::new(1.0, 0.0),
            Position2::new(2.0, 0.0),
            Position2::new(3.0, 0.0),
        ];
        let truth = Position2::new(1.0, 2.0);
        let d = ranges(&anchors, &truth);

        for formulation in [LinearFormulation::Inhomogeneous, LinearFormulation::Homogeneous] {
            let err = trilaterate(&anchors, &d, None, formulation).unwrap_err();
            assert!(
                matches!(err, TrilaterationError::DegenerateGeometry),
                "{:?}: unexpected error {:?}",
                formulation,
                err
            );
        }
    }

    #[test]
    fn too_few_readings_rejected() {
        let anchors = vec![Position2::new(0.0, 0.0), Position2::new(1.0, 0.0)];
        let err = trilaterate(&anchors, &[1.0, 1.0], None, LinearFormulation::default())
            .unwrap_err();
        assert!(matches!(err, TrilaterationError::NotEnoughReadings { .. }));
    }

    #[test]
    fn invalid_distance_rejected() {
        let anchors = vec![
            Position2::new(0.0, 0.0),
            Position2::new(1.0, 0.0),
            Position2::new(0.0, 1.0),
        ];
        let err = trilaterate(&anchors, &[1.0, -1.0, 1.0], None, LinearFormulation::default())
            .unwrap_err();
        assert!(matches!(err, TrilaterationError::InvalidDistance));
    }
}
