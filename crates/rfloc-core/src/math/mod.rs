//! Mathematical type definitions.
//!
//! Solvers are generic over the spatial dimension `D` (2 for planar indoor
//! maps, 3 for full positioning), so the aliases here are const-generic with
//! concrete shorthands for the two supported dimensions.

use nalgebra::{SMatrix, SVector};

/// Scalar type used throughout the library (currently `f64`).
pub type Real = f64;

/// D-dimensional position or displacement with [`Real`] components.
pub type Position<const D: usize> = SVector<Real, D>;
/// D×D covariance matrix with [`Real`] entries.
pub type Covariance<const D: usize> = SMatrix<Real, D, D>;

/// 2D position.
pub type Position2 = Position<2>;
/// 3D position.
pub type Position3 = Position<3>;
/// 2×2 covariance matrix.
pub type Covariance2 = Covariance<2>;
/// 3×3 covariance matrix.
pub type Covariance3 = Covariance<3>;
