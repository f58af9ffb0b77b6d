#![warn(missing_docs)]

//! Math types for the mcray transport acceleration engine.
//!
//! Thin wrappers around nalgebra providing the vector and bounding-box
//! types used by the facet layer and the acceleration structures, plus
//! the conservative floating-point rounding bound used by the robust
//! ray/box slab test.

use nalgebra::{Vector2, Vector3};

pub mod aabb;

pub use aabb::Aabb;

/// A point in 3D space.
pub type Point3 = nalgebra::Point3<f64>;

/// A vector in 3D space.
pub type Vec3 = Vector3<f64>;

/// A point in 2D (u, v) parameter space.
pub type Point2 = nalgebra::Point2<f64>;

/// A vector in 2D space.
pub type Vec2 = Vector2<f64>;

/// Machine epsilon under the half-ulp rounding convention.
///
/// Error analysis for the conservative slab test treats epsilon as the
/// maximum relative rounding error of a single operation, which is half
/// of `f64::EPSILON`.
pub const MACHINE_EPSILON: f64 = f64::EPSILON * 0.5;

/// Conservative bound on accumulated rounding error after `n` operations.
///
/// `gamma(n) = n·ε / (1 − n·ε)`. The slab test inflates its far bound by
/// `1 + 2·gamma(3)` so grazing rays never miss a box they touch.
#[inline]
pub fn gamma(n: i32) -> f64 {
    let ne = n as f64 * MACHINE_EPSILON;
    ne / (1.0 - ne)
}

/// Determinant of the 3×3 matrix with columns `a`, `b`, `c`.
///
/// Scalar triple product `a · (b × c)`; used by the Cramer-rule
/// ray/facet solve.
#[inline]
pub fn det3x3(a: &Vec3, b: &Vec3, c: &Vec3) -> f64 {
    a.x * (b.y * c.z - b.z * c.y) - a.y * (b.x * c.z - b.z * c.x)
        + a.z * (b.x * c.y - b.y * c.x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_gamma_small_positive() {
        let g = gamma(3);
        assert!(g > 0.0);
        assert!(g < 1e-14);
        // gamma grows with n
        assert!(gamma(5) > g);
    }

    #[test]
    fn test_det3x3_identity() {
        let d = det3x3(
            &Vec3::new(1.0, 0.0, 0.0),
            &Vec3::new(0.0, 1.0, 0.0),
            &Vec3::new(0.0, 0.0, 1.0),
        );
        assert_relative_eq!(d, 1.0);
    }

    #[test]
    fn test_det3x3_swap_negates() {
        let a = Vec3::new(1.0, 2.0, 3.0);
        let b = Vec3::new(-2.0, 0.5, 1.0);
        let c = Vec3::new(0.0, 1.0, -1.0);
        let d1 = det3x3(&a, &b, &c);
        let d2 = det3x3(&b, &a, &c);
        assert!((d1 + d2).abs() < 1e-12);
    }

    #[test]
    fn test_det3x3_degenerate() {
        // Two equal columns -> zero determinant
        let a = Vec3::new(1.0, 2.0, 3.0);
        let c = Vec3::new(0.0, 1.0, -1.0);
        let d = det3x3(&a, &a, &c);
        assert!(d.abs() < 1e-15);
    }
}
