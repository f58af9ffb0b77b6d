//! Recorded sample rays ("battery") used to bias split heuristics.
//!
//! A battery is borrowed by a builder for the duration of construction
//! only; traversal never touches it. Builders track the surviving
//! subset per node as index lists into the original slice, so deeper
//! nodes reason about a shrinking, relevant sample without cloning rays.

use mcray_math::{Aabb, Point3, Vec3};

/// One previously issued ray sample: origin and direction, with the
/// slab-test reciprocals precomputed since each sample is box-tested
/// many times during construction.
#[derive(Debug, Clone, Copy)]
pub struct TestRay {
    /// Sample origin.
    pub origin: Point3,
    /// Sample direction (normalized).
    pub direction: Vec3,
    inv_direction: Vec3,
    dir_is_neg: [usize; 3],
}

impl TestRay {
    /// Create a sample ray; the direction will be normalized.
    pub fn new(origin: Point3, direction: Vec3) -> Self {
        let dir = direction.normalize();
        let inv = Vec3::new(1.0 / dir.x, 1.0 / dir.y, 1.0 / dir.z);
        Self {
            origin,
            direction: dir,
            inv_direction: inv,
            dir_is_neg: [
                (inv.x < 0.0) as usize,
                (inv.y < 0.0) as usize,
                (inv.z < 0.0) as usize,
            ],
        }
    }

    /// Whether this sample hits the box at any positive distance.
    #[inline]
    pub fn hits(&self, aabb: &Aabb) -> bool {
        aabb.intersect_ray(&self.origin, &self.inv_direction, self.dir_is_neg, f64::INFINITY)
    }
}

/// Count how many of the referenced samples hit the box.
pub(crate) fn count_hits(battery: &[TestRay], subset: &[u32], aabb: &Aabb) -> usize {
    subset
        .iter()
        .filter(|&&i| battery[i as usize].hits(aabb))
        .count()
}

/// Keep only the referenced samples that hit the box.
pub(crate) fn filter_hits(battery: &[TestRay], subset: &[u32], aabb: &Aabb) -> Vec<u32> {
    subset
        .iter()
        .copied()
        .filter(|&i| battery[i as usize].hits(aabb))
        .collect()
}
