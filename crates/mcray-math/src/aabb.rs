//! Axis-aligned bounding box with the conservative ray/slab tests used
//! by every acceleration structure in the engine.

use crate::{gamma, Point3, Vec3};

/// Axis-aligned bounding box in 3D.
///
/// An empty box is represented by `min = +∞, max = −∞`; component-wise
/// min/max unions handle it without special cases.
#[derive(Debug, Clone, Copy)]
pub struct Aabb {
    /// Minimum corner.
    pub min: Point3,
    /// Maximum corner.
    pub max: Point3,
}

impl Aabb {
    /// Create an AABB from min and max corners.
    pub fn new(min: Point3, max: Point3) -> Self {
        Self { min, max }
    }

    /// Create an empty (inverted) AABB suitable for expansion.
    pub fn empty() -> Self {
        Self {
            min: Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY),
            max: Point3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
        }
    }

    /// An AABB containing a single point.
    pub fn from_point(p: &Point3) -> Self {
        Self { min: *p, max: *p }
    }

    /// True if this box contains no points.
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Expand this AABB to include a point.
    pub fn include_point(&mut self, p: &Point3) {
        self.min.x = self.min.x.min(p.x);
        self.min.y = self.min.y.min(p.y);
        self.min.z = self.min.z.min(p.z);
        self.max.x = self.max.x.max(p.x);
        self.max.y = self.max.y.max(p.y);
        self.max.z = self.max.z.max(p.z);
    }

    /// Expand this AABB to include another AABB.
    pub fn include(&mut self, other: &Aabb) {
        self.min.x = self.min.x.min(other.min.x);
        self.min.y = self.min.y.min(other.min.y);
        self.min.z = self.min.z.min(other.min.z);
        self.max.x = self.max.x.max(other.max.x);
        self.max.y = self.max.y.max(other.max.y);
        self.max.z = self.max.z.max(other.max.z);
    }

    /// Union of two AABBs.
    pub fn union(&self, other: &Aabb) -> Aabb {
        let mut out = *self;
        out.include(other);
        out
    }

    /// Diagonal vector from min to max corner.
    pub fn diagonal(&self) -> Vec3 {
        self.max - self.min
    }

    /// Center point of the box.
    pub fn center(&self) -> Point3 {
        Point3::new(
            0.5 * (self.min.x + self.max.x),
            0.5 * (self.min.y + self.max.y),
            0.5 * (self.min.z + self.max.z),
        )
    }

    /// Total surface area of the box faces. Zero for an empty box.
    pub fn surface_area(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let d = self.diagonal();
        2.0 * (d.x * d.y + d.y * d.z + d.z * d.x)
    }

    /// Index of the axis with the largest extent (0 = x, 1 = y, 2 = z).
    pub fn maximum_extent(&self) -> usize {
        let d = self.diagonal();
        if d.x > d.y && d.x > d.z {
            0
        } else if d.y > d.z {
            1
        } else {
            2
        }
    }

    /// Position of `p` relative to the box, normalized to [0, 1] per
    /// axis (0 at `min`, 1 at `max`). Degenerate axes map to 0.
    pub fn offset(&self, p: &Point3) -> Vec3 {
        let mut o = p - self.min;
        if self.max.x > self.min.x {
            o.x /= self.max.x - self.min.x;
        }
        if self.max.y > self.min.y {
            o.y /= self.max.y - self.min.y;
        }
        if self.max.z > self.min.z {
            o.z /= self.max.z - self.min.z;
        }
        o
    }

    /// Fast boolean slab test with precomputed reciprocal direction.
    ///
    /// `dir_is_neg[i]` selects the near/far slab per axis so the interval
    /// comparisons need no swaps. The far bound of every axis is inflated
    /// by `1 + 2·gamma(3)` so rounding at grazing angles can never turn a
    /// true hit into a miss. Zero direction components yield infinite
    /// slab parameters and fall out of the comparisons correctly.
    #[inline]
    pub fn intersect_ray(
        &self,
        origin: &Point3,
        inv_dir: &Vec3,
        dir_is_neg: [usize; 3],
        t_max: f64,
    ) -> bool {
        let bounds = [&self.min, &self.max];
        let inflate = 1.0 + 2.0 * gamma(3);

        let mut t0 = (bounds[dir_is_neg[0]].x - origin.x) * inv_dir.x;
        let mut t1 = (bounds[1 - dir_is_neg[0]].x - origin.x) * inv_dir.x * inflate;

        let ty0 = (bounds[dir_is_neg[1]].y - origin.y) * inv_dir.y;
        let ty1 = (bounds[1 - dir_is_neg[1]].y - origin.y) * inv_dir.y * inflate;
        if t0 > ty1 || ty0 > t1 {
            return false;
        }
        if ty0 > t0 {
            t0 = ty0;
        }
        if ty1 < t1 {
            t1 = ty1;
        }

        let tz0 = (bounds[dir_is_neg[2]].z - origin.z) * inv_dir.z;
        let tz1 = (bounds[1 - dir_is_neg[2]].z - origin.z) * inv_dir.z * inflate;
        if t0 > tz1 || tz0 > t1 {
            return false;
        }
        if tz0 > t0 {
            t0 = tz0;
        }
        if tz1 < t1 {
            t1 = tz1;
        }

        t0 < t_max && t1 > 0.0
    }

    /// Parametric slab test returning the surviving `[t0, t1]` interval.
    ///
    /// A zero direction component divides nothing: the axis counts as
    /// inside iff the origin lies within its slab, otherwise the ray
    /// misses outright. Rejects when the interval is empty or entirely
    /// behind the ray (`t1 < 0`). `t0` may be negative when the origin
    /// is inside the box.
    pub fn intersect_ray_interval(&self, origin: &Point3, dir: &Vec3) -> Option<(f64, f64)> {
        let mut t_near = f64::NEG_INFINITY;
        let mut t_far = f64::INFINITY;
        let inflate = 1.0 + 2.0 * gamma(3);

        for axis in 0..3 {
            let d = dir[axis];
            if d == 0.0 {
                if origin[axis] < self.min[axis] || origin[axis] > self.max[axis] {
                    return None;
                }
            } else {
                let inv = 1.0 / d;
                let mut n = (self.min[axis] - origin[axis]) * inv;
                let mut f = (self.max[axis] - origin[axis]) * inv;
                if n > f {
                    std::mem::swap(&mut n, &mut f);
                }
                f *= inflate;
                t_near = t_near.max(n);
                t_far = t_far.min(f);
                if t_near > t_far {
                    return None;
                }
            }
        }

        if t_far < 0.0 {
            return None;
        }
        Some((t_near, t_far))
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}
