//! Per-query ray state and hit records.

use mcray_math::{Aabb, Point3, Vec3};
use rand::rngs::SmallRng;
use rand::SeedableRng;

/// The surviving absorbing hit of a traversal.
#[derive(Debug, Clone, Copy)]
pub struct HardHit {
    /// Global id of the hit facet.
    pub facet: usize,
    /// Distance along the ray.
    pub distance: f64,
    /// Facet-frame u coordinate of the hit.
    pub u: f64,
    /// Facet-frame v coordinate of the hit.
    pub v: f64,
}

/// A facet pierced before the final hard hit.
#[derive(Debug, Clone, Copy)]
pub struct TransparentHit {
    /// Global id of the pierced facet.
    pub facet: usize,
    /// Facet-frame u coordinate.
    pub u: f64,
    /// Facet-frame v coordinate.
    pub v: f64,
    /// Distance along the ray.
    pub distance: f64,
}

/// A ray in 3D space with the mutable per-query state of one traversal.
///
/// Owned exclusively by the calling thread for its lifetime. `t_max`
/// only ever shrinks as closer hard hits are found, which is what lets
/// ordered traversal prune far subtrees. `last_intersected` suppresses
/// immediate self-intersection when a ray restarts exactly on the facet
/// it previously hit.
#[derive(Debug, Clone)]
pub struct Ray {
    /// Origin point of the ray.
    pub origin: Point3,
    /// Unit direction of the ray.
    pub direction: Vec3,
    /// Precomputed reciprocal of direction components for fast AABB tests.
    inv_direction: Vec3,
    /// Per-axis direction sign (0 if positive, 1 if negative).
    dir_is_neg: [usize; 3],
    /// Current search horizon; shrinks monotonically on hard hits.
    pub t_max: f64,
    /// Facet the ray last hit, excluded from intersection tests.
    pub last_intersected: Option<usize>,
    /// RNG used for opacity sampling, owned by the ray.
    pub rng: SmallRng,
    /// The surviving hard hit, if any.
    pub hard_hit: Option<HardHit>,
    /// Facets pierced before the final hard hit.
    pub transparent_hits: Vec<TransparentHit>,
}

impl Ray {
    /// Create a new ray from origin and direction, with its RNG seeded
    /// by the caller.
    ///
    /// The direction will be normalized.
    pub fn new(origin: Point3, direction: Vec3, seed: u64) -> Self {
        Self::with_rng(origin, direction, SmallRng::seed_from_u64(seed))
    }

    /// Create a new ray carrying an existing RNG.
    pub fn with_rng(origin: Point3, direction: Vec3, rng: SmallRng) -> Self {
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
            t_max: f64::INFINITY,
            last_intersected: None,
            rng,
            hard_hit: None,
            transparent_hits: Vec::new(),
        }
    }

    /// Re-arm the ray for its next bounce without reseeding the RNG.
    ///
    /// Sets `last_intersected` to the previous hard hit (if any), resets
    /// the horizon and clears both hit records.
    pub fn reset(&mut self, origin: Point3, direction: Vec3) {
        self.last_intersected = self.hard_hit.map(|h| h.facet).or(self.last_intersected);
        self.origin = origin;
        self.direction = direction.normalize();
        self.inv_direction = Vec3::new(
            1.0 / self.direction.x,
            1.0 / self.direction.y,
            1.0 / self.direction.z,
        );
        self.dir_is_neg = [
            (self.inv_direction.x < 0.0) as usize,
            (self.inv_direction.y < 0.0) as usize,
            (self.inv_direction.z < 0.0) as usize,
        ];
        self.t_max = f64::INFINITY;
        self.hard_hit = None;
        self.transparent_hits.clear();
    }

    /// Evaluate the ray at parameter `t`: `origin + t * direction`.
    #[inline]
    pub fn at(&self, t: f64) -> Point3 {
        self.origin + t * self.direction
    }

    /// Precomputed reciprocal direction.
    #[inline]
    pub fn inv_direction(&self) -> Vec3 {
        self.inv_direction
    }

    /// Per-axis direction signs for the sign-indexed slab test.
    #[inline]
    pub fn dir_is_neg(&self) -> [usize; 3] {
        self.dir_is_neg
    }

    /// Fast boolean box test against the current horizon.
    #[inline]
    pub fn intersect_aabb(&self, aabb: &Aabb) -> bool {
        aabb.intersect_ray(&self.origin, &self.inv_direction, self.dir_is_neg, self.t_max)
    }

    /// Parametric box test returning the `[t0, t1]` interval.
    #[inline]
    pub fn intersect_aabb_interval(&self, aabb: &Aabb) -> Option<(f64, f64)> {
        aabb.intersect_ray_interval(&self.origin, &self.direction)
    }

    /// Drop transparent hits that are not strictly closer than the final
    /// hard hit; they occurred behind the true stopping point and carry
    /// no physical meaning.
    pub fn prune_transparent_hits(&mut self) {
        if let Some(hard) = self.hard_hit {
            self.transparent_hits.retain(|h| h.distance < hard.distance);
        }
    }

    /// Terminal traversal result: `(found, facet, distance)`.
    pub fn result(&self) -> (bool, Option<usize>, f64) {
        match self.hard_hit {
            Some(h) => (true, Some(h.facet), h.distance),
            None => (false, None, f64::INFINITY),
        }
    }
}
