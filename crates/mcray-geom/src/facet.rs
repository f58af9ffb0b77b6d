//! Planar polygonal facets with precomputed plane frames.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use mcray_math::{Aabb, Point2, Point3, Vec3};

use crate::surface::Surface;

/// Per-facet statistics updated during concurrent traversal.
///
/// Counters use relaxed atomic increments: traversal threads only ever
/// add, and readers tolerate momentary staleness.
#[derive(Debug, Default)]
pub struct FacetCounters {
    /// Number of ray/facet intersection tests performed.
    pub tests: AtomicU64,
    /// Number of hard hits registered.
    pub hard_hits: AtomicU64,
    /// Number of tree-node visits that reached this facet's leaf.
    pub traversal_steps: AtomicU64,
}

impl FacetCounters {
    /// Record one intersection test.
    #[inline]
    pub fn add_test(&self) {
        self.tests.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one hard hit.
    #[inline]
    pub fn add_hard_hit(&self) {
        self.hard_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record accumulated traversal steps (flushed from a ray-local tally).
    #[inline]
    pub fn add_traversal_steps(&self, n: u64) {
        self.traversal_steps.fetch_add(n, Ordering::Relaxed);
    }
}

/// A planar polygonal facet: the primitive being intersected.
///
/// The plane frame maps 3D space to the facet's (u, v) parameterization:
/// a point `p` on the plane satisfies `p = origin + u·basis_u + v·basis_v`
/// with the facet outline contained in the unit square. For quadrilateral
/// facets the [0,1]² bound check alone decides containment; general
/// polygons additionally need [`crate::point_in_polygon`] over
/// `vertices2`.
#[derive(Debug)]
pub struct Facet {
    /// Stable identifier assigned by the geometry layer.
    pub global_id: usize,
    /// 3D outline vertices, in order.
    pub vertices3: Vec<Point3>,
    /// Outline in (u, v) parameter space, normalized to [0,1]².
    pub vertices2: Vec<Point2>,
    /// Plane frame origin.
    pub origin: Point3,
    /// In-plane basis vector spanning the u extent (unnormalized).
    pub basis_u: Vec3,
    /// In-plane basis vector spanning the v extent (unnormalized).
    pub basis_v: Vec3,
    /// Unnormalized plane normal `basis_u × basis_v`, used by the
    /// Cramer-rule intersection solve.
    pub nuv: Vec3,
    /// Unit plane normal.
    pub normal: Vec3,
    /// Bounding box of the 3D outline.
    pub aabb: Aabb,
    /// Whether back-face hits are accepted.
    pub two_sided: bool,
    /// Physical opacity in [0, 1], consumed by [`Surface::Alpha`].
    pub opacity: f64,
    /// Shared hit classifier; many facets may point at the same instance.
    pub surface: Arc<Surface>,
    /// Concurrently updated statistics.
    pub counters: FacetCounters,
}

impl Facet {
    /// Build a facet from its 3D outline.
    ///
    /// Computes the plane frame (Newell normal, first-edge basis), the
    /// normalized 2D outline and the bounding box. Defaults to an opaque
    /// one-sided facet with opacity 1.
    pub fn new(global_id: usize, vertices3: Vec<Point3>) -> Self {
        let normal = newell_normal(&vertices3);

        // Orthonormal in-plane frame seeded by the first edge
        let u_hat = in_plane_u(&vertices3, &normal);
        let v_hat = normal.cross(&u_hat);

        // Project the outline and find its in-plane bounding rectangle
        let anchor = vertices3
            .first()
            .copied()
            .unwrap_or_else(|| Point3::new(0.0, 0.0, 0.0));
        let mut u_min = f64::INFINITY;
        let mut u_max = f64::NEG_INFINITY;
        let mut v_min = f64::INFINITY;
        let mut v_max = f64::NEG_INFINITY;
        let mut projected = Vec::with_capacity(vertices3.len());
        for p in &vertices3 {
            let d = p - anchor;
            let pu = d.dot(&u_hat);
            let pv = d.dot(&v_hat);
            u_min = u_min.min(pu);
            u_max = u_max.max(pu);
            v_min = v_min.min(pv);
            v_max = v_max.max(pv);
            projected.push((pu, pv));
        }

        // Rescale the basis so the projected outline spans [0,1]².
        // Degenerate extents keep a unit span to avoid dividing by zero.
        let u_span = if u_max > u_min { u_max - u_min } else { 1.0 };
        let v_span = if v_max > v_min { v_max - v_min } else { 1.0 };
        let origin = if vertices3.is_empty() {
            anchor
        } else {
            anchor + u_min * u_hat + v_min * v_hat
        };
        let basis_u = u_span * u_hat;
        let basis_v = v_span * v_hat;
        let vertices2: Vec<Point2> = projected
            .iter()
            .map(|&(pu, pv)| Point2::new((pu - u_min) / u_span, (pv - v_min) / v_span))
            .collect();

        let mut aabb = Aabb::empty();
        for p in &vertices3 {
            aabb.include_point(p);
        }

        Self {
            global_id,
            vertices3,
            vertices2,
            origin,
            basis_u,
            basis_v,
            nuv: basis_u.cross(&basis_v),
            normal,
            aabb,
            two_sided: false,
            opacity: 1.0,
            surface: Arc::new(Surface::Opaque),
            counters: FacetCounters::default(),
        }
    }

    /// Replace the hit classifier and opacity.
    pub fn with_surface(mut self, surface: Arc<Surface>, opacity: f64) -> Self {
        self.surface = surface;
        self.opacity = opacity;
        self
    }

    /// Accept back-face hits.
    pub fn with_two_sided(mut self, two_sided: bool) -> Self {
        self.two_sided = two_sided;
        self
    }

    /// Whether the quadrilateral fast path applies: the (u, v) bound
    /// check alone decides containment.
    #[inline]
    pub fn is_quad(&self) -> bool {
        self.vertices2.len() == 4
    }

    /// Centroid used by the tree builders (bounding-box center).
    #[inline]
    pub fn centroid(&self) -> Point3 {
        self.aabb.center()
    }
}

/// Newell's method: robust polygon normal independent of convexity.
fn newell_normal(vertices: &[Point3]) -> Vec3 {
    let mut n = Vec3::zeros();
    let len = vertices.len();
    for i in 0..len {
        let c = &vertices[i];
        let nx = &vertices[(i + 1) % len];
        n.x += (c.y - nx.y) * (c.z + nx.z);
        n.y += (c.z - nx.z) * (c.x + nx.x);
        n.z += (c.x - nx.x) * (c.y + nx.y);
    }
    let norm = n.norm();
    if norm > 0.0 {
        n / norm
    } else {
        Vec3::z()
    }
}

/// Unit in-plane u direction: the first edge with the normal component
/// removed. Falls back to any vector orthogonal to the normal when the
/// outline is degenerate.
fn in_plane_u(vertices: &[Point3], normal: &Vec3) -> Vec3 {
    if vertices.len() >= 2 {
        let edge = vertices[1] - vertices[0];
        let in_plane = edge - edge.dot(normal) * *normal;
        let norm = in_plane.norm();
        if norm > 0.0 {
            return in_plane / norm;
        }
    }
    // Arbitrary orthogonal direction
    let candidate = if normal.x.abs() < 0.9 {
        Vec3::x()
    } else {
        Vec3::y()
    };
    let in_plane = candidate - candidate.dot(normal) * *normal;
    in_plane.normalize()
}
