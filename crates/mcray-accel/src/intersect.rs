//! Ray/facet intersection algebra and hit classification.
//!
//! This is the per-candidate core every traversal funnels through:
//! solve for (u, v, distance) in the facet's plane frame via Cramer's
//! rule, check containment, then let the facet's [`Surface`] decide
//! whether the hit is absorbing.
//!
//! [`Surface`]: mcray_geom::Surface

use mcray_geom::{point_in_polygon, Facet};
use mcray_math::det3x3;

use crate::ray::{HardHit, Ray, TransparentHit};

/// Test one facet against the ray, updating the ray's hit state.
///
/// Returns `true` iff a new hard hit was registered. Misses are cheap
/// explicit branches: back-faces on one-sided facets, grazing hits
/// (`det == 0`), out-of-bounds (u, v), hits behind the origin or beyond
/// the current horizon. A facet equal to `last_intersected` is skipped
/// outright so a ray restarting exactly on its previous hit point does
/// not re-report it at distance zero.
pub fn intersect_facet(ray: &mut Ray, facet: &Facet) -> bool {
    if ray.last_intersected == Some(facet.global_id) {
        return false;
    }
    facet.counters.add_test();

    let neg_dir = -ray.direction;
    let det = facet.nuv.dot(&neg_dir);
    if !facet.two_sided && det <= 0.0 {
        return false;
    }
    if det == 0.0 {
        return false;
    }

    // Cramer's rule on [basis_u, basis_v, -d] · (u, v, dist) = o - origin
    let rhs = ray.origin - facet.origin;
    let u = det3x3(&rhs, &facet.basis_v, &neg_dir) / det;
    if !(0.0..=1.0).contains(&u) {
        return false;
    }
    let v = det3x3(&facet.basis_u, &rhs, &neg_dir) / det;
    if !(0.0..=1.0).contains(&v) {
        return false;
    }
    let dist = det3x3(&facet.basis_u, &facet.basis_v, &rhs) / det;
    if dist <= 0.0 || dist >= ray.t_max {
        return false;
    }

    // Quads are decided by the bound check alone; general polygons need
    // the outline test
    if !facet.is_quad() && !point_in_polygon(u, v, &facet.vertices2) {
        return false;
    }

    // A primitive spanning several kd leaves is re-tested by every leaf
    // that references it; a revisit must not draw opacity again, or an
    // alpha facet's absorption probability would compound per visit.
    // (A revisited hard hit is already rejected by the horizon check:
    // its distance equals t_max.)
    let already_recorded = ray
        .transparent_hits
        .iter()
        .any(|h| h.facet == facet.global_id && h.distance == dist);
    if already_recorded {
        return false;
    }

    if facet.surface.is_hard_hit(facet.opacity, &mut ray.rng) {
        // Strictly closer than any previous hard hit (dist < t_max held)
        facet.counters.add_hard_hit();
        ray.t_max = dist;
        ray.hard_hit = Some(HardHit {
            facet: facet.global_id,
            distance: dist,
            u,
            v,
        });
        true
    } else {
        ray.transparent_hits.push(TransparentHit {
            facet: facet.global_id,
            u,
            v,
            distance: dist,
        });
        false
    }
}

/// Shared traversal epilogue: flush the ray-local step tally to the hit
/// facet, prune stale transparent hits and report whether a hard hit
/// survived.
pub(crate) fn finish_traversal(ray: &mut Ray, steps: u64, facets: &[Facet]) -> bool {
    if let Some(hard) = ray.hard_hit {
        if let Some(facet) = facets.get(hard.facet) {
            facet.counters.add_traversal_steps(steps);
        }
    }
    ray.prune_transparent_hits();
    ray.hard_hit.is_some()
}
