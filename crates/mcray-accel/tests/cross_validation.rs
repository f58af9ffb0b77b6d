//! Cross-validation: every structure and split strategy must report the
//! same hard hit and the same pierced set on a shared scene.

use std::sync::Arc;

use approx::assert_relative_eq;
use mcray_accel::{
    Bvh, BvhParams, KdParams, KdSplitMethod, KdTree, LegacyAabbTree, Ray, SplitMethod, TestRay,
};
use mcray_geom::{Facet, Surface};
use mcray_math::{Point3, Vec3};

fn square(id: usize, x: f64, y: f64, z: f64, size: f64) -> Facet {
    Facet::new(
        id,
        vec![
            Point3::new(x, y, z),
            Point3::new(x + size, y, z),
            Point3::new(x + size, y + size, z),
            Point3::new(x, y + size, z),
        ],
    )
}

/// 8x8 opaque grid at z = 0, a transparent sheet covering it at z = 2,
/// and an opaque triangle floating over cell (0, 0) at z = 1.
fn scene() -> Arc<Vec<Facet>> {
    let mut facets = Vec::new();
    for j in 0..8 {
        for i in 0..8 {
            facets.push(square(
                facets.len(),
                i as f64 * 2.0,
                j as f64 * 2.0,
                0.0,
                0.8,
            ));
        }
    }
    facets.push(
        square(64, -1.0, -1.0, 2.0, 17.0).with_surface(Arc::new(Surface::Transparent), 0.0),
    );
    facets.push(Facet::new(
        65,
        vec![
            Point3::new(0.0, 0.0, 1.0),
            Point3::new(0.8, 0.0, 1.0),
            Point3::new(0.0, 0.8, 1.0),
        ],
    ));
    Arc::new(facets)
}

fn battery() -> Vec<TestRay> {
    (0..64)
        .map(|i| {
            TestRay::new(
                Point3::new(
                    (i % 8) as f64 * 2.0 + 0.4,
                    (i / 8) as f64 * 2.0 + 0.4,
                    20.0,
                ),
                Vec3::new(0.0, 0.0, -1.0),
            )
        })
        .collect()
}

type Tracer = (&'static str, Box<dyn Fn(&mut Ray) -> bool>);

fn all_tracers(facets: &Arc<Vec<Facet>>) -> Vec<Tracer> {
    let battery = battery();
    let probs: Vec<f64> = (0..facets.len()).map(|i| 0.5 + (i % 5) as f64).collect();
    let mut tracers: Vec<Tracer> = Vec::new();

    let legacy = LegacyAabbTree::build(Arc::clone(facets));
    tracers.push(("legacy", Box::new(move |r: &mut Ray| legacy.intersect(r))));

    for (name, method) in [
        ("bvh/equal-counts", SplitMethod::EqualCounts),
        ("bvh/middle", SplitMethod::Middle),
        ("bvh/sah", SplitMethod::Sah),
        ("bvh/balanced-axes", SplitMethod::BalancedAxes),
        ("bvh/probability", SplitMethod::Probability),
        ("bvh/ray-density", SplitMethod::RayDensity),
    ] {
        let bvh = Bvh::build(
            Arc::clone(facets),
            BvhParams {
                max_prims_in_node: 2,
                split: method,
            },
            Some(&probs),
            Some(&battery),
        )
        .unwrap();
        tracers.push((name, Box::new(move |r: &mut Ray| bvh.intersect(r))));
    }

    for (name, split, ropes) in [
        ("kd/sah", KdSplitMethod::Sah, false),
        ("kd/sah-ropes", KdSplitMethod::Sah, true),
        ("kd/probability", KdSplitMethod::Probability, false),
        ("kd/ray-density", KdSplitMethod::RayDensity, false),
    ] {
        let tree = KdTree::build(
            Arc::clone(facets),
            KdParams {
                split,
                build_ropes: ropes,
                ..KdParams::default()
            },
            Some(&probs),
            Some(&battery),
        )
        .unwrap();
        tracers.push((name, Box::new(move |r: &mut Ray| tree.intersect(r))));
    }

    tracers
}

fn probe_rays() -> Vec<(Point3, Vec3)> {
    let mut rays = Vec::new();
    for i in 0..20 {
        for j in 0..20 {
            rays.push((
                Point3::new(-0.5 + i as f64 * 0.9, -0.5 + j as f64 * 0.9, 20.0),
                Vec3::new(0.0, 0.0, -1.0),
            ));
        }
    }
    // Oblique probes crossing several cells
    for i in 0..8 {
        rays.push((
            Point3::new(-2.0, 0.4 + i as f64 * 1.7, 6.0),
            Vec3::new(0.4, 0.05, -1.0),
        ));
    }
    rays
}

#[test]
fn test_all_structures_agree() {
    let facets = scene();
    let tracers = all_tracers(&facets);
    let (ref_name, reference) = &tracers[0];

    for (seed, (origin, direction)) in probe_rays().into_iter().enumerate() {
        let mut ref_ray = Ray::new(origin, direction, seed as u64);
        let ref_found = reference(&mut ref_ray);

        for (name, tracer) in &tracers[1..] {
            let mut ray = Ray::new(origin, direction, seed as u64);
            let found = tracer(&mut ray);
            assert_eq!(found, ref_found, "{name} vs {ref_name}, ray {seed}");
            if found {
                let (h, r) = (ray.hard_hit.unwrap(), ref_ray.hard_hit.unwrap());
                assert_eq!(h.facet, r.facet, "{name}, ray {seed}");
                assert!(
                    (h.distance - r.distance).abs() < 1e-9,
                    "{name}, ray {seed}: {} vs {}",
                    h.distance,
                    r.distance
                );
            }
            let mut pierced: Vec<usize> = ray.transparent_hits.iter().map(|t| t.facet).collect();
            let mut ref_pierced: Vec<usize> =
                ref_ray.transparent_hits.iter().map(|t| t.facet).collect();
            pierced.sort_unstable();
            ref_pierced.sort_unstable();
            assert_eq!(pierced, ref_pierced, "{name}, ray {seed}");
        }
    }
}

#[test]
fn test_transparent_sheet_is_pierced() {
    let facets = scene();
    for (name, tracer) in all_tracers(&facets) {
        // Over cell (3, 3): sheet at z = 2 pierced, grid square absorbs
        let mut ray = Ray::new(Point3::new(6.4, 6.4, 20.0), Vec3::new(0.0, 0.0, -1.0), 1);
        assert!(tracer(&mut ray), "{name}");
        let hit = ray.hard_hit.unwrap();
        assert_eq!(hit.facet, 3 * 8 + 3, "{name}");
        assert_relative_eq!(hit.distance, 20.0, max_relative = 1e-10);
        assert_eq!(ray.transparent_hits.len(), 1, "{name}");
        assert_eq!(ray.transparent_hits[0].facet, 64, "{name}");
        assert_relative_eq!(ray.transparent_hits[0].distance, 18.0, max_relative = 1e-10);
    }
}

#[test]
fn test_floating_triangle_shadows_cell() {
    let facets = scene();
    for (name, tracer) in all_tracers(&facets) {
        // Inside the triangle outline: it absorbs before the grid square
        let mut ray = Ray::new(Point3::new(0.2, 0.2, 20.0), Vec3::new(0.0, 0.0, -1.0), 1);
        assert!(tracer(&mut ray), "{name}");
        assert_eq!(ray.hard_hit.unwrap().facet, 65, "{name}");
        // Outside the outline but over the square: passes the triangle
        let mut ray = Ray::new(Point3::new(0.7, 0.7, 20.0), Vec3::new(0.0, 0.0, -1.0), 1);
        assert!(tracer(&mut ray), "{name}");
        assert_eq!(ray.hard_hit.unwrap().facet, 0, "{name}");
    }
}

#[test]
fn test_alpha_surface_absorption_rate() {
    // A single semi-transparent facet: the fraction of absorbed rays
    // must track the opacity
    let opacity = 0.3;
    let facets: Arc<Vec<Facet>> = Arc::new(vec![
        square(0, 0.0, 0.0, 0.0, 1.0).with_surface(Arc::new(Surface::Alpha), opacity),
    ]);
    let bvh = Bvh::build(Arc::clone(&facets), BvhParams::default(), None, None).unwrap();

    let n = 2000;
    let mut absorbed = 0;
    for seed in 0..n {
        let mut ray = Ray::new(Point3::new(0.5, 0.5, 5.0), Vec3::new(0.0, 0.0, -1.0), seed);
        if bvh.intersect(&mut ray) {
            absorbed += 1;
        } else {
            assert_eq!(ray.transparent_hits.len(), 1);
        }
    }
    let rate = absorbed as f64 / n as f64;
    assert!((rate - opacity).abs() < 0.05, "absorption rate {rate}");
}

#[test]
fn test_bounds_agree() {
    let facets = scene();
    let legacy = LegacyAabbTree::build(Arc::clone(&facets));
    let bvh = Bvh::build(Arc::clone(&facets), BvhParams::default(), None, None).unwrap();
    let kd = KdTree::build(Arc::clone(&facets), KdParams::default(), None, None).unwrap();
    let a = legacy.bounds().unwrap();
    let b = bvh.bounds().unwrap();
    let c = kd.bounds().unwrap();
    assert_eq!(a.min, b.min);
    assert_eq!(a.max, b.max);
    assert_eq!(a.min, c.min);
    assert_eq!(a.max, c.max);
}
