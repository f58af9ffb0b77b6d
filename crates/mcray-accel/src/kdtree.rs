//! Kd-tree over facets.
//!
//! Space partitioning: node boxes never overlap, but a facet whose box
//! straddles a split plane is referenced from both children. Splits are
//! chosen by a sort-and-sweep cost minimization over primitive bound
//! edges; the cost model is either geometric (surface-area ratios),
//! probability-weighted, or driven by a recorded sample-ray battery.
//!
//! Traversal is an ordered front-to-back walk with an explicit interval
//! stack. When ropes are built, leaves additionally carry per-face
//! neighbor links and traversal becomes stackless: exit one leaf
//! through a face, follow the rope, descend to the next leaf.

use std::sync::Arc;

use rayon::prelude::*;

use mcray_geom::Facet;

use crate::battery::{self, TestRay};
use crate::error::{BuildError, Result};
use crate::intersect::{finish_traversal, intersect_facet};
use crate::ray::Ray;
use mcray_math::Aabb;

/// Split cost models for [`KdTree::build`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KdSplitMethod {
    /// Classic surface-area heuristic over bound edges.
    Sah,
    /// SAH sweep with per-facet probability replacing the primitive
    /// count in the cost. Without supplied probabilities every facet
    /// weighs 1 and this reduces to plain SAH.
    Probability,
    /// Battery-driven: the geometric child-hit probabilities are
    /// replaced by the fraction of surviving sample rays that box-test
    /// positive against each candidate child. Falls back to SAH when
    /// the battery is empty.
    RayDensity,
}

/// Construction parameters for [`KdTree::build`].
#[derive(Debug, Clone, Copy)]
pub struct KdParams {
    /// Split cost model.
    pub split: KdSplitMethod,
    /// Leaf formation threshold: stop when this few primitives remain.
    pub max_prims: usize,
    /// Estimated cost of one ray/facet intersection, relative to
    /// `traversal_cost`.
    pub isect_cost: f64,
    /// Estimated cost of one interior-node step.
    pub traversal_cost: f64,
    /// Cost discount in `[0, 1]` for splits that cut off empty space.
    pub empty_bonus: f64,
    /// Recursion cap; `None` derives `8 + 1.3·log2(n)` from the
    /// primitive count.
    pub max_depth: Option<usize>,
    /// Build per-face neighbor links and use stackless traversal.
    pub build_ropes: bool,
}

impl Default for KdParams {
    fn default() -> Self {
        Self {
            split: KdSplitMethod::Sah,
            max_prims: 1,
            isect_cost: 80.0,
            traversal_cost: 1.0,
            empty_bonus: 0.5,
            max_depth: None,
            build_ropes: false,
        }
    }
}

/// Flat kd node. `above_child` is patched in once the below subtree has
/// been emitted; the below child always sits at `index + 1`.
#[derive(Debug, Clone, Copy)]
enum KdNode {
    Interior {
        axis: u8,
        split: f64,
        above_child: u32,
    },
    Leaf {
        first: u32,
        count: u32,
    },
}

/// Per-leaf neighbor links, one per box face. Face `2·axis + 1` is the
/// max face on that axis, `2·axis` the min face. `None` means the scene
/// boundary.
type Ropes = [Option<u32>; 6];

/// Kd-tree acceleration structure for ray/facet intersection.
#[derive(Debug)]
pub struct KdTree {
    facets: Arc<Vec<Facet>>,
    nodes: Vec<KdNode>,
    node_bounds: Vec<Aabb>,
    prim_indices: Vec<u32>,
    bounds: Aabb,
    ropes: Option<Vec<Ropes>>,
}

impl KdTree {
    /// Build a kd-tree over the facet list.
    ///
    /// `probabilities`, when supplied, must have one entry per facet
    /// and is consumed by [`KdSplitMethod::Probability`]. `battery`
    /// feeds [`KdSplitMethod::RayDensity`]; an empty or missing battery
    /// makes that model fall back to SAH. An empty facet list yields a
    /// valid empty tree.
    pub fn build(
        facets: Arc<Vec<Facet>>,
        params: KdParams,
        probabilities: Option<&[f64]>,
        battery: Option<&[TestRay]>,
    ) -> Result<Self> {
        if let Some(probs) = probabilities {
            if probs.len() != facets.len() {
                return Err(BuildError::ProbabilityCount {
                    got: probs.len(),
                    expected: facets.len(),
                });
            }
        }

        let mut bounds = Aabb::empty();
        for f in facets.iter() {
            bounds.include(&f.aabb);
        }

        if facets.is_empty() {
            return Ok(Self {
                facets,
                nodes: Vec::new(),
                node_bounds: Vec::new(),
                prim_indices: Vec::new(),
                bounds,
                ropes: None,
            });
        }

        let battery = battery.unwrap_or(&[]);
        let split = if params.split == KdSplitMethod::RayDensity && battery.is_empty() {
            log::debug!("kd-tree: empty battery, ray-density split falls back to SAH");
            KdSplitMethod::Sah
        } else {
            params.split
        };

        let n = facets.len();
        let max_depth = params
            .max_depth
            .unwrap_or_else(|| (8.0 + 1.3 * (n as f64).log2()).round() as usize);

        let mut builder = KdBuilder {
            facets: &facets,
            params,
            split,
            probabilities,
            battery,
            nodes: Vec::new(),
            node_bounds: Vec::new(),
            prim_indices: Vec::new(),
        };
        let root_prims: Vec<u32> = (0..n as u32).collect();
        let root_subset: Vec<u32> = if split == KdSplitMethod::RayDensity {
            (0..battery.len() as u32).collect()
        } else {
            Vec::new()
        };
        builder.build_node(bounds, root_prims, max_depth, 0, &root_subset);

        let ropes = params
            .build_ropes
            .then(|| link_ropes(&builder.nodes, &builder.node_bounds));

        log::debug!(
            "kd-tree built over {} facets: {} nodes, {} prim refs, model {:?}{}",
            n,
            builder.nodes.len(),
            builder.prim_indices.len(),
            split,
            if ropes.is_some() { ", ropes" } else { "" }
        );

        // Drop the builder (and its borrow of the facet list) before
        // moving the list into the tree
        let KdBuilder {
            nodes,
            node_bounds,
            prim_indices,
            ..
        } = builder;

        Ok(Self {
            facets,
            nodes,
            node_bounds,
            prim_indices,
            bounds,
            ropes,
        })
    }

    /// Nearest-hard-hit search; uses rope traversal when ropes were
    /// built, the interval stack otherwise.
    pub fn intersect(&self, ray: &mut Ray) -> bool {
        if self.nodes.is_empty() {
            return finish_traversal(ray, 0, &self.facets);
        }
        match &self.ropes {
            Some(ropes) => self.intersect_ropes(ray, ropes),
            None => self.intersect_stack(ray),
        }
    }

    /// Scene bounding box, if the tree is non-empty.
    pub fn bounds(&self) -> Option<Aabb> {
        if self.nodes.is_empty() {
            None
        } else {
            Some(self.bounds)
        }
    }

    /// Front-to-back traversal with an explicit (node, interval) stack.
    fn intersect_stack(&self, ray: &mut Ray) -> bool {
        let interval = ray.intersect_aabb_interval(&self.bounds);
        let (mut t_min, mut t_max) = match interval {
            Some(i) if i.1 > 0.0 => (i.0.max(0.0), i.1),
            _ => return finish_traversal(ray, 0, &self.facets),
        };

        let inv_dir = ray.inv_direction();
        let mut todo: Vec<(usize, f64, f64)> = Vec::with_capacity(64);
        let mut current = 0usize;
        let mut steps = 0u64;

        loop {
            // A hard hit closer than every unvisited region ends the walk
            if ray.t_max < t_min {
                break;
            }
            steps += 1;
            match self.nodes[current] {
                KdNode::Interior {
                    axis,
                    split,
                    above_child,
                } => {
                    let axis = axis as usize;
                    let t_plane = (split - ray.origin[axis]) * inv_dir[axis];
                    let below_first = ray.origin[axis] < split
                        || (ray.origin[axis] == split && ray.direction[axis] <= 0.0);
                    let (first, second) = if below_first {
                        (current + 1, above_child as usize)
                    } else {
                        (above_child as usize, current + 1)
                    };
                    if t_plane > t_max || t_plane <= 0.0 {
                        current = first;
                    } else if t_plane < t_min {
                        current = second;
                    } else {
                        todo.push((second, t_plane, t_max));
                        current = first;
                        t_max = t_plane;
                    }
                }
                KdNode::Leaf { first, count } => {
                    for &p in &self.prim_indices[first as usize..(first + count) as usize] {
                        intersect_facet(ray, &self.facets[p as usize]);
                    }
                    match todo.pop() {
                        Some((node, t0, t1)) => {
                            current = node;
                            t_min = t0;
                            t_max = t1;
                        }
                        None => break,
                    }
                }
            }
        }

        finish_traversal(ray, steps, &self.facets)
    }

    /// Stackless traversal: descend to the leaf holding the entry
    /// point, test it, leave through the cheapest exit face and follow
    /// that face's rope.
    fn intersect_ropes(&self, ray: &mut Ray, ropes: &[Ropes]) -> bool {
        let interval = ray.intersect_aabb_interval(&self.bounds);
        let (entry, exit_scene) = match interval {
            Some(i) if i.1 > 0.0 => (i.0.max(0.0), i.1),
            _ => return finish_traversal(ray, 0, &self.facets),
        };

        let mut t_entry = entry;
        let mut current = 0usize;
        let mut steps = 0u64;

        loop {
            if t_entry > ray.t_max || t_entry > exit_scene {
                break;
            }
            // Descend to the leaf containing the entry point; ties on a
            // split plane resolve toward where the ray is headed
            let point = ray.at(t_entry);
            loop {
                match self.nodes[current] {
                    KdNode::Interior {
                        axis,
                        split,
                        above_child,
                    } => {
                        steps += 1;
                        let axis = axis as usize;
                        let below = point[axis] < split
                            || (point[axis] == split && ray.direction[axis] <= 0.0);
                        current = if below { current + 1 } else { above_child as usize };
                    }
                    KdNode::Leaf { .. } => break,
                }
            }
            steps += 1;
            if let KdNode::Leaf { first, count } = self.nodes[current] {
                for &p in &self.prim_indices[first as usize..(first + count) as usize] {
                    intersect_facet(ray, &self.facets[p as usize]);
                }
            }

            // Exit face: smallest forward distance out of this leaf box
            let nb = &self.node_bounds[current];
            let mut t_exit = f64::INFINITY;
            let mut exit_face = 0usize;
            for axis in 0..3 {
                let d = ray.direction[axis];
                if d == 0.0 {
                    continue;
                }
                let (bound, face) = if d > 0.0 {
                    (nb.max[axis], 2 * axis + 1)
                } else {
                    (nb.min[axis], 2 * axis)
                };
                let t = (bound - ray.origin[axis]) / d;
                if t < t_exit {
                    t_exit = t;
                    exit_face = face;
                }
            }
            if !t_exit.is_finite() || ray.t_max <= t_exit {
                break;
            }
            match ropes[current][exit_face] {
                Some(next) => {
                    current = next as usize;
                    t_entry = t_exit;
                }
                None => break,
            }
        }

        finish_traversal(ray, steps, &self.facets)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeKind {
    Start = 0,
    End = 1,
}

/// One end of a primitive's extent along the sweep axis.
#[derive(Debug, Clone, Copy)]
struct BoundEdge {
    t: f64,
    prim: u32,
    kind: EdgeKind,
}

struct KdBuilder<'a> {
    facets: &'a [Facet],
    params: KdParams,
    /// Effective split model (battery fallback already applied).
    split: KdSplitMethod,
    probabilities: Option<&'a [f64]>,
    battery: &'a [TestRay],
    nodes: Vec<KdNode>,
    node_bounds: Vec<Aabb>,
    prim_indices: Vec<u32>,
}

impl KdBuilder<'_> {
    fn build_node(
        &mut self,
        bounds: Aabb,
        prims: Vec<u32>,
        depth: usize,
        bad_refines: usize,
        subset: &[u32],
    ) -> u32 {
        if prims.len() <= self.params.max_prims || depth == 0 {
            return self.make_leaf(bounds, prims);
        }

        let total_mass: f64 = prims.iter().map(|&p| self.mass_of(p)).sum();
        let old_cost = self.params.isect_cost * total_mass;
        let choice = self.choose_split(&bounds, &prims, total_mass, subset);
        let (axis, split_t, best_cost) = match choice {
            Some(c) => c,
            None => return self.make_leaf(bounds, prims),
        };

        let mut bad_refines = bad_refines;
        if best_cost > old_cost {
            bad_refines += 1;
        }
        // A chain of refinements that never pays for itself stops here
        if (best_cost > 4.0 * old_cost && prims.len() < 16) || bad_refines == 3 {
            return self.make_leaf(bounds, prims);
        }

        let mut below_prims = Vec::new();
        let mut above_prims = Vec::new();
        for &p in &prims {
            let b = &self.facets[p as usize].aabb;
            if b.max[axis] <= split_t {
                below_prims.push(p);
            } else if b.min[axis] >= split_t {
                above_prims.push(p);
            } else {
                // Straddles the plane: referenced from both children
                below_prims.push(p);
                above_prims.push(p);
            }
        }

        let mut below_bounds = bounds;
        below_bounds.max[axis] = split_t;
        let mut above_bounds = bounds;
        above_bounds.min[axis] = split_t;

        let (below_subset, above_subset) =
            if self.split == KdSplitMethod::RayDensity && !subset.is_empty() {
                (
                    battery::filter_hits(self.battery, subset, &below_bounds),
                    battery::filter_hits(self.battery, subset, &above_bounds),
                )
            } else {
                (Vec::new(), Vec::new())
            };

        let idx = self.nodes.len() as u32;
        self.nodes.push(KdNode::Interior {
            axis: axis as u8,
            split: split_t,
            above_child: 0,
        });
        self.node_bounds.push(bounds);

        self.build_node(below_bounds, below_prims, depth - 1, bad_refines, &below_subset);
        let above = self.build_node(above_bounds, above_prims, depth - 1, bad_refines, &above_subset);
        if let KdNode::Interior { above_child, .. } = &mut self.nodes[idx as usize] {
            *above_child = above;
        }
        idx
    }

    fn make_leaf(&mut self, bounds: Aabb, prims: Vec<u32>) -> u32 {
        let idx = self.nodes.len() as u32;
        let first = self.prim_indices.len() as u32;
        let count = prims.len() as u32;
        self.prim_indices.extend(prims);
        self.nodes.push(KdNode::Leaf { first, count });
        self.node_bounds.push(bounds);
        idx
    }

    fn mass_of(&self, prim: u32) -> f64 {
        match (self.split, self.probabilities) {
            (KdSplitMethod::Probability, Some(w)) => w[prim as usize],
            _ => 1.0,
        }
    }

    /// Try the widest axis first, then the remaining two, keeping the
    /// first axis that yields any in-bounds candidate edge.
    fn choose_split(
        &self,
        bounds: &Aabb,
        prims: &[u32],
        total_mass: f64,
        subset: &[u32],
    ) -> Option<(usize, f64, f64)> {
        let mut axis = bounds.maximum_extent();
        for _ in 0..3 {
            if let Some((t, cost)) = self.sweep_axis(bounds, prims, total_mass, axis, subset) {
                return Some((axis, t, cost));
            }
            axis = (axis + 1) % 3;
        }
        None
    }

    /// Sort the 2n bound edges along `axis` and sweep, scoring every
    /// edge that falls strictly inside the node. Battery-driven costs
    /// are gathered first and scored in parallel (each candidate
    /// box-tests the whole surviving battery); the argmin is taken
    /// sequentially so the choice is deterministic.
    fn sweep_axis(
        &self,
        bounds: &Aabb,
        prims: &[u32],
        total_mass: f64,
        axis: usize,
        subset: &[u32],
    ) -> Option<(f64, f64)> {
        let mut edges = Vec::with_capacity(2 * prims.len());
        for &p in prims {
            let b = &self.facets[p as usize].aabb;
            edges.push(BoundEdge {
                t: b.min[axis],
                prim: p,
                kind: EdgeKind::Start,
            });
            edges.push(BoundEdge {
                t: b.max[axis],
                prim: p,
                kind: EdgeKind::End,
            });
        }
        edges.sort_by(|a, b| {
            a.t.total_cmp(&b.t)
                .then_with(|| (a.kind as u8).cmp(&(b.kind as u8)))
        });

        let use_battery = self.split == KdSplitMethod::RayDensity && !subset.is_empty();
        let d = bounds.diagonal();
        let (o0, o1) = ((axis + 1) % 3, (axis + 2) % 3);
        let cap_area = d[o0] * d[o1];
        let edge_term = d[o0] + d[o1];
        let inv_area = 1.0 / bounds.surface_area();

        let mut mass_below = 0.0;
        let mut mass_above = total_mass;
        let mut best: Option<(f64, f64)> = None;
        let mut candidates: Vec<(f64, f64, f64)> = Vec::new();
        for edge in &edges {
            if edge.kind == EdgeKind::End {
                mass_above -= self.mass_of(edge.prim);
            }
            if edge.t > bounds.min[axis] && edge.t < bounds.max[axis] {
                if use_battery {
                    candidates.push((edge.t, mass_below, mass_above));
                } else {
                    let area_below = 2.0 * (cap_area + (edge.t - bounds.min[axis]) * edge_term);
                    let area_above = 2.0 * (cap_area + (bounds.max[axis] - edge.t) * edge_term);
                    let cost = self.split_cost(
                        area_below * inv_area,
                        area_above * inv_area,
                        mass_below,
                        mass_above,
                    );
                    if best.map_or(true, |(_, c)| cost < c) {
                        best = Some((edge.t, cost));
                    }
                }
            }
            if edge.kind == EdgeKind::Start {
                mass_below += self.mass_of(edge.prim);
            }
        }

        if use_battery && !candidates.is_empty() {
            let total = subset.len() as f64;
            let costs: Vec<(f64, f64)> = candidates
                .par_iter()
                .map(|&(t, mb, ma)| {
                    let mut below_box = *bounds;
                    below_box.max[axis] = t;
                    let mut above_box = *bounds;
                    above_box.min[axis] = t;
                    let p_below =
                        battery::count_hits(self.battery, subset, &below_box) as f64 / total;
                    let p_above =
                        battery::count_hits(self.battery, subset, &above_box) as f64 / total;
                    (t, self.split_cost(p_below, p_above, mb, ma))
                })
                .collect();
            for &(t, cost) in &costs {
                if best.map_or(true, |(_, c)| cost < c) {
                    best = Some((t, cost));
                }
            }
        }

        best
    }

    fn split_cost(&self, p_below: f64, p_above: f64, mass_below: f64, mass_above: f64) -> f64 {
        let bonus = if mass_below == 0.0 || mass_above == 0.0 {
            self.params.empty_bonus
        } else {
            0.0
        };
        self.params.traversal_cost
            + self.params.isect_cost
                * (1.0 - bonus)
                * (p_below * mass_below + p_above * mass_above)
    }
}

/// Distribute per-face neighbor links down to the leaves.
///
/// An interior node splits its box in two; the below child's max face
/// on the split axis faces the above child and vice versa, while the
/// four remaining faces inherit the parent's ropes, pushed as deep into
/// the neighbor subtree as this node's box allows.
fn link_ropes(nodes: &[KdNode], node_bounds: &[Aabb]) -> Vec<Ropes> {
    let mut out = vec![[None; 6]; nodes.len()];
    let mut stack: Vec<(u32, Ropes)> = vec![(0, [None; 6])];
    while let Some((idx, mut ropes)) = stack.pop() {
        match nodes[idx as usize] {
            KdNode::Leaf { .. } => out[idx as usize] = ropes,
            KdNode::Interior {
                axis, above_child, ..
            } => {
                let bounds = &node_bounds[idx as usize];
                for (face, rope) in ropes.iter_mut().enumerate() {
                    if let Some(target) = *rope {
                        *rope = Some(push_down(nodes, target, face, bounds));
                    }
                }
                let axis = axis as usize;
                let mut below = ropes;
                below[2 * axis + 1] = Some(above_child);
                let mut above = ropes;
                above[2 * axis] = Some(idx + 1);
                stack.push((idx + 1, below));
                stack.push((above_child, above));
            }
        }
    }
    out
}

/// Descend a rope target as far as this node's box permits, so leaves
/// end up pointing at the deepest neighbor that still covers the whole
/// shared face.
fn push_down(nodes: &[KdNode], mut target: u32, face: usize, bounds: &Aabb) -> u32 {
    let face_axis = face / 2;
    loop {
        match nodes[target as usize] {
            KdNode::Leaf { .. } => return target,
            KdNode::Interior {
                axis,
                split,
                above_child,
            } => {
                let axis = axis as usize;
                if axis == face_axis {
                    // Neighbor splits along the shared face normal: only
                    // the child adjacent to the face is reachable
                    target = if face % 2 == 1 { target + 1 } else { above_child };
                } else if split >= bounds.max[axis] {
                    target += 1;
                } else if split <= bounds.min[axis] {
                    target = above_child;
                } else {
                    return target;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcray_geom::Surface;
    use mcray_math::{Point3, Vec3};

    fn square_at(id: usize, x: f64, y: f64, z: f64) -> Facet {
        Facet::new(
            id,
            vec![
                Point3::new(x, y, z),
                Point3::new(x + 0.8, y, z),
                Point3::new(x + 0.8, y + 0.8, z),
                Point3::new(x, y + 0.8, z),
            ],
        )
    }

    fn plate_stack(n: usize) -> Arc<Vec<Facet>> {
        Arc::new((0..n).map(|i| square_at(i, 0.0, 0.0, i as f64)).collect())
    }

    fn grid() -> Arc<Vec<Facet>> {
        let mut facets = Vec::new();
        for j in 0..8 {
            for i in 0..8 {
                facets.push(square_at(facets.len(), i as f64 * 2.0, j as f64 * 2.0, 0.0));
            }
        }
        Arc::new(facets)
    }

    fn down_ray(x: f64, y: f64) -> Ray {
        Ray::new(Point3::new(x, y, 20.0), Vec3::new(0.0, 0.0, -1.0), 5)
    }

    fn with_ropes() -> KdParams {
        KdParams {
            build_ropes: true,
            ..KdParams::default()
        }
    }

    #[test]
    fn test_empty_input() {
        let tree = KdTree::build(Arc::new(Vec::new()), KdParams::default(), None, None).unwrap();
        let mut ray = down_ray(0.5, 0.5);
        assert!(!tree.intersect(&mut ray));
        assert!(tree.bounds().is_none());
    }

    #[test]
    fn test_probability_length_mismatch() {
        let err = KdTree::build(
            plate_stack(4),
            KdParams {
                split: KdSplitMethod::Probability,
                ..KdParams::default()
            },
            Some(&[1.0]),
            None,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            BuildError::ProbabilityCount {
                got: 1,
                expected: 4
            }
        ));
    }

    #[test]
    fn test_nearest_plate_hit() {
        let tree = KdTree::build(plate_stack(8), KdParams::default(), None, None).unwrap();
        let mut ray = down_ray(0.4, 0.4);
        assert!(tree.intersect(&mut ray));
        let hit = ray.hard_hit.unwrap();
        assert_eq!(hit.facet, 7);
        assert!((hit.distance - 13.0).abs() < 1e-10);
    }

    #[test]
    fn test_miss_between_squares() {
        let tree = KdTree::build(grid(), KdParams::default(), None, None).unwrap();
        let mut ray = down_ray(1.9, 1.9);
        assert!(!tree.intersect(&mut ray));
    }

    #[test]
    fn test_rope_traversal_agrees_with_stack() {
        let facets = grid();
        let stacked = KdTree::build(Arc::clone(&facets), KdParams::default(), None, None).unwrap();
        let roped = KdTree::build(Arc::clone(&facets), with_ropes(), None, None).unwrap();
        assert!(roped.ropes.is_some());
        for i in 0..16 {
            let x = 0.3 + i as f64;
            let y = 14.1 - 0.9 * i as f64;
            let mut a = down_ray(x, y);
            let mut b = down_ray(x, y);
            let hit_a = stacked.intersect(&mut a);
            let hit_b = roped.intersect(&mut b);
            assert_eq!(hit_a, hit_b, "ray {i}");
            if hit_a {
                let (ha, hb) = (a.hard_hit.unwrap(), b.hard_hit.unwrap());
                assert_eq!(ha.facet, hb.facet, "ray {i}");
                assert!((ha.distance - hb.distance).abs() < 1e-12, "ray {i}");
            }
        }
    }

    #[test]
    fn test_rope_traversal_oblique_ray() {
        let facets = grid();
        let tree = KdTree::build(facets, with_ropes(), None, None).unwrap();
        // Oblique ray crossing several cells before striking square (2, 0)
        let origin = Point3::new(-3.0, 0.4, 4.0);
        let target = Point3::new(4.4, 0.4, 0.0);
        let mut ray = Ray::new(origin, target - origin, 5);
        assert!(tree.intersect(&mut ray));
        assert_eq!(ray.hard_hit.unwrap().facet, 2);
    }

    #[test]
    fn test_transparent_plates_pierced() {
        // Plates 1..8 transparent, bottom plate opaque: the ray pierces
        // all seven and stops at the bottom
        let transparent = Arc::new(Surface::Transparent);
        let facets: Arc<Vec<Facet>> = Arc::new(
            (0..8)
                .map(|i| {
                    let f = square_at(i, 0.0, 0.0, i as f64);
                    if i == 0 {
                        f
                    } else {
                        f.with_surface(Arc::clone(&transparent), 0.0)
                    }
                })
                .collect(),
        );
        for params in [KdParams::default(), with_ropes()] {
            let tree = KdTree::build(Arc::clone(&facets), params, None, None).unwrap();
            let mut ray = down_ray(0.4, 0.4);
            assert!(tree.intersect(&mut ray));
            let hit = ray.hard_hit.unwrap();
            assert_eq!(hit.facet, 0);
            assert!((hit.distance - 20.0).abs() < 1e-10);
            assert_eq!(ray.transparent_hits.len(), 7);
            // All recorded hits lie strictly in front of the hard hit
            assert!(ray
                .transparent_hits
                .iter()
                .all(|t| t.distance < hit.distance));
        }
    }

    #[test]
    fn test_alpha_sheet_spanning_leaves_draws_once() {
        // One large alpha sheet above the grid straddles every split
        // plane, so each leaf along an oblique ray re-tests it. The
        // observed absorption rate must stay at the facet's opacity,
        // not compound once per leaf visited.
        let opacity = 0.3;
        let mut facets = Vec::new();
        for j in 0..8 {
            for i in 0..8 {
                facets.push(square_at(facets.len(), i as f64 * 2.0, j as f64 * 2.0, 0.0));
            }
        }
        facets.push(
            Facet::new(
                64,
                vec![
                    Point3::new(-1.0, -1.0, 2.0),
                    Point3::new(16.0, -1.0, 2.0),
                    Point3::new(16.0, 16.0, 2.0),
                    Point3::new(-1.0, 16.0, 2.0),
                ],
            )
            .with_surface(Arc::new(Surface::Alpha), opacity),
        );
        let tree = KdTree::build(Arc::new(facets), KdParams::default(), None, None).unwrap();

        // A shallow ray crossing the sheet near the box entry, then
        // sweeping several more leaves before leaving through a gap in
        // the grid. Either the sheet absorbs it or nothing does.
        let n = 4000u32;
        let mut absorbed = 0u32;
        for seed in 0..u64::from(n) {
            let mut ray = Ray::new(
                Point3::new(-2.1, 6.4, 6.0),
                Vec3::new(2.0, 0.02, -1.0),
                seed,
            );
            if tree.intersect(&mut ray) {
                assert_eq!(ray.hard_hit.unwrap().facet, 64);
                absorbed += 1;
            }
        }
        let rate = f64::from(absorbed) / f64::from(n);
        assert!((rate - opacity).abs() < 0.04, "absorption rate {rate}");
    }

    #[test]
    fn test_probability_weighted_build_hits_same() {
        let facets = grid();
        let probs: Vec<f64> = (0..facets.len()).map(|i| 0.5 + (i % 5) as f64).collect();
        let tree = KdTree::build(
            Arc::clone(&facets),
            KdParams {
                split: KdSplitMethod::Probability,
                ..KdParams::default()
            },
            Some(&probs),
            None,
        )
        .unwrap();
        let mut ray = down_ray(6.4, 10.4);
        assert!(tree.intersect(&mut ray));
        assert_eq!(ray.hard_hit.unwrap().facet, 5 * 8 + 3);
    }

    #[test]
    fn test_ray_density_build() {
        let facets = grid();
        let battery: Vec<TestRay> = (0..64)
            .map(|i| {
                TestRay::new(
                    Point3::new((i % 8) as f64 * 2.0 + 0.4, (i / 8) as f64 * 2.0 + 0.4, 20.0),
                    Vec3::new(0.0, 0.0, -1.0),
                )
            })
            .collect();
        let tree = KdTree::build(
            Arc::clone(&facets),
            KdParams {
                split: KdSplitMethod::RayDensity,
                ..KdParams::default()
            },
            None,
            Some(&battery),
        )
        .unwrap();
        let mut ray = down_ray(4.4, 2.4);
        assert!(tree.intersect(&mut ray));
        assert_eq!(ray.hard_hit.unwrap().facet, 8 + 2);
    }

    #[test]
    fn test_depth_zero_single_leaf() {
        let tree = KdTree::build(
            plate_stack(8),
            KdParams {
                max_depth: Some(0),
                ..KdParams::default()
            },
            None,
            None,
        )
        .unwrap();
        assert_eq!(tree.nodes.len(), 1);
        let mut ray = down_ray(0.4, 0.4);
        assert!(tree.intersect(&mut ray));
        assert_eq!(ray.hard_hit.unwrap().facet, 7);
    }
}
