//! Bounding Volume Hierarchy over facets.
//!
//! Object partitioning: every facet lands in exactly one leaf, node
//! boxes may overlap. Construction supports several interchangeable
//! split strategies (a build-time configuration, not a per-node
//! decision); the built tree is flattened into a linear node array and
//! is immutable afterwards.

use std::sync::Arc;

use rayon::prelude::*;

use mcray_geom::Facet;
use mcray_math::{Aabb, Point3};

use crate::battery::{self, TestRay};
use crate::error::{BuildError, Result};
use crate::intersect::{finish_traversal, intersect_facet};
use crate::ray::Ray;

/// Number of centroid buckets used by the cost-based strategies.
const N_BUCKETS: usize = 12;

/// Interchangeable BVH split strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitMethod {
    /// Partition at the median centroid along the widest centroid axis.
    EqualCounts,
    /// Partition at the midpoint of the centroid bound; falls back to
    /// `EqualCounts` when the partition is degenerate.
    Middle,
    /// Surface-area heuristic over 12 centroid buckets.
    Sah,
    /// Midpoint partition on all three axes, keeping whichever came
    /// closest to an even half/half division.
    BalancedAxes,
    /// SAH bucketing with summed per-facet probability as the bucket
    /// mass. Without supplied probabilities every facet weighs 1 and
    /// the costs reduce to plain SAH.
    Probability,
    /// Ray-density heuristic: candidate boundaries scored by box-testing
    /// the surviving sample-ray battery against both candidate children.
    /// Falls back to SAH when the battery is empty.
    RayDensity,
}

/// Construction parameters for [`Bvh::build`].
#[derive(Debug, Clone, Copy)]
pub struct BvhParams {
    /// Maximum primitives per leaf; a soft limit when centroids are
    /// degenerate and no partition can separate them.
    pub max_prims_in_node: usize,
    /// Split strategy used for every node of this build.
    pub split: SplitMethod,
}

impl Default for BvhParams {
    fn default() -> Self {
        Self {
            max_prims_in_node: 2,
            split: SplitMethod::Sah,
        }
    }
}

/// Per-primitive build record: facet index, bounds, centroid and the
/// probability mass consumed by [`SplitMethod::Probability`].
struct PrimitiveInfo {
    index: usize,
    bounds: Aabb,
    centroid: Point3,
    probability: f64,
}

/// Build-time node; flattened before use.
struct BuildNode {
    bounds: Aabb,
    children: Option<[Box<BuildNode>; 2]>,
    split_axis: usize,
    first_prim: usize,
    n_prims: usize,
}

/// Flattened node. Interior nodes store the second child's index in
/// `offset` (the first child is implicit at `index + 1`); leaves store
/// the first primitive offset and a nonzero count.
#[derive(Debug)]
struct LinearNode {
    bounds: Aabb,
    offset: u32,
    n_prims: u32,
    axis: u8,
}

/// Bounding volume hierarchy for accelerated ray/facet intersection.
#[derive(Debug)]
pub struct Bvh {
    facets: Arc<Vec<Facet>>,
    nodes: Vec<LinearNode>,
    prim_order: Vec<usize>,
}

impl Bvh {
    /// Build a BVH over the facet list.
    ///
    /// `probabilities`, when supplied, must have one entry per facet
    /// and is consumed by [`SplitMethod::Probability`]. `battery` feeds
    /// [`SplitMethod::RayDensity`]; an empty or missing battery makes
    /// that strategy fall back to SAH. An empty facet list yields a
    /// valid empty tree.
    pub fn build(
        facets: Arc<Vec<Facet>>,
        params: BvhParams,
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

        let mut info: Vec<PrimitiveInfo> = facets
            .iter()
            .enumerate()
            .map(|(i, f)| PrimitiveInfo {
                index: i,
                bounds: f.aabb,
                centroid: f.centroid(),
                probability: probabilities.map_or(1.0, |p| p[i]),
            })
            .collect();

        if info.is_empty() {
            return Ok(Self {
                facets,
                nodes: Vec::new(),
                prim_order: Vec::new(),
            });
        }

        let battery = battery.unwrap_or(&[]);
        let mut builder = Builder {
            split: params.split,
            max_prims: params.max_prims_in_node.max(1),
            battery,
            ordered: Vec::with_capacity(info.len()),
        };
        let root_subset: Vec<u32> = if params.split == SplitMethod::RayDensity {
            (0..battery.len() as u32).collect()
        } else {
            Vec::new()
        };
        let root = builder.build_recursive(&mut info, &root_subset);

        let mut nodes = Vec::new();
        flatten(&root, &mut nodes);
        log::debug!(
            "BVH built over {} facets: {} nodes, strategy {:?}",
            facets.len(),
            nodes.len(),
            params.split
        );

        Ok(Self {
            facets,
            nodes,
            prim_order: builder.ordered,
        })
    }

    /// Depth-first nearest-hard-hit search with an explicit stack,
    /// descending the child nearer along the ray first so the
    /// shrinking horizon prunes the farther subtree early.
    pub fn intersect(&self, ray: &mut Ray) -> bool {
        if self.nodes.is_empty() {
            return finish_traversal(ray, 0, &self.facets);
        }

        let inv_dir = ray.inv_direction();
        let dir_is_neg = ray.dir_is_neg();
        let mut steps = 0u64;
        // Rarely deeper than a few dozen entries, but skewed trees
        // (Middle over exponentially spaced primitives) can exceed any
        // fixed cap, so the stack must be growable
        let mut to_visit: Vec<usize> = Vec::with_capacity(64);
        let mut current = 0usize;

        loop {
            let node = &self.nodes[current];
            steps += 1;
            if node
                .bounds
                .intersect_ray(&ray.origin, &inv_dir, dir_is_neg, ray.t_max)
            {
                if node.n_prims > 0 {
                    let first = node.offset as usize;
                    for &prim in &self.prim_order[first..first + node.n_prims as usize] {
                        intersect_facet(ray, &self.facets[prim]);
                    }
                    match to_visit.pop() {
                        Some(next) => current = next,
                        None => break,
                    }
                } else {
                    // Near child first, far child deferred
                    let second = node.offset as usize;
                    if dir_is_neg[node.axis as usize] == 1 {
                        to_visit.push(current + 1);
                        current = second;
                    } else {
                        to_visit.push(second);
                        current += 1;
                    }
                }
            } else {
                match to_visit.pop() {
                    Some(next) => current = next,
                    None => break,
                }
            }
        }

        finish_traversal(ray, steps, &self.facets)
    }

    /// Root bounding box, if the tree is non-empty.
    pub fn bounds(&self) -> Option<Aabb> {
        self.nodes.first().map(|n| n.bounds)
    }

    #[cfg(test)]
    fn check_invariants(&self, max_prims: usize) {
        fn walk(bvh: &Bvh, idx: usize, max_prims: usize) -> (Aabb, usize) {
            let node = &bvh.nodes[idx];
            if node.n_prims > 0 {
                let mut union = Aabb::empty();
                let first = node.offset as usize;
                for &p in &bvh.prim_order[first..first + node.n_prims as usize] {
                    union.include(&bvh.facets[p].aabb);
                }
                assert_eq!(union.min, node.bounds.min);
                assert_eq!(union.max, node.bounds.max);
                assert!(node.n_prims as usize <= max_prims);
                (node.bounds, idx + 1)
            } else {
                let (lb, after_left) = walk(bvh, idx + 1, max_prims);
                assert_eq!(after_left, node.offset as usize);
                let (rb, after_right) = walk(bvh, node.offset as usize, max_prims);
                let union = lb.union(&rb);
                assert_eq!(union.min, node.bounds.min);
                assert_eq!(union.max, node.bounds.max);
                (node.bounds, after_right)
            }
        }
        if !self.nodes.is_empty() {
            walk(self, 0, max_prims);
        }
    }
}

struct Builder<'a> {
    split: SplitMethod,
    max_prims: usize,
    battery: &'a [TestRay],
    ordered: Vec<usize>,
}

impl Builder<'_> {
    fn build_recursive(&mut self, prims: &mut [PrimitiveInfo], subset: &[u32]) -> Box<BuildNode> {
        let mut bounds = Aabb::empty();
        for p in prims.iter() {
            bounds.include(&p.bounds);
        }
        let n = prims.len();
        if n == 1 {
            return self.make_leaf(prims, bounds);
        }

        let mut centroid_bounds = Aabb::empty();
        for p in prims.iter() {
            centroid_bounds.include_point(&p.centroid);
        }
        let dim = centroid_bounds.maximum_extent();
        // All centroids coincide on the chosen axis: recovered locally
        // by forming a leaf
        if centroid_bounds.max[dim] == centroid_bounds.min[dim] {
            return self.make_leaf(prims, bounds);
        }

        let decision = match self.split {
            SplitMethod::EqualCounts => {
                if n <= self.max_prims {
                    None
                } else {
                    Some((split_equal_counts(prims, dim), dim))
                }
            }
            SplitMethod::Middle => {
                if n <= self.max_prims {
                    None
                } else {
                    let mid = split_middle(prims, dim, &centroid_bounds)
                        .unwrap_or_else(|| split_equal_counts(prims, dim));
                    Some((mid, dim))
                }
            }
            SplitMethod::BalancedAxes => {
                if n <= self.max_prims {
                    None
                } else {
                    Some(
                        split_balanced_axes(prims, &centroid_bounds)
                            .unwrap_or_else(|| (split_equal_counts(prims, dim), dim)),
                    )
                }
            }
            SplitMethod::Sah | SplitMethod::Probability => {
                self.split_sah(prims, dim, &bounds, &centroid_bounds)
            }
            SplitMethod::RayDensity => {
                if subset.is_empty() {
                    self.split_sah(prims, dim, &bounds, &centroid_bounds)
                } else {
                    self.split_ray_density(prims, dim, &centroid_bounds, subset)
                }
            }
        };

        let (mid, axis) = match decision {
            Some(d) => d,
            None => return self.make_leaf(prims, bounds),
        };

        let (left_prims, right_prims) = prims.split_at_mut(mid);

        // The battery survives into a child only where its box test
        // against that child's bound succeeds
        let (left_subset, right_subset) = if self.split == SplitMethod::RayDensity
            && !subset.is_empty()
        {
            let mut lb = Aabb::empty();
            for p in left_prims.iter() {
                lb.include(&p.bounds);
            }
            let mut rb = Aabb::empty();
            for p in right_prims.iter() {
                rb.include(&p.bounds);
            }
            (
                battery::filter_hits(self.battery, subset, &lb),
                battery::filter_hits(self.battery, subset, &rb),
            )
        } else {
            (Vec::new(), Vec::new())
        };

        let left = self.build_recursive(left_prims, &left_subset);
        let right = self.build_recursive(right_prims, &right_subset);
        Box::new(BuildNode {
            bounds,
            children: Some([left, right]),
            split_axis: axis,
            first_prim: 0,
            n_prims: 0,
        })
    }

    fn make_leaf(&mut self, prims: &[PrimitiveInfo], bounds: Aabb) -> Box<BuildNode> {
        let first = self.ordered.len();
        for p in prims {
            self.ordered.push(p.index);
        }
        Box::new(BuildNode {
            bounds,
            children: None,
            split_axis: 0,
            first_prim: first,
            n_prims: prims.len(),
        })
    }

    /// 12-bucket surface-area heuristic. Probability mass doubles as the
    /// bucket weight; with unit weights the cost is plain SAH.
    fn split_sah(
        &self,
        prims: &mut [PrimitiveInfo],
        dim: usize,
        bounds: &Aabb,
        centroid_bounds: &Aabb,
    ) -> Option<(usize, usize)> {
        let n = prims.len();
        if n <= 2 {
            return if n > self.max_prims {
                Some((split_equal_counts(prims, dim), dim))
            } else {
                None
            };
        }

        let buckets = fill_buckets(prims, dim, centroid_bounds);

        let node_area = bounds.surface_area();
        let mut best: Option<(usize, f64)> = None;
        for boundary in 0..N_BUCKETS - 1 {
            let (c0, m0, b0) = accumulate(&buckets[..=boundary]);
            let (c1, m1, b1) = accumulate(&buckets[boundary + 1..]);
            if c0 == 0 || c1 == 0 {
                continue;
            }
            let cost = 0.5 + (m0 * b0.surface_area() + m1 * b1.surface_area()) / node_area;
            if best.map_or(true, |(_, c)| cost < c) {
                best = Some((boundary, cost));
            }
        }

        let leaf_cost: f64 = prims.iter().map(|p| p.probability).sum();
        match best {
            Some((boundary, cost)) if n > self.max_prims || cost < leaf_cost => {
                let mid = partition_by_bucket(prims, dim, centroid_bounds, boundary);
                Some((mid, dim))
            }
            // No usable boundary but the leaf is over budget: force an
            // even split so construction always makes progress
            None if n > self.max_prims => Some((split_equal_counts(prims, dim), dim)),
            _ => None,
        }
    }

    /// Ray-density heuristic: each boundary scored by how much battery
    /// traffic reaches each candidate child. Boundary costs are
    /// independent, so they are evaluated in parallel; the argmin is
    /// taken sequentially afterwards to stay deterministic.
    fn split_ray_density(
        &self,
        prims: &mut [PrimitiveInfo],
        dim: usize,
        centroid_bounds: &Aabb,
        subset: &[u32],
    ) -> Option<(usize, usize)> {
        let n = prims.len();
        if n <= 2 {
            return if n > self.max_prims {
                Some((split_equal_counts(prims, dim), dim))
            } else {
                None
            };
        }

        let buckets = fill_buckets(prims, dim, centroid_bounds);

        let candidates: Vec<(usize, usize, usize, Aabb, Aabb)> = (0..N_BUCKETS - 1)
            .filter_map(|boundary| {
                let (c0, _, b0) = accumulate(&buckets[..=boundary]);
                let (c1, _, b1) = accumulate(&buckets[boundary + 1..]);
                (c0 > 0 && c1 > 0).then_some((boundary, c0, c1, b0, b1))
            })
            .collect();

        if candidates.is_empty() {
            return if n > self.max_prims {
                Some((split_equal_counts(prims, dim), dim))
            } else {
                None
            };
        }

        let total = subset.len() as f64;
        let costs: Vec<(usize, f64)> = candidates
            .par_iter()
            .map(|&(boundary, c0, c1, ref b0, ref b1)| {
                let p_below = battery::count_hits(self.battery, subset, b0) as f64 / total;
                let p_above = battery::count_hits(self.battery, subset, b1) as f64 / total;
                let cost = 0.5 + p_below * c0 as f64 + p_above * c1 as f64;
                (boundary, cost)
            })
            .collect();

        let mut best = costs[0];
        for &c in &costs[1..] {
            if c.1 < best.1 {
                best = c;
            }
        }
        let (boundary, cost) = best;

        if n > self.max_prims || cost < n as f64 {
            let mid = partition_by_bucket(prims, dim, centroid_bounds, boundary);
            Some((mid, dim))
        } else {
            None
        }
    }
}

#[derive(Clone, Copy)]
struct Bucket {
    count: usize,
    mass: f64,
    bounds: Aabb,
}

fn bucket_of(p: &PrimitiveInfo, dim: usize, centroid_bounds: &Aabb) -> usize {
    let b = (N_BUCKETS as f64 * centroid_bounds.offset(&p.centroid)[dim]) as usize;
    b.min(N_BUCKETS - 1)
}

fn fill_buckets(prims: &[PrimitiveInfo], dim: usize, centroid_bounds: &Aabb) -> [Bucket; N_BUCKETS] {
    let mut buckets = [Bucket {
        count: 0,
        mass: 0.0,
        bounds: Aabb::empty(),
    }; N_BUCKETS];
    for p in prims {
        let b = bucket_of(p, dim, centroid_bounds);
        buckets[b].count += 1;
        buckets[b].mass += p.probability;
        buckets[b].bounds.include(&p.bounds);
    }
    buckets
}

fn accumulate(buckets: &[Bucket]) -> (usize, f64, Aabb) {
    let mut count = 0;
    let mut mass = 0.0;
    let mut bounds = Aabb::empty();
    for b in buckets {
        count += b.count;
        mass += b.mass;
        bounds.include(&b.bounds);
    }
    (count, mass, bounds)
}

fn partition_prims(prims: &mut [PrimitiveInfo], mut pred: impl FnMut(&PrimitiveInfo) -> bool) -> usize {
    let mut left = 0;
    let mut right = prims.len();
    while left < right {
        if pred(&prims[left]) {
            left += 1;
        } else {
            right -= 1;
            prims.swap(left, right);
        }
    }
    left
}

fn partition_by_bucket(
    prims: &mut [PrimitiveInfo],
    dim: usize,
    centroid_bounds: &Aabb,
    boundary: usize,
) -> usize {
    partition_prims(prims, |p| bucket_of(p, dim, centroid_bounds) <= boundary)
}

fn split_equal_counts(prims: &mut [PrimitiveInfo], dim: usize) -> usize {
    let mid = prims.len() / 2;
    prims.select_nth_unstable_by(mid, |a, b| a.centroid[dim].total_cmp(&b.centroid[dim]));
    mid
}

fn split_middle(prims: &mut [PrimitiveInfo], dim: usize, centroid_bounds: &Aabb) -> Option<usize> {
    let pmid = 0.5 * (centroid_bounds.min[dim] + centroid_bounds.max[dim]);
    let mid = partition_prims(prims, |p| p.centroid[dim] < pmid);
    (mid != 0 && mid != prims.len()).then_some(mid)
}

/// Midpoint partition on every axis, keeping the one closest to an even
/// half/half division.
fn split_balanced_axes(
    prims: &mut [PrimitiveInfo],
    centroid_bounds: &Aabb,
) -> Option<(usize, usize)> {
    let n = prims.len();
    let mut best: Option<(usize, usize)> = None; // (deviation, axis)
    for axis in 0..3 {
        if centroid_bounds.max[axis] <= centroid_bounds.min[axis] {
            continue;
        }
        let pmid = 0.5 * (centroid_bounds.min[axis] + centroid_bounds.max[axis]);
        let left = prims.iter().filter(|p| p.centroid[axis] < pmid).count();
        if left == 0 || left == n {
            continue;
        }
        let deviation = (2 * left).abs_diff(n);
        if best.map_or(true, |(d, _)| deviation < d) {
            best = Some((deviation, axis));
        }
    }
    best.map(|(_, axis)| {
        let pmid = 0.5 * (centroid_bounds.min[axis] + centroid_bounds.max[axis]);
        let mid = partition_prims(prims, |p| p.centroid[axis] < pmid);
        (mid, axis)
    })
}

fn flatten(node: &BuildNode, nodes: &mut Vec<LinearNode>) -> usize {
    let idx = nodes.len();
    nodes.push(LinearNode {
        bounds: node.bounds,
        offset: node.first_prim as u32,
        n_prims: node.n_prims as u32,
        axis: node.split_axis as u8,
    });
    if let Some([left, right]) = &node.children {
        flatten(left, nodes);
        let second = flatten(right, nodes);
        nodes[idx].offset = second as u32;
        nodes[idx].n_prims = 0;
    }
    idx
}
