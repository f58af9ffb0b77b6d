//! Legacy AABB tree: a simple recursive binary space partition kept as
//! a fast, deterministic fallback and reference structure.
//!
//! At each node the three axis-aligned planes through the box center
//! are candidate cuts; the one whose centroid left/right counts deviate
//! least from an even split wins. No cost model is involved.

use std::sync::Arc;

use mcray_geom::Facet;

use crate::intersect::{finish_traversal, intersect_facet};
use crate::ray::Ray;
use mcray_math::Aabb;

/// Construction parameters for the legacy tree.
#[derive(Debug, Clone, Copy)]
pub struct LegacyParams {
    /// Minimum primitives a side must receive for a split to happen.
    pub min_prims: usize,
    /// Soft recursion cap; exceeding it truncates subdivision into an
    /// oversized leaf rather than failing.
    pub max_depth: usize,
}

impl Default for LegacyParams {
    fn default() -> Self {
        Self {
            min_prims: 1,
            max_depth: 50,
        }
    }
}

#[derive(Debug)]
struct AabbNode {
    bounds: Aabb,
    children: Option<(Box<AabbNode>, Box<AabbNode>)>,
    /// Facet indices; populated only for leaves.
    prims: Vec<usize>,
}

/// The legacy recursive AABB tree.
#[derive(Debug)]
pub struct LegacyAabbTree {
    facets: Arc<Vec<Facet>>,
    root: Option<Box<AabbNode>>,
}

impl LegacyAabbTree {
    /// Build the tree over all facets with default parameters.
    ///
    /// An empty facet list yields a valid empty tree whose `intersect`
    /// always reports no hit.
    pub fn build(facets: Arc<Vec<Facet>>) -> Self {
        Self::build_with_params(facets, LegacyParams::default())
    }

    /// Build the tree with explicit parameters.
    pub fn build_with_params(facets: Arc<Vec<Facet>>, params: LegacyParams) -> Self {
        let prims: Vec<usize> = (0..facets.len()).collect();
        let root = build_node(&facets, prims, 0, &params);
        log::debug!(
            "legacy AABB tree built over {} facets ({} nodes)",
            facets.len(),
            root.as_ref().map_or(0, |n| count_nodes(n))
        );
        Self { facets, root }
    }

    /// Depth-first search for the nearest hard hit.
    ///
    /// Populates the ray's hard-hit record and (pruned) transparent-hit
    /// list; returns `true` iff a hard hit was found.
    pub fn intersect(&self, ray: &mut Ray) -> bool {
        let mut steps = 0u64;
        if let Some(root) = &self.root {
            traverse(root, &self.facets, ray, &mut steps);
        }
        finish_traversal(ray, steps, &self.facets)
    }

    /// Root bounding box, if the tree is non-empty.
    pub fn bounds(&self) -> Option<Aabb> {
        self.root.as_ref().map(|n| n.bounds)
    }

    #[cfg(test)]
    fn root(&self) -> Option<&AabbNode> {
        self.root.as_deref()
    }
}

fn count_nodes(node: &AabbNode) -> usize {
    1 + node
        .children
        .as_ref()
        .map_or(0, |(l, r)| count_nodes(l) + count_nodes(r))
}

fn build_node(
    facets: &[Facet],
    prims: Vec<usize>,
    depth: usize,
    params: &LegacyParams,
) -> Option<Box<AabbNode>> {
    if prims.is_empty() {
        return None;
    }

    let mut bounds = Aabb::empty();
    for &p in &prims {
        bounds.include(&facets[p].aabb);
    }

    if prims.len() <= params.min_prims || depth >= params.max_depth {
        return Some(Box::new(AabbNode {
            bounds,
            children: None,
            prims,
        }));
    }

    let center = bounds.center();

    // Candidate cut per axis: count centroids on each side, keep the
    // axis closest to an even split
    let mut best_axis = usize::MAX;
    let mut best_deviation = usize::MAX;
    for axis in 0..3 {
        let left = prims
            .iter()
            .filter(|&&p| facets[p].centroid()[axis] < center[axis])
            .count();
        let right = prims.len() - left;
        let deviation = left.abs_diff(right);
        if deviation < best_deviation {
            best_deviation = deviation;
            best_axis = axis;
        }
    }

    // Unreachable for axis-aligned 3D data; fatal for this subtree only
    let axis = match best_axis {
        a @ 0..=2 => a,
        a => {
            log::error!("legacy AABB tree: invalid split plane axis {a}, dropping subtree");
            return None;
        }
    };

    let (left, right): (Vec<usize>, Vec<usize>) = prims
        .iter()
        .copied()
        .partition(|&p| facets[p].centroid()[axis] < center[axis]);

    // A side below the minimum means no useful cut exists: oversized leaf
    if left.len() < params.min_prims || right.len() < params.min_prims {
        return Some(Box::new(AabbNode {
            bounds,
            children: None,
            prims,
        }));
    }

    let l = build_node(facets, left, depth + 1, params);
    let r = build_node(facets, right, depth + 1, params);
    match (l, r) {
        (Some(l), Some(r)) => Some(Box::new(AabbNode {
            bounds,
            children: Some((l, r)),
            prims: Vec::new(),
        })),
        // A dropped subtree degrades this node to a leaf over its prims
        _ => Some(Box::new(AabbNode {
            bounds,
            children: None,
            prims,
        })),
    }
}

fn traverse(node: &AabbNode, facets: &[Facet], ray: &mut Ray, steps: &mut u64) {
    if !ray.intersect_aabb(&node.bounds) {
        return;
    }
    *steps += 1;
    match &node.children {
        Some((l, r)) => {
            traverse(l, facets, ray, steps);
            traverse(r, facets, ray, steps);
        }
        None => {
            for &p in &node.prims {
                intersect_facet(ray, &facets[p]);
            }
        }
    }
}
