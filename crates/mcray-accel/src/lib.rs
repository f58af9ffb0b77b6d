#![warn(missing_docs)]

//! Spatial acceleration structures for Monte-Carlo ray/facet tracing.
//!
//! This crate answers one query: given a ray, find the nearest facet
//! that absorbs it, collecting every transparent facet pierced on the
//! way. Three interchangeable structures answer it:
//!
//! - [`LegacyAabbTree`] - simple recursive AABB tree, no cost model
//! - [`Bvh`] - bounding volume hierarchy with pluggable split
//!   strategies ([`SplitMethod`])
//! - [`KdTree`] - space-partitioning kd-tree with sweep-SAH splits
//!   ([`KdSplitMethod`]) and optional stackless rope traversal
//!
//! The cost-based builders can be biased toward observed traffic: a
//! [`TestRay`] battery recorded from a previous simulation step drives
//! the ray-density split heuristics, and per-facet hit probabilities
//! reweight the SAH.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use mcray_accel::{Bvh, BvhParams, Ray};
//! use mcray_math::{Point3, Vec3};
//!
//! let bvh = Bvh::build(Arc::new(facets), BvhParams::default(), None, None)?;
//!
//! let mut ray = Ray::new(
//!     Point3::new(-5.0, 5.0, 5.0),
//!     Vec3::new(1.0, 0.0, 0.0),
//!     seed,
//! );
//! if bvh.intersect(&mut ray) {
//!     let hit = ray.hard_hit.unwrap();
//! }
//! ```

mod aabbtree;
mod battery;
mod bvh;
mod error;
pub mod intersect;
mod kdtree;
mod ray;

pub use aabbtree::{LegacyAabbTree, LegacyParams};
pub use battery::TestRay;
pub use bvh::{Bvh, BvhParams, SplitMethod};
pub use error::{BuildError, Result};
pub use kdtree::{KdParams, KdSplitMethod, KdTree};
pub use ray::{HardHit, Ray, TransparentHit};
