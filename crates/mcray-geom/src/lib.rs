#![warn(missing_docs)]

//! Facet and polygon layer for the mcray transport acceleration engine.
//!
//! A facet is a planar polygon with a precomputed plane frame (origin,
//! two in-plane basis vectors, normal) and a 2D outline in the facet's
//! (u, v) parameter space. The geometry layer produces facets once per
//! build; the acceleration structures consume them read-only, updating
//! only the per-facet atomic statistics counters.
//!
//! - [`Facet`] - planar polygon with plane frame and outline
//! - [`Surface`] - hit classifier translating opacity into hard/transparent
//! - [`point_in_polygon`] - crossing-number containment test

pub mod facet;
pub mod polygon;
pub mod surface;

pub use facet::{Facet, FacetCounters};
pub use polygon::point_in_polygon;
pub use surface::Surface;
