//! Hit classification: translating a facet's opacity into a per-ray
//! hard-hit / pass-through decision.

use rand::Rng;

/// Classifies a geometric intersection as physically absorbing ("hard")
/// or pass-through ("transparent").
///
/// Many facets typically share one classifier instance through an `Arc`;
/// the three cases are exhaustive by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    /// Fully opaque: every geometric hit is a hard hit.
    Opaque,
    /// Fully transparent: a hit is recorded but never stops the ray.
    Transparent,
    /// Semi-transparent: a hit is hard with probability equal to the
    /// facet's opacity, decided by one uniform draw per test.
    Alpha,
}

impl Surface {
    /// Decide whether a geometric hit on a facet with the given opacity
    /// stops the ray.
    ///
    /// Only [`Surface::Alpha`] consumes randomness.
    #[inline]
    pub fn is_hard_hit<R: Rng>(&self, opacity: f64, rng: &mut R) -> bool {
        match self {
            Surface::Opaque => true,
            Surface::Transparent => false,
            Surface::Alpha => rng.random::<f64>() < opacity,
        }
    }
}
