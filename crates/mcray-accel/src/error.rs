//! Error types for tree construction.

use thiserror::Error;

/// Errors that can occur while building an acceleration structure.
///
/// Heuristic outcomes ("no beneficial split", depth caps, degenerate
/// centroid bounds) are not errors; they form leaves. Only invalid
/// build inputs surface here.
#[derive(Error, Debug)]
pub enum BuildError {
    /// The per-facet probability array does not match the facet list.
    #[error("probability array has {got} entries but there are {expected} facets")]
    ProbabilityCount {
        /// Number of probabilities supplied.
        got: usize,
        /// Number of facets in the build.
        expected: usize,
    },
}

/// Result type for tree construction.
pub type Result<T> = std::result::Result<T, BuildError>;
