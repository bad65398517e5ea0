//! Pairwise similarity sources for the k-NN engine.

mod properties;

pub use properties::{NodeProperties, PropertySimilarity, SimilarityMetric};

use crate::knn::NodeId;

/// A pure similarity function over internal node ids.
///
/// Implementations must not panic. Missing or invalid inputs are reported by
/// returning `f64::NAN`, which the engine treats as "no match".
pub trait SimilarityFunction: Send + Sync {
    fn similarity(&self, first: NodeId, second: NodeId) -> f64;
}

impl<F> SimilarityFunction for F
where
    F: Fn(NodeId, NodeId) -> f64 + Send + Sync,
{
    fn similarity(&self, first: NodeId, second: NodeId) -> f64 {
        self(first, second)
    }
}
