//! NN-Descent construction of approximate k-nearest-neighbor graphs.

mod adjacency;
mod engine;
mod join;
mod neighbor_list;
mod partition;
mod progress;
mod sampler;
mod split;

pub use adjacency::Adjacency;
pub use engine::{build_pool, Knn, KnnResult};
pub use neighbor_list::{Neighbor, NeighborList};
pub use partition::{range_partition, Partition};
pub use progress::{ProgressTracker, TerminationFlag};

use serde::{Deserialize, Serialize};

/// Dense internal node id in `[0, node_count)`.
pub type NodeId = u64;

/// A single `(source, target, similarity)` row of a k-NN result.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimilarityResult {
    pub source: NodeId,
    pub target: NodeId,
    pub similarity: f64,
}

impl SimilarityResult {
    pub fn new(source: NodeId, target: NodeId, similarity: f64) -> Self {
        Self {
            source,
            target,
            similarity,
        }
    }
}

/// Sink for every candidate pair whose similarity the engine evaluates.
///
/// `offer` is called concurrently from join workers, for any `source`.
pub trait NeighborConsumers: Send + Sync {
    fn offer(&self, source: NodeId, target: NodeId, similarity: f64);
}

/// Discards all candidates.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoNeighborConsumers;

impl NeighborConsumers for NoNeighborConsumers {
    fn offer(&self, _source: NodeId, _target: NodeId, _similarity: f64) {}
}
