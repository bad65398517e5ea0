//! Node predicates used to restrict sources, targets and candidate pairs.

mod id_map;
mod neighbor_filter;
mod node_filter;

pub use id_map::{IdMap, NodeIdMap};
pub use neighbor_filter::{ExistingNeighborsFilter, KnnNeighborFilter, NeighborFilter};
pub use node_filter::NodeFilter;
