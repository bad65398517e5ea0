use crate::knn::NodeId;
use roaring::RoaringTreemap;

/// Excludes candidate pairs before their similarity is computed.
pub trait NeighborFilter: Send + Sync {
    fn exclude_node_pair(&self, first: NodeId, second: NodeId) -> bool;
}

/// Excludes self pairs only.
#[derive(Clone, Copy, Debug, Default)]
pub struct KnnNeighborFilter;

impl NeighborFilter for KnnNeighborFilter {
    fn exclude_node_pair(&self, first: NodeId, second: NodeId) -> bool {
        first == second
    }
}

/// Excludes self pairs and pairs already connected by an edge, for
/// computations that should only propose new relationships.
#[derive(Clone, Debug, Default)]
pub struct ExistingNeighborsFilter {
    adjacency: Vec<RoaringTreemap>,
}

impl ExistingNeighborsFilter {
    pub fn new(node_count: usize) -> Self {
        Self {
            adjacency: vec![RoaringTreemap::new(); node_count],
        }
    }

    /// Build from a list of directed edges. Edges with an endpoint outside
    /// of `[0, node_count)` are ignored.
    pub fn from_edges(node_count: usize, edges: impl IntoIterator<Item = (NodeId, NodeId)>) -> Self {
        let mut filter = Self::new(node_count);
        for (source, target) in edges {
            filter.add_edge(source, target);
        }
        filter
    }

    pub fn add_edge(&mut self, source: NodeId, target: NodeId) {
        if (target as usize) < self.adjacency.len() {
            if let Some(neighbors) = self.adjacency.get_mut(source as usize) {
                neighbors.insert(target);
            }
        }
    }
}

impl NeighborFilter for ExistingNeighborsFilter {
    fn exclude_node_pair(&self, first: NodeId, second: NodeId) -> bool {
        first == second
            || self
                .adjacency
                .get(first as usize)
                .is_some_and(|neighbors| neighbors.contains(second))
    }
}
