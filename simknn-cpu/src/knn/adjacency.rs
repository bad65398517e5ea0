use super::NodeId;

/// Outgoing relationships of every node, indexed by internal node id.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Adjacency {
    neighbors: Vec<Vec<NodeId>>,
}

impl Adjacency {
    pub fn new(node_count: usize) -> Self {
        Self {
            neighbors: vec![Vec::new(); node_count],
        }
    }

    /// Build from directed edges. Edges with an endpoint outside of
    /// `[0, node_count)` are ignored.
    pub fn from_edges(node_count: usize, edges: impl IntoIterator<Item = (NodeId, NodeId)>) -> Self {
        let mut adjacency = Self::new(node_count);
        for (source, target) in edges {
            adjacency.add_edge(source, target);
        }
        adjacency
    }

    pub fn add_edge(&mut self, source: NodeId, target: NodeId) {
        if (target as usize) < self.neighbors.len() {
            if let Some(neighbors) = self.neighbors.get_mut(source as usize) {
                neighbors.push(target);
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.neighbors.len()
    }

    /// Targets of the outgoing relationships of `node`, empty for unknown
    /// nodes.
    pub fn neighbors(&self, node: NodeId) -> &[NodeId] {
        self.neighbors
            .get(node as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn degree(&self, node: NodeId) -> usize {
        self.neighbors(node).len()
    }
}
