use crate::knn::NodeId;
use roaring::RoaringTreemap;
use std::collections::HashMap;

/// Mapping between the ids known to callers and the dense internal ids in
/// `[0, node_count)` the algorithm works with.
pub trait IdMap: Send + Sync {
    fn node_count(&self) -> u64;

    /// Internal id of an original node id, `None` if the node is unknown.
    fn to_mapped_node_id(&self, original_id: u64) -> Option<NodeId>;

    /// Original id of an internal node id, `None` outside of
    /// `[0, node_count)`.
    fn to_original_node_id(&self, node: NodeId) -> Option<u64>;

    /// Internal ids of all nodes carrying `label`, `None` if the label is
    /// unknown.
    fn nodes_with_label(&self, label: &str) -> Option<RoaringTreemap>;
}

/// In-memory id map with optional node labels.
#[derive(Clone, Debug, Default)]
pub struct NodeIdMap {
    original_ids: Vec<u64>,
    mapped_ids: HashMap<u64, NodeId>,
    labels: HashMap<String, RoaringTreemap>,
}

impl NodeIdMap {
    /// Id map where original and internal ids coincide.
    pub fn identity(node_count: u64) -> Self {
        Self::from_original_ids(0..node_count)
    }

    /// Assign internal ids in iteration order. Repeated original ids keep
    /// their first internal id.
    pub fn from_original_ids(original_ids: impl IntoIterator<Item = u64>) -> Self {
        let mut map = Self::default();
        for original_id in original_ids {
            if map.mapped_ids.contains_key(&original_id) {
                continue;
            }
            let node = map.original_ids.len() as NodeId;
            map.original_ids.push(original_id);
            map.mapped_ids.insert(original_id, node);
        }
        map
    }

    /// Attach `label` to the given internal node ids. Ids outside of the
    /// map are ignored.
    pub fn with_label(
        mut self,
        label: impl Into<String>,
        nodes: impl IntoIterator<Item = NodeId>,
    ) -> Self {
        let node_count = self.node_count();
        let entry = self.labels.entry(label.into()).or_default();
        entry.extend(nodes.into_iter().filter(|&node| node < node_count));
        self
    }
}

impl IdMap for NodeIdMap {
    fn node_count(&self) -> u64 {
        self.original_ids.len() as u64
    }

    fn to_mapped_node_id(&self, original_id: u64) -> Option<NodeId> {
        self.mapped_ids.get(&original_id).copied()
    }

    fn to_original_node_id(&self, node: NodeId) -> Option<u64> {
        self.original_ids.get(node as usize).copied()
    }

    fn nodes_with_label(&self, label: &str) -> Option<RoaringTreemap> {
        self.labels.get(label).cloned()
    }
}
