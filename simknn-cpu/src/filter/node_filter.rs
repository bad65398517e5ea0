use super::IdMap;
use crate::{
    error::{Error, Result},
    knn::NodeId,
};
use roaring::RoaringTreemap;
use simknn_common::NodeFilterSpec;
use tracing::debug;

/// Immutable predicate over internal node ids.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum NodeFilter {
    #[default]
    AllowEverything,
    Ids(RoaringTreemap),
}

impl NodeFilter {
    pub fn from_ids(nodes: impl IntoIterator<Item = NodeId>) -> Self {
        NodeFilter::Ids(nodes.into_iter().collect())
    }

    pub fn test(&self, node: NodeId) -> bool {
        match self {
            NodeFilter::AllowEverything => true,
            NodeFilter::Ids(ids) => ids.contains(node),
        }
    }

    pub fn is_allow_everything(&self) -> bool {
        matches!(self, NodeFilter::AllowEverything)
    }

    /// Bind a filter specification to the id space of `id_map`.
    ///
    /// Original ids are translated to internal ids. All missing ids are
    /// reported together; a label the map does not know is an error as well.
    pub fn resolve(spec: &NodeFilterSpec, id_map: &dyn IdMap) -> Result<Self> {
        let filter = match spec {
            NodeFilterSpec::NoOp => NodeFilter::AllowEverything,
            NodeFilterSpec::NodeIds(original_ids) => {
                let mut ids = RoaringTreemap::new();
                let mut missing = Vec::new();
                for &original_id in original_ids {
                    match id_map.to_mapped_node_id(original_id) {
                        Some(node) => {
                            ids.insert(node);
                        }
                        None => missing.push(original_id),
                    }
                }
                if !missing.is_empty() {
                    return Err(Error::NodesNotFound(missing));
                }
                NodeFilter::Ids(ids)
            }
            NodeFilterSpec::Label(label) => id_map
                .nodes_with_label(label)
                .map(NodeFilter::Ids)
                .ok_or_else(|| Error::UnknownLabel(label.clone()))?,
        };
        debug!("Resolved node filter {spec} to {} nodes", filter.describe_size());
        Ok(filter)
    }

    fn describe_size(&self) -> String {
        match self {
            NodeFilter::AllowEverything => "all".to_string(),
            NodeFilter::Ids(ids) => ids.len().to_string(),
        }
    }
}
