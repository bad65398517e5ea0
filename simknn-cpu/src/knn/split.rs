use super::{NeighborList, NodeId};
use rand::Rng;

/// Split every list of a partition into its old and new neighbors.
pub(super) fn split_old_and_new<'a, R: Rng>(
    lists: impl IntoIterator<Item = &'a mut NeighborList>,
    sampled_k: usize,
    rng: &mut R,
) -> Vec<(Vec<NodeId>, Vec<NodeId>)> {
    lists
        .into_iter()
        .map(|list| list.split_old_and_new(sampled_k, rng))
        .collect()
}

/// Invert a node-indexed adjacency: `reverse[u]` holds every `v` with
/// `u` in `neighbors[v]`, in ascending order of `v`.
pub(super) fn reverse_neighbors(neighbors: &[Vec<NodeId>]) -> Vec<Vec<NodeId>> {
    let mut reverse = vec![Vec::new(); neighbors.len()];
    for (node, list) in neighbors.iter().enumerate() {
        for &neighbor in list {
            if let Some(entry) = reverse.get_mut(neighbor as usize) {
                entry.push(node as NodeId);
            }
        }
    }
    reverse
}
