use super::{NodeId, SimilarityResult};
use rand::Rng;
use std::cmp::Ordering;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Neighbor {
    pub node: NodeId,
    pub similarity: f64,
    /// Set once the neighbor took part in a join as a new neighbor.
    checked: bool,
}

impl Neighbor {
    fn new(node: NodeId, similarity: f64) -> Self {
        Self {
            node,
            similarity,
            checked: false,
        }
    }

    pub fn is_checked(&self) -> bool {
        self.checked
    }

    /// Descending by similarity, ascending by node id on ties.
    fn rank(&self, other_node: NodeId, other_similarity: f64) -> Ordering {
        other_similarity
            .total_cmp(&self.similarity)
            .then(self.node.cmp(&other_node))
    }
}

/// Bounded candidate list of a single node, sorted by descending similarity.
#[derive(Clone, Debug)]
pub struct NeighborList {
    owner: NodeId,
    bound: usize,
    elements: Vec<Neighbor>,
}

impl NeighborList {
    pub fn new(owner: NodeId, bound: usize) -> Self {
        Self {
            owner,
            bound,
            elements: Vec::with_capacity(bound),
        }
    }

    pub fn owner(&self) -> NodeId {
        self.owner
    }

    pub fn bound(&self) -> usize {
        self.bound
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn elements(&self) -> &[Neighbor] {
        &self.elements
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.elements.iter().any(|neighbor| neighbor.node == node)
    }

    /// Smallest similarity in the list, `None` while empty.
    pub fn min_similarity(&self) -> Option<f64> {
        self.elements.last().map(|neighbor| neighbor.similarity)
    }

    /// Offer a candidate, returns whether the list changed.
    ///
    /// NaN similarities, the owner itself and nodes already in the list are
    /// rejected. A full list evicts its weakest entry for a stronger
    /// candidate. A weaker candidate replaces the weakest entry with
    /// probability `perturbation_rate`; `rng` is only drawn from in that case.
    pub fn add<R: Rng>(
        &mut self,
        node: NodeId,
        similarity: f64,
        rng: &mut R,
        perturbation_rate: f64,
    ) -> bool {
        if similarity.is_nan() || node == self.owner || self.bound == 0 || self.contains(node) {
            return false;
        }

        let position = self
            .elements
            .partition_point(|neighbor| neighbor.rank(node, similarity) == Ordering::Less);

        if self.elements.len() < self.bound {
            self.elements.insert(position, Neighbor::new(node, similarity));
            return true;
        }

        if position < self.elements.len() {
            self.elements.pop();
            self.elements.insert(position, Neighbor::new(node, similarity));
            return true;
        }

        if perturbation_rate > 0.0 && rng.gen::<f64>() < perturbation_rate {
            if let Some(weakest) = self.elements.last_mut() {
                *weakest = Neighbor::new(node, similarity);
                return true;
            }
        }
        false
    }

    /// Split the list into previously checked neighbors (`old`) and a sample
    /// of at most `sampled_k` unchecked neighbors (`new`). Sampled neighbors
    /// are marked as checked.
    pub fn split_old_and_new<R: Rng>(
        &mut self,
        sampled_k: usize,
        rng: &mut R,
    ) -> (Vec<NodeId>, Vec<NodeId>) {
        let unchecked = self.elements.iter().filter(|n| !n.checked).count();
        let sample_rate = if unchecked == 0 {
            0.0
        } else {
            sampled_k as f64 / unchecked as f64
        };

        let mut old = Vec::new();
        let mut new = Vec::new();
        for neighbor in self.elements.iter_mut() {
            if neighbor.checked {
                old.push(neighbor.node);
            } else if new.len() < sampled_k && rng.gen::<f64>() < sample_rate {
                neighbor.checked = true;
                new.push(neighbor.node);
            }
        }
        (old, new)
    }

    /// Drop every neighbor with a similarity below `cutoff`.
    pub fn filter_high_similarity_results(&mut self, cutoff: f64) {
        self.elements.retain(|neighbor| neighbor.similarity >= cutoff);
    }

    pub fn similarity_stream(&self) -> impl Iterator<Item = SimilarityResult> + '_ {
        self.elements
            .iter()
            .map(move |neighbor| SimilarityResult::new(self.owner, neighbor.node, neighbor.similarity))
    }
}
