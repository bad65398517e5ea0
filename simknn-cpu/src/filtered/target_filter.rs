use crate::{
    filter::NodeFilter,
    knn::{NodeId, SimilarityResult},
};
use std::{cmp::Ordering, collections::BTreeSet, sync::Arc};

/// A `(similarity, node)` candidate, ordered by descending similarity and
/// then by ascending node id.
#[derive(Clone, Copy, Debug)]
pub struct ScoredNeighbor {
    pub similarity: f64,
    pub node: NodeId,
}

impl ScoredNeighbor {
    pub fn new(similarity: f64, node: NodeId) -> Self {
        Self { similarity, node }
    }
}

impl Ord for ScoredNeighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .similarity
            .total_cmp(&self.similarity)
            .then(self.node.cmp(&other.node))
    }
}

impl PartialOrd for ScoredNeighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ScoredNeighbor {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScoredNeighbor {}

/// Bounded set of the best target-eligible candidates of a single node.
#[derive(Clone, Debug)]
pub struct ProvidedTargetNodeFilter {
    owner: NodeId,
    predicate: Arc<NodeFilter>,
    bound: usize,
    similarity_cutoff: f64,
    seeded: bool,
    neighbors: BTreeSet<ScoredNeighbor>,
}

/// Per-node result collector of a filtered k-NN computation.
///
/// `Empty` is installed for nodes that are not sources; it discards every
/// offer and has size 0.
#[derive(Clone, Debug)]
pub enum TargetNodeFilter {
    Empty,
    Provided(ProvidedTargetNodeFilter),
}

impl TargetNodeFilter {
    /// Unseeded filter, rejecting candidates below `similarity_cutoff`.
    pub fn new(owner: NodeId, predicate: Arc<NodeFilter>, bound: usize, similarity_cutoff: f64) -> Self {
        TargetNodeFilter::Provided(ProvidedTargetNodeFilter {
            owner,
            predicate,
            bound,
            similarity_cutoff,
            seeded: false,
            neighbors: BTreeSet::new(),
        })
    }

    /// Filter pre-populated with personalized seeds. Seeded filters accept
    /// candidates regardless of the similarity cutoff.
    pub fn seeded(
        owner: NodeId,
        predicate: Arc<NodeFilter>,
        bound: usize,
        similarity_cutoff: f64,
        seeds: impl IntoIterator<Item = ScoredNeighbor>,
    ) -> Self {
        let mut filter = TargetNodeFilter::Provided(ProvidedTargetNodeFilter {
            owner,
            predicate,
            bound,
            similarity_cutoff,
            seeded: true,
            neighbors: BTreeSet::new(),
        });
        for seed in seeds {
            filter.offer(seed.node, seed.similarity);
        }
        filter
    }

    /// Offer a candidate, returns whether it was retained.
    pub fn offer(&mut self, node: NodeId, similarity: f64) -> bool {
        let TargetNodeFilter::Provided(filter) = self else {
            return false;
        };
        if similarity.is_nan() {
            return false;
        }
        if !filter.seeded && similarity < filter.similarity_cutoff {
            return false;
        }
        if node == filter.owner || !filter.predicate.test(node) {
            return false;
        }

        let candidate = ScoredNeighbor::new(similarity, node);
        if !filter.neighbors.insert(candidate) {
            return false;
        }
        if filter.neighbors.len() > filter.bound {
            return filter.neighbors.pop_last() != Some(candidate);
        }
        true
    }

    pub fn size(&self) -> usize {
        match self {
            TargetNodeFilter::Empty => 0,
            TargetNodeFilter::Provided(filter) => filter.neighbors.len(),
        }
    }

    pub fn is_seeded(&self) -> bool {
        matches!(self, TargetNodeFilter::Provided(filter) if filter.seeded)
    }

    pub fn neighbors(&self) -> impl Iterator<Item = &ScoredNeighbor> + '_ {
        let neighbors = match self {
            TargetNodeFilter::Empty => None,
            TargetNodeFilter::Provided(filter) => Some(filter.neighbors.iter()),
        };
        neighbors.into_iter().flatten()
    }

    /// Retained candidates as rows of `source`, by descending similarity.
    pub fn as_similarity_stream(&self, source: NodeId) -> impl Iterator<Item = SimilarityResult> + '_ {
        self.neighbors()
            .map(move |neighbor| SimilarityResult::new(source, neighbor.node, neighbor.similarity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn even_nodes() -> Arc<NodeFilter> {
        Arc::new(NodeFilter::from_ids([0, 2, 4, 6, 8]))
    }

    fn contents(filter: &TargetNodeFilter) -> Vec<(f64, NodeId)> {
        filter.neighbors().map(|n| (n.similarity, n.node)).collect()
    }

    #[test]
    fn test_target_predicate_and_bound() {
        let mut filter = TargetNodeFilter::new(0, even_nodes(), 2, 0.0);
        for (node, similarity) in [(1, 0.9), (2, 0.8), (3, 0.7), (4, 0.6)] {
            filter.offer(node, similarity);
        }
        assert_eq!(contents(&filter), vec![(0.8, 2), (0.6, 4)]);
        assert_eq!(filter.size(), 2);
    }

    #[test]
    fn test_eviction_removes_minimum() {
        let mut filter = TargetNodeFilter::new(1, Arc::new(NodeFilter::AllowEverything), 2, 0.0);
        assert!(filter.offer(2, 0.5));
        assert!(filter.offer(3, 0.7));
        assert!(filter.offer(4, 0.6));
        assert_eq!(contents(&filter), vec![(0.7, 3), (0.6, 4)]);
        assert!(!filter.offer(5, 0.1));
        assert_eq!(filter.size(), 2);
    }

    #[test]
    fn test_rejections() {
        let mut filter = TargetNodeFilter::new(2, Arc::new(NodeFilter::AllowEverything), 3, 0.5);
        assert!(!filter.offer(3, f64::NAN));
        assert!(!filter.offer(3, 0.4));
        assert!(!filter.offer(2, 0.9));
        assert!(filter.offer(3, 0.5));
        assert!(!filter.offer(3, 0.5));
        assert_eq!(contents(&filter), vec![(0.5, 3)]);
    }

    #[test]
    fn test_seeded_filter_accepts_below_cutoff() {
        let seeds = [ScoredNeighbor::new(0.1, 4), ScoredNeighbor::new(0.2, 6)];
        let mut filter = TargetNodeFilter::seeded(0, even_nodes(), 2, 0.5, seeds);
        assert!(filter.is_seeded());
        assert_eq!(contents(&filter), vec![(0.2, 6), (0.1, 4)]);
        assert!(filter.offer(8, 0.3));
        assert!(!filter.offer(7, 0.9));
        assert_eq!(contents(&filter), vec![(0.3, 8), (0.2, 6)]);
    }

    #[test]
    fn test_empty_filter_is_inert() {
        let mut filter = TargetNodeFilter::Empty;
        assert!(!filter.offer(1, 1.0));
        assert_eq!(filter.size(), 0);
        assert_eq!(filter.as_similarity_stream(0).count(), 0);
        assert!(!filter.is_seeded());
    }

    #[test]
    fn test_similarity_stream() {
        let mut filter = TargetNodeFilter::new(5, Arc::new(NodeFilter::AllowEverything), 3, 0.0);
        filter.offer(1, 0.2);
        filter.offer(2, 0.9);
        assert_eq!(
            filter.as_similarity_stream(5).collect::<Vec<_>>(),
            vec![SimilarityResult::new(5, 2, 0.9), SimilarityResult::new(5, 1, 0.2)]
        );
    }
}
