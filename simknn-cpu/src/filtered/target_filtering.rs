use super::target_filter::{ScoredNeighbor, TargetNodeFilter};
use crate::{
    filter::NodeFilter,
    knn::{range_partition, NeighborConsumers, NodeId, TerminationFlag},
    similarity::SimilarityFunction,
    Result,
};
use parking_lot::Mutex;
use rayon::{
    iter::{IntoParallelIterator, ParallelIterator},
    ThreadPool,
};
use serde::{Deserialize, Serialize};
use simknn_common::KnnConfig;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tracing::{debug, instrument};

/// Statistics of the seeding step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedingSummary {
    /// Source nodes whose filter was seeded
    pub nodes_compared: u64,
    /// Similarity evaluations spent on seeding
    pub node_pairs_compared: u64,
    /// Fewer than `k + 1` target nodes exist and all of them were seeded,
    /// so every seeded filter already holds its exact result.
    pub seeded_optimally: bool,
}

/// The first `k + 1` target-eligible node ids, in ascending order.
pub fn find_seeds(node_count: u64, target_filter: &NodeFilter, k: usize) -> Vec<NodeId> {
    let wanted = k + 1;
    match target_filter {
        NodeFilter::AllowEverything => (0..node_count).take(wanted).collect(),
        NodeFilter::Ids(ids) => ids
            .iter()
            .take_while(|&node| node < node_count)
            .take(wanted)
            .collect(),
    }
}

/// Per-node target filters of a filtered k-NN computation.
///
/// Acts as the candidate sink of the NN-Descent engine: every candidate the
/// engine evaluates is offered to the filter of its source node.
#[derive(Debug)]
pub enum TargetNodeFiltering {
    /// Every node is a valid target; filtering is not needed.
    Empty,
    Provided {
        filters: Vec<Mutex<TargetNodeFilter>>,
        seeding_summary: SeedingSummary,
    },
}

impl TargetNodeFiltering {
    /// Build the per-node filters, seeding them in parallel on `pool` when
    /// `similarity` is given.
    #[instrument(level = "debug", skip_all, fields(node_count = node_count))]
    pub fn create(
        node_count: u64,
        config: &KnnConfig,
        source_filter: &NodeFilter,
        target_filter: Arc<NodeFilter>,
        similarity: Option<&dyn SimilarityFunction>,
        pool: &ThreadPool,
        termination_flag: &TerminationFlag,
    ) -> Result<Self> {
        if target_filter.is_allow_everything() {
            return Ok(TargetNodeFiltering::Empty);
        }

        let k = config.top_k;
        let bound = k + 1;
        let cutoff = config.similarity_cutoff;
        let seeds = find_seeds(node_count, &target_filter, k);
        let nodes_compared = AtomicU64::new(0);
        let node_pairs_compared = AtomicU64::new(0);

        let partitions = range_partition(config.concurrency, node_count, config.min_batch_size);
        let filters = pool.install(|| {
            partitions
                .into_par_iter()
                .map(|partition| -> Result<Vec<_>> {
                    termination_flag.assert_running()?;
                    let mut nodes = 0;
                    let mut pairs = 0;
                    let filters = partition
                        .nodes()
                        .map(|node| {
                            if !source_filter.test(node) {
                                return Mutex::new(TargetNodeFilter::Empty);
                            }
                            let filter = match similarity {
                                Some(similarity) => {
                                    let personal_seeds: Vec<_> = seeds
                                        .iter()
                                        .filter(|&&seed| seed != node)
                                        .map(|&seed| {
                                            ScoredNeighbor::new(similarity.similarity(node, seed), seed)
                                        })
                                        .collect();
                                    nodes += 1;
                                    pairs += personal_seeds.len() as u64;
                                    TargetNodeFilter::seeded(
                                        node,
                                        Arc::clone(&target_filter),
                                        bound,
                                        cutoff,
                                        personal_seeds,
                                    )
                                }
                                None => {
                                    TargetNodeFilter::new(node, Arc::clone(&target_filter), bound, cutoff)
                                }
                            };
                            Mutex::new(filter)
                        })
                        .collect();
                    nodes_compared.fetch_add(nodes, Ordering::Relaxed);
                    node_pairs_compared.fetch_add(pairs, Ordering::Relaxed);
                    Ok(filters)
                })
                .collect::<Result<Vec<_>>>()
        })?;

        let seeding_summary = SeedingSummary {
            nodes_compared: nodes_compared.into_inner(),
            node_pairs_compared: node_pairs_compared.into_inner(),
            seeded_optimally: seeds.len() <= k && similarity.is_some(),
        };
        debug!(
            "Created target node filters with {} seeds, {:?}",
            seeds.len(),
            seeding_summary
        );

        Ok(TargetNodeFiltering::Provided {
            filters: filters.into_iter().flatten().collect(),
            seeding_summary,
        })
    }

    pub fn seeding_summary(&self) -> SeedingSummary {
        match self {
            TargetNodeFiltering::Empty => SeedingSummary::default(),
            TargetNodeFiltering::Provided {
                seeding_summary, ..
            } => *seeding_summary,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, TargetNodeFiltering::Empty)
    }

    /// Release the per-node locks once the computation is done. `None` for
    /// the `Empty` variant.
    pub fn into_filters(self) -> Option<Vec<TargetNodeFilter>> {
        match self {
            TargetNodeFiltering::Empty => None,
            TargetNodeFiltering::Provided { filters, .. } => {
                Some(filters.into_iter().map(|filter| filter.into_inner()).collect())
            }
        }
    }
}

impl NeighborConsumers for TargetNodeFiltering {
    fn offer(&self, source: NodeId, target: NodeId, similarity: f64) {
        if let TargetNodeFiltering::Provided { filters, .. } = self {
            if let Some(filter) = filters.get(source as usize) {
                filter.lock().offer(target, similarity);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knn::build_pool;
    use rstest::rstest;

    fn similarity(first: NodeId, second: NodeId) -> f64 {
        1.0 / (1.0 + first.abs_diff(second) as f64)
    }

    fn config(top_k: usize) -> KnnConfig {
        KnnConfig {
            top_k,
            concurrency: 2,
            min_batch_size: 3,
            ..Default::default()
        }
    }

    #[rstest]
    #[case(NodeFilter::AllowEverything, 10, 2, vec![0, 1, 2])]
    #[case(NodeFilter::AllowEverything, 2, 5, vec![0, 1])]
    #[case(NodeFilter::from_ids([7, 3, 5, 9]), 10, 2, vec![3, 5, 7])]
    #[case(NodeFilter::from_ids([7, 3, 12]), 10, 5, vec![3, 7])]
    fn test_find_seeds(
        #[case] target_filter: NodeFilter,
        #[case] node_count: u64,
        #[case] k: usize,
        #[case] expected: Vec<NodeId>,
    ) {
        assert_eq!(find_seeds(node_count, &target_filter, k), expected);
    }

    #[test]
    fn test_allow_everything_targets_need_no_filtering() {
        let pool = build_pool(1).unwrap();
        let filtering = TargetNodeFiltering::create(
            10,
            &config(3),
            &NodeFilter::AllowEverything,
            Arc::new(NodeFilter::AllowEverything),
            Some(&similarity),
            &pool,
            &TerminationFlag::new(),
        )
        .unwrap();
        assert!(filtering.is_empty());
        assert_eq!(filtering.seeding_summary(), SeedingSummary::default());
        filtering.offer(1, 2, 0.5);
        assert!(filtering.into_filters().is_none());
    }

    #[test]
    fn test_optimal_seeding() {
        let pool = build_pool(2).unwrap();
        let targets = Arc::new(NodeFilter::from_ids([2, 5]));
        let sources = NodeFilter::from_ids([0, 1, 2, 3]);
        let filtering = TargetNodeFiltering::create(
            8,
            &config(3),
            &sources,
            targets,
            Some(&similarity),
            &pool,
            &TerminationFlag::new(),
        )
        .unwrap();

        let summary = filtering.seeding_summary();
        assert!(summary.seeded_optimally);
        assert_eq!(summary.nodes_compared, 4);
        // node 2 is not compared with itself
        assert_eq!(summary.node_pairs_compared, 7);

        let filters = filtering.into_filters().unwrap();
        assert_eq!(filters.len(), 8);
        let targets_of = |node: usize| -> Vec<NodeId> { filters[node].neighbors().map(|n| n.node).collect() };
        assert_eq!(targets_of(0), vec![2, 5]);
        assert_eq!(targets_of(2), vec![5]);
        assert_eq!(targets_of(3), vec![2, 5]);
        assert_eq!(filters[4].size(), 0);
        assert!(matches!(filters[7], TargetNodeFilter::Empty));
    }

    #[test]
    fn test_seeding_is_not_optimal_with_many_targets() {
        let pool = build_pool(1).unwrap();
        let filtering = TargetNodeFiltering::create(
            10,
            &config(2),
            &NodeFilter::AllowEverything,
            Arc::new(NodeFilter::from_ids([1, 3, 5, 7])),
            Some(&similarity),
            &pool,
            &TerminationFlag::new(),
        )
        .unwrap();
        let summary = filtering.seeding_summary();
        assert!(!summary.seeded_optimally);
        assert_eq!(summary.nodes_compared, 10);
    }

    #[test]
    fn test_unseeded_filtering_collects_offers() {
        let pool = build_pool(1).unwrap();
        let filtering = TargetNodeFiltering::create(
            4,
            &config(1),
            &NodeFilter::AllowEverything,
            Arc::new(NodeFilter::from_ids([1, 2])),
            None,
            &pool,
            &TerminationFlag::new(),
        )
        .unwrap();
        let summary = filtering.seeding_summary();
        assert!(!summary.seeded_optimally);
        assert_eq!(summary.node_pairs_compared, 0);

        filtering.offer(0, 3, 0.9);
        filtering.offer(0, 1, 0.4);
        filtering.offer(0, 2, 0.6);
        filtering.offer(17, 2, 0.6);
        let filters = filtering.into_filters().unwrap();
        assert_eq!(
            filters[0].as_similarity_stream(0).map(|row| row.target).collect::<Vec<_>>(),
            vec![2, 1]
        );
    }

    #[test]
    fn test_filters_hold_k_plus_one_targets() {
        let pool = build_pool(1).unwrap();
        let filtering = TargetNodeFiltering::create(
            10,
            &config(2),
            &NodeFilter::AllowEverything,
            Arc::new(NodeFilter::from_ids(1..10)),
            Some(&similarity),
            &pool,
            &TerminationFlag::new(),
        )
        .unwrap();
        assert!(!filtering.seeding_summary().seeded_optimally);

        for target in 4..10 {
            filtering.offer(0, target, similarity(0, target));
        }
        let filters = filtering.into_filters().unwrap();
        // seeds 1, 2, 3 are already the closest targets of node 0
        assert_eq!(filters[0].size(), 3);
        assert_eq!(
            filters[0].neighbors().map(|n| n.node).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(filters.iter().all(|filter| filter.size() <= 3));
    }
}
