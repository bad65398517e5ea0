use super::{
    target_filter::TargetNodeFilter,
    target_filtering::{SeedingSummary, TargetNodeFiltering},
};
use crate::{
    filter::{IdMap, KnnNeighborFilter, NeighborFilter, NodeFilter},
    knn::{build_pool, Adjacency, Knn, KnnResult, NodeId, SimilarityResult, TerminationFlag},
    similarity::SimilarityFunction,
    Result,
};
use simknn_common::FilteredKnnConfig;
use std::sync::Arc;
use tracing::{info, instrument};

/// k-NN restricted to source and target node sets.
///
/// Source filters select the nodes results are produced for, target filters
/// select the nodes allowed as their neighbors. NN-Descent still explores
/// the whole graph; target filtering only decides what is kept.
pub struct FilteredKnn<'a> {
    id_map: &'a dyn IdMap,
    config: FilteredKnnConfig,
    similarity: &'a dyn SimilarityFunction,
    neighbor_filter: &'a dyn NeighborFilter,
    adjacency: Option<&'a Adjacency>,
    termination_flag: TerminationFlag,
}

impl<'a> FilteredKnn<'a> {
    pub fn new(
        id_map: &'a dyn IdMap,
        config: FilteredKnnConfig,
        similarity: &'a dyn SimilarityFunction,
    ) -> Self {
        Self {
            id_map,
            config,
            similarity,
            neighbor_filter: &KnnNeighborFilter,
            adjacency: None,
            termination_flag: TerminationFlag::default(),
        }
    }

    pub fn with_neighbor_filter(mut self, neighbor_filter: &'a dyn NeighborFilter) -> Self {
        self.neighbor_filter = neighbor_filter;
        self
    }

    pub fn with_adjacency(mut self, adjacency: &'a Adjacency) -> Self {
        self.adjacency = Some(adjacency);
        self
    }

    pub fn with_termination_flag(mut self, termination_flag: TerminationFlag) -> Self {
        self.termination_flag = termination_flag;
        self
    }

    #[instrument(level = "info", skip_all, fields(node_count = self.id_map.node_count()))]
    pub fn compute(&self) -> Result<FilteredKnnResult> {
        let config = &self.config;
        config.validate()?;

        let node_count = self.id_map.node_count();
        let source_filter = NodeFilter::resolve(&config.source_node_filter, self.id_map)?;
        let target_filter = Arc::new(NodeFilter::resolve(&config.target_node_filter, self.id_map)?);

        let pool = build_pool(config.knn.concurrency)?;
        let seeding_similarity = config.seed_target_nodes.then_some(self.similarity);
        let target_filtering = TargetNodeFiltering::create(
            node_count,
            &config.knn,
            &source_filter,
            target_filter,
            seeding_similarity,
            &pool,
            &self.termination_flag,
        )?;

        let seeding_summary = target_filtering.seeding_summary();
        let knn = if seeding_summary.seeded_optimally {
            info!("Seeding reached every target node, skipping NN-Descent");
            KnnResult::converged_without_iterations()
        } else {
            let mut knn = Knn::new(node_count, config.knn.clone(), self.similarity)
                .with_neighbor_filter(self.neighbor_filter)
                .with_consumers(&target_filtering)
                .with_termination_flag(self.termination_flag.clone());
            if let Some(adjacency) = self.adjacency {
                knn = knn.with_adjacency(adjacency);
            }
            knn.compute_on(&pool)?
        };

        Ok(FilteredKnnResult {
            node_count,
            knn,
            target_filters: target_filtering.into_filters(),
            source_filter,
            seeding_summary,
        })
    }
}

/// Outcome of a filtered k-NN computation.
#[derive(Debug)]
pub struct FilteredKnnResult {
    node_count: u64,
    knn: KnnResult,
    target_filters: Option<Vec<TargetNodeFilter>>,
    source_filter: NodeFilter,
    seeding_summary: SeedingSummary,
}

impl FilteredKnnResult {
    /// Rows of all source nodes, by source and then by descending
    /// similarity.
    pub fn similarity_result_stream(&self) -> Box<dyn Iterator<Item = SimilarityResult> + '_> {
        match &self.target_filters {
            Some(filters) => Box::new(
                filters
                    .iter()
                    .enumerate()
                    .map(|(node, filter)| (node as NodeId, filter))
                    .filter(|(node, _)| self.source_filter.test(*node))
                    .flat_map(|(node, filter)| filter.as_similarity_stream(node)),
            ),
            None => Box::new(
                self.knn
                    .similarity_result_stream()
                    .filter(|row| self.source_filter.test(row.source)),
            ),
        }
    }

    pub fn total_similarity_pairs(&self) -> u64 {
        match &self.target_filters {
            Some(filters) => filters
                .iter()
                .enumerate()
                .filter(|(node, _)| self.source_filter.test(*node as NodeId))
                .map(|(_, filter)| filter.size() as u64)
                .sum(),
            None => (0..self.knn.size() as NodeId)
                .filter(|&node| self.source_filter.test(node))
                .filter_map(|node| self.knn.neighbors_of(node))
                .map(|list| list.len() as u64)
                .sum(),
        }
    }

    pub fn ran_iterations(&self) -> usize {
        self.knn.ran_iterations()
    }

    pub fn did_converge(&self) -> bool {
        self.knn.did_converge()
    }

    pub fn node_pairs_considered(&self) -> u64 {
        self.knn.node_pairs_considered()
    }

    pub fn seeding_summary(&self) -> SeedingSummary {
        self.seeding_summary
    }

    pub fn node_count(&self) -> u64 {
        self.node_count
    }
}
