use super::{
    join::{join_neighbors, JoinContext, JoinStats},
    partition::range_partition,
    sampler::{generate_random_neighbors, RandomNeighbors, Sampler},
    split::{reverse_neighbors, split_old_and_new},
    Adjacency, NeighborConsumers, NeighborList, NoNeighborConsumers, NodeId, Partition, ProgressTracker,
    SimilarityResult, TerminationFlag,
};
use crate::{
    filter::{KnnNeighborFilter, NeighborFilter},
    similarity::SimilarityFunction,
    Result,
};
use parking_lot::Mutex;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::{
    iter::{
        IndexedParallelIterator, IntoParallelIterator, IntoParallelRefIterator,
        IntoParallelRefMutIterator, ParallelIterator,
    },
    slice::ParallelSliceMut,
    ThreadPool, ThreadPoolBuilder,
};
use simknn_common::{ConfigError, InitialSampler, KnnConfig};
use std::time::Instant;
use tracing::{info, instrument};

/// Build the worker pool a computation runs on.
pub fn build_pool(concurrency: usize) -> Result<ThreadPool> {
    Ok(ThreadPoolBuilder::new().num_threads(concurrency).build()?)
}

/// Approximate k-nearest-neighbor graph construction with NN-Descent.
///
/// Every candidate pair the engine evaluates, during random initialization
/// as well as during joins, is also offered to the configured
/// [`NeighborConsumers`].
pub struct Knn<'a> {
    node_count: u64,
    config: KnnConfig,
    similarity: &'a dyn SimilarityFunction,
    neighbor_filter: &'a dyn NeighborFilter,
    consumers: &'a dyn NeighborConsumers,
    adjacency: Option<&'a Adjacency>,
    termination_flag: TerminationFlag,
}

impl<'a> Knn<'a> {
    pub fn new(node_count: u64, config: KnnConfig, similarity: &'a dyn SimilarityFunction) -> Self {
        Self {
            node_count,
            config,
            similarity,
            neighbor_filter: &KnnNeighborFilter,
            consumers: &NoNeighborConsumers,
            adjacency: None,
            termination_flag: TerminationFlag::default(),
        }
    }

    pub fn with_neighbor_filter(mut self, neighbor_filter: &'a dyn NeighborFilter) -> Self {
        self.neighbor_filter = neighbor_filter;
        self
    }

    pub fn with_consumers(mut self, consumers: &'a dyn NeighborConsumers) -> Self {
        self.consumers = consumers;
        self
    }

    /// Relationships walked by the random walk initial sampler.
    pub fn with_adjacency(mut self, adjacency: &'a Adjacency) -> Self {
        self.adjacency = Some(adjacency);
        self
    }

    pub fn with_termination_flag(mut self, termination_flag: TerminationFlag) -> Self {
        self.termination_flag = termination_flag;
        self
    }

    pub fn config(&self) -> &KnnConfig {
        &self.config
    }

    /// Validate the configuration and run on a dedicated pool of
    /// `concurrency` threads.
    pub fn compute(&self) -> Result<KnnResult> {
        self.config.validate()?;
        let pool = build_pool(self.config.concurrency)?;
        self.compute_on(&pool)
    }

    /// Run on an existing pool.
    #[instrument(level = "info", skip_all, fields(node_count = self.node_count))]
    pub fn compute_on(&self, pool: &ThreadPool) -> Result<KnnResult> {
        let sampler = self.sampler()?;
        if self.node_count < 2 {
            return Ok(KnnResult::empty());
        }
        pool.install(|| self.run(sampler))
    }

    fn sampler(&self) -> Result<Sampler<'a>> {
        match (self.config.initial_sampler, self.adjacency) {
            (InitialSampler::Uniform, _) => Ok(Sampler::Uniform),
            (InitialSampler::RandomWalk, Some(adjacency)) => Ok(Sampler::RandomWalk(adjacency)),
            (InitialSampler::RandomWalk, None) => Err(ConfigError::invalid(
                "initial_sampler",
                "random_walk",
                "an adjacency to walk on",
            )
            .into()),
        }
    }

    fn run(&self, sampler: Sampler<'_>) -> Result<KnnResult> {
        let config = &self.config;
        let node_count = self.node_count;
        let bounded_k = config.bounded_k(node_count);
        let sampled_k = config.sampled_k(node_count);
        let partitions = range_partition(config.concurrency, node_count, config.min_batch_size);

        let mut rng = match config.random_seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };

        let total_start = Instant::now();
        let start = Instant::now();
        let (mut lists, mut node_pairs_considered) =
            self.initialize(sampler, &partitions, bounded_k, &mut rng)?;
        info!("Graph init took {:?}", start.elapsed());

        let max_updates = (config.sample_rate * config.top_k as f64 * node_count as f64).ceil();
        let update_threshold = (config.delta_threshold * max_updates).floor() as u64;

        let mut ran_iterations = 0;
        let mut did_converge = false;
        for iteration in 1..=config.max_iterations {
            let start = Instant::now();
            let stats = self.iteration(&mut lists, &partitions, sampled_k, &mut rng)?;
            ran_iterations = iteration;
            node_pairs_considered += stats.node_pairs_considered;

            let elapsed = start.elapsed();
            metrics::histogram!("simknn.iteration_duration").record(elapsed.as_secs_f64());
            metrics::counter!("simknn.update_count").increment(stats.update_count);
            info!(
                "Graph iteration {iteration} took {:?}, {} updates (threshold {update_threshold})",
                elapsed, stats.update_count
            );

            if stats.update_count <= update_threshold {
                did_converge = true;
                break;
            }
        }

        if config.similarity_cutoff > 0.0 {
            let cutoff = config.similarity_cutoff;
            lists
                .par_iter_mut()
                .for_each(|list| list.get_mut().filter_high_similarity_results(cutoff));
        }

        metrics::counter!("simknn.node_pairs_considered").increment(node_pairs_considered);
        info!(
            "Graph execution took {:?}, {ran_iterations} iterations, converged: {did_converge}",
            total_start.elapsed()
        );

        Ok(KnnResult {
            neighbors: lists.into_iter().map(|list| list.into_inner()).collect(),
            ran_iterations,
            did_converge,
            node_pairs_considered,
        })
    }

    fn initialize(
        &self,
        sampler: Sampler<'_>,
        partitions: &[Partition],
        bounded_k: usize,
        rng: &mut ChaCha8Rng,
    ) -> Result<(Vec<Mutex<NeighborList>>, u64)> {
        let progress = ProgressTracker::new("Initialize random neighbors", self.node_count);
        let tasks: Vec<_> = partitions.iter().copied().zip(split_rngs(rng, partitions.len())).collect();

        let initialized = tasks
            .into_par_iter()
            .map(|(partition, mut rng)| {
                generate_random_neighbors(
                    sampler,
                    partition,
                    self.node_count,
                    bounded_k,
                    self.similarity,
                    self.neighbor_filter,
                    self.consumers,
                    &mut rng,
                    &self.termination_flag,
                    &progress,
                )
            })
            .collect::<Result<Vec<RandomNeighbors>>>()?;

        let node_pairs_considered = initialized.iter().map(|r| r.node_pairs_considered).sum();
        let lists = initialized
            .into_iter()
            .flat_map(|r| r.lists)
            .map(Mutex::new)
            .collect();
        Ok((lists, node_pairs_considered))
    }

    fn iteration(
        &self,
        lists: &mut [Mutex<NeighborList>],
        partitions: &[Partition],
        sampled_k: usize,
        rng: &mut ChaCha8Rng,
    ) -> Result<JoinStats> {
        let batch_size = partitions.first().map_or(1, Partition::node_count);
        let termination_flag = &self.termination_flag;

        let split = lists
            .par_chunks_mut(batch_size)
            .zip(split_rngs(rng, partitions.len()))
            .map(|(chunk, mut rng)| -> Result<_> {
                termination_flag.assert_running()?;
                Ok(split_old_and_new(
                    chunk.iter_mut().map(|list| list.get_mut()),
                    sampled_k,
                    &mut rng,
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        let (old_neighbors, new_neighbors): (Vec<_>, Vec<_>) = split.into_iter().flatten().unzip();

        let reverse_old_neighbors = reverse_neighbors(&old_neighbors);
        let reverse_new_neighbors = reverse_neighbors(&new_neighbors);

        let progress = ProgressTracker::new("Join neighbors", self.node_count);
        let context = JoinContext {
            lists,
            old_neighbors: &old_neighbors,
            new_neighbors: &new_neighbors,
            reverse_old_neighbors: &reverse_old_neighbors,
            reverse_new_neighbors: &reverse_new_neighbors,
            similarity: self.similarity,
            neighbor_filter: self.neighbor_filter,
            consumers: self.consumers,
            sampled_k,
            perturbation_rate: self.config.perturbation_rate,
            random_joins: self.config.random_joins,
            termination_flag,
            progress: &progress,
        };

        let stats = partitions
            .par_iter()
            .zip(split_rngs(rng, partitions.len()))
            .map(|(partition, mut rng)| join_neighbors(&context, *partition, &mut rng))
            .collect::<Result<Vec<_>>>()?;
        Ok(stats.into_iter().sum())
    }
}

/// Independent per-partition generators derived from the master generator.
fn split_rngs(rng: &mut ChaCha8Rng, count: usize) -> Vec<ChaCha8Rng> {
    (0..count)
        .map(|_| ChaCha8Rng::seed_from_u64(rng.next_u64()))
        .collect()
}

/// Final neighbor lists together with run statistics.
#[derive(Clone, Debug, Default)]
pub struct KnnResult {
    neighbors: Vec<NeighborList>,
    ran_iterations: usize,
    did_converge: bool,
    node_pairs_considered: u64,
}

impl KnnResult {
    /// Result of a graph with fewer than two nodes.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Result of a computation whose rounds were skipped because the
    /// answer was already known.
    pub(crate) fn converged_without_iterations() -> Self {
        Self {
            did_converge: true,
            ..Self::default()
        }
    }

    pub fn neighbors_of(&self, node: NodeId) -> Option<&NeighborList> {
        self.neighbors.get(node as usize)
    }

    /// All `(source, target, similarity)` rows, by source and then by
    /// descending similarity.
    pub fn similarity_result_stream(&self) -> impl Iterator<Item = SimilarityResult> + '_ {
        self.neighbors.iter().flat_map(NeighborList::similarity_stream)
    }

    pub fn total_similarity_pairs(&self) -> u64 {
        self.neighbors.iter().map(|list| list.len() as u64).sum()
    }

    pub fn ran_iterations(&self) -> usize {
        self.ran_iterations
    }

    pub fn did_converge(&self) -> bool {
        self.did_converge
    }

    pub fn node_pairs_considered(&self) -> u64 {
        self.node_pairs_considered
    }

    /// Number of nodes with a neighbor list.
    pub fn size(&self) -> usize {
        self.neighbors.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::{NodeProperties, PropertySimilarity};
    use rstest::rstest;
    use tracing_test::traced_test;

    fn config(top_k: usize) -> KnnConfig {
        KnnConfig {
            top_k,
            random_seed: Some(42),
            concurrency: 1,
            ..Default::default()
        }
    }

    fn neighbors(result: &KnnResult, node: NodeId) -> Vec<(NodeId, f64)> {
        result
            .neighbors_of(node)
            .unwrap()
            .elements()
            .iter()
            .map(|n| (n.node, n.similarity))
            .collect()
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    fn test_tiny_graphs_are_empty(#[case] node_count: u64) {
        let similarity = |_: NodeId, _: NodeId| 1.0;
        let result = Knn::new(node_count, config(3), &similarity).compute().unwrap();
        assert_eq!(result.size(), 0);
        assert_eq!(result.ran_iterations(), 0);
        assert!(!result.did_converge());
        assert_eq!(result.similarity_result_stream().count(), 0);
    }

    #[test]
    #[traced_test]
    fn test_five_nodes_converge_to_exact_top_two() {
        let similarity =
            PropertySimilarity::new().with_property(NodeProperties::Long(vec![0, 1, 3, 7, 15]));
        let config = KnnConfig {
            top_k: 2,
            delta_threshold: 0.0,
            random_joins: 100,
            max_iterations: 10,
            ..config(2)
        };

        let result = Knn::new(5, config, &similarity).compute().unwrap();

        assert!(result.did_converge());
        assert!(result.ran_iterations() >= 1);
        assert_eq!(neighbors(&result, 0), vec![(1, 1.0 / 2.0), (2, 1.0 / 4.0)]);
        assert_eq!(neighbors(&result, 1), vec![(0, 1.0 / 2.0), (2, 1.0 / 3.0)]);
        assert_eq!(neighbors(&result, 2), vec![(1, 1.0 / 3.0), (0, 1.0 / 4.0)]);
        assert_eq!(neighbors(&result, 3), vec![(2, 1.0 / 5.0), (1, 1.0 / 7.0)]);
        assert_eq!(neighbors(&result, 4), vec![(3, 1.0 / 9.0), (2, 1.0 / 13.0)]);
        assert_eq!(result.total_similarity_pairs(), 10);
        assert!(logs_contain("Graph init took"));
        assert!(logs_contain("Graph execution took"));
    }

    #[rstest]
    #[case(1, 1000)]
    #[case(4, 10)]
    fn test_bounds_and_no_self_loops(#[case] concurrency: usize, #[case] min_batch_size: usize) {
        let values: Vec<f64> = (0..200).map(|i| ((i * 37) % 101) as f64).collect();
        let similarity = PropertySimilarity::new().with_property(NodeProperties::Double(values));
        let config = KnnConfig {
            concurrency,
            min_batch_size,
            random_seed: (concurrency == 1).then_some(42),
            ..config(5)
        };

        let result = Knn::new(200, config, &similarity).compute().unwrap();
        assert_eq!(result.size(), 200);
        for node in 0..200 {
            let list = result.neighbors_of(node).unwrap();
            assert_eq!(list.len(), 5);
            assert!(!list.contains(node));
            let similarities: Vec<_> = list.elements().iter().map(|n| n.similarity).collect();
            assert!(similarities.windows(2).all(|w| w[0] >= w[1]));
        }
        assert!(result.node_pairs_considered() >= 1000);
    }

    #[test]
    fn test_iteration_limit_without_convergence() {
        let values: Vec<f64> = (0..200).map(|i| ((i * 37) % 101) as f64).collect();
        let similarity = PropertySimilarity::new().with_property(NodeProperties::Double(values));
        let config = KnnConfig {
            max_iterations: 1,
            delta_threshold: 0.0,
            random_joins: 0,
            ..config(5)
        };

        let result = Knn::new(200, config, &similarity).compute().unwrap();
        assert_eq!(result.ran_iterations(), 1);
        assert!(!result.did_converge());
    }

    #[test]
    fn test_random_walk_initial_sampler() {
        // a, b, c, d, e, f, g
        let similarity = PropertySimilarity::new()
            .with_property(NodeProperties::Double(vec![1.2, 1.1, 2.1, 3.1, 4.1, 5.1, 6.1]));
        let (a, b, c, d, e, f, g) = (0, 1, 2, 3, 4, 5, 6);
        let adjacency = Adjacency::from_edges(
            7,
            [
                (a, b),
                (a, d),
                (b, d),
                (b, e),
                (b, f),
                (b, g),
                (c, b),
                (c, e),
                (d, c),
                (d, b),
                (e, b),
                (f, a),
                (f, b),
                (g, b),
                (g, c),
                (g, g),
            ],
        );
        let config = KnnConfig {
            initial_sampler: InitialSampler::RandomWalk,
            random_seed: Some(20),
            random_joins: 100,
            ..config(4)
        };

        let result = Knn::new(7, config, &similarity)
            .with_adjacency(&adjacency)
            .compute()
            .unwrap();

        let contains = |node: NodeId, neighbor: NodeId| result.neighbors_of(node).unwrap().contains(neighbor);
        assert!(contains(a, b));
        assert!(contains(b, a));
        assert!(contains(c, b));
        assert!(contains(d, e));
        assert!(contains(e, f));
        assert!(contains(f, g));
        assert!(contains(g, f));
        for node in 0..7 {
            assert_eq!(result.neighbors_of(node).unwrap().len(), 4);
        }
    }

    #[test]
    fn test_random_walk_requires_adjacency() {
        let similarity = |_: NodeId, _: NodeId| 0.5;
        let config = KnnConfig {
            initial_sampler: InitialSampler::RandomWalk,
            ..config(3)
        };
        let result = Knn::new(10, config, &similarity).compute();
        assert!(matches!(
            result,
            Err(crate::Error::Config(ConfigError::InvalidParameter { name: "initial_sampler", .. }))
        ));
    }

    #[test]
    fn test_bounded_k_for_small_graphs() {
        let similarity = |a: NodeId, b: NodeId| 1.0 / (1.0 + a.abs_diff(b) as f64);
        let result = Knn::new(3, config(10), &similarity).compute().unwrap();
        for node in 0..3 {
            assert_eq!(result.neighbors_of(node).unwrap().len(), 2);
        }
    }

    #[test]
    fn test_fixed_seed_is_deterministic() {
        let similarity = |a: NodeId, b: NodeId| 1.0 / (1.0 + ((a * 7) % 13).abs_diff((b * 7) % 13) as f64);
        let config = KnnConfig {
            perturbation_rate: 0.2,
            ..config(4)
        };
        let first = Knn::new(50, config.clone(), &similarity).compute().unwrap();
        let second = Knn::new(50, config, &similarity).compute().unwrap();

        let first_rows: Vec<_> = first.similarity_result_stream().collect();
        let second_rows: Vec<_> = second.similarity_result_stream().collect();
        assert_eq!(first_rows, second_rows);
        assert_eq!(first.ran_iterations(), second.ran_iterations());
        assert_eq!(first.node_pairs_considered(), second.node_pairs_considered());
    }

    #[test]
    fn test_similarity_cutoff_post_pass() {
        let similarity =
            PropertySimilarity::new().with_property(NodeProperties::Long(vec![0, 1, 3, 7, 15]));
        let config = KnnConfig {
            similarity_cutoff: 0.3,
            random_joins: 100,
            ..config(2)
        };
        let result = Knn::new(5, config, &similarity).compute().unwrap();
        assert!(result.similarity_result_stream().all(|row| row.similarity >= 0.3));
        assert_eq!(neighbors(&result, 0), vec![(1, 0.5)]);
        assert!(result.neighbors_of(4).unwrap().is_empty());
    }

    #[test]
    fn test_nan_similarities_are_never_neighbors() {
        let similarity = |a: NodeId, b: NodeId| if (a + b) % 2 == 0 { f64::NAN } else { 0.5 };
        let result = Knn::new(10, config(3), &similarity).compute().unwrap();
        assert!(result
            .similarity_result_stream()
            .all(|row| (row.source + row.target) % 2 == 1));
    }

    #[test]
    fn test_terminated_computation_fails() {
        let flag = TerminationFlag::new();
        flag.terminate();
        let similarity = |_: NodeId, _: NodeId| 0.5;
        let result = Knn::new(10, config(3), &similarity)
            .with_termination_flag(flag)
            .compute();
        assert!(matches!(result, Err(crate::Error::Terminated)));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let similarity = |_: NodeId, _: NodeId| 0.5;
        let result = Knn::new(10, config(0), &similarity).compute();
        assert!(matches!(result, Err(crate::Error::Config(_))));

        let config = KnnConfig {
            concurrency: 4,
            ..config(3)
        };
        let result = Knn::new(10, config, &similarity).compute();
        assert!(matches!(
            result,
            Err(crate::Error::Config(ConfigError::InvalidParameter { name: "random_seed", .. }))
        ));
    }
}
