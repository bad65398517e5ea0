use super::{
    Adjacency, NeighborConsumers, NeighborList, NodeId, Partition, ProgressTracker,
    TerminationFlag,
};
use crate::{filter::NeighborFilter, similarity::SimilarityFunction, Result};
use rand::{seq::index, Rng};

/// Upper bound on walk steps per wanted sample.
const WALK_STEPS_PER_SAMPLE: usize = 4;

/// Strategy for drawing the initial candidates of a node.
#[derive(Clone, Copy, Debug)]
pub(super) enum Sampler<'a> {
    Uniform,
    RandomWalk(&'a Adjacency),
}

impl Sampler<'_> {
    /// Up to `count` distinct candidates for `node`, never `node` itself.
    fn sample<R: Rng>(
        &self,
        node: NodeId,
        node_count: u64,
        count: usize,
        neighbor_filter: &dyn NeighborFilter,
        rng: &mut R,
    ) -> Vec<NodeId> {
        match self {
            Sampler::Uniform => uniform_sample(node, node_count, count, rng).collect(),
            Sampler::RandomWalk(adjacency) => {
                random_walk_sample(adjacency, node, node_count, count, neighbor_filter, rng)
            }
        }
    }
}

/// `count` distinct nodes other than `node`, drawn uniformly.
fn uniform_sample<R: Rng>(
    node: NodeId,
    node_count: u64,
    count: usize,
    rng: &mut R,
) -> impl Iterator<Item = NodeId> {
    let other_nodes = node_count.saturating_sub(1) as usize;
    index::sample(rng, other_nodes, count.min(other_nodes))
        .into_iter()
        .map(move |sampled| {
            let other = sampled as NodeId;
            if other >= node {
                other + 1
            } else {
                other
            }
        })
}

/// Nodes visited by a walk along outgoing relationships starting at `node`.
/// The walk jumps back to `node` at dead ends. Candidates the walk does not
/// reach within its step budget are filled in with uniform draws.
fn random_walk_sample<R: Rng>(
    adjacency: &Adjacency,
    node: NodeId,
    node_count: u64,
    count: usize,
    neighbor_filter: &dyn NeighborFilter,
    rng: &mut R,
) -> Vec<NodeId> {
    let mut samples = Vec::with_capacity(count);
    let mut current = node;
    for _ in 0..count * WALK_STEPS_PER_SAMPLE {
        if samples.len() == count {
            break;
        }
        let neighbors = adjacency.neighbors(current);
        if neighbors.is_empty() {
            if current == node {
                break;
            }
            current = node;
            continue;
        }
        current = neighbors[rng.gen_range(0..neighbors.len())];
        if current != node
            && current < node_count
            && !samples.contains(&current)
            && !neighbor_filter.exclude_node_pair(node, current)
        {
            samples.push(current);
        }
    }

    let missing = count - samples.len();
    if missing > 0 {
        let fill: Vec<_> = uniform_sample(node, node_count, count, rng)
            .filter(|other| !samples.contains(other))
            .take(missing)
            .collect();
        samples.extend(fill);
    }
    samples
}

/// Initial candidate lists for the nodes of a partition.
pub(super) struct RandomNeighbors {
    pub lists: Vec<NeighborList>,
    pub node_pairs_considered: u64,
}

/// Fill the list of every node in `partition` with `bounded_k` distinct
/// other nodes drawn by `sampler`. Pairs excluded by the neighbor filter are
/// skipped, so lists may start out short.
#[allow(clippy::too_many_arguments)]
pub(super) fn generate_random_neighbors<R: Rng>(
    sampler: Sampler<'_>,
    partition: Partition,
    node_count: u64,
    bounded_k: usize,
    similarity: &dyn SimilarityFunction,
    neighbor_filter: &dyn NeighborFilter,
    consumers: &dyn NeighborConsumers,
    rng: &mut R,
    termination_flag: &TerminationFlag,
    progress: &ProgressTracker,
) -> Result<RandomNeighbors> {
    termination_flag.assert_running()?;

    let mut lists = Vec::with_capacity(partition.node_count());
    let mut node_pairs_considered = 0;

    for node in partition.nodes() {
        let mut list = NeighborList::new(node, bounded_k);
        for other in sampler.sample(node, node_count, bounded_k, neighbor_filter, rng) {
            if neighbor_filter.exclude_node_pair(node, other) {
                continue;
            }
            let score = similarity.similarity(node, other);
            node_pairs_considered += 1;
            // Lists are not full yet, so perturbation never applies here.
            list.add(other, score, rng, 0.0);
            consumers.offer(node, other, score);
        }
        lists.push(list);
    }

    progress.log_progress(partition.node_count() as u64);
    Ok(RandomNeighbors {
        lists,
        node_pairs_considered,
    })
}
