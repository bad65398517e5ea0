use super::{NeighborConsumers, NeighborList, NodeId, Partition, ProgressTracker, TerminationFlag};
use crate::{filter::NeighborFilter, similarity::SimilarityFunction, Result};
use parking_lot::Mutex;
use rand::Rng;
use std::{iter::Sum, ops::Add};

/// Read-only state shared by all join tasks of a round.
pub(super) struct JoinContext<'a> {
    pub lists: &'a [Mutex<NeighborList>],
    pub old_neighbors: &'a [Vec<NodeId>],
    pub new_neighbors: &'a [Vec<NodeId>],
    pub reverse_old_neighbors: &'a [Vec<NodeId>],
    pub reverse_new_neighbors: &'a [Vec<NodeId>],
    pub similarity: &'a dyn SimilarityFunction,
    pub neighbor_filter: &'a dyn NeighborFilter,
    pub consumers: &'a dyn NeighborConsumers,
    pub sampled_k: usize,
    pub perturbation_rate: f64,
    pub random_joins: usize,
    pub termination_flag: &'a TerminationFlag,
    pub progress: &'a ProgressTracker,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(super) struct JoinStats {
    pub update_count: u64,
    pub node_pairs_considered: u64,
}

impl Add for JoinStats {
    type Output = JoinStats;

    fn add(self, other: JoinStats) -> JoinStats {
        JoinStats {
            update_count: self.update_count + other.update_count,
            node_pairs_considered: self.node_pairs_considered + other.node_pairs_considered,
        }
    }
}

impl Sum for JoinStats {
    fn sum<I: Iterator<Item = JoinStats>>(iter: I) -> Self {
        iter.fold(JoinStats::default(), Add::add)
    }
}

struct Joiner<'c, 'a, R> {
    context: &'c JoinContext<'a>,
    rng: &'c mut R,
    node_pairs_considered: u64,
}

impl<R: Rng> Joiner<'_, '_, R> {
    /// Offer `joiner` as a candidate neighbor of `base`, returns 1 if the
    /// list of `base` changed.
    fn join(&mut self, base: NodeId, joiner: NodeId) -> u64 {
        let context = self.context;
        if context.neighbor_filter.exclude_node_pair(base, joiner) {
            return 0;
        }
        let similarity = context.similarity.similarity(base, joiner);
        self.node_pairs_considered += 1;

        let changed = context.lists[base as usize].lock().add(
            joiner,
            similarity,
            &mut *self.rng,
            context.perturbation_rate,
        );
        context.consumers.offer(base, joiner, similarity);
        changed as u64
    }

    /// Append a Bernoulli sample of `reverse` with rate
    /// `sampled_k / |reverse|` to `neighbors`. Ids may end up twice; joining
    /// a pair again leaves the lists unchanged.
    fn symmetrize(&mut self, neighbors: &mut Vec<NodeId>, reverse: &[NodeId]) {
        if reverse.is_empty() {
            return;
        }
        let rate = self.context.sampled_k as f64 / reverse.len() as f64;
        for &node in reverse {
            if self.rng.gen::<f64>() < rate {
                neighbors.push(node);
            }
        }
    }

    fn join_node(&mut self, node: NodeId, node_count: u64) -> u64 {
        let context = self.context;
        let index = node as usize;

        let mut old_neighbors = context.old_neighbors[index].clone();
        self.symmetrize(&mut old_neighbors, &context.reverse_old_neighbors[index]);

        let mut update_count = 0;
        let mut new_neighbors = context.new_neighbors[index].clone();
        if !new_neighbors.is_empty() {
            self.symmetrize(&mut new_neighbors, &context.reverse_new_neighbors[index]);

            for &neighbor in &new_neighbors {
                if neighbor != node {
                    update_count += self.join(neighbor, node);
                }
            }

            for (i, &first) in new_neighbors.iter().enumerate() {
                for &second in &new_neighbors[i + 1..] {
                    if first == second {
                        continue;
                    }
                    update_count += self.join(first, second);
                    update_count += self.join(second, first);
                }
            }

            for &first in &new_neighbors {
                for &second in &old_neighbors {
                    if first == second {
                        continue;
                    }
                    update_count += self.join(first, second);
                    update_count += self.join(second, first);
                }
            }
        }

        // Exploratory joins, not counted as updates.
        for _ in 0..context.random_joins {
            let mut other = self.rng.gen_range(0..node_count - 1);
            if other >= node {
                other += 1;
            }
            self.join(node, other);
        }

        update_count
    }
}

/// Run one NN-Descent join for every node of `partition`.
pub(super) fn join_neighbors<R: Rng>(
    context: &JoinContext<'_>,
    partition: Partition,
    rng: &mut R,
) -> Result<JoinStats> {
    context.termination_flag.assert_running()?;

    let node_count = context.lists.len() as u64;
    let mut joiner = Joiner {
        context,
        rng,
        node_pairs_considered: 0,
    };
    let mut update_count = 0;
    for node in partition.nodes() {
        update_count += joiner.join_node(node, node_count);
    }

    context.progress.log_progress(partition.node_count() as u64);
    Ok(JoinStats {
        update_count,
        node_pairs_considered: joiner.node_pairs_considered,
    })
}
