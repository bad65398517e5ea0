use super::NodeId;
use std::ops::Range;

/// Contiguous range of node ids processed by a single task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Partition {
    start: NodeId,
    node_count: usize,
}

impl Partition {
    pub fn new(start: NodeId, node_count: usize) -> Self {
        Self { start, node_count }
    }

    pub fn start(&self) -> NodeId {
        self.start
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn nodes(&self) -> Range<NodeId> {
        self.start..self.start + self.node_count as NodeId
    }
}

/// Split `[0, node_count)` into contiguous partitions of
/// `max(ceil(node_count / concurrency), min_batch_size)` nodes. The last
/// partition may be shorter.
pub fn range_partition(concurrency: usize, node_count: u64, min_batch_size: usize) -> Vec<Partition> {
    let batch_size = batch_size(concurrency, node_count, min_batch_size) as u64;
    let mut partitions = Vec::new();
    let mut start = 0;
    while start < node_count {
        let size = batch_size.min(node_count - start);
        partitions.push(Partition::new(start, size as usize));
        start += size;
    }
    partitions
}

fn batch_size(concurrency: usize, node_count: u64, min_batch_size: usize) -> usize {
    let concurrency = concurrency.max(1) as u64;
    let per_task = node_count.div_ceil(concurrency) as usize;
    per_task.max(min_batch_size).max(1)
}
