//! Filtered k-NN: NN-Descent with per-node target filters and optional
//! seeding.

mod filtered_knn;
mod target_filter;
mod target_filtering;

pub use filtered_knn::{FilteredKnn, FilteredKnnResult};
pub use target_filter::{ProvidedTargetNodeFilter, ScoredNeighbor, TargetNodeFilter};
pub use target_filtering::{find_seeds, SeedingSummary, TargetNodeFiltering};
