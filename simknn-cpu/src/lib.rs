pub mod error;
pub mod filter;
pub mod filtered;
pub mod knn;
pub mod similarity;

pub use error::{Error, Result};
pub use filtered::{FilteredKnn, FilteredKnnResult, SeedingSummary};
pub use knn::{Knn, KnnResult, NodeId, SimilarityResult};
