pub mod config;
pub mod error;
pub mod node_filter_spec;
pub mod tracing;

pub use config::{FilteredKnnConfig, InitialSampler, KnnConfig, Opt};
pub use error::ConfigError;
pub use node_filter_spec::NodeFilterSpec;
