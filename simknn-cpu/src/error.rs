use rayon::ThreadPoolBuildError;
use simknn_common::ConfigError;
use thiserror::Error;

/// An Error enum capturing the errors produced by this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Node ids referenced by a node filter are missing from the id map
    #[error("Node ids not found in the graph: {0:?}")]
    NodesNotFound(Vec<u64>),
    /// A node filter references a label the id map does not know
    #[error("Unknown node label: {0}")]
    UnknownLabel(String),
    /// The computation was stopped through its termination flag
    #[error("The computation was terminated")]
    Terminated,
    #[error(transparent)]
    ThreadPoolBuildError(#[from] ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, Error>;
