use thiserror::Error;

/// Errors raised while parsing or validating configuration. These are always
/// surfaced before any computation starts.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A scalar parameter is outside of its accepted range
    #[error("Invalid value {value} for `{name}`, expected {expected}")]
    InvalidParameter {
        name: &'static str,
        value: String,
        expected: &'static str,
    },
    /// The input used to specify a node filter has an unsupported type
    #[error("Unsupported node filter input: {0}")]
    UnsupportedNodeFilter(String),
    /// A node id is not a non-negative integer
    #[error("Invalid node id {0}, node ids must be non-negative integers")]
    InvalidNodeId(String),
}

impl ConfigError {
    pub fn invalid(name: &'static str, value: impl ToString, expected: &'static str) -> Self {
        Self::InvalidParameter {
            name,
            value: value.to_string(),
            expected,
        }
    }
}
