//! Unresolved node filter specifications.
//!
//! A `NodeFilterSpec` is what a user hands in: nothing, a single node id, a
//! list of node ids or a label name. It is validated eagerly when parsed, so
//! that unsupported input types are rejected before any computation starts.
//! Binding it to a concrete id space happens later, in the algorithm crate.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum NodeFilterSpec {
    /// Accept every node.
    #[default]
    NoOp,
    /// Accept exactly the listed original node ids.
    NodeIds(Vec<u64>),
    /// Accept every node carrying the given label.
    Label(String),
}

impl NodeFilterSpec {
    /// Parse heterogeneous user input into a filter specification.
    ///
    /// Accepted inputs are `null`, a non-negative integer, a list of
    /// non-negative integers and a non-empty label string. Strings that look
    /// like a JSON list (as produced by environment variables) are parsed as
    /// such.
    pub fn parse(input: &Value) -> Result<Self, ConfigError> {
        match input {
            Value::Null => Ok(Self::NoOp),
            Value::Number(_) => Ok(Self::NodeIds(vec![parse_node_id(input)?])),
            Value::Array(values) => values
                .iter()
                .map(parse_node_id)
                .collect::<Result<Vec<_>, _>>()
                .map(Self::NodeIds),
            Value::String(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return Err(ConfigError::UnsupportedNodeFilter(
                        "empty label".to_string(),
                    ));
                }
                if text.starts_with('[') {
                    let list: Value = serde_json::from_str(text).map_err(|e| {
                        ConfigError::UnsupportedNodeFilter(format!("malformed id list: {e}"))
                    })?;
                    return Self::parse(&list);
                }
                Ok(Self::Label(text.to_string()))
            }
            other => Err(ConfigError::UnsupportedNodeFilter(format!(
                "value of type {}",
                type_name(other)
            ))),
        }
    }

    pub fn is_no_op(&self) -> bool {
        matches!(self, Self::NoOp)
    }
}

fn parse_node_id(value: &Value) -> Result<u64, ConfigError> {
    match value {
        Value::Number(number) => number
            .as_u64()
            .ok_or_else(|| ConfigError::InvalidNodeId(number.to_string())),
        other => Err(ConfigError::UnsupportedNodeFilter(format!(
            "list element of type {}",
            type_name(other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

impl TryFrom<Value> for NodeFilterSpec {
    type Error = ConfigError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<NodeFilterSpec> for Value {
    fn from(spec: NodeFilterSpec) -> Self {
        match spec {
            NodeFilterSpec::NoOp => Value::Null,
            NodeFilterSpec::NodeIds(ids) => Value::from(ids),
            NodeFilterSpec::Label(label) => Value::String(label),
        }
    }
}

impl fmt::Display for NodeFilterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeFilterSpec::NoOp => write!(f, "*"),
            NodeFilterSpec::NodeIds(ids) => write!(f, "{ids:?}"),
            NodeFilterSpec::Label(label) => write!(f, ":{label}"),
        }
    }
}
