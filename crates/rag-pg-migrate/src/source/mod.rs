//! Source file readers.
//!
//! Readers are pure and synchronous: they turn one exported file into an
//! ordered in-memory sequence and know nothing about the target. Order always
//! follows the file, so repeated runs assign identical graph identifiers.

mod graph;
mod kv;

pub use graph::{parse_graphml, parse_node_link, read_graph_file};
pub use kv::{flatten_cache_buckets, parse_kv, read_kv_file};

use serde_json::{Map, Value};

/// A graph node with its attribute bag.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    pub id: String,
    pub attributes: Map<String, Value>,
}

/// A graph edge between two node ids.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub attributes: Map<String, Value>,
}

/// Nodes and edges of one graph document, in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphDocument {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// Body of a key-value record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordBody {
    /// Well-formed record: a JSON object.
    Object(Map<String, Value>),
    /// Anything else found under a key. Mapped to a degenerate row.
    Malformed(Value),
}

impl From<Value> for RecordBody {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => RecordBody::Object(map),
            other => RecordBody::Malformed(other),
        }
    }
}

/// One entry of a key-value store file.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    pub key: String,
    pub body: RecordBody,
}

impl SourceRecord {
    pub fn new(key: impl Into<String>, body: impl Into<RecordBody>) -> Self {
        Self {
            key: key.into(),
            body: body.into(),
        }
    }
}
