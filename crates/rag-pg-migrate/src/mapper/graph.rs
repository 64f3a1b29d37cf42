//! Graph nodes and edges to AGE label rows.

use serde_json::{Map, Value};

use super::{MappingLog, TargetRow};
use crate::core::graphid::{encode, GraphId, VertexIdMap};
use crate::core::{Row, SqlValue};
use crate::error::Result;
use crate::source::{GraphEdge, GraphNode};

/// Vertex property holding the source node id.
pub const ENTITY_ID_KEY: &str = "entity_id";

/// Row of a vertex label table.
#[derive(Debug, Clone, PartialEq)]
pub struct VertexRow {
    pub id: GraphId,
    pub properties: Map<String, Value>,
}

impl TargetRow for VertexRow {
    fn into_values(self) -> Row {
        vec![
            SqlValue::GraphId(self.id),
            SqlValue::Json(Value::Object(self.properties)),
        ]
    }
}

/// Row of an edge label table.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeRow {
    pub id: GraphId,
    pub start_id: GraphId,
    pub end_id: GraphId,
    pub properties: Map<String, Value>,
}

impl TargetRow for EdgeRow {
    fn into_values(self) -> Row {
        vec![
            SqlValue::GraphId(self.id),
            SqlValue::GraphId(self.start_id),
            SqlValue::GraphId(self.end_id),
            SqlValue::Json(Value::Object(self.properties)),
        ]
    }
}

/// Map a node, assigning its identifier in `ids`.
///
/// The node id is stored under [`ENTITY_ID_KEY`], replacing any attribute of
/// that name.
pub fn map_vertex(node: GraphNode, ids: &mut VertexIdMap) -> Result<VertexRow> {
    let id = ids.assign(&node.id)?;
    let mut properties = node.attributes;
    properties.insert(ENTITY_ID_KEY.to_string(), Value::String(node.id));
    Ok(VertexRow { id, properties })
}

/// Map edges against a complete vertex map.
///
/// Edges with an unknown endpoint are dropped and logged. Kept edges get
/// dense sequences in source order.
pub fn map_edges(
    edges: Vec<GraphEdge>,
    vertices: &VertexIdMap,
    edge_label_id: u32,
    log: &mut MappingLog,
) -> Result<Vec<EdgeRow>> {
    let mut rows = Vec::with_capacity(edges.len());
    let mut sequence = 0u64;

    for edge in edges {
        let start = vertices.get(&edge.source);
        let end = vertices.get(&edge.target);
        let (Some(start_id), Some(end_id)) = (start, end) else {
            let missing = if start.is_none() {
                &edge.source
            } else {
                &edge.target
            };
            log.endpoint_missing(&edge.source, &edge.target, missing);
            continue;
        };

        sequence += 1;
        rows.push(EdgeRow {
            id: encode(edge_label_id, sequence)?,
            start_id,
            end_id,
            properties: edge.attributes,
        });
    }

    Ok(rows)
}
