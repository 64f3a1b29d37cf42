//! Graph documents: GraphML, or node-link JSON for `.json` files.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use serde_json::{Map, Number, Value};
use tracing::debug;

use super::{GraphDocument, GraphEdge, GraphNode};
use crate::error::{MigrateError, Result};

/// Read a graph file, choosing the format by extension.
pub fn read_graph_file(path: &Path) -> Result<GraphDocument> {
    let content = std::fs::read_to_string(path)?;
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    let doc = if is_json {
        parse_node_link(path, &content)?
    } else {
        parse_graphml(path, &content)?
    };
    debug!(
        "Read graph {}: {} nodes, {} edges",
        path.display(),
        doc.nodes.len(),
        doc.edges.len()
    );
    Ok(doc)
}

/// Declared value type of a GraphML `<key>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttrType {
    Boolean,
    Integer,
    Float,
    Text,
}

impl AttrType {
    fn parse(s: &str) -> Self {
        match s {
            "boolean" => AttrType::Boolean,
            "int" | "long" => AttrType::Integer,
            "float" | "double" => AttrType::Float,
            _ => AttrType::Text,
        }
    }

    /// Convert raw `<data>` text. Values that do not parse stay strings.
    fn coerce(self, raw: String) -> Value {
        let trimmed = raw.trim();
        match self {
            AttrType::Boolean => match trimmed.to_ascii_lowercase().as_str() {
                "true" | "1" => Value::Bool(true),
                "false" | "0" => Value::Bool(false),
                _ => Value::String(raw),
            },
            AttrType::Integer => match trimmed.parse::<i64>() {
                Ok(n) => Value::from(n),
                Err(_) => Value::String(raw),
            },
            AttrType::Float => match trimmed.parse::<f64>().ok().and_then(Number::from_f64) {
                Some(n) => Value::Number(n),
                None => Value::String(raw),
            },
            AttrType::Text => Value::String(raw),
        }
    }
}

#[derive(Debug)]
struct KeyDecl {
    name: String,
    ty: AttrType,
}

#[derive(Debug)]
enum Element {
    Node(GraphNode),
    Edge(GraphEdge),
}

impl Element {
    fn attributes_mut(&mut self) -> &mut Map<String, Value> {
        match self {
            Element::Node(n) => &mut n.attributes,
            Element::Edge(e) => &mut e.attributes,
        }
    }
}

struct GraphMlParser<'a> {
    path: &'a Path,
    keys: HashMap<String, KeyDecl>,
    current: Option<Element>,
    data: Option<(String, String)>,
    node_ids: HashSet<String>,
    doc: GraphDocument,
}

/// Parse GraphML content. `path` is only used in error messages.
pub fn parse_graphml(path: &Path, content: &str) -> Result<GraphDocument> {
    let mut reader = Reader::from_str(content);
    let mut parser = GraphMlParser {
        path,
        keys: HashMap::new(),
        current: None,
        data: None,
        node_ids: HashSet::new(),
        doc: GraphDocument::default(),
    };

    loop {
        let position = reader.buffer_position() as u64;
        let event = reader.read_event().map_err(|e| {
            MigrateError::source_format(
                path,
                format!("byte offset {}", reader.error_position() as u64),
                e.to_string(),
            )
        })?;

        match event {
            Event::Start(e) => parser.open(&e, false, position)?,
            Event::Empty(e) => parser.open(&e, true, position)?,
            Event::End(e) => match e.local_name().as_ref() {
                b"data" => parser.close_data(),
                b"node" | b"edge" => parser.close_element(position)?,
                _ => {}
            },
            Event::Text(t) => {
                if let Some((_, text)) = parser.data.as_mut() {
                    let unescaped = t.unescape().map_err(|e| {
                        MigrateError::source_format(path, format!("byte offset {}", position), e.to_string())
                    })?;
                    text.push_str(&unescaped);
                }
            }
            Event::CData(c) => {
                if let Some((_, text)) = parser.data.as_mut() {
                    text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if parser.current.is_some() {
        return Err(MigrateError::source_format(
            path,
            format!("byte offset {}", content.len()),
            "unexpected end of document inside <node> or <edge>",
        ));
    }

    Ok(parser.doc)
}

impl GraphMlParser<'_> {
    fn fail(&self, position: u64, message: impl Into<String>) -> MigrateError {
        MigrateError::source_format(self.path, format!("byte offset {}", position), message)
    }

    fn attribute(&self, e: &BytesStart<'_>, name: &[u8], position: u64) -> Result<Option<String>> {
        for attr in e.attributes() {
            let attr = attr.map_err(|err| self.fail(position, err.to_string()))?;
            if attr.key.as_ref() == name {
                let value = attr
                    .unescape_value()
                    .map_err(|err| self.fail(position, err.to_string()))?;
                return Ok(Some(value.into_owned()));
            }
        }
        Ok(None)
    }

    fn required(&self, e: &BytesStart<'_>, name: &str, position: u64) -> Result<String> {
        self.attribute(e, name.as_bytes(), position)?.ok_or_else(|| {
            self.fail(
                position,
                format!(
                    "<{}> is missing the '{}' attribute",
                    String::from_utf8_lossy(e.local_name().as_ref()),
                    name
                ),
            )
        })
    }

    fn open(&mut self, e: &BytesStart<'_>, empty: bool, position: u64) -> Result<()> {
        match e.local_name().as_ref() {
            b"key" => {
                let id = self.required(e, "id", position)?;
                let name = self
                    .attribute(e, b"attr.name", position)?
                    .unwrap_or_else(|| id.clone());
                let ty = self
                    .attribute(e, b"attr.type", position)?
                    .map(|t| AttrType::parse(&t))
                    .unwrap_or(AttrType::Text);
                self.keys.insert(id, KeyDecl { name, ty });
            }
            b"node" => {
                let id = self.required(e, "id", position)?;
                self.current = Some(Element::Node(GraphNode {
                    id,
                    attributes: Map::new(),
                }));
                if empty {
                    self.close_element(position)?;
                }
            }
            b"edge" => {
                let source = self.required(e, "source", position)?;
                let target = self.required(e, "target", position)?;
                self.current = Some(Element::Edge(GraphEdge {
                    source,
                    target,
                    attributes: Map::new(),
                }));
                if empty {
                    self.close_element(position)?;
                }
            }
            b"data" => {
                let key = self.required(e, "key", position)?;
                self.data = Some((key, String::new()));
                if empty {
                    self.close_data();
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn close_data(&mut self) {
        let Some((key, raw)) = self.data.take() else {
            return;
        };
        // <data> directly under <graph> describes the graph itself.
        let Some(element) = self.current.as_mut() else {
            return;
        };
        let (name, value) = match self.keys.get(&key) {
            Some(decl) => (decl.name.clone(), decl.ty.coerce(raw)),
            None => (key, Value::String(raw)),
        };
        element.attributes_mut().insert(name, value);
    }

    fn close_element(&mut self, position: u64) -> Result<()> {
        match self.current.take() {
            Some(Element::Node(node)) => {
                if !self.node_ids.insert(node.id.clone()) {
                    return Err(self.fail(position, format!("duplicate node id '{}'", node.id)));
                }
                self.doc.nodes.push(node);
            }
            Some(Element::Edge(edge)) => self.doc.edges.push(edge),
            None => {}
        }
        Ok(())
    }
}

/// Parse node-link JSON (`{"nodes": [...], "edges" | "links": [...]}`).
pub fn parse_node_link(path: &Path, content: &str) -> Result<GraphDocument> {
    let value: Value = serde_json::from_str(content).map_err(|e| {
        MigrateError::source_format(
            path,
            format!("line {} column {}", e.line(), e.column()),
            e.to_string(),
        )
    })?;

    let Value::Object(mut root) = value else {
        return Err(MigrateError::source_format(
            path,
            "line 1 column 1",
            "expected a node-link JSON object",
        ));
    };

    let nodes = match root.remove("nodes") {
        Some(Value::Array(nodes)) => nodes,
        _ => {
            return Err(MigrateError::source_format(
                path,
                "nodes",
                "expected a 'nodes' array",
            ))
        }
    };
    let edges = match root.remove("edges").or_else(|| root.remove("links")) {
        Some(Value::Array(edges)) => edges,
        None | Some(Value::Null) => Vec::new(),
        Some(_) => {
            return Err(MigrateError::source_format(
                path,
                "edges",
                "expected an 'edges' or 'links' array",
            ))
        }
    };

    let mut doc = GraphDocument::default();
    let mut seen = HashSet::new();

    for (i, node) in nodes.into_iter().enumerate() {
        let position = format!("nodes[{}]", i);
        let Value::Object(mut attributes) = node else {
            return Err(MigrateError::source_format(path, position, "node is not an object"));
        };
        let id = take_node_ref(&mut attributes, "id")
            .ok_or_else(|| MigrateError::source_format(path, position.clone(), "node has no 'id'"))?;
        if !seen.insert(id.clone()) {
            return Err(MigrateError::source_format(
                path,
                position,
                format!("duplicate node id '{}'", id),
            ));
        }
        doc.nodes.push(GraphNode { id, attributes });
    }

    for (i, edge) in edges.into_iter().enumerate() {
        let position = format!("edges[{}]", i);
        let Value::Object(mut attributes) = edge else {
            return Err(MigrateError::source_format(path, position, "edge is not an object"));
        };
        let (Some(source), Some(target)) = (
            take_node_ref(&mut attributes, "source"),
            take_node_ref(&mut attributes, "target"),
        ) else {
            return Err(MigrateError::source_format(
                path,
                position,
                "edge needs 'source' and 'target'",
            ));
        };
        doc.edges.push(GraphEdge {
            source,
            target,
            attributes,
        });
    }

    Ok(doc)
}

/// Remove a node reference field; numeric ids are accepted as their decimal text.
fn take_node_ref(map: &mut Map<String, Value>, field: &str) -> Option<String> {
    match map.remove(field)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const GRAPHML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<graphml xmlns="http://graphml.graphdrawing.org/xmlns">
  <key id="d0" for="node" attr.name="entity_type" attr.type="string"/>
  <key id="d1" for="node" attr.name="description" attr.type="string"/>
  <key id="d2" for="edge" attr.name="weight" attr.type="double"/>
  <key id="d3" for="edge" attr.name="keywords" attr.type="string"/>
  <key id="d4" for="node" attr.name="verified" attr.type="boolean"/>
  <graph edgedefault="undirected">
    <node id="A"><data key="d0">person</data><data key="d4">true</data></node>
    <node id="B"><data key="d1">Tom &amp; Jerry</data></node>
    <node id="C"/>
    <edge source="A" target="B"><data key="d2">1.5</data><data key="d3">friend</data></edge>
    <edge source="B" target="C"/>
  </graph>
</graphml>"#;

    fn p() -> &'static Path {
        Path::new("graph_chunk_entity_relation.graphml")
    }

    #[test]
    fn test_parse_graphml_nodes_and_edges_in_order() {
        let doc = parse_graphml(p(), GRAPHML).unwrap();
        let ids: Vec<&str> = doc.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
        assert_eq!(doc.edges.len(), 2);
        assert_eq!(doc.edges[0].source, "A");
        assert_eq!(doc.edges[1].target, "C");
        assert!(doc.edges[1].attributes.is_empty());
    }

    #[test]
    fn test_graphml_attribute_typing() {
        let doc = parse_graphml(p(), GRAPHML).unwrap();
        assert_eq!(doc.nodes[0].attributes["entity_type"], json!("person"));
        assert_eq!(doc.nodes[0].attributes["verified"], json!(true));
        assert_eq!(doc.nodes[1].attributes["description"], json!("Tom & Jerry"));
        assert_eq!(doc.edges[0].attributes["weight"], json!(1.5));
        assert_eq!(doc.edges[0].attributes["keywords"], json!("friend"));
    }

    #[test]
    fn test_graphml_duplicate_node_is_an_error() {
        let xml = r#"<graphml><graph><node id="A"/><node id="A"/></graph></graphml>"#;
        let err = parse_graphml(p(), xml).unwrap_err();
        assert!(err.to_string().contains("duplicate node id 'A'"));
    }

    #[test]
    fn test_graphml_malformed_reports_byte_offset() {
        let xml = r#"<graphml><graph><node id="A"></edge></graph></graphml>"#;
        match parse_graphml(p(), xml).unwrap_err() {
            MigrateError::SourceFormat { position, .. } => assert!(position.starts_with("byte offset")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_graphml_edge_without_target_is_an_error() {
        let xml = r#"<graphml><graph><edge source="A"/></graph></graphml>"#;
        assert!(parse_graphml(p(), xml).is_err());
    }

    #[test]
    fn test_parse_node_link_json() {
        let content = r#"{
            "directed": false,
            "nodes": [{"id": "A", "entity_type": "person"}, {"id": 7}],
            "links": [{"source": "A", "target": 7, "weight": 2.0}]
        }"#;
        let doc = parse_node_link(Path::new("graph.json"), content).unwrap();
        assert_eq!(doc.nodes[1].id, "7");
        assert_eq!(doc.nodes[0].attributes["entity_type"], json!("person"));
        assert!(!doc.nodes[0].attributes.contains_key("id"));
        assert_eq!(doc.edges[0].target, "7");
        assert_eq!(doc.edges[0].attributes["weight"], json!(2.0));
    }

    #[test]
    fn test_node_link_requires_nodes() {
        assert!(parse_node_link(Path::new("graph.json"), r#"{"links": []}"#).is_err());
    }

    #[test]
    fn test_read_graph_file_dispatches_on_extension() {
        let dir = tempfile::tempdir().unwrap();
        let xml_path = dir.path().join("g.graphml");
        std::fs::write(&xml_path, GRAPHML).unwrap();
        assert_eq!(read_graph_file(&xml_path).unwrap().nodes.len(), 3);

        let json_path = dir.path().join("g.json");
        std::fs::write(&json_path, r#"{"nodes": [{"id": "x"}], "edges": []}"#).unwrap();
        assert_eq!(read_graph_file(&json_path).unwrap().nodes.len(), 1);
    }
}
