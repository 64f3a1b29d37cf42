//! End-to-end migration runs against the in-memory store.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use rag_pg_migrate::core::graphid::{decode_label, decode_sequence};
use rag_pg_migrate::core::SqlValue;
use rag_pg_migrate::{Config, Dataset, DatasetStatus, MemoryStore, Orchestrator};
use tempfile::TempDir;

const VERTICES: &str = "chunk_entity_relation.base";
const EDGES: &str = "chunk_entity_relation.DIRECTED";
const CACHE: &str = "public.LIGHTRAG_LLM_CACHE";
const DOC_STATUS: &str = "public.LIGHTRAG_DOC_STATUS";

fn config(dir: &Path, datasets: &str) -> Config {
    let yaml = format!(
        r#"
target:
  host: localhost
  database: rag
  user: postgres
  ssl_mode: disable
sources:
  input_dir: {}
  graph_file: graph.json
migration:
  datasets: {}
  max_in_flight_batches: 2
"#,
        dir.display(),
        datasets
    );
    Config::from_yaml(&yaml).unwrap()
}

fn write_sources(dir: &Path) {
    fs::write(
        dir.join("graph.json"),
        r#"{
  "directed": false,
  "nodes": [
    {"id": "Alice", "entity_type": "person", "description": "engineer"},
    {"id": "Acme", "entity_type": "organization"},
    {"id": "Berlin", "entity_type": "geo"}
  ],
  "links": [
    {"source": "Alice", "target": "Acme", "weight": 2.0, "keywords": "works at"},
    {"source": "Acme", "target": "Berlin", "weight": 1.0}
  ]
}"#,
    )
    .unwrap();
    fs::write(
        dir.join("kv_store_llm_response_cache.json"),
        r#"{
  "hash-1": {"return": "answer one", "cache_type": "extract", "original_prompt": "q1"},
  "hash-2": {"return": "answer two", "cache_type": "query", "original_prompt": "q2"}
}"#,
    )
    .unwrap();
}

fn graph_id(value: &SqlValue) -> rag_pg_migrate::core::GraphId {
    match value {
        SqlValue::GraphId(id) => *id,
        other => panic!("expected a graph id, got {:?}", other),
    }
}

#[tokio::test]
async fn test_graph_and_cache_migration() {
    let dir = TempDir::new().unwrap();
    write_sources(dir.path());
    let store = Arc::new(MemoryStore::new());
    let orchestrator =
        Orchestrator::with_store(config(dir.path(), "[graph, llm_cache]"), store.clone());

    let report = orchestrator.run(None).await.unwrap();
    assert_eq!(report.status(), "completed");
    assert_eq!(report.datasets.len(), 3);

    let vertices = store.rows(VERTICES);
    assert_eq!(vertices.len(), 3);
    let mut sequences: Vec<u64> = vertices
        .iter()
        .map(|row| decode_sequence(graph_id(&row[0])))
        .collect();
    sequences.sort_unstable();
    assert_eq!(sequences, vec![1, 2, 3]);
    let vertex_ids: Vec<_> = vertices.iter().map(|row| graph_id(&row[0])).collect();
    assert!(vertex_ids.iter().all(|id| decode_label(*id) == 3));

    let edges = store.rows(EDGES);
    assert_eq!(edges.len(), 2);
    for edge in &edges {
        assert_eq!(decode_label(graph_id(&edge[0])), 4);
        assert!(vertex_ids.contains(&graph_id(&edge[1])));
        assert!(vertex_ids.contains(&graph_id(&edge[2])));
    }

    let cache = store.rows(CACHE);
    assert_eq!(cache.len(), 2);
    assert!(cache
        .iter()
        .all(|row| row[0] == SqlValue::Text("default".into())));

    let summary = report.dataset(Dataset::LlmCache).unwrap();
    assert_eq!(summary.migrated_count, 2);
    assert!(summary.verification.unwrap().passed());
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let dir = TempDir::new().unwrap();
    write_sources(dir.path());
    let store = Arc::new(MemoryStore::new());
    let mut cfg = config(dir.path(), "[graph, llm_cache]");
    cfg.migration.skip_completed = false;
    let orchestrator = Orchestrator::with_store(cfg, store.clone());

    orchestrator.run(None).await.unwrap();
    let before = (
        store.rows(VERTICES),
        store.rows(EDGES),
        store.rows(CACHE),
    );
    let report = orchestrator.run(None).await.unwrap();
    let after = (
        store.rows(VERTICES),
        store.rows(EDGES),
        store.rows(CACHE),
    );

    assert_eq!(before, after);
    assert_eq!(
        report.dataset(Dataset::GraphVertices).unwrap().status,
        DatasetStatus::Completed
    );
}

#[tokio::test]
async fn test_missing_endpoint_is_skipped() {
    let dir = TempDir::new().unwrap();
    write_sources(dir.path());
    fs::write(
        dir.path().join("graph.json"),
        r#"{"nodes": [{"id": "A"}, {"id": "B"}],
            "edges": [{"source": "A", "target": "B"}, {"source": "A", "target": "Ghost"}]}"#,
    )
    .unwrap();
    let store = Arc::new(MemoryStore::new());
    let orchestrator = Orchestrator::with_store(config(dir.path(), "[graph]"), store.clone());

    let report = orchestrator.run(None).await.unwrap();
    let edges = report.dataset(Dataset::GraphEdges).unwrap();
    assert_eq!(edges.status, DatasetStatus::Completed);
    assert_eq!(edges.skipped_count, 1);
    assert_eq!(store.rows(EDGES).len() as u64 + edges.skipped_count, edges.source_count);
    // 1 of 2 edges is below the 0.95 tolerance
    assert!(!edges.verification.unwrap().passed());
}

#[tokio::test]
async fn test_non_numeric_update_time_is_null() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("kv_store_doc_status.json"),
        r#"{"doc-1": {"status": "processed", "content_summary": "s", "update_time": "yesterday"}}"#,
    )
    .unwrap();
    let store = Arc::new(MemoryStore::new());
    let orchestrator = Orchestrator::with_store(config(dir.path(), "[doc_status]"), store.clone());

    let report = orchestrator.run(None).await.unwrap();
    assert_eq!(report.status(), "completed");
    let rows = store.rows(DOC_STATUS);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][5], SqlValue::Text("processed".into()));
    assert_eq!(rows[0][12], SqlValue::Null);
}

#[tokio::test]
async fn test_store_failure_is_isolated() {
    let dir = TempDir::new().unwrap();
    write_sources(dir.path());
    let store = Arc::new(MemoryStore::new());
    store.fail_after(CACHE, 0);
    let orchestrator =
        Orchestrator::with_store(config(dir.path(), "[llm_cache, graph]"), store.clone());

    let report = orchestrator.run(None).await.unwrap();
    assert_eq!(report.status(), "failed");
    assert_eq!(
        report.dataset(Dataset::LlmCache).unwrap().status,
        DatasetStatus::Failed
    );
    assert_eq!(
        report.dataset(Dataset::GraphEdges).unwrap().status,
        DatasetStatus::Completed
    );
    assert!(store.rows(CACHE).is_empty());
    assert_eq!(store.rows(EDGES).len(), 2);
}
