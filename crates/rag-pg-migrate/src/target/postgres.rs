//! PostgreSQL + Apache AGE target store.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use tokio_postgres::types::ToSql;
use tokio_postgres::{Config as PgConfig, NoTls};
use tracing::{debug, error, info};

use super::tls::TlsBuilder;
use super::{GraphLabels, StoreHealth, TargetStore, MAX_BIND_PARAMS};
use crate::config::TargetConfig;
use crate::core::identifier::{qualify_pg, quote_literal, quote_pg};
use crate::core::{Row, SqlValue, TableKind, TableSpec};
use crate::error::{MigrateError, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest label name that still leaves room for the `_id_uidx` suffix.
const INDEX_BASE_MAX: usize = 54;

/// `to_regclass` took `cstring` before PostgreSQL 14; the explicit cast binds
/// the name as text on every version.
const TABLE_EXISTS_SQL: &str = "SELECT to_regclass($1::text) IS NOT NULL";

/// PostgreSQL target store backed by a deadpool connection pool.
pub struct PgStore {
    pool: Pool,
    schema: String,
}

impl PgStore {
    /// Connect to the target and verify the connection.
    pub async fn new(config: &TargetConfig, max_conns: usize) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.application_name("rag-pg-migrate");
        pg_config.connect_timeout(CONNECT_TIMEOUT);
        pg_config.ssl_mode(config.ssl_mode.connection_mode());

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let mgr = match TlsBuilder::new(config.ssl_mode).build()? {
            Some(tls) => Manager::from_config(pg_config, tls, mgr_config),
            None => Manager::from_config(pg_config, NoTls, mgr_config),
        };

        let pool = Pool::builder(mgr)
            .max_size(max_conns)
            .build()
            .map_err(|e| MigrateError::pool(e, "creating PostgreSQL connection pool"))?;

        let client = pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "testing PostgreSQL connection"))?;
        client.simple_query("SELECT 1").await?;

        info!(
            "Connected to PostgreSQL: {}:{}/{} (ssl_mode={}, pool={})",
            config.host, config.port, config.database, config.ssl_mode, max_conns
        );

        Ok(Self {
            pool,
            schema: config.schema.clone(),
        })
    }

    async fn client(&self, context: &str) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, context.to_string()))
    }

    /// Return the id of a label, creating it if needed.
    async fn ensure_label(&self, client: &Object, graph: &str, label: &str, kind: TableKind) -> Result<u32> {
        if let Some(id) = label_id(client, graph, label).await? {
            return Ok(id);
        }

        let create = match kind {
            TableKind::EdgeLabel => "create_elabel",
            _ => "create_vlabel",
        };
        client
            .simple_query(&format!(
                "SELECT ag_catalog.{}({}, {})",
                create,
                quote_literal(graph)?,
                quote_literal(label)?
            ))
            .await?;
        info!("Created AGE label {}.{}", graph, label);

        label_id(client, graph, label).await?.ok_or_else(|| {
            MigrateError::dataset("graph", format!("label {}.{} missing after creation", graph, label))
        })
    }
}

async fn label_id(client: &Object, graph: &str, label: &str) -> Result<Option<u32>> {
    let row = client
        .query_opt(
            "SELECT l.id::int4 FROM ag_catalog.ag_label l \
             JOIN ag_catalog.ag_graph g ON l.graph = g.graphid \
             WHERE g.name::text = $1 AND l.name::text = $2",
            &[&graph, &label],
        )
        .await?;
    Ok(row.map(|r| r.get::<_, i32>(0) as u32))
}

fn id_index_name(label: &str) -> String {
    let mut end = label.len().min(INDEX_BASE_MAX);
    while !label.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}_id_uidx", &label[..end])
}

#[async_trait]
impl TargetStore for PgStore {
    async fn prepare_table(&self, table: &TableSpec) -> Result<()> {
        let Some(ddl) = table.create_table_ddl()? else {
            return Ok(());
        };
        let client = self.client("preparing table").await?;
        client
            .execute(&format!("CREATE SCHEMA IF NOT EXISTS {}", quote_pg(&table.schema)?), &[])
            .await?;
        client.execute(&ddl, &[]).await?;
        debug!("Prepared table {}", table.full_name());
        Ok(())
    }

    async fn ensure_graph(
        &self,
        graph: &str,
        vertex_label: &str,
        edge_label: &str,
    ) -> Result<GraphLabels> {
        let client = self.client("preparing graph").await?;
        client.simple_query("CREATE EXTENSION IF NOT EXISTS age").await?;

        let exists = client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM ag_catalog.ag_graph WHERE name::text = $1)",
                &[&graph],
            )
            .await?
            .get::<_, bool>(0);
        if !exists {
            client
                .simple_query(&format!("SELECT ag_catalog.create_graph({})", quote_literal(graph)?))
                .await?;
            info!("Created AGE graph {}", graph);
        }

        let vertex_label_id = self
            .ensure_label(&client, graph, vertex_label, TableKind::VertexLabel)
            .await?;
        let edge_label_id = self
            .ensure_label(&client, graph, edge_label, TableKind::EdgeLabel)
            .await?;

        // AGE label tables carry no unique constraint; the upsert needs one.
        for label in [vertex_label, edge_label] {
            client
                .execute(
                    &format!(
                        "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} (id)",
                        quote_pg(&id_index_name(label))?,
                        qualify_pg(graph, label)?
                    ),
                    &[],
                )
                .await?;
        }

        debug!(
            "Graph {}: {} = {}, {} = {}",
            graph, vertex_label, vertex_label_id, edge_label, edge_label_id
        );
        Ok(GraphLabels {
            vertex_label_id,
            edge_label_id,
        })
    }

    async fn upsert_batch(&self, table: &TableSpec, rows: Vec<Row>) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let sql = build_upsert_sql(table, rows.len())?;
        let params: Vec<Option<String>> = rows
            .iter()
            .flat_map(|row| row.iter().map(SqlValue::to_param))
            .collect();
        let refs: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

        let mut client = self.client("upserting batch").await?;
        let tx = client.transaction().await?;
        let changed = match tx.execute(sql.as_str(), &refs).await {
            Ok(n) => n,
            Err(e) => {
                let preview: Vec<String> = rows[0]
                    .iter()
                    .take(3)
                    .map(|v| format!("{:?}", v))
                    .collect();
                error!(
                    "Upsert failed for {}: {} - first row preview: {:?}",
                    table.full_name(),
                    e,
                    preview
                );
                // Dropping the transaction rolls it back.
                return Err(e.into());
            }
        };
        tx.commit().await?;

        debug!(
            "Upserted {} rows into {} ({} changed)",
            rows.len(),
            table.full_name(),
            changed
        );
        Ok(rows.len() as u64)
    }

    async fn count_rows(&self, table: &TableSpec, workspace: &str) -> Result<u64> {
        let client = self.client("counting rows").await?;
        let qualified = table.qualified_name()?;

        let exists = client
            .query_one(TABLE_EXISTS_SQL, &[&qualified])
            .await?
            .get::<_, bool>(0);
        if !exists {
            return Ok(0);
        }

        let row = match &table.workspace_column {
            Some(col) => {
                client
                    .query_one(
                        &format!("SELECT COUNT(*) FROM {} WHERE {} = $1", qualified, quote_pg(col)?),
                        &[&workspace],
                    )
                    .await?
            }
            None => {
                client
                    .query_one(&format!("SELECT COUNT(*) FROM {}", qualified), &[])
                    .await?
            }
        };
        Ok(row.get::<_, i64>(0).max(0) as u64)
    }

    async fn sync_label_sequence(&self, table: &TableSpec, last_sequence: u64) -> Result<()> {
        if last_sequence == 0 || table.kind == TableKind::Relational {
            return Ok(());
        }

        let sequence = qualify_pg(&table.schema, &format!("{}_id_seq", table.name))?;
        let client = self.client("syncing label sequence").await?;
        let last = last_sequence as i64;
        client
            .query_one(
                &format!(
                    "SELECT setval($1::text::regclass, GREATEST($2::int8, (SELECT last_value FROM {})))",
                    sequence
                ),
                &[&sequence, &last],
            )
            .await?;
        debug!("Label sequence {} at >= {}", sequence, last_sequence);
        Ok(())
    }

    async fn health_check(&self) -> Result<StoreHealth> {
        let client = self.client("health check").await?;
        let version: String = client.query_one("SELECT version()", &[]).await?.get(0);
        let graph_extension: bool = client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM pg_extension WHERE extname = 'age')",
                &[],
            )
            .await?
            .get(0);
        Ok(StoreHealth {
            server_version: version,
            graph_extension,
        })
    }

    fn store_type(&self) -> &str {
        "postgres"
    }

    async fn close(&self) {
        debug!("Closing PostgreSQL pool for schema {}", self.schema);
        self.pool.close();
    }
}

/// Build the upsert statement for `row_count` rows.
///
/// Every parameter is bound as text and cast to the column type. Rows whose
/// values are unchanged are not rewritten.
pub fn build_upsert_sql(table: &TableSpec, row_count: usize) -> Result<String> {
    let width = table.column_count();
    if row_count * width > MAX_BIND_PARAMS {
        return Err(MigrateError::Config(format!(
            "batch of {} rows x {} columns exceeds {} bind parameters",
            row_count, width, MAX_BIND_PARAMS
        )));
    }

    let columns = table
        .columns
        .iter()
        .map(|c| quote_pg(&c.name))
        .collect::<Result<Vec<_>>>()?;
    let key = table
        .conflict_key
        .iter()
        .map(|c| quote_pg(c))
        .collect::<Result<Vec<_>>>()?;

    let mut placeholders = Vec::with_capacity(row_count);
    let mut idx = 1;
    for _ in 0..row_count {
        let row: Vec<String> = table
            .columns
            .iter()
            .map(|c| {
                let p = format!("${}::text::{}", idx, c.param_cast());
                idx += 1;
                p
            })
            .collect();
        placeholders.push(format!("({})", row.join(", ")));
    }

    let mut update = Vec::new();
    let mut changed = Vec::new();
    for col in table.update_columns() {
        let q = quote_pg(&col.name)?;
        update.push(format!("{q} = EXCLUDED.{q}"));
        changed.push(format!("t.{q} IS DISTINCT FROM EXCLUDED.{q}"));
    }

    let head = format!(
        "INSERT INTO {} AS t ({}) VALUES {} ON CONFLICT ({})",
        table.qualified_name()?,
        columns.join(", "),
        placeholders.join(", "),
        key.join(", ")
    );

    Ok(if update.is_empty() {
        format!("{} DO NOTHING", head)
    } else {
        format!(
            "{} DO UPDATE SET {} WHERE {}",
            head,
            update.join(", "),
            changed.join(" OR ")
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_sql_for_relational_table() {
        let sql = build_upsert_sql(&TableSpec::llm_cache("public"), 2).unwrap();
        assert!(sql.starts_with("INSERT INTO \"public\".\"LIGHTRAG_LLM_CACHE\" AS t (\"workspace\", \"id\""));
        assert!(sql.contains("($1::text::text, $2::text::text"));
        assert!(sql.contains("$18::text::timestamptz)"));
        assert!(!sql.contains("$19"));
        assert!(sql.contains("ON CONFLICT (\"workspace\", \"id\") DO UPDATE SET"));
        assert!(sql.contains("\"return_value\" = EXCLUDED.\"return_value\""));
        assert!(!sql.contains("\"id\" = EXCLUDED"));
        assert!(sql.contains("t.\"queryparam\" IS DISTINCT FROM EXCLUDED.\"queryparam\""));
    }

    #[test]
    fn test_upsert_sql_for_label_tables() {
        let sql = build_upsert_sql(&TableSpec::edges("chunk_entity_relation", "DIRECTED"), 1).unwrap();
        assert!(sql.contains("$1::text::ag_catalog.graphid"));
        assert!(sql.contains("$4::text::ag_catalog.agtype"));
        assert!(sql.contains("ON CONFLICT (\"id\")"));
    }

    #[test]
    fn test_upsert_sql_rejects_oversized_batch() {
        let table = TableSpec::doc_status("public");
        let max_rows = MAX_BIND_PARAMS / table.column_count();
        assert!(build_upsert_sql(&table, max_rows).is_ok());
        assert!(build_upsert_sql(&table, max_rows + 1).is_err());
    }

    #[test]
    fn test_table_exists_binds_name_as_text() {
        assert!(TABLE_EXISTS_SQL.contains("to_regclass($1::text)"));
    }

    #[test]
    fn test_id_index_name_is_bounded() {
        assert_eq!(id_index_name("base"), "base_id_uidx");
        assert!(id_index_name(&"x".repeat(63)).len() <= 63);
    }
}
