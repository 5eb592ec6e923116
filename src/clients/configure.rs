use std::time::Instant;

use sqlx::{Connection, PgConnection};
use tracing::{info, instrument, warn};

use super::{ClientError, ClientResult, close_connection, connect, elapsed};
use crate::{
    capabilities::{Capabilities, EngineKind},
    config::{BenchConfig, CollectionConfig},
    filter::quote_ident,
    observability::metrics::record_client_operation,
};

/// Creates and drops the benchmark collection.
///
/// The table layout it produces is what the upload and search clients
/// assume; they never inspect the catalog themselves.
pub struct Configurator {
    connection: PgConnection,
    capabilities: Capabilities,
    collection: CollectionConfig,
    schema: Option<String>,
}

impl Configurator {
    pub async fn connect(config: &BenchConfig) -> ClientResult<Self> {
        Ok(Self {
            connection: connect(&config.connection).await?,
            capabilities: config.engine.capabilities(),
            collection: config.collection.clone(),
            schema: config.connection.schema.clone(),
        })
    }

    /// Drop the collection table if it exists.
    #[instrument(skip(self), fields(engine = %self.capabilities.engine, operation = "clean"))]
    pub async fn clean(&mut self) -> ClientResult<()> {
        let statement = format!(
            "DROP TABLE IF EXISTS {}",
            quote_ident(&self.collection.table_name)
        );
        self.run("clean", &[statement]).await
    }

    /// Create extensions, table and similarity index.
    ///
    /// Vectors wider than the index supports are rejected before any DDL.
    #[instrument(skip(self), fields(engine = %self.capabilities.engine, operation = "recreate"))]
    pub async fn recreate(&mut self) -> ClientResult<()> {
        self.capabilities
            .check_dimensions(self.collection.vector_size)?;

        let mut statements = Vec::new();
        if let Some(schema) = &self.schema {
            statements.push(format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema)));
        }
        statements.extend(extension_statements(&self.capabilities));
        statements.push(create_table_sql(&self.collection));
        statements.extend(create_index_sql(self.capabilities.engine, &self.collection));

        self.run("recreate", &statements).await
    }

    /// Release the connection.
    pub async fn close(self) {
        close_connection(self.connection, self.capabilities.engine.name()).await;
    }

    async fn run(&mut self, operation: &str, statements: &[String]) -> ClientResult<()> {
        let engine = self.capabilities.engine.name();
        let start = Instant::now();
        info!(
            stage = "client_operation_started",
            engine = engine,
            operation = operation,
            table_name = %self.collection.table_name,
            "Starting collection setup"
        );

        let result = async {
            let mut tx = self.connection.begin().await?;
            for statement in statements {
                sqlx::query(statement).execute(&mut *tx).await?;
            }
            tx.commit().await
        }
        .await;

        let (duration, duration_ms) = elapsed(start);
        match result {
            Ok(()) => {
                record_client_operation(engine, operation, "success", duration, statements.len());
                info!(
                    stage = "client_operation_completed",
                    engine = engine,
                    operation = operation,
                    status = "success",
                    duration_ms = duration_ms,
                    "Collection setup completed"
                );
                Ok(())
            }
            Err(e) => {
                record_client_operation(engine, operation, "error", duration, 0);
                warn!(
                    stage = "client_operation_completed",
                    engine = engine,
                    operation = operation,
                    status = "error",
                    duration_ms = duration_ms,
                    error = %e,
                    "Collection setup failed"
                );
                Err(ClientError::Database(e.to_string()))
            }
        }
    }
}

fn extension_statements(capabilities: &Capabilities) -> Vec<String> {
    let mut extensions = vec!["vector"];
    if capabilities.geo_filters {
        extensions.extend(["cube", "earthdistance"]);
    }
    extensions
        .into_iter()
        .map(|ext| format!("CREATE EXTENSION IF NOT EXISTS {ext}"))
        .collect()
}

fn create_table_sql(collection: &CollectionConfig) -> String {
    let mut columns = vec![
        "id bigint PRIMARY KEY".to_string(),
        format!("embedding vector({}) STORAGE MAIN", collection.vector_size),
    ];
    columns.extend(
        collection
            .schema
            .iter()
            .map(|f| format!("{} {}", quote_ident(&f.name), f.field_type.sql_type())),
    );
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(&collection.table_name),
        columns.join(", ")
    )
}

fn create_index_sql(engine: EngineKind, collection: &CollectionConfig) -> Option<String> {
    let table = &collection.table_name;
    let index = quote_ident(&format!("{table}_embedding_idx"));
    let ops_class = collection.distance.ops_class();
    let params = match engine {
        EngineKind::PgvectorHnsw => format!(
            "m = {}, ef_construction = {}",
            collection.hnsw.m, collection.hnsw.ef_construction
        ),
        EngineKind::PgvectorIvfflat => format!("lists = {}", collection.ivfflat.lists),
        EngineKind::PgvectorFlat => return None,
    };
    let method = engine.index_method()?;
    Some(format!(
        "CREATE INDEX IF NOT EXISTS {index} ON {} USING {method} (embedding {ops_class}) WITH ({params})",
        quote_ident(table)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{FieldSchema, FieldType, HnswConfig, IvfflatConfig},
        distance::DistanceMetric,
    };

    fn collection() -> CollectionConfig {
        CollectionConfig {
            table_name: "arxiv".into(),
            distance: DistanceMetric::Cosine,
            vector_size: 384,
            schema: vec![
                FieldSchema::new("update_date_ts", FieldType::Int),
                FieldSchema::new("labels", FieldType::Json),
                FieldSchema::new("location", FieldType::Geo),
            ],
            hnsw: HnswConfig {
                m: 32,
                ef_construction: 128,
            },
            ivfflat: IvfflatConfig { lists: 50 },
        }
    }

    #[test]
    fn test_create_table_maps_field_types() {
        assert_eq!(
            create_table_sql(&collection()),
            "CREATE TABLE IF NOT EXISTS \"arxiv\" (id bigint PRIMARY KEY, \
             embedding vector(384) STORAGE MAIN, \"update_date_ts\" integer, \
             \"labels\" jsonb, \"location\" point)"
        );
    }

    #[test]
    fn test_hnsw_index_uses_build_params() {
        assert_eq!(
            create_index_sql(EngineKind::PgvectorHnsw, &collection()).as_deref(),
            Some(
                "CREATE INDEX IF NOT EXISTS \"arxiv_embedding_idx\" ON \"arxiv\" USING hnsw \
                 (embedding vector_cosine_ops) WITH (m = 32, ef_construction = 128)"
            )
        );
    }

    #[test]
    fn test_ivfflat_and_flat_indexes() {
        let sql = create_index_sql(EngineKind::PgvectorIvfflat, &collection()).unwrap();
        assert!(sql.contains("USING ivfflat (embedding vector_cosine_ops) WITH (lists = 50)"));
        assert_eq!(create_index_sql(EngineKind::PgvectorFlat, &collection()), None);
    }

    #[test]
    fn test_geo_extensions_only_when_enabled() {
        let caps = Capabilities::for_engine(EngineKind::PgvectorHnsw);
        assert_eq!(
            extension_statements(&caps),
            vec!["CREATE EXTENSION IF NOT EXISTS vector"]
        );
        assert_eq!(extension_statements(&caps.with_geo_filters(true)).len(), 3);
    }
}
