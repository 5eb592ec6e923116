use std::time::Instant;

use sqlx::PgConnection;
use tracing::{debug, info, instrument, warn};

use super::{ClientError, ClientResult, close_connection, connect, elapsed, vector_literal};
use crate::{
    capabilities::{Capabilities, EngineKind},
    config::{BenchConfig, SearchParams},
    distance::DistanceMetric,
    filter::{MetaConditions, PgvectorConditionBuilder, compile_conditions, quote_ident},
    observability::metrics::record_client_operation,
};

/// Build the top-k query.
///
/// The inner query orders by the raw operator value, which is what the index
/// scans in; the outer query only projects the similarity score.
pub fn search_query(
    table: &str,
    metric: DistanceMetric,
    vector: &[f32],
    predicate: Option<&str>,
    top: usize,
) -> String {
    let where_clause = predicate
        .map(|p| format!(" WHERE {p}"))
        .unwrap_or_default();
    format!(
        "SELECT id, {score} AS score FROM (SELECT id, (embedding {op} '{vector}') AS distance \
         FROM {table}{where_clause} ORDER BY distance LIMIT {top}) sq",
        score = metric.score_projection("distance"),
        op = metric.operator(),
        vector = vector_literal(vector),
        table = quote_ident(table),
    )
}

/// Runs filtered top-k queries over one dedicated connection.
pub struct SearchClient {
    connection: PgConnection,
    engine: EngineKind,
    table: String,
    metric: DistanceMetric,
    builder: PgvectorConditionBuilder,
}

impl SearchClient {
    /// Connect and apply the query-time tunables for the engine's index.
    #[instrument(skip(config), fields(engine = %config.engine.kind, operation = "connect"))]
    pub async fn connect(config: &BenchConfig) -> ClientResult<Self> {
        let capabilities = config.engine.capabilities();
        let engine = capabilities.engine;
        let start = Instant::now();

        let mut connection = connect(&config.connection).await?;
        for statement in session_settings(&capabilities, &config.search) {
            if let Err(e) = sqlx::query(&statement).execute(&mut connection).await {
                let (duration, duration_ms) = elapsed(start);
                record_client_operation(engine.name(), "connect", "error", duration, 0);
                warn!(
                    stage = "client_operation_completed",
                    engine = engine.name(),
                    operation = "connect",
                    status = "error",
                    duration_ms = duration_ms,
                    statement = %statement,
                    error = %e,
                    "Failed to apply search setting"
                );
                return Err(ClientError::Database(e.to_string()));
            }
        }

        let (duration, duration_ms) = elapsed(start);
        record_client_operation(engine.name(), "connect", "success", duration, 0);
        info!(
            stage = "client_operation_completed",
            engine = engine.name(),
            operation = "connect",
            status = "success",
            duration_ms = duration_ms,
            ef_search = config.search.ef_search,
            probes = ?config.search.probes,
            "Search client connected"
        );

        Ok(Self {
            connection,
            engine,
            table: config.collection.table_name.clone(),
            metric: config.collection.distance,
            builder: PgvectorConditionBuilder::new(capabilities, &config.collection.schema),
        })
    }

    /// Compile the conditions and build the query without running it.
    pub fn build_query(
        &self,
        vector: &[f32],
        conditions: Option<&MetaConditions>,
        top: usize,
    ) -> ClientResult<String> {
        let predicate = compile_conditions(&self.builder, conditions)?;
        Ok(search_query(
            &self.table,
            self.metric,
            vector,
            predicate.as_deref(),
            top,
        ))
    }

    /// Top-`top` ids with their similarity scores, best match first.
    ///
    /// Filter compilation happens before any I/O; an incompatible or
    /// malformed filter never reaches the database.
    #[instrument(skip(self, vector, conditions), fields(engine = %self.engine, operation = "search", top = top))]
    pub async fn search(
        &mut self,
        vector: &[f32],
        conditions: Option<&MetaConditions>,
        top: usize,
    ) -> ClientResult<Vec<(i64, f64)>> {
        let query = self.build_query(vector, conditions, top)?;

        let start = Instant::now();
        debug!(
            stage = "client_operation_started",
            engine = self.engine.name(),
            operation = "search",
            top = top,
            filtered = conditions.is_some(),
            "Starting search"
        );

        // Every query text is unique; caching prepared statements would only churn.
        let result = sqlx::query_as::<_, (i64, f64)>(&query)
            .persistent(false)
            .fetch_all(&mut self.connection)
            .await;

        let (duration, duration_ms) = elapsed(start);
        match result {
            Ok(rows) => {
                record_client_operation(self.engine.name(), "search", "success", duration, rows.len());
                debug!(
                    stage = "client_operation_completed",
                    engine = self.engine.name(),
                    operation = "search",
                    status = "success",
                    duration_ms = duration_ms,
                    item_count = rows.len(),
                    "Search completed"
                );
                Ok(rows)
            }
            Err(e) => {
                record_client_operation(self.engine.name(), "search", "error", duration, 0);
                warn!(
                    stage = "client_operation_completed",
                    engine = self.engine.name(),
                    operation = "search",
                    status = "error",
                    duration_ms = duration_ms,
                    error = %e,
                    "Search failed"
                );
                Err(ClientError::Database(e.to_string()))
            }
        }
    }

    /// Release the connection.
    pub async fn close(self) {
        close_connection(self.connection, self.engine.name()).await;
    }
}

/// `SET` statements applied once per connection.
fn session_settings(capabilities: &Capabilities, params: &SearchParams) -> Vec<String> {
    match capabilities.engine {
        EngineKind::PgvectorHnsw => vec![format!("SET hnsw.ef_search = {}", params.ef_search)],
        EngineKind::PgvectorIvfflat => params
            .probes
            .map(|probes| format!("SET ivfflat.probes = {probes}"))
            .into_iter()
            .collect(),
        EngineKind::PgvectorFlat => Vec::new(),
    }
}
