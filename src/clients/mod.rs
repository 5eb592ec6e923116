//! Benchmark clients for a pgvector collection.
//!
//! - [`Configurator`]: drops and creates the table, extensions and index
//! - [`UploadClient`]: atomic batch ingest with per-record metadata transforms
//! - [`SearchClient`]: filtered top-k queries returning `(id, score)` pairs
//!
//! Each client owns one connection exclusively; parallel workers create
//! independent clients. All operations take `&mut self`.

mod configure;
mod search;
mod transform;
mod upload;

#[cfg(test)]
mod tests;

use std::time::Instant;

pub use configure::Configurator;
pub use search::{SearchClient, search_query};
use sqlx::{Connection, PgConnection};
use thiserror::Error;
pub use transform::{ColumnValue, MetadataTransform, SchemaProjection, TransformError};
use tracing::warn;
pub use upload::{UploadClient, encode_copy_row};

use crate::{
    capabilities::IncompatibilityError,
    config::ConnectionConfig,
    filter::CompileError,
};

/// Metadata record attached to a vector.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The engine cannot run what the benchmark asks for.
    #[error(transparent)]
    Incompatible(#[from] IncompatibilityError),

    #[error("filter compilation failed: {0}")]
    Compile(CompileError),

    #[error("batch slices differ in length: {ids} ids, {vectors} vectors, {metadata} metadata")]
    BatchShape {
        ids: usize,
        vectors: usize,
        metadata: usize,
    },

    #[error("batch {batch}, record {record}: metadata transform failed: {source}")]
    Transform {
        batch: usize,
        record: usize,
        #[source]
        source: TransformError,
    },

    #[error("batch {batch} failed and was rolled back: {message}")]
    Upload { batch: usize, message: String },

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("database error: {0}")]
    Database(String),
}

impl ClientError {
    /// True when the failure means "unsupported by this engine" rather than
    /// "broken run".
    pub fn is_incompatible(&self) -> bool {
        matches!(self, ClientError::Incompatible(_))
    }
}

impl From<CompileError> for ClientError {
    fn from(err: CompileError) -> Self {
        match err {
            CompileError::Incompatible(e) => ClientError::Incompatible(e),
            other => ClientError::Compile(other),
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Render a vector as a pgvector text literal: `[v0, v1, ..., vn]`.
pub fn vector_literal(vector: &[f32]) -> String {
    let parts: Vec<String> = vector.iter().map(|v| v.to_string()).collect();
    format!("[{}]", parts.join(", "))
}

/// Open a dedicated connection, bounded by the configured timeout.
async fn connect(config: &ConnectionConfig) -> ClientResult<PgConnection> {
    let options = config.connect_options();
    match tokio::time::timeout(config.connect_timeout(), PgConnection::connect_with(&options)).await
    {
        Ok(Ok(conn)) => Ok(conn),
        Ok(Err(e)) => {
            warn!(
                host = %config.host,
                port = config.port,
                error = %e,
                "Failed to connect to PostgreSQL"
            );
            Err(ClientError::Connection(e.to_string()))
        }
        Err(_) => Err(ClientError::Connection(format!(
            "timed out after {}s connecting to {}:{}",
            config.connect_timeout_secs, config.host, config.port
        ))),
    }
}

/// Close a connection, logging rather than failing: the benchmark result is
/// already recorded by the time a client is torn down.
async fn close_connection(conn: PgConnection, engine: &str) {
    if let Err(e) = conn.close().await {
        warn!(engine = engine, error = %e, "Error closing connection");
    }
}

/// Elapsed time as `(seconds, whole milliseconds)` for metrics and logs.
fn elapsed(start: Instant) -> (f64, u64) {
    let duration = start.elapsed().as_secs_f64();
    (duration, (duration * 1000.0) as u64)
}
