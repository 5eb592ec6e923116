use std::{fmt::Write as _, time::Instant};

use sqlx::{Connection, PgConnection};
use tracing::{debug, info, instrument, warn};

use super::{
    ClientError, ClientResult, ColumnValue, Metadata, MetadataTransform, SchemaProjection,
    TransformError, close_connection, connect, elapsed, vector_literal,
};
use crate::{
    capabilities::{BulkLoadMethod, EngineKind},
    config::{BenchConfig, ConnectionConfig, PostUploadAction},
    filter::{quote_ident, quote_literal},
    observability::metrics::record_client_operation,
};

/// Loads batches of `(id, vector, metadata)` records.
///
/// The connection is opened on the first batch and reused until
/// [`close`](Self::close). Each batch is one transaction: it is either fully
/// visible afterwards or not at all.
pub struct UploadClient {
    connection_config: ConnectionConfig,
    connection: Option<PgConnection>,
    engine: EngineKind,
    bulk_load: BulkLoadMethod,
    table: String,
    columns: Vec<String>,
    transform: Box<dyn MetadataTransform>,
    post_upload: PostUploadAction,
    /// Index of the next batch, for error reporting.
    next_batch: usize,
}

impl UploadClient {
    /// Client projecting metadata onto the collection schema.
    pub fn new(config: &BenchConfig) -> Self {
        let capabilities = config.engine.capabilities();
        Self {
            connection_config: config.connection.clone(),
            connection: None,
            engine: capabilities.engine,
            bulk_load: capabilities.bulk_load,
            table: config.collection.table_name.clone(),
            columns: config
                .collection
                .columns()
                .into_iter()
                .map(str::to_string)
                .collect(),
            transform: Box::new(SchemaProjection::new(&config.collection.schema)),
            post_upload: config.upload.post_upload,
            next_batch: 0,
        }
    }

    /// Replace the metadata transform.
    pub fn with_transform(mut self, transform: impl MetadataTransform + 'static) -> Self {
        self.transform = Box::new(transform);
        self
    }

    /// Upload one batch atomically; returns the number of rows written.
    ///
    /// The three slices are index-aligned. Every record is transformed before
    /// anything is sent, so a transform failure writes nothing.
    #[instrument(skip_all, fields(engine = %self.engine, operation = "upload_batch", batch = self.next_batch, item_count = ids.len()))]
    pub async fn upload_batch(
        &mut self,
        ids: &[i64],
        vectors: &[Vec<f32>],
        metadata: &[Option<Metadata>],
    ) -> ClientResult<u64> {
        if ids.len() != vectors.len() || ids.len() != metadata.len() {
            return Err(ClientError::BatchShape {
                ids: ids.len(),
                vectors: vectors.len(),
                metadata: metadata.len(),
            });
        }

        let batch = self.next_batch;
        self.next_batch += 1;
        if ids.is_empty() {
            return Ok(0);
        }

        let rows = self.transform_rows(batch, metadata)?;
        let start = Instant::now();
        debug!(
            stage = "client_operation_started",
            engine = self.engine.name(),
            operation = "upload_batch",
            batch = batch,
            item_count = ids.len(),
            bulk_load = ?self.bulk_load,
            "Starting batch upload"
        );

        let payload = match self.bulk_load {
            BulkLoadMethod::Copy => {
                let mut data = String::new();
                for ((id, vector), values) in ids.iter().zip(vectors).zip(&rows) {
                    encode_copy_row(&mut data, *id, vector, values);
                }
                Payload::Copy {
                    statement: copy_statement(&self.table, &self.columns),
                    data,
                }
            }
            BulkLoadMethod::Insert => Payload::Insert(insert_statement(
                &self.table,
                &self.columns,
                ids,
                vectors,
                &rows,
            )),
        };

        let engine = self.engine;
        let conn = self.connection().await?;
        let result = write_batch(conn, payload).await;

        let (duration, duration_ms) = elapsed(start);
        match result {
            Ok(written) => {
                record_client_operation(engine.name(), "upload_batch", "success", duration, ids.len());
                debug!(
                    stage = "client_operation_completed",
                    engine = engine.name(),
                    operation = "upload_batch",
                    status = "success",
                    duration_ms = duration_ms,
                    batch = batch,
                    item_count = written,
                    "Batch upload completed"
                );
                Ok(written)
            }
            Err(e) => {
                record_client_operation(engine.name(), "upload_batch", "error", duration, 0);
                warn!(
                    stage = "client_operation_completed",
                    engine = engine.name(),
                    operation = "upload_batch",
                    status = "error",
                    duration_ms = duration_ms,
                    batch = batch,
                    error = %e,
                    "Batch upload failed"
                );
                Err(ClientError::Upload {
                    batch,
                    message: e.to_string(),
                })
            }
        }
    }

    /// Run the configured finalization once all batches are in.
    #[instrument(skip(self), fields(engine = %self.engine, operation = "post_upload"))]
    pub async fn post_upload(&mut self) -> ClientResult<()> {
        let statement = match self.post_upload {
            PostUploadAction::None => return Ok(()),
            PostUploadAction::Analyze => format!("ANALYZE {}", quote_ident(&self.table)),
            PostUploadAction::Reindex => format!("REINDEX TABLE {}", quote_ident(&self.table)),
        };

        let engine = self.engine;
        let start = Instant::now();
        info!(
            stage = "client_operation_started",
            engine = engine.name(),
            operation = "post_upload",
            action = ?self.post_upload,
            "Starting post-upload finalization"
        );

        let conn = self.connection().await?;
        let result = sqlx::query(&statement).execute(&mut *conn).await;

        let (duration, duration_ms) = elapsed(start);
        match result {
            Ok(_) => {
                record_client_operation(engine.name(), "post_upload", "success", duration, 0);
                info!(
                    stage = "client_operation_completed",
                    engine = engine.name(),
                    operation = "post_upload",
                    status = "success",
                    duration_ms = duration_ms,
                    "Post-upload finalization completed"
                );
                Ok(())
            }
            Err(e) => {
                record_client_operation(engine.name(), "post_upload", "error", duration, 0);
                warn!(
                    stage = "client_operation_completed",
                    engine = engine.name(),
                    operation = "post_upload",
                    status = "error",
                    duration_ms = duration_ms,
                    error = %e,
                    "Post-upload finalization failed"
                );
                Err(ClientError::Database(e.to_string()))
            }
        }
    }

    /// Release the connection, if one was opened.
    pub async fn close(mut self) {
        if let Some(conn) = self.connection.take() {
            close_connection(conn, self.engine.name()).await;
        }
    }

    fn transform_rows(
        &self,
        batch: usize,
        metadata: &[Option<Metadata>],
    ) -> ClientResult<Vec<Vec<ColumnValue>>> {
        let expected = self.columns.len() - 2;
        metadata
            .iter()
            .enumerate()
            .map(|(record, meta)| {
                let values = self
                    .transform
                    .transform(meta.as_ref())
                    .and_then(|values| {
                        if values.len() == expected {
                            Ok(values)
                        } else {
                            Err(TransformError::Arity {
                                expected,
                                actual: values.len(),
                            })
                        }
                    });
                values.map_err(|source| {
                    warn!(
                        engine = self.engine.name(),
                        operation = "upload_batch",
                        batch = batch,
                        record = record,
                        error = %source,
                        "Metadata transform failed"
                    );
                    ClientError::Transform {
                        batch,
                        record,
                        source,
                    }
                })
            })
            .collect()
    }

    async fn connection(&mut self) -> ClientResult<&mut PgConnection> {
        if self.connection.is_none() {
            self.connection = Some(connect(&self.connection_config).await?);
        }
        self.connection
            .as_mut()
            .ok_or_else(|| ClientError::Connection("connection unavailable".into()))
    }
}

enum Payload {
    Copy { statement: String, data: String },
    Insert(String),
}

/// Write one batch inside a transaction. Dropping the transaction on any
/// error rolls it back.
async fn write_batch(conn: &mut PgConnection, payload: Payload) -> Result<u64, sqlx::Error> {
    let mut tx = conn.begin().await?;

    let written = match payload {
        Payload::Copy { statement, data } => {
            let mut copy = tx.copy_in_raw(&statement).await?;
            if let Err(e) = copy.send(data.into_bytes()).await {
                let _ = copy.abort(e.to_string()).await;
                return Err(e);
            }
            copy.finish().await?
        }
        Payload::Insert(statement) => {
            sqlx::query(&statement)
                .persistent(false)
                .execute(&mut *tx)
                .await?
                .rows_affected()
        }
    };

    tx.commit().await?;
    Ok(written)
}

fn column_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn copy_statement(table: &str, columns: &[String]) -> String {
    format!(
        "COPY {} ({}) FROM STDIN",
        quote_ident(table),
        column_list(columns)
    )
}

fn insert_statement(
    table: &str,
    columns: &[String],
    ids: &[i64],
    vectors: &[Vec<f32>],
    rows: &[Vec<ColumnValue>],
) -> String {
    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ",
        quote_ident(table),
        column_list(columns)
    );
    for (i, ((id, vector), values)) in ids.iter().zip(vectors).zip(rows).enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        let _ = write!(sql, "({}, {}", id, quote_literal(&vector_literal(vector)));
        for value in values {
            sql.push_str(", ");
            sql.push_str(&sql_literal(value));
        }
        sql.push(')');
    }
    sql
}

fn sql_literal(value: &ColumnValue) -> String {
    match value {
        ColumnValue::Null => "NULL".to_string(),
        ColumnValue::Bool(true) => "TRUE".to_string(),
        ColumnValue::Bool(false) => "FALSE".to_string(),
        ColumnValue::Int(i) => i.to_string(),
        ColumnValue::Float(f) if f.is_finite() => f.to_string(),
        ColumnValue::Float(f) => format!("{}::float8", quote_literal(&float_text(*f))),
        ColumnValue::Text(s) => quote_literal(s),
        ColumnValue::Json(v) => format!("{}::jsonb", quote_literal(&v.to_string())),
        ColumnValue::Point { lon, lat } => format!("point({lon}, {lat})"),
    }
}

/// PostgreSQL spelling of a float, including the non-finite values.
fn float_text(f: f64) -> String {
    if f.is_nan() {
        "NaN".to_string()
    } else if f == f64::INFINITY {
        "Infinity".to_string()
    } else if f == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else {
        f.to_string()
    }
}

/// Append one row in `COPY` text format: tab-separated, `\N` for `NULL`,
/// backslash and control characters escaped, newline-terminated.
pub fn encode_copy_row(buf: &mut String, id: i64, vector: &[f32], values: &[ColumnValue]) {
    let _ = write!(buf, "{}\t{}", id, vector_literal(vector));
    for value in values {
        buf.push('\t');
        match value {
            ColumnValue::Null => buf.push_str("\\N"),
            ColumnValue::Bool(b) => buf.push(if *b { 't' } else { 'f' }),
            ColumnValue::Int(i) => {
                let _ = write!(buf, "{i}");
            }
            ColumnValue::Float(f) => buf.push_str(&float_text(*f)),
            ColumnValue::Text(s) => escape_copy_text(buf, s),
            ColumnValue::Json(v) => escape_copy_text(buf, &v.to_string()),
            ColumnValue::Point { lon, lat } => {
                let _ = write!(buf, "({lon},{lat})");
            }
        }
    }
    buf.push('\n');
}

fn escape_copy_text(buf: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '\\' => buf.push_str("\\\\"),
            '\t' => buf.push_str("\\t"),
            '\n' => buf.push_str("\\n"),
            '\r' => buf.push_str("\\r"),
            c => buf.push(c),
        }
    }
}
