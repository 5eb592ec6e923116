//! Metadata transforms: dataset records to typed column values.

use serde_json::Value;
use thiserror::Error;

use super::Metadata;
use crate::config::{FieldSchema, FieldType};

/// A single column value of an upload row.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Json(Value),
    /// `point(lon, lat)`.
    Point { lon: f64, lat: f64 },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransformError {
    #[error("field '{field}' expects {expected}, got {value}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        value: String,
    },

    #[error("expected {expected} column values, got {actual}")]
    Arity { expected: usize, actual: usize },

    #[error("{0}")]
    Custom(String),
}

/// Turns one metadata record into the row's metadata columns, in table
/// order. `None` is a record without metadata.
///
/// Closures with the same signature are transforms too.
pub trait MetadataTransform: Send + Sync {
    fn transform(&self, metadata: Option<&Metadata>) -> Result<Vec<ColumnValue>, TransformError>;
}

impl<F> MetadataTransform for F
where
    F: Fn(Option<&Metadata>) -> Result<Vec<ColumnValue>, TransformError> + Send + Sync,
{
    fn transform(&self, metadata: Option<&Metadata>) -> Result<Vec<ColumnValue>, TransformError> {
        self(metadata)
    }
}

/// Projects records onto the collection schema.
///
/// Fields are read by name in declared column order; missing and `null`
/// values become SQL `NULL`, extra keys are ignored.
#[derive(Debug, Clone)]
pub struct SchemaProjection {
    fields: Vec<FieldSchema>,
}

impl SchemaProjection {
    pub fn new(schema: &[FieldSchema]) -> Self {
        Self {
            fields: schema.to_vec(),
        }
    }
}

impl MetadataTransform for SchemaProjection {
    fn transform(&self, metadata: Option<&Metadata>) -> Result<Vec<ColumnValue>, TransformError> {
        self.fields
            .iter()
            .map(|field| {
                match metadata.and_then(|m| m.get(&field.name)) {
                    None | Some(Value::Null) => Ok(ColumnValue::Null),
                    Some(value) => project(field, value),
                }
            })
            .collect()
    }
}

fn project(field: &FieldSchema, value: &Value) -> Result<ColumnValue, TransformError> {
    let mismatch = |expected: &'static str| TransformError::TypeMismatch {
        field: field.name.clone(),
        expected,
        value: value.to_string(),
    };

    match field.field_type {
        FieldType::Int => match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .map(ColumnValue::Int)
                .ok_or_else(|| mismatch("an integer")),
            _ => Err(mismatch("an integer")),
        },
        FieldType::Float => value
            .as_f64()
            .map(ColumnValue::Float)
            .ok_or_else(|| mismatch("a number")),
        FieldType::Keyword | FieldType::Text => match value {
            Value::String(s) => Ok(ColumnValue::Text(s.clone())),
            Value::Number(n) => Ok(ColumnValue::Text(n.to_string())),
            Value::Bool(b) => Ok(ColumnValue::Text(b.to_string())),
            _ => Err(mismatch("a string")),
        },
        FieldType::Geo => {
            let lat = value.get("lat").and_then(Value::as_f64);
            let lon = value.get("lon").and_then(Value::as_f64);
            match (lat, lon) {
                (Some(lat), Some(lon)) => Ok(ColumnValue::Point { lon, lat }),
                _ => Err(mismatch("a {lat, lon} object")),
            }
        }
        FieldType::Json => Ok(ColumnValue::Json(value.clone())),
    }
}
