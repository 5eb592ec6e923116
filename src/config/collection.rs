use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::{ConfigError, is_plain_identifier};
use crate::distance::DistanceMetric;

/// pgvector's `vector` type accepts at most 16,000 dimensions.
const MAX_VECTOR_DIMENSIONS: usize = 16_000;

/// Layout of the benchmark table.
///
/// Fixed at collection creation: the column order declared here is the order
/// the upload client writes metadata in, and the distance metric selects the
/// index operator class.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectionConfig {
    /// Table holding the vectors. Must be a plain SQL identifier.
    #[serde(default = "default_table_name")]
    pub table_name: String,

    #[serde(default)]
    pub distance: DistanceMetric,

    /// Dimensionality of the `embedding` column.
    pub vector_size: usize,

    /// Metadata columns, in table order.
    #[serde(default)]
    pub schema: Vec<FieldSchema>,

    #[serde(default)]
    pub hnsw: HnswConfig,

    #[serde(default)]
    pub ivfflat: IvfflatConfig,
}

impl CollectionConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if !is_plain_identifier(&self.table_name) {
            return Err(ConfigError::Validation(format!(
                "collection.table_name '{}' must be a plain identifier",
                self.table_name
            )));
        }
        if self.vector_size == 0 || self.vector_size > MAX_VECTOR_DIMENSIONS {
            return Err(ConfigError::Validation(format!(
                "collection.vector_size must be between 1 and {MAX_VECTOR_DIMENSIONS}"
            )));
        }

        let mut seen = HashSet::new();
        for field in &self.schema {
            if field.name.is_empty() {
                return Err(ConfigError::Validation(
                    "collection.schema field names cannot be empty".into(),
                ));
            }
            if matches!(field.name.as_str(), "id" | "embedding") {
                return Err(ConfigError::Validation(format!(
                    "collection.schema field '{}' clashes with a reserved column",
                    field.name
                )));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "collection.schema field '{}' is declared twice",
                    field.name
                )));
            }
        }

        if self.hnsw.m == 0 || self.hnsw.ef_construction == 0 {
            return Err(ConfigError::Validation(
                "collection.hnsw parameters must be positive".into(),
            ));
        }
        if self.ivfflat.lists == 0 {
            return Err(ConfigError::Validation(
                "collection.ivfflat.lists must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Column names in bulk-load order: `id`, `embedding`, then the schema.
    pub fn columns(&self) -> Vec<&str> {
        ["id", "embedding"]
            .into_iter()
            .chain(self.schema.iter().map(|f| f.name.as_str()))
            .collect()
    }
}

fn default_table_name() -> String {
    "items".to_string()
}

/// A metadata column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

/// Dataset field types and their column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Int,
    Keyword,
    Text,
    Float,
    /// `{lat, lon}` objects, stored as `point(lon, lat)`.
    Geo,
    /// Structured values (e.g. label arrays), stored as `jsonb`.
    Json,
}

impl FieldType {
    pub fn sql_type(&self) -> &'static str {
        match self {
            FieldType::Int => "integer",
            FieldType::Keyword => "varchar",
            FieldType::Text => "text",
            FieldType::Float => "real",
            FieldType::Geo => "point",
            FieldType::Json => "jsonb",
        }
    }
}

/// HNSW build parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HnswConfig {
    #[serde(default = "default_hnsw_m")]
    pub m: u32,

    #[serde(default = "default_ef_construction")]
    pub ef_construction: u32,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: default_hnsw_m(),
            ef_construction: default_ef_construction(),
        }
    }
}

fn default_hnsw_m() -> u32 {
    16
}

fn default_ef_construction() -> u32 {
    64
}

/// IVFFlat build parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IvfflatConfig {
    /// Number of inverted lists; typically sqrt(rows).
    #[serde(default = "default_lists")]
    pub lists: u32,
}

impl Default for IvfflatConfig {
    fn default() -> Self {
        Self {
            lists: default_lists(),
        }
    }
}

fn default_lists() -> u32 {
    100
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collection(table_name: &str) -> CollectionConfig {
        CollectionConfig {
            table_name: table_name.to_string(),
            distance: DistanceMetric::L2,
            vector_size: 4,
            schema: vec![
                FieldSchema::new("a", FieldType::Int),
                FieldSchema::new("b", FieldType::Geo),
            ],
            hnsw: HnswConfig::default(),
            ivfflat: IvfflatConfig::default(),
        }
    }

    #[test]
    fn test_columns_follow_schema_order() {
        assert_eq!(collection("items").columns(), vec!["id", "embedding", "a", "b"]);
    }

    #[test]
    fn test_table_name_must_be_identifier() {
        assert!(collection("items_v2").validate().is_ok());
        assert!(collection("2items").validate().is_err());
        assert!(collection("items\"").validate().is_err());
        assert!(collection("").validate().is_err());
    }

    #[test]
    fn test_reserved_column_names_rejected() {
        let mut config = collection("items");
        config.schema.push(FieldSchema::new("embedding", FieldType::Text));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_vector_size_limits() {
        let mut config = collection("items");
        config.vector_size = 0;
        assert!(config.validate().is_err());
        config.vector_size = 16_001;
        assert!(config.validate().is_err());
        config.vector_size = 16_000;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sql_types() {
        assert_eq!(FieldType::Int.sql_type(), "integer");
        assert_eq!(FieldType::Keyword.sql_type(), "varchar");
        assert_eq!(FieldType::Geo.sql_type(), "point");
        assert_eq!(FieldType::Json.sql_type(), "jsonb");
    }
}
