//! Per-engine capability descriptors.
//!
//! Engines differ in what they can do: geo predicates need the `earthdistance`
//! extension, approximate indexes cap the vector dimensionality, and the bulk
//! ingest path can be `COPY` or a multi-row `INSERT`. These differences are
//! data, queried by the compiler, the configurator and the clients, and every
//! gap surfaces as an [`IncompatibilityError`] instead of a degraded run.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The engine variant under benchmark.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineKind {
    /// pgvector with an HNSW index.
    #[default]
    PgvectorHnsw,
    /// pgvector with an IVFFlat index.
    PgvectorIvfflat,
    /// pgvector without a similarity index (exact scan).
    PgvectorFlat,
}

impl EngineKind {
    pub fn name(&self) -> &'static str {
        match self {
            EngineKind::PgvectorHnsw => "pgvector-hnsw",
            EngineKind::PgvectorIvfflat => "pgvector-ivfflat",
            EngineKind::PgvectorFlat => "pgvector-flat",
        }
    }

    /// Index access method used for the embedding column, if any.
    pub fn index_method(&self) -> Option<&'static str> {
        match self {
            EngineKind::PgvectorHnsw => Some("hnsw"),
            EngineKind::PgvectorIvfflat => Some("ivfflat"),
            EngineKind::PgvectorFlat => None,
        }
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// How an upload batch reaches the table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkLoadMethod {
    /// `COPY ... FROM STDIN` streaming in text format.
    #[default]
    Copy,
    /// One multi-row `INSERT ... VALUES` statement per batch.
    Insert,
}

/// pgvector's HNSW and IVFFlat indexes support vectors up to 2,000 dimensions.
pub const PGVECTOR_MAX_INDEX_DIMENSIONS: usize = 2000;

/// What an engine can and cannot do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub engine: EngineKind,
    /// Geo radius predicates (requires `cube` + `earthdistance`).
    pub geo_filters: bool,
    /// Largest vector dimensionality the similarity index accepts.
    pub max_index_dimensions: Option<usize>,
    pub bulk_load: BulkLoadMethod,
}

impl Capabilities {
    /// Defaults for an engine: no geo support, index dimension limit where
    /// an index is built, `COPY` ingest.
    pub fn for_engine(engine: EngineKind) -> Self {
        let max_index_dimensions = engine
            .index_method()
            .map(|_| PGVECTOR_MAX_INDEX_DIMENSIONS);
        Self {
            engine,
            geo_filters: false,
            max_index_dimensions,
            bulk_load: BulkLoadMethod::Copy,
        }
    }

    pub fn with_geo_filters(mut self, enabled: bool) -> Self {
        self.geo_filters = enabled;
        self
    }

    pub fn with_bulk_load(mut self, method: BulkLoadMethod) -> Self {
        self.bulk_load = method;
        self
    }

    pub fn check_dimensions(&self, dimensions: usize) -> Result<(), IncompatibilityError> {
        match self.max_index_dimensions {
            Some(limit) if dimensions > limit => Err(IncompatibilityError::Dimensions {
                engine: self.engine,
                requested: dimensions,
                limit,
            }),
            _ => Ok(()),
        }
    }

    pub fn check_geo(&self, field: &str) -> Result<(), IncompatibilityError> {
        if self.geo_filters {
            Ok(())
        } else {
            Err(IncompatibilityError::GeoFilter {
                engine: self.engine,
                field: field.to_string(),
            })
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::for_engine(EngineKind::default())
    }
}

/// The engine does not support what the benchmark asks for.
///
/// Distinct from backend failures so orchestration can report "unsupported"
/// rather than "broken".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IncompatibilityError {
    #[error("{engine} does not support geo filters (field '{field}')")]
    GeoFilter { engine: EngineKind, field: String },

    #[error("{engine} cannot index {requested}-dimensional vectors (limit {limit})")]
    Dimensions {
        engine: EngineKind,
        requested: usize,
        limit: usize,
    },
}
