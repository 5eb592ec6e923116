//! Distance metrics and their pgvector operators.
//!
//! Every metric uses a native operator whose ascending order is best-match
//! first, so one `ORDER BY distance LIMIT k` query shape serves all of them:
//!
//! | Metric | Operator | Raw value                 | Similarity         |
//! |--------|----------|---------------------------|--------------------|
//! | L2     | `<->`    | Euclidean distance        | `-distance`        |
//! | Cosine | `<=>`    | `1 - cosine similarity`   | `1 - distance`     |
//! | Dot    | `<#>`    | negative inner product    | `-1 * distance`    |
//!
//! The raw value is what the index ranks by ([`DistanceMetric::rank_transform`]
//! is the identity). The similarity transform is applied only when the raw key
//! is turned into a reported score, where higher is always more similar.

use serde::{Deserialize, Serialize};

/// Distance metric of a collection. Fixed once the collection is created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Euclidean distance.
    #[serde(alias = "euclid", alias = "euclidean")]
    L2,

    /// Cosine distance. Best for normalized text embeddings.
    #[default]
    Cosine,

    /// Inner product.
    #[serde(alias = "dot_product")]
    Dot,
}

impl DistanceMetric {
    /// Returns the pgvector distance operator for queries.
    pub fn operator(&self) -> &'static str {
        match self {
            DistanceMetric::L2 => "<->",
            DistanceMetric::Cosine => "<=>",
            DistanceMetric::Dot => "<#>",
        }
    }

    /// Returns the pgvector operator class name for index creation.
    pub fn ops_class(&self) -> &'static str {
        match self {
            DistanceMetric::L2 => "vector_l2_ops",
            DistanceMetric::Cosine => "vector_cosine_ops",
            DistanceMetric::Dot => "vector_ip_ops",
        }
    }

    /// Ranking key for a raw operator value; lower ranks first.
    pub fn rank_transform(&self, raw: f64) -> f64 {
        raw
    }

    /// Reported similarity for a raw operator value; higher is more similar.
    pub fn similarity(&self, raw: f64) -> f64 {
        match self {
            DistanceMetric::L2 => -raw,
            DistanceMetric::Cosine => 1.0 - raw,
            DistanceMetric::Dot => -raw,
        }
    }

    /// SQL expression computing [`similarity`](Self::similarity) from a raw
    /// distance column.
    pub fn score_projection(&self, column: &str) -> String {
        match self {
            DistanceMetric::L2 => format!("-{column}"),
            DistanceMetric::Cosine => format!("1 - {column}"),
            DistanceMetric::Dot => format!("-1 * {column}"),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DistanceMetric::L2 => "l2",
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Dot => "dot",
        }
    }
}

impl std::fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
