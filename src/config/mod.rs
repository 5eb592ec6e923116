//! Configuration for a benchmark run.
//!
//! A run is configured via a TOML file, with support for environment
//! variable interpolation using `${VAR_NAME}` syntax.
//!
//! # Example
//!
//! ```toml
//! [engine]
//! kind = "pgvector-hnsw"
//!
//! [connection]
//! host = "localhost"
//! password = "${PGPASSWORD}"
//!
//! [collection]
//! table_name = "items"
//! distance = "cosine"
//! vector_size = 768
//!
//! [[collection.schema]]
//! name = "labels"
//! type = "json"
//!
//! [search]
//! ef_search = 128
//! ```

mod collection;
mod connection;
mod engine;
mod observability;
mod params;

use std::{path::Path, sync::LazyLock};

pub use collection::*;
pub use connection::*;
pub use engine::*;
pub use observability::*;
pub use params::*;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Root configuration for a benchmark run.
///
/// Only `collection.vector_size` is required; every other section has
/// defaults suitable for a local PostgreSQL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BenchConfig {
    /// Engine variant and capability overrides.
    #[serde(default)]
    pub engine: EngineConfig,

    /// How to reach the database.
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Table layout, metric and index parameters.
    pub collection: CollectionConfig,

    /// Query-time tunables.
    #[serde(default)]
    pub search: SearchParams,

    /// Bulk-load tunables.
    #[serde(default)]
    pub upload: UploadParams,

    /// Logging and metrics.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl BenchConfig {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables in the format `${VAR_NAME}` are expanded.
    /// Missing required variables will cause an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;

        let raw: toml::Value = toml::from_str(&expanded)?;
        check_disabled_features(&raw)?;

        let config: BenchConfig = toml::from_str(&expanded)?;
        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.connection.validate()?;
        self.collection.validate()?;
        self.search.validate()?;
        self.upload.validate()?;
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Reject settings that need a cargo feature this binary was built without,
/// before serde turns them into a less helpful error or silently ignores them.
fn check_disabled_features(raw: &toml::Value) -> Result<(), ConfigError> {
    let metrics_enabled = raw
        .get("observability")
        .and_then(|v| v.get("metrics"))
        .and_then(|v| v.get("enabled"))
        .and_then(|v| v.as_bool())
        == Some(true);

    if metrics_enabled && !cfg!(feature = "prometheus") {
        return Err(ConfigError::Validation(
            "observability.metrics.enabled requires the 'prometheus' feature\n\
             Rebuild with: cargo build --features prometheus"
                .into(),
        ));
    }
    Ok(())
}

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("identifier pattern is valid")
});

/// Unquoted SQL identifier that fits PostgreSQL's 63-byte name limit.
fn is_plain_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

static ENV_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is valid"));

/// Expand environment variables in the format `${VAR_NAME}`.
/// Variables after a `#` on the same line are left alone.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(input.len());

    for line in input.lines() {
        let comment_pos = line.find('#');
        let mut last_end = 0;

        for cap in ENV_VAR.captures_iter(line) {
            let Some(whole) = cap.get(0) else {
                continue;
            };

            if let Some(pos) = comment_pos
                && whole.start() >= pos
            {
                continue;
            }

            result.push_str(&line[last_end..whole.start()]);
            let var_name = &cap[1];
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
            result.push_str(&value);
            last_end = whole.end();
        }

        result.push_str(&line[last_end..]);
        result.push('\n');
    }

    if !input.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }

    Ok(result)
}
