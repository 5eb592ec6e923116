use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Query-time tunables, applied once per search connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchParams {
    /// `hnsw.ef_search`: candidate list size for HNSW scans.
    #[serde(default = "default_ef_search")]
    pub ef_search: u32,

    /// `ivfflat.probes`: lists visited per IVFFlat scan. Server default if unset.
    #[serde(default)]
    pub probes: Option<u32>,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            ef_search: default_ef_search(),
            probes: None,
        }
    }
}

impl SearchParams {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.ef_search == 0 {
            return Err(ConfigError::Validation(
                "search.ef_search must be positive".into(),
            ));
        }
        if self.probes == Some(0) {
            return Err(ConfigError::Validation(
                "search.probes must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn default_ef_search() -> u32 {
    64
}

/// Bulk-load tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UploadParams {
    /// Records per atomic batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Finalization run once after all batches.
    #[serde(default)]
    pub post_upload: PostUploadAction,
}

impl Default for UploadParams {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            post_upload: PostUploadAction::default(),
        }
    }
}

impl UploadParams {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Validation(
                "upload.batch_size must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn default_batch_size() -> usize {
    64
}

/// Backend finalization after the last batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostUploadAction {
    #[default]
    None,
    /// `ANALYZE` the table so the planner sees fresh statistics.
    Analyze,
    /// `REINDEX` the table's indexes.
    Reindex,
}
