use serde::{Deserialize, Serialize};

use crate::capabilities::{BulkLoadMethod, Capabilities, EngineKind};

/// Engine selection.
///
/// The engine kind fixes the index type and its dimension limit; geo support
/// depends on the `earthdistance` extension being installable, so it is
/// opt-in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Engine variant under benchmark.
    #[serde(default)]
    pub kind: EngineKind,

    /// Enable geo radius filters (installs `cube` and `earthdistance`).
    #[serde(default)]
    pub geo_filters: bool,

    /// Bulk ingest path used by the upload client.
    #[serde(default)]
    pub bulk_load: BulkLoadMethod,
}

impl EngineConfig {
    pub fn capabilities(&self) -> Capabilities {
        Capabilities::for_engine(self.kind)
            .with_geo_filters(self.geo_filters)
            .with_bulk_load(self.bulk_load)
    }
}
