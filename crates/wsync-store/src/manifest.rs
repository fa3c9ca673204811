//! The store's manifest: format version, baseline pointer, and the
//! configuration snapshots the persisted-layout contract names.

use serde::{Deserialize, Serialize};

/// Current on-disk format version written by this crate.
pub const FORMAT_VERSION: u32 = 1;

/// `manifest.json` — the root of a store directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    /// On-disk format version.
    pub format_version: u32,
    /// Path to the baseline this store chains from, if any: either a
    /// sibling directory name (resolved relative to this store's
    /// parent directory) or an absolute path.
    pub baseline: Option<String>,
    /// Last-applied filter snapshot, if this store was populated via a
    /// filtered sync or export.
    pub filter_snapshot: Option<serde_json::Value>,
    /// Last-known upstream service configuration.
    pub service_config_snapshot: Option<serde_json::Value>,
    /// Last-known authentication cookie state (opaque).
    pub auth_cookie_snapshot: Option<serde_json::Value>,
}

impl Manifest {
    /// A fresh manifest for a newly created store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            format_version: FORMAT_VERSION,
            ..Self::default()
        }
    }
}
