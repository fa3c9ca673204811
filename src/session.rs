// SPDX-License-Identifier: MIT OR Apache-2.0
//! Sync-orchestration state this binary owns across runs.
//!
//! The core crates are deliberately stateless about what happens
//! between invocations: `wsync-protocol`'s engine takes an anchor and
//! known-category sets as plain arguments, `wsync-auth`'s authenticator
//! takes a cached token as a plain argument. Persisting them between
//! runs of this CLI is this frontend's job, not the core's.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use wsync_auth::Token;

/// Everything a `sync` run needs seeded from the previous one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncSession {
    /// Cached three-leg auth token, refreshed or reacquired each run.
    pub token: Option<Token>,
    /// Anchor returned by the last successful `getCategories` commit.
    pub categories_anchor: Option<String>,
    /// Anchor returned by the last successful `getUpdates` commit.
    pub updates_anchor: Option<String>,
    /// Product category uuids seen so far, seeded into category resolution.
    pub known_products: BTreeSet<Uuid>,
    /// Classification category uuids seen so far.
    pub known_classifications: BTreeSet<Uuid>,
}

impl SyncSession {
    /// Load session state, if a prior run left any. Absence or
    /// corruption is treated as "start from scratch" rather than an error.
    #[must_use]
    pub fn load(path: &Path) -> Option<Self> {
        let contents = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&contents).ok()
    }

    /// Persist session state after a successful commit.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Sidecar session file placed next to a metadata store directory
/// rather than inside it, so it never collides with the store's own
/// manifest/index/lock files.
#[must_use]
pub fn session_path_for(metadata_path: &Path) -> PathBuf {
    let file_name = metadata_path
        .file_name()
        .map(|n| format!("{}.session.json", n.to_string_lossy()))
        .unwrap_or_else(|| "wsyncd.session.json".to_string());
    match metadata_path.parent() {
        Some(parent) => parent.join(file_name),
        None => PathBuf::from(file_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_path_is_a_sibling_of_the_metadata_dir() {
        let path = session_path_for(Path::new("/srv/wsyncd/metadata"));
        assert_eq!(path, PathBuf::from("/srv/wsyncd/metadata.session.json"));
    }

    #[test]
    fn missing_session_file_loads_as_none() {
        assert!(SyncSession::load(Path::new("/nonexistent/path.json")).is_none());
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.session.json");
        let mut session = SyncSession::default();
        session.categories_anchor = Some("anchor-1".to_string());
        session.known_products.insert(Uuid::nil());
        session.save(&path).unwrap();

        let loaded = SyncSession::load(&path).unwrap();
        assert_eq!(loaded.categories_anchor.as_deref(), Some("anchor-1"));
        assert!(loaded.known_products.contains(&Uuid::nil()));
    }
}
