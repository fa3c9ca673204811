//! Derived indexes maintained incrementally on commit and rebuildable
//! from scratch by [`crate::Store::reindex`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use wsync_identity::PackageId;

/// All derived indexes for one store generation, keyed the way the
/// persisted-layout contract names them.
///
/// Keyed by `id.open_id()` rather than [`PackageId`] directly: JSON
/// object keys must be strings, and `openId` is already this system's
/// canonical string form of an identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Indexes {
    /// `titles[openId] = title`
    pub titles: BTreeMap<String, String>,
    /// `descriptions[openId] = description`
    pub descriptions: BTreeMap<String, String>,
    /// `creationDates[openId] = date`
    pub creation_dates: BTreeMap<String, Option<DateTime<Utc>>>,
    /// `kbArticle[openId] = kb`
    pub kb_article: BTreeMap<String, String>,
    /// `isSupersededBy[uuid] = [superseder_ids]`
    pub is_superseded_by: BTreeMap<Uuid, Vec<PackageId>>,
    /// `isSuperseding[openId] = [superseded_uuids]`
    pub is_superseding: BTreeMap<String, Vec<Uuid>>,
    /// `isBundle[openId] = [bundled_identities]`
    pub is_bundle: BTreeMap<String, Vec<PackageId>>,
    /// `bundledWith[uuid] = [parent_bundle_identities]`
    pub bundled_with: BTreeMap<Uuid, Vec<PackageId>>,
    /// `byDigest[fileDigest] = (id, filename)`
    pub by_digest: BTreeMap<String, (PackageId, String)>,
    /// Derived category membership (products + classifications), for
    /// the filter engine's `categoryFilter`.
    pub categories: BTreeMap<String, Vec<Uuid>>,
    /// Hardware ids named in a driver update's metadata blocks.
    pub hardware_ids: BTreeMap<String, Vec<String>>,
    /// Computer hardware ids in a driver update's distribution list.
    pub computer_hardware_ids: BTreeMap<String, Vec<Uuid>>,
}
