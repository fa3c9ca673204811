//! Shared protocol-engine types.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use wsync_metadata::{FileDigest, FileUrls, Package};

/// Service configuration cached from one `GetConfigData` call per session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ServiceConfig {
    /// Upper bound on identities per `GetUpdateData` batch.
    pub max_number_of_updates_per_request: u32,
    /// Host to rewrite content URLs to, if the upstream redirects.
    pub content_redirect_host: Option<String>,
    /// URL path root content is served under.
    pub content_root: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_number_of_updates_per_request: 100,
            content_redirect_host: None,
            content_root: None,
        }
    }
}

/// `getUpdates` source filter: the cross product of products and
/// classifications is submitted. Each leaf product needs an explicit
/// entry — the server does not expand child products automatically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SourceFilter {
    /// Product category uuids.
    pub product_ids: Vec<Uuid>,
    /// Classification category uuids.
    pub classification_ids: Vec<Uuid>,
}

/// Result of one `GetRevisionIdList` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RevisionIdListResponse {
    /// Identities changed since the given anchor.
    pub new_updates: Vec<wsync_identity::PackageId>,
    /// Opaque anchor to persist once the corresponding commit succeeds.
    pub anchor: String,
}

/// Which half of the sync a [`SyncProgress`] event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SyncKind {
    /// `getCategories` in progress.
    Categories,
    /// `getUpdates` in progress.
    Updates,
}

/// Per-batch progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SyncProgress {
    /// Which sync call this event belongs to.
    pub kind: SyncKind,
    /// Identities processed so far.
    pub current: u64,
    /// Total identities this call expects to process.
    pub total: u64,
}

/// A parsed package plus its resolved category membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CrossLinkedPackage {
    /// The parsed package.
    pub package: Package,
    /// The exact XML fragment `package` was parsed from, preserved so a
    /// store can re-serve it verbatim (`GetUpdateData` hands back raw
    /// fragments, not a re-serialization).
    pub raw_xml: String,
    /// Product categories this package belongs to.
    pub product_ids: Vec<Uuid>,
    /// Classification categories this package belongs to.
    pub classification_ids: Vec<Uuid>,
}

/// One file's signed URLs from `GetExtendedUpdateInfo`, keyed by its
/// primary digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ExtendedFileInfo {
    /// The file's primary digest (matches [`wsync_metadata::ContentFile::primary_digest`]).
    pub digest: FileDigest,
    /// Signed URLs to fetch the file from.
    pub urls: Vec<FileUrls>,
}

