//! The wire operations the sync engine drives. Production code talks to
//! the upstream SOAP endpoint; tests and the downstream-server adapter
//! (`wsync-server`) substitute their own implementation.

use async_trait::async_trait;
use wsync_auth::Token;
use wsync_error::WsyncError;
use wsync_identity::PackageId;

use crate::types::{ExtendedFileInfo, RevisionIdListResponse, ServiceConfig, SourceFilter};

/// Upstream sync protocol calls, minus authentication (see `wsync-auth`).
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// `GetConfigData` — fetched once per session and cached by the caller.
    async fn get_config_data(&self, token: &Token) -> Result<ServiceConfig, WsyncError>;

    /// `GetRevisionIdList(filter, anchor)` — identities changed since `anchor`.
    async fn get_revision_id_list(
        &self,
        token: &Token,
        filter: &SourceFilter,
        anchor: Option<&str>,
    ) -> Result<RevisionIdListResponse, WsyncError>;

    /// `GetUpdateData(ids)` — one raw XML fragment per requested identity,
    /// in the same order as `ids`.
    async fn get_update_data(
        &self,
        token: &Token,
        ids: &[PackageId],
    ) -> Result<Vec<String>, WsyncError>;

    /// `GetExtendedUpdateInfo(ids)` — signed content URLs for the files
    /// declared by the given updates.
    async fn get_extended_update_info(
        &self,
        token: &Token,
        ids: &[PackageId],
    ) -> Result<Vec<ExtendedFileInfo>, WsyncError>;
}
