// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::collections::BTreeSet;

use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use wsync_auth::{AccessCookie, AuthPlugin, AuthorizationCookie};
use wsync_error::{ErrorCode, WsyncError};
use wsync_filter::MetadataFilter;
use wsync_identity::PackageId;
use wsync_metadata::FileUrls;
use wsync_protocol::{ExtendedFileInfo, RevisionIdListResponse, SourceFilter};
use wsync_store::Store;

/// Static configuration a host supplies to [`DownstreamServer`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// This server's own auth plug-in, returned from `getAuthConfig`.
    pub auth_plugin: AuthPlugin,
    /// How long an issued access cookie remains valid.
    pub cookie_lifetime: Duration,
    /// URL root content is rewritten under, e.g.
    /// `https://downstream.example/microsoftupdate/content`.
    pub content_root: String,
}

/// The four downstream protocol-level request handlers, implemented as
/// pure functions over a [`Store`].
///
/// Host integration (mounting these over SOAP/HTTP) is out of scope;
/// this type only computes responses.
pub struct DownstreamServer<'a> {
    store: &'a Store,
    config: ServerConfig,
}

impl<'a> DownstreamServer<'a> {
    /// Wrap a store with the configuration to serve it under.
    pub fn new(store: &'a Store, config: ServerConfig) -> Self {
        Self { store, config }
    }

    /// `getAuthConfig` — this server's own auth plug-in list.
    #[must_use]
    pub fn get_auth_config(&self) -> Vec<AuthPlugin> {
        vec![self.config.auth_plugin.clone()]
    }

    /// `getCookie` — issue an opaque access cookie with the configured
    /// lifetime. The incoming authorization cookies are not validated
    /// (this server accepts any caller, mirroring the upstream's own
    /// anonymous-client policy).
    #[must_use]
    pub fn get_cookie(&self, _auth_cookies: &[AuthorizationCookie], issued_at: DateTime<Utc>) -> AccessCookie {
        AccessCookie {
            encrypted_data: random_cookie_data(),
            expiration: issued_at + self.config.cookie_lifetime,
        }
    }

    /// `getRevisionIdList(filter, anchor) → (ids, newAnchor)`.
    ///
    /// `filter` follows the same cross-product-of-products-and-
    /// classifications shape `SourceFilter` uses upstream; an empty
    /// filter matches every package (the shape `getCategories` submits).
    /// `anchor` is this handler's own opaque encoding of the identity
    /// set it last returned for this filter — decoding a foreign or
    /// stale anchor degrades gracefully to "nothing seen yet" rather
    /// than erroring, since the anchor carries no server-side session
    /// state to validate against.
    #[must_use]
    pub fn get_revision_id_list(&self, filter: &SourceFilter, anchor: Option<&str>) -> RevisionIdListResponse {
        let metadata_filter = source_filter_to_metadata_filter(filter);
        let current = self.store.matching(&metadata_filter);

        let previously_seen = decode_anchor(anchor);
        let new_updates: Vec<PackageId> = current
            .iter()
            .copied()
            .filter(|id| !previously_seen.contains(id))
            .collect();

        RevisionIdListResponse {
            new_updates,
            anchor: encode_anchor(&current),
        }
    }

    /// `getUpdateData(ids) → xmlFragments[]`.
    ///
    /// Returns the exact raw XML fragment each identity was committed
    /// from, in the order requested. An identity this store has never
    /// seen surfaces [`ErrorCode::Internal`] rather than silently
    /// shortening the result (a downstream peer requested something by
    /// an id it must have gotten from an earlier `getRevisionIdList`
    /// call against this same store).
    pub fn get_update_data(&self, ids: &[PackageId]) -> Result<Vec<String>, WsyncError> {
        ids.iter()
            .map(|id| {
                self.store.get_raw_metadata(id.uuid).map(str::to_string).ok_or_else(|| {
                    WsyncError::new(ErrorCode::Internal, format!("unknown identity {id}"))
                        .with_context("uuid", id.uuid.to_string())
                })
            })
            .collect()
    }

    /// `getExtendedUpdateInfo(ids) → files+urls`, rewriting every
    /// declared URL to this server's configured content root.
    pub fn get_extended_update_info(&self, ids: &[PackageId]) -> Result<Vec<ExtendedFileInfo>, WsyncError> {
        let mut out = Vec::new();
        for id in ids {
            let files = self.store.get_files(id.uuid).ok_or_else(|| {
                WsyncError::new(ErrorCode::Internal, format!("unknown identity {id}")).with_context("uuid", id.uuid.to_string())
            })?;
            for file in files {
                let Some(digest) = file.primary_digest() else {
                    continue;
                };
                let rewritten = content_url(&self.config.content_root, &digest.algorithm, &digest.base64);
                out.push(ExtendedFileInfo {
                    digest: digest.clone(),
                    urls: vec![FileUrls {
                        mu_url: Some(rewritten),
                        uss_url: None,
                    }],
                });
            }
        }
        Ok(out)
    }
}

fn source_filter_to_metadata_filter(filter: &SourceFilter) -> MetadataFilter {
    if filter.product_ids.is_empty() && filter.classification_ids.is_empty() {
        return MetadataFilter::all();
    }
    let categories: Vec<_> = filter
        .product_ids
        .iter()
        .chain(&filter.classification_ids)
        .copied()
        .collect();
    MetadataFilter {
        category_filter: Some(categories),
        ..MetadataFilter::all()
    }
}

fn encode_anchor(ids: &[PackageId]) -> String {
    let mut sorted = ids.to_vec();
    sorted.sort();
    let json = serde_json::to_vec(&sorted).unwrap_or_default();
    base64::engine::general_purpose::STANDARD.encode(json)
}

fn decode_anchor(anchor: Option<&str>) -> BTreeSet<PackageId> {
    let Some(anchor) = anchor else {
        return BTreeSet::new();
    };
    base64::engine::general_purpose::STANDARD
        .decode(anchor)
        .ok()
        .and_then(|bytes| serde_json::from_slice::<Vec<PackageId>>(&bytes).ok())
        .map(|ids| ids.into_iter().collect())
        .unwrap_or_default()
}

fn content_url(content_root: &str, algorithm: &str, base64_digest: &str) -> String {
    let hex = base64::engine::general_purpose::STANDARD
        .decode(base64_digest)
        .map(|bytes| bytes.iter().map(|b| format!("{b:02x}")).collect::<String>())
        .unwrap_or_else(|_| base64_digest.to_string());
    format!(
        "{}/{}/{}",
        content_root.trim_end_matches('/'),
        algorithm.to_ascii_lowercase(),
        hex
    )
}

fn random_cookie_data() -> String {
    rand::thread_rng()
        .sample_iter(Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use wsync_metadata::{CommonFields, Package, SoftwareUpdatePackage};

    fn uuid_for(byte: u8) -> Uuid {
        Uuid::from_bytes([byte; 16])
    }

    fn software(id_byte: u8, revision: u32) -> (Package, String) {
        let id = PackageId::new(uuid_for(id_byte), revision);
        let package = Package::SoftwareUpdate(SoftwareUpdatePackage {
            common: CommonFields {
                id,
                title: format!("Update {id_byte}"),
                description: String::new(),
                creation_date: None,
                prerequisites: Vec::new(),
                handler: None,
                files: Vec::new(),
            },
            kb_article: None,
            support_url: None,
            is_os_upgrade: false,
            superseded_updates: Vec::new(),
            bundled_updates: Vec::new(),
            applicability: None,
        });
        let raw_xml = format!("<Update id=\"{id_byte}\" revision=\"{revision}\"/>");
        (package, raw_xml)
    }

    fn config() -> ServerConfig {
        ServerConfig {
            auth_plugin: AuthPlugin {
                plugin_id: "default".to_string(),
                service_url: "https://downstream.example/auth".to_string(),
            },
            cookie_lifetime: Duration::hours(8),
            content_root: "https://downstream.example/microsoftupdate/content".to_string(),
        }
    }

    #[test]
    fn get_auth_config_returns_the_configured_plugin() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_or_create(dir.path()).unwrap();
        let server = DownstreamServer::new(&store, config());
        assert_eq!(server.get_auth_config(), vec![config().auth_plugin]);
    }

    #[test]
    fn get_cookie_expires_after_configured_lifetime() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_or_create(dir.path()).unwrap();
        let server = DownstreamServer::new(&store, config());
        let now = Utc::now();
        let cookie = server.get_cookie(&[], now);
        assert_eq!(cookie.expiration, now + Duration::hours(8));
    }

    #[test]
    fn first_revision_id_list_call_returns_everything_as_new() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open_or_create(dir.path()).unwrap();
        let (pkg, xml) = software(1, 1);
        store.add(pkg, xml);
        store.commit().unwrap();

        let server = DownstreamServer::new(&store, config());
        let response = server.get_revision_id_list(&SourceFilter::default(), None);
        assert_eq!(response.new_updates, vec![PackageId::new(uuid_for(1), 1)]);
    }

    #[test]
    fn repeat_call_with_anchor_reports_only_newly_committed() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open_or_create(dir.path()).unwrap();
        let (pkg1, xml1) = software(1, 1);
        store.add(pkg1, xml1);
        store.commit().unwrap();

        let server = DownstreamServer::new(&store, config());
        let first = server.get_revision_id_list(&SourceFilter::default(), None);
        assert_eq!(first.new_updates.len(), 1);

        let second = server.get_revision_id_list(&SourceFilter::default(), Some(&first.anchor));
        assert!(second.new_updates.is_empty());
    }

    #[test]
    fn newly_committed_package_appears_after_anchor() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open_or_create(dir.path()).unwrap();
        let (pkg1, xml1) = software(1, 1);
        store.add(pkg1, xml1);
        store.commit().unwrap();

        let server = DownstreamServer::new(&store, config());
        let first = server.get_revision_id_list(&SourceFilter::default(), None);

        let (pkg2, xml2) = software(2, 1);
        store.add(pkg2, xml2);
        store.commit().unwrap();

        let server = DownstreamServer::new(&store, config());
        let second = server.get_revision_id_list(&SourceFilter::default(), Some(&first.anchor));
        assert_eq!(second.new_updates, vec![PackageId::new(uuid_for(2), 1)]);
    }

    #[test]
    fn get_update_data_returns_raw_xml_in_requested_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open_or_create(dir.path()).unwrap();
        let (pkg1, xml1) = software(1, 1);
        let (pkg2, xml2) = software(2, 1);
        store.add_many([(pkg1, xml1.clone()), (pkg2, xml2.clone())]);
        store.commit().unwrap();

        let server = DownstreamServer::new(&store, config());
        let ids = vec![PackageId::new(uuid_for(2), 1), PackageId::new(uuid_for(1), 1)];
        let xmls = server.get_update_data(&ids).unwrap();
        assert_eq!(xmls, vec![xml2, xml1]);
    }

    #[test]
    fn get_update_data_rejects_unknown_identity() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_or_create(dir.path()).unwrap();
        let server = DownstreamServer::new(&store, config());
        let err = server
            .get_update_data(&[PackageId::new(uuid_for(9), 1)])
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Internal);
    }

    #[test]
    fn get_extended_update_info_rewrites_urls_to_content_root() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open_or_create(dir.path()).unwrap();
        let id = PackageId::new(uuid_for(1), 1);
        let package = Package::SoftwareUpdate(SoftwareUpdatePackage {
            common: CommonFields {
                id,
                title: "Update".to_string(),
                description: String::new(),
                creation_date: None,
                prerequisites: Vec::new(),
                handler: None,
                files: vec![wsync_metadata::ContentFile {
                    file_name: "a.cab".to_string(),
                    size: 10,
                    digests: vec![wsync_metadata::FileDigest {
                        algorithm: "SHA256".to_string(),
                        base64: base64::engine::general_purpose::STANDARD.encode([0xABu8; 4]),
                    }],
                    urls: vec![FileUrls {
                        mu_url: Some("https://upstream.example/a.cab".to_string()),
                        uss_url: None,
                    }],
                    patching_type: None,
                }],
            },
            kb_article: None,
            support_url: None,
            is_os_upgrade: false,
            superseded_updates: Vec::new(),
            bundled_updates: Vec::new(),
            applicability: None,
        });
        store.add(package, "<Update/>".to_string());
        store.commit().unwrap();

        let server = DownstreamServer::new(&store, config());
        let info = server.get_extended_update_info(&[id]).unwrap();
        assert_eq!(info.len(), 1);
        assert_eq!(
            info[0].urls[0].mu_url,
            Some("https://downstream.example/microsoftupdate/content/sha256/abababab".to_string())
        );
    }
}
