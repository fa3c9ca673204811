//! A [`SyncTransport`] that speaks SOAP 1.1 over HTTPS to the upstream
//! sync endpoint (`BasicHttpsBinding`), matching the method list in the
//! external-interfaces contract: `GetConfigData`, `GetRevisionIdList`,
//! `GetUpdateData`, `GetExtendedUpdateInfo`.
//!
//! Envelope bodies are assembled and read with the same [`XNode`] tree
//! `wsync-metadata` parses update fragments with, rather than pulling in
//! a second XML representation.

use async_trait::async_trait;
use reqwest::Client;
use wsync_auth::Token;
use wsync_error::{ErrorCode, WsyncError};
use wsync_identity::PackageId;
use wsync_metadata::xmltree::{self, XNode};

use crate::transport::SyncTransport;
use crate::types::{ExtendedFileInfo, RevisionIdListResponse, ServiceConfig, SourceFilter};

const SOAP_ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const SYNC_NS: &str = "http://www.microsoft.com/SoftwareDistribution/Server/ServerSyncWebService";

/// Talks the upstream server-to-server sync protocol over HTTPS.
pub struct SoapTransport {
    client: Client,
    endpoint: String,
}

impl SoapTransport {
    /// Build a transport against `endpoint` (the full `.asmx` URL).
    #[must_use]
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    async fn call(&self, action: &str, body: &str) -> Result<XNode, WsyncError> {
        let envelope = format!(
            r#"<?xml version="1.0" encoding="utf-8"?><soap:Envelope xmlns:soap="{SOAP_ENVELOPE_NS}"><soap:Body>{body}</soap:Body></soap:Envelope>"#
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "text/xml; charset=utf-8")
            .header("SOAPAction", format!("{SYNC_NS}/{action}"))
            .body(envelope)
            .send()
            .await
            .map_err(|e| WsyncError::new(ErrorCode::EndpointNotFound, e.to_string()).with_source(e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| WsyncError::new(ErrorCode::EndpointNotFound, e.to_string()).with_source(e))?;

        if !status.is_success() {
            if let Some(fault) = extract_soap_fault(&text) {
                return Err(WsyncError::upstream_fault(fault.0, fault.1));
            }
            return Err(
                WsyncError::new(ErrorCode::EndpointNotFound, format!("HTTP {status}"))
                    .with_context("body", text),
            );
        }

        let root = xmltree::parse_root(&text)?;
        let body = root
            .child("Body")
            .ok_or_else(|| WsyncError::parse_error("/Envelope/Body", "missing SOAP body"))?;
        Ok(body.clone())
    }
}

fn extract_soap_fault(text: &str) -> Option<(String, String)> {
    let root = xmltree::parse_root(text).ok()?;
    let fault = root.child("Body")?.child("Fault")?;
    let code = fault
        .child("faultcode")
        .map(|n| n.text.clone())
        .unwrap_or_default();
    let reason = fault
        .child("faultstring")
        .map(|n| n.text.clone())
        .unwrap_or_default();
    Some((code, reason))
}

fn access_cookie_element(token: &Token) -> String {
    format!(
        "<cookie><Expiration>{}</Expiration><EncryptedData>{}</EncryptedData></cookie>",
        token.access_cookie.expiration.to_rfc3339(),
        xmltree::escape(&token.access_cookie.encrypted_data),
    )
}

#[async_trait]
impl SyncTransport for SoapTransport {
    async fn get_config_data(&self, token: &Token) -> Result<ServiceConfig, WsyncError> {
        let body = format!(
            "<GetConfigData xmlns=\"{SYNC_NS}\"><cookie>{}</cookie></GetConfigData>",
            access_cookie_element(token)
        );
        let response = self.call("GetConfigData", &body).await?;
        let result = response
            .child("GetConfigDataResponse")
            .and_then(|n| n.child("GetConfigDataResult"))
            .ok_or_else(|| {
                WsyncError::parse_error("/GetConfigDataResponse", "missing GetConfigDataResult")
            })?;

        let max = result
            .child("MaxNumberOfUpdatesPerRequest")
            .and_then(|n| n.text.parse().ok())
            .unwrap_or(100);
        let content_redirect_host = result
            .child("ContentRedirectHostName")
            .map(|n| n.text.clone())
            .filter(|s| !s.is_empty());
        let content_root = result
            .child("ContentRoot")
            .map(|n| n.text.clone())
            .filter(|s| !s.is_empty());

        Ok(ServiceConfig {
            max_number_of_updates_per_request: max,
            content_redirect_host,
            content_root,
        })
    }

    async fn get_revision_id_list(
        &self,
        token: &Token,
        filter: &SourceFilter,
        anchor: Option<&str>,
    ) -> Result<RevisionIdListResponse, WsyncError> {
        let products: String = filter
            .product_ids
            .iter()
            .map(|id| format!("<Id>{id}</Id>"))
            .collect();
        let classifications: String = filter
            .classification_ids
            .iter()
            .map(|id| format!("<Id>{id}</Id>"))
            .collect();
        let anchor_xml = anchor
            .map(|a| format!("<anchor>{}</anchor>", xmltree::escape(a)))
            .unwrap_or_default();

        let body = format!(
            "<GetRevisionIdList xmlns=\"{SYNC_NS}\"><cookie>{}</cookie>{anchor_xml}<filter><Product>{products}</Product><Classification>{classifications}</Classification></filter></GetRevisionIdList>",
            access_cookie_element(token)
        );

        let response = self.call("GetRevisionIdList", &body).await?;
        let result = response
            .child("GetRevisionIdListResponse")
            .and_then(|n| n.child("GetRevisionIdListResult"))
            .ok_or_else(|| {
                WsyncError::parse_error(
                    "/GetRevisionIdListResponse",
                    "missing GetRevisionIdListResult",
                )
            })?;

        let new_updates = result
            .child("NewUpdates")
            .map(|n| {
                n.children_named("UpdateIdentity")
                    .filter_map(parse_identity_node)
                    .collect()
            })
            .unwrap_or_default();
        let anchor = result
            .child("Anchor")
            .map(|n| n.text.clone())
            .unwrap_or_default();

        Ok(RevisionIdListResponse { new_updates, anchor })
    }

    async fn get_update_data(
        &self,
        token: &Token,
        ids: &[PackageId],
    ) -> Result<Vec<String>, WsyncError> {
        let identities: String = ids
            .iter()
            .map(|id| {
                format!(
                    r#"<UpdateIdentity UpdateID="{}" RevisionNumber="{}"/>"#,
                    id.uuid, id.revision
                )
            })
            .collect();

        let body = format!(
            "<GetUpdateData xmlns=\"{SYNC_NS}\"><cookie>{}</cookie><updateIds>{identities}</updateIds></GetUpdateData>",
            access_cookie_element(token)
        );

        let response = self.call("GetUpdateData", &body).await?;
        let result = response
            .child("GetUpdateDataResponse")
            .and_then(|n| n.child("GetUpdateDataResult"))
            .ok_or_else(|| {
                WsyncError::parse_error("/GetUpdateDataResponse", "missing GetUpdateDataResult")
            })?;

        Ok(result
            .children_named("XmlUpdateFragment")
            .filter_map(|n| n.child("Update").map(XNode::to_xml))
            .collect())
    }

    async fn get_extended_update_info(
        &self,
        token: &Token,
        ids: &[PackageId],
    ) -> Result<Vec<ExtendedFileInfo>, WsyncError> {
        let identities: String = ids
            .iter()
            .map(|id| {
                format!(
                    r#"<UpdateIdentity UpdateID="{}" RevisionNumber="{}"/>"#,
                    id.uuid, id.revision
                )
            })
            .collect();

        let body = format!(
            "<GetExtendedUpdateInfo xmlns=\"{SYNC_NS}\"><cookie>{}</cookie><updateIds>{identities}</updateIds></GetExtendedUpdateInfo>",
            access_cookie_element(token)
        );

        let response = self.call("GetExtendedUpdateInfo", &body).await?;
        let result = response
            .child("GetExtendedUpdateInfoResponse")
            .and_then(|n| n.child("GetExtendedUpdateInfoResult"))
            .ok_or_else(|| {
                WsyncError::parse_error(
                    "/GetExtendedUpdateInfoResponse",
                    "missing GetExtendedUpdateInfoResult",
                )
            })?;

        Ok(result
            .children_named("FileUrlInfo")
            .filter_map(parse_extended_file_info)
            .collect())
    }
}

fn parse_identity_node(node: &XNode) -> Option<PackageId> {
    let uuid = node.attr("UpdateID")?.parse().ok()?;
    let revision = node.attr("RevisionNumber")?.parse().ok()?;
    Some(PackageId::new(uuid, revision))
}

fn parse_extended_file_info(node: &XNode) -> Option<ExtendedFileInfo> {
    let digest_node = node.child("FileDigest")?;
    let digest = wsync_metadata::FileDigest {
        algorithm: digest_node.attr("Algorithm")?.to_string(),
        base64: digest_node.text.clone(),
    };
    let urls = node
        .child("Urls")
        .map(|n| {
            n.children_named("Url")
                .map(|u| wsync_metadata::FileUrls {
                    mu_url: u.attr("MuUrl").map(str::to_string),
                    uss_url: u.attr("UssUrl").map(str::to_string),
                })
                .collect()
        })
        .unwrap_or_default();
    Some(ExtendedFileInfo { digest, urls })
}
