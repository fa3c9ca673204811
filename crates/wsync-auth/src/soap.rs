//! A [`AuthTransport`] that speaks SOAP 1.1 over HTTPS to the upstream
//! authentication endpoints, matching the method list in the
//! external-interfaces contract: `GetAuthConfig` and `GetCookie` against
//! the main authentication service, `GetAuthorizationCookie` against
//! whichever service URL the chosen plug-in advertised (the DSS
//! endpoint).
//!
//! Reuses the same [`XNode`] tree `wsync-metadata` parses update
//! fragments with, rather than pulling in a second XML representation.

use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Client;
use uuid::Uuid;
use wsync_error::{ErrorCode, WsyncError};
use wsync_metadata::xmltree::{self, XNode};

use crate::{AccessCookie, AuthPlugin, AuthTransport, AuthorizationCookie};

const SOAP_ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const AUTH_NS: &str = "http://www.microsoft.com/SoftwareDistribution/Server/ServerSyncWebService";

/// Talks the upstream authentication protocol over HTTPS.
///
/// `GetAuthConfig` and `GetCookie` are sent to `auth_endpoint` (the main
/// authentication web service); `GetAuthorizationCookie` is sent to each
/// plug-in's own advertised `service_url` instead, per the protocol.
pub struct SoapAuthTransport {
    client: Client,
    auth_endpoint: String,
}

impl SoapAuthTransport {
    /// Build a transport against `auth_endpoint` (the full `.asmx` URL
    /// of the authentication web service).
    #[must_use]
    pub fn new(client: Client, auth_endpoint: impl Into<String>) -> Self {
        Self {
            client,
            auth_endpoint: auth_endpoint.into(),
        }
    }

    async fn call(&self, url: &str, action: &str, body: &str) -> Result<XNode, WsyncError> {
        let envelope = format!(
            r#"<?xml version="1.0" encoding="utf-8"?><soap:Envelope xmlns:soap="{SOAP_ENVELOPE_NS}"><soap:Body>{body}</soap:Body></soap:Envelope>"#
        );

        let response = self
            .client
            .post(url)
            .header("Content-Type", "text/xml; charset=utf-8")
            .header("SOAPAction", format!("{AUTH_NS}/{action}"))
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
                return Err(fault_to_error(&fault.0, &fault.1));
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

fn fault_to_error(code: &str, reason: &str) -> WsyncError {
    if code.contains("InvalidAuthorizationCookie") {
        WsyncError::new(ErrorCode::InvalidAuthorizationCookie, reason.to_string())
    } else {
        WsyncError::upstream_fault(code.to_string(), reason.to_string())
    }
}

#[async_trait]
impl AuthTransport for SoapAuthTransport {
    async fn get_auth_config(&self) -> Result<Vec<AuthPlugin>, WsyncError> {
        let body = format!("<GetAuthConfig xmlns=\"{AUTH_NS}\"/>");
        let response = self.call(&self.auth_endpoint, "GetAuthConfig", &body).await?;
        let result = response
            .child("GetAuthConfigResponse")
            .and_then(|n| n.child("GetAuthConfigResult"))
            .ok_or_else(|| {
                WsyncError::parse_error("/GetAuthConfigResponse", "missing GetAuthConfigResult")
            })?;

        let plugins = result
            .children_named("AuthPlugInConfig")
            .filter_map(|n| {
                Some(AuthPlugin {
                    plugin_id: n.child("Id")?.text.clone(),
                    service_url: n.child("ServiceUrl")?.text.clone(),
                })
            })
            .collect();
        Ok(plugins)
    }

    async fn get_authorization_cookie(
        &self,
        plugin: &AuthPlugin,
        account_guid: Uuid,
        account_name: &str,
    ) -> Result<AuthorizationCookie, WsyncError> {
        let body = format!(
            r#"<GetAuthorizationCookie xmlns="{AUTH_NS}"><accountGuid>{account_guid}</accountGuid><accountName>{}</accountName></GetAuthorizationCookie>"#,
            xmltree::escape(account_name)
        );
        let response = self
            .call(&plugin.service_url, "GetAuthorizationCookie", &body)
            .await?;
        let result = response
            .child("GetAuthorizationCookieResponse")
            .and_then(|n| n.child("GetAuthorizationCookieResult"))
            .ok_or_else(|| {
                WsyncError::parse_error(
                    "/GetAuthorizationCookieResponse",
                    "missing GetAuthorizationCookieResult",
                )
            })?;

        Ok(AuthorizationCookie {
            plugin_id: plugin.plugin_id.clone(),
            cookie_data: result.text.clone(),
        })
    }

    async fn get_cookie(
        &self,
        auth_cookies: &[AuthorizationCookie],
        protocol_version: &str,
    ) -> Result<AccessCookie, WsyncError> {
        let cookies: String = auth_cookies
            .iter()
            .map(|c| {
                format!(
                    "<AuthCookie><PluginId>{}</PluginId><CookieData>{}</CookieData></AuthCookie>",
                    xmltree::escape(&c.plugin_id),
                    xmltree::escape(&c.cookie_data),
                )
            })
            .collect();
        let body = format!(
            "<GetCookie xmlns=\"{AUTH_NS}\"><authCookies>{cookies}</authCookies><protocolVersion>{protocol_version}</protocolVersion></GetCookie>"
        );
        let response = self.call(&self.auth_endpoint, "GetCookie", &body).await?;
        let result = response
            .child("GetCookieResponse")
            .and_then(|n| n.child("GetCookieResult"))
            .ok_or_else(|| WsyncError::parse_error("/GetCookieResponse", "missing GetCookieResult"))?;

        let encrypted_data = result
            .child("EncryptedData")
            .map(|n| n.text.clone())
            .ok_or_else(|| WsyncError::parse_error("/GetCookieResult", "missing EncryptedData"))?;
        let expiration = result
            .child("Expiration")
            .map(|n| n.text.as_str())
            .filter(|s| !s.is_empty())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .ok_or_else(|| WsyncError::parse_error("/GetCookieResult", "missing or invalid Expiration"))?;

        Ok(AccessCookie {
            encrypted_data,
            expiration,
        })
    }
}
