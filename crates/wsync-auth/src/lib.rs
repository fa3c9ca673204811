// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use wsync_error::{ErrorCode, WsyncError};

pub mod soap;
pub use soap::SoapAuthTransport;

/// Window before expiration within which a cached token is still
/// returned unrefreshed by [`Authenticator::authenticate`].
const REFRESH_SKIP_WINDOW: Duration = Duration::minutes(30);

/// One authentication plug-in advertised by `getAuthConfig`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AuthPlugin {
    /// Plug-in identifier.
    pub plugin_id: String,
    /// Service URL this plug-in's `getAuthorizationCookie` call targets.
    pub service_url: String,
}

/// An authorization cookie obtained from a plug-in's `getAuthorizationCookie`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AuthorizationCookie {
    /// The plug-in that issued this cookie.
    pub plugin_id: String,
    /// Opaque cookie data, passed back verbatim to `getCookie`.
    pub cookie_data: String,
}

/// The encrypted access cookie returned by `getCookie`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AccessCookie {
    /// Opaque encrypted cookie data presented on every subsequent call.
    pub encrypted_data: String,
    /// Expiration timestamp advertised by the server.
    pub expiration: DateTime<Utc>,
}

/// A complete, serializable token: the accumulated state of all three
/// authentication legs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Token {
    /// The full plug-in list from `getAuthConfig` (retained so a restart
    /// can pick the first plug-in again without another round trip).
    pub auth_info: Vec<AuthPlugin>,
    /// The authorization cookies step 2 returned.
    pub auth_cookies: Vec<AuthorizationCookie>,
    /// The access cookie from step 3.
    pub access_cookie: AccessCookie,
}

impl Token {
    /// `true` iff the access cookie's expiration is at or before `at`.
    #[must_use]
    pub fn expired(&self, at: DateTime<Utc>) -> bool {
        self.access_cookie.expiration <= at
    }

    fn expires_within(&self, window: Duration, at: DateTime<Utc>) -> bool {
        self.access_cookie.expiration <= at + window
    }
}

/// The wire operations the three-leg protocol is built from. Callers
/// provide the transport (SOAP client, mock, or recorded fixture); this
/// crate owns only the lifecycle and refresh policy around it.
#[async_trait]
pub trait AuthTransport: Send + Sync {
    /// `getAuthConfig` — list the available authentication plug-ins.
    async fn get_auth_config(&self) -> Result<Vec<AuthPlugin>, WsyncError>;

    /// `getAuthorizationCookie(accountGuid, accountName)` against a
    /// specific plug-in's service URL.
    async fn get_authorization_cookie(
        &self,
        plugin: &AuthPlugin,
        account_guid: Uuid,
        account_name: &str,
    ) -> Result<AuthorizationCookie, WsyncError>;

    /// `getCookie(authCookies, protocolVersion)` — exchange authorization
    /// cookies for an encrypted access cookie.
    async fn get_cookie(
        &self,
        auth_cookies: &[AuthorizationCookie],
        protocol_version: &str,
    ) -> Result<AccessCookie, WsyncError>;
}

/// Protocol version advertised on every `getCookie` call.
pub const PROTOCOL_VERSION: &str = "1.7";

/// Drives the three-leg token lifecycle against an [`AuthTransport`].
pub struct Authenticator<T: AuthTransport> {
    transport: T,
}

impl<T: AuthTransport> Authenticator<T> {
    /// Wrap a transport.
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Produce a live token.
    ///
    /// * No cached token: perform all three steps.
    /// * Cached token whose access cookie does not expire within the
    ///   next 30 minutes: return it unchanged.
    /// * Otherwise: attempt step 3 alone, reusing the cached
    ///   authorization cookies. On [`ErrorCode::InvalidAuthorizationCookie`]
    ///   restart at step 1. Any other upstream fault propagates as-is.
    pub async fn authenticate(&self, cached: Option<Token>, now: DateTime<Utc>) -> Result<Token, WsyncError> {
        let Some(token) = cached else {
            return self.full_handshake(now).await;
        };

        if !token.expires_within(REFRESH_SKIP_WINDOW, now) {
            return Ok(token);
        }

        match self
            .transport
            .get_cookie(&token.auth_cookies, PROTOCOL_VERSION)
            .await
        {
            Ok(access_cookie) => Ok(Token {
                access_cookie,
                ..token
            }),
            Err(err) if err.code == ErrorCode::InvalidAuthorizationCookie => {
                tracing::warn!(
                    target: "wsync_auth",
                    "cached authorization cookie rejected, restarting handshake"
                );
                self.full_handshake(now).await
            }
            Err(err) => Err(err),
        }
    }

    async fn full_handshake(&self, _now: DateTime<Utc>) -> Result<Token, WsyncError> {
        let auth_info = self.transport.get_auth_config().await?;
        let plugin = auth_info
            .first()
            .ok_or_else(|| WsyncError::new(ErrorCode::Internal, "getAuthConfig returned no plug-ins"))?;

        let account_guid = Uuid::new_v4();
        let account_name = random_account_name();

        let auth_cookie = self
            .transport
            .get_authorization_cookie(plugin, account_guid, &account_name)
            .await?;
        let auth_cookies = vec![auth_cookie];

        let access_cookie = self
            .transport
            .get_cookie(&auth_cookies, PROTOCOL_VERSION)
            .await?;

        Ok(Token {
            auth_info,
            auth_cookies,
            access_cookie,
        })
    }
}

fn random_account_name() -> String {
    rand::thread_rng()
        .sample_iter(Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeTransport {
        invalidate_once: Mutex<bool>,
    }

    fn plugin() -> AuthPlugin {
        AuthPlugin {
            plugin_id: "default".to_string(),
            service_url: "https://upstream.example/auth".to_string(),
        }
    }

    #[async_trait]
    impl AuthTransport for FakeTransport {
        async fn get_auth_config(&self) -> Result<Vec<AuthPlugin>, WsyncError> {
            Ok(vec![plugin()])
        }

        async fn get_authorization_cookie(
            &self,
            plugin: &AuthPlugin,
            _account_guid: Uuid,
            _account_name: &str,
        ) -> Result<AuthorizationCookie, WsyncError> {
            Ok(AuthorizationCookie {
                plugin_id: plugin.plugin_id.clone(),
                cookie_data: "auth-cookie-data".to_string(),
            })
        }

        async fn get_cookie(
            &self,
            auth_cookies: &[AuthorizationCookie],
            _protocol_version: &str,
        ) -> Result<AccessCookie, WsyncError> {
            let mut invalidate_once = self.invalidate_once.lock().unwrap();
            if *invalidate_once {
                *invalidate_once = false;
                return Err(WsyncError::new(
                    ErrorCode::InvalidAuthorizationCookie,
                    "cached cookie rejected",
                ));
            }
            assert!(!auth_cookies.is_empty());
            Ok(AccessCookie {
                encrypted_data: "access-cookie-data".to_string(),
                expiration: Utc::now() + Duration::hours(8),
            })
        }
    }

    #[tokio::test]
    async fn full_handshake_on_no_cached_token() {
        let auth = Authenticator::new(FakeTransport {
            invalidate_once: Mutex::new(false),
        });
        let token = auth.authenticate(None, Utc::now()).await.unwrap();
        assert_eq!(token.auth_info, vec![plugin()]);
        assert!(!token.expired(Utc::now()));
    }

    #[tokio::test]
    async fn cached_token_outside_refresh_window_is_returned_unchanged() {
        let auth = Authenticator::new(FakeTransport {
            invalidate_once: Mutex::new(false),
        });
        let now = Utc::now();
        let token = Token {
            auth_info: vec![plugin()],
            auth_cookies: vec![AuthorizationCookie {
                plugin_id: "default".to_string(),
                cookie_data: "stale".to_string(),
            }],
            access_cookie: AccessCookie {
                encrypted_data: "still-good".to_string(),
                expiration: now + Duration::hours(8),
            },
        };
        let result = auth.authenticate(Some(token.clone()), now).await.unwrap();
        assert_eq!(result, token);
    }

    #[tokio::test]
    async fn token_within_refresh_window_is_refreshed_via_step_three_alone() {
        let auth = Authenticator::new(FakeTransport {
            invalidate_once: Mutex::new(false),
        });
        let now = Utc::now();
        let token = Token {
            auth_info: vec![plugin()],
            auth_cookies: vec![AuthorizationCookie {
                plugin_id: "default".to_string(),
                cookie_data: "still-valid-cookie".to_string(),
            }],
            access_cookie: AccessCookie {
                encrypted_data: "about-to-expire".to_string(),
                expiration: now + Duration::minutes(5),
            },
        };
        let refreshed = auth.authenticate(Some(token.clone()), now).await.unwrap();
        assert_ne!(refreshed.access_cookie.encrypted_data, token.access_cookie.encrypted_data);
        assert_eq!(refreshed.auth_cookies, token.auth_cookies);
    }

    #[tokio::test]
    async fn invalid_authorization_cookie_restarts_full_handshake() {
        let auth = Authenticator::new(FakeTransport {
            invalidate_once: Mutex::new(true),
        });
        let now = Utc::now();
        let token = Token {
            auth_info: vec![plugin()],
            auth_cookies: vec![AuthorizationCookie {
                plugin_id: "default".to_string(),
                cookie_data: "rejected-by-server".to_string(),
            }],
            access_cookie: AccessCookie {
                encrypted_data: "about-to-expire".to_string(),
                expiration: now + Duration::minutes(5),
            },
        };
        let refreshed = auth.authenticate(Some(token), now).await.unwrap();
        assert!(!refreshed.expired(now));
    }
}
