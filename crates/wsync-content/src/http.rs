//! Production [`ContentTransport`] backed by `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use wsync_error::{ErrorCode, WsyncError};

use crate::ContentTransport;

/// Per-file HTTP timeout floor. The sync engine's `wsync-protocol`
/// counterpart uses a flat per-batch timeout; content timeouts instead
/// scale with the declared file size, which only the caller (knowing
/// that size up front) can compute — this is just the floor used when
/// the caller doesn't override it.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Fetches content over HTTPS with `reqwest`, issuing a `Range` header
/// when resuming.
#[derive(Debug, Clone)]
pub struct HttpContentTransport {
    client: reqwest::Client,
}

impl HttpContentTransport {
    /// Build a transport with the given per-request timeout.
    pub fn new(timeout: Duration) -> Result<Self, WsyncError> {
        let client = reqwest::Client::builder().timeout(timeout).build().map_err(|e| {
            WsyncError::new(ErrorCode::Internal, format!("building content http client: {e}"))
        })?;
        Ok(Self { client })
    }
}

impl Default for HttpContentTransport {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT).expect("default client config is always valid")
    }
}

#[async_trait]
impl ContentTransport for HttpContentTransport {
    async fn fetch_into(
        &self,
        url: &str,
        offset: u64,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<bool, WsyncError> {
        let mut request = self.client.get(url);
        if offset > 0 {
            request = request.header(reqwest::header::RANGE, format!("bytes={offset}-"));
        }

        let response = request.send().await.map_err(transport_error)?;
        let resumed = offset > 0 && response.status() == reqwest::StatusCode::PARTIAL_CONTENT;
        let mut response = response.error_for_status().map_err(transport_error)?;

        while let Some(chunk) = response.chunk().await.map_err(transport_error)? {
            sink.write_all(&chunk)
                .await
                .map_err(|e| WsyncError::new(ErrorCode::Internal, format!("writing staged content: {e}")))?;
        }
        Ok(resumed)
    }
}

fn transport_error(err: reqwest::Error) -> WsyncError {
    let url = err.url().map(|u| u.to_string()).unwrap_or_default();
    WsyncError::new(ErrorCode::EndpointNotFound, format!("content fetch failed: {err}")).with_context("url", url)
}
