//! The wire operation this crate drives content fetches through.

use async_trait::async_trait;
use tokio::io::AsyncWrite;
use wsync_error::WsyncError;

/// Fetches one file's bytes into a caller-supplied sink, optionally
/// resuming from a byte offset. Production code talks to the content
/// CDN over HTTPS ([`crate::HttpContentTransport`]); tests substitute an
/// in-memory fake.
#[async_trait]
pub trait ContentTransport: Send + Sync {
    /// Write `url`'s body into `sink`, requesting a byte range starting
    /// at `offset` if `offset > 0`.
    ///
    /// Returns `true` iff the server honored the range (`sink` received
    /// only the bytes from `offset` onward). Returns `false` if it did
    /// not: `sink` received the *entire* file from byte zero regardless
    /// of `offset`, and the caller must discard whatever it had staged
    /// before this call.
    async fn fetch_into(
        &self,
        url: &str,
        offset: u64,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<bool, WsyncError>;
}
