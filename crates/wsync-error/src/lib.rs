// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// DNS/TCP/TLS/SOAP transport errors talking to the upstream sync endpoint.
    Transport,
    /// Three-leg authentication protocol errors.
    Auth,
    /// XML metadata parsing errors.
    Parse,
    /// Metadata store errors (baseline chain, commit, invariants).
    Store,
    /// Content store errors (download, hashing, verification).
    Content,
    /// Filter engine errors.
    Filter,
    /// Cartridge export/import errors.
    Cartridge,
    /// Cooperative cancellation.
    Cancelled,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Transport => "transport",
            Self::Auth => "auth",
            Self::Parse => "parse",
            Self::Store => "store",
            Self::Content => "content",
            Self::Filter => "filter",
            Self::Cartridge => "cartridge",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant corresponds to one of the error kinds enumerated in the
/// failure semantics of this system, and serializes to
/// `SCREAMING_SNAKE_CASE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// DNS/TCP/TLS failure contacting the upstream sync endpoint.
    EndpointNotFound,
    /// Access cookie has expired and a second refresh attempt also failed.
    AuthExpired,
    /// Upstream rejected the cached authorization cookie; triggers internal restart.
    InvalidAuthorizationCookie,
    /// Translated SOAP fault from the upstream server, retained verbatim.
    UpstreamServerError,
    /// XML parse error at a specific XPath.
    ParseError,
    /// `HandlerSpecificData/@xsi:type` names a handler type this parser does not support.
    UnknownHandlerType,
    /// A store's baseline chain could not be fully loaded.
    BaselineMissing,
    /// Attempted commit would regress a uuid's revision.
    RevisionRegression,
    /// Downloaded content's digest does not match the declared one after retry.
    ContentCorrupt,
    /// A cartridge export would reference an identity or content file
    /// outside the export, violating the closed-set invariant.
    CartridgeIncomplete,
    /// Operation was cancelled cooperatively.
    Cancelled,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::EndpointNotFound => ErrorCategory::Transport,
            Self::AuthExpired | Self::InvalidAuthorizationCookie => ErrorCategory::Auth,
            Self::UpstreamServerError => ErrorCategory::Transport,
            Self::ParseError | Self::UnknownHandlerType => ErrorCategory::Parse,
            Self::BaselineMissing | Self::RevisionRegression => ErrorCategory::Store,
            Self::ContentCorrupt => ErrorCategory::Content,
            Self::CartridgeIncomplete => ErrorCategory::Cartridge,
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// Stable `&'static str` representation, e.g. `"ENDPOINT_NOT_FOUND"`.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EndpointNotFound => "ENDPOINT_NOT_FOUND",
            Self::AuthExpired => "AUTH_EXPIRED",
            Self::InvalidAuthorizationCookie => "INVALID_AUTHORIZATION_COOKIE",
            Self::UpstreamServerError => "UPSTREAM_SERVER_ERROR",
            Self::ParseError => "PARSE_ERROR",
            Self::UnknownHandlerType => "UNKNOWN_HANDLER_TYPE",
            Self::BaselineMissing => "BASELINE_MISSING",
            Self::RevisionRegression => "REVISION_REGRESSION",
            Self::ContentCorrupt => "CONTENT_CORRUPT",
            Self::CartridgeIncomplete => "CARTRIDGE_INCOMPLETE",
            Self::Cancelled => "CANCELLED",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// WsyncError
// ---------------------------------------------------------------------------

/// Unified wsyncd error.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// source error for cause-chaining, and arbitrary structured context
/// (e.g. `{"xpath": "...", "uuid": "..."}`).
///
/// # Examples
///
/// ```
/// use wsync_error::{ErrorCode, WsyncError};
///
/// let err = WsyncError::new(ErrorCode::RevisionRegression, "revision went backwards")
///     .with_context("uuid", "11111111-1111-1111-1111-111111111111")
///     .with_context("old_revision", 5)
///     .with_context("new_revision", 3);
///
/// assert_eq!(err.category(), wsync_error::ErrorCategory::Store);
/// ```
pub struct WsyncError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl WsyncError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialization
    /// fails, the entry is silently skipped.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.category()`.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// Construct an [`ErrorCode::UpstreamServerError`] carrying the
    /// translated SOAP fault code and message verbatim.
    pub fn upstream_fault(fault_code: impl Into<String>, fault_string: impl Into<String>) -> Self {
        let fault_code = fault_code.into();
        let fault_string = fault_string.into();
        Self::new(
            ErrorCode::UpstreamServerError,
            format!("upstream server fault {fault_code}: {fault_string}"),
        )
        .with_context("fault_code", fault_code)
        .with_context("fault_string", fault_string)
    }

    /// Construct an [`ErrorCode::ParseError`] anchored at the given XPath.
    pub fn parse_error(xpath: impl Into<String>, reason: impl Into<String>) -> Self {
        let xpath = xpath.into();
        let reason = reason.into();
        Self::new(ErrorCode::ParseError, format!("{xpath}: {reason}"))
            .with_context("xpath", xpath)
            .with_context("reason", reason)
    }

    /// Construct an [`ErrorCode::UnknownHandlerType`] error.
    pub fn unknown_handler_type(xsi_type: impl Into<String>) -> Self {
        let xsi_type = xsi_type.into();
        Self::new(
            ErrorCode::UnknownHandlerType,
            format!("unsupported handler type: {xsi_type}"),
        )
        .with_context("xsi_type", xsi_type)
    }

    /// Construct a [`ErrorCode::RevisionRegression`] error.
    pub fn revision_regression(uuid: impl fmt::Display, old_rev: u32, new_rev: u32) -> Self {
        Self::new(
            ErrorCode::RevisionRegression,
            format!("uuid {uuid} attempted to regress from revision {old_rev} to {new_rev}"),
        )
        .with_context("uuid", uuid.to_string())
        .with_context("old_revision", old_rev)
        .with_context("new_revision", new_rev)
    }

    /// Construct a [`ErrorCode::ContentCorrupt`] error.
    pub fn content_corrupt(
        digest: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        let digest = digest.into();
        let expected = expected.into();
        let actual = actual.into();
        Self::new(
            ErrorCode::ContentCorrupt,
            format!("digest mismatch for {digest}: expected {expected}, got {actual}"),
        )
        .with_context("digest", digest)
        .with_context("expected", expected)
        .with_context("actual", actual)
    }
}

impl fmt::Debug for WsyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsyncError")
            .field("code", &self.code)
            .field("message", &self.message)
            .field("context", &self.context)
            .finish()
    }
}

impl fmt::Display for WsyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for WsyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// CancelToken
// ---------------------------------------------------------------------------

/// A cooperative cancellation flag threaded through sync, download, and
/// copy operations. Checked between batches/files; in-flight I/O
/// always runs to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A fresh, not-yet-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent; observers see it on their next check.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Return `Err(ErrorCode::Cancelled)` if cancellation was requested.
    pub fn check(&self) -> Result<(), WsyncError> {
        if self.is_cancelled() {
            Err(WsyncError::new(ErrorCode::Cancelled, "operation cancelled"))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_is_observed_after_clone() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(token.check().is_err());
    }

    #[test]
    fn category_mapping_is_stable() {
        assert_eq!(ErrorCode::EndpointNotFound.category(), ErrorCategory::Transport);
        assert_eq!(ErrorCode::AuthExpired.category(), ErrorCategory::Auth);
        assert_eq!(
            ErrorCode::InvalidAuthorizationCookie.category(),
            ErrorCategory::Auth
        );
        assert_eq!(ErrorCode::ParseError.category(), ErrorCategory::Parse);
        assert_eq!(ErrorCode::BaselineMissing.category(), ErrorCategory::Store);
        assert_eq!(ErrorCode::ContentCorrupt.category(), ErrorCategory::Content);
        assert_eq!(ErrorCode::Cancelled.category(), ErrorCategory::Cancelled);
    }

    #[test]
    fn as_str_round_trips_through_serde() {
        for code in [
            ErrorCode::EndpointNotFound,
            ErrorCode::UpstreamServerError,
            ErrorCode::RevisionRegression,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }

    #[test]
    fn builder_attaches_context() {
        let err = WsyncError::revision_regression(uuid::Uuid::nil(), 5, 3);
        assert_eq!(err.code, ErrorCode::RevisionRegression);
        assert_eq!(err.context.get("old_revision").unwrap(), &serde_json::json!(5));
        assert_eq!(err.context.get("new_revision").unwrap(), &serde_json::json!(3));
    }
}
