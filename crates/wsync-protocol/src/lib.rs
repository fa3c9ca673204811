// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod engine;
mod soap;
mod transport;
mod types;

pub use engine::SyncEngine;
pub use soap::SoapTransport;
pub use transport::SyncTransport;
pub use types::{
    CrossLinkedPackage, ExtendedFileInfo, RevisionIdListResponse, ServiceConfig, SourceFilter,
    SyncKind, SyncProgress,
};
pub use wsync_error::CancelToken;

/// Default upstream sync endpoint, per the external-interfaces contract.
pub const DEFAULT_UPSTREAM_ENDPOINT: &str =
    "https://sws.update.microsoft.com/ServerSyncWebService/ServerSyncWebService.asmx";
