// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::collections::BTreeSet;
use std::io::{Seek, Write};

use cab::{CabinetBuilder, CabinetWriter, CompressionType};
use tokio::io::AsyncReadExt;
use tracing::{debug, info};
use uuid::Uuid;
use wsync_content::{ContentStore, ContentTransport};
use wsync_error::{ErrorCode, WsyncError};
use wsync_identity::PackageId;
use wsync_metadata::{ContentFile, Package, Prerequisite};
use wsync_store::Store;

const MANIFEST_NAME: &str = "manifest.xml";

/// Errors specific to building a cartridge, before they are translated
/// to [`WsyncError`] at the call boundary.
#[derive(Debug, thiserror::Error)]
pub enum CartridgeError {
    /// A requested identity, or one pulled in by closure, is not
    /// present in the store.
    #[error("identity {0} is not present in the store")]
    UnknownIdentity(PackageId),
    /// A declared content file has not been downloaded into the local
    /// content store, so it cannot be packaged.
    #[error("content file {file_name} is not present in the local content store")]
    MissingContent {
        /// Display name of the missing file, for diagnostics.
        file_name: String,
    },
    /// Writing the cabinet itself failed.
    #[error("cab archive I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CartridgeError> for WsyncError {
    fn from(err: CartridgeError) -> Self {
        let code = match &err {
            CartridgeError::UnknownIdentity(_) | CartridgeError::MissingContent { .. } => {
                ErrorCode::CartridgeIncomplete
            }
            CartridgeError::Io(_) => ErrorCode::Internal,
        };
        WsyncError::new(code, err.to_string())
    }
}

/// Counts of what a successful [`export_cartridge`] call wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CartridgeReport {
    /// Number of updates written (requested plus closure).
    pub update_count: usize,
    /// Number of distinct content files written.
    pub file_count: usize,
}

/// Write a cartridge containing `requested` and everything its
/// prerequisites and bundling require, reading metadata from `store`
/// and content bytes from `content`.
///
/// `out` must support both [`Write`] and [`Seek`] — the cab format
/// writes a header that is patched once the archive size is known.
pub async fn export_cartridge<T, W>(
    store: &Store,
    content: &ContentStore<T>,
    requested: &[PackageId],
    out: W,
) -> Result<CartridgeReport, CartridgeError>
where
    T: ContentTransport + 'static,
    W: Write + Seek,
{
    let closure = closure(store, requested)?;
    debug!(
        target: "wsync.cartridge",
        requested = requested.len(),
        closure = closure.len(),
        "resolved cartridge closure"
    );

    let mut content_files: Vec<(String, ContentFile)> = Vec::new();
    let mut seen_entries: BTreeSet<String> = BTreeSet::new();
    for &id in &closure {
        let Some(files) = store.get_files(id.uuid) else {
            continue;
        };
        for file in files {
            let Some(digest) = file.primary_digest() else {
                continue;
            };
            let entry_name = content_entry_name(digest.algorithm.as_str(), digest.base64.as_str());
            if !seen_entries.insert(entry_name.clone()) {
                continue;
            }
            content_files.push((entry_name, file.clone()));
        }
    }

    let mut builder = CabinetBuilder::new();
    {
        let folder = builder.add_folder(CompressionType::MsZip);
        folder.add_file(MANIFEST_NAME);
        for &id in &closure {
            folder.add_file(update_blob_name(id));
        }
        for (entry_name, _) in &content_files {
            folder.add_file(entry_name.clone());
        }
    }

    let manifest_xml = render_manifest(&closure);

    let mut writer = CabinetWriter::new(builder, out)?;

    if let Some(mut file_writer) = writer.next_file()? {
        file_writer.write_all(manifest_xml.as_bytes())?;
    }

    for &id in &closure {
        let raw_xml = store
            .get_raw_metadata(id.uuid)
            .ok_or(CartridgeError::UnknownIdentity(id))?;
        if let Some(mut file_writer) = writer.next_file()? {
            file_writer.write_all(raw_xml.as_bytes())?;
        }
    }

    for (_, file) in &content_files {
        let digest = file.primary_digest().expect("filtered to files with a primary digest above");
        let mut handle = content
            .get(digest)
            .await
            .map_err(|_| CartridgeError::MissingContent {
                file_name: file.file_name.clone(),
            })?;
        let mut bytes = Vec::with_capacity(file.size as usize);
        handle.read_to_end(&mut bytes).await?;
        if let Some(mut file_writer) = writer.next_file()? {
            file_writer.write_all(&bytes)?;
        }
    }

    writer.finish()?;

    info!(
        target: "wsync.cartridge",
        updates = closure.len(),
        files = content_files.len(),
        "wrote cartridge"
    );

    Ok(CartridgeReport {
        update_count: closure.len(),
        file_count: content_files.len(),
    })
}

/// Transitive closure of `requested` under prerequisites (both
/// `Simple` and the members of `AtLeastOne` groups) and bundling,
/// resolved to each `uuid`'s latest revision in `store` — the set that
/// satisfies invariant 5 (no referenced id outside the export).
fn closure(store: &Store, requested: &[PackageId]) -> Result<Vec<PackageId>, CartridgeError> {
    let mut seen: BTreeSet<Uuid> = BTreeSet::new();
    let mut resolved: Vec<PackageId> = Vec::new();
    let mut stack: Vec<Uuid> = requested.iter().map(|id| id.uuid).collect();

    while let Some(uuid) = stack.pop() {
        if !seen.insert(uuid) {
            continue;
        }
        let package = store
            .get(uuid)
            .ok_or_else(|| CartridgeError::UnknownIdentity(PackageId::new(uuid, 0)))?;
        resolved.push(package.id());

        for prereq in &package.common().prerequisites {
            match prereq {
                Prerequisite::Simple { uuid: req } => stack.push(*req),
                Prerequisite::AtLeastOne { simples, .. } => stack.extend(simples.iter().copied()),
            }
        }
        if let Package::SoftwareUpdate(update) = package {
            stack.extend(update.bundled_updates.iter().map(|id| id.uuid));
        }
    }

    resolved.sort();
    Ok(resolved)
}

fn render_manifest(ids: &[PackageId]) -> String {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<Cartridge>\n");
    for &id in ids {
        xml.push_str(&format!(
            "  <Update id=\"{}\" revision=\"{}\" file=\"{}\"/>\n",
            id.uuid,
            id.revision,
            update_blob_name(id)
        ));
    }
    xml.push_str("</Cartridge>\n");
    xml
}

fn update_blob_name(id: PackageId) -> String {
    format!("updates/{}-{}.xml", id.uuid, id.revision)
}

fn content_entry_name(algorithm: &str, base64_digest: &str) -> String {
    let hex: String = base64_digest
        .bytes()
        .filter(|b| b.is_ascii_alphanumeric())
        .map(|b| b as char)
        .collect();
    format!("content/{}-{}.bin", algorithm.to_ascii_lowercase(), hex)
}
