// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod http;
mod rewrite;
mod transport;

pub use http::{DEFAULT_TIMEOUT, HttpContentTransport};
pub use rewrite::UrlRewritePolicy;
pub use transport::ContentTransport;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use base64::Engine as _;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use wsync_error::{CancelToken, ErrorCode, WsyncError};
use wsync_metadata::{ContentFile, FileDigest};

/// Default worker-pool parallelism for [`ContentStore::download`].
pub const DEFAULT_PARALLELISM: usize = 4;

/// Hash-mismatch retries before a file's download surfaces `ContentCorrupt`.
const HASH_RETRIES: u32 = 3;

/// Live counters for an in-flight [`ContentStore::download`] call.
///
/// Poll [`ContentStore::queued_count`]/[`ContentStore::queued_size`]/
/// [`ContentStore::downloaded_size`] from another task to observe
/// progress; the counters reset to zero at the start of each `download` call.
#[derive(Debug, Default)]
pub struct DownloadCounters {
    queued_count: AtomicU64,
    queued_size: AtomicU64,
    downloaded_size: AtomicU64,
}

impl DownloadCounters {
    fn reset(&self) {
        self.queued_count.store(0, Ordering::SeqCst);
        self.queued_size.store(0, Ordering::SeqCst);
        self.downloaded_size.store(0, Ordering::SeqCst);
    }

    /// Files queued for this download (excludes ones already present).
    #[must_use]
    pub fn queued_count(&self) -> u64 {
        self.queued_count.load(Ordering::SeqCst)
    }

    /// Total declared size, in bytes, of queued files.
    #[must_use]
    pub fn queued_size(&self) -> u64 {
        self.queued_size.load(Ordering::SeqCst)
    }

    /// Bytes of completed, verified files written so far.
    #[must_use]
    pub fn downloaded_size(&self) -> u64 {
        self.downloaded_size.load(Ordering::SeqCst)
    }
}

/// Outcome of a [`ContentStore::download`] call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DownloadReport {
    /// Files fetched and verified during this call.
    pub downloaded: usize,
    /// Files already present on disk and skipped.
    pub already_present: usize,
}

struct Inner<T: ContentTransport> {
    root: PathBuf,
    transport: T,
    parallelism: usize,
    policy: UrlRewritePolicy,
    counters: DownloadCounters,
}

/// Digest-addressed local content store: download, verify, and serve
/// update content files by primary digest.
///
/// Cheap to clone (an `Arc` around shared state), so a handle can be
/// moved into each worker-pool task spawned by [`ContentStore::download`].
pub struct ContentStore<T: ContentTransport + 'static>(Arc<Inner<T>>);

impl<T: ContentTransport + 'static> Clone for ContentStore<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: ContentTransport + 'static> ContentStore<T> {
    /// Open a content store rooted at `root` (created lazily on first
    /// write), fetching through `transport` with the default
    /// worker-pool parallelism ([`DEFAULT_PARALLELISM`]).
    pub fn new(root: impl Into<PathBuf>, transport: T, policy: UrlRewritePolicy) -> Self {
        Self::with_parallelism(root, transport, policy, DEFAULT_PARALLELISM)
    }

    /// Like [`ContentStore::new`], overriding worker-pool parallelism.
    pub fn with_parallelism(
        root: impl Into<PathBuf>,
        transport: T,
        policy: UrlRewritePolicy,
        parallelism: usize,
    ) -> Self {
        Self(Arc::new(Inner {
            root: root.into(),
            transport,
            parallelism: parallelism.max(1),
            policy,
            counters: DownloadCounters::default(),
        }))
    }

    /// The root directory this store persists under.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.0.root
    }

    /// Queued file count for the in-flight (or most recent) `download` call.
    #[must_use]
    pub fn queued_count(&self) -> u64 {
        self.0.counters.queued_count()
    }

    /// Queued byte total for the in-flight (or most recent) `download` call.
    #[must_use]
    pub fn queued_size(&self) -> u64 {
        self.0.counters.queued_size()
    }

    /// Bytes downloaded so far in the in-flight (or most recent) `download` call.
    #[must_use]
    pub fn downloaded_size(&self) -> u64 {
        self.0.counters.downloaded_size()
    }

    /// Whether `digest`'s content is present and verified on disk.
    #[must_use]
    pub fn contains(&self, digest: &FileDigest) -> bool {
        self.final_path(digest).exists()
    }

    /// Open `digest`'s content file for reading, if present.
    pub async fn get(&self, digest: &FileDigest) -> Result<fs::File, WsyncError> {
        let path = self.final_path(digest);
        fs::File::open(&path)
            .await
            .map_err(|e| io_error(format!("opening {}", path.display()), e))
    }

    /// Download, verify, and stage every file named in `files`, skipping
    /// ones already present. Runs a bounded worker pool (this store's
    /// configured parallelism); `cancel` is checked before dispatching
    /// each file and between hash-mismatch retries.
    ///
    /// Files sharing a primary digest collapse to a single download
    /// within this call (the same file bundled by two different
    /// updates is fetched once).
    pub async fn download(&self, files: &[ContentFile], cancel: &CancelToken) -> Result<DownloadReport, WsyncError> {
        self.0.counters.reset();
        fs::create_dir_all(self.staging_dir())
            .await
            .map_err(|e| io_error("creating staging directory", e))?;

        let mut unique: BTreeMap<String, ContentFile> = BTreeMap::new();
        for file in files {
            let Some(digest) = file.primary_digest() else {
                warn!(target: "wsync.content", file = %file.file_name, "file declares no digest, skipping");
                continue;
            };
            unique.entry(digest_key(digest)).or_insert_with(|| file.clone());
        }

        let mut already_present = 0usize;
        let mut queue = Vec::new();
        for file in unique.into_values() {
            let digest = file.primary_digest().expect("filtered above").clone();
            if self.contains(&digest) {
                already_present += 1;
                continue;
            }
            self.0.counters.queued_count.fetch_add(1, Ordering::SeqCst);
            self.0.counters.queued_size.fetch_add(file.size, Ordering::SeqCst);
            queue.push(file);
        }

        let semaphore = Arc::new(Semaphore::new(self.0.parallelism));
        let mut tasks = JoinSet::new();
        for file in queue {
            cancel.check()?;
            let semaphore = semaphore.clone();
            let store = self.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore is never closed");
                store.download_one(&file, &cancel).await
            });
        }

        let mut downloaded = 0usize;
        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let outcome =
                joined.map_err(|e| WsyncError::new(ErrorCode::Internal, format!("download task panicked: {e}")))?;
            match outcome {
                Ok(bytes) => {
                    self.0.counters.downloaded_size.fetch_add(bytes, Ordering::SeqCst);
                    downloaded += 1;
                }
                Err(err) if first_error.is_none() => first_error = Some(err),
                Err(_) => {}
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }

        Ok(DownloadReport {
            downloaded,
            already_present,
        })
    }

    async fn download_one(&self, file: &ContentFile, cancel: &CancelToken) -> Result<u64, WsyncError> {
        let digest = file
            .primary_digest()
            .ok_or_else(|| WsyncError::new(ErrorCode::Internal, "content file declares no digest"))?
            .clone();
        let url = self.resolve_url(file)?;
        let staging_path = self.staging_path(&digest);
        let final_path = self.final_path(&digest);

        let mut attempt = 0u32;
        loop {
            cancel.check()?;
            let offset = staged_len(&staging_path).await;

            {
                let mut sink = fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&staging_path)
                    .await
                    .map_err(|e| io_error(format!("opening {}", staging_path.display()), e))?;
                let resumed = self.0.transport.fetch_into(&url, offset, &mut sink).await?;
                if !resumed && offset > 0 {
                    drop(sink);
                    let _ = fs::remove_file(&staging_path).await;
                    continue;
                }
            }

            if digest.algorithm.eq_ignore_ascii_case("sha256") {
                let actual = hash_file(&staging_path).await?;
                let expected = decode_digest(&digest)?;
                if actual.as_slice() != expected.as_slice() {
                    let _ = fs::remove_file(&staging_path).await;
                    attempt += 1;
                    if attempt >= HASH_RETRIES {
                        return Err(WsyncError::content_corrupt(
                            digest_key(&digest),
                            hex_encode(&expected),
                            hex_encode(&actual),
                        ));
                    }
                    warn!(
                        target: "wsync.content",
                        file = %file.file_name,
                        attempt,
                        "downloaded content failed hash verification, retrying"
                    );
                    continue;
                }
            } else {
                debug!(
                    target: "wsync.content",
                    algorithm = %digest.algorithm,
                    "digest algorithm not verified by this store"
                );
            }

            if let Some(parent) = final_path.parent() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| io_error(format!("creating {}", parent.display()), e))?;
            }
            fs::rename(&staging_path, &final_path)
                .await
                .map_err(|e| io_error("staging content into place", e))?;
            return Ok(file.size);
        }
    }

    fn resolve_url(&self, file: &ContentFile) -> Result<String, WsyncError> {
        file.urls
            .first()
            .and_then(|u| self.0.policy.resolve(u))
            .ok_or_else(|| {
                WsyncError::new(
                    ErrorCode::Internal,
                    format!("{} declares no usable content URL", file.file_name),
                )
            })
    }

    fn staging_dir(&self) -> PathBuf {
        self.0.root.join("staging")
    }

    fn final_path(&self, digest: &FileDigest) -> PathBuf {
        self.digest_path(self.0.root.join("content"), digest)
    }

    fn staging_path(&self, digest: &FileDigest) -> PathBuf {
        self.digest_path(self.staging_dir(), digest)
    }

    fn digest_path(&self, base: PathBuf, digest: &FileDigest) -> PathBuf {
        let name = decode_digest(digest)
            .map(|bytes| hex_encode(&bytes))
            .unwrap_or_else(|_| sanitize_filename(&digest.base64));
        base.join(digest.algorithm.to_ascii_lowercase()).join(name)
    }
}

fn digest_key(digest: &FileDigest) -> String {
    format!("{}:{}", digest.algorithm, digest.base64)
}

fn sanitize_filename(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn decode_digest(digest: &FileDigest) -> Result<Vec<u8>, WsyncError> {
    base64::engine::general_purpose::STANDARD
        .decode(&digest.base64)
        .map_err(|e| WsyncError::new(ErrorCode::Internal, format!("malformed base64 digest: {e}")))
}

async fn staged_len(path: &Path) -> u64 {
    fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}

async fn hash_file(path: &Path) -> Result<[u8; 32], WsyncError> {
    let mut file = fs::File::open(path)
        .await
        .map_err(|e| io_error(format!("reading {}", path.display()), e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|e| io_error(format!("hashing {}", path.display()), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}

fn io_error(context: impl std::fmt::Display, err: std::io::Error) -> WsyncError {
    WsyncError::new(ErrorCode::Internal, format!("{context}: {err}")).with_context("io_error", err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::io::AsyncWriteExt;

    #[derive(Default)]
    struct FakeTransport {
        bodies: Mutex<BTreeMap<String, Vec<u8>>>,
        supports_resume: bool,
        fail_until_attempt: Mutex<BTreeMap<String, u32>>,
    }

    impl FakeTransport {
        fn with_body(url: &str, data: Vec<u8>) -> Self {
            let mut bodies = BTreeMap::new();
            bodies.insert(url.to_string(), data);
            Self {
                bodies: Mutex::new(bodies),
                supports_resume: true,
                ..Self::default()
            }
        }
    }

    #[async_trait::async_trait]
    impl ContentTransport for FakeTransport {
        async fn fetch_into(
            &self,
            url: &str,
            offset: u64,
            sink: &mut (dyn tokio::io::AsyncWrite + Send + Unpin),
        ) -> Result<bool, WsyncError> {
            let body = self.bodies.lock().unwrap().get(url).cloned().ok_or_else(|| {
                WsyncError::new(ErrorCode::EndpointNotFound, format!("no such url {url}"))
            })?;

            if let Some(remaining) = self.fail_until_attempt.lock().unwrap().get_mut(url) {
                if *remaining > 0 {
                    *remaining -= 1;
                    // Corrupt write: one flipped byte, still same length.
                    let mut corrupt = body.clone();
                    if let Some(b) = corrupt.first_mut() {
                        *b ^= 0xFF;
                    }
                    sink.write_all(&corrupt[offset as usize..]).await.unwrap();
                    return Ok(offset > 0 && self.supports_resume);
                }
            }

            if self.supports_resume {
                sink.write_all(&body[offset.min(body.len() as u64) as usize..])
                    .await
                    .unwrap();
                Ok(offset > 0)
            } else {
                sink.write_all(&body).await.unwrap();
                Ok(false)
            }
        }
    }

    fn digest_for(data: &[u8]) -> FileDigest {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let digest: [u8; 32] = hasher.finalize().into();
        FileDigest {
            algorithm: "SHA256".to_string(),
            base64: base64::engine::general_purpose::STANDARD.encode(digest),
        }
    }

    fn file_with(name: &str, url: &str, data: &[u8]) -> ContentFile {
        ContentFile {
            file_name: name.to_string(),
            size: data.len() as u64,
            digests: vec![digest_for(data)],
            urls: vec![wsync_metadata::FileUrls {
                mu_url: Some(url.to_string()),
                uss_url: None,
            }],
            patching_type: None,
        }
    }

    #[tokio::test]
    async fn download_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let data = b"hello content store".to_vec();
        let transport = FakeTransport::with_body("https://cdn.example/a", data.clone());
        let store = ContentStore::new(dir.path(), transport, UrlRewritePolicy::PreferMu);

        let file = file_with("a.cab", "https://cdn.example/a", &data);
        let cancel = CancelToken::new();
        let report = store.download(&[file.clone()], &cancel).await.unwrap();
        assert_eq!(report.downloaded, 1);
        assert_eq!(report.already_present, 0);

        assert!(store.contains(&file.digests[0]));
        let mut read_back = Vec::new();
        store
            .get(&file.digests[0])
            .await
            .unwrap()
            .read_to_end(&mut read_back)
            .await
            .unwrap();
        assert_eq!(read_back, data);
    }

    #[tokio::test]
    async fn second_download_skips_already_present() {
        let dir = tempfile::tempdir().unwrap();
        let data = b"payload".to_vec();
        let transport = FakeTransport::with_body("https://cdn.example/b", data.clone());
        let store = ContentStore::new(dir.path(), transport, UrlRewritePolicy::PreferMu);
        let file = file_with("b.cab", "https://cdn.example/b", &data);
        let cancel = CancelToken::new();

        store.download(&[file.clone()], &cancel).await.unwrap();
        let second = store.download(&[file], &cancel).await.unwrap();
        assert_eq!(second.downloaded, 0);
        assert_eq!(second.already_present, 1);
    }

    #[tokio::test]
    async fn duplicate_digest_in_one_call_downloads_once() {
        let dir = tempfile::tempdir().unwrap();
        let data = b"shared payload".to_vec();
        let transport = FakeTransport::with_body("https://cdn.example/c", data.clone());
        let store = ContentStore::new(dir.path(), transport, UrlRewritePolicy::PreferMu);
        let file_a = file_with("c1.cab", "https://cdn.example/c", &data);
        let file_b = file_with("c2.cab", "https://cdn.example/c", &data);
        let cancel = CancelToken::new();

        let report = store.download(&[file_a, file_b], &cancel).await.unwrap();
        assert_eq!(report.downloaded, 1);
    }

    #[tokio::test]
    async fn hash_mismatch_retries_then_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let data = b"retry me".to_vec();
        let transport = FakeTransport::with_body("https://cdn.example/d", data.clone());
        transport
            .fail_until_attempt
            .lock()
            .unwrap()
            .insert("https://cdn.example/d".to_string(), 2);
        let store = ContentStore::new(dir.path(), transport, UrlRewritePolicy::PreferMu);
        let file = file_with("d.cab", "https://cdn.example/d", &data);
        let cancel = CancelToken::new();

        let report = store.download(&[file], &cancel).await.unwrap();
        assert_eq!(report.downloaded, 1);
    }

    #[tokio::test]
    async fn persistent_hash_mismatch_surfaces_content_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let data = b"never matches".to_vec();
        let transport = FakeTransport::with_body("https://cdn.example/e", data.clone());
        transport
            .fail_until_attempt
            .lock()
            .unwrap()
            .insert("https://cdn.example/e".to_string(), u32::MAX);
        let store = ContentStore::new(dir.path(), transport, UrlRewritePolicy::PreferMu);
        let file = file_with("e.cab", "https://cdn.example/e", &data);
        let cancel = CancelToken::new();

        let err = store.download(&[file], &cancel).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ContentCorrupt);
    }

    #[tokio::test]
    async fn counters_reflect_queued_and_downloaded_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let data = vec![0u8; 1024];
        let transport = FakeTransport::with_body("https://cdn.example/f", data.clone());
        let store = ContentStore::new(dir.path(), transport, UrlRewritePolicy::PreferMu);
        let file = file_with("f.cab", "https://cdn.example/f", &data);
        let cancel = CancelToken::new();

        store.download(&[file], &cancel).await.unwrap();
        assert_eq!(store.queued_count(), 1);
        assert_eq!(store.queued_size(), 1024);
        assert_eq!(store.downloaded_size(), 1024);
    }

    #[tokio::test]
    async fn cancellation_before_dispatch_is_observed() {
        let dir = tempfile::tempdir().unwrap();
        let data = b"x".to_vec();
        let transport = FakeTransport::with_body("https://cdn.example/g", data.clone());
        let store = ContentStore::new(dir.path(), transport, UrlRewritePolicy::PreferMu);
        let file = file_with("g.cab", "https://cdn.example/g", &data);
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = store.download(&[file], &cancel).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Cancelled);
    }
}
