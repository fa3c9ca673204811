//! The anchored, batched sync loop: `getCategories` / `getUpdates`.

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use uuid::Uuid;
use wsync_auth::Token;
use wsync_error::{ErrorCategory, ErrorCode, WsyncError};
use wsync_graph::CategoryResolver;
use wsync_identity::PackageId;
use wsync_metadata::Package;

use crate::transport::SyncTransport;
use crate::types::{
    CrossLinkedPackage, ExtendedFileInfo, ServiceConfig, SourceFilter, SyncKind, SyncProgress,
};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Drives `getCategories`/`getUpdates` against a [`SyncTransport`].
pub struct SyncEngine<T: SyncTransport> {
    transport: T,
    max_retries: u32,
}

impl<T: SyncTransport> SyncEngine<T> {
    /// Wrap a transport. `max_retries` bounds retries per batch on
    /// transient transport errors (exponential backoff, 1s -> 30s cap).
    pub fn new(transport: T, max_retries: u32) -> Self {
        Self {
            transport,
            max_retries,
        }
    }

    /// `getCategories(baselineAnchor?) -> (packages, newAnchor)`.
    ///
    /// `known_products`/`known_classifications` seed category
    /// resolution (products form a forest via category prerequisites,
    /// so a product parsed earlier in the same call can be a parent of
    /// one parsed later).
    pub async fn get_categories(
        &self,
        token: &Token,
        baseline_anchor: Option<&str>,
        known_products: &BTreeSet<Uuid>,
        known_classifications: &BTreeSet<Uuid>,
        mut progress: impl FnMut(SyncProgress),
        cancel: &crate::CancelToken,
    ) -> Result<(Vec<CrossLinkedPackage>, String), WsyncError> {
        let config = self.get_config_data(token).await?;
        let filter = SourceFilter::default();
        let list = self
            .retry(|| {
                self.transport
                    .get_revision_id_list(token, &filter, baseline_anchor)
            })
            .await?;

        let mut known_products = known_products.clone();
        let mut known_classifications = known_classifications.clone();
        let mut out = Vec::with_capacity(list.new_updates.len());
        let total = list.new_updates.len() as u64;

        for batch in list.new_updates.chunks(batch_size(&config)) {
            if cancel.is_cancelled() {
                return Err(WsyncError::new(ErrorCode::Cancelled, "sync cancelled"));
            }

            let xmls = self
                .retry(|| self.transport.get_update_data(token, batch))
                .await?;

            for xml in &xmls {
                let pkg = wsync_metadata::parse_update(xml)?;
                match &pkg {
                    Package::ProductCategory(_) => {
                        known_products.insert(pkg.id().uuid);
                    }
                    Package::ClassificationCategory(_) => {
                        known_classifications.insert(pkg.id().uuid);
                    }
                    _ => {}
                }
                let (product_ids, classification_ids) =
                    CategoryResolver::resolve(&pkg, &known_products, &known_classifications);
                out.push(CrossLinkedPackage {
                    package: pkg,
                    raw_xml: xml.clone(),
                    product_ids,
                    classification_ids,
                });
            }

            progress(SyncProgress {
                kind: SyncKind::Categories,
                current: out.len() as u64,
                total,
            });
        }

        Ok((out, list.anchor))
    }

    /// `getUpdates(sourceFilter, baselineAnchor?) -> (packages, newAnchor)`.
    ///
    /// After parsing, merges signed content URLs obtained via a second
    /// batched `GetExtendedUpdateInfo` pass into each package's files.
    pub async fn get_updates(
        &self,
        token: &Token,
        source_filter: &SourceFilter,
        baseline_anchor: Option<&str>,
        known_products: &BTreeSet<Uuid>,
        known_classifications: &BTreeSet<Uuid>,
        mut progress: impl FnMut(SyncProgress),
        cancel: &crate::CancelToken,
    ) -> Result<(Vec<CrossLinkedPackage>, String), WsyncError> {
        let config = self.get_config_data(token).await?;
        let list = self
            .retry(|| {
                self.transport
                    .get_revision_id_list(token, source_filter, baseline_anchor)
            })
            .await?;

        let mut out = Vec::with_capacity(list.new_updates.len());
        let total = list.new_updates.len() as u64;

        for batch in list.new_updates.chunks(batch_size(&config)) {
            if cancel.is_cancelled() {
                return Err(WsyncError::new(ErrorCode::Cancelled, "sync cancelled"));
            }

            let xmls = self
                .retry(|| self.transport.get_update_data(token, batch))
                .await?;
            let mut packages: Vec<Package> = xmls
                .iter()
                .map(|xml| wsync_metadata::parse_update(xml))
                .collect::<Result<_, _>>()?;

            let extended = self
                .retry(|| self.transport.get_extended_update_info(token, batch))
                .await?;
            for pkg in &mut packages {
                merge_extended_urls(pkg, &extended);
            }

            for (pkg, raw_xml) in packages.into_iter().zip(xmls.into_iter()) {
                let (product_ids, classification_ids) =
                    CategoryResolver::resolve(&pkg, known_products, known_classifications);
                out.push(CrossLinkedPackage {
                    package: pkg,
                    raw_xml,
                    product_ids,
                    classification_ids,
                });
            }

            progress(SyncProgress {
                kind: SyncKind::Updates,
                current: out.len() as u64,
                total,
            });
        }

        Ok((out, list.anchor))
    }

    async fn get_config_data(&self, token: &Token) -> Result<ServiceConfig, WsyncError> {
        self.retry(|| self.transport.get_config_data(token)).await
    }

    async fn retry<F, Fut, R>(&self, mut op: F) -> Result<R, WsyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R, WsyncError>>,
    {
        let mut delay = INITIAL_BACKOFF;
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(err) if is_retryable(&err) && attempt + 1 < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        target: "wsync_protocol",
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        code = err.code.as_str(),
                        "batch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(MAX_BACKOFF);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn is_retryable(err: &WsyncError) -> bool {
    err.category() == ErrorCategory::Transport
}

fn batch_size(config: &ServiceConfig) -> usize {
    (config.max_number_of_updates_per_request as usize).max(1)
}

fn merge_extended_urls(pkg: &mut Package, extended: &[ExtendedFileInfo]) {
    for file in &mut pkg.common_mut().files {
        let Some(primary) = file.primary_digest().cloned() else {
            continue;
        };
        if let Some(info) = extended.iter().find(|e| e.digest == primary) {
            file.urls = info.urls.clone();
        }
    }
}
