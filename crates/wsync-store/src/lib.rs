// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod indexes;
mod lock;
mod manifest;

pub use indexes::Indexes;
pub use lock::StoreLock;
pub use manifest::{FORMAT_VERSION, Manifest};

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use wsync_error::{CancelToken, ErrorCode, WsyncError};
use wsync_filter::{MetadataFilter, PackageView};
use wsync_graph::CategoryResolver;
use wsync_identity::{PackageId, PackageKind};
use wsync_metadata::{ContentFile, Package};

/// Progress reported by [`Store::reindex`].
#[derive(Debug, Clone, Copy)]
pub struct ReindexProgress {
    /// Packages processed so far.
    pub current: usize,
    /// Total packages to process.
    pub total: usize,
}

/// One package committed into this store's own generation: its parsed
/// form plus the exact raw XML fragment it was parsed from (returned
/// verbatim by [`Store::get_raw_metadata`]).
#[derive(Debug, Clone)]
struct CommittedEntry {
    package: Package,
    raw_xml: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CommittedRecord {
    package: Package,
}

/// A content-addressed, indexed store of parsed update metadata, with
/// optional baseline chaining, transactional commit, and streamed
/// filtered export.
///
/// Staged packages ([`Store::add`], [`Store::add_many`]) are invisible
/// to every read operation until [`Store::commit`] succeeds. Opening a
/// store with a `baseline` pointer loads the chain transitively;
/// queries see the union of this generation and its baseline, with
/// later generations shadowing earlier ones per `uuid`.
pub struct Store {
    root: PathBuf,
    manifest: Manifest,
    baseline: Option<Box<Store>>,
    committed: BTreeMap<Uuid, CommittedEntry>,
    indexes: Indexes,
    pending: Vec<(Package, String)>,
    _lock: StoreLock,
}

impl Store {
    /// Open an existing store at `path`. Fails if no store exists, or
    /// if its baseline chain does not fully resolve.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, WsyncError> {
        let root = path.as_ref().to_path_buf();
        if !root.join(MANIFEST_FILE).exists() {
            return Err(WsyncError::new(
                ErrorCode::Internal,
                format!("no store at {}", root.display()),
            ));
        }
        Self::load(root)
    }

    /// Open the store at `path`, creating an empty one if it does not
    /// yet exist.
    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self, WsyncError> {
        let root = path.as_ref().to_path_buf();
        if root.join(MANIFEST_FILE).exists() {
            Self::load(root)
        } else {
            Self::create(root)
        }
    }

    /// Discard every committed package and pending staged package,
    /// leaving an empty store with no baseline.
    pub fn erase(&mut self) -> Result<(), WsyncError> {
        self.committed.clear();
        self.pending.clear();
        self.indexes = Indexes::default();
        self.manifest.baseline = None;
        self.baseline = None;

        for dir in ["metadata", "indexes"] {
            let p = self.root.join(dir);
            if p.exists() {
                fs::remove_dir_all(&p).map_err(|e| io_error(format!("erasing {}", p.display()), e))?;
            }
            fs::create_dir_all(&p).map_err(|e| io_error(format!("erasing {}", p.display()), e))?;
        }
        let committed_json = self.root.join(COMMITTED_FILE);
        if committed_json.exists() {
            fs::remove_file(&committed_json)
                .map_err(|e| io_error(format!("erasing {}", committed_json.display()), e))?;
        }

        self.write_manifest()?;
        self.write_committed()?;
        self.write_indexes()
    }

    /// Stage a single package. See [`Store::add_many`].
    pub fn add(&mut self, package: Package, raw_xml: impl Into<String>) {
        self.add_many(std::iter::once((package, raw_xml.into())));
    }

    /// Stage packages for the next [`Store::commit`]. Nothing is
    /// visible to reads until commit succeeds. A `(uuid, revision)`
    /// already present anywhere in the chain at this revision or
    /// higher is silently dropped; a strictly greater revision is
    /// staged to supersede it.
    pub fn add_many(&mut self, packages: impl IntoIterator<Item = (Package, String)>) {
        for (package, raw_xml) in packages {
            let id = package.id();
            if let Some(existing) = self.latest_committed(id.uuid) {
                if id.revision <= existing.package.id().revision {
                    continue;
                }
            }
            self.pending.push((package, raw_xml));
        }
    }

    /// Atomically make every staged package visible and update derived
    /// indexes. Rejects the whole batch (leaving `pending` and the
    /// previously committed state untouched) if any staged package
    /// would regress a `uuid`'s revision.
    pub fn commit(&mut self) -> Result<(), WsyncError> {
        if self.pending.is_empty() {
            return Ok(());
        }

        for (package, _) in &self.pending {
            let id = package.id();
            if let Some(existing) = self.latest_committed(id.uuid) {
                let existing_rev = existing.package.id().revision;
                if id.revision < existing_rev {
                    return Err(WsyncError::revision_regression(
                        id.uuid,
                        existing_rev,
                        id.revision,
                    ));
                }
            }
        }

        let pending = std::mem::take(&mut self.pending);

        // Multiple stage calls before one commit can name the same
        // uuid more than once; collapse to the highest revision.
        let mut by_uuid: BTreeMap<Uuid, (Package, String)> = BTreeMap::new();
        for (package, raw_xml) in pending {
            let uuid = package.id().uuid;
            let keep = match by_uuid.get(&uuid) {
                Some((existing, _)) => package.id().revision > existing.id().revision,
                None => true,
            };
            if keep {
                by_uuid.insert(uuid, (package, raw_xml));
            }
        }

        let mut known_products = BTreeSet::new();
        let mut known_classifications = BTreeSet::new();
        self.collect_known_categories(&mut known_products, &mut known_classifications);
        for (package, _) in by_uuid.values() {
            match package.kind() {
                PackageKind::Product => {
                    known_products.insert(package.id().uuid);
                }
                PackageKind::Classification => {
                    known_classifications.insert(package.id().uuid);
                }
                _ => {}
            }
        }

        for (uuid, (package, raw_xml)) in by_uuid {
            let (product_ids, classification_ids) =
                CategoryResolver::resolve(&package, &known_products, &known_classifications);
            index_entry(
                &mut self.indexes,
                package.id(),
                &package,
                &product_ids,
                &classification_ids,
            );

            let filename = metadata_filename(package.id());
            write_zst(&self.root.join("metadata").join(&filename), raw_xml.as_bytes())
                .map_err(|e| io_error(format!("writing metadata/{filename}"), e))?;

            self.committed.insert(uuid, CommittedEntry { package, raw_xml });
        }

        self.write_committed()?;
        self.write_indexes()?;
        self.write_manifest()
    }

    /// Whether `uuid` resolves anywhere in this store's chain.
    #[must_use]
    pub fn contains(&self, uuid: Uuid) -> bool {
        self.latest_committed(uuid).is_some()
    }

    /// The latest committed revision of `uuid`, if any.
    #[must_use]
    pub fn get(&self, uuid: Uuid) -> Option<&Package> {
        self.latest_committed(uuid).map(|e| &e.package)
    }

    /// The exact raw XML fragment `uuid`'s latest revision was parsed from.
    #[must_use]
    pub fn get_raw_metadata(&self, uuid: Uuid) -> Option<&str> {
        self.latest_committed(uuid).map(|e| e.raw_xml.as_str())
    }

    /// The content files declared by `uuid`'s latest revision.
    #[must_use]
    pub fn get_files(&self, uuid: Uuid) -> Option<&[ContentFile]> {
        self.latest_committed(uuid)
            .map(|e| e.package.common().files.as_slice())
    }

    /// Iterate every package visible in this store's chain, latest
    /// revision per `uuid`, in `uuid` order.
    pub fn iter(&self) -> impl Iterator<Item = &Package> + '_ {
        self.all_latest_entries()
            .into_values()
            .map(|e| &e.package)
            .collect::<Vec<_>>()
            .into_iter()
    }

    /// Like [`Store::iter`], restricted to one [`PackageKind`].
    pub fn iter_kind(&self, kind: PackageKind) -> impl Iterator<Item = &Package> + '_ {
        self.iter().filter(move |p| p.kind() == kind)
    }

    /// Rebuild every derived index from raw committed metadata. Used
    /// after a format upgrade, or to verify incremental updates stayed
    /// consistent with a from-scratch rebuild.
    pub fn reindex(&mut self, mut progress: impl FnMut(ReindexProgress)) -> Result<(), WsyncError> {
        let mut known_products = BTreeSet::new();
        let mut known_classifications = BTreeSet::new();
        self.collect_known_categories(&mut known_products, &mut known_classifications);

        let mut indexes = Indexes::default();
        let total = self.committed.len();
        for (current, entry) in self.committed.values().enumerate() {
            let (product_ids, classification_ids) =
                CategoryResolver::resolve(&entry.package, &known_products, &known_classifications);
            index_entry(
                &mut indexes,
                entry.package.id(),
                &entry.package,
                &product_ids,
                &classification_ids,
            );
            progress(ReindexProgress {
                current: current + 1,
                total,
            });
        }

        self.indexes = indexes;
        self.write_indexes()
    }

    /// Identities of every package in this store's chain whose view
    /// satisfies `filter`, latest revision per `uuid`.
    #[must_use]
    pub fn matching(&self, filter: &MetadataFilter) -> Vec<PackageId> {
        self.all_latest_entries()
            .into_values()
            .filter_map(|entry| {
                let view = self.view_for(&entry.package);
                filter.matches(&view).then(|| entry.package.id())
            })
            .collect()
    }

    /// Stream every package matching `filter` to `sink` as consecutive
    /// raw XML fragments, checking `cancel` between packages.
    ///
    /// Returns the number of packages written.
    pub fn copy_to(
        &self,
        sink: &mut dyn Write,
        filter: &MetadataFilter,
        cancel: &CancelToken,
    ) -> Result<usize, WsyncError> {
        let mut exported = 0usize;
        for entry in self.all_latest_entries().into_values() {
            cancel.check()?;
            let view = self.view_for(&entry.package);
            if !filter.matches(&view) {
                continue;
            }
            sink.write_all(entry.raw_xml.as_bytes())
                .map_err(|e| io_error("writing to copy_to sink", e))?;
            exported += 1;
        }
        Ok(exported)
    }

    fn create(root: PathBuf) -> Result<Self, WsyncError> {
        fs::create_dir_all(&root).map_err(|e| io_error(format!("creating {}", root.display()), e))?;
        fs::create_dir_all(root.join("metadata"))
            .map_err(|e| io_error("creating metadata directory", e))?;
        fs::create_dir_all(root.join("indexes"))
            .map_err(|e| io_error("creating indexes directory", e))?;
        let lock = StoreLock::acquire(&root)?;

        let store = Self {
            root,
            manifest: Manifest::new(),
            baseline: None,
            committed: BTreeMap::new(),
            indexes: Indexes::default(),
            pending: Vec::new(),
            _lock: lock,
        };
        store.write_manifest()?;
        store.write_committed()?;
        store.write_indexes()?;
        Ok(store)
    }

    fn load(root: PathBuf) -> Result<Self, WsyncError> {
        let lock = StoreLock::acquire(&root)?;
        let manifest: Manifest = read_json(&root.join(MANIFEST_FILE))?;

        let baseline = match &manifest.baseline {
            Some(name) => {
                let baseline_path = root.parent().map(|p| p.join(name)).ok_or_else(|| {
                    WsyncError::new(
                        ErrorCode::BaselineMissing,
                        format!(
                            "store at {} has no parent directory to resolve baseline {name:?}",
                            root.display()
                        ),
                    )
                })?;
                let opened = Store::open(&baseline_path).map_err(|e| {
                    WsyncError::new(
                        ErrorCode::BaselineMissing,
                        format!(
                            "baseline {name:?} for store at {} did not resolve: {e}",
                            root.display()
                        ),
                    )
                    .with_context("baseline", name.clone())
                })?;
                Some(Box::new(opened))
            }
            None => None,
        };

        let indexes: Indexes = read_json(&root.join(INDEXES_FILE)).unwrap_or_default();
        let committed = load_committed(&root)?;

        Ok(Self {
            root,
            manifest,
            baseline,
            committed,
            indexes,
            pending: Vec::new(),
            _lock: lock,
        })
    }

    fn latest_committed(&self, uuid: Uuid) -> Option<&CommittedEntry> {
        if let Some(entry) = self.committed.get(&uuid) {
            return Some(entry);
        }
        self.baseline.as_ref().and_then(|b| b.latest_committed(uuid))
    }

    fn all_latest_entries(&self) -> BTreeMap<Uuid, &CommittedEntry> {
        let mut map = match &self.baseline {
            Some(b) => b.all_latest_entries(),
            None => BTreeMap::new(),
        };
        for entry in self.committed.values() {
            map.insert(entry.package.id().uuid, entry);
        }
        map
    }

    fn collect_known_categories(&self, products: &mut BTreeSet<Uuid>, classifications: &mut BTreeSet<Uuid>) {
        if let Some(b) = &self.baseline {
            b.collect_known_categories(products, classifications);
        }
        for entry in self.committed.values() {
            match entry.package.kind() {
                PackageKind::Product => {
                    products.insert(entry.package.id().uuid);
                }
                PackageKind::Classification => {
                    classifications.insert(entry.package.id().uuid);
                }
                _ => {}
            }
        }
    }

    fn categories_for(&self, id: PackageId) -> &[Uuid] {
        if let Some(c) = self.indexes.categories.get(&id.open_id()) {
            return c;
        }
        match &self.baseline {
            Some(b) => b.categories_for(id),
            None => &[],
        }
    }

    fn hardware_ids_for(&self, id: PackageId) -> &[String] {
        if let Some(h) = self.indexes.hardware_ids.get(&id.open_id()) {
            return h;
        }
        match &self.baseline {
            Some(b) => b.hardware_ids_for(id),
            None => &[],
        }
    }

    fn computer_hardware_ids_for(&self, id: PackageId) -> &[Uuid] {
        if let Some(c) = self.indexes.computer_hardware_ids.get(&id.open_id()) {
            return c;
        }
        match &self.baseline {
            Some(b) => b.computer_hardware_ids_for(id),
            None => &[],
        }
    }

    fn is_superseded_by_for(&self, uuid: Uuid) -> &[PackageId] {
        if let Some(s) = self.indexes.is_superseded_by.get(&uuid) {
            return s;
        }
        match &self.baseline {
            Some(b) => b.is_superseded_by_for(uuid),
            None => &[],
        }
    }

    fn view_for<'a>(&'a self, package: &'a Package) -> PackageView<'a> {
        let id = package.id();
        let kb_article = match package {
            Package::SoftwareUpdate(s) => s.kb_article.as_deref(),
            _ => None,
        };
        PackageView {
            id,
            kind: package.kind(),
            title: &package.common().title,
            kb_article,
            categories: self.categories_for(id),
            hardware_ids: self.hardware_ids_for(id),
            computer_hardware_ids: self.computer_hardware_ids_for(id),
            is_superseded_by: self.is_superseded_by_for(id.uuid),
        }
    }

    fn write_manifest(&self) -> Result<(), WsyncError> {
        write_json(&self.root.join(MANIFEST_FILE), &self.manifest)
    }

    fn write_committed(&self) -> Result<(), WsyncError> {
        let records: Vec<CommittedRecord> = self
            .committed
            .values()
            .map(|e| CommittedRecord {
                package: e.package.clone(),
            })
            .collect();
        write_json(&self.root.join(COMMITTED_FILE), &records)
    }

    fn write_indexes(&self) -> Result<(), WsyncError> {
        write_json(&self.root.join(INDEXES_FILE), &self.indexes)
    }
}

/// Manifest member name. Every member of the store's directory-based
/// container is zstd-compressed individually, so that a reader (or this
/// crate's own `reindex`) can touch one member without inflating the rest.
const MANIFEST_FILE: &str = "manifest.json.zst";
const COMMITTED_FILE: &str = "committed.json.zst";
const INDEXES_FILE: &str = "indexes/indexes.json.zst";

fn metadata_filename(id: PackageId) -> String {
    format!("{}_{}.xml.zst", id.uuid, id.revision)
}

fn load_committed(root: &Path) -> Result<BTreeMap<Uuid, CommittedEntry>, WsyncError> {
    let path = root.join(COMMITTED_FILE);
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let records: Vec<CommittedRecord> = read_json(&path)?;

    let mut committed = BTreeMap::new();
    for record in records {
        let id = record.package.id();
        let xml_path = root.join("metadata").join(metadata_filename(id));
        let raw_xml_bytes = read_zst(&xml_path)
            .map_err(|e| io_error(format!("reading {}", xml_path.display()), e))?;
        let raw_xml = String::from_utf8(raw_xml_bytes).map_err(|e| {
            WsyncError::new(ErrorCode::Internal, format!("non-utf8 metadata {}: {e}", xml_path.display()))
        })?;
        committed.insert(
            id.uuid,
            CommittedEntry {
                package: record.package,
                raw_xml,
            },
        );
    }
    Ok(committed)
}

fn index_entry(
    indexes: &mut Indexes,
    id: PackageId,
    package: &Package,
    product_ids: &[Uuid],
    classification_ids: &[Uuid],
) {
    let open_id = id.open_id();
    let common = package.common();
    indexes.titles.insert(open_id.clone(), common.title.clone());
    indexes
        .descriptions
        .insert(open_id.clone(), common.description.clone());
    indexes.creation_dates.insert(open_id.clone(), common.creation_date);

    let mut categories: Vec<Uuid> = product_ids.iter().chain(classification_ids).copied().collect();
    categories.sort();
    categories.dedup();
    indexes.categories.insert(open_id.clone(), categories);

    for file in &common.files {
        for digest in &file.digests {
            let key = format!("{}:{}", digest.algorithm, digest.base64);
            indexes.by_digest.insert(key, (id, file.file_name.clone()));
        }
    }

    if let Package::SoftwareUpdate(update) = package {
        if let Some(kb) = &update.kb_article {
            indexes.kb_article.insert(open_id.clone(), kb.clone());
        }
        if !update.superseded_updates.is_empty() {
            indexes
                .is_superseding
                .insert(open_id.clone(), update.superseded_updates.clone());
        }
        for superseded in &update.superseded_updates {
            indexes.is_superseded_by.entry(*superseded).or_default().push(id);
        }
        if !update.bundled_updates.is_empty() {
            indexes
                .is_bundle
                .insert(open_id.clone(), update.bundled_updates.clone());
        }
        for bundled in &update.bundled_updates {
            indexes.bundled_with.entry(bundled.uuid).or_default().push(id);
        }
    }

    if let Package::DriverUpdate(driver) = package {
        let hardware_ids: Vec<String> = driver.drivers.iter().map(|d| d.hardware_id.clone()).collect();
        if !hardware_ids.is_empty() {
            indexes.hardware_ids.insert(open_id.clone(), hardware_ids);
        }

        let mut computer_hardware_ids: Vec<Uuid> = driver
            .drivers
            .iter()
            .flat_map(|d| {
                d.target_computer_hardware_ids
                    .iter()
                    .chain(&d.distribution_computer_hardware_ids)
            })
            .copied()
            .collect();
        computer_hardware_ids.sort();
        computer_hardware_ids.dedup();
        if !computer_hardware_ids.is_empty() {
            indexes.computer_hardware_ids.insert(open_id, computer_hardware_ids);
        }
    }
}

fn io_error(context: impl std::fmt::Display, err: std::io::Error) -> WsyncError {
    WsyncError::new(ErrorCode::Internal, format!("{context}: {err}")).with_context("io_error", err.to_string())
}

/// Zstd compression level for store members. Members are small,
/// append-only JSON/XML blobs re-written whole on every commit, so a
/// middling level (favoring speed over ratio) is the right tradeoff.
const ZSTD_LEVEL: i32 = 3;

fn read_zst(path: &Path) -> std::io::Result<Vec<u8>> {
    let compressed = fs::read(path)?;
    zstd::stream::decode_all(&compressed[..])
}

fn write_zst(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let compressed = zstd::stream::encode_all(data, ZSTD_LEVEL)?;
    fs::write(path, compressed)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, WsyncError> {
    let bytes = read_zst(path).map_err(|e| io_error(format!("reading {}", path.display()), e))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| WsyncError::new(ErrorCode::Internal, format!("malformed {}: {e}", path.display())))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), WsyncError> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| WsyncError::new(ErrorCode::Internal, format!("serializing {}: {e}", path.display())))?;
    write_zst(path, &bytes).map_err(|e| io_error(format!("writing {}", path.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wsync_metadata::{CategoryPackage, CommonFields, SoftwareUpdatePackage};

    fn uuid_for(byte: u8) -> Uuid {
        Uuid::from_bytes([byte; 16])
    }

    fn software(id_byte: u8, revision: u32, superseded: Vec<Uuid>) -> (Package, String) {
        let id = PackageId::new(uuid_for(id_byte), revision);
        let package = Package::SoftwareUpdate(SoftwareUpdatePackage {
            common: CommonFields {
                id,
                title: format!("Update {id_byte}"),
                description: String::new(),
                creation_date: None,
                prerequisites: Vec::new(),
                handler: None,
                files: Vec::new(),
            },
            kb_article: Some(format!("KB{id_byte}")),
            support_url: None,
            is_os_upgrade: false,
            superseded_updates: superseded,
            bundled_updates: Vec::new(),
            applicability: None,
        });
        let raw_xml = format!("<Update id=\"{id_byte}\" revision=\"{revision}\"/>");
        (package, raw_xml)
    }

    fn software_with_prerequisites(id_byte: u8, prerequisites: Vec<wsync_metadata::Prerequisite>) -> (Package, String) {
        let id = PackageId::new(uuid_for(id_byte), 1);
        let package = Package::SoftwareUpdate(SoftwareUpdatePackage {
            common: CommonFields {
                id,
                title: format!("Update {id_byte}"),
                description: String::new(),
                creation_date: None,
                prerequisites,
                handler: None,
                files: Vec::new(),
            },
            kb_article: None,
            support_url: None,
            is_os_upgrade: false,
            superseded_updates: Vec::new(),
            bundled_updates: Vec::new(),
            applicability: None,
        });
        (package, format!("<Update id=\"{id_byte}\"/>"))
    }

    fn category(id_byte: u8) -> (Package, String) {
        let id = PackageId::new(uuid_for(id_byte), 1);
        let package = Package::ProductCategory(CategoryPackage {
            common: CommonFields {
                id,
                title: format!("Product {id_byte}"),
                description: String::new(),
                creation_date: None,
                prerequisites: Vec::new(),
                handler: None,
                files: Vec::new(),
            },
        });
        (package, format!("<Update id=\"{id_byte}\"/>"))
    }

    #[test]
    fn staged_packages_are_invisible_until_commit() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open_or_create(dir.path()).unwrap();
        let (pkg, xml) = software(1, 1, vec![]);
        store.add(pkg, xml);

        assert!(!store.contains(uuid_for(1)));
        store.commit().unwrap();
        assert!(store.contains(uuid_for(1)));
    }

    #[test]
    fn commit_rejects_revision_regression() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open_or_create(dir.path()).unwrap();
        let (pkg, xml) = software(1, 5, vec![]);
        store.add(pkg, xml);
        store.commit().unwrap();

        let (older, xml) = software(1, 3, vec![]);
        store.add(older, xml);
        let err = store.commit().unwrap_err();
        assert_eq!(err.code, ErrorCode::RevisionRegression);
        // pending set discarded on failure only after it's reflected:
        // the committed state is unchanged.
        assert_eq!(store.get(uuid_for(1)).unwrap().id().revision, 5);
    }

    #[test]
    fn add_is_a_no_op_for_already_present_revision() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open_or_create(dir.path()).unwrap();
        let (pkg, xml) = software(1, 5, vec![]);
        store.add(pkg, xml);
        store.commit().unwrap();

        let (same_rev, xml) = software(1, 5, vec![]);
        store.add(same_rev, xml);
        store.commit().unwrap();
        assert_eq!(store.get(uuid_for(1)).unwrap().id().revision, 5);
    }

    #[test]
    fn is_superseded_by_index_is_derived_on_commit() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open_or_create(dir.path()).unwrap();
        let (old, xml) = software(1, 1, vec![]);
        let (new, xml2) = software(2, 1, vec![uuid_for(1)]);
        store.add_many([(old, xml), (new, xml2)]);
        store.commit().unwrap();

        let superseded_by = store.is_superseded_by_for(uuid_for(1));
        assert_eq!(superseded_by, &[PackageId::new(uuid_for(2), 1)]);
    }

    #[test]
    fn reindex_matches_fresh_ingest() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open_or_create(dir.path()).unwrap();
        let (old, xml) = software(1, 1, vec![]);
        let (new, xml2) = software(2, 1, vec![uuid_for(1)]);
        store.add_many([(old, xml), (new, xml2)]);
        store.commit().unwrap();

        let before = store.indexes.is_superseded_by.clone();
        store.reindex(|_| {}).unwrap();
        assert_eq!(store.indexes.is_superseded_by, before);
    }

    #[test]
    fn baseline_chain_shadows_older_revisions() {
        let base_dir = tempfile::tempdir().unwrap();
        {
            let mut base = Store::open_or_create(base_dir.path()).unwrap();
            let (pkg, xml) = software(1, 1, vec![]);
            base.add(pkg, xml);
            base.commit().unwrap();
        }

        let child_dir = tempfile::tempdir().unwrap();
        {
            let mut child = Store::open_or_create(child_dir.path()).unwrap();
            child.manifest.baseline = Some(base_dir.path().to_string_lossy().into_owned());
            child.write_manifest().unwrap();
        }

        let child = Store::open(child_dir.path()).unwrap();
        assert_eq!(child.get(uuid_for(1)).unwrap().id().revision, 1);
    }

    #[test]
    fn copy_to_honors_filter_and_writes_raw_xml() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open_or_create(dir.path()).unwrap();
        let (pkg1, xml1) = software(1, 1, vec![]);
        let (pkg2, xml2) = software(2, 1, vec![]);
        store.add_many([(pkg1, xml1.clone()), (pkg2, xml2)]);
        store.commit().unwrap();

        let filter = MetadataFilter {
            id_filter: Some(vec![uuid_for(1)]),
            ..MetadataFilter::all()
        };
        let mut out = Vec::new();
        let cancel = CancelToken::new();
        let count = store.copy_to(&mut out, &filter, &cancel).unwrap();
        assert_eq!(count, 1);
        assert_eq!(String::from_utf8(out).unwrap(), xml1);
    }

    #[test]
    fn copy_to_is_cancel_aware() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open_or_create(dir.path()).unwrap();
        let (pkg, xml) = software(1, 1, vec![]);
        store.add(pkg, xml);
        store.commit().unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        let mut out = Vec::new();
        let err = store
            .copy_to(&mut out, &MetadataFilter::all(), &cancel)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Cancelled);
    }

    #[test]
    fn category_packages_populate_categories_index() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open_or_create(dir.path()).unwrap();
        let (prod, prod_xml) = category(10);
        let prod_uuid = prod.id().uuid;
        store.add(prod, prod_xml);
        store.commit().unwrap();

        let id = PackageId::new(uuid_for(1), 1);
        let (update, xml) = software_with_prerequisites(
            1,
            vec![wsync_metadata::Prerequisite::AtLeastOne {
                simples: vec![prod_uuid],
                is_category: false,
            }],
        );
        store.add(update, xml);
        store.commit().unwrap();

        assert_eq!(store.categories_for(id), &[prod_uuid]);
    }

    #[test]
    fn matching_returns_ids_satisfying_filter() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open_or_create(dir.path()).unwrap();
        let (pkg1, xml1) = software(1, 1, vec![]);
        let (pkg2, xml2) = software(2, 1, vec![]);
        store.add_many([(pkg1, xml1), (pkg2, xml2)]);
        store.commit().unwrap();

        let filter = MetadataFilter {
            id_filter: Some(vec![uuid_for(1)]),
            ..MetadataFilter::all()
        };
        let ids = store.matching(&filter);
        assert_eq!(ids, vec![PackageId::new(uuid_for(1), 1)]);
    }

    #[test]
    fn reopening_persists_committed_state() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = Store::open_or_create(dir.path()).unwrap();
            let (pkg, xml) = software(1, 1, vec![]);
            store.add(pkg, xml);
            store.commit().unwrap();
        }

        let reopened = Store::open(dir.path()).unwrap();
        assert!(reopened.contains(uuid_for(1)));
        assert_eq!(reopened.get_raw_metadata(uuid_for(1)), Some("<Update id=\"1\" revision=\"1\"/>"));
    }
}
