//! Typed records produced by [`crate::parse_update`].

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use wsync_identity::{PackageId, PackageKind};

/// A single prerequisite relationship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Prerequisite {
    /// This identity must be installed/evaluated true.
    Simple {
        /// The required identity.
        uuid: Uuid,
    },
    /// Group disjunction: at least one of `simples` must hold.
    AtLeastOne {
        /// The candidate identities.
        simples: Vec<Uuid>,
        /// When `true`, this group encodes the update's (product,
        /// classification) category membership rather than a true
        /// install-time prerequisite.
        is_category: bool,
    },
}

/// One digest of a content file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FileDigest {
    /// Digest algorithm name (e.g. `"SHA256"`, `"SHA1"`).
    pub algorithm: String,
    /// Base64-encoded digest value.
    pub base64: String,
}

/// URLs through which a content file may be fetched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FileUrls {
    /// Microsoft Update CDN URL.
    pub mu_url: Option<String>,
    /// Upstream Server Sync URL (downstream-server to downstream-server).
    pub uss_url: Option<String>,
}

/// A content file declared by an update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ContentFile {
    /// Display file name.
    pub file_name: String,
    /// Size in bytes.
    pub size: u64,
    /// All digests declared for this file (multiple algorithms allowed).
    pub digests: Vec<FileDigest>,
    /// All URL pairs declared for this file.
    pub urls: Vec<FileUrls>,
    /// Optional patching-type hint (e.g. `"Delta"`, `"Full"`).
    pub patching_type: Option<String>,
}

impl ContentFile {
    /// The canonical key for this file: its primary (first-declared) digest.
    #[must_use]
    pub fn primary_digest(&self) -> Option<&FileDigest> {
        self.digests.first()
    }
}

/// The closed set of handler types this parser supports.
///
/// Unknown `xsi:type` values are a fatal parse error
/// ([`wsync_error::ErrorCode::UnknownHandlerType`]) rather than being
/// silently ignored, so unsupported updates are never mishandled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum HandlerType {
    /// `cmd:CommandLineInstallation`
    CommandLineInstallation,
    /// `cbs:Cbs`
    Cbs,
    /// `cat:Category`
    Category,
    /// `msp:WindowsInstallerApp`
    WindowsInstallerApp,
    /// `msp:WindowsInstaller`
    WindowsInstaller,
    /// `OSInstallerMetadata`
    OsInstallerMetadata,
    /// `psf:WindowsPatch`
    WindowsPatch,
    /// `wsi:WindowsSetup`
    ///
    /// Note: an earlier implementation this system was distilled from
    /// mapped `wsi:WindowsSetup` to `HandlerType::WindowsPatch`, almost
    /// certainly a copy-paste mistake. This parser maps it to its own
    /// `WindowsSetup` variant.
    WindowsSetup,
}

impl HandlerType {
    /// Map a raw `xsi:type` attribute value to a [`HandlerType`].
    ///
    /// Returns `None` for any value outside the closed set this parser
    /// supports; callers should treat that as a fatal parse error.
    #[must_use]
    pub fn from_xsi_type(xsi_type: &str) -> Option<Self> {
        match xsi_type {
            "cmd:CommandLineInstallation" => Some(Self::CommandLineInstallation),
            "cbs:Cbs" => Some(Self::Cbs),
            "cat:Category" => Some(Self::Category),
            "msp:WindowsInstallerApp" => Some(Self::WindowsInstallerApp),
            "msp:WindowsInstaller" => Some(Self::WindowsInstaller),
            "OSInstallerMetadata" => Some(Self::OsInstallerMetadata),
            "psf:WindowsPatch" => Some(Self::WindowsPatch),
            "wsi:WindowsSetup" => Some(Self::WindowsSetup),
            _ => None,
        }
    }
}

/// Handler metadata: the discriminator plus its opaque sub-tree,
/// serialized back to XML text (see [`crate::xmltree::XNode::to_xml`]).
/// The core neither evaluates nor normalizes handler-specific data
/// beyond what is needed to classify the package and locate referenced
/// update IDs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Handler {
    /// Which handler this is.
    pub handler_type: HandlerType,
    /// Raw XML of `HandlerSpecificData` and its children.
    pub raw_xml: String,
}

/// Applicability rules: `IsInstalled`, `IsInstallable`, and
/// handler-specific metadata rules, stored as opaque sub-trees.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ApplicabilityRules {
    /// Raw XML of the `IsInstalled` rule, if present.
    pub is_installed: Option<String>,
    /// Raw XML of the `IsInstallable` rule, if present.
    pub is_installable: Option<String>,
    /// Any other named rule elements, e.g. `CbsPackageApplicabilityMetadata`,
    /// `MsiPatchMetadata`, `MsiApplicationMetadata`, `WindowsDriverMetadata`,
    /// `WindowsDriver`, `WindowsVersion`, `IsSuperseded`, each as
    /// `(element_name, raw_xml)`.
    pub other_rules: Vec<(String, String)>,
}

/// One `DriverMetaData` block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DriverMetadata {
    /// Hardware id this block applies to (mandatory).
    pub hardware_id: String,
    /// Optional feature score (driver ranking hint).
    pub feature_score: Option<String>,
    /// Target computer hardware ids.
    pub target_computer_hardware_ids: Vec<Uuid>,
    /// Distribution computer hardware ids (machines this driver may ship to).
    pub distribution_computer_hardware_ids: Vec<Uuid>,
    /// Driver version string.
    pub version: Option<String>,
    /// Driver date string (not parsed further; upstream format varies).
    pub date: Option<String>,
}

/// Fields common to every package variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CommonFields {
    /// Stable identity.
    pub id: PackageId,
    /// Display title.
    pub title: String,
    /// Description text.
    pub description: String,
    /// Creation date, if the upstream declared one.
    pub creation_date: Option<DateTime<Utc>>,
    /// Flattened prerequisite list (both Simple and AtLeastOne groups).
    pub prerequisites: Vec<Prerequisite>,
    /// Handler metadata, if any.
    pub handler: Option<Handler>,
    /// Declared content files.
    pub files: Vec<ContentFile>,
}

/// A parsed category package (classification, product, or detectoid).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CategoryPackage {
    /// Common fields.
    pub common: CommonFields,
}

/// A parsed software update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SoftwareUpdatePackage {
    /// Common fields.
    pub common: CommonFields,
    /// KB article number, if any.
    pub kb_article: Option<String>,
    /// Support URL, if any.
    pub support_url: Option<String>,
    /// Whether this update performs an OS upgrade.
    pub is_os_upgrade: bool,
    /// Declared supersedence: uuids this update obsoletes.
    pub superseded_updates: Vec<Uuid>,
    /// Child updates this update bundles and installs atomically.
    pub bundled_updates: Vec<PackageId>,
    /// Applicability rules, if declared.
    pub applicability: Option<ApplicabilityRules>,
}

/// A parsed driver update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DriverUpdatePackage {
    /// Common fields.
    pub common: CommonFields,
    /// One or more driver metadata blocks.
    pub drivers: Vec<DriverMetadata>,
    /// Applicability rules, if declared.
    pub applicability: Option<ApplicabilityRules>,
}

/// The polymorphic package variant produced by parsing.
///
/// Tagged by a closed discriminator ([`PackageKind`]); no inheritance is
/// used anywhere in this model, matching the package-variant design
/// note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind")]
pub enum Package {
    /// A classification category.
    ClassificationCategory(CategoryPackage),
    /// A product category.
    ProductCategory(CategoryPackage),
    /// A detectoid category.
    DetectoidCategory(CategoryPackage),
    /// A software update.
    SoftwareUpdate(SoftwareUpdatePackage),
    /// A driver update.
    DriverUpdate(DriverUpdatePackage),
}

impl Package {
    /// Borrow the common fields shared by every variant.
    #[must_use]
    pub fn common(&self) -> &CommonFields {
        match self {
            Self::ClassificationCategory(p)
            | Self::ProductCategory(p)
            | Self::DetectoidCategory(p) => &p.common,
            Self::SoftwareUpdate(p) => &p.common,
            Self::DriverUpdate(p) => &p.common,
        }
    }

    /// Mutably borrow the common fields shared by every variant (used
    /// to merge in signed content URLs from a later `getExtendedUpdateInfo`
    /// pass without re-parsing).
    #[must_use]
    pub fn common_mut(&mut self) -> &mut CommonFields {
        match self {
            Self::ClassificationCategory(p)
            | Self::ProductCategory(p)
            | Self::DetectoidCategory(p) => &mut p.common,
            Self::SoftwareUpdate(p) => &mut p.common,
            Self::DriverUpdate(p) => &mut p.common,
        }
    }

    /// Stable identity of this package.
    #[must_use]
    pub fn id(&self) -> PackageId {
        self.common().id
    }

    /// The [`PackageKind`] discriminator for this package.
    #[must_use]
    pub fn kind(&self) -> PackageKind {
        match self {
            Self::ClassificationCategory(_) => PackageKind::Classification,
            Self::ProductCategory(_) => PackageKind::Product,
            Self::DetectoidCategory(_) => PackageKind::Detectoid,
            Self::SoftwareUpdate(_) => PackageKind::Software,
            Self::DriverUpdate(_) => PackageKind::Driver,
        }
    }
}
