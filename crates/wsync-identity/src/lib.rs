// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Revision number advertised by the upstream source.
///
/// Revisions are monotonically increasing per `uuid`; they are never
/// reused and never decrease across a baseline chain (see
/// [`RevisionRegression`](https://docs.rs/wsync-error) in `wsync-error`).
pub type Revision = u32;

/// Stable identity for a single package: a `uuid` shared across all
/// revisions of the same logical update, plus the `revision` that
/// distinguishes them.
///
/// Sort order is `uuid` ascending, then `revision` **descending**, so
/// that "latest revision of this id" is a `uuid`-prefix lookup: the
/// first entry for a given `uuid` in a sorted sequence is always the
/// newest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct PackageId {
    /// Stable identity, constant across revisions.
    pub uuid: Uuid,
    /// Monotonically increasing revision for this `uuid`.
    pub revision: Revision,
}

impl PackageId {
    /// Construct a new identity.
    #[must_use]
    pub fn new(uuid: Uuid, revision: Revision) -> Self {
        Self { uuid, revision }
    }

    /// The empty-UUID sentinel used positionally by some upstream
    /// `AtLeastOne` groups to mark "this group is a category group"
    /// (see `wsync-metadata`).
    #[must_use]
    pub fn is_empty_uuid(&self) -> bool {
        self.uuid.is_nil()
    }

    /// Wire handle form: `"uuid|revision"`.
    #[must_use]
    pub fn open_id(&self) -> String {
        format!("{}|{}", self.uuid, self.revision)
    }
}

impl PartialOrd for PackageId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.uuid
            .cmp(&other.uuid)
            .then_with(|| other.revision.cmp(&self.revision))
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.open_id())
    }
}

/// Error returned when an `openId` string cannot be parsed.
#[derive(Debug, thiserror::Error)]
pub enum OpenIdParseError {
    /// The string was missing the `|` separator.
    #[error("openId {0:?} is missing the '|' separator")]
    MissingSeparator(String),
    /// The `uuid` half was not a valid UUID.
    #[error("openId {0:?} has an invalid uuid half: {1}")]
    InvalidUuid(String, uuid::Error),
    /// The `revision` half was not a valid integer.
    #[error("openId {0:?} has an invalid revision half: {1}")]
    InvalidRevision(String, std::num::ParseIntError),
}

impl FromStr for PackageId {
    type Err = OpenIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (uuid_part, rev_part) = s
            .split_once('|')
            .ok_or_else(|| OpenIdParseError::MissingSeparator(s.to_string()))?;
        let uuid = Uuid::parse_str(uuid_part)
            .map_err(|e| OpenIdParseError::InvalidUuid(s.to_string(), e))?;
        let revision = rev_part
            .parse()
            .map_err(|e| OpenIdParseError::InvalidRevision(s.to_string(), e))?;
        Ok(Self { uuid, revision })
    }
}

/// The closed set of package variants in the update metadata graph.
///
/// This is the discriminator for the tagged-variant design used
/// throughout the workspace (see the package-variant design note):
/// no inheritance, one closed enum, matched exhaustively everywhere a
/// variant-specific decision is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PackageKind {
    /// A classification category (e.g. "Security Updates").
    Classification,
    /// A product category; products form a forest via category prerequisites.
    Product,
    /// A detectoid category encoding applicability logic.
    Detectoid,
    /// A software update.
    Software,
    /// A driver update.
    Driver,
}

impl PackageKind {
    /// Returns `true` for the three category-shaped variants (never a
    /// true installable update).
    #[must_use]
    pub fn is_category(&self) -> bool {
        matches!(self, Self::Classification | Self::Product | Self::Detectoid)
    }
}

impl fmt::Display for PackageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Classification => "classification",
            Self::Product => "product",
            Self::Detectoid => "detectoid",
            Self::Software => "software",
            Self::Driver => "driver",
        };
        f.write_str(s)
    }
}

/// Returns `true` if `candidate` is a strictly newer revision of `current`.
///
/// Both must share the same `uuid`; callers that only have loose
/// identities should check `uuid` equality first.
#[must_use]
pub fn supersedes(current: &PackageId, candidate: &PackageId) -> bool {
    current.uuid == candidate.uuid && candidate.revision > current.revision
}

/// Reduce a sequence of identities to the latest revision per `uuid`,
/// returned in `uuid`-ascending order.
///
/// Used when iterating a baseline chain: duplicate identities for the
/// same uuid collapse to whichever revision is newest.
#[must_use]
pub fn latest_per_uuid(ids: impl IntoIterator<Item = PackageId>) -> Vec<PackageId> {
    use std::collections::BTreeMap;
    let mut latest: BTreeMap<Uuid, PackageId> = BTreeMap::new();
    for id in ids {
        latest
            .entry(id.uuid)
            .and_modify(|existing| {
                if id.revision > existing.revision {
                    *existing = id;
                }
            })
            .or_insert(id);
    }
    latest.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uuid_for(byte: u8) -> Uuid {
        Uuid::from_bytes([byte; 16])
    }

    #[test]
    fn sort_order_is_uuid_asc_then_revision_desc() {
        let a1 = PackageId::new(uuid_for(1), 1);
        let a2 = PackageId::new(uuid_for(1), 2);
        let b1 = PackageId::new(uuid_for(2), 1);

        let mut ids = vec![b1, a1, a2];
        ids.sort();

        assert_eq!(ids, vec![a2, a1, b1]);
    }

    #[test]
    fn open_id_round_trips() {
        let id = PackageId::new(uuid_for(7), 42);
        let s = id.open_id();
        let parsed: PackageId = s.parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn open_id_rejects_missing_separator() {
        let err = "not-an-open-id".parse::<PackageId>().unwrap_err();
        assert!(matches!(err, OpenIdParseError::MissingSeparator(_)));
    }

    #[test]
    fn supersedes_requires_same_uuid_and_higher_revision() {
        let a1 = PackageId::new(uuid_for(1), 1);
        let a2 = PackageId::new(uuid_for(1), 2);
        let b1 = PackageId::new(uuid_for(2), 1);

        assert!(supersedes(&a1, &a2));
        assert!(!supersedes(&a2, &a1));
        assert!(!supersedes(&a1, &b1));
    }

    #[test]
    fn package_kind_is_category_matches_design_note() {
        assert!(PackageKind::Classification.is_category());
        assert!(PackageKind::Product.is_category());
        assert!(PackageKind::Detectoid.is_category());
        assert!(!PackageKind::Software.is_category());
        assert!(!PackageKind::Driver.is_category());
    }

    #[test]
    fn latest_per_uuid_collapses_revisions() {
        let a1 = PackageId::new(uuid_for(1), 1);
        let a3 = PackageId::new(uuid_for(1), 3);
        let a2 = PackageId::new(uuid_for(1), 2);
        let b1 = PackageId::new(uuid_for(2), 1);

        let latest = latest_per_uuid([a1, a3, a2, b1]);
        assert_eq!(latest, vec![a3, b1]);
    }
}
