// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use wsync_identity::{PackageId, PackageKind};

/// The read-only projection of a package that [`MetadataFilter`]
/// evaluates against.
///
/// A store computes this view from its raw metadata and derived
/// indexes; the filter engine itself never touches raw XML or the
/// store's on-disk layout.
#[derive(Debug, Clone)]
pub struct PackageView<'a> {
    /// Stable identity.
    pub id: PackageId,
    /// Which variant this package is.
    pub kind: PackageKind,
    /// Display title.
    pub title: &'a str,
    /// KB article id, for software updates that have one.
    pub kb_article: Option<&'a str>,
    /// Category ids (products/classifications) this package belongs to,
    /// as derived from its `AtLeastOne` prerequisites.
    pub categories: &'a [Uuid],
    /// Hardware ids named in this package's driver metadata, if any.
    pub hardware_ids: &'a [String],
    /// Computer hardware ids in this package's driver distribution list.
    pub computer_hardware_ids: &'a [Uuid],
    /// Identities of packages that declare this one superseded. Empty
    /// means "not superseded".
    pub is_superseded_by: &'a [PackageId],
}

/// Declarative predicate applied over a metadata store.
///
/// All populated options compose **conjunctively** (every option that is
/// `Some`/`true` must pass). This makes the filter monotone: enabling
/// more options can only shrink or preserve the result set, never
/// enlarge it (see `MetadataFilter::matches`'s test suite).
///
/// Evaluation inside [`MetadataFilter::matches`] is ordered by
/// selectivity: type/id predicates first, everything else after, so a
/// caller iterating a large store fails fast on the cheap checks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MetadataFilter {
    /// Restrict to these uuids (any revision).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_filter: Option<Vec<Uuid>>,

    /// Packages whose derived category memberships intersect this set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_filter: Option<Vec<Uuid>>,

    /// Whitespace-tokenized; every token must occur in the title
    /// (case-insensitive).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_filter: Option<String>,

    /// Exact match against KB id. Implicitly restricts to
    /// [`PackageKind::Software`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kb_article_filter: Option<String>,

    /// Case-insensitive match on driver hardware id. Implicitly
    /// restricts to [`PackageKind::Driver`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_id_filter: Option<String>,

    /// Computer hardware id must be present in the driver's
    /// distribution list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computer_hardware_id_filter: Option<Uuid>,

    /// Exclude software updates with a non-empty `isSupersededBy`.
    #[serde(default, skip_serializing_if = "is_false")]
    pub skip_superseded: bool,

    /// Cap the number of results. `0` (the default) means unlimited.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub first_x: usize,
}

fn is_false(b: &bool) -> bool {
    !*b
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl MetadataFilter {
    /// An empty filter: matches every package, unlimited result size.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Evaluate this filter against a single package view.
    ///
    /// Checks are ordered by selectivity: id and type-forcing predicates
    /// (`id_filter`, `kb_article_filter`, `hardware_id_filter`) run
    /// before the more expensive substring/category checks.
    #[must_use]
    pub fn matches(&self, pkg: &PackageView<'_>) -> bool {
        if let Some(ids) = &self.id_filter {
            if !ids.contains(&pkg.id.uuid) {
                return false;
            }
        }

        if let Some(kb) = &self.kb_article_filter {
            if pkg.kind != PackageKind::Software {
                return false;
            }
            if pkg.kb_article != Some(kb.as_str()) {
                return false;
            }
        }

        if let Some(hw) = &self.hardware_id_filter {
            if pkg.kind != PackageKind::Driver {
                return false;
            }
            let hw = hw.to_ascii_lowercase();
            if !pkg
                .hardware_ids
                .iter()
                .any(|id| id.to_ascii_lowercase() == hw)
            {
                return false;
            }
        }

        if let Some(chid) = &self.computer_hardware_id_filter {
            if !pkg.computer_hardware_ids.contains(chid) {
                return false;
            }
        }

        if let Some(categories) = &self.category_filter {
            if !pkg.categories.iter().any(|c| categories.contains(c)) {
                return false;
            }
        }

        if let Some(title_filter) = &self.title_filter {
            let title_lower = pkg.title.to_ascii_lowercase();
            let all_tokens_present = title_filter
                .split_whitespace()
                .all(|token| title_lower.contains(&token.to_ascii_lowercase()));
            if !all_tokens_present {
                return false;
            }
        }

        if self.skip_superseded && !pkg.is_superseded_by.is_empty() {
            return false;
        }

        true
    }

    /// Apply this filter to an iterator of package views, honoring
    /// `first_x` as a result-size cap (`0` = unlimited).
    pub fn apply<'a, I>(&self, items: I) -> Vec<PackageView<'a>>
    where
        I: IntoIterator<Item = PackageView<'a>>,
    {
        let matched = items.into_iter().filter(|pkg| self.matches(pkg));
        if self.first_x == 0 {
            matched.collect()
        } else {
            matched.take(self.first_x).collect()
        }
    }
}
