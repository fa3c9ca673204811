// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::collections::{BTreeMap, BTreeSet};

use uuid::Uuid;
use wsync_metadata::{Package, Prerequisite};

/// The prerequisite DAG over a fixed set of packages, keyed by `uuid`
/// (prerequisite edges reference a `uuid`, not a specific revision —
/// they always mean "whichever revision is latest").
///
/// Built once from whatever packages the caller provides; queries are
/// served against that fixed snapshot.
#[derive(Debug, Clone, Default)]
pub struct PrerequisiteGraph {
    /// `uuid -> uuids it directly requires` (its own declared prerequisites).
    outgoing: BTreeMap<Uuid, BTreeSet<Uuid>>,
    /// `uuid -> uuids that directly require it`.
    incoming: BTreeMap<Uuid, BTreeSet<Uuid>>,
    nodes: BTreeSet<Uuid>,
}

impl PrerequisiteGraph {
    /// Walk every package, flatten its prerequisites (both `Simple` and
    /// the `simples` inside `AtLeastOne`) into an outgoing edge set, and
    /// populate the reverse edges.
    #[must_use]
    pub fn build<'a>(packages: impl IntoIterator<Item = &'a Package>) -> Self {
        let mut outgoing: BTreeMap<Uuid, BTreeSet<Uuid>> = BTreeMap::new();
        let mut nodes: BTreeSet<Uuid> = BTreeSet::new();

        for pkg in packages {
            let uuid = pkg.id().uuid;
            nodes.insert(uuid);
            let required = outgoing.entry(uuid).or_default();
            for prereq in &pkg.common().prerequisites {
                match prereq {
                    Prerequisite::Simple { uuid: req } => {
                        required.insert(*req);
                    }
                    Prerequisite::AtLeastOne { simples, .. } => {
                        required.extend(simples.iter().copied());
                    }
                }
            }
        }

        let mut incoming: BTreeMap<Uuid, BTreeSet<Uuid>> = BTreeMap::new();
        for (&from, required) in &outgoing {
            for &to in required {
                nodes.insert(to);
                incoming.entry(to).or_default().insert(from);
            }
        }

        Self {
            outgoing,
            incoming,
            nodes,
        }
    }

    /// Packages with no declared prerequisites.
    #[must_use]
    pub fn roots(&self) -> Vec<Uuid> {
        self.nodes
            .iter()
            .copied()
            .filter(|u| self.outgoing.get(u).is_none_or(BTreeSet::is_empty))
            .collect()
    }

    /// Packages nothing else requires.
    #[must_use]
    pub fn leaves(&self) -> Vec<Uuid> {
        self.nodes
            .iter()
            .copied()
            .filter(|u| self.incoming.get(u).is_none_or(BTreeSet::is_empty))
            .collect()
    }

    /// Packages that both require something and are required by something.
    #[must_use]
    pub fn inner(&self) -> Vec<Uuid> {
        self.nodes
            .iter()
            .copied()
            .filter(|u| {
                !self.outgoing.get(u).is_none_or(BTreeSet::is_empty)
                    && !self.incoming.get(u).is_none_or(BTreeSet::is_empty)
            })
            .collect()
    }

    /// Every `uuid` transitively required by `id` (its full prerequisite chain).
    #[must_use]
    pub fn ancestors(&self, id: Uuid) -> BTreeSet<Uuid> {
        Self::transitive_closure(id, &self.outgoing)
    }

    /// Every `uuid` that transitively requires `id`.
    #[must_use]
    pub fn descendants(&self, id: Uuid) -> BTreeSet<Uuid> {
        Self::transitive_closure(id, &self.incoming)
    }

    fn transitive_closure(start: Uuid, edges: &BTreeMap<Uuid, BTreeSet<Uuid>>) -> BTreeSet<Uuid> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![start];
        while let Some(u) = stack.pop() {
            if let Some(next) = edges.get(&u) {
                for &n in next {
                    if seen.insert(n) {
                        stack.push(n);
                    }
                }
            }
        }
        seen
    }

    /// Evaluate a package's install-time prerequisites against an
    /// installed-identity set: disjunction within each `AtLeastOne`
    /// group, conjunction across distinct groups (and against any
    /// `Simple` prerequisite).
    #[must_use]
    pub fn is_applicable(pkg: &Package, installed_ids: &BTreeSet<Uuid>) -> bool {
        pkg.common().prerequisites.iter().all(|prereq| match prereq {
            Prerequisite::Simple { uuid } => installed_ids.contains(uuid),
            Prerequisite::AtLeastOne { simples, .. } => {
                simples.iter().any(|uuid| installed_ids.contains(uuid))
            }
        })
    }
}

/// Resolves a package's `(productIds, classificationIds)` category
/// membership from its `AtLeastOne` prerequisite groups.
#[derive(Debug, Clone, Copy, Default)]
pub struct CategoryResolver;

impl CategoryResolver {
    /// Examine every `AtLeastOne` group (the `isCategory` flag is not
    /// required to be set — a documented relaxation: any group whose
    /// entries resolve against the known product/classification sets
    /// counts) and partition resolved ids into products and
    /// classifications.
    #[must_use]
    pub fn resolve(
        pkg: &Package,
        known_products: &BTreeSet<Uuid>,
        known_classifications: &BTreeSet<Uuid>,
    ) -> (Vec<Uuid>, Vec<Uuid>) {
        let mut product_ids = BTreeSet::new();
        let mut classification_ids = BTreeSet::new();

        for prereq in &pkg.common().prerequisites {
            let Prerequisite::AtLeastOne { simples, .. } = prereq else {
                continue;
            };
            for uuid in simples {
                if known_products.contains(uuid) {
                    product_ids.insert(*uuid);
                }
                if known_classifications.contains(uuid) {
                    classification_ids.insert(*uuid);
                }
            }
        }

        (
            product_ids.into_iter().collect(),
            classification_ids.into_iter().collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wsync_identity::PackageId;
    use wsync_metadata::{CategoryPackage, CommonFields, SoftwareUpdatePackage};

    fn uuid_for(byte: u8) -> Uuid {
        Uuid::from_bytes([byte; 16])
    }

    fn category(id_byte: u8) -> Package {
        Package::ProductCategory(CategoryPackage {
            common: CommonFields {
                id: PackageId::new(uuid_for(id_byte), 1),
                title: String::new(),
                description: String::new(),
                creation_date: None,
                prerequisites: Vec::new(),
                handler: None,
                files: Vec::new(),
            },
        })
    }

    fn software(id_byte: u8, prerequisites: Vec<Prerequisite>) -> Package {
        Package::SoftwareUpdate(SoftwareUpdatePackage {
            common: CommonFields {
                id: PackageId::new(uuid_for(id_byte), 1),
                title: String::new(),
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
        })
    }

    #[test]
    fn roots_leaves_inner_are_classified_correctly() {
        // 3 depends on 2, 2 depends on 1. 1 is a root (no prereqs), 3 is a leaf
        // (nothing requires it), 2 is inner.
        let pkgs = vec![
            software(1, vec![]),
            software(2, vec![Prerequisite::Simple { uuid: uuid_for(1) }]),
            software(3, vec![Prerequisite::Simple { uuid: uuid_for(2) }]),
        ];
        let graph = PrerequisiteGraph::build(&pkgs);

        assert_eq!(graph.roots(), vec![uuid_for(1)]);
        assert_eq!(graph.leaves(), vec![uuid_for(3)]);
        assert_eq!(graph.inner(), vec![uuid_for(2)]);
    }

    #[test]
    fn ancestors_and_descendants_are_transitive() {
        let pkgs = vec![
            software(1, vec![]),
            software(2, vec![Prerequisite::Simple { uuid: uuid_for(1) }]),
            software(3, vec![Prerequisite::Simple { uuid: uuid_for(2) }]),
        ];
        let graph = PrerequisiteGraph::build(&pkgs);

        let ancestors_of_3: BTreeSet<Uuid> = [uuid_for(1), uuid_for(2)].into_iter().collect();
        assert_eq!(graph.ancestors(uuid_for(3)), ancestors_of_3);

        let descendants_of_1: BTreeSet<Uuid> = [uuid_for(2), uuid_for(3)].into_iter().collect();
        assert_eq!(graph.descendants(uuid_for(1)), descendants_of_1);
    }

    #[test]
    fn is_applicable_disjunction_within_group_conjunction_across_groups() {
        let pkg = software(
            9,
            vec![
                Prerequisite::Simple { uuid: uuid_for(1) },
                Prerequisite::AtLeastOne {
                    simples: vec![uuid_for(2), uuid_for(3)],
                    is_category: false,
                },
            ],
        );

        let mut installed: BTreeSet<Uuid> = [uuid_for(1)].into_iter().collect();
        assert!(!PrerequisiteGraph::is_applicable(&pkg, &installed));

        installed.insert(uuid_for(3));
        assert!(PrerequisiteGraph::is_applicable(&pkg, &installed));
    }

    #[test]
    fn category_resolver_does_not_require_is_category_flag() {
        let product = category(10);
        let classification = category(20);
        let known_products: BTreeSet<Uuid> = [product.id().uuid].into_iter().collect();
        let known_classifications: BTreeSet<Uuid> = [classification.id().uuid].into_iter().collect();

        let pkg = software(
            1,
            vec![Prerequisite::AtLeastOne {
                simples: vec![product.id().uuid, classification.id().uuid],
                is_category: false,
            }],
        );

        let (products, classifications) =
            CategoryResolver::resolve(&pkg, &known_products, &known_classifications);
        assert_eq!(products, vec![product.id().uuid]);
        assert_eq!(classifications, vec![classification.id().uuid]);
    }

    #[test]
    fn category_resolver_ignores_simple_prerequisites() {
        let known_products: BTreeSet<Uuid> = [uuid_for(5)].into_iter().collect();
        let pkg = software(1, vec![Prerequisite::Simple { uuid: uuid_for(5) }]);

        let (products, classifications) =
            CategoryResolver::resolve(&pkg, &known_products, &BTreeSet::new());
        assert!(products.is_empty());
        assert!(classifications.is_empty());
    }
}
