//! Parses a single update's XML fragment into a [`Package`].

use chrono::{DateTime, Utc};
use uuid::Uuid;
use wsync_error::WsyncError;
use wsync_identity::PackageId;

use crate::types::{
    ApplicabilityRules, CategoryPackage, CommonFields, ContentFile, DriverMetadata,
    DriverUpdatePackage, FileDigest, FileUrls, Handler, HandlerType, Package, Prerequisite,
    SoftwareUpdatePackage,
};
use crate::xmltree::{self, XNode};

const RULE_ELEMENT_NAMES: &[&str] = &[
    "CbsPackageApplicabilityMetadata",
    "MsiPatchMetadata",
    "MsiApplicationMetadata",
    "WindowsDriverMetadata",
    "WindowsDriver",
    "WindowsVersion",
    "IsSuperseded",
];

/// Parse one update's XML fragment into a typed [`Package`].
///
/// Returns a fatal [`WsyncError`] (parse error, or unknown handler
/// type) rather than silently interpreting anything it doesn't
/// recognize.
pub fn parse_update(xml: &str) -> Result<Package, WsyncError> {
    let root = xmltree::parse_root(xml)?;

    let identity = root
        .child("UpdateIdentity")
        .ok_or_else(|| WsyncError::parse_error("/UpdateIdentity", "missing mandatory element"))?;
    let id = parse_identity(identity, "/UpdateIdentity")?;

    let title = root.child("Title").map(|n| n.text.clone()).unwrap_or_default();
    let description = root
        .child("Description")
        .map(|n| n.text.clone())
        .unwrap_or_default();
    let creation_date = root
        .child("CreationDate")
        .map(|n| n.text.as_str())
        .filter(|s| !s.is_empty())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    let prerequisites = match root.child("Prerequisites") {
        Some(node) => parse_prerequisites(node)?,
        None => Vec::new(),
    };

    let handler = root
        .child("HandlerSpecificData")
        .map(parse_handler)
        .transpose()?;

    let files = match root.child("Files") {
        Some(node) => parse_files(node)?,
        None => Vec::new(),
    };

    let bundled_updates = root
        .child("Relationships")
        .and_then(|n| n.child("BundledUpdates"))
        .map(|n| {
            n.children_named("UpdateIdentity")
                .map(|c| parse_identity(c, "/Relationships/BundledUpdates/UpdateIdentity"))
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()?
        .unwrap_or_default();

    let drivers = root
        .children_named("DriverMetaData")
        .map(parse_driver_metadata)
        .collect::<Result<Vec<_>, _>>()?;

    let applicability = root.child("ApplicabilityRules").map(parse_applicability);

    let common = CommonFields {
        id,
        title,
        description,
        creation_date,
        prerequisites,
        handler: handler.clone(),
        files,
    };

    if !drivers.is_empty() {
        return Ok(Package::DriverUpdate(DriverUpdatePackage {
            common,
            drivers,
            applicability,
        }));
    }

    if let Some(h) = &handler {
        if h.handler_type == HandlerType::Category {
            let category_type = root
                .child("HandlerSpecificData")
                .and_then(|n| n.child("CategoryInformation"))
                .and_then(|n| n.attr("CategoryType"));
            return build_category_package(common, category_type);
        }
    }

    let kb_article = root.child("KBArticleID").map(|n| n.text.clone());
    let support_url = root.child("SupportUrl").map(|n| n.text.clone());
    let is_os_upgrade = root
        .child("OSUpgrade")
        .map(|n| n.text.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    let superseded_updates = root
        .child("SupersededUpdates")
        .map(|n| {
            n.children_named("UpdateId")
                .filter_map(|c| Uuid::parse_str(c.text.trim()).ok())
                .collect()
        })
        .unwrap_or_default();

    Ok(Package::SoftwareUpdate(SoftwareUpdatePackage {
        common,
        kb_article,
        support_url,
        is_os_upgrade,
        superseded_updates,
        bundled_updates,
        applicability,
    }))
}

fn build_category_package(
    common: CommonFields,
    category_type: Option<&str>,
) -> Result<Package, WsyncError> {
    let pkg = CategoryPackage { common };
    match category_type {
        Some("Product") => Ok(Package::ProductCategory(pkg)),
        Some("UpdateClassification") => Ok(Package::ClassificationCategory(pkg)),
        Some("Detectoid") => Ok(Package::DetectoidCategory(pkg)),
        other => Err(WsyncError::parse_error(
            "/HandlerSpecificData/CategoryInformation/@CategoryType",
            format!("unrecognized or missing category type: {other:?}"),
        )),
    }
}

fn parse_identity(node: &XNode, xpath: &str) -> Result<PackageId, WsyncError> {
    let uuid_str = node
        .attr("UpdateID")
        .ok_or_else(|| WsyncError::parse_error(xpath, "missing @UpdateID"))?;
    let uuid = Uuid::parse_str(uuid_str)
        .map_err(|e| WsyncError::parse_error(xpath, format!("invalid @UpdateID: {e}")))?;
    let revision = node
        .attr("RevisionNumber")
        .ok_or_else(|| WsyncError::parse_error(xpath, "missing @RevisionNumber"))?
        .parse()
        .map_err(|e| WsyncError::parse_error(xpath, format!("invalid @RevisionNumber: {e}")))?;
    Ok(PackageId::new(uuid, revision))
}

fn parse_prerequisites(node: &XNode) -> Result<Vec<Prerequisite>, WsyncError> {
    node.children
        .iter()
        .map(|child| match child.name.as_str() {
            "UpdateIdentity" => {
                let id = parse_identity(child, "/Prerequisites/UpdateIdentity")?;
                Ok(Prerequisite::Simple { uuid: id.uuid })
            }
            "AtLeastOne" => {
                let simples: Vec<Uuid> = child
                    .children_named("UpdateIdentity")
                    .map(|c| {
                        parse_identity(c, "/Prerequisites/AtLeastOne/UpdateIdentity").map(|id| id.uuid)
                    })
                    .collect::<Result<_, _>>()?;

                let is_category = match child.attr("IsCategory") {
                    Some(v) => v.eq_ignore_ascii_case("true"),
                    // Positional convention: a category group's last inner id
                    // is the empty UUID when the flag itself is absent.
                    None => simples.last().is_some_and(Uuid::is_nil),
                };

                Ok(Prerequisite::AtLeastOne { simples, is_category })
            }
            other => Err(WsyncError::parse_error(
                "/Prerequisites",
                format!("unsupported prerequisite element: {other}"),
            )),
        })
        .collect()
}

fn parse_handler(node: &XNode) -> Result<Handler, WsyncError> {
    let xsi_type = node
        .attr("xsi:type")
        .ok_or_else(|| WsyncError::parse_error("/HandlerSpecificData", "missing @xsi:type"))?;
    let handler_type = HandlerType::from_xsi_type(xsi_type)
        .ok_or_else(|| WsyncError::unknown_handler_type(xsi_type))?;
    Ok(Handler {
        handler_type,
        raw_xml: node.to_xml(),
    })
}

fn parse_files(node: &XNode) -> Result<Vec<ContentFile>, WsyncError> {
    node.children_named("File")
        .map(|file_node| {
            let file_name = file_node
                .attr("FileName")
                .ok_or_else(|| WsyncError::parse_error("/Files/File", "missing @FileName"))?
                .to_string();
            let size = file_node
                .attr("Size")
                .ok_or_else(|| WsyncError::parse_error("/Files/File", "missing @Size"))?
                .parse()
                .map_err(|e| WsyncError::parse_error("/Files/File", format!("invalid @Size: {e}")))?;
            let patching_type = file_node.attr("PatchingType").map(str::to_string);

            let digests = file_node
                .children_named("FileDigest")
                .map(|d| {
                    let algorithm = d
                        .attr("Algorithm")
                        .ok_or_else(|| {
                            WsyncError::parse_error("/Files/File/FileDigest", "missing @Algorithm")
                        })?
                        .to_string();
                    Ok(FileDigest {
                        algorithm,
                        base64: d.text.clone(),
                    })
                })
                .collect::<Result<Vec<_>, WsyncError>>()?;

            let urls = file_node
                .child("Urls")
                .map(|urls_node| {
                    urls_node
                        .children_named("Url")
                        .map(|u| FileUrls {
                            mu_url: u.attr("MuUrl").map(str::to_string),
                            uss_url: u.attr("UssUrl").map(str::to_string),
                        })
                        .collect()
                })
                .unwrap_or_default();

            Ok(ContentFile {
                file_name,
                size,
                digests,
                urls,
                patching_type,
            })
        })
        .collect()
}

fn parse_driver_metadata(node: &XNode) -> Result<DriverMetadata, WsyncError> {
    let hardware_id = node
        .attr("HardwareID")
        .ok_or_else(|| WsyncError::parse_error("/DriverMetaData", "missing mandatory @HardwareID"))?
        .to_string();

    let target_computer_hardware_ids = node
        .child("TargetComputerHardwareIds")
        .map(|n| parse_uuid_list(n, "Id"))
        .unwrap_or_default();
    let distribution_computer_hardware_ids = node
        .child("DistributionComputerHardwareIds")
        .map(|n| parse_uuid_list(n, "Id"))
        .unwrap_or_default();

    Ok(DriverMetadata {
        hardware_id,
        feature_score: node.attr("FeatureScore").map(str::to_string),
        target_computer_hardware_ids,
        distribution_computer_hardware_ids,
        version: node.attr("Version").map(str::to_string),
        date: node.attr("Date").map(str::to_string),
    })
}

fn parse_uuid_list(node: &XNode, child_name: &str) -> Vec<Uuid> {
    node.children_named(child_name)
        .filter_map(|c| Uuid::parse_str(c.text.trim()).ok())
        .collect()
}

fn parse_applicability(node: &XNode) -> ApplicabilityRules {
    let is_installed = node.child("IsInstalled").map(XNode::to_xml);
    let is_installable = node.child("IsInstallable").map(XNode::to_xml);
    let other_rules = RULE_ELEMENT_NAMES
        .iter()
        .filter_map(|name| node.child(name).map(|n| (name.to_string(), n.to_xml())))
        .collect();

    ApplicabilityRules {
        is_installed,
        is_installable,
        other_rules,
    }
}
