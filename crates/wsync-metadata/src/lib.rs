// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod parse;
mod types;
pub mod xmltree;

pub use parse::parse_update;
pub use types::{
    ApplicabilityRules, CategoryPackage, CommonFields, ContentFile, DriverMetadata,
    DriverUpdatePackage, FileDigest, FileUrls, Handler, HandlerType, Package, Prerequisite,
    SoftwareUpdatePackage,
};
