//! Acquisition of the DigiCert signing tools
//!
//! Given a platform and a CDN, [`ToolAcquirer`] resolves each tool's cache
//! version, reuses local or remote cache entries when possible, and otherwise
//! downloads, extracts and installs the tool. [`setup_platform_tools`] does
//! this concurrently for every tool a platform needs.

pub mod acquirer;
pub mod builder;
pub mod catalog;
pub mod download;
mod error;
pub mod extract;
pub mod install;
pub mod setup;
pub mod version;

pub use acquirer::{AcquiredTool, AcquisitionSource, ToolAcquirer};
pub use builder::ToolAcquirerBuilder;
pub use catalog::{ArchiveKind, PostInstall, ToolCatalog, ToolKind, ToolMetadata};
pub use download::{Downloader, HttpDownloader};
pub use error::{Error, Result};
pub use extract::{Extraction, Extractor};
pub use setup::{platform_tools, setup_platform_tools};
pub use version::{ResolvedVersion, VersionResolver};
