//! Static catalog of the signing tools and how each one is packaged.
//!
//! Entries are keyed by `{name}-{os}-{arch}`. A tool that is not published for
//! a platform simply has no entry there; [`ToolCatalog::lookup`] returns
//! `None` and the caller skips it.

use serde::Serialize;
use smsetup_core::{Arch, Os, Platform};
use std::collections::BTreeMap;

/// Signing Manager command line client.
pub const SMCTL: &str = "smctl";
/// PKCS#11 provider library.
pub const SMPKCS11: &str = "smpkcs11";
/// Full tool bundle.
pub const SMTOOLS: &str = "smtools";
/// macOS PKCS#11 shim library.
pub const SMPKCS11_SHIM: &str = "smpkcs11-shim";

/// What an installed tool is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolKind {
    /// A single program; its directory goes on PATH.
    Executable,
    /// A shared library loaded by other programs.
    Library,
    /// A directory of programs and libraries.
    ArchiveBundle,
}

/// How the CDN artifact is packaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArchiveKind {
    /// The artifact is the installed file itself.
    None,
    /// macOS disk image.
    Dmg,
    /// Windows Installer package.
    Msi,
    /// ZIP archive.
    Zip,
    /// Tarball, optionally gzip-compressed.
    Tar,
}

/// Platform step run on the installed directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum PostInstall {
    /// Create `link` pointing at the architecture-specific binary `target`.
    Symlink {
        /// Canonical name created in the install directory.
        link: &'static str,
        /// Binary the link points at, relative to the link.
        target: &'static str,
    },
    /// Copy the CSP/KSP libraries into the system directories and register
    /// them with the OS.
    RegisterCryptoProviders,
}

impl PostInstall {
    /// Whether the step must be repeated when the files come from the remote
    /// cache. Registration lives outside the cached directory.
    #[must_use]
    pub fn repeat_on_cache_restore(&self) -> bool {
        matches!(self, Self::RegisterCryptoProviders)
    }
}

/// Packaging facts for one tool on one platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ToolMetadata {
    /// Canonical tool name.
    pub name: &'static str,
    /// Platform this entry is published for.
    pub platform: Platform,
    /// File name on the CDN.
    pub download_name: &'static str,
    /// Name of the primary file inside the installed directory.
    pub installed_file_name: &'static str,
    /// What the installed tool is.
    pub tool_kind: ToolKind,
    /// How the CDN artifact is packaged.
    pub archive_kind: ArchiveKind,
    /// Set mode 0755 on the top-level files after install.
    pub needs_execute_bit: bool,
    /// Generate `pkcs11properties.cfg` next to the library.
    pub needs_pkcs11_config: bool,
    /// Step run on the installed directory.
    pub post_install: Option<PostInstall>,
    /// Arguments for a post-install `--version` style probe.
    pub version_args: Option<&'static [&'static str]>,
}

impl ToolMetadata {
    /// Qualified catalog key.
    #[must_use]
    pub fn key(&self) -> String {
        qualified_key(self.name, self.platform.os, self.platform.arch)
    }
}

/// Build the qualified catalog key `{name}-{os}-{arch}`.
#[must_use]
pub fn qualified_key(name: &str, os: Os, arch: Arch) -> String {
    format!("{name}-{os}-{arch}")
}

const VERSION_PROBE: &[&str] = &["--version"];

/// Immutable tool catalog.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    entries: BTreeMap<String, ToolMetadata>,
}

impl ToolCatalog {
    /// Catalog from explicit entries. Later entries replace earlier ones with
    /// the same key.
    #[must_use]
    pub fn new(entries: impl IntoIterator<Item = ToolMetadata>) -> Self {
        Self {
            entries: entries.into_iter().map(|t| (t.key(), t)).collect(),
        }
    }

    /// Look up a tool for a platform.
    #[must_use]
    pub fn lookup(&self, name: &str, os: Os, arch: Arch) -> Option<&ToolMetadata> {
        self.entries.get(&qualified_key(name, os, arch))
    }

    /// All entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = &ToolMetadata> {
        self.entries.values()
    }

    /// The published DigiCert signing tools.
    #[must_use]
    pub fn builtin() -> Self {
        let linux_x64 = Platform::new(Os::Linux, Arch::X64);
        let linux_arm64 = Platform::new(Os::Linux, Arch::Arm64);
        let windows_x64 = Platform::new(Os::Windows, Arch::X64);
        let mac_x64 = Platform::new(Os::MacOs, Arch::X64);
        let mac_arm64 = Platform::new(Os::MacOs, Arch::Arm64);

        let smctl = |platform, download_name, installed_file_name, archive_kind| ToolMetadata {
            name: SMCTL,
            platform,
            download_name,
            installed_file_name,
            tool_kind: ToolKind::Executable,
            archive_kind,
            needs_execute_bit: true,
            needs_pkcs11_config: false,
            post_install: None,
            version_args: Some(VERSION_PROBE),
        };
        let library = |name, platform, download_name, installed_file_name, pkcs11| ToolMetadata {
            name,
            platform,
            download_name,
            installed_file_name,
            tool_kind: ToolKind::Library,
            archive_kind: ArchiveKind::None,
            needs_execute_bit: false,
            needs_pkcs11_config: pkcs11,
            post_install: None,
            version_args: None,
        };

        Self::new([
            smctl(linux_x64, "smctl", "smctl", ArchiveKind::None),
            smctl(linux_arm64, "smctl-linux-arm64", "smctl", ArchiveKind::None),
            ToolMetadata {
                needs_execute_bit: false,
                ..smctl(windows_x64, "smctl-windows-x64.exe", "smctl.exe", ArchiveKind::None)
            },
            ToolMetadata {
                post_install: Some(PostInstall::Symlink {
                    link: "smctl",
                    target: "smctl-mac-x64",
                }),
                ..smctl(mac_x64, "smctl-mac.dmg", "smctl", ArchiveKind::Dmg)
            },
            ToolMetadata {
                post_install: Some(PostInstall::Symlink {
                    link: "smctl",
                    target: "smctl-mac-arm64",
                }),
                ..smctl(mac_arm64, "smctl-mac.dmg", "smctl", ArchiveKind::Dmg)
            },
            library(SMPKCS11, linux_x64, "smpkcs11.so", "smpkcs11.so", true),
            library(SMPKCS11, linux_arm64, "smpkcs11-linux-arm64.so", "smpkcs11.so", true),
            library(SMPKCS11, windows_x64, "smpkcs11.dll", "smpkcs11.dll", true),
            library(SMPKCS11, mac_x64, "smpkcs11.dylib", "smpkcs11.dylib", true),
            library(SMPKCS11, mac_arm64, "smpkcs11.dylib", "smpkcs11.dylib", true),
            library(SMPKCS11_SHIM, mac_x64, "smpkcs11-shim.dylib", "smpkcs11-shim.dylib", false),
            library(SMPKCS11_SHIM, mac_arm64, "smpkcs11-shim.dylib", "smpkcs11-shim.dylib", false),
            ToolMetadata {
                name: SMTOOLS,
                platform: windows_x64,
                download_name: "smtools-windows-x64.msi",
                installed_file_name: "smctl.exe",
                tool_kind: ToolKind::ArchiveBundle,
                archive_kind: ArchiveKind::Msi,
                needs_execute_bit: false,
                needs_pkcs11_config: false,
                post_install: Some(PostInstall::RegisterCryptoProviders),
                version_args: None,
            },
            ToolMetadata {
                name: SMTOOLS,
                platform: linux_x64,
                download_name: "smtools-linux-x64.zip",
                installed_file_name: "smctl",
                tool_kind: ToolKind::ArchiveBundle,
                archive_kind: ArchiveKind::Zip,
                needs_execute_bit: true,
                needs_pkcs11_config: false,
                post_install: None,
                version_args: None,
            },
            ToolMetadata {
                name: SMTOOLS,
                platform: linux_arm64,
                download_name: "smtools-linux-arm64.tar.gz",
                installed_file_name: "smctl",
                tool_kind: ToolKind::ArchiveBundle,
                archive_kind: ArchiveKind::Tar,
                needs_execute_bit: false,
                needs_pkcs11_config: false,
                post_install: None,
                version_args: None,
            },
        ])
    }
}
