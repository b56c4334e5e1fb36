//! Platform identification for tool selection.
//!
//! The catalog, the local cache and the remote cache key are all qualified by
//! the operating system and CPU architecture of the build machine.

use serde::{Deserialize, Serialize};

/// Platform identifier combining OS and architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    /// Operating system
    pub os: Os,
    /// CPU architecture
    pub arch: Arch,
}

impl Platform {
    /// Create a new platform.
    #[must_use]
    pub fn new(os: Os, arch: Arch) -> Self {
        Self { os, arch }
    }

    /// Get the current platform, if smsetup knows about it.
    #[must_use]
    pub fn current() -> Option<Self> {
        Some(Self {
            os: Os::current()?,
            arch: Arch::current()?,
        })
    }

    /// Parse from string like "linux-x64" or "macos/arm64".
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let (os, arch) = s.split_once(['-', '/'])?;
        Some(Self {
            os: Os::parse(os)?,
            arch: Arch::parse(arch)?,
        })
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.os, self.arch)
    }
}

/// Operating system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    Windows,
    Linux,
    #[serde(rename = "macos")]
    MacOs,
}

impl Os {
    /// Get the current OS.
    #[must_use]
    pub fn current() -> Option<Self> {
        Self::parse(std::env::consts::OS)
    }

    /// Parse from string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "windows" | "win32" => Some(Self::Windows),
            "linux" => Some(Self::Linux),
            "macos" | "darwin" | "mac" => Some(Self::MacOs),
            _ => None,
        }
    }
}

impl std::fmt::Display for Os {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Windows => write!(f, "windows"),
            Self::Linux => write!(f, "linux"),
            Self::MacOs => write!(f, "macos"),
        }
    }
}

/// CPU architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    X64,
    X86,
    Arm64,
}

impl Arch {
    /// Get the current architecture.
    #[must_use]
    pub fn current() -> Option<Self> {
        Self::parse(std::env::consts::ARCH)
    }

    /// Parse from string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "x64" | "x86_64" | "amd64" => Some(Self::X64),
            "x86" | "ia32" | "i686" => Some(Self::X86),
            "arm64" | "aarch64" => Some(Self::Arm64),
            _ => None,
        }
    }
}

impl std::fmt::Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::X64 => write!(f, "x64"),
            Self::X86 => write!(f, "x86"),
            Self::Arm64 => write!(f, "arm64"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_parse() {
        let p = Platform::parse("linux-x64").unwrap();
        assert_eq!(p.os, Os::Linux);
        assert_eq!(p.arch, Arch::X64);

        let p = Platform::parse("darwin/aarch64").unwrap();
        assert_eq!(p.os, Os::MacOs);
        assert_eq!(p.arch, Arch::Arm64);

        assert!(Platform::parse("invalid").is_none());
        assert!(Platform::parse("").is_none());
        assert!(Platform::parse("solaris-x64").is_none());
        assert!(Platform::parse("linux-mips").is_none());
    }

    #[test]
    fn test_platform_display() {
        assert_eq!(
            Platform::new(Os::Windows, Arch::X64).to_string(),
            "windows-x64"
        );
        assert_eq!(
            Platform::new(Os::MacOs, Arch::Arm64).to_string(),
            "macos-arm64"
        );
        assert_eq!(Platform::new(Os::Linux, Arch::X86).to_string(), "linux-x86");
    }

    #[test]
    fn test_os_parse_aliases() {
        assert_eq!(Os::parse("win32"), Some(Os::Windows));
        assert_eq!(Os::parse("Darwin"), Some(Os::MacOs));
        assert_eq!(Os::parse("LINUX"), Some(Os::Linux));
        assert_eq!(Os::parse("freebsd"), None);
    }

    #[test]
    fn test_arch_parse_aliases() {
        assert_eq!(Arch::parse("amd64"), Some(Arch::X64));
        assert_eq!(Arch::parse("x86_64"), Some(Arch::X64));
        assert_eq!(Arch::parse("ia32"), Some(Arch::X86));
        assert_eq!(Arch::parse("AARCH64"), Some(Arch::Arm64));
        assert_eq!(Arch::parse("riscv"), None);
    }

    #[test]
    fn test_platform_serde() {
        let p = Platform::new(Os::MacOs, Arch::X64);
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, r#"{"os":"macos","arch":"x64"}"#);
        let back: Platform = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }
}
