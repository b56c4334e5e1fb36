//! On-machine tool cache.
//!
//! Layout:
//! ```text
//! <root>/
//! └── <tool>/
//!     └── <version>/
//!         ├── <arch>/          # installed files
//!         └── <arch>.complete  # marker written once the entry is usable
//! ```
//!
//! An entry without its marker is treated as absent, so a run that dies
//! half-way through installation never produces a false hit.

use smsetup_core::Arch;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::{Error, Result};

/// Local tool cache rooted at a directory.
#[derive(Debug, Clone)]
pub struct LocalToolCache {
    root: PathBuf,
}

impl LocalToolCache {
    /// Create a cache at the specified root directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Get the cache root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every architecture of one tool version.
    #[must_use]
    pub fn version_dir(&self, tool: &str, version: &str) -> PathBuf {
        self.root.join(tool).join(version)
    }

    /// Directory holding the installed files of one entry.
    #[must_use]
    pub fn tool_dir(&self, tool: &str, version: &str, arch: Arch) -> PathBuf {
        self.version_dir(tool, version).join(arch.to_string())
    }

    fn marker_path(&self, tool: &str, version: &str, arch: Arch) -> PathBuf {
        self.version_dir(tool, version)
            .join(format!("{arch}.complete"))
    }

    /// Look up a completed entry.
    #[must_use]
    pub fn find(&self, tool: &str, version: &str, arch: Arch) -> Option<PathBuf> {
        let dir = self.tool_dir(tool, version, arch);
        if dir.is_dir() && self.marker_path(tool, version, arch).is_file() {
            trace!(tool, version, %arch, ?dir, "Local cache hit");
            Some(dir)
        } else {
            trace!(tool, version, %arch, "Local cache miss");
            None
        }
    }

    /// Create an empty entry directory, discarding any previous content.
    ///
    /// The entry stays invisible to [`find`](Self::find) until
    /// [`mark_complete`](Self::mark_complete) is called.
    pub fn prepare(&self, tool: &str, version: &str, arch: Arch) -> Result<PathBuf> {
        let dir = self.tool_dir(tool, version, arch);
        let marker = self.marker_path(tool, version, arch);

        if marker.exists() {
            std::fs::remove_file(&marker).map_err(|e| Error::io(e, &marker, "remove"))?;
        }
        if dir.exists() {
            std::fs::remove_dir_all(&dir).map_err(|e| Error::io(e, &dir, "remove"))?;
        }
        std::fs::create_dir_all(&dir).map_err(|e| Error::io(e, &dir, "create"))?;
        Ok(dir)
    }

    /// Write the completion marker for an entry.
    pub fn mark_complete(&self, tool: &str, version: &str, arch: Arch) -> Result<PathBuf> {
        let marker = self.marker_path(tool, version, arch);
        std::fs::write(&marker, b"").map_err(|e| Error::io(e, &marker, "write"))?;
        let dir = self.tool_dir(tool, version, arch);
        debug!(tool, version, %arch, ?dir, "Stored tool in local cache");
        Ok(dir)
    }
}

/// Recursively copy the contents of `source` into `dest`.
///
/// File permissions are preserved; symbolic links are recreated rather than
/// followed.
pub fn copy_dir_all(source: &Path, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest).map_err(|e| Error::io(e, dest, "create"))?;

    for entry in WalkDir::new(source).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| source.to_path_buf());
            Error::io(
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("filesystem loop")),
                path,
                "walk",
            )
        })?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|_| Error::archive(format!("{} escapes {}", entry.path().display(), source.display())))?;
        let target = dest.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| Error::io(e, &target, "create"))?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target).map_err(|e| Error::io(e, &target, "copy"))?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> Result<()> {
    let points_to = std::fs::read_link(link).map_err(|e| Error::io(e, link, "read link"))?;
    std::os::unix::fs::symlink(&points_to, target).map_err(|e| Error::io(e, target, "symlink"))
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, target: &Path) -> Result<()> {
    std::fs::copy(link, target)
        .map(|_| ())
        .map_err(|e| Error::io(e, target, "copy"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_cache_paths() {
        let cache = LocalToolCache::new("/opt/toolcache");
        assert_eq!(
            cache.tool_dir("smctl", "1.0.0", Arch::X64),
            PathBuf::from("/opt/toolcache/smctl/1.0.0/x64")
        );
        assert_eq!(
            cache.version_dir("smctl", "0.0.0-deadbeef"),
            PathBuf::from("/opt/toolcache/smctl/0.0.0-deadbeef")
        );
    }

    #[test]
    fn test_find_requires_marker() -> Result<()> {
        let temp = TempDir::new().map_err(|e| Error::io_no_path(e, "tempdir"))?;
        let cache = LocalToolCache::new(temp.path());

        let dir = cache.prepare("smctl", "1.0.0", Arch::X64)?;
        std::fs::write(dir.join("smctl"), b"bin").unwrap();
        assert!(cache.find("smctl", "1.0.0", Arch::X64).is_none());

        cache.mark_complete("smctl", "1.0.0", Arch::X64)?;
        assert_eq!(cache.find("smctl", "1.0.0", Arch::X64), Some(dir));
        assert!(cache.find("smctl", "1.0.0", Arch::Arm64).is_none());
        assert!(cache.find("smctl", "2.0.0", Arch::X64).is_none());
        Ok(())
    }

    #[test]
    fn test_prepare_discards_previous_entry() -> Result<()> {
        let temp = TempDir::new().map_err(|e| Error::io_no_path(e, "tempdir"))?;
        let cache = LocalToolCache::new(temp.path());

        let dir = cache.prepare("smtools", "1.0.0", Arch::X64)?;
        std::fs::write(dir.join("stale"), b"old").unwrap();
        cache.mark_complete("smtools", "1.0.0", Arch::X64)?;

        let dir = cache.prepare("smtools", "1.0.0", Arch::X64)?;
        assert!(!dir.join("stale").exists());
        assert!(cache.find("smtools", "1.0.0", Arch::X64).is_none());
        Ok(())
    }

    #[test]
    fn test_copied_tree_visible_once_complete() -> Result<()> {
        let temp = TempDir::new().map_err(|e| Error::io_no_path(e, "tempdir"))?;
        let source = temp.path().join("src");
        std::fs::create_dir_all(source.join("lib")).unwrap();
        std::fs::write(source.join("smtools.exe"), b"tool").unwrap();
        std::fs::write(source.join("lib").join("smksp.dll"), b"dll").unwrap();

        let cache = LocalToolCache::new(temp.path().join("cache"));
        let dir = cache.prepare("smtools", "1.0.0", Arch::X64)?;
        copy_dir_all(&source, &dir)?;
        assert!(cache.find("smtools", "1.0.0", Arch::X64).is_none());
        cache.mark_complete("smtools", "1.0.0", Arch::X64)?;

        assert_eq!(std::fs::read(dir.join("smtools.exe")).unwrap(), b"tool");
        assert_eq!(std::fs::read(dir.join("lib").join("smksp.dll")).unwrap(), b"dll");
        assert_eq!(cache.find("smtools", "1.0.0", Arch::X64), Some(dir));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_dir_all_preserves_symlinks_and_modes() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().map_err(|e| Error::io_no_path(e, "tempdir"))?;
        let source = temp.path().join("src");
        std::fs::create_dir_all(&source).unwrap();
        let binary = source.join("smctl-mac-arm64");
        std::fs::write(&binary, b"bin").unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();
        std::os::unix::fs::symlink("smctl-mac-arm64", source.join("smctl")).unwrap();

        let dest = temp.path().join("dest");
        copy_dir_all(&source, &dest)?;

        let link = std::fs::read_link(dest.join("smctl")).unwrap();
        assert_eq!(link, PathBuf::from("smctl-mac-arm64"));
        let mode = std::fs::metadata(dest.join("smctl-mac-arm64"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);
        Ok(())
    }
}
