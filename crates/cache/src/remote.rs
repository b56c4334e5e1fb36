//! Remote shared cache.
//!
//! The remote cache survives ephemeral machines. An entry is addressed by a
//! key of the form `{tool}-{version}-{os}-{arch}` and holds the contents of a
//! set of local paths; restoring writes those paths back on a fresh machine.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use smsetup_core::Platform;
use std::fs::File;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

use crate::{Error, Result};

/// Build the remote cache key for a tool.
#[must_use]
pub fn remote_cache_key(tool: &str, version: &str, platform: Platform) -> String {
    format!("{tool}-{version}-{}-{}", platform.os, platform.arch)
}

/// A cache shared between machines.
#[async_trait]
pub trait RemoteCacheProvider: Send + Sync {
    /// Whether the provider can be used in this run.
    fn is_available(&self) -> bool;

    /// Restore `paths` from the entry stored under `key`.
    ///
    /// Returns the matched key on a hit and `None` on a miss.
    async fn restore(&self, paths: &[PathBuf], key: &str) -> Result<Option<String>>;

    /// Store `paths` under `key`, returning the provider's entry id.
    async fn save(&self, paths: &[PathBuf], key: &str) -> Result<i64>;
}

/// Provider used when no remote cache is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledRemoteCache;

#[async_trait]
impl RemoteCacheProvider for DisabledRemoteCache {
    fn is_available(&self) -> bool {
        false
    }

    async fn restore(&self, _paths: &[PathBuf], _key: &str) -> Result<Option<String>> {
        Err(Error::unavailable("no remote cache configured"))
    }

    async fn save(&self, _paths: &[PathBuf], _key: &str) -> Result<i64> {
        Err(Error::unavailable("no remote cache configured"))
    }
}

/// Remote cache backed by a shared directory (network mount, runner volume).
///
/// Each entry is one zstd-compressed tarball named after the key. Inside the
/// archive, the contents of `paths[i]` live under the top-level directory `i`.
#[derive(Debug, Clone)]
pub struct DirectoryRemoteCache {
    root: PathBuf,
}

impl DirectoryRemoteCache {
    /// Create a provider storing archives under `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Archive path for a key.
    #[must_use]
    pub fn archive_path(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || "-_.".contains(c) { c } else { '_' })
            .collect();
        self.root.join(format!("{name}.tar.zst"))
    }
}

/// Stable entry id derived from the key.
fn entry_id(key: &str) -> i64 {
    let digest = Sha256::digest(key.as_bytes());
    let mut bytes = [0u8; 8];
    bytes[1..].copy_from_slice(&digest.as_slice()[..7]);
    i64::from_be_bytes(bytes)
}

fn write_archive(paths: &[PathBuf], archive: &Path) -> Result<()> {
    let parent = archive
        .parent()
        .ok_or_else(|| Error::archive(format!("{} has no parent", archive.display())))?;
    std::fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create"))?;

    // Written next to the destination so the final rename is atomic.
    let staging = tempfile::NamedTempFile::new_in(parent).map_err(|e| Error::io(e, parent, "create"))?;
    let enc = zstd::Encoder::new(staging.as_file(), 3)
        .map_err(|e| Error::archive(format!("zstd encoder error: {e}")))?;
    let mut builder = tar::Builder::new(enc);
    builder.follow_symlinks(false);

    for (index, path) in paths.iter().enumerate() {
        if !path.exists() {
            return Err(Error::archive(format!(
                "path to cache does not exist: {}",
                path.display()
            )));
        }
        builder
            .append_dir_all(index.to_string(), path)
            .map_err(|e| Error::archive(format!("tar append failed for {}: {e}", path.display())))?;
    }

    let enc = builder
        .into_inner()
        .map_err(|e| Error::archive(format!("tar finalize failed: {e}")))?;
    enc.finish()
        .map_err(|e| Error::archive(format!("zstd finish failed: {e}")))?;

    staging
        .persist_noclobber(archive)
        .map_err(|e| match e.error.kind() {
            std::io::ErrorKind::AlreadyExists => Error::already_exists(archive.display().to_string()),
            _ => Error::io(e.error, archive, "persist"),
        })?;
    Ok(())
}

/// Restore `paths` from `archive`.
///
/// Entries are unpacked into a staging directory beside each destination and
/// only moved into place once the whole archive has been read, so a failed
/// restore leaves the destinations untouched.
fn read_archive(paths: &[PathBuf], archive: &Path) -> Result<()> {
    let mut staging = Vec::with_capacity(paths.len());
    for path in paths {
        let parent = path
            .parent()
            .ok_or_else(|| Error::archive(format!("{} has no parent", path.display())))?;
        std::fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create"))?;
        let dir = tempfile::Builder::new()
            .prefix(".smsetup-restore-")
            .tempdir_in(parent)
            .map_err(|e| Error::io(e, parent, "create temp dir"))?;
        staging.push(dir);
    }
    let staged: Vec<PathBuf> = staging.iter().map(|dir| dir.path().to_path_buf()).collect();

    unpack_archive(&staged, archive)?;
    for (source, dest) in staged.iter().zip(paths) {
        publish_staged(source, dest)?;
    }
    Ok(())
}

fn unpack_archive(roots: &[PathBuf], archive: &Path) -> Result<()> {
    let file = File::open(archive).map_err(|e| Error::io(e, archive, "open"))?;
    let dec = zstd::Decoder::new(file).map_err(|e| Error::archive(format!("zstd decoder error: {e}")))?;
    let mut tar = tar::Archive::new(dec);
    tar.set_preserve_permissions(true);

    let entries = tar
        .entries()
        .map_err(|e| Error::archive(format!("failed to read archive: {e}")))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| Error::archive(format!("failed to read entry: {e}")))?;
        let entry_path = entry
            .path()
            .map_err(|e| Error::archive(format!("invalid entry path: {e}")))?
            .into_owned();

        let mut components = entry_path.components();
        let index = match components.next() {
            Some(Component::Normal(first)) => first.to_string_lossy().parse::<usize>().ok(),
            _ => None,
        };
        let Some(dest_root) = index.and_then(|i| roots.get(i)) else {
            return Err(Error::archive(format!(
                "entry {} does not belong to a restored path",
                entry_path.display()
            )));
        };
        let relative: PathBuf = components.collect();
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(Error::archive(format!(
                "entry {} escapes its destination",
                entry_path.display()
            )));
        }

        let target = dest_root.join(&relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create"))?;
        }
        if entry.header().entry_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| Error::io(e, &target, "create"))?;
            continue;
        }
        entry
            .unpack(&target)
            .map_err(|e| Error::archive(format!("failed to unpack {}: {e}", target.display())))?;
    }
    Ok(())
}

/// Move the children of `staged` into `dest`, replacing existing entries.
///
/// Directories move before files so completion markers land last.
fn publish_staged(staged: &Path, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest).map_err(|e| Error::io(e, dest, "create"))?;
    let mut children = std::fs::read_dir(staged)
        .map_err(|e| Error::io(e, staged, "read dir"))?
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| Error::io(e, staged, "read dir"))?;
    children.sort_by_key(|child| !child.path().is_dir());

    for child in children {
        let target = dest.join(child.file_name());
        if let Ok(existing) = target.symlink_metadata() {
            let removed = if existing.is_dir() {
                std::fs::remove_dir_all(&target)
            } else {
                std::fs::remove_file(&target)
            };
            removed.map_err(|e| Error::io(e, &target, "remove"))?;
        }
        std::fs::rename(child.path(), &target).map_err(|e| Error::io(e, &target, "rename"))?;
    }
    Ok(())
}

#[async_trait]
impl RemoteCacheProvider for DirectoryRemoteCache {
    fn is_available(&self) -> bool {
        true
    }

    async fn restore(&self, paths: &[PathBuf], key: &str) -> Result<Option<String>> {
        let archive = self.archive_path(key);
        if !archive.is_file() {
            debug!(key, ?archive, "Remote cache miss");
            return Ok(None);
        }

        let paths = paths.to_vec();
        let archive_clone = archive.clone();
        tokio::task::spawn_blocking(move || read_archive(&paths, &archive_clone))
            .await
            .map_err(|e| Error::archive(format!("restore task failed: {e}")))??;

        info!(key, ?archive, "Restored from remote cache");
        Ok(Some(key.to_string()))
    }

    async fn save(&self, paths: &[PathBuf], key: &str) -> Result<i64> {
        let archive = self.archive_path(key);
        if archive.exists() {
            return Err(Error::already_exists(key));
        }

        let paths = paths.to_vec();
        let archive_clone = archive.clone();
        tokio::task::spawn_blocking(move || write_archive(&paths, &archive_clone))
            .await
            .map_err(|e| Error::archive(format!("save task failed: {e}")))??;

        let id = entry_id(key);
        info!(key, id, ?archive, "Saved to remote cache");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smsetup_core::{Arch, Os};
    use tempfile::TempDir;

    fn write_raw_archive(path: &Path, files: &[(&str, &[u8])]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let enc = zstd::Encoder::new(File::create(path).unwrap(), 3).unwrap();
        let mut builder = tar::Builder::new(enc);
        for (name, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *content).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn test_remote_cache_key_format() {
        let key = remote_cache_key("smctl", "1.0.0", Platform::new(Os::Linux, Arch::X64));
        assert_eq!(key, "smctl-1.0.0-linux-x64");

        let key = remote_cache_key(
            "smtools",
            "0.0.0-deadbeef",
            Platform::new(Os::Windows, Arch::X64),
        );
        assert_eq!(key, "smtools-0.0.0-deadbeef-windows-x64");
    }

    #[test]
    fn test_archive_path_sanitizes_key() {
        let cache = DirectoryRemoteCache::new("/shared");
        assert_eq!(
            cache.archive_path("smctl-1.0.0-linux-x64"),
            PathBuf::from("/shared/smctl-1.0.0-linux-x64.tar.zst")
        );
        assert_eq!(
            cache.archive_path("a/b c"),
            PathBuf::from("/shared/a_b_c.tar.zst")
        );
    }

    #[test]
    fn test_entry_id_is_stable_and_positive() {
        assert_eq!(entry_id("smctl-1.0.0-linux-x64"), entry_id("smctl-1.0.0-linux-x64"));
        assert!(entry_id("smctl-1.0.0-linux-x64") >= 0);
    }

    #[tokio::test]
    async fn test_disabled_cache() {
        let cache = DisabledRemoteCache;
        assert!(!cache.is_available());
        assert!(matches!(
            cache.restore(&[], "key").await,
            Err(Error::Unavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_directory_cache_restore_miss() {
        let temp = TempDir::new().unwrap();
        let cache = DirectoryRemoteCache::new(temp.path().join("shared"));
        let restored = cache
            .restore(&[temp.path().join("dest")], "smctl-1.0.0-linux-x64")
            .await
            .unwrap();
        assert!(restored.is_none());
    }

    #[tokio::test]
    async fn test_directory_cache_save_then_restore_on_fresh_machine() {
        let shared = TempDir::new().unwrap();
        let cache = DirectoryRemoteCache::new(shared.path());

        let machine_a = TempDir::new().unwrap();
        let version_dir = machine_a.path().join("smctl").join("1.0.0");
        std::fs::create_dir_all(version_dir.join("x64")).unwrap();
        std::fs::write(version_dir.join("x64").join("smctl"), b"binary").unwrap();
        std::fs::write(version_dir.join("x64.complete"), b"").unwrap();

        let id = cache
            .save(&[version_dir.clone()], "smctl-1.0.0-linux-x64")
            .await
            .unwrap();
        assert_eq!(id, entry_id("smctl-1.0.0-linux-x64"));

        let machine_b = TempDir::new().unwrap();
        let restore_dir = machine_b.path().join("smctl").join("1.0.0");
        let hit = cache
            .restore(&[restore_dir.clone()], "smctl-1.0.0-linux-x64")
            .await
            .unwrap();

        assert_eq!(hit.as_deref(), Some("smctl-1.0.0-linux-x64"));
        assert_eq!(
            std::fs::read(restore_dir.join("x64").join("smctl")).unwrap(),
            b"binary"
        );
        assert!(restore_dir.join("x64.complete").exists());
    }

    #[tokio::test]
    async fn test_rejected_entry_leaves_destination_untouched() {
        let shared = TempDir::new().unwrap();
        let cache = DirectoryRemoteCache::new(shared.path());
        let key = "smctl-1.0.0-linux-x64";
        write_raw_archive(
            &cache.archive_path(key),
            &[("0/x64/smctl", b"binary"), ("0/x64.complete", b""), ("7/x64/smctl", b"stray")],
        );

        let machine = TempDir::new().unwrap();
        let dest = machine.path().join("smctl").join("1.0.0");
        let result = cache.restore(&[dest.clone()], key).await;

        assert!(matches!(result, Err(Error::Archive { .. })));
        assert!(!dest.join("x64.complete").exists());
        assert!(!dest.join("x64").exists());
        let leftovers: Vec<_> = std::fs::read_dir(machine.path().join("smctl"))
            .unwrap()
            .collect();
        assert!(leftovers.is_empty(), "staging directory left behind");
    }

    #[tokio::test]
    async fn test_restore_replaces_stale_entry() {
        let shared = TempDir::new().unwrap();
        let cache = DirectoryRemoteCache::new(shared.path());
        let key = "smctl-1.0.0-linux-x64";
        write_raw_archive(
            &cache.archive_path(key),
            &[("0/x64/smctl", b"fresh"), ("0/x64.complete", b"")],
        );

        let machine = TempDir::new().unwrap();
        let dest = machine.path().join("smctl").join("1.0.0");
        std::fs::create_dir_all(dest.join("x64")).unwrap();
        std::fs::write(dest.join("x64").join("stale"), b"old").unwrap();
        std::fs::create_dir_all(dest.join("arm64")).unwrap();

        cache.restore(&[dest.clone()], key).await.unwrap();

        assert_eq!(std::fs::read(dest.join("x64").join("smctl")).unwrap(), b"fresh");
        assert!(!dest.join("x64").join("stale").exists());
        assert!(dest.join("x64.complete").is_file());
        assert!(dest.join("arm64").is_dir());
    }

    #[tokio::test]
    async fn test_directory_cache_save_twice_conflicts() {
        let shared = TempDir::new().unwrap();
        let cache = DirectoryRemoteCache::new(shared.path());
        let source = TempDir::new().unwrap();
        std::fs::write(source.path().join("f"), b"x").unwrap();

        cache
            .save(&[source.path().to_path_buf()], "k")
            .await
            .unwrap();
        let second = cache.save(&[source.path().to_path_buf()], "k").await;
        assert!(matches!(second, Err(Error::AlreadyExists { .. })));
    }

    #[tokio::test]
    async fn test_directory_cache_save_missing_path_fails() {
        let shared = TempDir::new().unwrap();
        let cache = DirectoryRemoteCache::new(shared.path());
        let result = cache
            .save(&[shared.path().join("does-not-exist")], "k")
            .await;
        assert!(matches!(result, Err(Error::Archive { .. })));
        assert!(!cache.archive_path("k").exists());
    }
}
