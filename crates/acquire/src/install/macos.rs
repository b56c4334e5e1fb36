//! macOS canonical binary name.

use std::path::Path;
use tracing::{debug, warn};

/// Point `dir/link` at the architecture-specific binary `dir/target`.
///
/// An existing entry at `link` is replaced. Failure is logged and does not
/// fail the acquisition; the architecture-specific binary stays usable.
pub fn link_canonical_name(dir: &Path, link: &str, target: &str) {
    let link_path = dir.join(link);
    if let Err(e) = replace_symlink(&link_path, target) {
        warn!(?link_path, target, error = %e, "Failed to create symlink");
    } else {
        debug!(?link_path, target, "Linked canonical binary name");
    }
}

#[cfg(unix)]
fn replace_symlink(link_path: &Path, target: &str) -> std::io::Result<()> {
    if link_path.symlink_metadata().is_ok() {
        std::fs::remove_file(link_path)?;
    }
    std::os::unix::fs::symlink(target, link_path)
}

#[cfg(not(unix))]
fn replace_symlink(_link_path: &Path, _target: &str) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "symlinks are only created on Unix hosts",
    ))
}
