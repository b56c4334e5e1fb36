//! Execute permissions for unpacked tools.

use std::path::Path;
use tracing::trace;

use crate::Result;

/// Mode given to the regular files of an installed directory.
pub const EXECUTABLE_MODE: u32 = 0o755;

/// Mark every regular file directly inside `dir` executable.
///
/// Archives built on Windows carry no Unix modes, so their binaries unpack
/// without the execute bit.
#[cfg(unix)]
pub fn normalize_execute_bits(dir: &Path) -> Result<()> {
    use crate::Error;
    use std::os::unix::fs::PermissionsExt;
    use walkdir::WalkDir;

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            Error::io(
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("filesystem loop")),
                path,
                "walk",
            )
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        trace!(path = ?entry.path(), "Setting execute bit");
        std::fs::set_permissions(entry.path(), std::fs::Permissions::from_mode(EXECUTABLE_MODE))
            .map_err(|e| Error::io(e, entry.path(), "chmod"))?;
    }
    Ok(())
}

/// Execute bits do not exist on this host.
#[cfg(not(unix))]
pub fn normalize_execute_bits(dir: &Path) -> Result<()> {
    trace!(?dir, "Execute bits not supported on this host");
    Ok(())
}
