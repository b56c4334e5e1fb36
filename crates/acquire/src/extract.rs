//! Archive extraction dispatcher.
//!
//! [`Extractor::open`] turns a downloaded artifact into a directory of files
//! according to the tool's [`ArchiveKind`] and returns an [`Extraction`]
//! guard that owns that directory. [`Extraction::with_contents`] runs a
//! callback on the directory and releases it afterwards on every path: the
//! scratch directory is removed, a mounted disk image is detached. Failing to
//! mount is an error; failing to detach is only logged.

use smsetup_core::CommandRunner;
use std::fs::File;
use std::future::Future;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::{ArchiveKind, ToolMetadata};
use crate::{Error, Result};

/// Exit code returned by msiexec when the product is not installed.
pub const MSI_UNKNOWN_PRODUCT: i32 = 1605;

const HDIUTIL: &str = "hdiutil";
const MSIEXEC: &str = "msiexec";

/// Opens downloaded artifacts.
#[derive(Clone)]
pub struct Extractor {
    runner: Arc<dyn CommandRunner>,
    temp_root: PathBuf,
}

enum Contents {
    /// Scratch directory removed on release.
    Scratch(TempDir),
    /// Disk image mounted at the path; detached on release.
    Mounted(PathBuf),
    /// Directory owned by the OS installer; left in place.
    Installed,
}

/// Guard owning the unpacked contents of one artifact.
pub struct Extraction {
    tool: String,
    path: PathBuf,
    contents: Option<Contents>,
    runner: Arc<dyn CommandRunner>,
}

impl Extractor {
    /// Create an extractor placing its working directories under `temp_root`.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, temp_root: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            temp_root: temp_root.into(),
        }
    }

    /// Extract `artifact`, run `callback` on the contents and release them.
    ///
    /// The callback's error is returned after cleanup has run.
    pub async fn extract<T, F, Fut>(
        &self,
        tool: &ToolMetadata,
        artifact: &Path,
        callback: F,
    ) -> Result<T>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.open(tool, artifact).await?.with_contents(callback).await
    }

    /// Unpack `artifact` according to `tool.archive_kind`.
    pub async fn open(&self, tool: &ToolMetadata, artifact: &Path) -> Result<Extraction> {
        debug!(tool = tool.name, kind = ?tool.archive_kind, ?artifact, "Extracting");
        let (path, contents) = match tool.archive_kind {
            ArchiveKind::None => {
                let dir = self.scratch_dir(tool)?;
                let dest = dir.path().join(tool.installed_file_name);
                tokio::fs::copy(artifact, &dest)
                    .await
                    .map_err(|e| Error::io(e, &dest, "copy"))?;
                (dir.path().to_path_buf(), Contents::Scratch(dir))
            }
            ArchiveKind::Zip | ArchiveKind::Tar => {
                let dir = self.scratch_dir(tool)?;
                let dest = dir.path().to_path_buf();
                let source = artifact.to_path_buf();
                let kind = tool.archive_kind;
                let name = tool.name;
                tokio::task::spawn_blocking(move || {
                    let unpacked = if kind == ArchiveKind::Zip {
                        unpack_zip(&source, &dest)
                    } else {
                        unpack_tar(&source, &dest)
                    };
                    unpacked.map_err(|e| Error::extraction(name, e.to_string()))
                })
                .await
                .map_err(|e| Error::task(&e))??;
                (dir.path().to_path_buf(), Contents::Scratch(dir))
            }
            ArchiveKind::Dmg => {
                let mount_point = self.mount(tool, artifact).await?;
                (mount_point.clone(), Contents::Mounted(mount_point))
            }
            ArchiveKind::Msi => (self.msi_install(tool, artifact).await?, Contents::Installed),
        };

        Ok(Extraction {
            tool: tool.name.to_string(),
            path,
            contents: Some(contents),
            runner: Arc::clone(&self.runner),
        })
    }

    fn ensure_temp_root(&self) -> Result<()> {
        std::fs::create_dir_all(&self.temp_root).map_err(|e| Error::io(e, &self.temp_root, "create"))
    }

    fn scratch_dir(&self, tool: &ToolMetadata) -> Result<TempDir> {
        self.ensure_temp_root()?;
        tempfile::Builder::new()
            .prefix(&format!("smsetup-{}-", tool.name))
            .tempdir_in(&self.temp_root)
            .map_err(|e| Error::io(e, &self.temp_root, "create temp dir"))
    }

    async fn mount(&self, tool: &ToolMetadata, image: &Path) -> Result<PathBuf> {
        self.ensure_temp_root()?;
        let mount_point = self
            .temp_root
            .join(format!("smsetup-dmg-{}", Uuid::new_v4().simple()));
        std::fs::create_dir_all(&mount_point).map_err(|e| Error::io(e, &mount_point, "create"))?;

        let args = vec![
            "attach".to_string(),
            "-nobrowse".to_string(),
            "-readonly".to_string(),
            "-noautoopen".to_string(),
            "-mountpoint".to_string(),
            mount_point.display().to_string(),
            image.display().to_string(),
        ];
        let failure = match self.runner.run(Path::new(HDIUTIL), &args).await {
            Ok(output) if output.is_success() => None,
            Ok(output) => Some(format!(
                "hdiutil attach exited with code {}: {}",
                output.code,
                output.stderr.trim()
            )),
            Err(e) => Some(e.to_string()),
        };

        if let Some(message) = failure {
            let _ = std::fs::remove_dir(&mount_point);
            return Err(Error::extraction(
                tool.name,
                format!("failed to mount {}: {message}", image.display()),
            ));
        }
        info!(tool = tool.name, ?mount_point, "Mounted disk image");
        Ok(mount_point)
    }

    async fn msi_install(&self, tool: &ToolMetadata, package: &Path) -> Result<PathBuf> {
        self.ensure_temp_root()?;
        let package_arg = package.display().to_string();

        let uninstall = self
            .runner
            .run(
                Path::new(MSIEXEC),
                &[
                    "/x".to_string(),
                    package_arg.clone(),
                    "/quiet".to_string(),
                    "/norestart".to_string(),
                ],
            )
            .await?;
        match uninstall.code {
            0 => debug!(tool = tool.name, "Removed previous installation"),
            MSI_UNKNOWN_PRODUCT => debug!(tool = tool.name, "No previous installation"),
            code => {
                return Err(Error::command(
                    format!("{MSIEXEC} /x"),
                    code,
                    uninstall.stderr,
                ));
            }
        }

        // The installer owns this directory once it has run.
        let install_dir = tempfile::Builder::new()
            .prefix(&format!("smsetup-{}-", tool.name))
            .tempdir_in(&self.temp_root)
            .map_err(|e| Error::io(e, &self.temp_root, "create temp dir"))?
            .keep();
        let log_dir = tempfile::Builder::new()
            .prefix("smsetup-msi-log-")
            .tempdir_in(&self.temp_root)
            .map_err(|e| Error::io(e, &self.temp_root, "create temp dir"))?;
        let log_file = log_dir.path().join("install.log");

        let install = self
            .runner
            .run(
                Path::new(MSIEXEC),
                &[
                    "/i".to_string(),
                    package_arg,
                    "/quiet".to_string(),
                    "/norestart".to_string(),
                    format!("INSTALLDIR={}", install_dir.display()),
                    "/L*v".to_string(),
                    log_file.display().to_string(),
                ],
            )
            .await?;

        if !install.is_success() {
            let log = match std::fs::read(&log_file) {
                Ok(bytes) => decode_log(&bytes),
                Err(e) => format!("installer log {} unreadable: {e}", log_file.display()),
            };
            return Err(Error::Install {
                tool: tool.name.to_string(),
                code: install.code,
                log,
            });
        }

        info!(tool = tool.name, ?install_dir, "Installed package");
        Ok(install_dir)
    }
}

impl std::fmt::Debug for Extractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extractor")
            .field("temp_root", &self.temp_root)
            .finish_non_exhaustive()
    }
}

impl Extraction {
    /// Run `f` on the contents, then release them.
    pub async fn with_contents<T, F, Fut>(mut self, f: F) -> Result<T>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let result = f(self.path.clone()).await;
        self.release().await;
        result
    }

    /// Release the contents. Errors are logged.
    pub async fn release(&mut self) {
        match self.contents.take() {
            Some(Contents::Scratch(dir)) => {
                if let Err(e) = dir.close() {
                    warn!(tool = %self.tool, error = %e, "Failed to remove extraction directory");
                }
            }
            Some(Contents::Mounted(mount_point)) => {
                let args = vec!["detach".to_string(), mount_point.display().to_string()];
                match self.runner.run(Path::new(HDIUTIL), &args).await {
                    Ok(output) if output.is_success() => {
                        debug!(tool = %self.tool, ?mount_point, "Detached disk image");
                        let _ = std::fs::remove_dir(&mount_point);
                    }
                    Ok(output) => warn!(
                        tool = %self.tool,
                        ?mount_point,
                        code = output.code,
                        stderr = %output.stderr.trim(),
                        "Failed to detach disk image"
                    ),
                    Err(e) => warn!(tool = %self.tool, ?mount_point, error = %e, "Failed to detach disk image"),
                }
            }
            Some(Contents::Installed) | None => {}
        }
    }
}

impl Drop for Extraction {
    fn drop(&mut self) {
        if let Some(Contents::Mounted(mount_point)) = &self.contents {
            warn!(tool = %self.tool, ?mount_point, "Disk image dropped while still mounted");
        }
    }
}

impl std::fmt::Debug for Extraction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extraction")
            .field("tool", &self.tool)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Decode an installer log. msiexec writes UTF-16LE with a byte order mark.
fn decode_log(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFF, 0xFE]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    }
}

fn unpack_zip(archive: &Path, dest: &Path) -> std::io::Result<()> {
    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(BufReader::new(file)).map_err(std::io::Error::other)?;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(std::io::Error::other)?;
        let Some(relative) = entry.enclosed_name() else {
            warn!(name = entry.name(), "Skipping zip entry outside the archive root");
            continue;
        };
        let outpath = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&outpath)?;
            continue;
        }
        if let Some(parent) = outpath.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&outpath)?;
        std::io::copy(&mut entry, &mut out)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&outpath, std::fs::Permissions::from_mode(mode))?;
        }
    }
    Ok(())
}

fn unpack_tar(archive: &Path, dest: &Path) -> std::io::Result<()> {
    let mut magic = [0u8; 2];
    let gzipped = {
        let mut file = File::open(archive)?;
        file.read_exact(&mut magic).is_ok() && magic == [0x1f, 0x8b]
    };

    let file = BufReader::new(File::open(archive)?);
    let reader: Box<dyn Read> = if gzipped {
        Box::new(flate2::read::GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    let mut tar = tar::Archive::new(reader);
    tar.set_preserve_permissions(true);
    tar.unpack(dest)
}
