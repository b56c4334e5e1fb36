//! Tool acquisition orchestrator.
//!
//! One acquisition runs strictly in order: resolve the version, optionally
//! restore from the remote cache, then either use the local cache entry or
//! download, extract, run post-install steps and store a new entry. A fresh
//! entry is saved to the remote cache in the background when the restore
//! missed.

use serde::Serialize;
use smsetup_cache::{LocalToolCache, RemoteCacheProvider, copy_dir_all, remote_cache_key};
use smsetup_core::{
    ActionConfig, CommandRunner, OutputSink, PKCS11_CONFIG_OUTPUT, Platform, RetryPolicy,
    RunnerEnvironment, retry_with_backoff, retry_with_backoff_if,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::builder::ToolAcquirerBuilder;
use crate::catalog::{ToolCatalog, ToolKind, ToolMetadata};
use crate::download::{Downloader, file_sha256};
use crate::extract::Extractor;
use crate::install::PostInstaller;
use crate::install::pkcs11::ensure_config;
use crate::version::{ResolvedVersion, VersionResolver};
use crate::{Error, Result};

/// Where an acquired tool came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AcquisitionSource {
    /// Local cache entry from an earlier run on this machine.
    LocalCache,
    /// Local cache entry restored from the remote cache.
    RemoteCache,
    /// Downloaded and installed in this run.
    Downloaded,
}

/// An installed tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct AcquiredTool {
    /// Catalog name.
    pub name: String,
    /// Resolved version used for both cache tiers.
    pub version: String,
    /// Platform the tool was installed for.
    pub platform: Platform,
    /// Catalog kind of the tool.
    pub kind: ToolKind,
    /// Cache directory holding the installed files.
    pub install_dir: PathBuf,
    /// Executable or library path; the directory itself for bundles.
    pub path: PathBuf,
    /// Generated PKCS#11 configuration, for tools that need one.
    pub pkcs11_config: Option<PathBuf>,
    /// Cache tier the files came from.
    pub source: AcquisitionSource,
}

impl AcquiredTool {
    /// Directory to put on `PATH`, if the tool provides programs.
    #[must_use]
    pub fn path_entry(&self) -> Option<&Path> {
        match self.kind {
            ToolKind::Executable => self.path.parent(),
            ToolKind::ArchiveBundle => Some(&self.install_dir),
            ToolKind::Library => None,
        }
    }
}

/// Acquires catalog tools for one platform.
pub struct ToolAcquirer {
    pub(crate) catalog: Arc<ToolCatalog>,
    pub(crate) config: ActionConfig,
    pub(crate) environment: RunnerEnvironment,
    pub(crate) platform: Platform,
    pub(crate) retry: RetryPolicy,
    pub(crate) downloader: Arc<dyn Downloader>,
    pub(crate) runner: Arc<dyn CommandRunner>,
    pub(crate) remote: Arc<dyn RemoteCacheProvider>,
    pub(crate) outputs: Arc<dyn OutputSink>,
    pub(crate) local: LocalToolCache,
    pub(crate) versions: VersionResolver,
    pub(crate) extractor: Extractor,
    pub(crate) post_installer: PostInstaller,
    pub(crate) pending_saves: Mutex<Vec<JoinHandle<()>>>,
}

impl ToolAcquirer {
    /// Start configuring an acquirer.
    #[must_use]
    pub fn builder(
        config: ActionConfig,
        environment: RunnerEnvironment,
        platform: Platform,
    ) -> ToolAcquirerBuilder {
        ToolAcquirerBuilder::new(config, environment, platform)
    }

    /// Platform tools are acquired for.
    #[must_use]
    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Catalog in use.
    #[must_use]
    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    /// Local tool cache.
    #[must_use]
    pub fn local_cache(&self) -> &LocalToolCache {
        &self.local
    }

    /// Acquire `name` for the configured platform.
    ///
    /// Returns `None` when the catalog has no entry for this platform.
    #[instrument(skip(self), fields(platform = %self.platform))]
    pub async fn acquire(&self, name: &str) -> Result<Option<AcquiredTool>> {
        let Some(tool) = self
            .catalog
            .lookup(name, self.platform.os, self.platform.arch)
        else {
            info!(tool = name, "Tool is not published for this platform; skipping");
            return Ok(None);
        };

        let url = self.config.download_url(tool.download_name);
        let resolved = self
            .versions
            .resolve(
                &url,
                self.config.use_checksum_versioning,
                &self.config.cache_version,
            )
            .await;
        let version = resolved.version.as_str();
        debug!(tool = name, version, "Resolved version");

        let use_remote = self.remote_cache_enabled();
        let restored = use_remote && self.restore_remote(tool, version).await;

        let (install_dir, source) =
            if let Some(dir) = self.local.find(tool.name, version, self.platform.arch) {
                if restored {
                    self.post_installer.after_restore(tool, &dir).await?;
                    (dir, AcquisitionSource::RemoteCache)
                } else {
                    (dir, AcquisitionSource::LocalCache)
                }
            } else {
                let dir = self.install(tool, &url, &resolved).await?;
                (dir, AcquisitionSource::Downloaded)
            };

        let acquired = self.finish(tool, version, install_dir, source)?;
        if use_remote && !restored && source == AcquisitionSource::Downloaded {
            self.spawn_remote_save(tool, version);
        }
        info!(
            tool = name,
            version,
            source = ?acquired.source,
            path = %acquired.path.display(),
            "Tool ready"
        );
        Ok(Some(acquired))
    }

    /// Add the tool's program directory to `PATH` for later steps.
    pub fn publish_path(&self, tool: &AcquiredTool) -> Result<()> {
        if let Some(dir) = tool.path_entry() {
            self.outputs.add_path(dir)?;
        }
        Ok(())
    }

    /// Wait for background remote cache saves started so far.
    ///
    /// Save failures have already been logged; this only waits.
    pub async fn wait_for_pending_saves(&self) {
        let handles: Vec<_> = match self.pending_saves.lock() {
            Ok(mut pending) => pending.drain(..).collect(),
            Err(_) => return,
        };
        if handles.is_empty() {
            return;
        }
        debug!(count = handles.len(), "Waiting for remote cache saves");
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Remote cache save task failed");
            }
        }
    }

    fn remote_cache_enabled(&self) -> bool {
        if !self.config.use_remote_cache {
            return false;
        }
        if self.environment.self_hosted {
            debug!("Self-hosted runner keeps its tool cache; skipping remote cache");
            return false;
        }
        if !self.remote.is_available() {
            info!("Remote cache requested but not available");
            return false;
        }
        true
    }

    async fn restore_remote(&self, tool: &ToolMetadata, version: &str) -> bool {
        let paths = [self.local.version_dir(tool.name, version)];
        let key = remote_cache_key(tool.name, version, self.platform);
        let label = format!("restore remote cache {key}");

        match retry_with_backoff(&self.retry, &label, || self.remote.restore(&paths, &key)).await {
            Ok(Some(matched)) => {
                info!(tool = tool.name, key = %matched, "Restored from remote cache");
                true
            }
            Ok(None) => {
                debug!(tool = tool.name, %key, "Remote cache miss");
                false
            }
            Err(e) => {
                warn!(tool = tool.name, %key, error = %e, "Remote cache restore failed");
                false
            }
        }
    }

    fn spawn_remote_save(&self, tool: &ToolMetadata, version: &str) {
        let remote = Arc::clone(&self.remote);
        let retry = self.retry.clone();
        let paths = vec![self.local.version_dir(tool.name, version)];
        let key = remote_cache_key(tool.name, version, self.platform);

        let handle = tokio::spawn(async move {
            let label = format!("save remote cache {key}");
            let saved = retry_with_backoff_if(
                &retry,
                &label,
                |e: &smsetup_cache::Error| !matches!(e, smsetup_cache::Error::AlreadyExists { .. }),
                || remote.save(&paths, &key),
            )
            .await;
            match saved {
                Ok(id) => info!(%key, id, "Saved to remote cache"),
                Err(smsetup_cache::Error::AlreadyExists { .. }) => {
                    debug!(%key, "Remote cache entry already saved by another run");
                }
                Err(e) => warn!(%key, error = %e, "Remote cache save failed"),
            }
        });
        if let Ok(mut pending) = self.pending_saves.lock() {
            pending.push(handle);
        }
    }

    async fn install(
        &self,
        tool: &ToolMetadata,
        url: &str,
        resolved: &ResolvedVersion,
    ) -> Result<PathBuf> {
        let workdir = self.download_dir(tool)?;
        let artifact = workdir.path().join(tool.download_name);
        let label = format!("download {url}");
        retry_with_backoff(&self.retry, &label, || {
            self.downloader.download(url, &artifact)
        })
        .await?;

        let digest = file_sha256(&artifact).await?;
        match &resolved.checksum {
            Some(expected) if !expected.eq_ignore_ascii_case(&digest) => warn!(
                tool = tool.name,
                expected = %expected,
                actual = %digest,
                "Downloaded artifact does not match its published checksum"
            ),
            _ => debug!(tool = tool.name, sha256 = %digest, "Downloaded artifact"),
        }

        let local = self.local.clone();
        let name = tool.name;
        let version = resolved.version.clone();
        let arch = self.platform.arch;
        let dir = self
            .extractor
            .extract(tool, &artifact, |contents| async move {
                debug!(tool = name, ?contents, "Copying extracted files into the local cache");
                tokio::task::spawn_blocking(move || {
                    let dir = local.prepare(name, &version, arch)?;
                    copy_dir_all(&contents, &dir)?;
                    Ok::<_, smsetup_cache::Error>(dir)
                })
                .await
                .map_err(|e| Error::task(&e))?
                .map_err(Error::from)
            })
            .await?;

        self.post_installer.after_install(tool, &dir).await?;
        self.local
            .mark_complete(tool.name, &resolved.version, self.platform.arch)?;
        self.probe_version(tool, &dir).await;
        Ok(dir)
    }

    fn download_dir(&self, tool: &ToolMetadata) -> Result<tempfile::TempDir> {
        let root = &self.environment.temp_root;
        std::fs::create_dir_all(root).map_err(|e| Error::io(e, root, "create"))?;
        tempfile::Builder::new()
            .prefix(&format!("smsetup-download-{}-", tool.name))
            .tempdir_in(root)
            .map_err(|e| Error::io(e, root, "create temp dir"))
    }

    async fn probe_version(&self, tool: &ToolMetadata, dir: &Path) {
        let Some(args) = tool.version_args else {
            return;
        };
        let program = dir.join(tool.installed_file_name);
        let args: Vec<String> = args.iter().map(ToString::to_string).collect();
        match self.runner.run(&program, &args).await {
            Ok(output) if output.is_success() => {
                info!(tool = tool.name, version = %output.stdout.trim(), "Installed tool version");
            }
            Ok(output) => warn!(
                tool = tool.name,
                code = output.code,
                stderr = %output.stderr.trim(),
                "Version probe failed"
            ),
            Err(e) => warn!(tool = tool.name, error = %e, "Version probe failed"),
        }
    }

    fn finish(
        &self,
        tool: &ToolMetadata,
        version: &str,
        install_dir: PathBuf,
        source: AcquisitionSource,
    ) -> Result<AcquiredTool> {
        let path = match tool.tool_kind {
            ToolKind::ArchiveBundle => install_dir.clone(),
            ToolKind::Executable | ToolKind::Library => install_dir.join(tool.installed_file_name),
        };

        let pkcs11_config = if tool.needs_pkcs11_config {
            let config = ensure_config(&install_dir, &path, self.platform.os)?;
            self.outputs
                .set_output(PKCS11_CONFIG_OUTPUT, &config.display().to_string())?;
            Some(config)
        } else {
            None
        };

        Ok(AcquiredTool {
            name: tool.name.to_string(),
            version: version.to_string(),
            platform: self.platform,
            kind: tool.tool_kind,
            install_dir,
            path,
            pkcs11_config,
            source,
        })
    }
}

impl std::fmt::Debug for ToolAcquirer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolAcquirer")
            .field("platform", &self.platform)
            .field("config", &self.config)
            .field("environment", &self.environment)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
