//! Platform steps run on an installed tool directory.

pub mod macos;
pub mod pkcs11;
pub mod unix;
pub mod windows;

use smsetup_core::{CommandRunner, Os};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::Result;
use crate::catalog::{PostInstall, ToolMetadata};

pub use windows::CryptoProviderRegistrar;

/// Applies a tool's post-install side effects.
#[derive(Debug, Clone)]
pub struct PostInstaller {
    registrar: CryptoProviderRegistrar,
}

impl PostInstaller {
    /// Post-installer registering providers under `system_root`.
    #[must_use]
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        system_root: impl Into<PathBuf>,
        temp_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registrar: CryptoProviderRegistrar::new(runner, system_root, temp_root),
        }
    }

    /// Run after a fresh install into `dir`.
    pub async fn after_install(&self, tool: &ToolMetadata, dir: &Path) -> Result<()> {
        if tool.needs_execute_bit && tool.platform.os != Os::Windows {
            unix::normalize_execute_bits(dir)?;
        }
        if let Some(step) = &tool.post_install {
            self.run(tool, step, dir).await?;
        }
        Ok(())
    }

    /// Run after `dir` was restored from the remote cache.
    pub async fn after_restore(&self, tool: &ToolMetadata, dir: &Path) -> Result<()> {
        match &tool.post_install {
            Some(step) if step.repeat_on_cache_restore() => self.run(tool, step, dir).await,
            _ => Ok(()),
        }
    }

    async fn run(&self, tool: &ToolMetadata, step: &PostInstall, dir: &Path) -> Result<()> {
        debug!(tool = tool.name, ?step, ?dir, "Running post-install step");
        match step {
            PostInstall::Symlink { link, target } => {
                macos::link_canonical_name(dir, link, target);
                Ok(())
            }
            PostInstall::RegisterCryptoProviders => self.registrar.register(dir).await,
        }
    }
}
