//! Output sinks for values published to later pipeline steps.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::{Error, Result};

/// Name of the output carrying the PKCS#11 configuration file path.
pub const PKCS11_CONFIG_OUTPUT: &str = "PKCS11_CONFIG";

/// Destination for key/value outputs and PATH additions.
pub trait OutputSink: Send + Sync {
    /// Publish an output value.
    fn set_output(&self, key: &str, value: &str) -> Result<()>;

    /// Prepend a directory to `PATH` for later steps.
    fn add_path(&self, dir: &Path) -> Result<()>;
}

/// GitHub Actions file commands (`GITHUB_OUTPUT` / `GITHUB_PATH`).
///
/// When the files are not configured, values are only logged.
#[derive(Debug, Clone, Default)]
pub struct GitHubOutputs {
    output_file: Option<PathBuf>,
    path_file: Option<PathBuf>,
}

impl GitHubOutputs {
    /// Use the files named by `GITHUB_OUTPUT` and `GITHUB_PATH`.
    #[must_use]
    pub fn from_env() -> Self {
        let file = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
        };
        Self {
            output_file: file("GITHUB_OUTPUT"),
            path_file: file("GITHUB_PATH"),
        }
    }

    /// Use explicit command files.
    #[must_use]
    pub fn new(output_file: Option<PathBuf>, path_file: Option<PathBuf>) -> Self {
        Self {
            output_file,
            path_file,
        }
    }

    fn append(file: &Path, content: &str) -> Result<()> {
        let mut handle = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(file)
            .map_err(|e| Error::io(e, file, "open"))?;
        handle
            .write_all(content.as_bytes())
            .map_err(|e| Error::io(e, file, "append"))
    }
}

impl OutputSink for GitHubOutputs {
    fn set_output(&self, key: &str, value: &str) -> Result<()> {
        let Some(file) = &self.output_file else {
            info!(key, value, "Output (GITHUB_OUTPUT not set)");
            return Ok(());
        };
        let delimiter = format!("ghadelimiter_{}", uuid::Uuid::new_v4());
        debug!(key, ?file, "Writing output");
        Self::append(file, &format!("{key}<<{delimiter}\n{value}\n{delimiter}\n"))
    }

    fn add_path(&self, dir: &Path) -> Result<()> {
        let Some(file) = &self.path_file else {
            info!(dir = %dir.display(), "PATH addition (GITHUB_PATH not set)");
            return Ok(());
        };
        Self::append(file, &format!("{}\n", dir.display()))
    }
}

/// Records outputs in memory.
#[derive(Debug, Default)]
pub struct MemoryOutputs {
    outputs: Mutex<Vec<(String, String)>>,
    paths: Mutex<Vec<PathBuf>>,
}

impl MemoryOutputs {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent value published for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.outputs
            .lock()
            .ok()?
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Directories added to PATH, in order.
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        self.paths.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl OutputSink for MemoryOutputs {
    fn set_output(&self, key: &str, value: &str) -> Result<()> {
        if let Ok(mut outputs) = self.outputs.lock() {
            outputs.push((key.to_string(), value.to_string()));
        }
        Ok(())
    }

    fn add_path(&self, dir: &Path) -> Result<()> {
        if let Ok(mut paths) = self.paths.lock() {
            paths.push(dir.to_path_buf());
        }
        Ok(())
    }
}
