//! Error types for tool acquisition

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for acquisition operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Network failure while fetching a file
    #[error("Failed to download {url}: {message}")]
    #[diagnostic(
        code(smsetup::acquire::download),
        help("Check that the digicert-cdn input points to a reachable CDN")
    )]
    Download {
        /// Requested URL
        url: String,
        /// Transport error
        message: String,
    },

    /// The server answered with a non-success status
    #[error("Download of {url} failed with HTTP {status}")]
    #[diagnostic(code(smsetup::acquire::http))]
    Http {
        /// Requested URL
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// Unpacking, mounting or reading an artifact failed
    #[error("Failed to extract {tool}: {message}")]
    #[diagnostic(code(smsetup::acquire::extraction))]
    Extraction {
        /// Tool being extracted
        tool: String,
        /// What went wrong
        message: String,
    },

    /// The OS installer returned a non-zero exit code
    #[error("Installer for {tool} exited with code {code}\n{log}")]
    #[diagnostic(
        code(smsetup::acquire::install),
        help("The installer log is included above")
    )]
    Install {
        /// Tool being installed
        tool: String,
        /// Installer exit code
        code: i32,
        /// Installer log content, or the error raised while reading it
        log: String,
    },

    /// A helper program exited unsuccessfully
    #[error("'{program}' exited with code {code}: {stderr}")]
    #[diagnostic(code(smsetup::acquire::command))]
    Command {
        /// Program that was run
        program: String,
        /// Exit code
        code: i32,
        /// Captured standard error
        stderr: String,
    },

    /// The provider registration script failed
    #[error("Registry script exited with code {code}\nstdout: {stdout}\nstderr: {stderr}")]
    #[diagnostic(
        code(smsetup::acquire::registry),
        help("Registering the CSP and KSP providers requires administrator rights")
    )]
    RegistryScript {
        /// Exit code
        code: i32,
        /// Captured standard output
        stdout: String,
        /// Captured standard error
        stderr: String,
    },

    /// I/O error during acquisition
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(smsetup::acquire::io),
        help("Check file permissions and available disk space")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed
        operation: String,
    },

    /// A spawned task panicked or was cancelled
    #[error("Background task failed: {message}")]
    #[diagnostic(code(smsetup::acquire::task))]
    Task {
        /// Join error description
        message: String,
    },

    /// Error from the core crate
    #[error(transparent)]
    #[diagnostic(transparent)]
    Core(#[from] smsetup_core::Error),

    /// Error from the cache crate
    #[error(transparent)]
    #[diagnostic(transparent)]
    Cache(#[from] smsetup_cache::Error),
}

impl Error {
    /// Create a download error
    #[must_use]
    pub fn download(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Download {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create an extraction error
    #[must_use]
    pub fn extraction(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Extraction {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create an error for a helper program's non-zero exit
    #[must_use]
    pub fn command(program: impl Into<String>, code: i32, stderr: impl Into<String>) -> Self {
        Self::Command {
            program: program.into(),
            code,
            stderr: stderr.into(),
        }
    }

    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create a task error from a join failure
    #[must_use]
    pub fn task(err: &tokio::task::JoinError) -> Self {
        Self::Task {
            message: err.to_string(),
        }
    }
}

/// Result type for acquisition operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_error_embeds_log() {
        let err = Error::Install {
            tool: "smtools".into(),
            code: 1603,
            log: "MSI (s) Product: smtools -- Installation failed.".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("1603"));
        assert!(msg.contains("Installation failed."));
    }

    #[test]
    fn test_http_error_display() {
        let err = Error::Http {
            url: "https://cdn.example/smctl".into(),
            status: 404,
        };
        assert_eq!(
            err.to_string(),
            "Download of https://cdn.example/smctl failed with HTTP 404"
        );
    }

    #[test]
    fn test_core_error_is_transparent() {
        let err: Error = smsetup_core::Error::configuration("bad").into();
        assert_eq!(err.to_string(), "Configuration error: bad");
    }
}
