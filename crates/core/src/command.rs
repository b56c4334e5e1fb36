//! External command execution.
//!
//! OS installers and helper programs (`hdiutil`, `msiexec`, `cmd`, vendor
//! registrars) are run through [`CommandRunner`] so that callers can be
//! exercised without touching the real system.

use async_trait::async_trait;
use std::ffi::OsStr;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

use crate::{Error, Result};

/// Captured result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Exit code; `-1` when the process was terminated by a signal.
    pub code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout.
    #[must_use]
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given exit code and stderr.
    #[must_use]
    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Whether the process exited with code 0.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

/// Runs an executable with arguments and captures its output.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` to completion.
    ///
    /// A non-zero exit code is not an error; only failing to start is.
    async fn run(&self, program: &Path, args: &[String]) -> Result<CommandOutput>;
}

/// Runs commands on the host with `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &Path, args: &[String]) -> Result<CommandOutput> {
        debug!(program = %program.display(), ?args, "Running command");

        let output = Command::new(program)
            .args(args.iter().map(OsStr::new))
            .output()
            .await
            .map_err(|e| Error::command_spawn(program.display().to_string(), e))?;

        let result = CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };
        debug!(program = %program.display(), code = result.code, "Command finished");
        Ok(result)
    }
}
