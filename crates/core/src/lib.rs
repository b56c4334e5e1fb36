//! Core types and utilities for smsetup
//!
//! This crate provides the pieces shared by the acquisition engine and the CLI:
//! - Error types with diagnostic codes
//! - Platform (OS + architecture) identification
//! - Action input parsing and runner environment detection
//! - Output sinks and external command execution
//! - Retry with exponential backoff

pub mod command;
pub mod config;
mod error;
pub mod output;
pub mod platform;
pub mod retry;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use command::{CommandOutput, CommandRunner, SystemCommandRunner};
pub use config::{ActionConfig, ConfigSource, EnvInputs, MapInputs, RunnerEnvironment, SigningOptions};
pub use error::{Error, Result};
pub use output::{GitHubOutputs, MemoryOutputs, OutputSink, PKCS11_CONFIG_OUTPUT};
pub use platform::{Arch, Os, Platform};
pub use retry::{RetryPolicy, retry_with_backoff, retry_with_backoff_if};
