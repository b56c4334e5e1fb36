//! CLI-specific errors

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    #[error("Unsupported host platform: {os}-{arch}")]
    #[diagnostic(
        code(smsetup::cli::unsupported_host),
        help("Pass --platform with one of windows-x64, linux-x64, linux-arm64, macos-x64, macos-arm64")
    )]
    UnsupportedHost { os: String, arch: String },

    #[error("Invalid platform '{value}'")]
    #[diagnostic(
        code(smsetup::cli::invalid_platform),
        help("Use os-arch, for example linux-x64 or macos-arm64")
    )]
    InvalidPlatform { value: String },

    #[error("Failed to serialize output")]
    #[diagnostic(code(smsetup::cli::serialize))]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
}
