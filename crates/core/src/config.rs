//! Action input configuration.
//!
//! Inputs arrive the way a GitHub Action receives them: one environment
//! variable per input named `INPUT_<NAME>`. [`ActionConfig`] is the parsed,
//! validated view used by the acquisition engine.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::{Error, Result};

/// Base URL of the tool CDN.
pub const INPUT_CDN: &str = "digicert-cdn";
/// Fallback cache version.
pub const INPUT_CACHE_VERSION: &str = "cache-version";
/// Derive the cache version from the `.sha256` file next to each download.
pub const INPUT_USE_CHECKSUM: &str = "use-binary-sha256-checksum";
/// Enable the remote shared cache.
pub const INPUT_USE_REMOTE_CACHE: &str = "use-github-caching-service";

/// A source of named string inputs.
pub trait ConfigSource: Send + Sync {
    /// Raw value of the input, if present.
    fn get(&self, name: &str) -> Option<String>;
}

/// Inputs read from `INPUT_*` variables.
#[derive(Debug, Clone, Default)]
pub struct EnvInputs {
    vars: HashMap<String, String>,
}

impl EnvInputs {
    /// Snapshot the inputs from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Build from an explicit set of environment variables.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: vars
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .filter(|(k, _)| k.starts_with("INPUT_"))
                .collect(),
        }
    }

    /// Name of the environment variable that carries an input.
    #[must_use]
    pub fn variable_name(input: &str) -> String {
        format!("INPUT_{}", input.replace(' ', "_").to_uppercase())
    }
}

impl ConfigSource for EnvInputs {
    fn get(&self, name: &str) -> Option<String> {
        self.vars.get(&Self::variable_name(name)).cloned()
    }
}

/// In-memory inputs, optionally layered over another source.
#[derive(Default)]
pub struct MapInputs {
    values: HashMap<String, String>,
    fallback: Option<Box<dyn ConfigSource>>,
}

impl MapInputs {
    /// Create an empty set of inputs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consult `fallback` for inputs not set here.
    #[must_use]
    pub fn over(fallback: impl ConfigSource + 'static) -> Self {
        Self {
            values: HashMap::new(),
            fallback: Some(Box::new(fallback)),
        }
    }

    /// Set an input value.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Set an input value in place.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }
}

impl ConfigSource for MapInputs {
    fn get(&self, name: &str) -> Option<String> {
        self.values
            .get(name)
            .cloned()
            .or_else(|| self.fallback.as_ref().and_then(|f| f.get(name)))
    }
}

impl std::fmt::Debug for MapInputs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapInputs")
            .field("values", &self.values)
            .field("has_fallback", &self.fallback.is_some())
            .finish()
    }
}

/// Read a non-empty trimmed input.
fn input(source: &dyn ConfigSource, name: &str) -> Option<String> {
    source
        .get(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required_input(source: &dyn ConfigSource, name: &str) -> Result<String> {
    input(source, name)
        .ok_or_else(|| Error::configuration(format!("Input required and not supplied: {name}")))
}

/// Parse a boolean input using the YAML 1.2 core schema spellings.
fn bool_input(source: &dyn ConfigSource, name: &str, default: bool) -> Result<bool> {
    let Some(value) = input(source, name) else {
        return Ok(default);
    };
    match value.as_str() {
        "true" | "True" | "TRUE" => Ok(true),
        "false" | "False" | "FALSE" => Ok(false),
        _ => Err(Error::configuration(format!(
            "Input does not meet YAML 1.2 \"Core Schema\" specification: {name} \
             (expected true|True|TRUE|false|False|FALSE, got '{value}')"
        ))),
    }
}

/// Options consumed by the signing command builder.
///
/// The acquisition engine only carries these through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SigningOptions {
    /// `fail-fast` input.
    pub fail_fast: bool,
    /// `zero-exit-code-on-failure` input; failures exit with code 0.
    pub zero_exit_code_on_failure: bool,
    /// `unsigned` input.
    pub unsigned: bool,
    /// `timestamp` input.
    pub timestamp: bool,
    /// `digest-alg` input.
    pub digest_alg: String,
    /// `bulk-sign-mode` input.
    pub bulk_sign_mode: bool,
    /// `simple-signing-mode` input.
    pub simple_signing_mode: bool,
}

impl Default for SigningOptions {
    fn default() -> Self {
        Self {
            fail_fast: false,
            zero_exit_code_on_failure: false,
            unsigned: false,
            timestamp: true,
            digest_alg: "SHA-256".to_string(),
            bulk_sign_mode: false,
            simple_signing_mode: false,
        }
    }
}

impl SigningOptions {
    /// Parse the signing options from a config source.
    pub fn from_source(source: &dyn ConfigSource) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            fail_fast: bool_input(source, "fail-fast", defaults.fail_fast)?,
            zero_exit_code_on_failure: bool_input(
                source,
                "zero-exit-code-on-failure",
                defaults.zero_exit_code_on_failure,
            )?,
            unsigned: bool_input(source, "unsigned", defaults.unsigned)?,
            timestamp: bool_input(source, "timestamp", defaults.timestamp)?,
            digest_alg: input(source, "digest-alg").unwrap_or(defaults.digest_alg),
            bulk_sign_mode: bool_input(source, "bulk-sign-mode", defaults.bulk_sign_mode)?,
            simple_signing_mode: bool_input(
                source,
                "simple-signing-mode",
                defaults.simple_signing_mode,
            )?,
        })
    }
}

/// Parsed action configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ActionConfig {
    /// CDN base URL without a trailing slash.
    pub cdn_base_url: String,
    /// Version used for cache keys when no checksum is available.
    pub cache_version: String,
    /// Derive cache versions from CDN checksum files.
    pub use_checksum_versioning: bool,
    /// Restore from and save to the remote shared cache.
    pub use_remote_cache: bool,
    /// Options passed through to the signing command builder.
    pub signing: SigningOptions,
}

impl ActionConfig {
    /// Parse and validate the configuration.
    pub fn from_source(source: &dyn ConfigSource) -> Result<Self> {
        let cdn = required_input(source, INPUT_CDN)?;
        if !(cdn.starts_with("https://") || cdn.starts_with("http://")) {
            return Err(Error::configuration(format!(
                "{INPUT_CDN} must be an http(s) URL, got '{cdn}'"
            )));
        }

        Ok(Self {
            cdn_base_url: cdn.trim_end_matches('/').to_string(),
            cache_version: required_input(source, INPUT_CACHE_VERSION)?,
            use_checksum_versioning: bool_input(source, INPUT_USE_CHECKSUM, false)?,
            use_remote_cache: bool_input(source, INPUT_USE_REMOTE_CACHE, false)?,
            signing: SigningOptions::from_source(source)?,
        })
    }

    /// Download URL for a CDN file name.
    #[must_use]
    pub fn download_url(&self, download_name: &str) -> String {
        format!("{}/{}", self.cdn_base_url, download_name)
    }
}

/// Facts about the machine the run executes on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerEnvironment {
    /// Self-hosted machines keep their local tool cache between runs.
    pub self_hosted: bool,
    /// Root of the local tool cache.
    pub tool_cache_root: PathBuf,
    /// Directory for temporary files.
    pub temp_root: PathBuf,
}

impl RunnerEnvironment {
    /// Detect the runner environment from the process environment.
    #[must_use]
    pub fn detect() -> Self {
        Self::from_vars(
            std::env::var("RUNNER_ENVIRONMENT").ok(),
            std::env::var("RUNNER_TOOL_CACHE").ok(),
            std::env::var("RUNNER_TEMP").ok(),
        )
    }

    fn from_vars(
        environment: Option<String>,
        tool_cache: Option<String>,
        temp: Option<String>,
    ) -> Self {
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty()).map(PathBuf::from);
        Self {
            self_hosted: environment.is_some_and(|e| e.trim() == "self-hosted"),
            tool_cache_root: non_empty(tool_cache).unwrap_or_else(default_tool_cache_root),
            temp_root: non_empty(temp).unwrap_or_else(std::env::temp_dir),
        }
    }
}

/// Get the default local tool cache directory.
#[must_use]
pub fn default_tool_cache_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("smsetup")
        .join("tools")
}
