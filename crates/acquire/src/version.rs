//! Cache version resolution.
//!
//! With checksum versioning on, the version of a tool is derived from the
//! SHA-256 published next to the artifact on the CDN, so a republished binary
//! gets a fresh cache entry. Any failure to obtain the checksum falls back to
//! the declared version.

use smsetup_core::{RetryPolicy, retry_with_backoff};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::download::Downloader;

/// Version chosen for one acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVersion {
    /// Version used for cache paths and keys.
    pub version: String,
    /// Published SHA-256 of the artifact, when it was fetched.
    pub checksum: Option<String>,
}

impl ResolvedVersion {
    /// Version taken as declared, without a checksum.
    #[must_use]
    pub fn declared(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            checksum: None,
        }
    }
}

/// URL of the checksum file for an artifact URL.
#[must_use]
pub fn checksum_url(artifact_url: &str) -> String {
    format!("{artifact_url}.sha256")
}

/// Extract the digest from a checksum file body (`<hex>  <file name>`).
#[must_use]
pub fn parse_checksum(body: &str) -> Option<&str> {
    body.split_whitespace().next()
}

/// Resolves cache versions against the CDN.
#[derive(Clone)]
pub struct VersionResolver {
    downloader: Arc<dyn Downloader>,
    retry: RetryPolicy,
}

impl VersionResolver {
    /// Resolver fetching checksum files through `downloader`.
    #[must_use]
    pub fn new(downloader: Arc<dyn Downloader>, retry: RetryPolicy) -> Self {
        Self { downloader, retry }
    }

    /// Resolve the cache version of the artifact at `artifact_url`.
    ///
    /// Never fails: a missing or unreadable checksum yields the declared
    /// version.
    pub async fn resolve(
        &self,
        artifact_url: &str,
        use_checksum: bool,
        declared: &str,
    ) -> ResolvedVersion {
        if !use_checksum {
            return ResolvedVersion::declared(declared);
        }

        let url = checksum_url(artifact_url);
        let label = format!("fetch checksum {url}");
        let fetched =
            retry_with_backoff(&self.retry, &label, || self.downloader.fetch_text(&url)).await;

        match fetched {
            Ok(body) => match parse_checksum(&body) {
                Some(digest) => {
                    let version = format!("0.0.0-{digest}");
                    debug!(%url, %version, "Resolved version from checksum");
                    ResolvedVersion {
                        version,
                        checksum: Some(digest.to_string()),
                    }
                }
                None => {
                    warn!(%url, fallback = declared, "Checksum file is empty; using declared version");
                    ResolvedVersion::declared(declared)
                }
            },
            Err(e) => {
                warn!(%url, fallback = declared, error = %e, "Could not fetch checksum; using declared version");
                ResolvedVersion::declared(declared)
            }
        }
    }
}

impl std::fmt::Debug for VersionResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionResolver")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, Result};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;

    struct TextDownloader {
        body: Option<String>,
        requests: Mutex<Vec<String>>,
    }

    impl TextDownloader {
        fn new(body: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                body: body.map(str::to_string),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Downloader for TextDownloader {
        async fn download(&self, url: &str, _dest: &Path) -> Result<()> {
            Err(Error::download(url, "not used"))
        }

        async fn fetch_text(&self, url: &str) -> Result<String> {
            self.requests.lock().unwrap().push(url.to_string());
            self.body
                .clone()
                .ok_or_else(|| Error::Http {
                    url: url.to_string(),
                    status: 404,
                })
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            backoff_multiplier: 1.0,
            max_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_parse_checksum() {
        assert_eq!(parse_checksum("deadbeef  smctl\n"), Some("deadbeef"));
        assert_eq!(parse_checksum("  abc123\n"), Some("abc123"));
        assert_eq!(parse_checksum(" \n"), None);
    }

    #[test]
    fn test_checksum_url() {
        assert_eq!(
            checksum_url("https://cdn.example/tools/smctl"),
            "https://cdn.example/tools/smctl.sha256"
        );
    }

    #[tokio::test]
    async fn test_disabled_uses_declared_without_fetching() {
        let downloader = TextDownloader::new(Some("deadbeef  smctl"));
        let resolver = VersionResolver::new(downloader.clone(), fast_retry());

        let resolved = resolver
            .resolve("https://cdn.example/tools/smctl", false, "1.0.0")
            .await;
        assert_eq!(resolved, ResolvedVersion::declared("1.0.0"));
        assert!(downloader.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_checksum_version() {
        let downloader = TextDownloader::new(Some("deadbeef  smctl"));
        let resolver = VersionResolver::new(downloader.clone(), fast_retry());

        let resolved = resolver
            .resolve("https://cdn.example/tools/smctl", true, "1.0.0")
            .await;
        assert_eq!(resolved.version, "0.0.0-deadbeef");
        assert_eq!(resolved.checksum.as_deref(), Some("deadbeef"));
        assert_eq!(
            *downloader.requests.lock().unwrap(),
            vec!["https://cdn.example/tools/smctl.sha256".to_string()]
        );
    }

    #[tokio::test]
    async fn test_fetch_failure_falls_back_after_retries() {
        let downloader = TextDownloader::new(None);
        let resolver = VersionResolver::new(downloader.clone(), fast_retry());

        let resolved = resolver
            .resolve("https://cdn.example/tools/smctl", true, "1.0.0")
            .await;
        assert_eq!(resolved, ResolvedVersion::declared("1.0.0"));
        assert_eq!(downloader.requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_checksum_falls_back() {
        let downloader = TextDownloader::new(Some("\n"));
        let resolver = VersionResolver::new(downloader, fast_retry());

        let resolved = resolver.resolve("https://cdn.example/x", true, "2.1.0").await;
        assert_eq!(resolved.version, "2.1.0");
    }
}
