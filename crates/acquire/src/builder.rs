//! Builder pattern for configuring a [`ToolAcquirer`]

use smsetup_cache::{DisabledRemoteCache, LocalToolCache, RemoteCacheProvider};
use smsetup_core::{
    ActionConfig, CommandRunner, GitHubOutputs, OutputSink, Platform, RetryPolicy,
    RunnerEnvironment, SystemCommandRunner,
};
use std::path::PathBuf;
use std::sync::Arc;

use crate::Result;
use crate::acquirer::ToolAcquirer;
use crate::catalog::ToolCatalog;
use crate::download::{Downloader, HttpDownloader};
use crate::extract::Extractor;
use crate::install::PostInstaller;
use crate::install::windows::system_root_from_env;
use crate::version::VersionResolver;

/// Configuration builder for tool acquisition
pub struct ToolAcquirerBuilder {
    config: ActionConfig,
    environment: RunnerEnvironment,
    platform: Platform,
    catalog: Option<Arc<ToolCatalog>>,
    retry: RetryPolicy,
    downloader: Option<Arc<dyn Downloader>>,
    runner: Option<Arc<dyn CommandRunner>>,
    remote: Option<Arc<dyn RemoteCacheProvider>>,
    outputs: Option<Arc<dyn OutputSink>>,
    system_root: Option<PathBuf>,
}

impl ToolAcquirerBuilder {
    /// Creates a builder for the given run configuration
    #[must_use]
    pub fn new(config: ActionConfig, environment: RunnerEnvironment, platform: Platform) -> Self {
        Self {
            config,
            environment,
            platform,
            catalog: None,
            retry: RetryPolicy::default(),
            downloader: None,
            runner: None,
            remote: None,
            outputs: None,
            system_root: None,
        }
    }

    /// Use a specific catalog instead of [`ToolCatalog::builtin`]
    #[must_use]
    pub fn catalog(mut self, catalog: Arc<ToolCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Configure retry behavior for network calls
    #[must_use]
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the downloader (defaults to [`HttpDownloader`])
    #[must_use]
    pub fn downloader(mut self, downloader: Arc<dyn Downloader>) -> Self {
        self.downloader = Some(downloader);
        self
    }

    /// Set the command runner (defaults to [`SystemCommandRunner`])
    #[must_use]
    pub fn command_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Set the remote cache (defaults to [`DisabledRemoteCache`])
    #[must_use]
    pub fn remote_cache(mut self, remote: Arc<dyn RemoteCacheProvider>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Set the output sink (defaults to [`GitHubOutputs::from_env`])
    #[must_use]
    pub fn outputs(mut self, outputs: Arc<dyn OutputSink>) -> Self {
        self.outputs = Some(outputs);
        self
    }

    /// Set the Windows directory used for provider registration
    #[must_use]
    pub fn system_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.system_root = Some(root.into());
        self
    }

    /// Build the acquirer
    pub fn build(self) -> Result<ToolAcquirer> {
        let downloader: Arc<dyn Downloader> = match self.downloader {
            Some(downloader) => downloader,
            None => Arc::new(HttpDownloader::new()?),
        };
        let runner = self
            .runner
            .unwrap_or_else(|| Arc::new(SystemCommandRunner));
        let temp_root = self.environment.temp_root.clone();
        let system_root = self.system_root.unwrap_or_else(system_root_from_env);

        Ok(ToolAcquirer {
            catalog: self
                .catalog
                .unwrap_or_else(|| Arc::new(ToolCatalog::builtin())),
            local: LocalToolCache::new(&self.environment.tool_cache_root),
            versions: VersionResolver::new(Arc::clone(&downloader), self.retry.clone()),
            extractor: Extractor::new(Arc::clone(&runner), &temp_root),
            post_installer: PostInstaller::new(Arc::clone(&runner), system_root, &temp_root),
            remote: self.remote.unwrap_or_else(|| Arc::new(DisabledRemoteCache)),
            outputs: self
                .outputs
                .unwrap_or_else(|| Arc::new(GitHubOutputs::from_env())),
            config: self.config,
            environment: self.environment,
            platform: self.platform,
            retry: self.retry,
            downloader,
            runner,
            pending_saves: std::sync::Mutex::new(Vec::new()),
        })
    }
}
