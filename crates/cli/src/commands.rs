//! Command implementations
#![allow(clippy::print_stdout)]

use serde::Serialize;
use smsetup_acquire::{AcquiredTool, ToolAcquirer, setup_platform_tools};
use smsetup_cache::{DirectoryRemoteCache, DisabledRemoteCache, RemoteCacheProvider};
use smsetup_core::{
    ActionConfig, EnvInputs, MapInputs, Platform, RetryPolicy, RunnerEnvironment,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

use crate::cli::{Cli, Commands};
use crate::errors::CliError;

/// Everything a command needs, resolved from flags and environment.
#[derive(Debug, Serialize)]
pub struct Context {
    pub platform: Platform,
    pub config: ActionConfig,
    pub environment: RunnerEnvironment,
    pub retry: RetryPolicy,
    pub remote_cache_dir: Option<std::path::PathBuf>,
}

impl Context {
    /// Resolve the context for `cli` from the process environment.
    pub fn load(cli: &Cli) -> miette::Result<Self> {
        Self::with_environment(cli, EnvInputs::from_env(), RunnerEnvironment::detect())
    }

    fn with_environment(
        cli: &Cli,
        env_inputs: EnvInputs,
        environment: RunnerEnvironment,
    ) -> miette::Result<Self> {
        let mut inputs = MapInputs::over(env_inputs);
        for (name, value) in &cli.inputs {
            inputs.set(name.clone(), value.clone());
        }
        let config = ActionConfig::from_source(&inputs)?;

        let mut retry = RetryPolicy::default();
        if let Some(attempts) = cli.retry_attempts {
            retry.max_attempts = attempts;
        }
        if let Some(delay) = cli.retry_delay_ms {
            retry.initial_delay = Duration::from_millis(delay);
        }

        Ok(Self {
            platform: resolve_platform(cli.platform.as_deref())?,
            config,
            environment,
            retry,
            remote_cache_dir: cli.remote_cache_dir.clone(),
        })
    }

    fn acquirer(&self) -> miette::Result<Arc<ToolAcquirer>> {
        let remote: Arc<dyn RemoteCacheProvider> = match &self.remote_cache_dir {
            Some(dir) => Arc::new(DirectoryRemoteCache::new(dir)),
            None => Arc::new(DisabledRemoteCache),
        };
        let acquirer = ToolAcquirer::builder(
            self.config.clone(),
            self.environment.clone(),
            self.platform,
        )
        .retry_policy(self.retry.clone())
        .remote_cache(remote)
        .build()?;
        Ok(Arc::new(acquirer))
    }
}

fn resolve_platform(requested: Option<&str>) -> miette::Result<Platform> {
    match requested {
        Some(value) => Platform::parse(value).ok_or_else(|| {
            CliError::InvalidPlatform {
                value: value.to_string(),
            }
            .into()
        }),
        None => Platform::current().ok_or_else(|| {
            CliError::UnsupportedHost {
                os: std::env::consts::OS.to_string(),
                arch: std::env::consts::ARCH.to_string(),
            }
            .into()
        }),
    }
}

/// Run the selected command.
#[instrument(skip_all, fields(command = ?cli.command))]
pub async fn execute(cli: &Cli, context: Context) -> miette::Result<()> {
    match &cli.command {
        Commands::Config => {
            let json = serde_json::to_string_pretty(&context)
                .map_err(|source| CliError::Serialize { source })?;
            println!("{json}");
        }
        Commands::Setup => {
            let acquirer = context.acquirer()?;
            let tools = setup_platform_tools(&acquirer).await?;
            for tool in &tools {
                println!("{}", tool_line(tool));
            }
        }
        Commands::Acquire { tool } => {
            let acquirer = context.acquirer()?;
            match acquirer.acquire(tool).await? {
                Some(acquired) => {
                    acquirer.publish_path(&acquired)?;
                    acquirer.wait_for_pending_saves().await;
                    println!("{}", acquired.path.display());
                }
                None => info!(
                    tool = %tool,
                    platform = %context.platform,
                    "Tool is not available for this platform"
                ),
            }
        }
    }
    Ok(())
}

fn tool_line(tool: &AcquiredTool) -> String {
    format!("{}\t{}", tool.name, tool.path.display())
}
