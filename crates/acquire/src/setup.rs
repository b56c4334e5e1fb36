//! Acquisition of the full signing tool set for a platform.

use futures::future::try_join_all;
use smsetup_core::Os;
use std::sync::Arc;
use tracing::info;

use crate::acquirer::{AcquiredTool, ToolAcquirer};
use crate::catalog::{SMCTL, SMPKCS11, SMPKCS11_SHIM, SMTOOLS};
use crate::{Error, Result};

/// Tools installed on each operating system.
#[must_use]
pub fn platform_tools(os: Os) -> &'static [&'static str] {
    match os {
        Os::Windows | Os::Linux => &[SMCTL, SMPKCS11, SMTOOLS],
        Os::MacOs => &[SMCTL, SMPKCS11, SMPKCS11_SHIM],
    }
}

/// Acquire every tool of the platform concurrently.
///
/// The first failure is returned as soon as it is observed; acquisitions
/// still in flight keep running detached. On success, program directories
/// are added to `PATH` and pending remote cache saves are awaited.
pub async fn setup_platform_tools(acquirer: &Arc<ToolAcquirer>) -> Result<Vec<AcquiredTool>> {
    let names = platform_tools(acquirer.platform().os);
    info!(platform = %acquirer.platform(), tools = ?names, "Setting up signing tools");

    let tasks = names.iter().map(|&name| {
        let acquirer = Arc::clone(acquirer);
        let handle = tokio::spawn(async move { acquirer.acquire(name).await });
        async move { handle.await.map_err(|e| Error::task(&e))? }
    });
    let tools: Vec<AcquiredTool> = try_join_all(tasks).await?.into_iter().flatten().collect();

    for tool in &tools {
        acquirer.publish_path(tool)?;
    }
    acquirer.wait_for_pending_saves().await;

    info!(count = tools.len(), "Signing tools ready");
    Ok(tools)
}
