//! Shared fixtures for acquisition tests.

#![allow(dead_code)]

use async_trait::async_trait;
use smsetup_acquire::{Downloader, Error, Result, ToolAcquirer};
use smsetup_cache::RemoteCacheProvider;
use smsetup_core::testing::ScriptedRunner;
use smsetup_core::{
    ActionConfig, CommandOutput, MemoryOutputs, Platform, RetryPolicy, RunnerEnvironment, SigningOptions,
};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const CDN: &str = "https://cdn.example/tools";

/// In-memory CDN recording every request.
#[derive(Default)]
pub struct FakeCdn {
    files: Mutex<HashMap<String, Vec<u8>>>,
    downloads: Mutex<Vec<String>>,
    fetches: Mutex<Vec<String>>,
}

impl FakeCdn {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve(&self, name: &str, body: impl Into<Vec<u8>>) {
        self.files
            .lock()
            .unwrap()
            .insert(format!("{CDN}/{name}"), body.into());
    }

    pub fn downloads(&self) -> Vec<String> {
        self.downloads.lock().unwrap().clone()
    }

    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }

    fn body(&self, url: &str) -> Result<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| Error::Http {
                url: url.to_string(),
                status: 404,
            })
    }
}

#[async_trait]
impl Downloader for FakeCdn {
    async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        self.downloads.lock().unwrap().push(url.to_string());
        let body = self.body(url)?;
        std::fs::write(dest, body).map_err(|e| Error::io(e, dest, "write"))
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        self.fetches.lock().unwrap().push(url.to_string());
        Ok(String::from_utf8_lossy(&self.body(url)?).into_owned())
    }
}

pub fn config(use_checksum: bool, use_remote_cache: bool) -> ActionConfig {
    ActionConfig {
        cdn_base_url: CDN.to_string(),
        cache_version: "1.0.0".to_string(),
        use_checksum_versioning: use_checksum,
        use_remote_cache,
        signing: SigningOptions::default(),
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
        backoff_multiplier: 2.0,
        max_delay: Duration::from_millis(4),
    }
}

/// A simulated machine: its own tool cache, temp dir and Windows directory.
pub struct Machine {
    pub dir: TempDir,
    pub self_hosted: bool,
}

impl Machine {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            self_hosted: false,
        }
    }

    pub fn self_hosted() -> Self {
        Self {
            self_hosted: true,
            ..Self::new()
        }
    }

    pub fn tool_cache(&self) -> PathBuf {
        self.dir.path().join("toolcache")
    }

    pub fn system_root(&self) -> PathBuf {
        self.dir.path().join("Windows")
    }

    pub fn environment(&self) -> RunnerEnvironment {
        RunnerEnvironment {
            self_hosted: self.self_hosted,
            tool_cache_root: self.tool_cache(),
            temp_root: self.dir.path().join("tmp"),
        }
    }
}

pub struct Harness {
    pub acquirer: Arc<ToolAcquirer>,
    pub runner: Arc<ScriptedRunner>,
    pub outputs: Arc<MemoryOutputs>,
}

pub fn harness(
    machine: &Machine,
    platform: &str,
    config: ActionConfig,
    cdn: &Arc<FakeCdn>,
    runner: ScriptedRunner,
    remote: Option<Arc<dyn RemoteCacheProvider>>,
) -> Harness {
    let runner = Arc::new(runner);
    let outputs = Arc::new(MemoryOutputs::new());
    let mut builder = ToolAcquirer::builder(
        config,
        machine.environment(),
        Platform::parse(platform).unwrap(),
    )
    .retry_policy(fast_retry())
    .downloader(cdn.clone())
    .command_runner(runner.clone())
    .outputs(outputs.clone())
    .system_root(machine.system_root());
    if let Some(remote) = remote {
        builder = builder.remote_cache(remote);
    }

    Harness {
        acquirer: Arc::new(builder.build().unwrap()),
        runner,
        outputs,
    }
}

/// ZIP archive with the given `(name, content)` files.
pub fn zip_archive(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut buffer = std::io::Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut buffer);
        let options = zip::write::SimpleFileOptions::default();
        for (name, content) in files {
            zip.start_file(*name, options).unwrap();
            zip.write_all(content).unwrap();
        }
        zip.finish().unwrap();
    }
    buffer.into_inner()
}

/// Files an MSI install of the smtools bundle leaves behind.
pub const SMTOOLS_WINDOWS_FILES: [&str; 6] = [
    "smctl.exe",
    "smksp_registrar.exe",
    "smksp-x64.dll",
    "smksp-x86.dll",
    "smcsp-x64.dll",
    "smcsp-x86.dll",
];

/// Runner that simulates msiexec by writing the bundle into `INSTALLDIR`.
pub fn windows_runner() -> ScriptedRunner {
    windows_runner_with_registry_exit(0)
}

/// Like [`windows_runner`], with the registry script exiting with `code`.
pub fn windows_runner_with_registry_exit(code: i32) -> ScriptedRunner {
    ScriptedRunner::new(move |program, args| {
        if program == Path::new("cmd") && code != 0 {
            return Ok(CommandOutput::failure(code, "ERROR: Access is denied."));
        }
        let is_msiexec = program == Path::new("msiexec");
        if is_msiexec && args.first().map(String::as_str) == Some("/i") {
            let dir = args
                .iter()
                .find_map(|a| a.strip_prefix("INSTALLDIR="))
                .unwrap();
            for file in SMTOOLS_WINDOWS_FILES {
                std::fs::write(Path::new(dir).join(file), file).unwrap();
            }
        }
        Ok(CommandOutput::success(""))
    })
}

/// Remote cache whose restore and save calls fail on demand.
#[derive(Default)]
pub struct FailingRemoteCache {
    pub fail_restore: bool,
    pub fail_save: bool,
    pub conflict_on_save: bool,
    restores: AtomicU32,
    saves: AtomicU32,
}

impl FailingRemoteCache {
    pub fn new(fail_restore: bool, fail_save: bool) -> Arc<Self> {
        Arc::new(Self {
            fail_restore,
            fail_save,
            ..Self::default()
        })
    }

    /// A cache where another machine always saved the key first.
    pub fn conflicting() -> Arc<Self> {
        Arc::new(Self {
            conflict_on_save: true,
            ..Self::default()
        })
    }

    pub fn restores(&self) -> u32 {
        self.restores.load(Ordering::SeqCst)
    }

    pub fn saves(&self) -> u32 {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteCacheProvider for FailingRemoteCache {
    fn is_available(&self) -> bool {
        true
    }

    async fn restore(&self, _paths: &[PathBuf], _key: &str) -> smsetup_cache::Result<Option<String>> {
        self.restores.fetch_add(1, Ordering::SeqCst);
        if self.fail_restore {
            return Err(smsetup_cache::Error::archive("connection reset by peer"));
        }
        Ok(None)
    }

    async fn save(&self, _paths: &[PathBuf], key: &str) -> smsetup_cache::Result<i64> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if self.conflict_on_save {
            return Err(smsetup_cache::Error::already_exists(key));
        }
        if self.fail_save {
            return Err(smsetup_cache::Error::archive("service unavailable"));
        }
        Ok(1)
    }
}

/// Write a `tar.zst` remote cache entry holding `(path, content)` files verbatim.
pub fn write_remote_entry(archive: &Path, files: &[(&str, &[u8])]) {
    std::fs::create_dir_all(archive.parent().unwrap()).unwrap();
    let encoder = zstd::Encoder::new(std::fs::File::create(archive).unwrap(), 3).unwrap();
    let mut builder = tar::Builder::new(encoder);
    for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder.append_data(&mut header, name, *content).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}

/// Runner that mounts a disk image holding the macOS `smctl` binaries.
pub fn macos_runner() -> ScriptedRunner {
    ScriptedRunner::new(|program, args| {
        if program == Path::new("hdiutil") && args.first().map(String::as_str) == Some("attach") {
            let mount_point = Path::new(&args[5]);
            for binary in ["smctl-mac-x64", "smctl-mac-arm64"] {
                std::fs::write(mount_point.join(binary), binary).unwrap();
            }
        }
        Ok(CommandOutput::success("smctl 1.0.0"))
    })
}
