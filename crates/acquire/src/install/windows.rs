//! Windows CSP/KSP registration.
//!
//! The tool bundle ships 32 and 64 bit builds of the DigiCert CSP and KSP
//! libraries. Registration copies them into the system directories under
//! their canonical names, runs the vendor KSP registrar, and writes the CSP
//! provider entries with a generated `reg` script run from a directory only
//! its owner can access.

use smsetup_core::CommandRunner;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::{Error, Result};

/// Provider namespaces registered under `Cryptography\Defaults\Provider`.
pub const PROVIDER_NAMESPACES: [&str; 2] = [
    "DigiCert Software Trust Manager CSP",
    "DigiCert Signing Manager KSP",
];

/// Vendor registrar shipped in the bundle.
pub const REGISTRAR: &str = "smksp_registrar.exe";

const ICACLS: &str = "icacls";

/// `OWNER RIGHTS`: the directory's owner, which is the user that created it.
const OWNER_RIGHTS_SID: &str = "*S-1-3-4";

/// `(bundled name, system directory, canonical name)` for each library.
const LIBRARIES: [(&str, &str, &str); 4] = [
    ("smksp-x64.dll", "System32", "smksp.dll"),
    ("smksp-x86.dll", "SysWOW64", "smksp.dll"),
    ("smcsp-x64.dll", "System32", "smcsp.dll"),
    ("smcsp-x86.dll", "SysWOW64", "smcsp.dll"),
];

const PROVIDER_KEY_64: &str = r"HKLM\SOFTWARE\Microsoft\Cryptography\Defaults\Provider";
const PROVIDER_KEY_32: &str =
    r"HKLM\SOFTWARE\WOW6432Node\Microsoft\Cryptography\Defaults\Provider";

/// Windows directory from `SystemRoot`, then `windir`.
#[must_use]
pub fn system_root_from_env() -> PathBuf {
    std::env::var_os("SystemRoot")
        .or_else(|| std::env::var_os("windir"))
        .map_or_else(|| PathBuf::from(r"C:\Windows"), PathBuf::from)
}

/// Generate the batch script writing the CSP provider entries.
#[must_use]
pub fn registry_script(system_root: &Path) -> String {
    let root = system_root.display().to_string();
    let root = root.trim_end_matches(['\\', '/']);
    let mut script = String::from("@echo off\r\n");

    for namespace in PROVIDER_NAMESPACES {
        for (key, system_dir) in [(PROVIDER_KEY_64, "System32"), (PROVIDER_KEY_32, "SysWOW64")] {
            let key = format!(r"{key}\{namespace}");
            let image = format!(r"{root}\{system_dir}\smcsp.dll");
            for (value, kind, data) in [
                ("Image Path", "REG_SZ", image.as_str()),
                ("SigInFile", "REG_DWORD", "0"),
                ("Type", "REG_DWORD", "1"),
            ] {
                let _ = write!(
                    script,
                    "reg add \"{key}\" /v \"{value}\" /t {kind} /d \"{data}\" /f || exit /b 1\r\n"
                );
            }
        }
    }
    script
}

/// Registers the CSP and KSP providers shipped in a tool bundle.
#[derive(Clone)]
pub struct CryptoProviderRegistrar {
    runner: Arc<dyn CommandRunner>,
    system_root: PathBuf,
    temp_root: PathBuf,
}

impl CryptoProviderRegistrar {
    /// Registrar writing into `system_root` with scripts under `temp_root`.
    #[must_use]
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        system_root: impl Into<PathBuf>,
        temp_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            system_root: system_root.into(),
            temp_root: temp_root.into(),
        }
    }

    /// Register the providers from the bundle installed at `install_dir`.
    pub async fn register(&self, install_dir: &Path) -> Result<()> {
        self.copy_libraries(install_dir)?;
        self.run_registrar(install_dir).await?;
        self.write_provider_entries().await?;
        info!(?install_dir, "Registered CSP and KSP providers");
        Ok(())
    }

    fn copy_libraries(&self, install_dir: &Path) -> Result<()> {
        for (bundled, system_dir, canonical) in LIBRARIES {
            let source = install_dir.join(bundled);
            let dest_dir = self.system_root.join(system_dir);
            std::fs::create_dir_all(&dest_dir).map_err(|e| Error::io(e, &dest_dir, "create"))?;
            let dest = dest_dir.join(canonical);
            std::fs::copy(&source, &dest).map_err(|e| Error::io(e, &source, "copy"))?;
            debug!(?source, ?dest, "Copied provider library");
        }
        Ok(())
    }

    async fn run_registrar(&self, install_dir: &Path) -> Result<()> {
        let registrar = install_dir.join(REGISTRAR);
        let output = self
            .runner
            .run(&registrar, &["register".to_string()])
            .await?;
        if !output.is_success() {
            return Err(Error::command(REGISTRAR, output.code, output.stderr));
        }
        Ok(())
    }

    /// Drop inherited ACEs from `dir` and grant full control to its owner only.
    ///
    /// The directory otherwise inherits the ACL of the runner temp directory.
    async fn restrict_to_owner(&self, dir: &Path) -> Result<()> {
        let args = vec![
            dir.display().to_string(),
            "/inheritance:r".to_string(),
            "/grant:r".to_string(),
            format!("{OWNER_RIGHTS_SID}:(OI)(CI)F"),
        ];
        let output = self.runner.run(Path::new(ICACLS), &args).await?;
        if !output.is_success() {
            return Err(Error::command(ICACLS, output.code, output.stderr));
        }
        debug!(?dir, "Restricted script directory to its owner");
        Ok(())
    }

    async fn write_provider_entries(&self) -> Result<()> {
        std::fs::create_dir_all(&self.temp_root)
            .map_err(|e| Error::io(e, &self.temp_root, "create"))?;
        let script_dir = tempfile::Builder::new()
            .prefix("smsetup-registry-")
            .tempdir_in(&self.temp_root)
            .map_err(|e| Error::io(e, &self.temp_root, "create temp dir"))?;
        self.restrict_to_owner(script_dir.path()).await?;
        let script = script_dir.path().join("register-providers.bat");
        std::fs::write(&script, registry_script(&self.system_root))
            .map_err(|e| Error::io(e, &script, "write"))?;

        let output = self
            .runner
            .run(
                Path::new("cmd"),
                &["/C".to_string(), script.display().to_string()],
            )
            .await?;
        if !output.is_success() {
            return Err(Error::RegistryScript {
                code: output.code,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for CryptoProviderRegistrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoProviderRegistrar")
            .field("system_root", &self.system_root)
            .field("temp_root", &self.temp_root)
            .finish_non_exhaustive()
    }
}
