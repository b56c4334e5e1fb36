//! PKCS#11 configuration file for the signing library.

use smsetup_core::Os;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::{Error, Result};

/// File name of the generated configuration.
pub const CONFIG_FILE_NAME: &str = "pkcs11properties.cfg";

/// Render the configuration for `library`.
///
/// Windows paths have their backslashes doubled; the file is read by Java
/// properties parsers that treat a single backslash as an escape.
#[must_use]
pub fn render_config(library: &Path, os: Os) -> String {
    let library = library.display().to_string();
    let library = match os {
        Os::Windows => library.replace('\\', "\\\\"),
        Os::Linux | Os::MacOs => library,
    };
    format!("name=signingmanager\nlibrary={library}\nslotListIndex=0\n")
}

/// Write the configuration next to the library unless it already exists.
///
/// Returns the absolute path of the configuration file.
pub fn ensure_config(install_dir: &Path, library: &Path, os: Os) -> Result<PathBuf> {
    let config = install_dir.join(CONFIG_FILE_NAME);
    if config.exists() {
        debug!(?config, "PKCS#11 configuration already present");
    } else {
        std::fs::write(&config, render_config(library, os))
            .map_err(|e| Error::io(e, &config, "write"))?;
        info!(?config, "Wrote PKCS#11 configuration");
    }

    std::path::absolute(&config).map_err(|e| Error::io(e, &config, "resolve"))
}
