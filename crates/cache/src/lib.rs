//! Tool caching for smsetup
//!
//! Two tiers:
//! - [`LocalToolCache`]: on-machine store keyed by tool, version and
//!   architecture. Cheap to query; lives as long as the machine does.
//! - [`RemoteCacheProvider`]: optional shared store keyed by
//!   `{tool}-{version}-{os}-{arch}` that survives ephemeral machines.

mod error;
pub mod local;
pub mod remote;

// Re-export error types at crate root
pub use error::{Error, Result};

pub use local::{LocalToolCache, copy_dir_all};
pub use remote::{DirectoryRemoteCache, DisabledRemoteCache, RemoteCacheProvider, remote_cache_key};
