//! Standard filesystem paths for Bock.

use std::path::PathBuf;

use once_cell::sync::Lazy;

/// Default root directory for Bock data.
pub static BOCK_ROOT: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("BOCK_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/lib/bock"))
});

/// Default runtime directory for Bock.
pub static BOCK_RUNTIME_DIR: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("BOCK_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/run/bock"))
});

/// Standard paths used by the Bock daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BockPaths {
    /// Root data directory (default: /var/lib/bock).
    pub root: PathBuf,
    /// Runtime directory (default: /run/bock).
    pub runtime: PathBuf,
}

impl BockPaths {
    /// Create paths with a custom root directory.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let runtime = root.join("run");
        Self { root, runtime }
    }

    /// Directory for container data.
    #[must_use]
    pub fn containers(&self) -> PathBuf {
        self.root.join("containers")
    }

    /// Directory for a specific container.
    #[must_use]
    pub fn container(&self, id: &str) -> PathBuf {
        self.containers().join(id)
    }

    /// Container log file written by the json-file log driver.
    #[must_use]
    pub fn container_log(&self, id: &str) -> PathBuf {
        self.container(id).join(format!("{id}-json.log"))
    }

    /// Directory holding runtime bundles handed to the low-level runtime.
    #[must_use]
    pub fn task_bundles(&self) -> PathBuf {
        self.runtime.join("tasks")
    }
}

impl Default for BockPaths {
    fn default() -> Self {
        Self {
            root: BOCK_ROOT.clone(),
            runtime: BOCK_RUNTIME_DIR.clone(),
        }
    }
}
