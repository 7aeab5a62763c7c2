//! Daemon configuration.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use bock_common::paths::{BOCK_ROOT, BOCK_RUNTIME_DIR};
use bock_common::{BockError, BockPaths, BockResult};
use bock_remote::ExitStatus;
use serde::{Deserialize, Serialize};

/// Platform whose runtime semantics the daemon follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Task service with kernel memory cgroups.
    Linux,
    /// Host Compute Service.
    Windows,
}

impl Platform {
    /// Platform the daemon was built for.
    #[must_use]
    pub const fn current() -> Self {
        if cfg!(windows) { Self::Windows } else { Self::Linux }
    }

    /// Whether the runtime can report out-of-memory events.
    #[must_use]
    pub const fn supports_oom(self) -> bool {
        matches!(self, Self::Linux)
    }

    /// Normalize a runtime exit status for this platform.
    #[must_use]
    pub const fn exit_status(self, status: ExitStatus) -> ExitStatus {
        match self {
            Self::Linux => status,
            Self::Windows => ExitStatus {
                exit_code: status.exit_code,
                oom_killed: false,
            },
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linux => f.write_str("linux"),
            Self::Windows => f.write_str("windows"),
        }
    }
}

/// Where container output is captured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogDriver {
    /// JSON lines in the container directory.
    #[default]
    #[serde(rename = "json-file")]
    JsonFile,
    /// No capture.
    #[serde(rename = "none")]
    Disabled,
}

impl FromStr for LogDriver {
    type Err = BockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json-file" => Ok(Self::JsonFile),
            "none" => Ok(Self::Disabled),
            other => Err(BockError::Config {
                message: format!("unknown log driver {other}"),
            }),
        }
    }
}

/// Daemon-wide settings, read from `daemon.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DaemonConfig {
    /// Persistent data directory.
    pub root: PathBuf,
    /// Runtime state directory.
    pub exec_root: PathBuf,
    /// Platform override; the build platform when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    /// Default log driver for containers.
    pub log_driver: LogDriver,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            root: BOCK_ROOT.clone(),
            exec_root: BOCK_RUNTIME_DIR.clone(),
            platform: None,
            log_driver: LogDriver::default(),
        }
    }
}

impl DaemonConfig {
    /// Read a configuration file, using defaults when it does not exist.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> BockResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No daemon config, using defaults");
            return Ok(Self::default());
        }

        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(|e| BockError::Config {
            message: format!("{}: {e}", path.display()),
        })
    }

    /// Set the data directory.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Set the runtime state directory.
    #[must_use]
    pub fn with_exec_root(mut self, exec_root: impl Into<PathBuf>) -> Self {
        self.exec_root = exec_root.into();
        self
    }

    /// Follow another platform's semantics.
    #[must_use]
    pub const fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Set the default log driver.
    #[must_use]
    pub const fn with_log_driver(mut self, driver: LogDriver) -> Self {
        self.log_driver = driver;
        self
    }

    /// Effective platform.
    #[must_use]
    pub fn platform(&self) -> Platform {
        self.platform.unwrap_or_else(Platform::current)
    }

    /// Filesystem layout for these settings.
    #[must_use]
    pub fn paths(&self) -> BockPaths {
        BockPaths {
            root: self.root.clone(),
            runtime: self.exec_root.clone(),
        }
    }
}
