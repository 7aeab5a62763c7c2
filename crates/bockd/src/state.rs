//! Container state and its persistence.

use std::path::PathBuf;

use bock_common::{BockError, BockResult};
use bock_remote::ExitStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Runtime state of a container, persisted as `state.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ContainerState {
    /// Init process is alive, or the container is restarting.
    pub running: bool,
    /// Processes are frozen.
    pub paused: bool,
    /// The runtime is restarting the container.
    pub restarting: bool,
    /// Last exit was caused by the OOM killer.
    #[serde(rename = "OOMKilled")]
    pub oom_killed: bool,
    /// System pid of the init process; 0 when not running.
    pub pid: u32,
    /// Exit code of the last run.
    pub exit_code: u32,
    /// Number of runtime-driven restarts.
    pub restart_count: u32,
    /// When the current run started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the last run ended.
    pub finished_at: Option<DateTime<Utc>>,
    /// The container has been started at least once.
    pub has_been_started_before: bool,
    /// A user stopped the container.
    pub has_been_manually_stopped: bool,
    /// The current run was reattached after a daemon restart.
    pub restored: bool,
}

impl ContainerState {
    /// Mark the container running as `pid`.
    ///
    /// `initial` is true for a fresh start and false when reattaching; only a
    /// fresh start moves `started_at`.
    pub fn set_running(&mut self, pid: u32, initial: bool) {
        self.running = true;
        self.paused = false;
        self.restarting = false;
        self.oom_killed = false;
        self.exit_code = 0;
        self.pid = pid;
        self.restored = !initial;
        self.has_been_started_before = true;
        if initial {
            self.started_at = Some(Utc::now());
        }
    }

    /// Mark the container stopped with `status`.
    pub fn set_stopped(&mut self, status: ExitStatus) {
        self.running = false;
        self.paused = false;
        self.restarting = false;
        self.pid = 0;
        self.finished_at = Some(Utc::now());
        self.exit_code = status.exit_code;
        self.oom_killed = status.oom_killed;
    }

    /// Mark the container as being restarted after exiting with `status`.
    ///
    /// A restarting container still counts as running.
    pub fn set_restarting(&mut self, status: ExitStatus) {
        self.running = true;
        self.paused = false;
        self.restarting = true;
        self.pid = 0;
        self.finished_at = Some(Utc::now());
        self.exit_code = status.exit_code;
        self.oom_killed = status.oom_killed;
    }

    /// Short human-readable status.
    #[must_use]
    pub fn status(&self) -> &'static str {
        if self.paused {
            "paused"
        } else if self.restarting {
            "restarting"
        } else if self.running {
            "running"
        } else if self.has_been_started_before {
            "exited"
        } else {
            "created"
        }
    }
}

/// Reads and writes container state files.
#[derive(Debug, Clone)]
pub struct StateStore {
    /// Directory holding one subdirectory per container.
    state_dir: PathBuf,
}

impl StateStore {
    /// Store rooted at `state_dir`.
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    /// Path of a container's state file.
    #[must_use]
    pub fn state_path(&self, container_id: &str) -> PathBuf {
        self.state_dir.join(container_id).join("state.json")
    }

    /// Persist `state` for `container_id`.
    ///
    /// # Errors
    ///
    /// Fails if the directory or file cannot be written.
    pub fn save(&self, container_id: &str, state: &ContainerState) -> BockResult<()> {
        let path = self.state_path(container_id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Write-then-rename so a crash never leaves a torn file.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(state)?)?;
        std::fs::rename(&tmp, &path)?;

        tracing::debug!(
            container_id = %container_id,
            path = %path.display(),
            running = state.running,
            "Saved container state"
        );
        Ok(())
    }

    /// Load the state of `container_id`.
    ///
    /// # Errors
    ///
    /// [`BockError::ContainerNotFound`] if no state was saved.
    pub fn load(&self, container_id: &str) -> BockResult<ContainerState> {
        let path = self.state_path(container_id);
        if !path.exists() {
            return Err(BockError::ContainerNotFound {
                id: container_id.to_string(),
            });
        }

        let state = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        tracing::debug!(container_id = %container_id, path = %path.display(), "Loaded container state");
        Ok(state)
    }

    /// Remove the state directory of `container_id`.
    ///
    /// # Errors
    ///
    /// Fails if the directory exists but cannot be removed.
    pub fn delete(&self, container_id: &str) -> BockResult<()> {
        let dir = self.state_dir.join(container_id);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
            tracing::debug!(container_id = %container_id, "Deleted container state");
        }
        Ok(())
    }

    /// Ids of every container with saved state.
    ///
    /// # Errors
    ///
    /// Fails if the state directory cannot be read.
    pub fn list(&self) -> BockResult<Vec<String>> {
        let mut ids = Vec::new();
        if !self.state_dir.exists() {
            return Ok(ids);
        }

        for entry in std::fs::read_dir(&self.state_dir)? {
            let entry = entry?;
            let has_state = entry.path().join("state.json").is_file();
            if let (true, Some(name)) = (has_state, entry.file_name().to_str()) {
                ids.push(name.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}
