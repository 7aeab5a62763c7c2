//! Engine-side container record.

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::config::LogDriver;
use crate::exec::ExecStore;
use crate::state::ContainerState;
use crate::stream::StreamConfig;

/// Creation-time settings that shape a container's stdio.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerConfig {
    /// Run the init process under a pseudo-terminal.
    pub tty: bool,
    /// Keep stdin open for attached clients.
    pub open_stdin: bool,
    /// Log driver override; the daemon default when unset.
    pub log_driver: Option<LogDriver>,
}

/// A container known to the engine.
///
/// The mutable state sits behind the container lock; every lifecycle
/// transition holds it for its whole duration.
#[derive(Debug)]
pub struct Container {
    id: String,
    config: ContainerConfig,
    stream_config: Arc<StreamConfig>,
    state: Mutex<ContainerState>,
    exec_commands: ExecStore,
}

impl Container {
    /// New, never-started container.
    pub fn new(id: impl Into<String>, config: ContainerConfig) -> Self {
        Self::with_state(id, config, ContainerState::default())
    }

    /// Container with previously persisted state.
    pub fn with_state(id: impl Into<String>, config: ContainerConfig, state: ContainerState) -> Self {
        Self {
            id: id.into(),
            config,
            stream_config: Arc::new(StreamConfig::new()),
            state: Mutex::new(state),
            exec_commands: ExecStore::new(),
        }
    }

    /// Container id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Creation-time settings.
    #[must_use]
    pub const fn config(&self) -> &ContainerConfig {
        &self.config
    }

    /// The container's stdio.
    #[must_use]
    pub const fn stream_config(&self) -> &Arc<StreamConfig> {
        &self.stream_config
    }

    /// Exec sessions of this container.
    #[must_use]
    pub const fn exec_commands(&self) -> &ExecStore {
        &self.exec_commands
    }

    /// Take the container lock.
    pub async fn lock(&self) -> MutexGuard<'_, ContainerState> {
        self.state.lock().await
    }

    /// Snapshot of the current state.
    pub async fn state(&self) -> ContainerState {
        self.state.lock().await.clone()
    }

    /// Release the stdio of the last run so the container can run again.
    ///
    /// Close failures are logged.
    pub async fn reset(&self) {
        if let Err(err) = self.stream_config.close_streams().await {
            tracing::error!(container_id = %self.id, error = %err, "Failed to close container streams");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lock_guards_state() {
        let container = Container::new("c1", ContainerConfig::default());
        {
            let mut state = container.lock().await;
            state.set_running(9, true);
        }
        assert_eq!(container.state().await.pid, 9);
        assert!(container.exec_commands().is_empty());
    }
}
