//! The engine: registries, persistence, events and log capture.

use std::collections::HashMap;
use std::sync::Arc;

use bock_common::{BockError, BockPaths, BockResult};

use crate::config::{DaemonConfig, LogDriver, Platform};
use crate::container::{Container, ContainerConfig};
use crate::events::{ContainerEvent, EventAction, EventBus};
use crate::exec::{ExecConfig, ExecStore};
use crate::logger::JsonFileLogger;
use crate::registry::ContainerRegistry;
use crate::state::{ContainerState, StateStore};
use crate::stream::{SinkKind, StdStream};

/// Engine state shared by every request and runtime callback.
///
/// `Daemon` implements [`bock_remote::Backend`], so a runtime client can be
/// built around an `Arc<Daemon>` and report lifecycle events straight into it.
#[derive(Debug)]
pub struct Daemon {
    config: DaemonConfig,
    platform: Platform,
    paths: BockPaths,
    containers: ContainerRegistry,
    exec_commands: ExecStore,
    events: EventBus,
    store: StateStore,
}

impl Daemon {
    /// Engine for `config`.
    #[must_use]
    pub fn new(config: DaemonConfig) -> Self {
        let platform = config.platform();
        let paths = config.paths();
        let store = StateStore::new(paths.containers());

        tracing::info!(
            root = %paths.root.display(),
            platform = %platform,
            log_driver = ?config.log_driver,
            "Daemon initialized"
        );

        Self {
            config,
            platform,
            paths,
            containers: ContainerRegistry::new(),
            exec_commands: ExecStore::new(),
            events: EventBus::new(),
            store,
        }
    }

    /// Settings the daemon was built with.
    #[must_use]
    pub const fn config(&self) -> &DaemonConfig {
        &self.config
    }

    /// Platform whose semantics apply.
    #[must_use]
    pub const fn platform(&self) -> Platform {
        self.platform
    }

    /// Filesystem layout.
    #[must_use]
    pub const fn paths(&self) -> &BockPaths {
        &self.paths
    }

    /// Container registry.
    #[must_use]
    pub const fn containers(&self) -> &ContainerRegistry {
        &self.containers
    }

    /// Daemon-wide exec sessions.
    #[must_use]
    pub const fn exec_commands(&self) -> &ExecStore {
        &self.exec_commands
    }

    /// Event bus.
    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    /// Persisted container state.
    #[must_use]
    pub const fn store(&self) -> &StateStore {
        &self.store
    }

    /// Register a new container.
    ///
    /// # Errors
    ///
    /// Fails if the id is already taken.
    pub fn register_container(&self, id: &str, config: ContainerConfig) -> BockResult<Arc<Container>> {
        if self.containers.exists(id) {
            return Err(BockError::Config {
                message: format!("container {id} already exists"),
            });
        }
        let container = Arc::new(Container::new(id, config));
        self.containers.add(Arc::clone(&container));
        tracing::debug!(container_id = %id, "Registered container");
        Ok(container)
    }

    /// Register a container from its persisted state, as after a daemon restart.
    ///
    /// # Errors
    ///
    /// [`BockError::ContainerNotFound`] if no state was saved for `id`.
    pub fn load_container(&self, id: &str, config: ContainerConfig) -> BockResult<Arc<Container>> {
        let state = self.store.load(id)?;
        let container = Arc::new(Container::with_state(id, config, state));
        self.containers.add(Arc::clone(&container));
        tracing::debug!(container_id = %id, "Loaded container from disk");
        Ok(container)
    }

    /// Look up a container.
    ///
    /// # Errors
    ///
    /// [`BockError::ContainerNotFound`] if `id` is not registered.
    pub fn get_container(&self, id: &str) -> BockResult<Arc<Container>> {
        self.containers
            .get(id)
            .ok_or_else(|| BockError::ContainerNotFound { id: id.to_string() })
    }

    /// Forget a container and its saved state.
    ///
    /// # Errors
    ///
    /// Fails if the state directory cannot be removed.
    pub fn remove_container(&self, id: &str) -> BockResult<()> {
        if let Some(container) = self.containers.delete(id) {
            self.cleanup(&container);
        }
        self.store.delete(id)
    }

    /// Track an exec session both in its container and daemon-wide.
    pub fn register_exec(&self, container: &Container, exec: Arc<ExecConfig>) {
        tracing::debug!(container_id = %container.id(), exec_id = %exec.id(), "Registered exec");
        container.exec_commands().add(Arc::clone(&exec));
        self.exec_commands.add(exec);
    }

    /// Drop an exec session from both tables.
    pub fn unregister_exec(&self, container: &Container, exec_id: &str) {
        container.exec_commands().delete(exec_id);
        self.exec_commands.delete(exec_id);
    }

    /// Look up an exec session daemon-wide.
    ///
    /// # Errors
    ///
    /// [`BockError::ExecNotFound`] if `id` is unknown.
    pub fn get_exec_config(&self, id: &str) -> BockResult<Arc<ExecConfig>> {
        self.exec_commands
            .get(id)
            .ok_or_else(|| BockError::ExecNotFound { id: id.to_string() })
    }

    /// Publish an event without attributes.
    pub fn log_container_event(&self, id: &str, action: EventAction) {
        self.log_container_event_with_attributes(id, action, HashMap::new());
    }

    /// Publish an event.
    pub fn log_container_event_with_attributes(
        &self,
        id: &str,
        action: EventAction,
        attributes: HashMap<String, String>,
    ) {
        tracing::info!(container_id = %id, action = %action, ?attributes, "Container event");
        self.events.publish(ContainerEvent::new(id, action, attributes));
    }

    /// Release what a stopped container holds in the daemon.
    ///
    /// Its exec sessions leave the daemon-wide table; the container's own
    /// table is kept for inspection.
    pub fn cleanup(&self, container: &Container) {
        for exec_id in container.exec_commands().ids() {
            self.exec_commands.delete(&exec_id);
        }
        tracing::debug!(container_id = %container.id(), "Cleaned up container");
    }

    /// Persist a container's state.
    ///
    /// # Errors
    ///
    /// Fails if the state file cannot be written.
    pub fn save_state(&self, id: &str, state: &ContainerState) -> BockResult<()> {
        self.store.save(id, state)
    }

    /// Start capturing a container's output with its log driver.
    ///
    /// # Errors
    ///
    /// Fails if the log file cannot be opened.
    pub async fn start_logging(&self, container: &Container) -> BockResult<()> {
        let driver = container.config().log_driver.unwrap_or(self.config.log_driver);
        match driver {
            LogDriver::Disabled => Ok(()),
            LogDriver::JsonFile => {
                let path = self.paths.container_log(container.id());
                let logger = JsonFileLogger::open(&path).await?;

                let streams = container.stream_config();
                for stream in [StdStream::Stdout, StdStream::Stderr] {
                    streams
                        .output(stream)
                        .add(SinkKind::Log, Box::new(logger.sink(stream)))
                        .await;
                }

                tracing::debug!(container_id = %container.id(), path = %path.display(), "Started json-file logging");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn daemon(root: &std::path::Path) -> Daemon {
        Daemon::new(
            DaemonConfig::default()
                .with_root(root)
                .with_exec_root(root.join("run"))
                .with_platform(Platform::Linux),
        )
    }

    #[test]
    fn register_and_lookup() {
        let temp = tempfile::tempdir().unwrap();
        let daemon = daemon(temp.path());

        daemon.register_container("c1", ContainerConfig::default()).unwrap();
        assert!(daemon.get_container("c1").is_ok());
        assert!(daemon.get_container("c2").unwrap_err().is_not_found());
        assert!(daemon.register_container("c1", ContainerConfig::default()).is_err());
    }

    #[test]
    fn exec_tables_and_cleanup() {
        let temp = tempfile::tempdir().unwrap();
        let daemon = daemon(temp.path());
        let container = daemon.register_container("c1", ContainerConfig::default()).unwrap();

        daemon.register_exec(&container, Arc::new(ExecConfig::with_id("e1", "c1", false)));
        daemon.register_exec(&container, Arc::new(ExecConfig::with_id("e2", "c1", false)));
        assert!(daemon.get_exec_config("e1").is_ok());

        daemon.unregister_exec(&container, "e2");
        assert!(container.exec_commands().get("e2").is_none());

        daemon.cleanup(&container);
        assert!(matches!(
            daemon.get_exec_config("e1"),
            Err(BockError::ExecNotFound { .. })
        ));
        assert!(container.exec_commands().get("e1").is_some());
    }

    #[test]
    fn load_and_remove_container() {
        let temp = tempfile::tempdir().unwrap();
        let daemon = daemon(temp.path());

        let mut state = ContainerState::default();
        state.set_running(5, true);
        daemon.save_state("c1", &state).unwrap();

        let container = daemon.load_container("c1", ContainerConfig::default()).unwrap();
        assert_eq!(container.id(), "c1");
        assert!(daemon.load_container("ghost", ContainerConfig::default()).is_err());

        daemon.remove_container("c1").unwrap();
        assert!(!daemon.containers().exists("c1"));
        assert!(!daemon.store().state_path("c1").exists());
    }

    #[tokio::test]
    async fn logging_follows_driver() {
        let temp = tempfile::tempdir().unwrap();
        let daemon = daemon(temp.path());

        let quiet = daemon
            .register_container(
                "quiet",
                ContainerConfig {
                    log_driver: Some(LogDriver::Disabled),
                    ..Default::default()
                },
            )
            .unwrap();
        daemon.start_logging(&quiet).await.unwrap();
        assert_eq!(quiet.stream_config().stdout().count(SinkKind::Log).await, 0);

        let loud = daemon.register_container("loud", ContainerConfig::default()).unwrap();
        daemon.start_logging(&loud).await.unwrap();
        assert_eq!(loud.stream_config().stdout().count(SinkKind::Log).await, 1);
        assert_eq!(loud.stream_config().stderr().count(SinkKind::Log).await, 1);
        assert!(daemon.paths().container_log("loud").exists());
    }
}
