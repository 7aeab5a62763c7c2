//! Exec sessions: secondary processes inside a running container.

use std::sync::Arc;

use bock_common::id::generate_id;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::stream::StreamConfig;

#[derive(Debug, Default)]
struct ExecStatus {
    exit_code: Option<u32>,
    running: bool,
}

/// One exec session.
#[derive(Debug)]
pub struct ExecConfig {
    id: String,
    container_id: String,
    tty: bool,
    status: Mutex<ExecStatus>,
    stream_config: Arc<StreamConfig>,
}

impl ExecConfig {
    /// New session in `container_id` with a generated id.
    pub fn new(container_id: impl Into<String>, tty: bool) -> Self {
        Self::with_id(generate_id(), container_id, tty)
    }

    /// New session with an explicit id.
    pub fn with_id(id: impl Into<String>, container_id: impl Into<String>, tty: bool) -> Self {
        Self {
            id: id.into(),
            container_id: container_id.into(),
            tty,
            status: Mutex::new(ExecStatus::default()),
            stream_config: Arc::new(StreamConfig::new()),
        }
    }

    /// Session id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Id of the owning container.
    #[must_use]
    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// Whether the session runs under a pseudo-terminal.
    #[must_use]
    pub const fn tty(&self) -> bool {
        self.tty
    }

    /// The session's stdio.
    #[must_use]
    pub const fn stream_config(&self) -> &Arc<StreamConfig> {
        &self.stream_config
    }

    /// Mark the process as started.
    pub fn set_running(&self) {
        let mut status = self.status.lock();
        status.running = true;
        status.exit_code = None;
    }

    /// Record the process exit.
    pub fn set_exited(&self, exit_code: u32) {
        let mut status = self.status.lock();
        status.running = false;
        status.exit_code = Some(exit_code);
    }

    /// Exit code, once the process ended.
    #[must_use]
    pub fn exit_code(&self) -> Option<u32> {
        self.status.lock().exit_code
    }

    /// Whether the process is alive.
    #[must_use]
    pub fn running(&self) -> bool {
        self.status.lock().running
    }
}

/// Table of exec sessions by id.
#[derive(Debug, Default)]
pub struct ExecStore {
    commands: DashMap<String, Arc<ExecConfig>>,
}

impl ExecStore {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `config` under its id.
    pub fn add(&self, config: Arc<ExecConfig>) {
        self.commands.insert(config.id().to_string(), config);
    }

    /// Look up a session.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<ExecConfig>> {
        self.commands.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove a session, returning it if it was present.
    pub fn delete(&self, id: &str) -> Option<Arc<ExecConfig>> {
        self.commands.remove(id).map(|(_, config)| config)
    }

    /// Ids of every session.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.commands.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
