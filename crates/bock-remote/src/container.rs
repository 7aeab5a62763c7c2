//! Client-side record of a running container.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use bock_oci::Process;
use parking_lot::Mutex;

/// Name of the init process within a container.
pub const INIT_PROCESS: &str = "init";

/// Per-container bookkeeping owned by a runtime client.
///
/// A handle exists from successful creation until the init process exits
/// or creation is rolled back. Exec processes are tracked by session id.
#[derive(Debug)]
pub struct ContainerHandle {
    id: String,
    init: Process,
    system_pid: AtomicU32,
    processes: Mutex<HashMap<String, u32>>,
    labels: Mutex<HashMap<String, String>>,
}

impl ContainerHandle {
    /// New handle for container `id` whose init process is `init`.
    #[must_use]
    pub fn new(id: impl Into<String>, init: Process) -> Self {
        Self {
            id: id.into(),
            init,
            system_pid: AtomicU32::new(0),
            processes: Mutex::new(HashMap::new()),
            labels: Mutex::new(HashMap::new()),
        }
    }

    /// Container id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Init process description.
    #[must_use]
    pub const fn init(&self) -> &Process {
        &self.init
    }

    /// System pid of the init process, 0 before it started.
    #[must_use]
    pub fn system_pid(&self) -> u32 {
        self.system_pid.load(Ordering::Acquire)
    }

    pub(crate) fn set_system_pid(&self, pid: u32) {
        self.system_pid.store(pid, Ordering::Release);
    }

    pub(crate) fn add_process(&self, process_id: &str, pid: u32) {
        self.processes.lock().insert(process_id.to_string(), pid);
    }

    pub(crate) fn remove_process(&self, process_id: &str) -> Option<u32> {
        self.processes.lock().remove(process_id)
    }

    /// System pid of exec session `process_id`.
    #[must_use]
    pub fn process(&self, process_id: &str) -> Option<u32> {
        self.processes.lock().get(process_id).copied()
    }

    /// Ids of the exec processes still running.
    #[must_use]
    pub fn process_ids(&self) -> Vec<String> {
        self.processes.lock().keys().cloned().collect()
    }

    /// Attach a label.
    pub fn set_label(&self, key: impl Into<String>, value: impl Into<String>) {
        self.labels.lock().insert(key.into(), value.into());
    }

    /// Copy of the labels.
    #[must_use]
    pub fn labels(&self) -> HashMap<String, String> {
        self.labels.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_exec_processes() {
        let handle = ContainerHandle::new("c1", Process::default());
        assert_eq!(handle.system_pid(), 0);

        handle.set_system_pid(100);
        handle.add_process("e1", 101);
        assert_eq!(handle.system_pid(), 100);
        assert_eq!(handle.process("e1"), Some(101));
        assert_eq!(handle.process_ids(), vec!["e1".to_string()]);

        assert_eq!(handle.remove_process("e1"), Some(101));
        assert!(handle.process("e1").is_none());
    }
}
