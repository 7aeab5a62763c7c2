//! The runtime client interface and the state shared by its backends.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bock_common::{BockError, BockResult};
use bock_oci::{Process, Resources, Spec};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::backend::Backend;
use crate::container::ContainerHandle;

/// Signal number that forcibly ends a container.
pub const SIGKILL: i32 = 9;

/// Resource usage sample for a container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// Total CPU time consumed, in microseconds.
    pub cpu_usage_usec: u64,
    /// Current memory usage in bytes.
    pub memory_usage_bytes: u64,
    /// Number of processes in the container.
    pub pids: u64,
}

/// Adjusts a freshly created container before its init process starts.
pub trait CreateOption: Send + Sync {
    /// Apply to `container`.
    ///
    /// # Errors
    ///
    /// An error aborts creation and tears the container down.
    fn apply(&self, container: &ContainerHandle) -> BockResult<()>;
}

/// Attach labels to the container handle.
#[derive(Debug, Clone, Default)]
pub struct WithLabels(pub HashMap<String, String>);

impl CreateOption for WithLabels {
    fn apply(&self, container: &ContainerHandle) -> BockResult<()> {
        for (key, value) in &self.0 {
            container.set_label(key, value);
        }
        Ok(())
    }
}

/// Operations the engine issues against the low-level runtime.
///
/// Every operation takes the per-container lock for its duration, so
/// operations on one container are serialized while different containers
/// proceed in parallel.
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Create container `id` from `spec` and start its init process.
    ///
    /// On success the backend has seen `attach_streams` and a `Start` event.
    /// On any failure after the runtime object exists it is torn down again.
    async fn create(
        &self,
        id: &str,
        spec: &Spec,
        options: &[Box<dyn CreateOption>],
    ) -> BockResult<()>;

    /// Deliver `signal` to the init process of container `id`.
    async fn signal(&self, id: &str, signal: i32) -> BockResult<()>;

    /// Start exec process `process_id` in container `id`.
    async fn add_process(&self, id: &str, process_id: &str, process: &Process) -> BockResult<()>;

    /// Resize the terminal of a process.
    async fn resize(&self, id: &str, process_id: &str, width: u32, height: u32) -> BockResult<()>;

    /// Freeze every process in the container.
    async fn pause(&self, id: &str) -> BockResult<()>;

    /// Thaw a paused container.
    async fn resume(&self, id: &str) -> BockResult<()>;

    /// Sample resource usage.
    async fn stats(&self, id: &str) -> BockResult<Stats>;

    /// Reattach to a container that kept running across a daemon restart.
    async fn restore(&self, id: &str, options: &[Box<dyn CreateOption>]) -> BockResult<()>;

    /// System pids of every process in the container.
    async fn get_pids_for_container(&self, id: &str) -> BockResult<Vec<u32>>;

    /// Apply new resource limits.
    async fn update_resources(&self, id: &str, resources: &Resources) -> BockResult<()>;
}

/// Container table, per-id locks and backend reference shared by clients.
#[derive(Clone)]
pub struct ClientCommon {
    inner: Arc<CommonInner>,
}

struct CommonInner {
    backend: Arc<dyn Backend>,
    containers: DashMap<String, Arc<ContainerHandle>>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ClientCommon {
    /// Shared state reporting to `backend`.
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            inner: Arc::new(CommonInner {
                backend,
                containers: DashMap::new(),
                locks: DashMap::new(),
            }),
        }
    }

    /// The engine callbacks.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.inner.backend
    }

    /// Acquire the lock for container `id`.
    pub async fn lock(&self, id: &str) -> ContainerLock {
        let mutex = Arc::clone(self.inner.locks.entry(id.to_string()).or_default().value());
        let guard = mutex.lock_owned().await;
        ContainerLock {
            guard: Some(guard),
            id: id.to_string(),
            inner: Arc::clone(&self.inner),
        }
    }

    /// Handle for container `id`.
    ///
    /// # Errors
    ///
    /// [`BockError::ContainerNotFound`] if the client does not know `id`.
    pub fn get_container(&self, id: &str) -> BockResult<Arc<ContainerHandle>> {
        self.inner
            .containers
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| BockError::ContainerNotFound { id: id.to_string() })
    }

    /// Whether a handle for `id` exists.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.inner.containers.contains_key(id)
    }

    pub(crate) fn append_container(&self, container: Arc<ContainerHandle>) {
        self.inner
            .containers
            .insert(container.id().to_string(), container);
    }

    pub(crate) fn delete_container(&self, id: &str) -> Option<Arc<ContainerHandle>> {
        self.inner.containers.remove(id).map(|(_, c)| c)
    }

    /// Number of tracked containers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.containers.len()
    }

    /// Whether no containers are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.containers.is_empty()
    }

    /// Number of lock entries currently held or awaited.
    #[must_use]
    pub fn lock_count(&self) -> usize {
        self.inner.locks.len()
    }

    pub(crate) fn ensure_absent(&self, id: &str) -> BockResult<()> {
        if self.contains(id) {
            return Err(BockError::Config {
                message: format!("container {id} already exists"),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for ClientCommon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCommon")
            .field("containers", &self.inner.containers.len())
            .finish_non_exhaustive()
    }
}

/// Held lock on one container id.
///
/// Dropping it releases the lock and forgets the entry when nobody else
/// holds or waits on it.
pub struct ContainerLock {
    guard: Option<OwnedMutexGuard<()>>,
    id: String,
    inner: Arc<CommonInner>,
}

impl Drop for ContainerLock {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.inner
            .locks
            .remove_if(&self.id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::LifecycleEvent;
    use crate::pipes::IoPipe;
    use std::time::Duration;

    struct NullBackend;

    #[async_trait]
    impl Backend for NullBackend {
        async fn state_changed(&self, _id: &str, _event: LifecycleEvent) -> BockResult<()> {
            Ok(())
        }

        async fn attach_streams(&self, _id: &str, _pipes: IoPipe) -> BockResult<()> {
            Ok(())
        }
    }

    fn common() -> ClientCommon {
        ClientCommon::new(Arc::new(NullBackend))
    }

    #[tokio::test]
    async fn lock_entries_are_dropped_when_released() {
        let common = common();
        {
            let _a = common.lock("a").await;
            let _b = common.lock("b").await;
            assert_eq!(common.lock_count(), 2);
        }
        assert_eq!(common.lock_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn same_id_is_serialized() {
        let common = common();
        let held = common.lock("a").await;

        let other = common.clone();
        let waiter = tokio::spawn(async move {
            let _lock = other.lock("a").await;
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        // A different id is not blocked.
        let b = common.lock("b").await;

        drop(held);
        waiter.await.unwrap();
        drop(b);
        assert_eq!(common.lock_count(), 0);
    }

    #[test]
    fn unknown_container_is_not_found() {
        let err = common().get_container("missing").unwrap_err();
        assert!(matches!(err, BockError::ContainerNotFound { ref id } if id == "missing"));
    }

    #[test]
    fn labels_option_applies() {
        let handle = ContainerHandle::new("c1", Process::default());
        let labels = WithLabels(HashMap::from([("tier".to_string(), "web".to_string())]));
        labels.apply(&handle).unwrap();
        assert_eq!(handle.labels().get("tier").map(String::as_str), Some("web"));
    }
}
