//! Runtime client backed by a Linux task service.
//!
//! Each container is a task created from a bundle directory holding the
//! serialized spec. Unlike compute systems, tasks support the full client
//! surface: pause, resume, resize, stats, restore and resource updates.

pub mod api;
pub mod bundle;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bock_common::BockResult;
use bock_oci::{Process, Resources, Spec};
use tracing::{debug, error, info, warn};

pub use api::{TaskApi, TaskError};

use crate::backend::Backend;
use crate::client::{ClientCommon, CreateOption, RuntimeClient, Stats};
use crate::container::{ContainerHandle, INIT_PROCESS};
use crate::event::{ExitStatus, LifecycleEvent};
use crate::pipes::SpawnedProcess;

/// Exit status reported when waiting on a process fails.
const UNKNOWN_EXIT: ExitStatus = ExitStatus::code(255);

/// [`RuntimeClient`] over a [`TaskApi`].
#[derive(Clone)]
pub struct TaskClient {
    common: ClientCommon,
    tasks: Arc<dyn TaskApi>,
    state_dir: PathBuf,
}

impl TaskClient {
    /// Client keeping bundles under `state_dir` and reporting to `backend`.
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>, tasks: Arc<dyn TaskApi>, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            common: ClientCommon::new(backend),
            tasks,
            state_dir: state_dir.into(),
        }
    }

    /// Shared container table and locks.
    #[must_use]
    pub const fn common(&self) -> &ClientCommon {
        &self.common
    }

    fn bundle_dir(&self, id: &str) -> PathBuf {
        self.state_dir.join(id)
    }

    /// Wire up a started init process and begin watching it.
    async fn start(
        &self,
        container: &ContainerHandle,
        spawned: SpawnedProcess,
        event: LifecycleEvent,
    ) -> BockResult<()> {
        let id = container.id();
        container.set_system_pid(spawned.pid);

        let mut pipes = spawned.pipes;
        pipes.terminal = container.init().terminal;
        self.common.backend().attach_streams(id, pipes).await?;
        self.common.backend().state_changed(id, event).await?;

        self.forward_oom(id).await;
        self.spawn_waiter(id.to_string(), INIT_PROCESS.to_string());
        Ok(())
    }

    async fn forward_oom(&self, id: &str) {
        let mut events = match self.tasks.oom_events(id).await {
            Ok(events) => events,
            Err(err) => {
                debug!(container_id = %id, error = %err, "No OOM notifications");
                return;
            }
        };

        let backend = Arc::clone(self.common.backend());
        let id = id.to_string();
        tokio::spawn(async move {
            while events.recv().await.is_some() {
                if let Err(err) = backend.state_changed(&id, LifecycleEvent::Oom).await {
                    warn!(container_id = %id, error = %err, "Failed to report OOM");
                }
            }
        });
    }

    fn spawn_waiter(&self, id: String, process_id: String) {
        let client = self.clone();
        tokio::spawn(async move {
            let status = match client.tasks.wait(&id, &process_id).await {
                Ok(status) => status,
                Err(err) => {
                    warn!(container_id = %id, process_id = %process_id, error = %err, "Failed to wait for process");
                    UNKNOWN_EXIT
                }
            };

            let event = if process_id == INIT_PROCESS {
                client.reap_init(&id).await;
                LifecycleEvent::Exit(status)
            } else {
                if let Ok(container) = client.common.get_container(&id) {
                    container.remove_process(&process_id);
                }
                LifecycleEvent::ExitProcess { process_id, status }
            };

            debug!(container_id = %id, exit_code = status.exit_code, "Process exited");
            if let Err(err) = client.common.backend().state_changed(&id, event).await {
                error!(container_id = %id, error = %err, "Failed to process exit");
            }
        });
    }

    async fn reap_init(&self, id: &str) {
        let _lock = self.common.lock(id).await;
        self.common.delete_container(id);
        self.delete_task(id).await;
    }

    async fn delete_task(&self, id: &str) {
        if let Err(err) = self.tasks.delete(id).await {
            warn!(container_id = %id, error = %err, "Failed to delete task");
        }
        bundle::remove(&self.bundle_dir(id));
    }
}

impl std::fmt::Debug for TaskClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskClient")
            .field("common", &self.common)
            .field("state_dir", &self.state_dir)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RuntimeClient for TaskClient {
    async fn create(
        &self,
        id: &str,
        spec: &Spec,
        options: &[Box<dyn CreateOption>],
    ) -> BockResult<()> {
        let _lock = self.common.lock(id).await;
        self.common.ensure_absent(id)?;

        let bundle = bundle::prepare(&self.state_dir, id, spec)?;
        let spawned = match self.tasks.create(id, &bundle, spec.process.terminal).await {
            Ok(spawned) => spawned,
            Err(err) => {
                bundle::remove(&bundle);
                return Err(err.into());
            }
        };

        let container = Arc::new(ContainerHandle::new(id, spec.process.clone()));
        self.common.append_container(Arc::clone(&container));

        let pid = spawned.pid;
        let started = async {
            for option in options {
                option.apply(&container)?;
            }
            self.start(&container, spawned, LifecycleEvent::Start { pid }).await
        }
        .await;

        if let Err(err) = started {
            warn!(container_id = %id, error = %err, "Start failed, removing container");
            self.common.delete_container(id);
            self.delete_task(id).await;
            return Err(err);
        }

        info!(container_id = %id, pid, "Container started");
        Ok(())
    }

    async fn signal(&self, id: &str, signal: i32) -> BockResult<()> {
        let _lock = self.common.lock(id).await;
        self.common.get_container(id)?;
        debug!(container_id = %id, signal, "Signal");
        Ok(self.tasks.kill(id, INIT_PROCESS, signal).await?)
    }

    async fn add_process(&self, id: &str, process_id: &str, process: &Process) -> BockResult<()> {
        let _lock = self.common.lock(id).await;
        let container = self.common.get_container(id)?;

        let spawned = self.tasks.exec(id, process_id, process).await?;
        container.add_process(process_id, spawned.pid);

        let mut pipes = spawned.pipes;
        pipes.terminal = process.terminal;
        if let Err(err) = self.common.backend().attach_streams(process_id, pipes).await {
            container.remove_process(process_id);
            if let Err(kill_err) = self.tasks.kill(id, process_id, crate::client::SIGKILL).await {
                warn!(container_id = %id, exec_id = %process_id, error = %kill_err, "Failed to kill exec process");
            }
            return Err(err);
        }

        self.spawn_waiter(id.to_string(), process_id.to_string());
        Ok(())
    }

    async fn resize(&self, id: &str, process_id: &str, width: u32, height: u32) -> BockResult<()> {
        let _lock = self.common.lock(id).await;
        self.common.get_container(id)?;
        Ok(self.tasks.resize(id, process_id, width, height).await?)
    }

    async fn pause(&self, id: &str) -> BockResult<()> {
        let _lock = self.common.lock(id).await;
        self.common.get_container(id)?;
        self.tasks.pause(id).await?;
        self.common.backend().state_changed(id, LifecycleEvent::Pause).await
    }

    async fn resume(&self, id: &str) -> BockResult<()> {
        let _lock = self.common.lock(id).await;
        self.common.get_container(id)?;
        self.tasks.resume(id).await?;
        self.common.backend().state_changed(id, LifecycleEvent::Resume).await
    }

    async fn stats(&self, id: &str) -> BockResult<Stats> {
        let _lock = self.common.lock(id).await;
        self.common.get_container(id)?;
        Ok(self.tasks.stats(id).await?)
    }

    async fn restore(&self, id: &str, options: &[Box<dyn CreateOption>]) -> BockResult<()> {
        let _lock = self.common.lock(id).await;
        self.common.ensure_absent(id)?;

        let spawned = self.tasks.attach(id).await?;
        let spec_process = read_init_process(&self.bundle_dir(id));
        let container = Arc::new(ContainerHandle::new(id, spec_process));
        self.common.append_container(Arc::clone(&container));

        let pid = spawned.pid;
        let restored = async {
            for option in options {
                option.apply(&container)?;
            }
            self.start(&container, spawned, LifecycleEvent::Restore { pid }).await
        }
        .await;

        if let Err(err) = restored {
            self.common.delete_container(id);
            return Err(err);
        }

        info!(container_id = %id, pid, "Container restored");
        Ok(())
    }

    async fn get_pids_for_container(&self, id: &str) -> BockResult<Vec<u32>> {
        let _lock = self.common.lock(id).await;
        self.common.get_container(id)?;
        Ok(self.tasks.pids(id).await?)
    }

    async fn update_resources(&self, id: &str, resources: &Resources) -> BockResult<()> {
        let _lock = self.common.lock(id).await;
        self.common.get_container(id)?;
        Ok(self.tasks.update(id, resources).await?)
    }
}

/// Init process recorded in an existing bundle, default if unreadable.
fn read_init_process(bundle: &std::path::Path) -> Process {
    std::fs::read(bundle.join(bundle::CONFIG_FILE))
        .ok()
        .and_then(|bytes| serde_json::from_slice::<Spec>(&bytes).ok())
        .map(|spec| spec.process)
        .unwrap_or_default()
}
