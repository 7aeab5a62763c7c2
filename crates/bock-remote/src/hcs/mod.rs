//! Runtime client backed by the Host Compute Service.
//!
//! Containers are compute systems. The client builds a [`ContainerInit`]
//! document from the spec, creates the compute system (retrying the known
//! spurious failures on platform builds that produce them), and starts the
//! init process. Only create, signal and exec are supported; the remaining
//! operations report [`BockError::Unsupported`].

pub mod api;
pub mod config;
pub mod process;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bock_common::{BockError, BockResult};
use bock_oci::{Process, Resources, Spec};
use tracing::{debug, error, info, warn};

pub use api::{ComputeSystemApi, HcsError, Timeout};
pub use config::ContainerInit;
pub use process::ProcessParams;

use crate::backend::Backend;
use crate::client::{ClientCommon, CreateOption, RuntimeClient, SIGKILL, Stats};
use crate::container::ContainerHandle;
use crate::event::{ExitStatus, LifecycleEvent};

/// Create attempts made when the platform needs retrying.
pub const CREATE_MAX_ATTEMPTS: u32 = 5;

/// Pause between create attempts.
pub const CREATE_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Exit code reported when waiting on a process fails.
pub const UNKNOWN_EXIT_CODE: u32 = 255;

/// [`RuntimeClient`] over a [`ComputeSystemApi`].
#[derive(Clone)]
pub struct HcsClient {
    common: ClientCommon,
    hcs: Arc<dyn ComputeSystemApi>,
}

impl HcsClient {
    /// Client reporting to `backend`.
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>, hcs: Arc<dyn ComputeSystemApi>) -> Self {
        Self {
            common: ClientCommon::new(backend),
            hcs,
        }
    }

    /// Shared container table and locks.
    #[must_use]
    pub const fn common(&self) -> &ClientCommon {
        &self.common
    }

    async fn create_compute_system(&self, id: &str, configuration: &str) -> BockResult<()> {
        if !self.hcs.requires_create_retry() {
            return self
                .hcs
                .create_compute_system(id, configuration)
                .await
                .map_err(Into::into);
        }

        let mut attempt = 1;
        loop {
            match self.hcs.create_compute_system(id, configuration).await {
                Ok(()) => return Ok(()),
                Err(err) if !err.is_transient_create() => {
                    debug!(container_id = %id, error = %err, "Failed to create compute system");
                    return Err(err.into());
                }
                Err(err) if attempt >= CREATE_MAX_ATTEMPTS => {
                    error!(
                        container_id = %id,
                        attempts = attempt,
                        error = %err,
                        "Compute system creation kept failing"
                    );
                    return Err(BockError::TransientCreation {
                        attempts: attempt,
                        code: err.code,
                        message: err.message,
                    });
                }
                Err(err) => {
                    warn!(
                        container_id = %id,
                        attempt,
                        max_attempts = CREATE_MAX_ATTEMPTS,
                        error = %err,
                        "Retrying compute system creation"
                    );
                    tokio::time::sleep(CREATE_RETRY_DELAY).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn start_init(
        &self,
        container: &ContainerHandle,
        options: &[Box<dyn CreateOption>],
    ) -> BockResult<()> {
        for option in options {
            option.apply(container)?;
        }

        let id = container.id();
        let params = ProcessParams::for_process(container.init());
        let spawned = self.hcs.create_process(id, &params).await?;
        let pid = spawned.pid;
        container.set_system_pid(pid);

        let mut pipes = spawned.pipes;
        pipes.terminal = container.init().terminal;
        self.common.backend().attach_streams(id, pipes).await?;
        self.common
            .backend()
            .state_changed(id, LifecycleEvent::Start { pid })
            .await?;

        info!(container_id = %id, pid, "Container started");
        self.spawn_waiter(id.to_string(), pid, None);
        Ok(())
    }

    fn spawn_waiter(&self, id: String, pid: u32, process_id: Option<String>) {
        let client = self.clone();
        tokio::spawn(async move {
            let exit_code = match client.hcs.wait_process(&id, pid).await {
                Ok(code) => code,
                Err(err) => {
                    warn!(container_id = %id, pid, error = %err, "Failed to wait for process");
                    UNKNOWN_EXIT_CODE
                }
            };
            let status = ExitStatus::code(exit_code);

            let event = match process_id {
                Some(process_id) => {
                    if let Ok(container) = client.common.get_container(&id) {
                        container.remove_process(&process_id);
                    }
                    LifecycleEvent::ExitProcess { process_id, status }
                }
                None => {
                    client.reap_init(&id).await;
                    LifecycleEvent::Exit(status)
                }
            };

            debug!(container_id = %id, pid, exit_code, "Process exited");
            if let Err(err) = client.common.backend().state_changed(&id, event).await {
                error!(container_id = %id, error = %err, "Failed to process exit");
            }
        });
    }

    async fn reap_init(&self, id: &str) {
        let _lock = self.common.lock(id).await;
        if let Err(err) = self
            .hcs
            .shutdown_compute_system(id, Timeout::Infinite, "init exited")
            .await
        {
            debug!(container_id = %id, error = %err, "Shutdown after init exit failed");
        }
        self.common.delete_container(id);
    }

    async fn teardown(&self, id: &str, context: &str) {
        if let Err(err) = self
            .hcs
            .terminate_compute_system(id, Timeout::Infinite, context)
            .await
        {
            error!(container_id = %id, error = %err, "Failed to clean up compute system");
        }
    }
}

impl std::fmt::Debug for HcsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HcsClient")
            .field("common", &self.common)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RuntimeClient for HcsClient {
    async fn create(
        &self,
        id: &str,
        spec: &Spec,
        options: &[Box<dyn CreateOption>],
    ) -> BockResult<()> {
        debug!(container_id = %id, "Creating container");
        let _lock = self.common.lock(id).await;
        self.common.ensure_absent(id)?;

        let configuration = serde_json::to_string(&ContainerInit::from_spec(id, spec)?)?;
        self.create_compute_system(id, &configuration).await?;

        let container = Arc::new(ContainerHandle::new(id, spec.process.clone()));
        self.common.append_container(Arc::clone(&container));

        if let Err(err) = self.start_init(&container, options).await {
            warn!(container_id = %id, error = %err, "Start failed, removing container");
            self.common.delete_container(id);
            self.teardown(id, "create failed").await;
            return Err(err);
        }
        Ok(())
    }

    async fn signal(&self, id: &str, signal: i32) -> BockResult<()> {
        let _lock = self.common.lock(id).await;
        let container = self.common.get_container(id)?;
        let pid = container.system_pid();

        debug!(container_id = %id, signal, pid, "Signal");
        let context = format!("kill: sig={signal} pid={pid}");

        if signal == SIGKILL {
            if let Err(err) = self
                .hcs
                .terminate_compute_system(id, Timeout::Infinite, &context)
                .await
            {
                error!(container_id = %id, error = %err, "Failed to terminate");
            }
        } else {
            if let Err(err) = self.hcs.terminate_process(id, pid).await {
                warn!(container_id = %id, pid, error = %err, "Failed to terminate process");
            }
            if let Err(err) = self
                .hcs
                .shutdown_compute_system(id, Timeout::Infinite, &context)
                .await
            {
                error!(container_id = %id, error = %err, "Failed to shut down");
            }
        }
        Ok(())
    }

    async fn add_process(&self, id: &str, process_id: &str, process: &Process) -> BockResult<()> {
        let _lock = self.common.lock(id).await;
        let container = self.common.get_container(id)?;

        let spawned = self
            .hcs
            .create_process(id, &ProcessParams::for_process(process))
            .await?;
        let pid = spawned.pid;
        container.add_process(process_id, pid);

        let mut pipes = spawned.pipes;
        pipes.terminal = process.terminal;
        if let Err(err) = self.common.backend().attach_streams(process_id, pipes).await {
            container.remove_process(process_id);
            if let Err(kill_err) = self.hcs.terminate_process(id, pid).await {
                warn!(container_id = %id, pid, error = %kill_err, "Failed to terminate exec process");
            }
            return Err(err);
        }

        debug!(container_id = %id, exec_id = %process_id, pid, "Exec process started");
        self.spawn_waiter(id.to_string(), pid, Some(process_id.to_string()));
        Ok(())
    }

    async fn resize(&self, _id: &str, _process_id: &str, _width: u32, _height: u32) -> BockResult<()> {
        Err(BockError::unsupported("resize on compute systems"))
    }

    async fn pause(&self, _id: &str) -> BockResult<()> {
        Err(BockError::unsupported("pause on compute systems"))
    }

    async fn resume(&self, _id: &str) -> BockResult<()> {
        Err(BockError::unsupported("resume on compute systems"))
    }

    async fn stats(&self, _id: &str) -> BockResult<Stats> {
        Err(BockError::unsupported("stats on compute systems"))
    }

    async fn restore(&self, _id: &str, _options: &[Box<dyn CreateOption>]) -> BockResult<()> {
        Err(BockError::unsupported("restore on compute systems"))
    }

    async fn get_pids_for_container(&self, _id: &str) -> BockResult<Vec<u32>> {
        Err(BockError::unsupported("listing pids on compute systems"))
    }

    async fn update_resources(&self, _id: &str, _resources: &Resources) -> BockResult<()> {
        Err(BockError::unsupported("updating resources on compute systems"))
    }
}
