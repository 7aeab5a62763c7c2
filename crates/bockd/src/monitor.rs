//! Runtime callbacks: lifecycle events and stream attachment.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bock_common::{BockError, BockResult};
use bock_remote::{Backend, ExitStatus, IoPipe, LifecycleEvent, PipeReader, PipeWriter};
use tokio::io::AsyncWriteExt;

use crate::container::Container;
use crate::daemon::Daemon;
use crate::events::EventAction;
use crate::stream::{StdStream, StreamConfig};

impl Daemon {
    /// Apply a lifecycle event reported by the runtime to container `id`.
    ///
    /// Exit, restart, exec exit and start transitions run with the container
    /// lock held for their whole duration.
    ///
    /// # Errors
    ///
    /// - [`BockError::ContainerNotFound`] if `id` is not registered
    /// - [`BockError::PlatformInvariant`] for an OOM event on a platform
    ///   without memory cgroups
    /// - Persistence failures of exit, restart, start and restore
    pub async fn state_changed(&self, id: &str, event: LifecycleEvent) -> BockResult<()> {
        let container = self.get_container(id)?;
        tracing::debug!(container_id = %id, state = %event.state(), "Lifecycle event");

        match event {
            LifecycleEvent::Oom => self.handle_oom(id),
            LifecycleEvent::Exit(status) => self.handle_exit(&container, status).await,
            LifecycleEvent::Restart(status) => self.handle_restart(&container, status).await,
            LifecycleEvent::ExitProcess { process_id, status } => {
                self.handle_exit_process(&container, &process_id, status).await;
                Ok(())
            }
            LifecycleEvent::Start { pid } => self.handle_start(&container, pid, true).await,
            LifecycleEvent::Restore { pid } => self.handle_start(&container, pid, false).await,
            LifecycleEvent::Pause => {
                self.set_paused(&container, true).await;
                Ok(())
            }
            LifecycleEvent::Resume => {
                self.set_paused(&container, false).await;
                Ok(())
            }
        }
    }

    fn handle_oom(&self, id: &str) -> BockResult<()> {
        if !self.platform().supports_oom() {
            return Err(BockError::PlatformInvariant {
                message: format!("out-of-memory event for {id} on {}", self.platform()),
            });
        }
        self.log_container_event(id, EventAction::Oom);
        Ok(())
    }

    async fn handle_exit(&self, container: &Container, status: ExitStatus) -> BockResult<()> {
        let id = container.id();
        let mut state = container.lock().await;

        container.stream_config().wait().await;
        container.reset().await;

        let status = self.platform().exit_status(status);
        state.set_stopped(status);
        tracing::info!(container_id = %id, exit_code = status.exit_code, oom_killed = status.oom_killed, "Container exited");

        self.log_container_event_with_attributes(id, EventAction::Die, exit_attributes(status));
        self.cleanup(container);
        self.save_state(id, &state)
    }

    async fn handle_restart(&self, container: &Container, status: ExitStatus) -> BockResult<()> {
        let id = container.id();
        let mut state = container.lock().await;

        container.stream_config().wait().await;
        container.reset().await;

        let status = self.platform().exit_status(status);
        state.restart_count += 1;
        state.set_restarting(status);
        tracing::info!(container_id = %id, restart_count = state.restart_count, "Container restarting");

        self.log_container_event_with_attributes(id, EventAction::Die, exit_attributes(status));
        self.save_state(id, &state)
    }

    async fn handle_exit_process(&self, container: &Container, process_id: &str, status: ExitStatus) {
        let _state = container.lock().await;

        let Some(exec) = container.exec_commands().get(process_id) else {
            tracing::warn!(
                container_id = %container.id(),
                exec_id = %process_id,
                "Ignoring exit of unknown exec process"
            );
            return;
        };

        exec.set_exited(status.exit_code);
        exec.stream_config().wait().await;
        if let Err(err) = exec.stream_config().close_streams().await {
            tracing::error!(
                container_id = %container.id(),
                exec_id = %process_id,
                error = %err,
                "Failed to close exec streams"
            );
        }

        // Only the container-local entry goes; the daemon-wide record stays
        // for inspection until the container is cleaned up.
        container.exec_commands().delete(process_id);
        tracing::debug!(container_id = %container.id(), exec_id = %process_id, exit_code = status.exit_code, "Exec process exited");
    }

    async fn handle_start(&self, container: &Container, pid: u32, initial: bool) -> BockResult<()> {
        let id = container.id();
        let mut state = container.lock().await;
        let previous = state.clone();

        state.set_running(pid, initial);
        state.has_been_manually_stopped = false;

        if let Err(err) = self.save_state(id, &state) {
            tracing::error!(container_id = %id, pid, error = %err, "Failed to persist running state");
            *state = previous;
            state.running = false;
            state.pid = 0;
            container.reset().await;
            return Err(err);
        }

        tracing::info!(container_id = %id, pid, restored = !initial, "Container running");
        Ok(())
    }

    async fn set_paused(&self, container: &Container, paused: bool) {
        container.lock().await.paused = paused;
        let action = if paused { EventAction::Pause } else { EventAction::Unpause };
        self.log_container_event(container.id(), action);
    }

    /// Wire the runtime's pipes for container or exec session `id`.
    ///
    /// Returns once the copy tasks are spawned. Their completion is tracked
    /// by the stream configuration's wait group.
    ///
    /// # Errors
    ///
    /// - [`BockError::ExecNotFound`] if `id` is neither a container nor an
    ///   exec session
    /// - Log driver start failures (container case)
    pub async fn attach_streams(&self, id: &str, pipes: IoPipe) -> BockResult<()> {
        tracing::debug!(
            id = %id,
            stdin = pipes.stdin.is_some(),
            stdout = pipes.stdout.is_some(),
            stderr = pipes.stderr.is_some(),
            "Attaching streams"
        );

        let (streams, tty) = if let Some(container) = self.containers().get(id) {
            if let Err(err) = self.start_logging(&container).await {
                container.reset().await;
                return Err(err);
            }
            (Arc::clone(container.stream_config()), container.config().tty)
        } else {
            let exec = self.get_exec_config(id)?;
            (Arc::clone(exec.stream_config()), exec.tty())
        };

        let IoPipe { stdin, stdout, stderr, .. } = pipes;
        attach_stdin(id, &streams, stdin, tty).await;

        for (stream, pipe) in [(StdStream::Stdout, stdout), (StdStream::Stderr, stderr)] {
            if let Some(pipe) = pipe {
                spawn_copy(id, &streams, stream, pipe);
            }
        }
        Ok(())
    }
}

fn exit_attributes(status: ExitStatus) -> HashMap<String, String> {
    HashMap::from([("exitCode".to_string(), status.exit_code.to_string())])
}

async fn attach_stdin(id: &str, streams: &StreamConfig, pipe: Option<PipeWriter>, tty: bool) {
    let Some(mut pipe) = pipe else {
        return;
    };

    match streams.take_stdin() {
        Some(mut source) => {
            let id = id.to_string();
            tokio::spawn(async move {
                if let Err(err) = tokio::io::copy(&mut source, &mut pipe).await {
                    tracing::debug!(id = %id, error = %err, "Stdin copy ended with error");
                }
                if let Err(err) = pipe.shutdown().await {
                    tracing::debug!(id = %id, error = %err, "Failed to close stdin pipe");
                }
            });
        }
        None if tty => {
            // A terminal needs its input channel alive even with nothing to send.
            streams.hold_stdin_pipe(pipe).await;
        }
        None => {
            if let Err(err) = pipe.shutdown().await {
                tracing::debug!(id = %id, error = %err, "Failed to close unused stdin pipe");
            }
        }
    }
}

fn spawn_copy(id: &str, streams: &Arc<StreamConfig>, stream: StdStream, pipe: PipeReader) {
    let streams = Arc::clone(streams);
    let id = id.to_string();

    streams.wait_group().add(1);
    tokio::spawn(async move {
        match streams.copy_output(stream, pipe).await {
            Ok(bytes) => tracing::debug!(id = %id, stream = %stream, bytes, "Stream copy finished"),
            Err(err) => tracing::error!(id = %id, stream = %stream, error = %err, "Stream copy error"),
        }
        streams.wait_group().done();
    });
}

#[async_trait]
impl Backend for Daemon {
    async fn state_changed(&self, id: &str, event: LifecycleEvent) -> BockResult<()> {
        Self::state_changed(self, id, event).await
    }

    async fn attach_streams(&self, id: &str, pipes: IoPipe) -> BockResult<()> {
        Self::attach_streams(self, id, pipes).await
    }
}
