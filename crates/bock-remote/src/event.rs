//! Lifecycle events reported by the runtime.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Tag of a [`LifecycleEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum State {
    /// Init process started.
    Start,
    /// Running container reattached after a daemon restart.
    Restore,
    /// Init process exited.
    Exit,
    /// An exec process exited.
    ExitProcess,
    /// Container exited and is being restarted by the runtime.
    Restart,
    /// Memory cgroup reported an out-of-memory condition.
    Oom,
    /// Container frozen.
    Pause,
    /// Container thawed.
    Resume,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Start => "start",
            Self::Restore => "restore",
            Self::Exit => "exit",
            Self::ExitProcess => "exit-process",
            Self::Restart => "restart",
            Self::Oom => "oom",
            Self::Pause => "pause",
            Self::Resume => "resume",
        };
        f.write_str(s)
    }
}

/// Platform exit-status payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitStatus {
    /// Process exit code.
    pub exit_code: u32,
    /// Whether the kernel OOM killer ended the process.
    #[serde(default)]
    pub oom_killed: bool,
}

impl ExitStatus {
    /// Exit status with the given code.
    #[must_use]
    pub const fn code(exit_code: u32) -> Self {
        Self {
            exit_code,
            oom_killed: false,
        }
    }
}

/// A state change reported for a container or one of its exec processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum LifecycleEvent {
    /// Init process started with the given system pid.
    Start {
        /// Runtime-assigned process id.
        pid: u32,
    },
    /// Container reattached; init runs as the given system pid.
    Restore {
        /// Runtime-assigned process id.
        pid: u32,
    },
    /// Init process exited.
    Exit(ExitStatus),
    /// Exec process exited.
    ExitProcess {
        /// Exec session id.
        process_id: String,
        /// How it exited.
        status: ExitStatus,
    },
    /// Init exited; the runtime is restarting the container.
    Restart(ExitStatus),
    /// Out-of-memory notification.
    Oom,
    /// Container paused.
    Pause,
    /// Container resumed.
    Resume,
}

impl LifecycleEvent {
    /// The event's tag.
    #[must_use]
    pub const fn state(&self) -> State {
        match self {
            Self::Start { .. } => State::Start,
            Self::Restore { .. } => State::Restore,
            Self::Exit(_) => State::Exit,
            Self::ExitProcess { .. } => State::ExitProcess,
            Self::Restart(_) => State::Restart,
            Self::Oom => State::Oom,
            Self::Pause => State::Pause,
            Self::Resume => State::Resume,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_match_variants() {
        assert_eq!(LifecycleEvent::Start { pid: 4 }.state(), State::Start);
        assert_eq!(LifecycleEvent::Exit(ExitStatus::code(1)).state(), State::Exit);
        assert_eq!(
            LifecycleEvent::ExitProcess {
                process_id: "e1".into(),
                status: ExitStatus::code(0),
            }
            .state(),
            State::ExitProcess
        );
        assert_eq!(State::ExitProcess.to_string(), "exit-process");
    }

    #[test]
    fn serialized_with_state_tag() {
        let json = serde_json::to_value(LifecycleEvent::Start { pid: 42 }).unwrap();
        assert_eq!(json, serde_json::json!({"state": "start", "pid": 42}));

        let json = serde_json::to_value(LifecycleEvent::Oom).unwrap();
        assert_eq!(json, serde_json::json!({"state": "oom"}));
    }
}
