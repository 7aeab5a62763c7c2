//! # bockd
//!
//! Engine side of the runtime-lifecycle coordinator.
//!
//! The [`Daemon`] owns the container registry, persisted container state,
//! exec sessions, the event bus and log capture. It implements
//! [`bock_remote::Backend`]: a runtime client reports lifecycle events into
//! [`Daemon::state_changed`] and hands process pipes to
//! [`Daemon::attach_streams`].
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use bockd::{ContainerConfig, Daemon, DaemonConfig};
//! use bock_remote::LifecycleEvent;
//!
//! # async fn example() -> bock_common::BockResult<()> {
//! let daemon = Arc::new(Daemon::new(DaemonConfig::default()));
//! daemon.register_container("web", ContainerConfig::default())?;
//!
//! daemon.state_changed("web", LifecycleEvent::Start { pid: 4242 }).await?;
//! assert!(daemon.get_container("web")?.state().await.running);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod container;
pub mod daemon;
pub mod events;
pub mod exec;
pub mod logger;
pub mod monitor;
pub mod registry;
pub mod state;
pub mod stream;

pub use config::{DaemonConfig, LogDriver, Platform};
pub use container::{Container, ContainerConfig};
pub use daemon::Daemon;
pub use events::{ContainerEvent, EventAction, EventBus};
pub use exec::{ExecConfig, ExecStore};
pub use registry::ContainerRegistry;
pub use state::{ContainerState, StateStore};
pub use stream::{Broadcaster, SinkKind, StdStream, StreamConfig, StreamSink, WaitGroup, WriterSink};
