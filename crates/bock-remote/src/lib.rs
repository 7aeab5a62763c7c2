//! # bock-remote
//!
//! Client for the low-level container runtime.
//!
//! The engine drives containers through the [`RuntimeClient`] trait and
//! receives lifecycle events and process I/O back through the [`Backend`]
//! trait it implements. Two clients are provided:
//!
//! - [`HcsClient`]: compute systems managed by the Host Compute Service
//! - [`TaskClient`]: tasks managed by a Linux task service
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use bock_remote::{HcsClient, RuntimeClient};
//!
//! let client = HcsClient::new(backend, Arc::new(service));
//! client.create("web", &spec, &[]).await?;
//! client.signal("web", bock_remote::SIGKILL).await?;
//! ```

#![warn(missing_docs)]

pub mod backend;
pub mod client;
pub mod container;
pub mod event;
pub mod hcs;
pub mod pipes;
pub mod task;

pub use backend::Backend;
pub use client::{ClientCommon, CreateOption, RuntimeClient, SIGKILL, Stats, WithLabels};
pub use container::{ContainerHandle, INIT_PROCESS};
pub use event::{ExitStatus, LifecycleEvent, State};
pub use hcs::HcsClient;
pub use pipes::{IoPipe, PipeReader, PipeWriter, SpawnedProcess};
pub use task::TaskClient;
