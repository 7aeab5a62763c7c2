//! # bock-oci
//!
//! Container specification types for Bock.
//!
//! This crate provides the engine-neutral description of a container that
//! the runtime client translates into a backend's native configuration.

#![warn(missing_docs)]

pub mod runtime;

pub use runtime::{Mount, Process, Resources, Spec};
