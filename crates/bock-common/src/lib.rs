//! # bock-common
//!
//! Shared utilities and types for the Bock container ecosystem.
//!
//! This crate provides common functionality used across all Bock crates:
//! - Exec session ID generation
//! - Standard filesystem paths
//! - Common error types

#![warn(missing_docs)]

pub mod error;
pub mod id;
pub mod paths;

pub use error::{BockError, BockResult};
pub use id::generate_id;
pub use paths::BockPaths;
