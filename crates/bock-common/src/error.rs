//! Common error types for the Bock ecosystem.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`BockError`].
pub type BockResult<T> = Result<T, BockError>;

/// Common errors across the Bock ecosystem.
#[derive(Error, Diagnostic, Debug)]
pub enum BockError {
    /// Container not found.
    #[error("no such container: {id}")]
    #[diagnostic(code(bock::container::not_found))]
    ContainerNotFound {
        /// The container ID that was not found.
        id: String,
    },

    /// Exec session not found.
    #[error("no such exec/container: {id}")]
    #[diagnostic(code(bock::exec::not_found))]
    ExecNotFound {
        /// The exec or container ID that was not found.
        id: String,
    },

    /// A port binding cannot be expressed by the runtime's NAT model.
    #[error("Invalid port binding: {message}")]
    #[diagnostic(
        code(bock::network::invalid_port_binding),
        help("Use one host port per container port, no host IP, protocol tcp or udp")
    )]
    InvalidPortBinding {
        /// What was wrong with the binding.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(bock::io))]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(bock::serialization))]
    Serialization(String),

    /// The low-level runtime rejected an operation.
    #[error("{operation} failed: {message}")]
    #[diagnostic(code(bock::runtime))]
    Runtime {
        /// Runtime operation that failed.
        operation: String,
        /// Platform error code, when the runtime reports one.
        code: Option<u32>,
        /// The error message.
        message: String,
    },

    /// Container creation kept failing with a retry-safe error.
    #[error("container creation failed after {attempts} attempts: {message}")]
    #[diagnostic(
        code(bock::runtime::transient_creation),
        help("The runtime reported a known intermittent failure on every attempt")
    )]
    TransientCreation {
        /// Number of attempts made.
        attempts: u32,
        /// Platform error code of the last failure.
        code: u32,
        /// Message of the last failure.
        message: String,
    },

    /// The runtime reported something this platform can never produce.
    #[error("Platform invariant violated: {message}")]
    #[diagnostic(
        code(bock::platform_invariant),
        help("This is a bug in the runtime integration, please report it")
    )]
    PlatformInvariant {
        /// The error message.
        message: String,
    },

    /// Feature not supported on this platform.
    #[error("Feature not supported: {feature}")]
    #[diagnostic(
        code(bock::unsupported),
        help("The runtime backend in use does not implement this operation")
    )]
    Unsupported {
        /// The unsupported feature.
        feature: String,
    },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(bock::config))]
    Config {
        /// The error message.
        message: String,
    },

    /// Internal error (should not happen).
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(bock::internal),
        help("This is a bug, please report it at https://github.com/bock-containers/bock/issues")
    )]
    Internal {
        /// The error message.
        message: String,
    },
}

impl BockError {
    /// Shorthand for [`BockError::Unsupported`].
    pub fn unsupported(feature: impl Into<String>) -> Self {
        Self::Unsupported {
            feature: feature.into(),
        }
    }

    /// Returns true if the error means the target does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::ContainerNotFound { .. } | Self::ExecNotFound { .. })
    }
}

impl From<serde_json::Error> for BockError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
