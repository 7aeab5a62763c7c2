//! Host Compute Service surface used by [`HcsClient`](super::HcsClient).

use std::time::Duration;

use async_trait::async_trait;
use bock_common::BockError;
use thiserror::Error;

use super::process::ProcessParams;
use crate::pipes::SpawnedProcess;

/// Win32 and COM error codes the compute service reports.
pub mod codes {
    /// `ERROR_FILE_NOT_FOUND`
    pub const ERROR_FILE_NOT_FOUND: u32 = 2;
    /// `ERROR_BAD_PATHNAME`
    pub const ERROR_BAD_PATHNAME: u32 = 161;
    /// `ERROR_NOT_FOUND`
    pub const ERROR_NOT_FOUND: u32 = 1168;
    /// `ERROR_NO_NETWORK`
    pub const ERROR_NO_NETWORK: u32 = 1222;
    /// `CO_E_CLASSSTRING`
    pub const CO_E_CLASSSTRING: u32 = 0x8004_01F3;
    /// `HRESULT_FROM_WIN32(ERROR_INVALID_OBJECT)`
    pub const ERROR_INVALID_OBJECT: u32 = 0x8007_10D8;
}

/// Codes that some platform builds return spuriously on create.
const TRANSIENT_CREATE_CODES: [u32; 6] = [
    codes::ERROR_NOT_FOUND,
    codes::ERROR_FILE_NOT_FOUND,
    codes::ERROR_NO_NETWORK,
    codes::ERROR_BAD_PATHNAME,
    codes::CO_E_CLASSSTRING,
    codes::ERROR_INVALID_OBJECT,
];

/// A failed compute service call.
#[derive(Debug, Clone, Error)]
#[error("{operation}: {message} (0x{code:08x})")]
pub struct HcsError {
    /// Service call that failed.
    pub operation: String,
    /// Platform error code.
    pub code: u32,
    /// Platform message.
    pub message: String,
}

impl HcsError {
    /// New error for `operation`.
    pub fn new(operation: impl Into<String>, code: u32, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            code,
            message: message.into(),
        }
    }

    /// Whether a create may be retried after this error.
    #[must_use]
    pub fn is_transient_create(&self) -> bool {
        TRANSIENT_CREATE_CODES.contains(&self.code)
    }
}

impl From<HcsError> for BockError {
    fn from(err: HcsError) -> Self {
        Self::Runtime {
            operation: err.operation,
            code: Some(err.code),
            message: err.message,
        }
    }
}

/// How long a terminate or shutdown may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Wait until the operation completes.
    Infinite,
    /// Give up after the duration.
    After(Duration),
}

/// Calls into the compute service.
///
/// The methods mirror the service's own operations one to one; retrying
/// and cleanup are the client's business.
#[async_trait]
pub trait ComputeSystemApi: Send + Sync {
    /// Whether this platform build spuriously fails creates with the codes
    /// in [`HcsError::is_transient_create`].
    fn requires_create_retry(&self) -> bool {
        false
    }

    /// Create compute system `id` from a JSON configuration document.
    async fn create_compute_system(&self, id: &str, configuration: &str) -> Result<(), HcsError>;

    /// Start a process inside compute system `id`.
    async fn create_process(&self, id: &str, params: &ProcessParams) -> Result<SpawnedProcess, HcsError>;

    /// Block until process `pid` exits and return its exit code.
    async fn wait_process(&self, id: &str, pid: u32) -> Result<u32, HcsError>;

    /// Terminate process `pid`.
    async fn terminate_process(&self, id: &str, pid: u32) -> Result<(), HcsError>;

    /// Forcibly stop compute system `id` and release it.
    async fn terminate_compute_system(&self, id: &str, timeout: Timeout, context: &str) -> Result<(), HcsError>;

    /// Ask compute system `id` to shut down cleanly.
    async fn shutdown_compute_system(&self, id: &str, timeout: Timeout, context: &str) -> Result<(), HcsError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_codes() {
        for code in TRANSIENT_CREATE_CODES {
            assert!(HcsError::new("create", code, "x").is_transient_create());
        }
        assert!(!HcsError::new("create", 5, "access denied").is_transient_create());
    }

    #[test]
    fn converts_to_runtime_error() {
        let err: BockError = HcsError::new("CreateComputeSystem", 0x8037_0100, "boom").into();
        assert!(matches!(
            err,
            BockError::Runtime { code: Some(0x8037_0100), .. }
        ));
        assert_eq!(err.to_string(), "CreateComputeSystem failed: boom");
    }
}
