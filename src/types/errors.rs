//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context. Variants mirror the error taxonomy: each
//! represents one class of failure a caller can act on distinctly.

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the kernel orchestrator.
#[derive(Error, Debug)]
pub enum Error {
    /// The requested operation is not permitted by policy (e.g. a
    /// (mode, language) combination outside `allowed_kernel_types`).
    #[error("policy error: {0}")]
    PolicyError(String),

    /// No kernel exists under the given ID (within the caller's namespace).
    #[error("not found: {0}")]
    NotFound(String),

    /// The kernel exists but has not completed initialization.
    #[error("not initialized: {0}")]
    NotInitialized(String),

    /// Kernel creation failed (driver spawn failure, bad startup script, etc).
    #[error("init failed: {0}")]
    InitFailed(String),

    /// The submitted code raised an error inside the sandbox.
    #[error("execution error: {0}")]
    ExecutionError(String),

    /// The driver process panicked or crashed while executing.
    #[error("driver panic: {0}")]
    DriverPanic(String),

    /// The driver process is gone and cannot be reached.
    #[error("driver gone: {0}")]
    DriverGone(String),

    /// Advisory: an execution exceeded `max_execution_time_ms` and was
    /// flagged as stalled. Not itself fatal; surfaced via an
    /// `execution_stalled` event, not necessarily this error.
    #[error("execution stalled: {0}")]
    ExecutionStalled(String),

    /// The kernel or execution was forcibly terminated by the caller.
    #[error("forced termination: {0}")]
    ForcedTermination(String),

    /// Advisory: a streaming consumer fell behind and events were dropped.
    #[error("backpressure: {0}")]
    Backpressure(String),

    /// Operation cancelled.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// Timeout.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Internal errors not classified above.
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// msgpack encode/decode errors from the IPC wire codec.
    #[error("msgpack error: {0}")]
    MsgPack(String),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Convert to a stable string code for the IPC error envelope.
    ///
    /// Kept separate from the transport so `kernel::*` modules never need to
    /// know about IPC wire concerns.
    pub fn to_ipc_error_code(&self) -> &'static str {
        match self {
            Error::PolicyError(_) => "POLICY_ERROR",
            Error::NotFound(_) => "NOT_FOUND",
            Error::NotInitialized(_) => "NOT_INITIALIZED",
            Error::InitFailed(_) => "INIT_FAILED",
            Error::ExecutionError(_) => "EXECUTION_ERROR",
            Error::DriverPanic(_) => "DRIVER_PANIC",
            Error::DriverGone(_) => "DRIVER_GONE",
            Error::ExecutionStalled(_) => "EXECUTION_STALLED",
            Error::ForcedTermination(_) => "FORCED_TERMINATION",
            Error::Backpressure(_) => "BACKPRESSURE",
            Error::Cancelled(_) => "CANCELLED",
            Error::Timeout(_) => "TIMEOUT",
            Error::Internal(_) => "INTERNAL",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::MsgPack(_) => "SERIALIZATION_ERROR",
            Error::Io(_) => "IO_ERROR",
        }
    }

    /// Whether this error class is advisory (surfaced for visibility, not
    /// necessarily aborting the operation it describes).
    pub fn is_advisory(&self) -> bool {
        matches!(self, Error::ExecutionStalled(_) | Error::Backpressure(_))
    }
}

// Convenience constructors
impl Error {
    pub fn policy_error(msg: impl Into<String>) -> Self {
        Self::PolicyError(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn not_initialized(msg: impl Into<String>) -> Self {
        Self::NotInitialized(msg.into())
    }

    pub fn init_failed(msg: impl Into<String>) -> Self {
        Self::InitFailed(msg.into())
    }

    pub fn execution_error(msg: impl Into<String>) -> Self {
        Self::ExecutionError(msg.into())
    }

    pub fn driver_panic(msg: impl Into<String>) -> Self {
        Self::DriverPanic(msg.into())
    }

    pub fn driver_gone(msg: impl Into<String>) -> Self {
        Self::DriverGone(msg.into())
    }

    pub fn forced_termination(msg: impl Into<String>) -> Self {
        Self::ForcedTermination(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advisory_errors_are_marked() {
        assert!(Error::ExecutionStalled("x".into()).is_advisory());
        assert!(Error::Backpressure("x".into()).is_advisory());
        assert!(!Error::NotFound("x".into()).is_advisory());
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(Error::NotFound("x".into()).to_ipc_error_code(), "NOT_FOUND");
        assert_eq!(
            Error::DriverGone("x".into()).to_ipc_error_code(),
            "DRIVER_GONE"
        );
    }
}
