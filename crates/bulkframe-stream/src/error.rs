use std::fmt;

use bulkframe_buffer::BufferError;

use crate::endpoint::TransferError;

/// Errors that can occur while streaming.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Stream parameters were rejected; no state was changed.
    #[error("invalid stream parameters: {0}")]
    InvalidParameters(String),

    /// The shared frame buffer refused the request.
    #[error("frame buffer error: {0}")]
    Buffer(#[from] BufferError),

    /// The endpoint could not be prepared for a new session.
    #[error("endpoint preparation failed: {0}")]
    Prepare(TransferError),

    /// A transfer operation could not be armed.
    #[error("transfer operation {operation} failed: {source}")]
    OperationFailure {
        operation: usize,
        source: TransferError,
    },

    /// Every operation of the session failed.
    #[error("streaming session failed: {0}")]
    SessionFailure(SessionFailure),

    /// The endpoint was lost by an earlier session and cannot be reused.
    #[error("bulk endpoint unavailable")]
    EndpointUnavailable,

    /// The completion thread could not be started.
    #[error("failed to spawn transfer pump: {0}")]
    Spawn(std::io::Error),

    /// The completion thread panicked.
    #[error("transfer pump panicked")]
    PumpPanicked,
}

pub type Result<T> = std::result::Result<T, StreamError>;

/// Why a streaming session ended on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFailure {
    /// Number of operations retired because they failed.
    pub failed_operations: usize,
    /// The error reported by the last failing operation.
    pub last_error: TransferError,
}

impl fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "all {} transfer operation(s) failed, last error: {}",
            self.failed_operations, self.last_error
        )
    }
}
