use std::time::Duration;

use bulkframe_buffer::BufferError;
use bulkframe_stream::StreamError;

use crate::control::ControlError;

/// Errors returned by the device control surface.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// Streaming engine error.
    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    /// Frame buffer error.
    #[error("buffer error: {0}")]
    Buffer(#[from] BufferError),

    /// The device profile is unusable.
    #[error("invalid device profile: {0}")]
    InvalidProfile(String),

    /// No completed frame arrived in time.
    #[error("no frame within {0:?}")]
    Timeout(Duration),

    /// A length exceeded what the device allows.
    #[error("{what} of {requested} bytes exceeds limit of {limit} bytes")]
    SizeExceeded {
        what: &'static str,
        requested: usize,
        limit: usize,
    },

    /// Vendor control transfer failed.
    #[error("control transfer failed: {0}")]
    Control(#[from] ControlError),
}

pub type Result<T> = std::result::Result<T, DeviceError>;
