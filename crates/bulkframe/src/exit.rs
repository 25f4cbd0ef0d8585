use std::fmt;
use std::io;

use bulkframe_buffer::BufferError;
use bulkframe_device::DeviceError;
use bulkframe_stream::StreamError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const STREAM_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound => USAGE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn buffer_error(context: &str, err: BufferError) -> CliError {
    match err {
        BufferError::Allocation { source, .. } | BufferError::Map(source) => {
            io_error(context, source)
        }
        BufferError::SizeExceeded { .. } | BufferError::OutOfBounds { .. } => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        BufferError::InUse { .. } => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn stream_error(context: &str, err: StreamError) -> CliError {
    match err {
        StreamError::InvalidParameters(_) => CliError::new(USAGE, format!("{context}: {err}")),
        StreamError::Buffer(err) => buffer_error(context, err),
        StreamError::Spawn(source) => io_error(context, source),
        StreamError::Prepare(_)
        | StreamError::OperationFailure { .. }
        | StreamError::SessionFailure(_) => {
            CliError::new(STREAM_ERROR, format!("{context}: {err}"))
        }
        StreamError::EndpointUnavailable => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn device_error(context: &str, err: DeviceError) -> CliError {
    match err {
        DeviceError::Stream(err) => stream_error(context, err),
        DeviceError::Buffer(err) => buffer_error(context, err),
        DeviceError::InvalidProfile(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        DeviceError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        DeviceError::SizeExceeded { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        DeviceError::Control(_) => CliError::new(STREAM_ERROR, format!("{context}: {err}")),
    }
}
