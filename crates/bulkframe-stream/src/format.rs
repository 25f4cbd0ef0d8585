use bytes::Bytes;

use crate::error::{Result, StreamError};

/// Signature that opens every frame header.
pub const DEFAULT_SIGNATURE: &[u8] = b"ALEXP";

/// Size of the frame header carried by the first chunk of a frame.
pub const DEFAULT_HEADER_SIZE: usize = 1024;

/// Fixed wire contract between the data source and the consumer.
///
/// Both sides must agree on the signature and header size; they are not
/// negotiated per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameFormat {
    signature: Bytes,
    header_size: usize,
}

impl FrameFormat {
    /// Create a frame format. The signature must be non-empty and fit the header.
    pub fn new(signature: impl Into<Bytes>, header_size: usize) -> Result<Self> {
        let signature = signature.into();
        if signature.is_empty() {
            return Err(StreamError::InvalidParameters(
                "frame signature must not be empty".to_string(),
            ));
        }
        if signature.len() > header_size {
            return Err(StreamError::InvalidParameters(format!(
                "signature ({} bytes) does not fit the {header_size} byte header",
                signature.len()
            )));
        }
        Ok(Self {
            signature,
            header_size,
        })
    }

    /// The frame-start signature.
    pub fn signature(&self) -> &Bytes {
        &self.signature
    }

    /// Header size in bytes.
    pub fn header_size(&self) -> usize {
        self.header_size
    }

    /// Whether `chunk` opens a new frame.
    pub fn is_frame_start(&self, chunk: &[u8]) -> bool {
        chunk.starts_with(&self.signature)
    }
}

impl Default for FrameFormat {
    fn default() -> Self {
        Self {
            signature: Bytes::from_static(DEFAULT_SIGNATURE),
            header_size: DEFAULT_HEADER_SIZE,
        }
    }
}
