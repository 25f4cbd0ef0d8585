use bulkframe_buffer::page_align;
use bulkframe_stream::{FrameFormat, StreamParameters, DEFAULT_HEADER_SIZE};
use serde::{Deserialize, Serialize};

use crate::error::{DeviceError, Result};

/// Largest frame payload of the default profile (752 x 480, 8 bit).
pub const DEFAULT_MAX_FRAME_DATA_SIZE: usize = 752 * 480;

/// Frames the default buffer is sized for.
pub const DEFAULT_MAX_FRAME_COUNT: usize = 3;

/// Static description of a device model, fixed at attach time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceProfile {
    /// In-band marker at the start of each frame's first chunk.
    pub signature: String,
    /// Header bytes preceding each frame payload.
    pub header_size: usize,
    /// Largest payload a frame may carry.
    pub max_frame_data_size: usize,
    /// Number of worst-case frames the buffer must hold.
    pub max_frame_count: usize,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            signature: "ALEXP".to_string(),
            header_size: DEFAULT_HEADER_SIZE,
            max_frame_data_size: DEFAULT_MAX_FRAME_DATA_SIZE,
            max_frame_count: DEFAULT_MAX_FRAME_COUNT,
        }
    }
}

impl DeviceProfile {
    /// Frame format described by this profile.
    pub fn frame_format(&self) -> Result<FrameFormat> {
        FrameFormat::new(self.signature.clone().into_bytes(), self.header_size)
            .map_err(|err| DeviceError::InvalidProfile(err.to_string()))
    }

    /// Size of the shared frame buffer:
    /// `page_align(max_frame_count * (header_size + 2 * max_frame_data_size))`.
    ///
    /// Each frame gets room for twice its payload so that an interleaved
    /// stereo payload still fits.
    pub fn frame_buffer_size(&self) -> Result<usize> {
        self.max_frame_data_size
            .checked_mul(2)
            .and_then(|data| data.checked_add(self.header_size))
            .and_then(|frame| frame.checked_mul(self.max_frame_count))
            .filter(|size| *size > 0)
            .and_then(page_align)
            .ok_or_else(|| {
                DeviceError::InvalidProfile(format!(
                    "buffer size for {} frames of {} bytes is not representable",
                    self.max_frame_count, self.max_frame_data_size
                ))
            })
    }

    /// Streaming parameters using one header-sized chunk as scan unit.
    pub fn stream_parameters(
        &self,
        frame_data_size: usize,
        chunks_per_operation: usize,
        operation_count: usize,
    ) -> Result<StreamParameters> {
        let format = self.frame_format()?;
        Ok(StreamParameters::for_format(
            &format,
            self.header_size,
            chunks_per_operation,
            operation_count,
            frame_data_size,
        ))
    }
}
