use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StreamError};
use crate::format::FrameFormat;

/// Per-session streaming parameters, supplied by the consumer at start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamParameters {
    /// Atomic scan unit in bytes.
    pub chunk_size: usize,
    /// Chunks delivered by one transfer operation.
    pub chunks_per_operation: usize,
    /// Number of operations kept in flight.
    pub operation_count: usize,
    /// Frame payload size in bytes (excluding the header).
    pub frame_data_size: usize,
    /// Header plus payload size in bytes.
    pub frame_total_size: usize,
}

impl StreamParameters {
    /// Build parameters whose total frame size is derived from `format`.
    pub fn for_format(
        format: &FrameFormat,
        chunk_size: usize,
        chunks_per_operation: usize,
        operation_count: usize,
        frame_data_size: usize,
    ) -> Self {
        Self {
            chunk_size,
            chunks_per_operation,
            operation_count,
            frame_data_size,
            frame_total_size: frame_data_size.saturating_add(format.header_size()),
        }
    }

    /// Bytes transferred by one operation (the slot size).
    pub fn operation_bytes(&self) -> Option<usize> {
        self.chunk_size.checked_mul(self.chunks_per_operation)
    }

    /// Bytes covered by all operations together.
    pub fn footprint(&self) -> Option<usize> {
        self.operation_bytes()?.checked_mul(self.operation_count)
    }

    /// Number of chunks a complete frame spans, header chunk included.
    pub fn chunks_per_frame(&self) -> usize {
        if self.chunk_size == 0 {
            return 0;
        }
        self.frame_total_size.div_ceil(self.chunk_size)
    }

    /// Buffer ranges holding the frame that starts at `offset`, in order.
    ///
    /// Slots are recycled back to back, so a frame that starts near the end
    /// of the footprint continues at offset 0 and the second range is
    /// non-empty.
    pub fn frame_ranges(&self, offset: usize) -> [Range<usize>; 2] {
        let footprint = self.footprint().unwrap_or(0);
        let end = offset.saturating_add(self.frame_total_size);
        if footprint == 0 || end <= footprint {
            [offset..end, 0..0]
        } else {
            [offset..footprint, 0..end - footprint]
        }
    }

    /// Check the parameters against the frame format and buffer capacity.
    pub fn validate(&self, format: &FrameFormat, capacity: usize) -> Result<()> {
        let fields = [
            ("chunk_size", self.chunk_size),
            ("chunks_per_operation", self.chunks_per_operation),
            ("operation_count", self.operation_count),
            ("frame_data_size", self.frame_data_size),
            ("frame_total_size", self.frame_total_size),
        ];
        if let Some((name, _)) = fields.iter().find(|(_, value)| *value == 0) {
            return Err(invalid(format!("{name} must be non-zero")));
        }

        let expected_total = self.frame_data_size.checked_add(format.header_size());
        if expected_total != Some(self.frame_total_size) {
            return Err(invalid(format!(
                "frame_total_size {} must equal frame_data_size {} plus header size {}",
                self.frame_total_size,
                self.frame_data_size,
                format.header_size()
            )));
        }

        if format.header_size() > self.chunk_size {
            return Err(invalid(format!(
                "header size {} does not fit in a {} byte chunk",
                format.header_size(),
                self.chunk_size
            )));
        }

        let footprint = self
            .footprint()
            .ok_or_else(|| invalid("operation footprint overflows".to_string()))?;
        if footprint > capacity {
            return Err(invalid(format!(
                "operation footprint {footprint} exceeds frame buffer capacity {capacity}"
            )));
        }

        if self.frame_total_size > footprint {
            return Err(invalid(format!(
                "frame of {} bytes does not fit the {footprint} byte operation footprint",
                self.frame_total_size
            )));
        }

        Ok(())
    }
}

fn invalid(message: String) -> StreamError {
    StreamError::InvalidParameters(message)
}
