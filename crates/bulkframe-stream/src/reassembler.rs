use std::sync::Arc;

use tracing::{trace, warn};

use crate::format::FrameFormat;
use crate::queue::CompletionQueue;
use crate::stats::StreamStats;

/// Position of the frame currently being accumulated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanCursor {
    /// Buffer offset of the signature chunk that opened the frame.
    pub current_frame_start: Option<usize>,
    /// Bytes of the frame seen so far, header chunk included.
    pub bytes_accumulated: usize,
}

/// What a single chunk did to the scan state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// No frame in progress and no signature: the chunk was skipped.
    Ignored,
    /// A signature opened a new frame. `truncated` carries the byte count of
    /// a previous frame that was abandoned before completing.
    FrameStarted {
        offset: usize,
        truncated: Option<usize>,
    },
    /// The frame in progress grew to `bytes_accumulated`.
    Accumulated { bytes_accumulated: usize },
    /// The frame starting at `offset` is complete and was published.
    /// `evicted` is set when publishing pushed an older offset out of the queue.
    FrameCompleted { offset: usize, evicted: bool },
}

/// Stateful signature scanner over fixed-size chunks.
///
/// Lives in the completion context and is only ever driven from there; the
/// only thing it shares is the [`CompletionQueue`] it publishes into.
pub struct FrameReassembler {
    format: FrameFormat,
    chunk_size: usize,
    frame_total_size: usize,
    cursor: ScanCursor,
    queue: Arc<CompletionQueue>,
    stats: Arc<StreamStats>,
}

impl FrameReassembler {
    pub fn new(
        format: FrameFormat,
        chunk_size: usize,
        frame_total_size: usize,
        queue: Arc<CompletionQueue>,
        stats: Arc<StreamStats>,
    ) -> Self {
        Self {
            format,
            chunk_size,
            frame_total_size,
            cursor: ScanCursor::default(),
            queue,
            stats,
        }
    }

    /// Scan one chunk located at `offset` in the frame buffer.
    ///
    /// Chunks must be fed in stream order.
    pub fn on_chunk(&mut self, chunk: &[u8], offset: usize) -> ChunkOutcome {
        self.stats.record_chunk();

        if self.format.is_frame_start(chunk) {
            let truncated = self
                .cursor
                .current_frame_start
                .map(|_| self.cursor.bytes_accumulated);
            if let Some(accumulated) = truncated {
                self.stats.record_truncated();
                warn!(
                    offset,
                    accumulated,
                    expected = self.frame_total_size,
                    "frame signature arrived before previous frame completed"
                );
            }

            self.cursor.current_frame_start = Some(offset);
            self.cursor.bytes_accumulated = 0;
            // The signature chunk carries the header, which is part of the total.
            return match self.advance() {
                Some(outcome) => outcome,
                None => ChunkOutcome::FrameStarted { offset, truncated },
            };
        }

        if self.cursor.current_frame_start.is_none() {
            return ChunkOutcome::Ignored;
        }

        self.advance().unwrap_or(ChunkOutcome::Accumulated {
            bytes_accumulated: self.cursor.bytes_accumulated,
        })
    }

    /// Current scan position.
    pub fn cursor(&self) -> ScanCursor {
        self.cursor
    }

    /// Forget any frame in progress.
    pub fn reset(&mut self) {
        self.cursor = ScanCursor::default();
    }

    fn advance(&mut self) -> Option<ChunkOutcome> {
        self.cursor.bytes_accumulated += self.chunk_size;
        if self.cursor.bytes_accumulated < self.frame_total_size {
            return None;
        }

        let offset = self.cursor.current_frame_start.take()?;
        let evicted = !self.queue.push(offset);
        self.stats.record_frame(evicted);
        if evicted {
            warn!(offset, "completion queue full; oldest frame dropped");
        } else {
            trace!(offset, bytes = self.cursor.bytes_accumulated, "frame complete");
        }
        Some(ChunkOutcome::FrameCompleted { offset, evicted })
    }
}
