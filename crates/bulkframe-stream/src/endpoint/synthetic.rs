use std::collections::VecDeque;
use std::thread;
use std::time::Duration;

use bytes::{BufMut, Bytes};
use tracing::debug;

use super::{BulkEndpoint, Completion, SubmitError, Transfer, TransferError};
use crate::format::DEFAULT_SIGNATURE;

/// Shape of the generated stream.
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    /// Signature written at the start of each frame's first chunk.
    pub signature: Bytes,
    /// Chunk size in bytes; must match the session's chunk size.
    pub chunk_size: usize,
    /// Chunks per frame, header chunk included.
    pub frame_chunks: usize,
    /// Filler chunks emitted between frames.
    pub gap_chunks: usize,
    /// Cut every n-th frame short (after its first half), if set.
    pub truncate_every: Option<u64>,
    /// Stop producing after this many frames; later transfers report
    /// [`TransferError::Disconnected`].
    pub frame_limit: Option<u64>,
    /// Fail every transfer with [`TransferError::Stall`] after this many
    /// successful ones.
    pub fail_after: Option<u64>,
    /// Delay before each completion is handed back.
    pub pace: Option<Duration>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            signature: Bytes::from_static(DEFAULT_SIGNATURE),
            chunk_size: 1024,
            frame_chunks: 4,
            gap_chunks: 0,
            truncate_every: None,
            frame_limit: None,
            fail_after: None,
            pace: None,
        }
    }
}

/// Deterministic in-process data source.
///
/// Frames look like `signature | sequence (u64 LE) | zero padding` in the
/// first chunk followed by data chunks filled with the low byte of the
/// sequence number. Transfers are filled when they are reaped, so a slot is
/// only rewritten once every other queued transfer has completed.
pub struct SyntheticEndpoint {
    config: SyntheticConfig,
    queued: VecDeque<Transfer>,
    cancelled: bool,
    transfers_done: u64,
    frame: u64,
    chunk_in_frame: usize,
    gap_remaining: usize,
}

impl SyntheticEndpoint {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            queued: VecDeque::new(),
            cancelled: false,
            transfers_done: 0,
            frame: 0,
            chunk_in_frame: 0,
            gap_remaining: 0,
        }
    }

    /// Sequence number of the next frame to be generated.
    pub fn frames_generated(&self) -> u64 {
        self.frame
    }

    fn exhausted(&self) -> bool {
        self.config
            .frame_limit
            .is_some_and(|limit| self.frame >= limit)
    }

    fn frame_len(&self, frame: u64) -> usize {
        match self.config.truncate_every {
            Some(n) if n > 0 && frame % n == n - 1 => (self.config.frame_chunks / 2).max(1),
            _ => self.config.frame_chunks,
        }
    }

    /// Fill one chunk; returns false once the frame limit is reached.
    fn next_chunk(&mut self, chunk: &mut [u8]) -> bool {
        if self.gap_remaining > 0 {
            self.gap_remaining -= 1;
            chunk.fill(0);
            return true;
        }
        if self.exhausted() {
            return false;
        }

        if self.chunk_in_frame == 0 {
            chunk.fill(0);
            let mut header = &mut chunk[..];
            let signature = &self.config.signature;
            if header.remaining_mut() >= signature.len() + 8 {
                header.put_slice(signature);
                header.put_u64_le(self.frame);
            } else {
                let len = signature.len().min(header.remaining_mut());
                header.put_slice(&signature[..len]);
            }
        } else {
            chunk.fill(self.frame as u8);
        }

        self.chunk_in_frame += 1;
        if self.chunk_in_frame >= self.frame_len(self.frame) {
            self.chunk_in_frame = 0;
            self.frame += 1;
            self.gap_remaining = self.config.gap_chunks;
        }
        true
    }

    fn complete(&mut self, mut transfer: Transfer) -> Completion {
        if self.cancelled {
            return Completion::failed(transfer, TransferError::Cancelled);
        }
        if self
            .config
            .fail_after
            .is_some_and(|limit| self.transfers_done >= limit)
        {
            return Completion::failed(transfer, TransferError::Stall);
        }

        let chunk_size = self.config.chunk_size.max(1);
        let mut filled = 0usize;
        {
            let slot = transfer.slot_mut().as_mut_slice();
            for chunk in slot.chunks_exact_mut(chunk_size) {
                if !self.next_chunk(chunk) {
                    break;
                }
                filled += chunk_size;
            }
        }

        if filled == 0 {
            return Completion::failed(transfer, TransferError::Disconnected);
        }
        self.transfers_done += 1;
        Completion::ok(transfer, filled)
    }
}

impl BulkEndpoint for SyntheticEndpoint {
    fn prepare(&mut self) -> Result<(), TransferError> {
        self.cancelled = false;
        Ok(())
    }

    fn submit(&mut self, transfer: Transfer) -> Result<(), SubmitError> {
        self.queued.push_back(transfer);
        Ok(())
    }

    fn wait_completion(&mut self, timeout: Duration) -> Option<Completion> {
        let Some(transfer) = self.queued.pop_front() else {
            thread::sleep(timeout);
            return None;
        };
        if let Some(pace) = self.config.pace {
            if !self.cancelled {
                thread::sleep(pace.min(timeout));
            }
        }
        Some(self.complete(transfer))
    }

    fn cancel_all(&mut self) {
        debug!(queued = self.queued.len(), "synthetic endpoint cancelling");
        self.cancelled = true;
    }
}

#[cfg(test)]
mod tests {
    use bulkframe_buffer::SharedFrameBuffer;

    use super::*;

    fn config(frame_chunks: usize) -> SyntheticConfig {
        SyntheticConfig {
            chunk_size: 64,
            frame_chunks,
            ..SyntheticConfig::default()
        }
    }

    #[test]
    fn generates_signature_then_data_chunks() {
        let buffer = SharedFrameBuffer::allocate(4096).unwrap();
        let slot = buffer.lease_slots(64 * 6, 1).unwrap().remove(0);
        let mut endpoint = SyntheticEndpoint::new(config(3));

        endpoint.submit(Transfer::new(0, slot)).unwrap();
        let completion = endpoint.wait_completion(Duration::ZERO).unwrap();
        assert_eq!(completion.status, Ok(64 * 6));

        let data = completion.transfer.slot().as_slice();
        assert!(data[..64].starts_with(b"ALEXP"));
        assert_eq!(&data[5..13], &0u64.to_le_bytes());
        assert!(data[64..192].iter().all(|b| *b == 0));
        assert!(data[192..].starts_with(b"ALEXP"));
        assert_eq!(&data[197..205], &1u64.to_le_bytes());
        assert!(data[256..].iter().all(|b| *b == 1));
        assert_eq!(endpoint.frames_generated(), 2);
    }

    #[test]
    fn frame_limit_ends_with_partial_then_disconnect() {
        let buffer = SharedFrameBuffer::allocate(4096).unwrap();
        let mut slots = buffer.lease_slots(64 * 4, 2).unwrap().into_iter();
        let mut endpoint = SyntheticEndpoint::new(SyntheticConfig {
            frame_limit: Some(1),
            ..config(3)
        });

        endpoint.submit(Transfer::new(0, slots.next().unwrap())).unwrap();
        endpoint.submit(Transfer::new(1, slots.next().unwrap())).unwrap();

        assert_eq!(
            endpoint.wait_completion(Duration::ZERO).unwrap().status,
            Ok(64 * 3)
        );
        assert_eq!(
            endpoint.wait_completion(Duration::ZERO).unwrap().status,
            Err(TransferError::Disconnected)
        );
    }

    #[test]
    fn truncation_shortens_selected_frames() {
        let buffer = SharedFrameBuffer::allocate(4096).unwrap();
        let slot = buffer.lease_slots(64 * 6, 1).unwrap().remove(0);
        let mut endpoint = SyntheticEndpoint::new(SyntheticConfig {
            truncate_every: Some(1),
            ..config(4)
        });

        endpoint.submit(Transfer::new(0, slot)).unwrap();
        let completion = endpoint.wait_completion(Duration::ZERO).unwrap();
        let data = completion.transfer.slot().as_slice();
        // Every frame is cut to two chunks.
        assert!(data[..].starts_with(b"ALEXP"));
        assert!(data[128..].starts_with(b"ALEXP"));
        assert!(data[256..].starts_with(b"ALEXP"));
    }

    #[test]
    fn fail_after_stalls_subsequent_transfers() {
        let buffer = SharedFrameBuffer::allocate(4096).unwrap();
        let mut slots = buffer.lease_slots(64, 2).unwrap().into_iter();
        let mut endpoint = SyntheticEndpoint::new(SyntheticConfig {
            fail_after: Some(1),
            ..config(2)
        });

        endpoint.submit(Transfer::new(0, slots.next().unwrap())).unwrap();
        endpoint.submit(Transfer::new(1, slots.next().unwrap())).unwrap();
        assert!(endpoint.wait_completion(Duration::ZERO).unwrap().status.is_ok());
        assert_eq!(
            endpoint.wait_completion(Duration::ZERO).unwrap().status,
            Err(TransferError::Stall)
        );
    }

    #[test]
    fn cancelled_transfers_are_returned() {
        let buffer = SharedFrameBuffer::allocate(4096).unwrap();
        let slot = buffer.lease_slots(64, 1).unwrap().remove(0);
        let mut endpoint = SyntheticEndpoint::new(config(2));

        endpoint.submit(Transfer::new(0, slot)).unwrap();
        endpoint.cancel_all();
        assert_eq!(
            endpoint.wait_completion(Duration::ZERO).unwrap().status,
            Err(TransferError::Cancelled)
        );
        assert!(endpoint.wait_completion(Duration::ZERO).is_none());
    }
}
