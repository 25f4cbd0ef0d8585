use std::fs::File;

use memmap2::{Mmap, MmapOptions};
use tracing::debug;

use crate::error::{BufferError, Result};

/// Read-only consumer view of a frame buffer.
///
/// The mapping aliases the producer's pages: bytes of a slot that is being
/// refilled change underneath it. A frame read through [`FrameMapping::frame`]
/// is stable from the moment its offset is popped until the slots holding it
/// are re-armed, which happens once the stream has cycled through every other
/// slot. Consumers that keep frame bytes longer than that copy them out with
/// [`FrameMapping::copy_frame`].
pub struct FrameMapping {
    map: Mmap,
}

impl FrameMapping {
    pub(crate) fn new(file: &File, len: usize) -> Result<Self> {
        if len == 0 {
            return Err(BufferError::InvalidLayout(
                "mapping length must be non-zero".to_string(),
            ));
        }
        // SAFETY: `file` is the buffer's memory object, at least `len` bytes
        // long (the caller checked against the allocation) and never
        // truncated while mapped.
        let map = unsafe { MmapOptions::new().len(len).map(file) }.map_err(BufferError::Map)?;
        debug!(len, "frame buffer mapped for reading");
        Ok(Self { map })
    }

    /// Mapped length in bytes.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True if nothing is mapped (never the case for a live mapping).
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// The whole mapped region. Slots being refilled change under this view.
    pub fn as_slice(&self) -> &[u8] {
        &self.map
    }

    /// Bounds-checked view of `len` bytes starting at `offset`.
    ///
    /// Only stable until the slots covering the range are re-armed.
    pub fn frame(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let capacity = self.map.len();
        offset
            .checked_add(len)
            .filter(|end| *end <= capacity)
            .map(|end| &self.map[offset..end])
            .ok_or(BufferError::OutOfBounds {
                offset,
                len,
                capacity,
            })
    }

    /// Copy `len` bytes starting at `offset` into `out`, replacing its
    /// contents. The copy stays valid after the slots are recycled.
    pub fn copy_frame(&self, offset: usize, len: usize, out: &mut Vec<u8>) -> Result<()> {
        let frame = self.frame(offset, len)?;
        out.clear();
        out.extend_from_slice(frame);
        Ok(())
    }
}

impl std::fmt::Debug for FrameMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameMapping").field("len", &self.map.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::region::SharedFrameBuffer;
    use crate::BufferError;

    #[test]
    fn frame_view_is_bounds_checked() {
        let buffer = SharedFrameBuffer::allocate(4096).unwrap();
        let mapping = buffer.map(4096).unwrap();

        assert_eq!(mapping.frame(4000, 96).unwrap().len(), 96);
        assert!(matches!(
            mapping.frame(4000, 97),
            Err(BufferError::OutOfBounds { offset: 4000, len: 97, capacity: 4096 })
        ));
        assert!(matches!(
            mapping.frame(usize::MAX, 2),
            Err(BufferError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn partial_mapping_exposes_requested_length() {
        let buffer = SharedFrameBuffer::allocate(8192).unwrap();
        let mapping = buffer.map(100).unwrap();
        assert_eq!(mapping.len(), 100);
        assert_eq!(mapping.as_slice().len(), 100);
        assert!(mapping.frame(0, 101).is_err());
    }

    #[test]
    fn empty_mapping_is_rejected() {
        let buffer = SharedFrameBuffer::allocate(4096).unwrap();
        assert!(matches!(buffer.map(0), Err(BufferError::InvalidLayout(_))));
    }

    #[test]
    fn copied_frame_survives_slot_rewrite() {
        let buffer = SharedFrameBuffer::allocate(4096).unwrap();
        let mut slots = buffer.lease_slots(1024, 1).unwrap();
        slots[0].as_mut_slice()[..4].copy_from_slice(b"old!");

        let mapping = buffer.map(1024).unwrap();
        let mut copy = vec![0xFF; 16];
        mapping.copy_frame(0, 4, &mut copy).unwrap();

        slots[0].as_mut_slice()[..4].copy_from_slice(b"new!");
        assert_eq!(copy, b"old!");
        assert_eq!(mapping.frame(0, 4).unwrap(), b"new!");
        assert!(matches!(
            mapping.copy_frame(1020, 8, &mut copy),
            Err(BufferError::OutOfBounds { .. })
        ));
    }
}
