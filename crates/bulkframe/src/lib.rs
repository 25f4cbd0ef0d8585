//! Zero-copy frame reassembly over continuously recycled bulk transfers.
//!
//! bulkframe recovers frames from a raw, headerless byte stream by scanning
//! fixed-size chunks for an in-band signature, and hands completed frames to
//! consumers as offsets into a shared, memory-mapped buffer.
//!
//! # Crate Structure
//!
//! - [`buffer`]: page-aligned shared frame buffer, slot leases and read-only mappings
//! - [`stream`]: transfer pump, signature reassembler, completion queue, controller
//! - [`device`]: per-attachment control surface (behind the `device` feature)

/// Re-export buffer types.
pub mod buffer {
    pub use bulkframe_buffer::*;
}

/// Re-export streaming engine types.
pub mod stream {
    pub use bulkframe_stream::*;
}

/// Re-export device types (requires `device` feature).
#[cfg(feature = "device")]
pub mod device {
    pub use bulkframe_device::*;
}
