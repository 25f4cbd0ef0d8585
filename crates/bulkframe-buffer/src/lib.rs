//! Page-aligned shared frame buffer.
//!
//! This is the lowest layer of bulkframe. A single [`SharedFrameBuffer`] is
//! allocated per device attachment and never moves while it lives:
//! - the producer leases disjoint [`SlotBuf`] regions and writes into them
//! - consumers obtain read-only [`FrameMapping`]s of the very same pages
//!
//! No bytes are ever copied between the two sides.

pub mod error;
pub mod page;

#[cfg(unix)]
pub mod mapping;
#[cfg(unix)]
pub mod region;

pub use error::{BufferError, Result};
pub use page::{page_align, page_size};

#[cfg(unix)]
pub use mapping::FrameMapping;
#[cfg(unix)]
pub use region::{SharedFrameBuffer, SlotBuf};
