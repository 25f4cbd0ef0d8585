//! Frame reassembly and streaming engine.
//!
//! This is the core value-add layer of bulkframe. A raw, headerless byte
//! stream arrives in fixed-size chunks; frames are recovered by looking for an
//! in-band signature at the start of each chunk:
//! - [`TransferPump`] keeps a fixed set of bulk reads in flight, one per slot
//!   of the shared frame buffer, and re-arms each one as soon as it completes
//! - [`FrameReassembler`] scans every delivered chunk and tracks the frame in
//!   progress
//! - [`CompletionQueue`] carries offsets of completed frames to the consumer
//! - [`StreamingController`] owns the start/stop state machine
//!
//! Frame payloads are never copied: consumers read them in place through a
//! mapping of the shared buffer.

pub mod controller;
pub mod endpoint;
pub mod error;
pub mod format;
pub mod params;
pub mod pump;
pub mod queue;
pub mod reassembler;
pub mod stats;

pub use controller::{StreamState, StreamingController};
pub use endpoint::{
    BulkEndpoint, Completion, ReaderEndpoint, SubmitError, SyntheticConfig, SyntheticEndpoint,
    Transfer, TransferError,
};
pub use error::{Result, SessionFailure, StreamError};
pub use format::{FrameFormat, DEFAULT_HEADER_SIZE, DEFAULT_SIGNATURE};
pub use params::StreamParameters;
pub use pump::{PumpConfig, TransferPump};
pub use queue::{CompletionQueue, COMPLETION_QUEUE_DEPTH, DEFAULT_FRAME_WAIT};
pub use reassembler::{ChunkOutcome, FrameReassembler, ScanCursor};
pub use stats::{StatsSnapshot, StreamStats};
