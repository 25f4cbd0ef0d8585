//! Bulk data sources.
//!
//! A [`BulkEndpoint`] accepts read requests targeting a buffer slot and later
//! hands them back as [`Completion`]s, the way a host controller completes
//! queued bulk-in transfers. Ownership of the slot travels with the request,
//! so a slot can never be written by two operations at once.

use std::time::Duration;

use bulkframe_buffer::SlotBuf;

pub mod reader;
pub mod synthetic;

pub use reader::ReaderEndpoint;
pub use synthetic::{SyntheticConfig, SyntheticEndpoint};

/// Why a single transfer did not deliver data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    /// The transfer was cancelled before completing.
    #[error("transfer cancelled")]
    Cancelled,

    /// The endpoint halted.
    #[error("endpoint stalled")]
    Stall,

    /// The data source went away.
    #[error("data source disconnected")]
    Disconnected,

    /// Any other I/O failure.
    #[error("transfer I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransferError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::NotConnected => TransferError::Disconnected,
            _ => TransferError::Io(err.to_string()),
        }
    }
}

/// One read operation bound to a fixed buffer slot.
#[derive(Debug)]
pub struct Transfer {
    operation: usize,
    slot: SlotBuf,
}

impl Transfer {
    pub fn new(operation: usize, slot: SlotBuf) -> Self {
        Self { operation, slot }
    }

    /// Index of the recycled operation this transfer belongs to.
    pub fn operation(&self) -> usize {
        self.operation
    }

    /// The slot the transfer reads into.
    pub fn slot(&self) -> &SlotBuf {
        &self.slot
    }

    /// Write access to the slot, for endpoints filling it.
    pub fn slot_mut(&mut self) -> &mut SlotBuf {
        &mut self.slot
    }
}

/// A finished transfer: the slot comes back with the number of bytes written.
#[derive(Debug)]
pub struct Completion {
    pub transfer: Transfer,
    pub status: Result<usize, TransferError>,
}

impl Completion {
    pub fn ok(transfer: Transfer, len: usize) -> Self {
        Self {
            transfer,
            status: Ok(len),
        }
    }

    pub fn failed(transfer: Transfer, error: TransferError) -> Self {
        Self {
            transfer,
            status: Err(error),
        }
    }
}

/// A transfer the endpoint refused to queue, handed back to the caller.
#[derive(Debug)]
pub struct SubmitError {
    pub transfer: Transfer,
    pub error: TransferError,
}

/// Asynchronous bulk-in data source.
///
/// Every submitted transfer must eventually come back exactly once from
/// [`BulkEndpoint::wait_completion`], including after
/// [`BulkEndpoint::cancel_all`].
pub trait BulkEndpoint: Send + 'static {
    /// Reset the endpoint before a session arms its transfers.
    fn prepare(&mut self) -> Result<(), TransferError> {
        Ok(())
    }

    /// Queue a transfer.
    fn submit(&mut self, transfer: Transfer) -> Result<(), SubmitError>;

    /// Wait up to `timeout` for the next finished transfer.
    fn wait_completion(&mut self, timeout: Duration) -> Option<Completion>;

    /// Ask every queued transfer to finish as soon as possible.
    fn cancel_all(&mut self);
}

impl<E: BulkEndpoint + ?Sized> BulkEndpoint for Box<E> {
    fn prepare(&mut self) -> Result<(), TransferError> {
        (**self).prepare()
    }

    fn submit(&mut self, transfer: Transfer) -> Result<(), SubmitError> {
        (**self).submit(transfer)
    }

    fn wait_completion(&mut self, timeout: Duration) -> Option<Completion> {
        (**self).wait_completion(timeout)
    }

    fn cancel_all(&mut self) {
        (**self).cancel_all()
    }
}
