use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, trace};

use super::{BulkEndpoint, Completion, SubmitError, Transfer, TransferError};

/// Bulk endpoint backed by any blocking [`Read`] source.
///
/// A worker thread services queued transfers strictly in submission order,
/// filling each slot completely before moving on. A short final read is
/// delivered as a partial transfer; after that the source reports
/// [`TransferError::Disconnected`].
///
/// Cancellation is honored between reads: a read already blocked in the
/// source finishes first.
pub struct ReaderEndpoint {
    requests: Option<Sender<Transfer>>,
    completions: Receiver<Completion>,
    cancelled: Arc<AtomicBool>,
}

impl ReaderEndpoint {
    /// Spawn the worker thread that owns `reader`.
    pub fn new<R: Read + Send + 'static>(reader: R) -> std::io::Result<Self> {
        Self::with_interval(reader, None)
    }

    /// Like [`ReaderEndpoint::new`], but wait `interval` before filling each
    /// transfer to pace a source that would otherwise deliver instantly.
    pub fn with_interval<R: Read + Send + 'static>(
        reader: R,
        interval: Option<Duration>,
    ) -> std::io::Result<Self> {
        let (request_tx, request_rx) = mpsc::channel::<Transfer>();
        let (completion_tx, completion_rx) = mpsc::channel::<Completion>();
        let cancelled = Arc::new(AtomicBool::new(false));

        let worker_cancelled = Arc::clone(&cancelled);
        thread::Builder::new()
            .name("bulkframe-reader".to_string())
            .spawn(move || {
                serve(reader, request_rx, completion_tx, worker_cancelled, interval)
            })?;

        Ok(Self {
            requests: Some(request_tx),
            completions: completion_rx,
            cancelled,
        })
    }
}

impl BulkEndpoint for ReaderEndpoint {
    fn prepare(&mut self) -> Result<(), TransferError> {
        self.cancelled.store(false, Ordering::Release);
        Ok(())
    }

    fn submit(&mut self, transfer: Transfer) -> Result<(), SubmitError> {
        match &self.requests {
            Some(requests) => requests.send(transfer).map_err(|err| SubmitError {
                transfer: err.0,
                error: TransferError::Disconnected,
            }),
            None => Err(SubmitError {
                transfer,
                error: TransferError::Disconnected,
            }),
        }
    }

    fn wait_completion(&mut self, timeout: Duration) -> Option<Completion> {
        match self.completions.recv_timeout(timeout) {
            Ok(completion) => Some(completion),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                // Worker gone; nothing will ever complete. Keep the caller's
                // poll cadence instead of returning immediately.
                thread::sleep(timeout);
                None
            }
        }
    }

    fn cancel_all(&mut self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

impl Drop for ReaderEndpoint {
    fn drop(&mut self) {
        // Closing the request channel lets the worker exit after its current
        // read. It is not joined: a read on a pipe may never return.
        self.requests.take();
    }
}

fn serve<R: Read>(
    mut reader: R,
    requests: Receiver<Transfer>,
    completions: Sender<Completion>,
    cancelled: Arc<AtomicBool>,
    interval: Option<Duration>,
) {
    let mut exhausted = false;
    for mut transfer in requests {
        let completion = if cancelled.load(Ordering::Acquire) {
            Completion::failed(transfer, TransferError::Cancelled)
        } else if exhausted {
            Completion::failed(transfer, TransferError::Disconnected)
        } else {
            if let Some(interval) = interval {
                thread::sleep(interval);
            }
            match fill(&mut reader, transfer.slot_mut().as_mut_slice()) {
                Ok(len) => {
                    exhausted = len < transfer.slot().len();
                    trace!(operation = transfer.operation(), len, "transfer filled");
                    if len == 0 {
                        Completion::failed(transfer, TransferError::Disconnected)
                    } else {
                        Completion::ok(transfer, len)
                    }
                }
                Err(err) => {
                    exhausted = err == TransferError::Disconnected;
                    Completion::failed(transfer, err)
                }
            }
        };

        if completions.send(completion).is_err() {
            break;
        }
    }
    debug!("reader endpoint worker exiting");
}

/// Read until `buf` is full or the source ends.
fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, TransferError> {
    let mut filled = 0usize;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if filled > 0 => {
                debug!(error = %err, filled, "read failed mid-transfer");
                break;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bulkframe_buffer::SharedFrameBuffer;

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn fills_transfers_in_submission_order() {
        let source: Vec<u8> = (0..=255u8).cycle().take(3 * 1024).collect();
        let buffer = SharedFrameBuffer::allocate(4096).unwrap();
        let mut slots = buffer.lease_slots(1024, 3).unwrap().into_iter();
        let mut endpoint = ReaderEndpoint::new(Cursor::new(source.clone())).unwrap();

        for operation in 0..3 {
            endpoint
                .submit(Transfer::new(operation, slots.next().unwrap()))
                .unwrap();
        }

        for operation in 0..3 {
            let completion = endpoint.wait_completion(WAIT).unwrap();
            assert_eq!(completion.transfer.operation(), operation);
            assert_eq!(completion.status, Ok(1024));
            assert_eq!(
                completion.transfer.slot().as_slice(),
                &source[operation * 1024..(operation + 1) * 1024]
            );
        }
    }

    #[test]
    fn short_read_then_disconnect() {
        let buffer = SharedFrameBuffer::allocate(4096).unwrap();
        let mut slots = buffer.lease_slots(1024, 2).unwrap().into_iter();
        let mut endpoint = ReaderEndpoint::new(Cursor::new(vec![7u8; 100])).unwrap();

        endpoint.submit(Transfer::new(0, slots.next().unwrap())).unwrap();
        endpoint.submit(Transfer::new(1, slots.next().unwrap())).unwrap();

        let first = endpoint.wait_completion(WAIT).unwrap();
        assert_eq!(first.status, Ok(100));
        let second = endpoint.wait_completion(WAIT).unwrap();
        assert_eq!(second.status, Err(TransferError::Disconnected));
    }

    #[test]
    fn cancelled_transfers_come_back() {
        let buffer = SharedFrameBuffer::allocate(4096).unwrap();
        let slots = buffer.lease_slots(1024, 2).unwrap();
        let mut endpoint = ReaderEndpoint::new(Cursor::new(vec![0u8; 4096])).unwrap();

        endpoint.cancel_all();
        for (operation, slot) in slots.into_iter().enumerate() {
            endpoint.submit(Transfer::new(operation, slot)).unwrap();
        }

        for _ in 0..2 {
            let completion = endpoint.wait_completion(WAIT).unwrap();
            assert_eq!(completion.status, Err(TransferError::Cancelled));
        }
        drop(endpoint);
        assert_eq!(buffer.outstanding_leases(), 0);
    }

    #[test]
    fn prepare_clears_cancellation() {
        let buffer = SharedFrameBuffer::allocate(4096).unwrap();
        let mut slots = buffer.lease_slots(1024, 1).unwrap();
        let mut endpoint = ReaderEndpoint::new(Cursor::new(vec![1u8; 1024])).unwrap();

        endpoint.cancel_all();
        endpoint.prepare().unwrap();
        endpoint.submit(Transfer::new(0, slots.remove(0))).unwrap();
        assert_eq!(endpoint.wait_completion(WAIT).unwrap().status, Ok(1024));
    }

    #[test]
    fn wait_times_out_without_submissions() {
        let mut endpoint = ReaderEndpoint::new(Cursor::new(Vec::<u8>::new())).unwrap();
        assert!(endpoint.wait_completion(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn interrupted_reads_are_retried() {
        struct Flaky {
            interrupted: bool,
            data: Cursor<Vec<u8>>,
        }
        impl Read for Flaky {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                if !self.interrupted {
                    self.interrupted = true;
                    return Err(std::io::Error::from(ErrorKind::Interrupted));
                }
                self.data.read(buf)
            }
        }

        let mut buf = [0u8; 8];
        let mut reader = Flaky {
            interrupted: false,
            data: Cursor::new(vec![3u8; 8]),
        };
        assert_eq!(fill(&mut reader, &mut buf), Ok(8));
        assert_eq!(buf, [3u8; 8]);
    }
}
