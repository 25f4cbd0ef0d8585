use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bulkframe_buffer::SlotBuf;
use tracing::{debug, error, info, trace, warn};

use crate::endpoint::{BulkEndpoint, Completion, Transfer, TransferError};
use crate::error::{SessionFailure, StreamError};
use crate::reassembler::FrameReassembler;
use crate::stats::StreamStats;

/// Tuning knobs for the completion thread.
#[derive(Debug, Clone)]
pub struct PumpConfig {
    /// How long one wait for a completion may block before the streaming
    /// flag is re-checked.
    pub poll_interval: Duration,
    /// How often to log while waiting for cancelled transfers to come back.
    pub drain_warn_interval: Duration,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(20),
            drain_warn_interval: Duration::from_secs(1),
        }
    }
}

/// Streaming flag and failure slot shared by the controller and the pump.
#[derive(Debug, Default)]
pub(crate) struct Session {
    streaming: AtomicBool,
    failure: Mutex<Option<SessionFailure>>,
}

impl Session {
    pub(crate) fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    /// Atomically move Idle -> Streaming. False if already streaming.
    pub(crate) fn begin(&self) -> bool {
        self.streaming
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Move to Idle, returning whether the session was streaming.
    pub(crate) fn end(&self) -> bool {
        self.streaming.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn fail(&self, failure: SessionFailure) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(failure);
        self.end();
    }

    pub(crate) fn failure(&self) -> Option<SessionFailure> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn clear_failure(&self) {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// A pump that could not be started; the endpoint is handed back when it
/// survived.
pub(crate) struct PumpStartError<E> {
    pub(crate) endpoint: Option<E>,
    pub(crate) error: StreamError,
}

/// Keeps one transfer in flight per slot and recycles each as it completes.
///
/// All completions are handled on a single dedicated thread, which owns the
/// endpoint and the reassembler for the lifetime of the session.
pub struct TransferPump<E: BulkEndpoint> {
    handle: Option<JoinHandle<E>>,
    session: Arc<Session>,
}

impl<E: BulkEndpoint> TransferPump<E> {
    /// Spawn the completion thread and arm one transfer per slot.
    ///
    /// Returns once every transfer has been submitted, or with the error that
    /// prevented it (all submitted transfers are drained first).
    pub(crate) fn start(
        endpoint: E,
        slots: Vec<SlotBuf>,
        reassembler: FrameReassembler,
        chunk_size: usize,
        session: Arc<Session>,
        stats: Arc<StreamStats>,
        config: PumpConfig,
    ) -> std::result::Result<Self, PumpStartError<E>> {
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), StreamError>>(1);
        let worker_session = Arc::clone(&session);

        let spawned = thread::Builder::new()
            .name("bulkframe-pump".to_string())
            .spawn(move || {
                let mut worker = PumpWorker {
                    endpoint,
                    reassembler,
                    chunk_size,
                    session: worker_session,
                    stats,
                    config,
                    in_flight: 0,
                    failed: 0,
                    last_error: None,
                };
                match worker.arm(slots) {
                    Ok(()) => {
                        let _ = ready_tx.send(Ok(()));
                        worker.run()
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        worker.endpoint
                    }
                }
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                return Err(PumpStartError {
                    endpoint: None,
                    error: StreamError::Spawn(err),
                })
            }
        };

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                handle: Some(handle),
                session,
            }),
            Ok(Err(error)) => Err(PumpStartError {
                endpoint: handle.join().ok(),
                error,
            }),
            Err(_) => Err(PumpStartError {
                endpoint: handle.join().ok(),
                error: StreamError::PumpPanicked,
            }),
        }
    }

    /// True once the completion thread has exited (stopped or failed).
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Stop recycling, cancel outstanding transfers and wait until every one
    /// has been handed back. Returns the endpoint for reuse.
    pub fn stop(mut self) -> Result<E, StreamError> {
        self.session.end();
        self.join()
    }

    /// Wait for a thread that is already stopping (after a session failure).
    pub(crate) fn join(&mut self) -> Result<E, StreamError> {
        let handle = self.handle.take().ok_or(StreamError::EndpointUnavailable)?;
        handle.join().map_err(|_| StreamError::PumpPanicked)
    }
}

impl<E: BulkEndpoint> Drop for TransferPump<E> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.session.end();
            let _ = handle.join();
        }
    }
}

struct PumpWorker<E> {
    endpoint: E,
    reassembler: FrameReassembler,
    chunk_size: usize,
    session: Arc<Session>,
    stats: Arc<StreamStats>,
    config: PumpConfig,
    in_flight: usize,
    failed: usize,
    last_error: Option<TransferError>,
}

impl<E: BulkEndpoint> PumpWorker<E> {
    fn arm(&mut self, slots: Vec<SlotBuf>) -> Result<(), StreamError> {
        self.endpoint.prepare().map_err(StreamError::Prepare)?;

        let count = slots.len();
        for (operation, slot) in slots.into_iter().enumerate() {
            if let Err(rejected) = self.endpoint.submit(Transfer::new(operation, slot)) {
                error!(operation, error = %rejected.error, "failed to arm transfer");
                self.cancel_and_drain();
                return Err(StreamError::OperationFailure {
                    operation,
                    source: rejected.error,
                });
            }
            self.in_flight += 1;
        }
        debug!(operations = count, "transfers armed");
        Ok(())
    }

    fn run(mut self) -> E {
        while self.session.is_streaming() {
            let Some(completion) = self.endpoint.wait_completion(self.config.poll_interval) else {
                continue;
            };
            self.in_flight = self.in_flight.saturating_sub(1);
            self.on_completion(completion);

            if self.in_flight == 0 && self.session.is_streaming() {
                let failure = SessionFailure {
                    failed_operations: self.failed,
                    last_error: self
                        .last_error
                        .clone()
                        .unwrap_or(TransferError::Disconnected),
                };
                error!(%failure, "streaming session failed");
                self.session.fail(failure);
            }
        }

        self.cancel_and_drain();
        info!(failed = self.failed, "transfer pump stopped");
        self.endpoint
    }

    fn on_completion(&mut self, completion: Completion) {
        let Completion { transfer, status } = completion;
        let operation = transfer.operation();

        if !self.session.is_streaming() {
            trace!(operation, "completion after stop; operation retired");
            return;
        }

        match status {
            Ok(len) => {
                self.scan(&transfer, len);
                if !self.session.is_streaming() {
                    return;
                }
                match self.endpoint.submit(transfer) {
                    Ok(()) => {
                        self.in_flight += 1;
                        self.stats.record_rearm();
                    }
                    Err(rejected) => self.retire(operation, rejected.error),
                }
            }
            Err(err) => self.retire(operation, err),
        }
    }

    fn scan(&mut self, transfer: &Transfer, len: usize) {
        let slot = transfer.slot();
        let data = &slot.as_slice()[..len.min(slot.len())];
        self.stats.record_bytes(data.len());

        let chunks = data.chunks_exact(self.chunk_size);
        let remainder = chunks.remainder().len();
        for (index, chunk) in chunks.enumerate() {
            self.reassembler
                .on_chunk(chunk, slot.offset() + index * self.chunk_size);
        }
        if remainder > 0 {
            debug!(
                operation = transfer.operation(),
                remainder, "partial chunk at end of transfer skipped"
            );
        }
    }

    fn retire(&mut self, operation: usize, error: TransferError) {
        self.failed += 1;
        self.stats.record_failure();
        warn!(operation, error = %error, "transfer failed; operation retired");
        self.last_error = Some(error);
    }

    fn cancel_and_drain(&mut self) {
        if self.in_flight == 0 {
            return;
        }
        self.endpoint.cancel_all();

        let mut last_warn = Instant::now();
        while self.in_flight > 0 {
            match self.endpoint.wait_completion(self.config.poll_interval) {
                Some(_) => self.in_flight -= 1,
                None if last_warn.elapsed() >= self.config.drain_warn_interval => {
                    warn!(in_flight = self.in_flight, "waiting for cancelled transfers");
                    last_warn = Instant::now();
                }
                None => {}
            }
        }
        debug!("all transfers drained");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use bulkframe_buffer::SharedFrameBuffer;
    use bytes::Bytes;

    use super::*;
    use crate::endpoint::{SubmitError, SyntheticConfig, SyntheticEndpoint};
    use crate::format::FrameFormat;
    use crate::queue::CompletionQueue;

    const CHUNK: usize = 64;

    struct Rig {
        buffer: SharedFrameBuffer,
        queue: Arc<CompletionQueue>,
        stats: Arc<StreamStats>,
        session: Arc<Session>,
    }

    impl Rig {
        fn new() -> Self {
            Self {
                buffer: SharedFrameBuffer::allocate(8 * 1024).unwrap(),
                queue: Arc::new(CompletionQueue::with_depth(64)),
                stats: Arc::new(StreamStats::new()),
                session: Arc::new(Session::default()),
            }
        }

        fn start<E: BulkEndpoint>(
            &self,
            endpoint: E,
            operations: usize,
            chunks_per_operation: usize,
            frame_total: usize,
        ) -> std::result::Result<TransferPump<E>, PumpStartError<E>> {
            let format = FrameFormat::new(Bytes::from_static(b"ALEXP"), 16).unwrap();
            let slots = self
                .buffer
                .lease_slots(CHUNK * chunks_per_operation, operations)
                .unwrap();
            let reassembler = FrameReassembler::new(
                format,
                CHUNK,
                frame_total,
                Arc::clone(&self.queue),
                Arc::clone(&self.stats),
            );
            assert!(self.session.begin());
            TransferPump::start(
                endpoint,
                slots,
                reassembler,
                CHUNK,
                Arc::clone(&self.session),
                Arc::clone(&self.stats),
                PumpConfig {
                    poll_interval: Duration::from_millis(5),
                    ..PumpConfig::default()
                },
            )
        }

        fn wait_until(&self, what: impl Fn(&Self) -> bool) {
            let deadline = Instant::now() + Duration::from_secs(5);
            while !what(self) {
                assert!(Instant::now() < deadline, "condition not reached in time");
                thread::sleep(Duration::from_millis(2));
            }
        }
    }

    fn synthetic(frame_limit: u64) -> SyntheticEndpoint {
        SyntheticEndpoint::new(SyntheticConfig {
            chunk_size: CHUNK,
            frame_chunks: 3,
            frame_limit: Some(frame_limit),
            ..SyntheticConfig::default()
        })
    }

    #[test]
    fn completes_every_generated_frame_then_fails_session() {
        let rig = Rig::new();
        let mut pump = match rig.start(synthetic(10), 4, 2, 3 * CHUNK) {
            Ok(pump) => pump,
            Err(err) => panic!("pump should start: {}", err.error),
        };

        rig.wait_until(|rig| !rig.session.is_streaming());
        let endpoint = pump.join().unwrap();
        assert_eq!(endpoint.frames_generated(), 10);

        let stats = rig.stats.snapshot();
        assert_eq!(stats.frames_completed, 10);
        assert_eq!(stats.frames_truncated, 0);
        assert_eq!(stats.operation_failures, 4);

        let failure = rig.session.failure().unwrap();
        assert_eq!(failure.failed_operations, 4);
        assert_eq!(failure.last_error, TransferError::Disconnected);
        assert_eq!(rig.buffer.outstanding_leases(), 0);
    }

    #[test]
    fn offsets_follow_slot_layout_across_wraparound() {
        let rig = Rig::new();
        // Two operations of three chunks each: frames land at 0 and 192 and
        // keep alternating as slots are recycled.
        let mut pump = rig
            .start(synthetic(6), 2, 3, 3 * CHUNK)
            .unwrap_or_else(|err| panic!("{}", err.error));
        rig.wait_until(|rig| !rig.session.is_streaming());
        pump.join().unwrap();

        let offsets: Vec<usize> = std::iter::from_fn(|| rig.queue.try_pop()).collect();
        assert_eq!(offsets, vec![0, 192, 0, 192, 0, 192]);
    }

    #[test]
    fn stop_drains_and_returns_endpoint() {
        let rig = Rig::new();
        let endpoint = SyntheticEndpoint::new(SyntheticConfig {
            chunk_size: CHUNK,
            frame_chunks: 2,
            pace: Some(Duration::from_millis(1)),
            ..SyntheticConfig::default()
        });
        let pump = rig
            .start(endpoint, 4, 2, 2 * CHUNK)
            .unwrap_or_else(|err| panic!("{}", err.error));
        rig.wait_until(|rig| rig.stats.snapshot().frames_completed >= 3);

        let _endpoint = pump.stop().unwrap();
        assert!(!rig.session.is_streaming());
        assert_eq!(rig.buffer.outstanding_leases(), 0);
        assert!(rig.session.failure().is_none());

        let completed = rig.stats.snapshot().frames_completed;
        thread::sleep(Duration::from_millis(20));
        assert_eq!(rig.stats.snapshot().frames_completed, completed);
    }

    #[test]
    fn single_failure_retires_only_that_operation() {
        let rig = Rig::new();
        let endpoint = ScriptedEndpoint::new(vec![Step::Fail(TransferError::Stall)]);
        let pump = rig
            .start(endpoint, 3, 1, 2 * CHUNK)
            .unwrap_or_else(|err| panic!("{}", err.error));

        rig.wait_until(|rig| rig.stats.snapshot().operations_rearmed >= 10);
        assert!(rig.session.is_streaming());
        assert_eq!(rig.stats.snapshot().operation_failures, 1);

        let endpoint = pump.stop().unwrap();
        assert_eq!(endpoint.outstanding, 0);
    }

    #[test]
    fn arm_failure_hands_endpoint_back() {
        let rig = Rig::new();
        let mut endpoint = ScriptedEndpoint::new(Vec::new());
        endpoint.reject_after = Some(2);

        let err = match rig.start(endpoint, 4, 1, 2 * CHUNK) {
            Ok(_) => panic!("arming should fail"),
            Err(err) => err,
        };
        assert!(matches!(
            err.error,
            StreamError::OperationFailure { operation: 2, .. }
        ));
        let endpoint = err.endpoint.expect("endpoint should survive");
        assert_eq!(endpoint.outstanding, 0);
        assert_eq!(rig.buffer.outstanding_leases(), 0);
    }

    #[test]
    fn dropping_pump_stops_thread() {
        let rig = Rig::new();
        let pump = rig
            .start(ScriptedEndpoint::new(Vec::new()), 2, 1, 2 * CHUNK)
            .unwrap_or_else(|err| panic!("{}", err.error));
        drop(pump);
        assert!(!rig.session.is_streaming());
        assert_eq!(rig.buffer.outstanding_leases(), 0);
    }

    enum Step {
        Fail(TransferError),
    }

    /// Completes transfers in order with zero-filled data, applying scripted
    /// failures first.
    struct ScriptedEndpoint {
        queued: VecDeque<Transfer>,
        script: VecDeque<Step>,
        cancelled: bool,
        reject_after: Option<usize>,
        submitted: usize,
        outstanding: usize,
    }

    impl ScriptedEndpoint {
        fn new(script: Vec<Step>) -> Self {
            Self {
                queued: VecDeque::new(),
                script: script.into(),
                cancelled: false,
                reject_after: None,
                submitted: 0,
                outstanding: 0,
            }
        }
    }

    impl BulkEndpoint for ScriptedEndpoint {
        fn submit(&mut self, transfer: Transfer) -> Result<(), SubmitError> {
            if self.reject_after.is_some_and(|limit| self.submitted >= limit) {
                return Err(SubmitError {
                    transfer,
                    error: TransferError::Stall,
                });
            }
            self.submitted += 1;
            self.outstanding += 1;
            self.queued.push_back(transfer);
            Ok(())
        }

        fn wait_completion(&mut self, timeout: Duration) -> Option<Completion> {
            let Some(mut transfer) = self.queued.pop_front() else {
                thread::sleep(timeout);
                return None;
            };
            self.outstanding -= 1;
            if self.cancelled {
                return Some(Completion::failed(transfer, TransferError::Cancelled));
            }
            if let Some(Step::Fail(err)) = self.script.pop_front() {
                return Some(Completion::failed(transfer, err));
            }
            thread::sleep(Duration::from_micros(200));
            transfer.slot_mut().as_mut_slice().fill(0);
            let len = transfer.slot().len();
            Some(Completion::ok(transfer, len))
        }

        fn cancel_all(&mut self) {
            self.cancelled = true;
        }
    }
}
