use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bulkframe_buffer::SharedFrameBuffer;
use serde::Serialize;
use tracing::{debug, info};

use crate::endpoint::BulkEndpoint;
use crate::error::{Result, SessionFailure, StreamError};
use crate::format::FrameFormat;
use crate::params::StreamParameters;
use crate::pump::{PumpConfig, PumpStartError, Session, TransferPump};
use crate::queue::CompletionQueue;
use crate::reassembler::FrameReassembler;
use crate::stats::{StatsSnapshot, StreamStats};

/// Streaming state as seen by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    Idle,
    Streaming,
}

struct Inner<E: BulkEndpoint> {
    /// Present while Idle; owned by the pump thread while Streaming.
    endpoint: Option<E>,
    pump: Option<TransferPump<E>>,
    params: Option<StreamParameters>,
}

/// Start/stop state machine over one shared frame buffer and one endpoint.
///
/// Start and stop are serialized by an internal lock, so both may be called
/// from any thread and repeated calls are harmless.
pub struct StreamingController<E: BulkEndpoint> {
    format: FrameFormat,
    buffer: SharedFrameBuffer,
    queue: Arc<CompletionQueue>,
    stats: Arc<StreamStats>,
    session: Arc<Session>,
    config: PumpConfig,
    inner: Mutex<Inner<E>>,
}

impl<E: BulkEndpoint> StreamingController<E> {
    pub fn new(
        format: FrameFormat,
        buffer: SharedFrameBuffer,
        endpoint: E,
        config: PumpConfig,
    ) -> Self {
        Self {
            format,
            buffer,
            queue: Arc::new(CompletionQueue::new()),
            stats: Arc::new(StreamStats::new()),
            session: Arc::new(Session::default()),
            config,
            inner: Mutex::new(Inner {
                endpoint: Some(endpoint),
                pump: None,
                params: None,
            }),
        }
    }

    /// Begin streaming with `params`.
    ///
    /// A no-op while already streaming. Invalid parameters are rejected
    /// before anything changes.
    pub fn start(&self, params: StreamParameters) -> Result<()> {
        let mut inner = self.lock();
        if self.session.is_streaming() {
            debug!("start requested while streaming; ignored");
            return Ok(());
        }

        params.validate(&self.format, self.buffer.len())?;
        let slot_len = params
            .operation_bytes()
            .ok_or_else(|| StreamError::InvalidParameters("operation size overflows".into()))?;

        // A pump left behind by a failed session still holds the endpoint.
        if let Some(pump) = inner.pump.take() {
            inner.endpoint = Some(pump.stop()?);
        }

        let slots = self.buffer.lease_slots(slot_len, params.operation_count)?;
        let endpoint = inner
            .endpoint
            .take()
            .ok_or(StreamError::EndpointUnavailable)?;

        self.queue.reset();
        self.stats.reset();
        self.session.clear_failure();
        if !self.session.begin() {
            inner.endpoint = Some(endpoint);
            return Ok(());
        }

        let reassembler = FrameReassembler::new(
            self.format.clone(),
            params.chunk_size,
            params.frame_total_size,
            Arc::clone(&self.queue),
            Arc::clone(&self.stats),
        );

        match TransferPump::start(
            endpoint,
            slots,
            reassembler,
            params.chunk_size,
            Arc::clone(&self.session),
            Arc::clone(&self.stats),
            self.config.clone(),
        ) {
            Ok(pump) => {
                inner.pump = Some(pump);
                inner.params = Some(params);
                info!(
                    operations = params.operation_count,
                    chunk_size = params.chunk_size,
                    chunks_per_operation = params.chunks_per_operation,
                    frame_total_size = params.frame_total_size,
                    "streaming started"
                );
                Ok(())
            }
            Err(PumpStartError { endpoint, error }) => {
                self.session.end();
                inner.endpoint = endpoint;
                Err(error)
            }
        }
    }

    /// Stop streaming and wait until every outstanding transfer has been
    /// handed back. Idempotent.
    pub fn stop(&self) -> Result<()> {
        let mut inner = self.lock();
        let was_streaming = self.session.end();
        let Some(pump) = inner.pump.take() else {
            return Ok(());
        };

        inner.endpoint = Some(pump.stop()?);
        if was_streaming {
            info!(stats = ?self.stats.snapshot(), "streaming stopped");
        } else {
            debug!("reclaimed endpoint from failed session");
        }
        Ok(())
    }

    pub fn state(&self) -> StreamState {
        if self.session.is_streaming() {
            StreamState::Streaming
        } else {
            StreamState::Idle
        }
    }

    /// Why the most recent session ended on its own, if it did.
    pub fn last_failure(&self) -> Option<SessionFailure> {
        self.session.failure()
    }

    /// Parameters of the current or most recent session.
    pub fn params(&self) -> Option<StreamParameters> {
        self.lock().params
    }

    pub fn queue(&self) -> &Arc<CompletionQueue> {
        &self.queue
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn format(&self) -> &FrameFormat {
        &self.format
    }

    pub fn buffer(&self) -> &SharedFrameBuffer {
        &self.buffer
    }

    /// Stop streaming and give the buffer back for release.
    pub fn shutdown(self) -> Result<SharedFrameBuffer> {
        self.stop()?;
        Ok(self.buffer)
    }

    fn lock(&self) -> MutexGuard<'_, Inner<E>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
