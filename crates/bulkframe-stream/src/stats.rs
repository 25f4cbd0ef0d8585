use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Streaming counters, written by the completion context and read anywhere.
#[derive(Debug, Default)]
pub struct StreamStats {
    chunks_scanned: AtomicU64,
    bytes_received: AtomicU64,
    frames_completed: AtomicU64,
    frames_truncated: AtomicU64,
    completions_evicted: AtomicU64,
    operation_failures: AtomicU64,
    operations_rearmed: AtomicU64,
}

/// Point-in-time copy of [`StreamStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub chunks_scanned: u64,
    pub bytes_received: u64,
    pub frames_completed: u64,
    pub frames_truncated: u64,
    pub completions_evicted: u64,
    pub operation_failures: u64,
    pub operations_rearmed: u64,
}

impl StreamStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_chunk(&self) {
        self.chunks_scanned.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_bytes(&self, bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_frame(&self, evicted: bool) {
        self.frames_completed.fetch_add(1, Ordering::Relaxed);
        if evicted {
            self.completions_evicted.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_truncated(&self) {
        self.frames_truncated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.operation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rearm(&self) {
        self.operations_rearmed.fetch_add(1, Ordering::Relaxed);
    }

    /// Zero every counter.
    pub fn reset(&self) {
        for counter in [
            &self.chunks_scanned,
            &self.bytes_received,
            &self.frames_completed,
            &self.frames_truncated,
            &self.completions_evicted,
            &self.operation_failures,
            &self.operations_rearmed,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            chunks_scanned: self.chunks_scanned.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            frames_completed: self.frames_completed.load(Ordering::Relaxed),
            frames_truncated: self.frames_truncated.load(Ordering::Relaxed),
            completions_evicted: self.completions_evicted.load(Ordering::Relaxed),
            operation_failures: self.operation_failures.load(Ordering::Relaxed),
            operations_rearmed: self.operations_rearmed.load(Ordering::Relaxed),
        }
    }
}
