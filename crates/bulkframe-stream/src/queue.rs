use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Number of completed-frame offsets the queue holds.
pub const COMPLETION_QUEUE_DEPTH: usize = 4;

/// Default bound on a consumer's wait for the next frame.
pub const DEFAULT_FRAME_WAIT: Duration = Duration::from_millis(200);

/// Bounded FIFO of completed-frame offsets.
///
/// One producer (the completion context) pushes, one consumer pops. A push
/// onto a full queue evicts the oldest pending offset rather than waiting, so
/// the producer never blocks on capacity. The lock is only held for O(1)
/// deque operations.
#[derive(Debug)]
pub struct CompletionQueue {
    entries: Mutex<VecDeque<usize>>,
    available: Condvar,
    depth: usize,
}

impl CompletionQueue {
    /// Create a queue with the standard depth.
    pub fn new() -> Self {
        Self::with_depth(COMPLETION_QUEUE_DEPTH)
    }

    /// Create a queue holding at most `depth` offsets (minimum 1).
    pub fn with_depth(depth: usize) -> Self {
        let depth = depth.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(depth)),
            available: Condvar::new(),
            depth,
        }
    }

    /// Publish a completed frame offset and wake a waiting consumer.
    ///
    /// Returns `false` when the queue was full and the oldest pending offset
    /// was evicted to make room. That is a missed frame, not an error.
    pub fn push(&self, offset: usize) -> bool {
        let mut entries = self.lock();
        let kept_all = if entries.len() >= self.depth {
            entries.pop_front();
            false
        } else {
            true
        };
        entries.push_back(offset);
        drop(entries);
        self.available.notify_one();
        kept_all
    }

    /// Take the oldest offset, waiting at most `timeout` for one to arrive.
    pub fn pop(&self, timeout: Duration) -> Option<usize> {
        let entries = self.lock();
        let (mut entries, _) = self
            .available
            .wait_timeout_while(entries, timeout, |entries| entries.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        entries.pop_front()
    }

    /// Take the oldest offset without waiting.
    pub fn try_pop(&self) -> Option<usize> {
        self.lock().pop_front()
    }

    /// Drop every pending offset.
    pub fn reset(&self) {
        self.lock().clear();
    }

    /// Number of pending offsets.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Maximum number of pending offsets.
    pub fn depth(&self) -> usize {
        self.depth
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<usize>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for CompletionQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Instant;

    use super::*;

    #[test]
    fn pops_in_fifo_order() {
        let queue = CompletionQueue::new();
        assert!(queue.push(10));
        assert!(queue.push(20));
        assert_eq!(queue.pop(Duration::ZERO), Some(10));
        assert_eq!(queue.pop(Duration::ZERO), Some(20));
        assert!(queue.is_empty());
    }

    #[test]
    fn overflow_evicts_oldest_without_error() {
        let queue = CompletionQueue::new();
        for offset in 0..COMPLETION_QUEUE_DEPTH {
            assert!(queue.push(offset));
        }
        assert!(!queue.push(100));
        assert!(!queue.push(200));
        assert_eq!(queue.len(), COMPLETION_QUEUE_DEPTH);

        let drained: Vec<usize> = std::iter::from_fn(|| queue.try_pop()).collect();
        assert_eq!(drained, vec![2, 3, 100, 200]);
    }

    #[test]
    fn pop_times_out_when_empty() {
        let queue = CompletionQueue::new();
        let started = Instant::now();
        assert_eq!(queue.pop(Duration::from_millis(30)), None);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn reset_discards_pending_offsets() {
        let queue = CompletionQueue::new();
        queue.push(1);
        queue.push(2);
        queue.reset();
        assert!(queue.is_empty());
        assert_eq!(queue.pop(Duration::from_millis(1)), None);
    }

    #[test]
    fn blocked_consumer_is_woken_by_push() {
        let queue = Arc::new(CompletionQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.pop(Duration::from_secs(5)))
        };

        std::thread::sleep(Duration::from_millis(20));
        queue.push(4096);

        assert_eq!(consumer.join().unwrap(), Some(4096));
    }

    #[test]
    fn depth_has_a_floor_of_one() {
        let queue = CompletionQueue::with_depth(0);
        assert_eq!(queue.depth(), 1);
        assert!(queue.push(1));
        assert!(!queue.push(2));
        assert_eq!(queue.try_pop(), Some(2));
    }
}
