//! Admission queue for audit log entries.
//!
//! Request handlers offer entries; the flush worker takes them in batches.
//! The buffer owns the intake rules: it never grows past its capacity, it
//! refuses everything once closed, and it counts what it accepted and what
//! it turned away.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::queue::ArrayQueue;
use parking_lot::RwLock;

use crate::models::LogEntry;

/// Outcome of [`LogBuffer::offer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// Queued; `pending` is the queue depth right after the push
    Accepted { pending: usize },
    /// Dropped, the queue was at capacity
    Full,
    /// Dropped, intake has been closed
    Closed,
}

impl Offer {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Offer::Accepted { .. })
    }
}

pub struct LogBuffer {
    queue: ArrayQueue<LogEntry>,
    /// Read-held while pushing, write-held while closing, so nothing is
    /// pushed after `close` returns.
    closed: RwLock<bool>,
    accepted: AtomicU64,
    dropped: AtomicU64,
}

impl LogBuffer {
    /// `capacity` is clamped to at least one entry.
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            closed: RwLock::new(false),
            accepted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Queue an entry without blocking.
    pub fn offer(&self, entry: LogEntry) -> Offer {
        let closed = self.closed.read();
        if *closed {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Offer::Closed;
        }

        match self.queue.push(entry) {
            Ok(()) => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
                Offer::Accepted {
                    pending: self.queue.len(),
                }
            }
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Offer::Full
            }
        }
    }

    /// Stop intake. Returns the number of entries still waiting.
    pub fn close(&self) -> usize {
        let mut closed = self.closed.write();
        *closed = true;
        self.queue.len()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.read()
    }

    /// Remove up to `max` entries, oldest first.
    pub fn take_batch(&self, max: usize) -> Vec<LogEntry> {
        let mut batch = Vec::with_capacity(max.min(self.queue.len()));
        while batch.len() < max {
            match self.queue.pop() {
                Some(entry) => batch.push(entry),
                None => break,
            }
        }
        batch
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LogLevel;

    fn entry(message: &str) -> LogEntry {
        LogEntry::new(LogLevel::Info, "api", message)
    }

    #[test]
    fn test_offer_reports_depth() {
        let buffer = LogBuffer::new(100);

        assert_eq!(buffer.offer(entry("a")), Offer::Accepted { pending: 1 });
        assert_eq!(buffer.offer(entry("b")), Offer::Accepted { pending: 2 });
        assert_eq!(buffer.accepted(), 2);
        assert_eq!(buffer.dropped(), 0);
    }

    #[test]
    fn test_full_buffer_drops_and_counts() {
        let buffer = LogBuffer::new(2);

        assert!(buffer.offer(entry("a")).is_accepted());
        assert!(buffer.offer(entry("b")).is_accepted());
        assert_eq!(buffer.offer(entry("c")), Offer::Full);
        assert_eq!(buffer.accepted(), 2);
        assert_eq!(buffer.dropped(), 1);

        // the queued entries are untouched
        let kept: Vec<String> = buffer.take_batch(10).into_iter().map(|e| e.message).collect();
        assert_eq!(kept, vec!["a", "b"]);
    }

    #[test]
    fn test_closed_buffer_refuses_but_keeps_backlog() {
        let buffer = LogBuffer::new(10);
        buffer.offer(entry("queued"));

        assert_eq!(buffer.close(), 1);
        assert!(buffer.is_closed());
        assert_eq!(buffer.offer(entry("late")), Offer::Closed);
        assert_eq!(buffer.dropped(), 1);

        let backlog = buffer.take_batch(10);
        assert_eq!(backlog.len(), 1);
        assert_eq!(backlog[0].message, "queued");
    }

    #[test]
    fn test_take_batch_preserves_order() {
        let buffer = LogBuffer::new(100);
        for i in 0..50 {
            buffer.offer(entry(&i.to_string()));
        }

        let batch = buffer.take_batch(20);
        assert_eq!(batch.len(), 20);
        assert_eq!(batch[0].message, "0");
        assert_eq!(batch[19].message, "19");
        assert_eq!(buffer.len(), 30);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let buffer = LogBuffer::new(0);
        assert_eq!(buffer.capacity(), 1);
        assert!(buffer.offer(entry("only")).is_accepted());
        assert_eq!(buffer.offer(entry("extra")), Offer::Full);
    }
}
