//! Asynchronous batched writer for audit log entries.
//!
//! Request handlers call [`LogWriter::log`], which only pushes onto a
//! bounded lock-free queue. A background worker
//! ([`log_flush_task`](crate::tasks::log_flush::log_flush_task)) drains the
//! queue into the [`AuditStore`] in batches, either when a full batch is
//! waiting or when the flush interval elapses.
//!
//! Entries that arrive while the queue is full are dropped and counted.
//! [`LogWriter::shutdown`] stops intake and flushes everything that was
//! already accepted before returning.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use crate::buffer::{LogBuffer, Offer};
use crate::db::AuditStore;
use crate::models::{LogEntry, LogLevel};
use crate::tasks::log_flush::log_flush_task;

/// Tuning for the log writer
#[derive(Debug, Clone)]
pub struct LogWriterConfig {
    pub queue_capacity: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
}

impl Default for LogWriterConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            batch_size: 100,
            flush_interval: Duration::from_millis(500),
        }
    }
}

/// Write-side counters; intake is counted by the buffer
#[derive(Default)]
pub(crate) struct Counters {
    pub persisted: AtomicU64,
    pub failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LogWriterStats {
    pub accepted: u64,
    pub dropped: u64,
    pub persisted: u64,
    pub failed: u64,
    pub queued: u64,
}

/// State shared between producers and the flush worker
pub(crate) struct LogQueue {
    pub buffer: LogBuffer,
    pub batch_size: usize,
    pub flush_interval: Duration,
    /// Wakes the worker once a full batch is waiting
    pub batch_ready: Notify,
    /// Tells the worker to drain and exit
    pub shutdown: Notify,
    pub counters: Counters,
}

/// Cheap-to-clone handle onto the log queue
#[derive(Clone)]
pub struct LogWriter {
    queue: Arc<LogQueue>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl LogWriter {
    /// Create the queue and spawn its flush worker on the current runtime.
    pub fn start(store: Arc<dyn AuditStore>, config: LogWriterConfig) -> Self {
        let queue = Arc::new(LogQueue {
            buffer: LogBuffer::new(config.queue_capacity),
            batch_size: config.batch_size.max(1),
            flush_interval: config.flush_interval.max(Duration::from_millis(1)),
            batch_ready: Notify::new(),
            shutdown: Notify::new(),
            counters: Counters::default(),
        });

        let worker = tokio::spawn(log_flush_task(Arc::clone(&queue), store));

        Self {
            queue,
            worker: Arc::new(Mutex::new(Some(worker))),
        }
    }

    /// Enqueue an entry without blocking.
    ///
    /// Returns `false` if the entry was dropped (queue full or writer shut down).
    pub fn log(&self, entry: LogEntry) -> bool {
        match self.queue.buffer.offer(entry) {
            Offer::Accepted { pending } => {
                if pending >= self.queue.batch_size {
                    self.queue.batch_ready.notify_one();
                }
                true
            }
            Offer::Full | Offer::Closed => false,
        }
    }

    pub fn info(&self, service: &str, message: impl Into<String>) -> bool {
        self.log(LogEntry::new(LogLevel::Info, service, message))
    }

    pub fn warning(&self, service: &str, message: impl Into<String>) -> bool {
        self.log(LogEntry::new(LogLevel::Warning, service, message))
    }

    pub fn error(&self, service: &str, message: impl Into<String>) -> bool {
        self.log(LogEntry::new(LogLevel::Error, service, message))
    }

    /// Stop accepting entries, flush everything queued and wait for the
    /// worker to exit. Safe to call more than once.
    pub async fn shutdown(&self) {
        let pending = self.queue.buffer.close();
        tracing::debug!(pending = pending, "Log intake closed");
        self.queue.shutdown.notify_one();

        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Log flush worker panicked");
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.queue.buffer.is_closed()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.buffer.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.buffer.capacity()
    }

    pub fn stats(&self) -> LogWriterStats {
        let buffer = &self.queue.buffer;
        let counters = &self.queue.counters;
        LogWriterStats {
            accepted: buffer.accepted(),
            dropped: buffer.dropped(),
            persisted: counters.persisted.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            queued: buffer.len() as u64,
        }
    }
}
