//! Log flush task - moves audit entries from the queue to the database

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::db::AuditStore;
use crate::log_writer::LogQueue;

/// Upper bound on a single batch insert
const INSERT_TIMEOUT: Duration = Duration::from_secs(5);

/// Background task that drains the log queue into the audit store.
///
/// Flushes as soon as a full batch is waiting, and flushes whatever is
/// pending on every interval tick. On shutdown it drains the queue
/// completely and returns.
pub(crate) async fn log_flush_task(queue: Arc<LogQueue>, store: Arc<dyn AuditStore>) {
    let mut interval = tokio::time::interval(queue.flush_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        batch_size = queue.batch_size,
        interval_ms = queue.flush_interval.as_millis() as u64,
        "Log flush task started"
    );

    loop {
        tokio::select! {
            biased;

            _ = queue.shutdown.notified() => {
                let drained = drain(&queue, store.as_ref()).await;
                info!(drained = drained, "Log flush task stopped");
                return;
            }
            _ = queue.batch_ready.notified() => {
                while queue.buffer.len() >= queue.batch_size {
                    flush_batch(&queue, store.as_ref()).await;
                }
            }
            _ = interval.tick() => {
                drain(&queue, store.as_ref()).await;
            }
        }
    }
}

/// Flush until the queue is empty, returning the number of entries taken.
async fn drain(queue: &LogQueue, store: &dyn AuditStore) -> usize {
    let mut total = 0;
    loop {
        let taken = flush_batch(queue, store).await;
        if taken == 0 {
            return total;
        }
        total += taken;
    }
}

/// Pop up to one batch and persist it. A failed batch is counted and
/// discarded.
async fn flush_batch(queue: &LogQueue, store: &dyn AuditStore) -> usize {
    let batch = queue.buffer.take_batch(queue.batch_size);
    if batch.is_empty() {
        return 0;
    }

    let batch_size = batch.len();
    debug!(batch_size = batch_size, "Flushing log batch");

    let counters = &queue.counters;
    match tokio::time::timeout(INSERT_TIMEOUT, store.insert_logs(&batch)).await {
        Ok(Ok(inserted)) => {
            counters.persisted.fetch_add(inserted as u64, Ordering::Relaxed);
            if inserted < batch_size {
                counters
                    .failed
                    .fetch_add((batch_size - inserted) as u64, Ordering::Relaxed);
                warn!(
                    inserted = inserted,
                    expected = batch_size,
                    "Some log entries failed to insert"
                );
            }
        }
        Ok(Err(e)) => {
            counters.failed.fetch_add(batch_size as u64, Ordering::Relaxed);
            error!(error = %e, batch_size = batch_size, "Failed to insert log batch");
        }
        Err(_) => {
            counters.failed.fetch_add(batch_size as u64, Ordering::Relaxed);
            error!(batch_size = batch_size, "Timed out inserting log batch");
        }
    }

    batch_size
}
