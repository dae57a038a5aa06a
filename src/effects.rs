//! Best-effort background work attached to a request.
//!
//! Cache writes, tracking rows and audit entries run on their own tasks so
//! they survive the request being cancelled. Each one is bounded by a
//! timeout. Handlers detach the handles; tests await them to observe what
//! happened.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::warn;

/// Upper bound on any single side effect
pub const EFFECT_TIMEOUT: Duration = Duration::from_secs(5);

/// What became of one side effect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectStatus {
    Done,
    /// Nothing to do, e.g. the cache is disabled
    Skipped,
    Failed(String),
    TimedOut,
}

/// Handles onto the side effects spawned for one request
#[derive(Debug, Default)]
pub struct SideEffects {
    handles: Vec<(&'static str, JoinHandle<EffectStatus>)>,
}

impl SideEffects {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `fut` on the runtime, independent of the caller's lifetime.
    pub fn spawn<F>(&mut self, name: &'static str, fut: F)
    where
        F: Future<Output = EffectStatus> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            match tokio::time::timeout(EFFECT_TIMEOUT, fut).await {
                Ok(status) => {
                    if let EffectStatus::Failed(reason) = &status {
                        warn!(effect = name, reason = %reason, "Side effect failed");
                    }
                    status
                }
                Err(_) => {
                    warn!(effect = name, "Side effect timed out");
                    EffectStatus::TimedOut
                }
            }
        });
        self.handles.push((name, handle));
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Let the effects run to completion on their own.
    pub fn detach(self) {
        drop(self.handles);
    }

    /// Wait for every effect and report its status by name.
    pub async fn join(self) -> Vec<(&'static str, EffectStatus)> {
        let mut statuses = Vec::with_capacity(self.handles.len());
        for (name, handle) in self.handles {
            let status = match handle.await {
                Ok(status) => status,
                Err(e) => EffectStatus::Failed(e.to_string()),
            };
            statuses.push((name, status));
        }
        statuses
    }
}
