//! Result cache for alt-text outcomes.
//!
//! [`ResultCache`] maps an image [`Fingerprint`] to the last
//! [`CachedOutcome`] produced for it. Successful generations are kept much
//! longer than failures so that transient provider errors are retried once
//! the short failure TTL has passed.
//!
//! The cache is optional. When the backing store could not be reached at
//! start-up the service runs with a disabled cache: every lookup reports
//! [`CacheError::Unavailable`] and every write is a no-op. Callers treat
//! any error as a miss.
//!
//! Every backend call is bounded by the operation timeout, so a backend that
//! stops answering surfaces as [`CacheError::Backend`] instead of stalling
//! the request.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use thiserror::Error;
use tokio::time::Instant;
use tracing::info;

use crate::hasher::Fingerprint;
use crate::models::CachedOutcome;

/// Time allowed for the initial connection and PING
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on a single get, set or ping once connected
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum CacheError {
    /// No backend configured or reachable
    #[error("cache unavailable")]
    Unavailable,

    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("cache codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Backend(err.to_string())
    }
}

/// Raw key-value store with per-key expiry.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get_raw(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set_raw_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}

/// Redis-backed cache store
#[derive(Clone)]
pub struct RedisBackend {
    conn: ConnectionManager,
}

impl RedisBackend {
    /// Connect and verify the server answers PING within 5 seconds.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = tokio::time::timeout(CONNECT_TIMEOUT, ConnectionManager::new(client))
            .await
            .map_err(|_| CacheError::Backend("timed out connecting to redis".into()))??;

        let backend = Self { conn };
        tokio::time::timeout(CONNECT_TIMEOUT, backend.ping())
            .await
            .map_err(|_| CacheError::Backend("timed out waiting for PING".into()))??;

        info!("Redis connection established");
        Ok(backend)
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get_raw(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        let value = redis::cmd("GET")
            .arg(key)
            .query_async::<_, Option<String>>(&mut conn)
            .await?;
        Ok(value)
    }

    async fn set_raw_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await?;
        Ok(())
    }
}

/// Process-local store with lazy expiry. Follows the tokio clock so tests
/// can advance time.
#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included until next access.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get_raw(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            Some((value, expires_at)) if *expires_at > Instant::now() => {
                return Ok(Some(value.clone()));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set_raw_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.entries
            .lock()
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Retention for cached outcomes
#[derive(Debug, Clone, Copy)]
pub struct CacheTtl {
    pub success: Duration,
    pub failure: Duration,
}

impl Default for CacheTtl {
    fn default() -> Self {
        Self {
            success: Duration::from_secs(30 * 24 * 60 * 60),
            failure: Duration::from_secs(60 * 60),
        }
    }
}

/// Fingerprint → outcome cache, possibly disabled.
#[derive(Clone)]
pub struct ResultCache {
    backend: Option<Arc<dyn CacheBackend>>,
    ttl: CacheTtl,
    op_timeout: Duration,
}

impl ResultCache {
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: CacheTtl) -> Self {
        Self {
            backend: Some(backend),
            ttl,
            op_timeout: DEFAULT_OP_TIMEOUT,
        }
    }

    /// A cache where every lookup misses and every write is dropped.
    pub fn disabled(ttl: CacheTtl) -> Self {
        Self {
            backend: None,
            ttl,
            op_timeout: DEFAULT_OP_TIMEOUT,
        }
    }

    /// Replace the per-operation time bound.
    pub fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    pub fn op_timeout(&self) -> Duration {
        self.op_timeout
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// Retention for an outcome, chosen by its success flag.
    pub fn ttl_for(&self, outcome: &CachedOutcome) -> Duration {
        if outcome.success {
            self.ttl.success
        } else {
            self.ttl.failure
        }
    }

    /// Look up the outcome for a fingerprint.
    ///
    /// `Ok(None)` is a plain miss; `Err(Unavailable)` means the cache is
    /// disabled.
    pub async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<CachedOutcome>, CacheError> {
        let backend = self.backend.as_ref().ok_or(CacheError::Unavailable)?;
        let key = fingerprint.cache_key();
        match self.bounded("GET", backend.get_raw(&key)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Store an outcome, replacing any previous one for the fingerprint.
    pub async fn put(
        &self,
        fingerprint: &Fingerprint,
        outcome: &CachedOutcome,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let backend = self.backend.as_ref().ok_or(CacheError::Unavailable)?;
        let raw = serde_json::to_string(outcome)?;
        let key = fingerprint.cache_key();
        self.bounded("SET", backend.set_raw_ex(&key, raw, ttl)).await
    }

    pub async fn ping(&self) -> Result<(), CacheError> {
        match &self.backend {
            Some(backend) => self.bounded("PING", backend.ping()).await,
            None => Err(CacheError::Unavailable),
        }
    }

    async fn bounded<T, F>(&self, op: &str, fut: F) -> Result<T, CacheError>
    where
        F: std::future::Future<Output = Result<T, CacheError>>,
    {
        tokio::time::timeout(self.op_timeout, fut)
            .await
            .map_err(|_| CacheError::Backend(format!("{} timed out after {:?}", op, self.op_timeout)))?
    }
}
