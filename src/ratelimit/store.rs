use super::policy::RateLimitPolicy;
use crate::clock::Clock;
use crate::error::GuardError;
use crate::sweeper;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

/// Result of one atomic refill-and-consume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketOutcome {
    pub allowed: bool,
    /// Tokens left after the call (fractional).
    pub tokens_remaining: f64,
}

/// Shared token-bucket store.
///
/// `try_consume` must be a single atomic round trip: refill by elapsed time,
/// cap at capacity, take one token if at least one is available. A network
/// backed implementation maps this onto a server-side script or CAS loop so
/// that every gateway instance sees the same bucket.
#[async_trait]
pub trait BucketStore: Send + Sync {
    async fn try_consume(
        &self,
        key: &str,
        policy: &RateLimitPolicy,
        now_ms: u64,
    ) -> Result<BucketOutcome, GuardError>;

    /// Human-readable backend name for logs.
    fn name(&self) -> &'static str;
}

/// In-process store. Each key holds an async mutex so that concurrent callers
/// on the same key serialize their refill-and-consume.
///
/// **GC**: buckets carry a TTL of `window_seconds + ttl_slack` refreshed on
/// every access. A background sweep drops expired buckets and, past
/// `max_buckets`, force-evicts the least recently used ones.
pub struct MemoryBucketStore {
    buckets: DashMap<String, Arc<Bucket>>,
    ttl_slack_ms: u64,
    max_buckets: usize,
    clock: Arc<dyn Clock>,
}

struct Bucket {
    inner: Mutex<BucketState>,
    /// Wall-clock ms after which the bucket may be evicted. Updated outside the lock.
    expires_at: AtomicU64,
    last_access: AtomicU64,
}

struct BucketState {
    tokens: f64,
    last_refill_ms: u64,
}

impl MemoryBucketStore {
    pub fn new(ttl_slack_secs: u64, max_buckets: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            buckets: DashMap::new(),
            ttl_slack_ms: ttl_slack_secs.saturating_mul(1000),
            max_buckets: max_buckets.max(1),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Spawn the periodic eviction loop. Stops when `shutdown` is notified.
    pub fn start_gc(self: &Arc<Self>, every: Duration, shutdown: Arc<Notify>) -> JoinHandle<()> {
        let store = Arc::clone(self);
        sweeper::spawn_periodic("rate_limit: store gc", every, shutdown, move || {
            store.evict_stale()
        })
    }

    /// Remove expired buckets, then enforce the entry cap oldest first.
    pub fn evict_stale(&self) {
        let now = self.clock.now_ms();
        let before = self.buckets.len();

        self.buckets
            .retain(|_, b| b.expires_at.load(Ordering::Relaxed) > now);

        if self.buckets.len() > self.max_buckets {
            self.force_evict(now);
        }

        let after = self.buckets.len();
        if before != after {
            tracing::debug!(
                "rate_limit: store gc, evicted={}, remaining={}",
                before - after,
                after
            );
        }
        metrics::gauge!("guard_rate_limit_buckets").set(after as f64);
    }

    fn force_evict(&self, now: u64) {
        let overflow = self.buckets.len().saturating_sub(self.max_buckets);
        if overflow == 0 {
            return;
        }
        let mut entries: Vec<(String, u64)> = self
            .buckets
            .iter()
            .map(|r| {
                let age = now.saturating_sub(r.value().last_access.load(Ordering::Relaxed));
                (r.key().clone(), age)
            })
            .collect();
        entries.sort_unstable_by(|a, b| b.1.cmp(&a.1));
        for (key, _) in entries.into_iter().take(overflow) {
            self.buckets.remove(&key);
        }
    }

    fn bucket(&self, key: &str, capacity: f64, now_ms: u64) -> Arc<Bucket> {
        // Fast path: key already exists, no allocation.
        if let Some(entry) = self.buckets.get(key) {
            return entry.value().clone();
        }
        self.buckets
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(Bucket {
                    inner: Mutex::new(BucketState {
                        tokens: capacity,
                        last_refill_ms: now_ms,
                    }),
                    expires_at: AtomicU64::new(now_ms),
                    last_access: AtomicU64::new(now_ms),
                })
            })
            .clone()
    }
}

#[async_trait]
impl BucketStore for MemoryBucketStore {
    async fn try_consume(
        &self,
        key: &str,
        policy: &RateLimitPolicy,
        now_ms: u64,
    ) -> Result<BucketOutcome, GuardError> {
        let capacity = policy.capacity as f64;
        let bucket = self.bucket(key, capacity, now_ms);

        let ttl_ms = policy
            .window_seconds
            .saturating_mul(1000)
            .saturating_add(self.ttl_slack_ms);
        bucket
            .expires_at
            .store(now_ms.saturating_add(ttl_ms), Ordering::Relaxed);
        bucket.last_access.store(now_ms, Ordering::Relaxed);

        let mut state = bucket.inner.lock().await;
        Ok(state.refill_and_consume(capacity, policy.refill_rate_per_second, now_ms))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

impl BucketState {
    fn refill_and_consume(&mut self, capacity: f64, rate_per_sec: f64, now_ms: u64) -> BucketOutcome {
        // A caller whose clock lags the last writer refills nothing and must
        // not drag the refill timestamp backwards.
        let elapsed_ms = now_ms.saturating_sub(self.last_refill_ms);
        if elapsed_ms > 0 {
            let refill = elapsed_ms as f64 / 1000.0 * rate_per_sec;
            self.tokens = (self.tokens + refill).min(capacity);
            self.last_refill_ms = now_ms;
        }
        // Policy may have shrunk since the bucket was created.
        self.tokens = self.tokens.min(capacity);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            BucketOutcome {
                allowed: true,
                tokens_remaining: self.tokens,
            }
        } else {
            BucketOutcome {
                allowed: false,
                tokens_remaining: self.tokens,
            }
        }
    }
}
