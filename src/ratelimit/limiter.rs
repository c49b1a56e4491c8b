use super::policy::{PolicyTable, RateLimitPolicy};
use super::store::BucketStore;
use crate::clock::Clock;
use crate::config::FailMode;
use crate::error::GuardError;
use crate::identity::{EndpointCategory, KeyType, RateLimitKey, Resolution};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of a rate-limit check, with the metadata the rejection and the
/// `x-ratelimit-*` headers are built from.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub key_type: KeyType,
    /// Bucket capacity of the deciding policy.
    pub limit: u32,
    /// Whole tokens left.
    pub remaining: u32,
    /// Wall-clock ms at which the bucket is full again.
    pub reset_at_ms: u64,
    /// Seconds until at least one token is available. Zero when allowed.
    pub retry_after_secs: u64,
    /// The store failed and the category fail mode decided.
    pub degraded: bool,
}

impl RateLimitDecision {
    pub fn reset_at_secs(&self) -> u64 {
        self.reset_at_ms.div_ceil(1000)
    }
}

/// Token-bucket limiter over a shared [`BucketStore`].
///
/// Each store call is bounded by `store_timeout`. When the store errors or
/// times out, the category's [`FailMode`] decides: `Open` admits unmetered,
/// `Closed` denies.
pub struct RateLimiter {
    store: Arc<dyn BucketStore>,
    policies: PolicyTable,
    store_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn BucketStore>,
        policies: PolicyTable,
        store_timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            policies,
            store_timeout,
            clock,
        }
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    /// Check every bucket the category gates on, short-circuiting on the
    /// first denial. Dual-gated categories check the user bucket, then the IP
    /// bucket. Catalog traffic is keyed on IP only. Everything else uses the
    /// user bucket for authenticated callers and the IP bucket otherwise.
    pub async fn check_request(&self, resolution: &Resolution) -> RateLimitDecision {
        let category = resolution.category;
        let both = [&resolution.user_key, &resolution.ip_key];
        let gates: &[&RateLimitKey] = if category.is_dual_gated() {
            &both
        } else if category == EndpointCategory::PublicCatalog || !resolution.authenticated() {
            &both[1..]
        } else {
            &both[..1]
        };

        let mut tightest: Option<RateLimitDecision> = None;
        for key in gates {
            let policy = self.policies.policy(category, key.key_type());
            let decision = self.check(key, &policy).await;
            if !decision.allowed {
                return decision;
            }
            tightest = match tightest {
                Some(prev) if prev.remaining <= decision.remaining => Some(prev),
                _ => Some(decision),
            };
        }
        // `gates` is never empty.
        tightest.unwrap_or_else(|| self.unmetered(category, KeyType::Ip))
    }

    /// Refill-and-consume one token from `key`'s bucket.
    pub async fn check(&self, key: &RateLimitKey, policy: &RateLimitPolicy) -> RateLimitDecision {
        let category = key.category();
        let now = self.clock.now_ms();

        if policy.capacity == 0 {
            let decision = self.denied(key.key_type(), policy, 0.0, now);
            record(category, key.key_type(), false);
            return decision;
        }

        let result = match tokio::time::timeout(
            self.store_timeout,
            self.store.try_consume(key.as_str(), policy, now),
        )
        .await
        {
            Ok(r) => r,
            Err(_) => Err(GuardError::StoreTimeout),
        };

        match result {
            Ok(outcome) => {
                record(category, key.key_type(), outcome.allowed);
                if outcome.allowed {
                    RateLimitDecision {
                        allowed: true,
                        key_type: key.key_type(),
                        limit: policy.capacity,
                        remaining: outcome.tokens_remaining.floor().max(0.0) as u32,
                        reset_at_ms: now + ms_until_full(policy, outcome.tokens_remaining),
                        retry_after_secs: 0,
                        degraded: false,
                    }
                } else {
                    tracing::debug!(
                        "rate_limit: rejected, key={}, tokens={:.3}",
                        key,
                        outcome.tokens_remaining
                    );
                    self.denied(key.key_type(), policy, outcome.tokens_remaining, now)
                }
            }
            Err(e) => self.on_store_failure(key, policy, now, e),
        }
    }

    fn on_store_failure(
        &self,
        key: &RateLimitKey,
        policy: &RateLimitPolicy,
        now: u64,
        err: GuardError,
    ) -> RateLimitDecision {
        let category = key.category();
        let mode = self.policies.fail_mode(category);
        let mode_label = match mode {
            FailMode::Open => "open",
            FailMode::Closed => "closed",
        };
        tracing::warn!(
            "rate_limit: store failure, backend={}, category={}, fail_mode={}, error={}",
            self.store.name(),
            category,
            mode_label,
            err
        );
        metrics::counter!(
            "guard_rate_limit_store_errors_total",
            "category" => category.as_str(),
            "fail_mode" => mode_label,
        )
        .increment(1);

        match mode {
            FailMode::Open => RateLimitDecision {
                degraded: true,
                ..self.unmetered(category, key.key_type())
            },
            FailMode::Closed => RateLimitDecision {
                allowed: false,
                key_type: key.key_type(),
                limit: policy.capacity,
                remaining: 0,
                reset_at_ms: now + 1000,
                retry_after_secs: 1,
                degraded: true,
            },
        }
    }

    fn unmetered(&self, category: EndpointCategory, key_type: KeyType) -> RateLimitDecision {
        let policy = self.policies.policy(category, key_type);
        RateLimitDecision {
            allowed: true,
            key_type,
            limit: policy.capacity,
            remaining: policy.capacity,
            reset_at_ms: self.clock.now_ms(),
            retry_after_secs: 0,
            degraded: false,
        }
    }

    fn denied(
        &self,
        key_type: KeyType,
        policy: &RateLimitPolicy,
        tokens: f64,
        now: u64,
    ) -> RateLimitDecision {
        RateLimitDecision {
            allowed: false,
            key_type,
            limit: policy.capacity,
            remaining: 0,
            reset_at_ms: now + ms_until_full(policy, tokens),
            retry_after_secs: secs_until_token(policy, tokens),
            degraded: false,
        }
    }
}

fn record(category: EndpointCategory, key_type: KeyType, allowed: bool) {
    let name = if allowed {
        "guard_rate_limit_allowed_total"
    } else {
        "guard_rate_limit_rejected_total"
    };
    metrics::counter!(
        name,
        "category" => category.as_str(),
        "key_type" => key_type.as_str(),
    )
    .increment(1);
}

/// Time until the bucket is back at capacity. Without refill, the window.
fn ms_until_full(policy: &RateLimitPolicy, tokens: f64) -> u64 {
    let missing = (policy.capacity as f64 - tokens).max(0.0);
    if missing == 0.0 {
        return 0;
    }
    if policy.refill_rate_per_second <= 0.0 {
        return policy.window_seconds.saturating_mul(1000);
    }
    (missing / policy.refill_rate_per_second * 1000.0).ceil() as u64
}

/// Whole seconds until one token is available, at least 1.
fn secs_until_token(policy: &RateLimitPolicy, tokens: f64) -> u64 {
    if policy.capacity == 0 || policy.refill_rate_per_second <= 0.0 {
        return policy.window_seconds.max(1);
    }
    let missing = (1.0 - tokens).max(0.0);
    ((missing / policy.refill_rate_per_second).ceil() as u64).max(1)
}
