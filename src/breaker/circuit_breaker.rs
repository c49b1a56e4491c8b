use crate::clock::Clock;
use crate::config::CircuitBreakerConfig;
use crate::events::{EventSink, GuardEvent};
use crate::identity::EndpointCategory;
use crate::sweeper;
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

impl BreakerState {
    fn from_u8(v: u8) -> Self {
        match v {
            STATE_OPEN => BreakerState::Open,
            STATE_HALF_OPEN => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Circuit breaker state machine: Closed → Open → HalfOpen → Closed/Open.
///
/// Per-category granularity. A failure is a rate-limit rejection observed in
/// the category; once `failure_threshold` of them arrive without an
/// intervening success the category fails fast locally until
/// `recovery_timeout` has passed since the last failure.
///
/// State lives in this process only. Replicas each form their own view.
pub struct CircuitBreakerRegistry {
    breakers: DashMap<EndpointCategory, Arc<CategoryBreaker>>,
    failure_threshold: u32,
    recovery_ms: u64,
    idle_ms: u64,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
}

struct CategoryBreaker {
    state: AtomicU8,
    failure_count: AtomicU32,
    success_count: AtomicU32,
    last_failure_ms: AtomicU64,
    last_activity_ms: AtomicU64,
}

/// Read-only view for the admin listener.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub category: EndpointCategory,
    pub state: BreakerState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_ms: u64,
}

impl CircuitBreakerRegistry {
    pub fn new(
        config: &CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            breakers: DashMap::new(),
            failure_threshold: config.failure_threshold.max(1),
            recovery_ms: config.recovery_timeout_secs.saturating_mul(1000),
            idle_ms: config.idle_secs.saturating_mul(1000),
            clock,
            events,
        }
    }

    /// Whether the category may proceed to the rate limiter. Open breakers
    /// whose recovery timeout has elapsed move to HalfOpen here and admit the
    /// request as a trial.
    pub fn allow(&self, category: EndpointCategory) -> bool {
        let Some(breaker) = self.get(category) else {
            return true;
        };
        let now = self.clock.now_ms();
        breaker.last_activity_ms.store(now, Ordering::Relaxed);

        match breaker.state.load(Ordering::Acquire) {
            STATE_OPEN => {
                let since = now.saturating_sub(breaker.last_failure_ms.load(Ordering::Acquire));
                if since < self.recovery_ms {
                    metrics::counter!(
                        "guard_circuit_breaker_rejected_total",
                        "category" => category.as_str(),
                    )
                    .increment(1);
                    return false;
                }
                if self.transition(&breaker, category, STATE_OPEN, STATE_HALF_OPEN) {
                    breaker.success_count.store(0, Ordering::Relaxed);
                    tracing::info!(
                        "circuit_breaker: half-open (category={}, {}ms since last failure)",
                        category,
                        since
                    );
                    return true;
                }
                // Lost the race: someone else moved it. Admit unless it re-opened.
                breaker.state.load(Ordering::Acquire) != STATE_OPEN
            }
            _ => true,
        }
    }

    /// Record an admission by the rate limiter.
    pub fn record_success(&self, category: EndpointCategory) {
        let Some(breaker) = self.get(category) else {
            return;
        };
        breaker
            .last_activity_ms
            .store(self.clock.now_ms(), Ordering::Relaxed);

        match breaker.state.load(Ordering::Acquire) {
            STATE_CLOSED => {
                breaker.failure_count.store(0, Ordering::Relaxed);
                breaker.success_count.fetch_add(1, Ordering::Relaxed);
            }
            STATE_HALF_OPEN => {
                if self.transition(&breaker, category, STATE_HALF_OPEN, STATE_CLOSED) {
                    breaker.failure_count.store(0, Ordering::Relaxed);
                    breaker.success_count.store(1, Ordering::Relaxed);
                    tracing::info!("circuit_breaker: closed (category={}, trial succeeded)", category);
                }
            }
            _ => {}
        }
    }

    /// Record a rate-limit rejection.
    pub fn record_failure(&self, category: EndpointCategory) {
        let breaker = self.get_or_create(category);
        let now = self.clock.now_ms();
        breaker.last_activity_ms.store(now, Ordering::Relaxed);
        // Publish the timestamp before any state flip so readers of Open
        // never see a stale failure time.
        breaker.last_failure_ms.store(now, Ordering::Release);
        let count = breaker.failure_count.fetch_add(1, Ordering::AcqRel) + 1;

        match breaker.state.load(Ordering::Acquire) {
            STATE_CLOSED => {
                if count >= self.failure_threshold
                    && self.transition(&breaker, category, STATE_CLOSED, STATE_OPEN)
                {
                    tracing::warn!(
                        "circuit_breaker: opened (category={}, after {} consecutive failures)",
                        category,
                        count
                    );
                }
            }
            STATE_HALF_OPEN => {
                if self.transition(&breaker, category, STATE_HALF_OPEN, STATE_OPEN) {
                    breaker.success_count.store(0, Ordering::Relaxed);
                    tracing::warn!(
                        "circuit_breaker: re-opened (category={}, trial failed in half-open)",
                        category
                    );
                }
            }
            // Already open: the fresh timestamp extends the cool-down.
            _ => {}
        }
    }

    pub fn state(&self, category: EndpointCategory) -> BreakerState {
        self.get(category)
            .map(|b| BreakerState::from_u8(b.state.load(Ordering::Acquire)))
            .unwrap_or(BreakerState::Closed)
    }

    /// Milliseconds until an open breaker admits a trial; zero when not open.
    pub fn recovery_remaining_ms(&self, category: EndpointCategory) -> u64 {
        let Some(breaker) = self.get(category) else {
            return 0;
        };
        if breaker.state.load(Ordering::Acquire) != STATE_OPEN {
            return 0;
        }
        let since = self
            .clock
            .now_ms()
            .saturating_sub(breaker.last_failure_ms.load(Ordering::Acquire));
        self.recovery_ms.saturating_sub(since)
    }

    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let mut out: Vec<BreakerSnapshot> = self
            .breakers
            .iter()
            .map(|r| {
                let b = r.value();
                BreakerSnapshot {
                    category: *r.key(),
                    state: BreakerState::from_u8(b.state.load(Ordering::Acquire)),
                    failure_count: b.failure_count.load(Ordering::Relaxed),
                    success_count: b.success_count.load(Ordering::Relaxed),
                    last_failure_ms: b.last_failure_ms.load(Ordering::Relaxed),
                }
            })
            .collect();
        out.sort_unstable_by_key(|s| s.category.as_str());
        out
    }

    /// Drop closed breakers with no pending failures that have been idle
    /// longer than the configured idle period.
    pub fn sweep_idle(&self) {
        let now = self.clock.now_ms();
        let idle_ms = self.idle_ms;
        self.breakers.retain(|_, b| {
            b.state.load(Ordering::Acquire) != STATE_CLOSED
                || b.failure_count.load(Ordering::Relaxed) > 0
                || now.saturating_sub(b.last_activity_ms.load(Ordering::Relaxed)) < idle_ms
        });
    }

    /// Spawn the periodic idle sweep. Stops when `shutdown` is notified.
    pub fn start_sweeper(self: &Arc<Self>, every: Duration, shutdown: Arc<Notify>) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        sweeper::spawn_periodic("circuit_breaker: sweeper", every, shutdown, move || {
            registry.sweep_idle()
        })
    }

    /// Single CAS per transition. Emits the event only for the winner.
    fn transition(
        &self,
        breaker: &CategoryBreaker,
        category: EndpointCategory,
        from: u8,
        to: u8,
    ) -> bool {
        let won = breaker
            .state
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            self.events.emit(GuardEvent::BreakerTransition {
                category,
                from: BreakerState::from_u8(from),
                to: BreakerState::from_u8(to),
            });
        }
        won
    }

    fn get(&self, category: EndpointCategory) -> Option<Arc<CategoryBreaker>> {
        self.breakers.get(&category).map(|e| e.value().clone())
    }

    fn get_or_create(&self, category: EndpointCategory) -> Arc<CategoryBreaker> {
        if let Some(entry) = self.breakers.get(&category) {
            return entry.value().clone();
        }
        self.breakers
            .entry(category)
            .or_insert_with(|| {
                Arc::new(CategoryBreaker {
                    state: AtomicU8::new(STATE_CLOSED),
                    failure_count: AtomicU32::new(0),
                    success_count: AtomicU32::new(0),
                    last_failure_ms: AtomicU64::new(0),
                    last_activity_ms: AtomicU64::new(self.clock.now_ms()),
                })
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::events::RecordingSink;

    const ORDERS: EndpointCategory = EndpointCategory::Orders;

    fn registry(threshold: u32, recovery_secs: u64) -> (CircuitBreakerRegistry, Arc<ManualClock>, Arc<RecordingSink>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let sink = Arc::new(RecordingSink::new());
        let cfg = CircuitBreakerConfig {
            failure_threshold: threshold,
            recovery_timeout_secs: recovery_secs,
            sweep_interval_secs: 60,
            idle_secs: 300,
        };
        (CircuitBreakerRegistry::new(&cfg, clock.clone(), sink.clone()), clock, sink)
    }

    fn transitions(sink: &RecordingSink) -> Vec<(BreakerState, BreakerState)> {
        sink.events()
            .into_iter()
            .filter_map(|e| match e {
                GuardEvent::BreakerTransition { from, to, .. } => Some((from, to)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_starts_closed() {
        let (reg, _, _) = registry(3, 30);
        assert!(reg.allow(ORDERS));
        assert_eq!(reg.state(ORDERS), BreakerState::Closed);
    }

    #[test]
    fn test_trips_at_threshold() {
        let (reg, _, sink) = registry(3, 30);
        for _ in 0..2 {
            reg.record_failure(ORDERS);
            assert!(reg.allow(ORDERS));
        }
        reg.record_failure(ORDERS);
        assert_eq!(reg.state(ORDERS), BreakerState::Open);
        assert!(!reg.allow(ORDERS));
        assert_eq!(transitions(&sink), vec![(BreakerState::Closed, BreakerState::Open)]);
    }

    #[test]
    fn test_success_resets_failure_count() {
        let (reg, _, _) = registry(3, 30);
        reg.record_failure(ORDERS);
        reg.record_failure(ORDERS);
        reg.record_success(ORDERS);
        reg.record_failure(ORDERS);
        reg.record_failure(ORDERS);
        assert_eq!(reg.state(ORDERS), BreakerState::Closed);
        assert!(reg.allow(ORDERS));
    }

    #[test]
    fn test_never_half_opens_before_recovery() {
        let (reg, clock, _) = registry(1, 30);
        reg.record_failure(ORDERS);
        assert_eq!(reg.recovery_remaining_ms(ORDERS), 30_000);
        clock.advance_ms(29_999);
        assert!(!reg.allow(ORDERS));
        assert_eq!(reg.state(ORDERS), BreakerState::Open);
        assert_eq!(reg.recovery_remaining_ms(ORDERS), 1);

        clock.advance_ms(1);
        assert!(reg.allow(ORDERS));
        assert_eq!(reg.state(ORDERS), BreakerState::HalfOpen);
    }

    #[test]
    fn test_half_open_success_closes() {
        let (reg, clock, sink) = registry(2, 30);
        reg.record_failure(ORDERS);
        reg.record_failure(ORDERS);
        clock.advance_secs(31);
        assert!(reg.allow(ORDERS));
        reg.record_success(ORDERS);
        assert_eq!(reg.state(ORDERS), BreakerState::Closed);

        // Failure count was reset: one failure does not re-trip.
        reg.record_failure(ORDERS);
        assert_eq!(reg.state(ORDERS), BreakerState::Closed);

        assert_eq!(
            transitions(&sink),
            vec![
                (BreakerState::Closed, BreakerState::Open),
                (BreakerState::Open, BreakerState::HalfOpen),
                (BreakerState::HalfOpen, BreakerState::Closed),
            ]
        );
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let (reg, clock, sink) = registry(5, 30);
        for _ in 0..5 {
            reg.record_failure(ORDERS);
        }
        clock.advance_secs(30);
        assert!(reg.allow(ORDERS));
        reg.record_failure(ORDERS);
        assert_eq!(reg.state(ORDERS), BreakerState::Open);
        assert!(!reg.allow(ORDERS));

        // The cool-down restarts from the trial failure.
        clock.advance_secs(30);
        assert!(reg.allow(ORDERS));
        assert_eq!(
            transitions(&sink),
            vec![
                (BreakerState::Closed, BreakerState::Open),
                (BreakerState::Open, BreakerState::HalfOpen),
                (BreakerState::HalfOpen, BreakerState::Open),
                (BreakerState::Open, BreakerState::HalfOpen),
            ]
        );
    }

    #[test]
    fn test_categories_are_independent() {
        let (reg, _, _) = registry(1, 30);
        reg.record_failure(ORDERS);
        assert!(!reg.allow(ORDERS));
        assert!(reg.allow(EndpointCategory::Payments));
        assert!(reg.allow(EndpointCategory::Cart));
    }

    #[test]
    fn test_half_open_admits_all_trial_traffic() {
        let (reg, clock, sink) = registry(1, 10);
        reg.record_failure(ORDERS);
        clock.advance_secs(10);
        for _ in 0..5 {
            assert!(reg.allow(ORDERS));
        }
        // Only one Open -> HalfOpen transition is emitted.
        assert_eq!(transitions(&sink).len(), 2);
    }

    #[test]
    fn test_sweep_drops_only_idle_healthy_breakers() {
        let (reg, clock, _) = registry(2, 30);
        reg.record_failure(EndpointCategory::Cart);
        reg.record_success(EndpointCategory::Cart);
        reg.record_failure(ORDERS);
        reg.record_failure(ORDERS);

        clock.advance_secs(301);
        reg.sweep_idle();
        let snap = reg.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].category, ORDERS);
        assert_eq!(snap[0].state, BreakerState::Open);
        assert_eq!(snap[0].failure_count, 2);
    }

    #[test]
    fn test_concurrent_trip_emits_one_transition() {
        let (reg, _, sink) = registry(5, 30);
        let reg = Arc::new(reg);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = reg.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        reg.record_failure(ORDERS);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(reg.state(ORDERS), BreakerState::Open);
        assert_eq!(transitions(&sink), vec![(BreakerState::Closed, BreakerState::Open)]);
    }
}
