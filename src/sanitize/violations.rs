use crate::clock::Clock;
use crate::config::ViolationConfig;
use crate::events::{EventSink, GuardEvent};
use crate::sweeper;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Per-origin accumulator of detected threats.
///
/// An origin's count is rolling: once `window` has passed since its last
/// violation the entry is stale, stops counting toward a block, and is
/// removed by the next sweep. The map is capped; inserting past the cap
/// evicts the least recently active origins first.
pub struct ViolationTracker {
    entries: DashMap<String, Arc<ViolationEntry>>,
    window_ms: u64,
    max_violations: u32,
    max_entries: usize,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
}

struct ViolationEntry {
    violation_count: AtomicU32,
    total_threat_score: AtomicU64,
    last_violation_ms: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ViolationSnapshot {
    pub origin: String,
    pub violation_count: u32,
    pub total_threat_score: u64,
    pub last_violation_ms: u64,
    pub blocked: bool,
}

impl ViolationTracker {
    pub fn new(config: &ViolationConfig, clock: Arc<dyn Clock>, events: Arc<dyn EventSink>) -> Self {
        Self {
            entries: DashMap::new(),
            window_ms: config.window_secs.saturating_mul(1000),
            max_violations: config.max_violations_per_origin,
            max_entries: config.max_tracked_origins.max(1),
            clock,
            events,
        }
    }

    /// Whether the origin exceeded its allowance inside the current window.
    pub fn is_blocked(&self, origin: &str) -> bool {
        let Some(entry) = self.entries.get(origin) else {
            return false;
        };
        let now = self.clock.now_ms();
        self.is_live(&entry, now) && entry.violation_count.load(Ordering::Acquire) > self.max_violations
    }

    /// Count one violation against `origin`. Returns the rolling count.
    pub fn record(&self, origin: &str, threat_score: u32) -> u32 {
        let now = self.clock.now_ms();
        let entry = self.get_or_insert(origin, now);

        let last = entry.last_violation_ms.load(Ordering::Acquire);
        if now.saturating_sub(last) >= self.window_ms
            && entry
                .last_violation_ms
                .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            // Stale: this violation opens a new window.
            entry.violation_count.store(0, Ordering::Release);
            entry.total_threat_score.store(0, Ordering::Relaxed);
        } else {
            entry.last_violation_ms.fetch_max(now, Ordering::AcqRel);
        }

        entry
            .total_threat_score
            .fetch_add(threat_score as u64, Ordering::Relaxed);
        let count = entry.violation_count.fetch_add(1, Ordering::AcqRel) + 1;

        if count == self.max_violations.saturating_add(1) {
            self.events.emit(GuardEvent::OriginBlocked {
                origin: origin.to_string(),
                violations: count,
            });
        }
        count
    }

    pub fn violation_count(&self, origin: &str) -> u32 {
        let now = self.clock.now_ms();
        self.entries
            .get(origin)
            .filter(|e| self.is_live(e, now))
            .map(|e| e.violation_count.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop entries whose last violation is older than the window, then
    /// enforce the cap.
    pub fn sweep(&self) {
        let now = self.clock.now_ms();
        let before = self.entries.len();
        self.entries.retain(|_, e| self.is_live(e, now));
        if self.entries.len() > self.max_entries {
            self.evict_oldest(self.entries.len() - self.max_entries);
        }
        let after = self.entries.len();
        if before != after {
            tracing::debug!("violations: sweep, evicted={}, remaining={}", before - after, after);
        }
        metrics::gauge!("guard_violation_tracked_origins").set(after as f64);
    }

    /// Spawn the periodic sweep. Stops when `shutdown` is notified.
    pub fn start_sweeper(self: &Arc<Self>, every: Duration, shutdown: Arc<Notify>) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        sweeper::spawn_periodic("violations: sweeper", every, shutdown, move || tracker.sweep())
    }

    /// Most active origins first, at most `limit`.
    pub fn snapshot(&self, limit: usize) -> Vec<ViolationSnapshot> {
        let now = self.clock.now_ms();
        let mut out: Vec<ViolationSnapshot> = self
            .entries
            .iter()
            .filter(|r| self.is_live(r.value(), now))
            .map(|r| {
                let e = r.value();
                let count = e.violation_count.load(Ordering::Acquire);
                ViolationSnapshot {
                    origin: r.key().clone(),
                    violation_count: count,
                    total_threat_score: e.total_threat_score.load(Ordering::Relaxed),
                    last_violation_ms: e.last_violation_ms.load(Ordering::Relaxed),
                    blocked: count > self.max_violations,
                }
            })
            .collect();
        out.sort_unstable_by(|a, b| b.violation_count.cmp(&a.violation_count));
        out.truncate(limit);
        out
    }

    fn is_live(&self, entry: &ViolationEntry, now: u64) -> bool {
        now.saturating_sub(entry.last_violation_ms.load(Ordering::Acquire)) < self.window_ms
    }

    fn get_or_insert(&self, origin: &str, now: u64) -> Arc<ViolationEntry> {
        if let Some(entry) = self.entries.get(origin) {
            return entry.value().clone();
        }
        if self.entries.len() >= self.max_entries {
            // Free a tenth of the map at once so an attack spraying origins
            // does not pay a full scan per insert.
            let target = (self.max_entries / 10).max(1);
            self.evict_oldest(self.entries.len() + target - self.max_entries);
        }
        self.entries
            .entry(origin.to_string())
            .or_insert_with(|| {
                Arc::new(ViolationEntry {
                    violation_count: AtomicU32::new(0),
                    total_threat_score: AtomicU64::new(0),
                    last_violation_ms: AtomicU64::new(now),
                })
            })
            .clone()
    }

    fn evict_oldest(&self, count: usize) {
        if count == 0 {
            return;
        }
        let mut entries: Vec<(String, u64)> = self
            .entries
            .iter()
            .map(|r| (r.key().clone(), r.value().last_violation_ms.load(Ordering::Relaxed)))
            .collect();
        entries.sort_unstable_by_key(|(_, last)| *last);
        for (key, _) in entries.into_iter().take(count) {
            self.entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::events::RecordingSink;

    fn tracker(max_violations: u32, max_origins: usize) -> (ViolationTracker, Arc<ManualClock>, Arc<RecordingSink>) {
        let clock = Arc::new(ManualClock::new(5_000_000));
        let sink = Arc::new(RecordingSink::new());
        let cfg = ViolationConfig {
            window_secs: 300,
            max_violations_per_origin: max_violations,
            max_tracked_origins: max_origins,
            sweep_interval_secs: 60,
        };
        (ViolationTracker::new(&cfg, clock.clone(), sink.clone()), clock, sink)
    }

    #[test]
    fn test_blocks_after_exceeding_max() {
        let (t, _, sink) = tracker(10, 100);
        for i in 1..=10 {
            assert_eq!(t.record("https://evil.example", 30), i);
            assert!(!t.is_blocked("https://evil.example"));
        }
        t.record("https://evil.example", 30);
        assert!(t.is_blocked("https://evil.example"));
        assert!(!t.is_blocked("https://good.example"));

        let blocked: Vec<_> = sink
            .events()
            .into_iter()
            .filter(|e| matches!(e, GuardEvent::OriginBlocked { .. }))
            .collect();
        assert_eq!(blocked.len(), 1);

        // Crossing is reported once.
        t.record("https://evil.example", 30);
        assert_eq!(sink.events().len(), 1);
    }

    #[test]
    fn test_window_expiry_unblocks_and_restarts_count() {
        let (t, clock, _) = tracker(2, 100);
        for _ in 0..3 {
            t.record("o", 10);
        }
        assert!(t.is_blocked("o"));

        clock.advance_secs(299);
        assert!(t.is_blocked("o"));
        clock.advance_secs(1);
        assert!(!t.is_blocked("o"));
        assert_eq!(t.violation_count("o"), 0);

        assert_eq!(t.record("o", 10), 1);
    }

    #[test]
    fn test_sweep_removes_stale_entries() {
        let (t, clock, _) = tracker(10, 100);
        t.record("old", 5);
        clock.advance_secs(200);
        t.record("fresh", 5);
        clock.advance_secs(100);

        t.sweep();
        assert_eq!(t.len(), 1);
        assert_eq!(t.violation_count("fresh"), 1);
        assert_eq!(t.violation_count("old"), 0);
    }

    #[test]
    fn test_size_never_exceeds_cap() {
        let (t, clock, _) = tracker(10, 50);
        for i in 0..500 {
            t.record(&format!("origin-{i}"), 1);
            clock.advance_ms(1);
            assert!(t.len() <= 50, "len {} after {} inserts", t.len(), i + 1);
        }
        // The newest origin always survives.
        assert_eq!(t.violation_count("origin-499"), 1);
        assert_eq!(t.violation_count("origin-0"), 0);
    }

    #[test]
    fn test_snapshot_orders_by_count() {
        let (t, _, _) = tracker(1, 100);
        t.record("a", 1);
        t.record("b", 1);
        t.record("b", 2);
        let snap = t.snapshot(10);
        assert_eq!(snap[0].origin, "b");
        assert_eq!(snap[0].violation_count, 2);
        assert_eq!(snap[0].total_threat_score, 3);
        assert!(snap[0].blocked);
        assert!(!snap[1].blocked);
        assert_eq!(t.snapshot(1).len(), 1);
    }
}
