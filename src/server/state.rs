use crate::clock::{Clock, SystemClock};
use crate::config::GuardConfig;
use crate::events::{EventSink, TelemetrySink};
use crate::guard::GuardPipeline;
use crate::metrics::Metrics;
use crate::ratelimit::MemoryBucketStore;
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::info;

/// Shared server state, cheaply cloneable.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GuardConfig>,
    pub pipeline: Arc<GuardPipeline>,
    pub store: Arc<MemoryBucketStore>,
    pub metrics: Metrics,
    ready: Arc<AtomicBool>,
}

impl AppState {
    /// Production wiring: wall clock, in-memory bucket store and the
    /// tracing/metrics event sink.
    pub fn new(config: GuardConfig, metrics: Metrics) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let events: Arc<dyn EventSink> = Arc::new(TelemetrySink);
        Self::with_parts(config, metrics, clock, events)
    }

    pub fn with_parts(
        config: GuardConfig,
        metrics: Metrics,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let store = Arc::new(MemoryBucketStore::new(
            config.rate_limit.ttl_slack_secs,
            config.rate_limit.max_buckets,
            clock.clone(),
        ));
        let pipeline = GuardPipeline::from_config(&config, store.clone(), clock, events)?;
        info!(
            "server: state built, store=memory, max_buckets={}",
            config.rate_limit.max_buckets
        );
        Ok(Self {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
            store,
            metrics,
            ready: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Spawn bucket GC, breaker sweep and violation sweep. All stop on
    /// `shutdown`.
    pub fn start_background(&self, shutdown: &Arc<Notify>) -> Vec<JoinHandle<()>> {
        let cfg = &self.config;
        vec![
            self.store.start_gc(
                Duration::from_secs(cfg.rate_limit.gc_interval_secs),
                shutdown.clone(),
            ),
            self.pipeline.breakers().start_sweeper(
                Duration::from_secs(cfg.circuit_breaker.sweep_interval_secs),
                shutdown.clone(),
            ),
            self.pipeline.tracker().start_sweeper(
                Duration::from_secs(cfg.violations.sweep_interval_secs),
                shutdown.clone(),
            ),
        ]
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }
}
