use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Histogram bucket boundaries for admission latency (seconds). Admission is
/// in-process work plus one store round trip, so the range is sub-second.
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.00025, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 1.0,
];

/// Thin handle around the global metrics recorder.
///
/// After `Metrics::install()` the `metrics` crate macros (`counter!`, `gauge!`,
/// `histogram!`) can be used anywhere in the codebase. The `PrometheusHandle`
/// is retained solely for rendering the `/metrics` endpoint.
#[derive(Clone)]
pub struct Metrics {
    handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and register metric descriptions.
    ///
    /// Must be called **once** at startup before any `counter!` / `gauge!` /
    /// `histogram!` calls.
    pub fn install() -> Self {
        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("_duration_seconds".to_string()),
                LATENCY_BUCKETS,
            )
            .expect("valid matcher")
            .install_recorder()
            .expect("failed to install metrics recorder");

        describe_all();
        Self { handle }
    }

    /// A handle whose recorder is not installed globally. Renders nothing
    /// recorded through the macros; used where the process-wide recorder
    /// must stay untouched.
    pub fn detached() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        Self {
            handle: recorder.handle(),
        }
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

fn describe_all() {
    // admission
    describe_counter!(
        "guard_admissions_total",
        Unit::Count,
        "Admission decisions by decision, reason and endpoint category"
    );
    describe_histogram!(
        "guard_admission_duration_seconds",
        Unit::Seconds,
        "Time to reach an admission decision"
    );

    // rate limiting
    describe_counter!(
        "guard_rate_limit_allowed_total",
        Unit::Count,
        "Token-bucket checks that admitted the request"
    );
    describe_counter!(
        "guard_rate_limit_rejected_total",
        Unit::Count,
        "Token-bucket checks that rejected the request"
    );
    describe_counter!(
        "guard_rate_limit_exceeded_total",
        Unit::Count,
        "Rate-limit-exceeded events delivered to the event sink"
    );
    describe_counter!(
        "guard_rate_limit_store_errors_total",
        Unit::Count,
        "Bucket store errors and timeouts, by category and applied fail mode"
    );
    describe_gauge!(
        "guard_rate_limit_buckets",
        Unit::Count,
        "Buckets held by the in-memory store"
    );

    // circuit breaker
    describe_counter!(
        "guard_circuit_breaker_transitions_total",
        Unit::Count,
        "Circuit breaker state transitions by category and target state"
    );
    describe_counter!(
        "guard_circuit_breaker_rejected_total",
        Unit::Count,
        "Requests rejected by an open circuit breaker"
    );

    // threats and sanitization
    describe_counter!(
        "guard_threats_detected_total",
        Unit::Count,
        "Matched threat checks by category, input area and threat type"
    );
    describe_counter!(
        "guard_sanitized_inputs_total",
        Unit::Count,
        "Requests whose inputs were rewritten, by input area"
    );
    describe_counter!(
        "guard_threat_engine_errors_total",
        Unit::Count,
        "Threat engine panics caught and treated as clean input"
    );

    // violations
    describe_counter!(
        "guard_origins_blocked_total",
        Unit::Count,
        "Origins that crossed the violation limit"
    );
    describe_counter!(
        "guard_origin_block_hits_total",
        Unit::Count,
        "Requests rejected because their origin is blocked"
    );
    describe_gauge!(
        "guard_violation_tracked_origins",
        Unit::Count,
        "Origins currently held by the violation tracker"
    );

    // connections
    describe_gauge!(
        "guard_connections_active",
        Unit::Count,
        "Number of active downstream connections"
    );
    describe_counter!(
        "guard_connections_total",
        Unit::Count,
        "Total connections accepted"
    );
}
