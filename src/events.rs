use crate::breaker::BreakerState;
use crate::identity::{EndpointCategory, KeyType};
use crate::sanitize::InputArea;
use crate::threat::ThreatType;
use std::sync::Mutex;

/// Notable guard decisions, handed to audit and metrics collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardEvent {
    ThreatDetected {
        category: EndpointCategory,
        origin: String,
        area: InputArea,
        threat_type: ThreatType,
        score: u32,
    },
    RateLimitExceeded {
        category: EndpointCategory,
        key_type: KeyType,
    },
    BreakerTransition {
        category: EndpointCategory,
        from: BreakerState,
        to: BreakerState,
    },
    OriginBlocked {
        origin: String,
        violations: u32,
    },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: GuardEvent);
}

/// Default sink: one structured log line and one counter per event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetrySink;

impl EventSink for TelemetrySink {
    fn emit(&self, event: GuardEvent) {
        match event {
            GuardEvent::ThreatDetected {
                category,
                origin,
                area,
                threat_type,
                score,
            } => {
                tracing::info!(
                    category = category.as_str(),
                    origin = %origin,
                    area = area.as_str(),
                    threat_type = threat_type.as_str(),
                    score,
                    "threat: detected"
                );
                metrics::counter!(
                    "guard_threats_detected_total",
                    "category" => category.as_str(),
                    "area" => area.as_str(),
                    "threat_type" => threat_type.as_str(),
                )
                .increment(1);
            }
            GuardEvent::RateLimitExceeded { category, key_type } => {
                tracing::debug!(
                    "rate_limit: exceeded, category={}, key_type={}",
                    category,
                    key_type
                );
                metrics::counter!(
                    "guard_rate_limit_exceeded_total",
                    "category" => category.as_str(),
                    "key_type" => key_type.as_str(),
                )
                .increment(1);
            }
            GuardEvent::BreakerTransition { category, from, to } => {
                tracing::warn!(
                    "circuit_breaker: transition, category={}, from={}, to={}",
                    category,
                    from,
                    to
                );
                metrics::counter!(
                    "guard_circuit_breaker_transitions_total",
                    "category" => category.as_str(),
                    "to" => to.as_str(),
                )
                .increment(1);
            }
            GuardEvent::OriginBlocked { origin, violations } => {
                tracing::warn!(
                    "violations: origin blocked, origin={}, violations={}",
                    origin,
                    violations
                );
                metrics::counter!("guard_origins_blocked_total").increment(1);
            }
        }
    }
}

/// Keeps every event in memory. For tests and embedding callers that drain
/// events themselves.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<GuardEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<GuardEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn take(&self) -> Vec<GuardEvent> {
        std::mem::take(
            &mut *self
                .events
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: GuardEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}
