use crate::ratelimit::RateLimitDecision;
use crate::sanitize::InputArea;
use http::StatusCode;
use serde::Serialize;
use std::time::{Duration, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    RateLimitExceeded,
    CircuitOpen,
    OriginBlocked,
    ThreatDetectedHighScore,
    ValidationError,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            RejectReason::CircuitOpen => "CIRCUIT_OPEN",
            RejectReason::OriginBlocked => "ORIGIN_BLOCKED",
            RejectReason::ThreatDetectedHighScore => "THREAT_DETECTED_HIGH_SCORE",
            RejectReason::ValidationError => "VALIDATION_ERROR",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured denial. Serializes to the JSON body returned to the client;
/// nothing internal beyond the reason and quota metadata is exposed.
#[derive(Debug, Clone, Serialize)]
pub struct Rejection {
    pub reason: RejectReason,
    pub message: String,
    /// RFC 3339, millisecond precision.
    pub timestamp: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area: Option<InputArea>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u32>,
    #[serde(skip)]
    pub payload_too_large: bool,
    #[serde(skip)]
    pub rate_limit: Option<RateLimitDecision>,
}

impl Rejection {
    pub fn new(reason: RejectReason, message: impl Into<String>, path: &str, now_ms: u64) -> Self {
        Self {
            reason,
            message: message.into(),
            timestamp: format_timestamp(now_ms),
            path: path.to_string(),
            area: None,
            retry_after_secs: None,
            remaining: None,
            payload_too_large: false,
            rate_limit: None,
        }
    }

    pub fn rate_limited(path: &str, now_ms: u64, decision: RateLimitDecision) -> Self {
        let mut r = Self::new(RejectReason::RateLimitExceeded, "rate limit exceeded", path, now_ms);
        r.retry_after_secs = Some(decision.retry_after_secs);
        r.remaining = Some(decision.remaining);
        r.rate_limit = Some(decision);
        r
    }

    pub fn circuit_open(path: &str, now_ms: u64, retry_after_secs: u64) -> Self {
        let mut r = Self::new(
            RejectReason::CircuitOpen,
            "endpoint temporarily unavailable",
            path,
            now_ms,
        );
        r.retry_after_secs = Some(retry_after_secs);
        r
    }

    pub fn high_score(path: &str, now_ms: u64, area: InputArea) -> Self {
        let mut r = Self::new(
            RejectReason::ThreatDetectedHighScore,
            format!("request {} rejected by input policy", area),
            path,
            now_ms,
        );
        r.area = Some(area);
        r
    }

    pub fn payload_too_large(path: &str, now_ms: u64, limit: usize) -> Self {
        let mut r = Self::new(
            RejectReason::ValidationError,
            format!("request body exceeds {limit} bytes"),
            path,
            now_ms,
        );
        r.payload_too_large = true;
        r
    }

    pub fn status(&self) -> StatusCode {
        match self.reason {
            RejectReason::RateLimitExceeded | RejectReason::CircuitOpen => StatusCode::TOO_MANY_REQUESTS,
            RejectReason::OriginBlocked => StatusCode::FORBIDDEN,
            RejectReason::ValidationError if self.payload_too_large => StatusCode::PAYLOAD_TOO_LARGE,
            RejectReason::ThreatDetectedHighScore | RejectReason::ValidationError => StatusCode::BAD_REQUEST,
        }
    }
}

fn format_timestamp(now_ms: u64) -> String {
    let at = UNIX_EPOCH + Duration::from_millis(now_ms);
    humantime::format_rfc3339_millis(at).to_string()
}
