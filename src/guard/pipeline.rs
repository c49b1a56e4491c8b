use super::rejection::{RejectReason, Rejection};
use super::request::GuardRequest;
use crate::breaker::CircuitBreakerRegistry;
use crate::clock::Clock;
use crate::config::GuardConfig;
use crate::error::GuardError;
use crate::events::{EventSink, GuardEvent};
use crate::identity::{EndpointCategory, IdentityResolver, Resolution};
use crate::ratelimit::{BucketStore, PolicyTable, RateLimitDecision, RateLimiter};
use crate::sanitize::{
    tracking_origin, InspectedInput, SanitizationManager, SanitizeRejection, ViolationTracker,
};
use crate::threat::{ThreatAnalysisContext, ThreatEngine};
use bytes::Bytes;
use http::header::USER_AGENT;
use http::HeaderMap;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// An admitted request: the sanitized inputs plus the quota that admitted it.
#[derive(Debug, Clone, Serialize)]
pub struct Admission {
    pub category: EndpointCategory,
    pub user_id: Option<String>,
    pub client_ip: String,
    pub origin: String,
    pub threat_score: u32,
    pub sanitized: bool,
    pub query: Option<String>,
    #[serde(serialize_with = "serialize_headers")]
    pub headers: HeaderMap,
    #[serde(serialize_with = "serialize_body")]
    pub body: Bytes,
    pub remaining: u32,
    pub degraded: bool,
    #[serde(skip)]
    pub rate_limit: RateLimitDecision,
}

/// The admission pipeline, in fixed order:
///
/// 1. resolve category and rate-limit keys
/// 2. origin block check, then threat detection and sanitization
/// 3. circuit breaker gate
/// 4. token-bucket check, whose outcome feeds back into the breaker
///
/// Any stage may deny; the first denial is returned.
pub struct GuardPipeline {
    resolver: IdentityResolver,
    sanitization: SanitizationManager,
    breakers: Arc<CircuitBreakerRegistry>,
    limiter: RateLimiter,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
}

impl GuardPipeline {
    pub fn from_config(
        config: &GuardConfig,
        store: Arc<dyn BucketStore>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, GuardError> {
        let engine = ThreatEngine::new(&config.threat)?;
        let tracker = Arc::new(ViolationTracker::new(
            &config.violations,
            clock.clone(),
            events.clone(),
        ));
        let sanitization = SanitizationManager::new(
            &config.sanitization,
            &config.identity.header_names(),
            engine,
            tracker,
            events.clone(),
        )?;
        let breakers = Arc::new(CircuitBreakerRegistry::new(
            &config.circuit_breaker,
            clock.clone(),
            events.clone(),
        ));
        let limiter = RateLimiter::new(
            store,
            PolicyTable::from_settings(&config.rate_limit),
            Duration::from_millis(config.rate_limit.store_timeout_ms),
            clock.clone(),
        );
        Ok(Self {
            resolver: IdentityResolver::new(&config.identity),
            sanitization,
            breakers,
            limiter,
            clock,
            events,
        })
    }

    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn tracker(&self) -> &Arc<ViolationTracker> {
        self.sanitization.tracker()
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    #[allow(clippy::result_large_err)]
    pub async fn evaluate(&self, req: &GuardRequest) -> Result<Admission, Rejection> {
        let start = Instant::now();
        let resolution = self
            .resolver
            .resolve(&req.path, &req.headers, req.peer, req.identity.as_ref());
        let category = resolution.category;

        let result = self.run(req, resolution).await;

        let (decision, reason) = match &result {
            Ok(_) => ("allow", "none"),
            Err(r) => ("reject", r.reason.as_str()),
        };
        metrics::counter!(
            "guard_admissions_total",
            "decision" => decision,
            "reason" => reason,
            "category" => category.as_str(),
        )
        .increment(1);
        metrics::histogram!(
            "guard_admission_duration_seconds",
            "category" => category.as_str(),
        )
        .record(start.elapsed().as_secs_f64());
        result
    }

    #[allow(clippy::result_large_err)]
    async fn run(
        &self,
        req: &GuardRequest,
        resolution: Resolution,
    ) -> Result<Admission, Rejection> {
        let category = resolution.category;
        let origin = tracking_origin(&req.headers, &resolution.client_ip);
        let ctx = ThreatAnalysisContext {
            category,
            origin: origin.clone(),
            user_agent: req
                .headers
                .get(USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned),
            method: req.method.as_str().to_string(),
            path: req.path.clone(),
            user_id: resolution.user_id.clone(),
            authenticated: resolution.authenticated(),
        };

        let input = InspectedInput {
            query: req.query.as_deref(),
            headers: &req.headers,
            body: &req.body,
        };
        let sanitized = self
            .sanitization
            .inspect(&ctx, input)
            .map_err(|e| self.sanitize_rejection(&req.path, e))?;

        if !self.breakers.allow(category) {
            let retry_ms = self.breakers.recovery_remaining_ms(category);
            tracing::debug!(
                "guard: circuit open, category={}, path={}, retry_ms={}",
                category,
                req.path,
                retry_ms
            );
            return Err(Rejection::circuit_open(
                &req.path,
                self.clock.now_ms(),
                retry_ms.div_ceil(1000).max(1),
            ));
        }

        let decision = self.limiter.check_request(&resolution).await;
        if !decision.allowed {
            self.events.emit(GuardEvent::RateLimitExceeded {
                category,
                key_type: decision.key_type,
            });
            // Store outages are not evidence of overload.
            if !decision.degraded {
                self.breakers.record_failure(category);
            }
            return Err(Rejection::rate_limited(&req.path, self.clock.now_ms(), decision));
        }
        self.breakers.record_success(category);

        Ok(Admission {
            category,
            user_id: resolution.user_id,
            client_ip: resolution.client_ip,
            origin,
            threat_score: sanitized.threat_score,
            sanitized: sanitized.modified,
            query: sanitized.query,
            headers: sanitized.headers,
            body: sanitized.body,
            remaining: decision.remaining,
            degraded: decision.degraded,
            rate_limit: decision,
        })
    }

    fn sanitize_rejection(&self, path: &str, rejection: SanitizeRejection) -> Rejection {
        let now = self.clock.now_ms();
        match rejection {
            SanitizeRejection::OriginBlocked { violations } => {
                tracing::debug!("guard: origin blocked, path={}, violations={}", path, violations);
                Rejection::new(
                    RejectReason::OriginBlocked,
                    "origin blocked after repeated violations",
                    path,
                    now,
                )
            }
            SanitizeRejection::HighScore { area, .. } => Rejection::high_score(path, now, area),
            SanitizeRejection::MalformedQuery => Rejection::new(
                RejectReason::ValidationError,
                "query string is not valid UTF-8 once decoded",
                path,
                now,
            ),
            SanitizeRejection::BodyTooLarge { limit, .. } => {
                Rejection::payload_too_large(path, now, limit)
            }
        }
    }
}

fn serialize_headers<S: Serializer>(headers: &HeaderMap, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(headers.len()))?;
    for (name, value) in headers {
        map.serialize_entry(name.as_str(), &String::from_utf8_lossy(value.as_bytes()))?;
    }
    map.end()
}

fn serialize_body<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(body))
}
