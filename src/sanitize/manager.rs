use super::policy::{PolicyRegistry, SanitizationPolicy};
use super::transform::Sanitizer;
use super::violations::ViolationTracker;
use crate::config::SanitizationConfig;
use crate::error::GuardError;
use crate::events::{EventSink, GuardEvent};
use crate::threat::{ThreatAnalysisContext, ThreatAnalysisResult, ThreatEngine};
use bytes::Bytes;
use globset::{Glob, GlobSet, GlobSetBuilder};
use http::header::ORIGIN;
use http::{HeaderMap, HeaderName, HeaderValue};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Serialize;
use std::borrow::Cow;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Unreserved characters stay literal when a sanitized query is re-encoded.
const QUERY_ENCODE: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

/// Origins are map keys; bound what a client can make us store.
const MAX_ORIGIN_LEN: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputArea {
    Query,
    Header,
    Body,
}

impl InputArea {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputArea::Query => "query",
            InputArea::Header => "header",
            InputArea::Body => "body",
        }
    }
}

impl std::fmt::Display for InputArea {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The parts of a request that are analyzed.
#[derive(Debug, Clone, Copy)]
pub struct InspectedInput<'a> {
    pub query: Option<&'a str>,
    pub headers: &'a HeaderMap,
    pub body: &'a Bytes,
}

/// A request that passed inspection, with offending substrings rewritten.
#[derive(Debug, Clone)]
pub struct SanitizedRequest {
    /// Re-encoded query string; `None` when the request had none.
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Sum of the per-area scores.
    pub threat_score: u32,
    pub modified: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SanitizeRejection {
    OriginBlocked { violations: u32 },
    HighScore { area: InputArea, score: u32, threshold: u32 },
    MalformedQuery,
    BodyTooLarge { size: usize, limit: usize },
}

/// Runs the threat engine over the areas a path's policy enables, then
/// either rejects the request or returns a sanitized copy of it.
pub struct SanitizationManager {
    engine: ThreatEngine,
    sanitizer: Sanitizer,
    policies: PolicyRegistry,
    tracker: Arc<ViolationTracker>,
    skip_headers: GlobSet,
    max_body_bytes: usize,
    events: Arc<dyn EventSink>,
}

/// Running score and whether any attack signature contributed to it.
#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    score: u32,
    signature: bool,
}

impl Tally {
    fn of(result: &ThreatAnalysisResult) -> Self {
        Self {
            score: result.threat_score,
            signature: result.signature_matched(),
        }
    }
}

/// Highest single-input score in an area, plus the rewritten inputs.
struct AreaOutcome<T> {
    tally: Tally,
    values: Vec<T>,
    modified: bool,
}

impl<T> AreaOutcome<T> {
    fn with_capacity(n: usize) -> Self {
        Self {
            tally: Tally::default(),
            values: Vec::with_capacity(n),
            modified: false,
        }
    }
}

impl SanitizationManager {
    /// `trusted_headers` are set by the layers in front of the guard
    /// (forwarding and identity) and are never analyzed, in addition to the
    /// configured skip globs.
    pub fn new(
        config: &SanitizationConfig,
        trusted_headers: &[&str],
        engine: ThreatEngine,
        tracker: Arc<ViolationTracker>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, GuardError> {
        let mut skip = GlobSetBuilder::new();
        let names = config.skip_headers.iter().map(String::as_str).chain(trusted_headers.iter().copied());
        for name in names {
            skip.add(Glob::new(&name.trim().to_ascii_lowercase())?);
        }
        Ok(Self {
            engine,
            sanitizer: Sanitizer::new()?,
            policies: PolicyRegistry::new(&config.policies)?,
            tracker,
            skip_headers: skip.build()?,
            max_body_bytes: config.max_body_bytes,
            events,
        })
    }

    pub fn policy_for(&self, path: &str) -> SanitizationPolicy {
        self.policies.get_policy_for(path)
    }

    pub fn tracker(&self) -> &Arc<ViolationTracker> {
        &self.tracker
    }

    pub fn inspect(
        &self,
        ctx: &ThreatAnalysisContext,
        input: InspectedInput<'_>,
    ) -> Result<SanitizedRequest, SanitizeRejection> {
        if self.tracker.is_blocked(&ctx.origin) {
            metrics::counter!("guard_origin_block_hits_total").increment(1);
            return Err(SanitizeRejection::OriginBlocked {
                violations: self.tracker.violation_count(&ctx.origin),
            });
        }
        if input.body.len() > self.max_body_bytes {
            return Err(SanitizeRejection::BodyTooLarge {
                size: input.body.len(),
                limit: self.max_body_bytes,
            });
        }
        let params = match input.query {
            Some(q) => Some(parse_query(q).ok_or(SanitizeRejection::MalformedQuery)?),
            None => None,
        };

        let policy = self.policies.get_policy_for(&ctx.path);
        let mut seen = Tally::default();
        let mut modified = false;

        let query = match params {
            Some(params) if policy.check_query_params => {
                let area = self.inspect_query(ctx, &params);
                self.enforce(ctx, InputArea::Query, area.tally, &policy, &mut seen)?;
                modified |= area.modified;
                Some(encode_query(&area.values))
            }
            Some(params) => Some(encode_query(&params)),
            None => None,
        };

        let headers = if policy.check_headers {
            let area = self.inspect_headers(ctx, input.headers);
            self.enforce(ctx, InputArea::Header, area.tally, &policy, &mut seen)?;
            modified |= area.modified;
            area.values.into_iter().collect()
        } else {
            input.headers.clone()
        };

        let body = if policy.check_body && !input.body.is_empty() {
            let text = String::from_utf8_lossy(input.body);
            let result = self.analyze(&text, ctx, InputArea::Body);
            self.enforce(ctx, InputArea::Body, Tally::of(&result), &policy, &mut seen)?;
            match self.sanitizer.sanitize(&text, &result) {
                Cow::Owned(clean) if clean != text => {
                    modified = true;
                    metrics::counter!("guard_sanitized_inputs_total", "area" => "body").increment(1);
                    Bytes::from(clean)
                }
                _ => input.body.clone(),
            }
        } else {
            input.body.clone()
        };

        // Anomaly-only scores are common in ordinary traffic and are not
        // held against the origin.
        if seen.signature {
            self.tracker.record(&ctx.origin, seen.score);
        }
        Ok(SanitizedRequest {
            query,
            headers,
            body,
            threat_score: seen.score,
            modified,
        })
    }

    /// Fold an area into the request tally; on a threshold breach a
    /// signature-backed violation is recorded before the rejection is
    /// returned.
    fn enforce(
        &self,
        ctx: &ThreatAnalysisContext,
        area: InputArea,
        tally: Tally,
        policy: &SanitizationPolicy,
        seen: &mut Tally,
    ) -> Result<(), SanitizeRejection> {
        let score = tally.score;
        seen.score = seen.score.saturating_add(score);
        seen.signature |= tally.signature;
        if score > 0 && score >= policy.block_threshold {
            if seen.signature {
                self.tracker.record(&ctx.origin, seen.score);
            }
            tracing::info!(
                "sanitize: rejected, origin={}, path={}, area={}, score={}, threshold={}",
                ctx.origin,
                ctx.path,
                area,
                score,
                policy.block_threshold
            );
            return Err(SanitizeRejection::HighScore {
                area,
                score,
                threshold: policy.block_threshold,
            });
        }
        Ok(())
    }

    fn inspect_query(
        &self,
        ctx: &ThreatAnalysisContext,
        params: &[(String, String)],
    ) -> AreaOutcome<(String, String)> {
        let mut out = AreaOutcome::with_capacity(params.len());
        for (name, value) in params {
            let clean_name = self.scrub(ctx, InputArea::Query, name, &mut out.tally);
            let clean_value = self.scrub(ctx, InputArea::Query, value, &mut out.tally);
            out.modified |= clean_name.is_some() || clean_value.is_some();
            out.values.push((
                clean_name.unwrap_or_else(|| name.clone()),
                clean_value.unwrap_or_else(|| value.clone()),
            ));
        }
        if out.modified {
            metrics::counter!("guard_sanitized_inputs_total", "area" => "query").increment(1);
        }
        out
    }

    fn inspect_headers(
        &self,
        ctx: &ThreatAnalysisContext,
        headers: &HeaderMap,
    ) -> AreaOutcome<(HeaderName, HeaderValue)> {
        let mut out = AreaOutcome::with_capacity(headers.len());
        for (name, value) in headers {
            if self.skip_headers.is_match(name.as_str()) {
                out.values.push((name.clone(), value.clone()));
                continue;
            }
            let text = String::from_utf8_lossy(value.as_bytes());
            let Some(clean) = self.scrub(ctx, InputArea::Header, &text, &mut out.tally) else {
                out.values.push((name.clone(), value.clone()));
                continue;
            };
            out.modified = true;
            // Values that no longer form a valid header are dropped.
            if let Ok(v) = HeaderValue::from_str(&clean) {
                out.values.push((name.clone(), v));
            }
        }
        if out.modified {
            metrics::counter!("guard_sanitized_inputs_total", "area" => "header").increment(1);
        }
        out
    }

    /// Analyze one input and fold it into the area tally. Returns the
    /// sanitized text only when it differs from the input.
    fn scrub(
        &self,
        ctx: &ThreatAnalysisContext,
        area: InputArea,
        input: &str,
        tally: &mut Tally,
    ) -> Option<String> {
        let result = self.analyze(input, ctx, area);
        tally.score = tally.score.max(result.threat_score);
        tally.signature |= result.signature_matched();
        match self.sanitizer.sanitize(input, &result) {
            Cow::Owned(clean) if clean != input => Some(clean),
            _ => None,
        }
    }

    /// Engine failures fail open for the input that triggered them.
    fn analyze(&self, input: &str, ctx: &ThreatAnalysisContext, area: InputArea) -> ThreatAnalysisResult {
        let result = match catch_unwind(AssertUnwindSafe(|| self.engine.analyze(input, ctx))) {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(
                    "sanitize: threat engine panicked, path={}, area={}, input_len={}",
                    ctx.path,
                    area,
                    input.len()
                );
                metrics::counter!("guard_threat_engine_errors_total").increment(1);
                return ThreatAnalysisResult::clean();
            }
        };
        for detail in &result.details {
            self.events.emit(GuardEvent::ThreatDetected {
                category: ctx.category,
                origin: ctx.origin.clone(),
                area,
                threat_type: detail.threat_type,
                score: detail.score,
            });
        }
        result
    }
}

/// The origin violations are tracked against: the `Origin` header, else
/// the client address.
pub fn tracking_origin(headers: &HeaderMap, client_ip: &str) -> String {
    match headers
        .get(ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "null")
    {
        Some(origin) => {
            let mut end = origin.len().min(MAX_ORIGIN_LEN);
            while !origin.is_char_boundary(end) {
                end -= 1;
            }
            origin[..end].to_ascii_lowercase()
        }
        None => format!("ip:{client_ip}"),
    }
}

/// Split and decode `a=b&c=d`, `+` as space. `None` when any component is
/// not valid UTF-8 once decoded.
fn parse_query(query: &str) -> Option<Vec<(String, String)>> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            Some((decode_component(name)?, decode_component(value)?))
        })
        .collect()
}

fn decode_component(raw: &str) -> Option<String> {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .ok()
        .map(Cow::into_owned)
}

fn encode_query(params: &[(String, String)]) -> String {
    let mut out = String::new();
    for (i, (name, value)) in params.iter().enumerate() {
        if i > 0 {
            out.push('&');
        }
        out.extend(utf8_percent_encode(name, QUERY_ENCODE));
        out.push('=');
        out.extend(utf8_percent_encode(value, QUERY_ENCODE));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{EndpointPolicyConfig, ThreatConfig, ViolationConfig};
    use crate::events::RecordingSink;
    use crate::identity::EndpointCategory;

    struct Fixture {
        manager: SanitizationManager,
        sink: Arc<RecordingSink>,
    }

    fn fixture(config: SanitizationConfig) -> Fixture {
        fixture_with(config, &[])
    }

    fn fixture_with(config: SanitizationConfig, trusted: &[&str]) -> Fixture {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let sink = Arc::new(RecordingSink::new());
        let tracker = Arc::new(ViolationTracker::new(
            &ViolationConfig::default(),
            clock,
            sink.clone(),
        ));
        let engine = ThreatEngine::new(&ThreatConfig::default()).unwrap();
        let manager = SanitizationManager::new(&config, trusted, engine, tracker, sink.clone()).unwrap();
        Fixture { manager, sink }
    }

    fn ctx(path: &str) -> ThreatAnalysisContext {
        ThreatAnalysisContext {
            category: EndpointCategory::from_path(path),
            origin: "https://shop.example".into(),
            user_agent: None,
            method: "GET".into(),
            path: path.into(),
            user_id: None,
            authenticated: false,
        }
    }

    fn input<'a>(query: Option<&'a str>, headers: &'a HeaderMap, body: &'a Bytes) -> InspectedInput<'a> {
        InspectedInput { query, headers, body }
    }

    #[test]
    fn test_clean_request_passes_untouched() {
        let f = fixture(SanitizationConfig::default());
        let headers = HeaderMap::new();
        let body = Bytes::from_static(b"sku A1 qty 2");
        let out = f
            .manager
            .inspect(&ctx("/api/products/1"), input(Some("q=red+shoes&page=2"), &headers, &body))
            .unwrap();
        assert!(!out.modified);
        assert_eq!(out.threat_score, 0);
        assert_eq!(out.query.as_deref(), Some("q=red%20shoes&page=2"));
        assert_eq!(out.body, body);
        assert!(f.sink.events().is_empty());
        assert!(f.manager.tracker().is_empty());
    }

    #[test]
    fn test_sql_in_payments_query_rejected() {
        let f = fixture(SanitizationConfig::default());
        let headers = HeaderMap::new();
        let body = Bytes::new();
        let err = f
            .manager
            .inspect(
                &ctx("/api/payments/charge"),
                input(Some("note=%27%3B%20DROP%20TABLE%20users%3B%20--"), &headers, &body),
            )
            .unwrap_err();
        match err {
            SanitizeRejection::HighScore { area, score, threshold } => {
                assert_eq!(area, InputArea::Query);
                assert!(score >= 30);
                assert_eq!(threshold, 20);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(f.manager.tracker().violation_count("https://shop.example"), 1);
    }

    #[test]
    fn test_below_threshold_is_sanitized() {
        let f = fixture(SanitizationConfig::default());
        let headers = HeaderMap::new();
        let body = Bytes::new();
        // Traversal alone scores 20; the catalog threshold is 50.
        let out = f
            .manager
            .inspect(&ctx("/api/products/1"), input(Some("img=..%2F..%2Fetc%2Fpasswd"), &headers, &body))
            .unwrap();
        assert!(out.modified);
        assert!(out.threat_score > 0);
        assert_eq!(out.query.as_deref(), Some("img=etc%2Fpasswd"));
        assert_eq!(f.manager.tracker().violation_count("https://shop.example"), 1);
        assert!(f
            .sink
            .events()
            .iter()
            .any(|e| matches!(e, GuardEvent::ThreatDetected { area: InputArea::Query, .. })));
    }

    #[test]
    fn test_body_sanitized_and_escaped() {
        let f = fixture(SanitizationConfig::default());
        let headers = HeaderMap::new();
        let body = Bytes::from_static(b"<script>x</script>");
        let out = f
            .manager
            .inspect(&ctx("/api/products/1"), input(None, &headers, &body))
            .unwrap();
        assert!(out.modified);
        assert_eq!(&out.body[..], b"&lt;script&gt;x&lt;/script&gt;");
    }

    #[test]
    fn test_skip_headers_not_analyzed() {
        let f = fixture(SanitizationConfig::default());
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer <script>alert(1)</script>"));
        headers.insert("x-note", HeaderValue::from_static("hello"));
        let body = Bytes::new();
        let out = f
            .manager
            .inspect(&ctx("/api/cart/items"), input(None, &headers, &body))
            .unwrap();
        assert_eq!(out.threat_score, 0);
        assert_eq!(out.headers.len(), 2);
    }

    #[test]
    fn test_browser_headers_skipped_by_default() {
        let f = fixture(SanitizationConfig::default());
        let mut headers = HeaderMap::new();
        for (name, value) in [
            ("user-agent", "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36"),
            ("accept", "image/webp,image/*,*/*;q=0.8"),
            ("accept-language", "en-US,en;q=0.9"),
            ("sec-ch-ua", "\"Chromium\";v=\"124\", \"Google Chrome\";v=\"124\", \"Not-A.Brand\";v=\"99\""),
            ("sec-fetch-mode", "cors"),
            ("referer", "https://shop.example/products/42"),
            ("x-forwarded-for", "203.0.113.9, 10.0.0.2"),
        ] {
            headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
        }
        let body = Bytes::new();
        let out = f
            .manager
            .inspect(&ctx("/api/payments/methods"), input(None, &headers, &body))
            .unwrap();
        assert_eq!(out.threat_score, 0);
        assert_eq!(out.headers.len(), headers.len());
        assert!(f.sink.events().is_empty());
        assert!(f.manager.tracker().is_empty());
    }

    #[test]
    fn test_trusted_headers_skipped() {
        let f = fixture_with(SanitizationConfig::default(), &["X-Auth-Name"]);
        let mut headers = HeaderMap::new();
        headers.insert("x-auth-name", HeaderValue::from_static("<script>x</script>"));
        let body = Bytes::new();
        let out = f
            .manager
            .inspect(&ctx("/api/payments/charge"), input(None, &headers, &body))
            .unwrap();
        assert_eq!(out.threat_score, 0);
    }

    #[test]
    fn test_media_range_accept_scores_anomaly_only() {
        let cfg = SanitizationConfig {
            skip_headers: Vec::new(),
            ..SanitizationConfig::default()
        };
        let f = fixture(cfg);
        let mut headers = HeaderMap::new();
        headers.insert("accept", HeaderValue::from_static("image/webp,image/*,*/*;q=0.8"));
        let body = Bytes::new();
        for path in ["/api/cart/items", "/api/orders/1", "/api/payments/methods"] {
            let out = f.manager.inspect(&ctx(path), input(None, &headers, &body)).unwrap();
            assert_eq!(out.threat_score, 10, "{path}");
            assert!(!out.modified);
        }
        assert!(f.manager.tracker().is_empty());
    }

    #[test]
    fn test_anomaly_only_body_is_not_a_violation() {
        let f = fixture(SanitizationConfig::default());
        let headers = HeaderMap::new();
        let body = Bytes::from_static(br#"{"sku":"A1","qty":2}"#);
        for _ in 0..20 {
            let out = f
                .manager
                .inspect(&ctx("/api/cart/items"), input(None, &headers, &body))
                .unwrap();
            assert_eq!(out.threat_score, 10);
            assert_eq!(out.body, body);
        }
        assert_eq!(f.manager.tracker().violation_count("https://shop.example"), 0);
        assert!(!f.manager.tracker().is_blocked("https://shop.example"));
    }

    #[test]
    fn test_anomaly_only_breach_rejects_without_violation() {
        let cfg = SanitizationConfig {
            policies: vec![EndpointPolicyConfig {
                path: "/api/cart/**".into(),
                check_query_params: true,
                check_headers: true,
                check_body: true,
                block_threshold: 5,
            }],
            ..SanitizationConfig::default()
        };
        let f = fixture(cfg);
        let headers = HeaderMap::new();
        let body = Bytes::from_static(br#"{"sku":"A1","qty":2}"#);
        let err = f
            .manager
            .inspect(&ctx("/api/cart/items"), input(None, &headers, &body))
            .unwrap_err();
        assert!(matches!(err, SanitizeRejection::HighScore { area: InputArea::Body, score: 10, .. }));
        assert!(f.manager.tracker().is_empty());
    }

    #[test]
    fn test_header_threat_rejected_on_payments() {
        let f = fixture(SanitizationConfig::default());
        let mut headers = HeaderMap::new();
        headers.insert("x-ref", HeaderValue::from_static("<script>alert(1)</script>"));
        let body = Bytes::new();
        let err = f
            .manager
            .inspect(&ctx("/api/payments/charge"), input(None, &headers, &body))
            .unwrap_err();
        assert!(matches!(err, SanitizeRejection::HighScore { area: InputArea::Header, .. }));
    }

    #[test]
    fn test_disabled_area_not_checked() {
        let cfg = SanitizationConfig {
            policies: vec![EndpointPolicyConfig {
                path: "/api/products/**".into(),
                check_query_params: true,
                check_headers: true,
                check_body: false,
                block_threshold: 1,
            }],
            ..SanitizationConfig::default()
        };
        let f = fixture(cfg);
        let headers = HeaderMap::new();
        let body = Bytes::from_static(b"'; DROP TABLE users; --");
        let out = f
            .manager
            .inspect(&ctx("/api/products/1"), input(None, &headers, &body))
            .unwrap();
        assert_eq!(out.body, body);
        assert_eq!(out.threat_score, 0);
    }

    #[test]
    fn test_malformed_query_and_large_body() {
        let cfg = SanitizationConfig {
            max_body_bytes: 8,
            ..SanitizationConfig::default()
        };
        let f = fixture(cfg);
        let headers = HeaderMap::new();
        let empty = Bytes::new();
        assert_eq!(
            f.manager
                .inspect(&ctx("/api/cart"), input(Some("a=%FF%FE"), &headers, &empty))
                .unwrap_err(),
            SanitizeRejection::MalformedQuery
        );
        let big = Bytes::from_static(b"0123456789");
        assert_eq!(
            f.manager
                .inspect(&ctx("/api/cart"), input(None, &headers, &big))
                .unwrap_err(),
            SanitizeRejection::BodyTooLarge { size: 10, limit: 8 }
        );
    }

    #[test]
    fn test_blocked_origin_short_circuits() {
        let f = fixture(SanitizationConfig::default());
        for _ in 0..11 {
            f.manager.tracker().record("https://shop.example", 25);
        }
        let before = f.sink.events().len();
        let headers = HeaderMap::new();
        let body = Bytes::from_static(b"<script>x</script>");
        let err = f
            .manager
            .inspect(&ctx("/api/products/1"), input(None, &headers, &body))
            .unwrap_err();
        assert_eq!(err, SanitizeRejection::OriginBlocked { violations: 11 });
        // Detection never ran.
        assert_eq!(f.sink.events().len(), before);
    }

    #[test]
    fn test_tracking_origin() {
        let mut headers = HeaderMap::new();
        assert_eq!(tracking_origin(&headers, "10.0.0.1"), "ip:10.0.0.1");
        headers.insert(ORIGIN, HeaderValue::from_static("null"));
        assert_eq!(tracking_origin(&headers, "10.0.0.1"), "ip:10.0.0.1");
        headers.insert(ORIGIN, HeaderValue::from_static("HTTPS://Shop.Example"));
        assert_eq!(tracking_origin(&headers, "10.0.0.1"), "https://shop.example");
    }

    #[test]
    fn test_parse_query() {
        assert_eq!(
            parse_query("a=1&&b=x+y&c").unwrap(),
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "x y".to_string()),
                ("c".to_string(), String::new()),
            ]
        );
        assert!(parse_query("q=%C3%28").is_none());
    }
}
