use crate::identity::{EndpointCategory, KeyType};
use serde::{Deserialize, Deserializer, Serialize};

/// Deserialize a `T` that implements `Default`, treating JSON `null` the same
/// as a missing field. Use with:
///   `#[serde(default, deserialize_with = "deserialize_null_default")]`
fn deserialize_null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Top-level guard configuration. Loaded once at startup, read-only afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardConfig {
    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(default)]
    pub threat: ThreatConfig,

    #[serde(default)]
    pub sanitization: SanitizationConfig,

    #[serde(default)]
    pub violations: ViolationConfig,
}

/// Header names the resolver trusts. The identity headers are set by the
/// authentication layer in front of the guard after token verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_forwarded_for_header")]
    pub forwarded_for_header: String,

    #[serde(default = "default_real_ip_header")]
    pub real_ip_header: String,

    #[serde(default = "default_subject_header")]
    pub subject_header: String,

    #[serde(default = "default_display_name_header")]
    pub display_name_header: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            forwarded_for_header: default_forwarded_for_header(),
            real_ip_header: default_real_ip_header(),
            subject_header: default_subject_header(),
            display_name_header: default_display_name_header(),
        }
    }
}

impl IdentityConfig {
    pub fn header_names(&self) -> [&str; 4] {
        [
            &self.forwarded_for_header,
            &self.real_ip_header,
            &self.subject_header,
            &self.display_name_header,
        ]
    }
}

fn default_forwarded_for_header() -> String {
    "x-forwarded-for".to_string()
}

fn default_real_ip_header() -> String {
    "x-real-ip".to_string()
}

fn default_subject_header() -> String {
    "x-auth-subject".to_string()
}

fn default_display_name_header() -> String {
    "x-auth-name".to_string()
}

/// What the limiter does when the bucket store errors or times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailMode {
    /// Admit the request unmetered.
    Open,
    /// Deny the request.
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Upper bound on one store round trip.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// Bucket TTL is `window_seconds + ttl_slack_secs`.
    #[serde(default = "default_ttl_slack_secs")]
    pub ttl_slack_secs: u64,

    /// How often the in-memory store evicts expired buckets.
    #[serde(default = "default_store_gc_interval")]
    pub gc_interval_secs: u64,

    /// Hard cap on buckets held by the in-memory store.
    #[serde(default = "default_max_buckets")]
    pub max_buckets: usize,

    /// Overrides applied on top of the built-in policy table.
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub policies: Vec<PolicyOverride>,

    /// Overrides applied on top of the built-in fail modes
    /// (financial categories closed, everything else open).
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub fail_modes: Vec<FailModeOverride>,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            store_timeout_ms: default_store_timeout_ms(),
            ttl_slack_secs: default_ttl_slack_secs(),
            gc_interval_secs: default_store_gc_interval(),
            max_buckets: default_max_buckets(),
            policies: Vec::new(),
            fail_modes: Vec::new(),
        }
    }
}

fn default_store_timeout_ms() -> u64 {
    50
}

fn default_ttl_slack_secs() -> u64 {
    10
}

fn default_store_gc_interval() -> u64 {
    60
}

fn default_max_buckets() -> usize {
    100_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyOverride {
    pub category: EndpointCategory,
    pub key_type: KeyType,
    pub capacity: u32,
    pub refill_rate_per_second: f64,
    pub window_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailModeOverride {
    pub category: EndpointCategory,
    pub mode: FailMode,
}

/// State machine: Closed → Open → HalfOpen → Closed/Open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive rate-limit rejections that trip a category's breaker.
    #[serde(default = "default_cb_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_cb_recovery_timeout")]
    pub recovery_timeout_secs: u64,

    #[serde(default = "default_cb_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Closed breakers untouched for this long are dropped by the sweep.
    #[serde(default = "default_cb_idle")]
    pub idle_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_cb_failure_threshold(),
            recovery_timeout_secs: default_cb_recovery_timeout(),
            sweep_interval_secs: default_cb_sweep_interval(),
            idle_secs: default_cb_idle(),
        }
    }
}

fn default_cb_failure_threshold() -> u32 {
    5
}

fn default_cb_recovery_timeout() -> u64 {
    30
}

fn default_cb_sweep_interval() -> u64 {
    60
}

fn default_cb_idle() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatConfig {
    #[serde(default)]
    pub scores: ThreatScores,

    /// Inputs longer than this (in chars) score `excessive_length`.
    #[serde(default = "default_max_input_length")]
    pub max_input_length: usize,

    /// Shannon entropy in bits per char above which `high_entropy` scores.
    #[serde(default = "default_entropy_threshold")]
    pub entropy_threshold: f64,

    /// Ratio of special chars above which `special_chars` scores.
    #[serde(default = "default_special_char_ratio")]
    pub special_char_ratio: f64,

    /// Signature checks only look at this many leading bytes.
    #[serde(default = "default_max_scan_bytes")]
    pub max_scan_bytes: usize,
}

impl Default for ThreatConfig {
    fn default() -> Self {
        Self {
            scores: ThreatScores::default(),
            max_input_length: default_max_input_length(),
            entropy_threshold: default_entropy_threshold(),
            special_char_ratio: default_special_char_ratio(),
            max_scan_bytes: default_max_scan_bytes(),
        }
    }
}

fn default_max_input_length() -> usize {
    10_000
}

fn default_entropy_threshold() -> f64 {
    4.5
}

fn default_special_char_ratio() -> f64 {
    0.3
}

fn default_max_scan_bytes() -> usize {
    64 * 1024
}

/// Score contributed by each check on match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreatScores {
    pub xss: u32,
    pub sql_injection: u32,
    pub path_traversal: u32,
    pub command_injection: u32,
    pub script_injection: u32,
    pub data_exfiltration: u32,
    pub unicode_evasion: u32,
    pub encoding_evasion: u32,
    pub excessive_length: u32,
    pub high_entropy: u32,
    pub special_chars: u32,
    pub binary_payload: u32,
}

impl Default for ThreatScores {
    fn default() -> Self {
        Self {
            xss: 25,
            sql_injection: 30,
            path_traversal: 20,
            command_injection: 35,
            script_injection: 25,
            data_exfiltration: 20,
            unicode_evasion: 15,
            encoding_evasion: 10,
            excessive_length: 10,
            high_entropy: 15,
            special_chars: 10,
            binary_payload: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitizationConfig {
    /// Path policies, first glob match wins. Unmatched paths use the
    /// built-in policy for their endpoint category.
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub policies: Vec<EndpointPolicyConfig>,

    /// Header-name globs never analyzed: opaque credentials and standard
    /// browser headers.
    #[serde(default = "default_skip_headers")]
    pub skip_headers: Vec<String>,

    /// Larger bodies are rejected before analysis.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for SanitizationConfig {
    fn default() -> Self {
        Self {
            policies: Vec::new(),
            skip_headers: default_skip_headers(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// Credentials plus the headers every browser sends on its own. The
/// configured identity headers are always added on top of this list.
fn default_skip_headers() -> Vec<String> {
    [
        "authorization",
        "cookie",
        "host",
        "origin",
        "referer",
        "user-agent",
        "accept*",
        "sec-ch-ua*",
        "sec-fetch-*",
        "x-forwarded-*",
        "x-real-ip",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointPolicyConfig {
    /// Glob over the request path, e.g. `/api/payments/**`.
    pub path: String,

    #[serde(default = "default_true")]
    pub check_query_params: bool,

    #[serde(default = "default_true")]
    pub check_headers: bool,

    #[serde(default = "default_true")]
    pub check_body: bool,

    pub block_threshold: u32,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationConfig {
    /// Rolling window. Violations older than this no longer count.
    #[serde(default = "default_violation_window")]
    pub window_secs: u64,

    /// Origins with more violations than this inside the window are blocked.
    #[serde(default = "default_max_violations")]
    pub max_violations_per_origin: u32,

    /// Hard cap on tracked origins.
    #[serde(default = "default_max_tracked_origins")]
    pub max_tracked_origins: usize,

    #[serde(default = "default_violation_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for ViolationConfig {
    fn default() -> Self {
        Self {
            window_secs: default_violation_window(),
            max_violations_per_origin: default_max_violations(),
            max_tracked_origins: default_max_tracked_origins(),
            sweep_interval_secs: default_violation_sweep_interval(),
        }
    }
}

fn default_violation_window() -> u64 {
    300
}

fn default_max_violations() -> u32 {
    10
}

fn default_max_tracked_origins() -> usize {
    10_000
}

fn default_violation_sweep_interval() -> u64 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_serde() {
        let json = r#"{
            "identity": {"subject_header": "x-user"},
            "rate_limit": {
                "store_timeout_ms": 25,
                "policies": [
                    {"category": "payments", "key_type": "user", "capacity": 5,
                     "refill_rate_per_second": 0.1, "window_seconds": 60}
                ],
                "fail_modes": [{"category": "cart", "mode": "closed"}]
            },
            "circuit_breaker": {"failure_threshold": 3},
            "threat": {"scores": {"sql_injection": 40}, "entropy_threshold": 5.0},
            "sanitization": {
                "policies": [{"path": "/api/payments/**", "block_threshold": 15}]
            },
            "violations": {"max_violations_per_origin": 4}
        }"#;

        let cfg: GuardConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.identity.subject_header, "x-user");
        assert_eq!(cfg.identity.forwarded_for_header, "x-forwarded-for");

        assert_eq!(cfg.rate_limit.store_timeout_ms, 25);
        assert_eq!(cfg.rate_limit.ttl_slack_secs, 10);
        let p = &cfg.rate_limit.policies[0];
        assert_eq!(p.category, EndpointCategory::Payments);
        assert_eq!(p.key_type, KeyType::User);
        assert_eq!(p.capacity, 5);
        assert_eq!(cfg.rate_limit.fail_modes[0].mode, FailMode::Closed);

        assert_eq!(cfg.circuit_breaker.failure_threshold, 3);
        assert_eq!(cfg.circuit_breaker.recovery_timeout_secs, 30);

        assert_eq!(cfg.threat.scores.sql_injection, 40);
        assert_eq!(cfg.threat.scores.xss, 25);
        assert_eq!(cfg.threat.entropy_threshold, 5.0);

        let sp = &cfg.sanitization.policies[0];
        assert!(sp.check_query_params && sp.check_headers && sp.check_body);
        assert_eq!(sp.block_threshold, 15);
        assert_eq!(cfg.sanitization.skip_headers, default_skip_headers());
        assert!(cfg.sanitization.skip_headers.iter().any(|h| h == "accept*"));

        assert_eq!(cfg.violations.max_violations_per_origin, 4);
        assert_eq!(cfg.violations.window_secs, 300);
    }

    #[test]
    fn test_null_lists_become_empty() {
        let json = r#"{"rate_limit": {"policies": null, "fail_modes": null}}"#;
        let cfg: GuardConfig = serde_json::from_str(json).unwrap();
        assert!(cfg.rate_limit.policies.is_empty());
        assert!(cfg.rate_limit.fail_modes.is_empty());
    }

    #[test]
    fn test_empty_document_is_default() {
        let cfg: GuardConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.circuit_breaker.failure_threshold, 5);
        assert_eq!(cfg.violations.max_violations_per_origin, 10);
        assert_eq!(cfg.threat.max_input_length, 10_000);
        assert_eq!(cfg.threat.scores, ThreatScores::default());
    }
}
