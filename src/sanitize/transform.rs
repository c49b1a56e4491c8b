use crate::error::GuardError;
use crate::threat::{ThreatAnalysisResult, ThreatType};
use regex::Regex;
use std::borrow::Cow;

/// Rewrites inputs so the constructs behind each detected threat are
/// neutralised. Patterns are compiled once at startup.
pub struct Sanitizer {
    traversal: Regex,
    sql_comment: Regex,
}

impl Sanitizer {
    pub fn new() -> Result<Self, GuardError> {
        Ok(Self {
            traversal: Regex::new(
                r"(?i)(\.\.|%2e%2e|%252e%252e|\.%2e|%2e\.)(/|\\|%2f|%5c|%252f|%255c)?",
            )?,
            sql_comment: Regex::new(r"--|/\*|\*/|#")?,
        })
    }

    /// Inputs with no detections come back borrowed.
    pub fn sanitize<'a>(&self, input: &'a str, result: &ThreatAnalysisResult) -> Cow<'a, str> {
        if !result.threat_detected {
            return Cow::Borrowed(input);
        }
        let mut out: Cow<'a, str> = Cow::Borrowed(input);

        if result.has(ThreatType::BinaryPayload) || result.has(ThreatType::UnicodeEvasion) {
            out = Cow::Owned(strip_invisible(&out));
        }
        if result.has(ThreatType::PathTraversal) {
            out = Cow::Owned(self.traversal.replace_all(&out, "").into_owned());
        }
        if result.has(ThreatType::SqlInjection) {
            out = Cow::Owned(
                self.sql_comment
                    .replace_all(&out, "")
                    .replace(';', "")
                    .replace('\'', "''"),
            );
        }
        if result.has(ThreatType::CommandInjection) {
            out = Cow::Owned(out.chars().filter(|c| !is_shell_meta(*c)).collect());
        }
        // Escaping runs last so the rewrites above never see entities.
        if result.has(ThreatType::Xss)
            || result.has(ThreatType::ScriptInjection)
            || result.has(ThreatType::DataExfiltration)
        {
            out = Cow::Owned(html_escape(&out));
        }
        out
    }
}

/// Control characters (tab/CR/LF kept) and zero-width or bidi overrides.
fn strip_invisible(input: &str) -> String {
    input
        .chars()
        .filter(|&c| {
            let control = c.is_control() && !matches!(c, '\t' | '\r' | '\n');
            let invisible = matches!(
                c,
                '\u{200B}'..='\u{200F}' | '\u{202A}'..='\u{202E}' | '\u{2060}' | '\u{FEFF}'
            );
            !control && !invisible
        })
        .collect()
}

fn is_shell_meta(c: char) -> bool {
    matches!(c, ';' | '|' | '&' | '`' | '$' | '>' | '<' | '\n')
}

pub fn html_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 16);
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
