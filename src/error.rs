use std::fmt;

#[derive(Debug)]
pub enum GuardError {
    Config(String),
    /// The shared token-bucket store answered with an error.
    StoreUnavailable(String),
    /// The shared token-bucket store did not answer within the configured bound.
    StoreTimeout,
    InvalidPattern(String),
    Internal(String),
}

impl fmt::Display for GuardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardError::Config(msg) => write!(f, "config error: {}", msg),
            GuardError::StoreUnavailable(msg) => write!(f, "bucket store unavailable: {}", msg),
            GuardError::StoreTimeout => write!(f, "bucket store timeout"),
            GuardError::InvalidPattern(msg) => write!(f, "invalid pattern: {}", msg),
            GuardError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for GuardError {}

impl From<regex::Error> for GuardError {
    fn from(e: regex::Error) -> Self {
        GuardError::InvalidPattern(e.to_string())
    }
}

impl From<globset::Error> for GuardError {
    fn from(e: globset::Error) -> Self {
        GuardError::InvalidPattern(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_config() {
        assert_eq!(
            GuardError::Config("bad toml".to_string()).to_string(),
            "config error: bad toml"
        );
    }

    #[test]
    fn display_store_unavailable() {
        assert_eq!(
            GuardError::StoreUnavailable("connection refused".to_string()).to_string(),
            "bucket store unavailable: connection refused"
        );
    }

    #[test]
    fn display_store_timeout() {
        assert_eq!(GuardError::StoreTimeout.to_string(), "bucket store timeout");
    }

    #[test]
    fn display_internal() {
        assert_eq!(
            GuardError::Internal("oops".to_string()).to_string(),
            "internal error: oops"
        );
    }

    #[test]
    fn regex_error_converts_to_invalid_pattern() {
        let err: GuardError = regex::Regex::new("(unclosed").unwrap_err().into();
        assert!(matches!(err, GuardError::InvalidPattern(_)));
    }
}
