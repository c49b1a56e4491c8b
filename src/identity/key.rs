use super::category::EndpointCategory;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MAX_USER_ID_LEN: usize = 50;
pub const MAX_IP_LEN: usize = 45;

pub const ANONYMOUS: &str = "anonymous";
pub const UNKNOWN_IP: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    User,
    Ip,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::User => "user",
            KeyType::Ip => "ip",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Store key `{category}:{key_type}:{identity}`.
///
/// The identity part is already reduced to an allow-listed, length-capped
/// form, so the key can never smuggle separators or unbounded data into the
/// shared store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    category: EndpointCategory,
    key_type: KeyType,
    key: String,
}

impl RateLimitKey {
    pub fn user(category: EndpointCategory, raw_user: &str) -> Self {
        Self::build(category, KeyType::User, &sanitize_user_id(raw_user))
    }

    pub fn ip(category: EndpointCategory, raw_ip: &str) -> Self {
        Self::build(category, KeyType::Ip, &sanitize_ip(raw_ip))
    }

    fn build(category: EndpointCategory, key_type: KeyType, identity: &str) -> Self {
        let mut key = String::with_capacity(category.as_str().len() + identity.len() + 6);
        key.push_str(category.as_str());
        key.push(':');
        key.push_str(key_type.as_str());
        key.push(':');
        key.push_str(identity);
        Self {
            category,
            key_type,
            key,
        }
    }

    pub fn category(&self) -> EndpointCategory {
        self.category
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// The identity portion after the second separator.
    pub fn identity(&self) -> &str {
        let prefix = self.category.as_str().len() + self.key_type.as_str().len() + 2;
        &self.key[prefix..]
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// Keep `[A-Za-z0-9_.@-]`, cap at 50 chars. Empty results become `anonymous`.
pub fn sanitize_user_id(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '@'))
        .take(MAX_USER_ID_LEN)
        .collect();
    if cleaned.is_empty() {
        ANONYMOUS.to_string()
    } else {
        cleaned
    }
}

/// Keep hex digits, `.` and `:` (covers IPv4, IPv6 and mapped forms), cap at 45.
pub fn sanitize_ip(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| c.is_ascii_hexdigit() || matches!(c, '.' | ':'))
        .take(MAX_IP_LEN)
        .collect();
    if cleaned.is_empty() {
        UNKNOWN_IP.to_string()
    } else {
        cleaned
    }
}
