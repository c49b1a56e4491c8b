use super::category::EndpointCategory;
use super::key::{sanitize_ip, sanitize_user_id, RateLimitKey, ANONYMOUS, UNKNOWN_IP};
use crate::config::IdentityConfig;
use http::{HeaderMap, HeaderName};
use std::net::SocketAddr;
use tracing::warn;

/// An identity that an upstream authentication layer has already verified.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    /// Stable subject identifier (e.g. the token `sub` claim).
    pub subject: Option<String>,
    /// Display-name claim, used only when no subject is present.
    pub display_name: Option<String>,
}

impl Identity {
    pub fn subject(subject: impl Into<String>) -> Self {
        Self {
            subject: Some(subject.into()),
            display_name: None,
        }
    }
}

/// Output of the resolver: everything downstream stages key on.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub category: EndpointCategory,
    pub user_key: RateLimitKey,
    pub ip_key: RateLimitKey,
    /// Sanitized user id, `None` for anonymous callers.
    pub user_id: Option<String>,
    pub client_ip: String,
}

impl Resolution {
    pub fn authenticated(&self) -> bool {
        self.user_id.is_some()
    }
}

pub struct IdentityResolver {
    forwarded_for: HeaderName,
    real_ip: HeaderName,
    subject: HeaderName,
    display_name: HeaderName,
}

impl IdentityResolver {
    pub fn new(config: &IdentityConfig) -> Self {
        Self {
            forwarded_for: header_or(&config.forwarded_for_header, "x-forwarded-for"),
            real_ip: header_or(&config.real_ip_header, "x-real-ip"),
            subject: header_or(&config.subject_header, "x-auth-subject"),
            display_name: header_or(&config.display_name_header, "x-auth-name"),
        }
    }

    /// Classify the path and build both rate-limit keys. Never fails: any
    /// unreadable input degrades to the anonymous / unknown identity.
    pub fn resolve(
        &self,
        path: &str,
        headers: &HeaderMap,
        peer: Option<SocketAddr>,
        identity: Option<&Identity>,
    ) -> Resolution {
        let category = EndpointCategory::from_path(path);
        let user_id = identity.and_then(resolve_user);
        let client_ip = self.resolve_ip(headers, peer);

        Resolution {
            category,
            user_key: RateLimitKey::user(category, user_id.as_deref().unwrap_or(ANONYMOUS)),
            ip_key: RateLimitKey::ip(category, &client_ip),
            user_id,
            client_ip,
        }
    }

    /// Client address: first forwarded-for hop, then real-IP, then the peer.
    pub fn resolve_ip(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
        let forwarded = headers
            .get(&self.forwarded_for)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let candidate = forwarded.or_else(|| {
            headers
                .get(&self.real_ip)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|s| !s.is_empty())
        });

        match candidate {
            Some(raw) => sanitize_ip(raw),
            None => match peer {
                Some(addr) => sanitize_ip(&addr.ip().to_string()),
                None => UNKNOWN_IP.to_string(),
            },
        }
    }

    /// Read the trusted identity headers set by the authentication layer.
    pub fn identity_from_headers(&self, headers: &HeaderMap) -> Option<Identity> {
        let read = |name: &HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
        };
        let identity = Identity {
            subject: read(&self.subject),
            display_name: read(&self.display_name),
        };
        if identity.subject.is_none() && identity.display_name.is_none() {
            None
        } else {
            Some(identity)
        }
    }
}

/// Prefer the subject claim, fall back to the display name.
fn resolve_user(identity: &Identity) -> Option<String> {
    let raw = identity
        .subject
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| {
            identity
                .display_name
                .as_deref()
                .filter(|s| !s.trim().is_empty())
        })?;
    let cleaned = sanitize_user_id(raw);
    if cleaned == ANONYMOUS {
        None
    } else {
        Some(cleaned)
    }
}

fn header_or(configured: &str, fallback: &'static str) -> HeaderName {
    match HeaderName::from_bytes(configured.trim().to_ascii_lowercase().as_bytes()) {
        Ok(name) => name,
        Err(_) => {
            warn!(
                "identity: invalid header name, configured={}, using={}",
                configured, fallback
            );
            HeaderName::from_static(fallback)
        }
    }
}
