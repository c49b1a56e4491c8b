use crate::config::{FailMode, RateLimitSettings};
use crate::identity::{EndpointCategory, KeyType};
use std::collections::HashMap;

/// Token-bucket parameters for one (category, key type) pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitPolicy {
    /// Burst size. Zero hard-blocks the pair.
    pub capacity: u32,
    pub refill_rate_per_second: f64,
    /// Nominal accounting window; also drives bucket TTL in the store.
    pub window_seconds: u64,
}

impl RateLimitPolicy {
    pub const fn new(capacity: u32, refill_rate_per_second: f64, window_seconds: u64) -> Self {
        Self {
            capacity,
            refill_rate_per_second,
            window_seconds,
        }
    }

    /// `capacity` requests per `window_seconds`, bursting to full capacity.
    pub fn per_window(capacity: u32, window_seconds: u64) -> Self {
        let rate = if window_seconds == 0 {
            0.0
        } else {
            capacity as f64 / window_seconds as f64
        };
        Self::new(capacity, rate, window_seconds)
    }

    /// Upper bound on admissions inside any span of `window_secs`.
    pub fn max_admissions_within(&self, window_secs: f64) -> u64 {
        (self.capacity as f64 + window_secs * self.refill_rate_per_second).floor() as u64
    }
}

/// Built-in policies. Financial categories are the tightest, catalog browsing
/// the loosest, and IP policies are looser than user policies for the same
/// category since several users may share one address.
fn builtin(category: EndpointCategory, key_type: KeyType) -> RateLimitPolicy {
    use EndpointCategory::*;
    match (category, key_type) {
        (Payments, KeyType::User) => RateLimitPolicy::per_window(20, 60),
        (Payments, KeyType::Ip) => RateLimitPolicy::per_window(40, 60),
        (Orders, KeyType::User) => RateLimitPolicy::new(30, 0.5, 60),
        (Orders, KeyType::Ip) => RateLimitPolicy::new(60, 1.0, 60),
        (Cart, KeyType::User) => RateLimitPolicy::new(60, 1.0, 60),
        (Cart, KeyType::Ip) => RateLimitPolicy::new(120, 2.0, 60),
        (PublicCatalog, KeyType::User) => RateLimitPolicy::per_window(200, 60),
        (PublicCatalog, KeyType::Ip) => RateLimitPolicy::new(300, 5.0, 60),
        (Default, KeyType::User) => RateLimitPolicy::new(100, 100.0 / 60.0, 60),
        (Default, KeyType::Ip) => RateLimitPolicy::new(150, 2.5, 60),
    }
}

/// Unmetered admission is a bigger risk than brief unavailability for
/// money-moving endpoints.
fn builtin_fail_mode(category: EndpointCategory) -> FailMode {
    if category.is_financial() {
        FailMode::Closed
    } else {
        FailMode::Open
    }
}

/// Immutable policy and fail-mode lookup, built once at startup.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    policies: HashMap<(EndpointCategory, KeyType), RateLimitPolicy>,
    fail_modes: HashMap<EndpointCategory, FailMode>,
}

impl Default for PolicyTable {
    fn default() -> Self {
        let mut policies = HashMap::with_capacity(EndpointCategory::ALL.len() * 2);
        let mut fail_modes = HashMap::with_capacity(EndpointCategory::ALL.len());
        for category in EndpointCategory::ALL {
            for key_type in [KeyType::User, KeyType::Ip] {
                policies.insert((category, key_type), builtin(category, key_type));
            }
            fail_modes.insert(category, builtin_fail_mode(category));
        }
        Self {
            policies,
            fail_modes,
        }
    }
}

impl PolicyTable {
    /// Built-in table with configured overrides applied on top.
    pub fn from_settings(settings: &RateLimitSettings) -> Self {
        let mut table = Self::default();
        for o in &settings.policies {
            table.policies.insert(
                (o.category, o.key_type),
                RateLimitPolicy::new(o.capacity, o.refill_rate_per_second, o.window_seconds),
            );
            tracing::info!(
                "rate_limit: policy override, category={}, key_type={}, capacity={}, refill={}",
                o.category,
                o.key_type,
                o.capacity,
                o.refill_rate_per_second
            );
        }
        for o in &settings.fail_modes {
            table.fail_modes.insert(o.category, o.mode);
        }
        table
    }

    pub fn policy(&self, category: EndpointCategory, key_type: KeyType) -> RateLimitPolicy {
        self.policies
            .get(&(category, key_type))
            .copied()
            .unwrap_or_else(|| builtin(category, key_type))
    }

    pub fn fail_mode(&self, category: EndpointCategory) -> FailMode {
        self.fail_modes
            .get(&category)
            .copied()
            .unwrap_or_else(|| builtin_fail_mode(category))
    }
}
