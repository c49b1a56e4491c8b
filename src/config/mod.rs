pub mod types;


pub use types::*;

use anyhow::Result;
use std::path::Path;
use std::str::FromStr;

impl GuardConfig {
    /// Load configuration from a file (if it exists) and apply environment
    /// variable overrides for operational knobs. When the file does not
    /// exist, built-in defaults are used.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: GuardConfig = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            match path.extension().and_then(|e| e.to_str()) {
                Some("toml") => toml::from_str(&content)?,
                Some("json") => serde_json::from_str(&content)?,
                Some(ext) => anyhow::bail!("unsupported config format: .{ext}, use .toml or .json"),
                None => anyhow::bail!("config file has no extension, use .toml or .json"),
            }
        } else {
            tracing::info!("config file not found at {}, using defaults", path.display());
            GuardConfig::default()
        };

        config.apply_env_overrides();

        config.validate()?;
        tracing::info!(
            policy_overrides = config.rate_limit.policies.len(),
            sanitization_policies = config.sanitization.policies.len(),
            failure_threshold = config.circuit_breaker.failure_threshold,
            max_violations_per_origin = config.violations.max_violations_per_origin,
            "loaded guard configuration"
        );
        Ok(config)
    }

    /// Environment overrides cover timeouts and thresholds operators tune
    /// during an incident. Policy tables stay in the config file.
    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse("HERMES_GUARD_STORE_TIMEOUT_MS") {
            self.rate_limit.store_timeout_ms = v;
        }
        if let Some(v) = env_parse("HERMES_GUARD_CB_FAILURE_THRESHOLD") {
            self.circuit_breaker.failure_threshold = v;
        }
        if let Some(v) = env_parse("HERMES_GUARD_CB_RECOVERY_TIMEOUT_SECS") {
            self.circuit_breaker.recovery_timeout_secs = v;
        }
        if let Some(v) = env_parse("HERMES_GUARD_VIOLATION_WINDOW_SECS") {
            self.violations.window_secs = v;
        }
        if let Some(v) = env_parse("HERMES_GUARD_MAX_VIOLATIONS_PER_ORIGIN") {
            self.violations.max_violations_per_origin = v;
        }
        if let Some(v) = env_parse("HERMES_GUARD_MAX_TRACKED_ORIGINS") {
            self.violations.max_tracked_origins = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let rl = &self.rate_limit;
        if rl.store_timeout_ms == 0 {
            anyhow::bail!("rate_limit.store_timeout_ms must be > 0");
        }
        if rl.gc_interval_secs == 0 {
            anyhow::bail!("rate_limit.gc_interval_secs must be > 0");
        }
        if rl.max_buckets == 0 {
            anyhow::bail!("rate_limit.max_buckets must be > 0");
        }
        for p in &rl.policies {
            if !p.refill_rate_per_second.is_finite() || p.refill_rate_per_second < 0.0 {
                anyhow::bail!(
                    "rate_limit policy {}:{} has invalid refill_rate_per_second {}",
                    p.category,
                    p.key_type,
                    p.refill_rate_per_second
                );
            }
            if p.window_seconds == 0 {
                anyhow::bail!(
                    "rate_limit policy {}:{} has window_seconds 0",
                    p.category,
                    p.key_type
                );
            }
        }

        let cb = &self.circuit_breaker;
        if cb.failure_threshold == 0 {
            anyhow::bail!("circuit_breaker.failure_threshold must be > 0");
        }
        if cb.sweep_interval_secs == 0 {
            anyhow::bail!("circuit_breaker.sweep_interval_secs must be > 0");
        }

        let t = &self.threat;
        if !t.entropy_threshold.is_finite() || t.entropy_threshold <= 0.0 {
            anyhow::bail!("threat.entropy_threshold must be a positive number");
        }
        if !(t.special_char_ratio > 0.0 && t.special_char_ratio <= 1.0) {
            anyhow::bail!("threat.special_char_ratio must be in (0, 1]");
        }
        if t.max_scan_bytes == 0 || t.max_input_length == 0 {
            anyhow::bail!("threat.max_scan_bytes and threat.max_input_length must be > 0");
        }

        let s = &self.sanitization;
        if s.max_body_bytes == 0 {
            anyhow::bail!("sanitization.max_body_bytes must be > 0");
        }
        for h in &s.skip_headers {
            if let Err(e) = globset::Glob::new(&h.trim().to_ascii_lowercase()) {
                anyhow::bail!("sanitization.skip_headers entry '{}' is not a valid glob: {}", h, e);
            }
        }
        for p in &s.policies {
            if p.path.is_empty() {
                anyhow::bail!("sanitization policy has empty path");
            }
            if let Err(e) = globset::Glob::new(&p.path) {
                anyhow::bail!("sanitization policy '{}' has invalid glob: {}", p.path, e);
            }
            if p.block_threshold == 0 {
                anyhow::bail!("sanitization policy '{}' has block_threshold 0", p.path);
            }
        }

        let v = &self.violations;
        if v.window_secs == 0 || v.sweep_interval_secs == 0 {
            anyhow::bail!("violations.window_secs and violations.sweep_interval_secs must be > 0");
        }
        if v.max_violations_per_origin == 0 {
            anyhow::bail!("violations.max_violations_per_origin must be > 0");
        }
        if v.max_tracked_origins == 0 {
            anyhow::bail!("violations.max_tracked_origins must be > 0");
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("config: ignoring unparsable env override, name={}", name);
            None
        }
    }
}
