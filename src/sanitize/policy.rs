use crate::config::EndpointPolicyConfig;
use crate::error::GuardError;
use crate::identity::EndpointCategory;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;

/// Which input areas to analyze for a path, and the per-area score at
/// which the request is rejected instead of sanitized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SanitizationPolicy {
    pub check_query_params: bool,
    pub check_headers: bool,
    pub check_body: bool,
    pub block_threshold: u32,
}

impl SanitizationPolicy {
    const fn all(block_threshold: u32) -> Self {
        Self {
            check_query_params: true,
            check_headers: true,
            check_body: true,
            block_threshold,
        }
    }

    /// Built-in policy per category. Money-moving endpoints block on a single
    /// strong signature; catalog browsing tolerates far more noise.
    pub fn for_category(category: EndpointCategory) -> Self {
        match category {
            EndpointCategory::Payments => Self::all(20),
            EndpointCategory::Orders => Self::all(25),
            EndpointCategory::Cart => Self::all(30),
            EndpointCategory::PublicCatalog => Self::all(50),
            EndpointCategory::Default => Self::all(40),
        }
    }
}

impl From<&EndpointPolicyConfig> for SanitizationPolicy {
    fn from(c: &EndpointPolicyConfig) -> Self {
        Self {
            check_query_params: c.check_query_params,
            check_headers: c.check_headers,
            check_body: c.check_body,
            block_threshold: c.block_threshold,
        }
    }
}

/// Path-pattern policy lookup. Configured globs are tried in order and the
/// first match wins; unmatched paths fall back to the category default.
pub struct PolicyRegistry {
    globs: GlobSet,
    policies: Vec<SanitizationPolicy>,
}

impl PolicyRegistry {
    pub fn new(configs: &[EndpointPolicyConfig]) -> Result<Self, GuardError> {
        let mut builder = GlobSetBuilder::new();
        let mut policies = Vec::with_capacity(configs.len());
        for c in configs {
            builder.add(Glob::new(&c.path)?);
            policies.push(SanitizationPolicy::from(c));
        }
        Ok(Self {
            globs: builder.build()?,
            policies,
        })
    }

    pub fn get_policy_for(&self, path: &str) -> SanitizationPolicy {
        match self.globs.matches(path).into_iter().min() {
            Some(idx) => self.policies[idx],
            None => SanitizationPolicy::for_category(EndpointCategory::from_path(path)),
        }
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(path: &str, threshold: u32, check_body: bool) -> EndpointPolicyConfig {
        EndpointPolicyConfig {
            path: path.into(),
            check_query_params: true,
            check_headers: true,
            check_body,
            block_threshold: threshold,
        }
    }

    #[test]
    fn test_first_match_wins() {
        let reg = PolicyRegistry::new(&[
            cfg("/api/payments/refunds/**", 10, true),
            cfg("/api/payments/**", 20, true),
        ])
        .unwrap();
        assert_eq!(reg.get_policy_for("/api/payments/refunds/7").block_threshold, 10);
        assert_eq!(reg.get_policy_for("/api/payments/charge").block_threshold, 20);
    }

    #[test]
    fn test_falls_back_to_category() {
        let reg = PolicyRegistry::new(&[cfg("/api/products/**", 60, false)]).unwrap();
        let p = reg.get_policy_for("/api/products/9");
        assert_eq!(p.block_threshold, 60);
        assert!(!p.check_body);

        assert_eq!(reg.get_policy_for("/api/cart/items"), SanitizationPolicy::for_category(EndpointCategory::Cart));
        assert_eq!(reg.get_policy_for("/other").block_threshold, 40);
    }

    #[test]
    fn test_payments_stricter_than_catalog() {
        let payments = SanitizationPolicy::for_category(EndpointCategory::Payments);
        let catalog = SanitizationPolicy::for_category(EndpointCategory::PublicCatalog);
        assert!(payments.block_threshold < catalog.block_threshold);
    }

    #[test]
    fn test_invalid_glob_rejected() {
        assert!(PolicyRegistry::new(&[cfg("/api/[oops", 10, true)]).is_err());
    }
}
