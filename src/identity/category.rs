use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical endpoint class. Drives policy lookup for every other subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointCategory {
    PublicCatalog,
    Cart,
    Orders,
    Payments,
    Default,
}

/// Prefix table, checked in order. First match wins.
const PREFIXES: &[(&str, EndpointCategory)] = &[
    ("/api/orders", EndpointCategory::Orders),
    ("/api/payments", EndpointCategory::Payments),
    ("/api/cart", EndpointCategory::Cart),
    ("/api/products", EndpointCategory::PublicCatalog),
    ("/api/catalog", EndpointCategory::PublicCatalog),
];

impl EndpointCategory {
    pub const ALL: [EndpointCategory; 5] = [
        EndpointCategory::PublicCatalog,
        EndpointCategory::Cart,
        EndpointCategory::Orders,
        EndpointCategory::Payments,
        EndpointCategory::Default,
    ];

    /// Classify a request path. Depends on nothing but the path.
    pub fn from_path(path: &str) -> Self {
        PREFIXES
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix))
            .map(|(_, category)| *category)
            .unwrap_or(EndpointCategory::Default)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointCategory::PublicCatalog => "public_catalog",
            EndpointCategory::Cart => "cart",
            EndpointCategory::Orders => "orders",
            EndpointCategory::Payments => "payments",
            EndpointCategory::Default => "default",
        }
    }

    /// Categories that move money. Used for fail-closed defaults.
    pub fn is_financial(&self) -> bool {
        matches!(self, EndpointCategory::Orders | EndpointCategory::Payments)
    }

    /// Categories gated on both the user and the IP bucket.
    pub fn is_dual_gated(&self) -> bool {
        matches!(
            self,
            EndpointCategory::Cart | EndpointCategory::Orders | EndpointCategory::Payments
        )
    }
}

impl fmt::Display for EndpointCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
