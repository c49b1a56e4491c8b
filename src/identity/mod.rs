mod category;
mod key;
mod resolver;

pub use category::EndpointCategory;
pub use key::{sanitize_ip, sanitize_user_id, KeyType, RateLimitKey, ANONYMOUS, UNKNOWN_IP};
pub use resolver::{Identity, IdentityResolver, Resolution};
