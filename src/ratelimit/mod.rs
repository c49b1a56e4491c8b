mod limiter;
mod policy;
mod store;

pub use limiter::{RateLimitDecision, RateLimiter};
pub use policy::{PolicyTable, RateLimitPolicy};
pub use store::{BucketOutcome, BucketStore, MemoryBucketStore};
