pub mod breaker;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod guard;
pub mod identity;
pub mod metrics;
pub mod ratelimit;
pub mod sanitize;
pub mod server;
mod sweeper;
pub mod threat;
