mod circuit_breaker;

pub use circuit_breaker::{BreakerSnapshot, BreakerState, CircuitBreakerRegistry};
