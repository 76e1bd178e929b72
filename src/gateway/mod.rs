//! Upstream gateway stack.
//!
//! Composition order per call: retry engine outside, circuit breaker inside,
//! HTTP transport innermost. The breaker counts one failure per underlying
//! attempt, and the retry engine gives up as soon as the breaker opens.

pub mod breaker;
pub mod http;
pub mod retry;
pub mod social;

pub use breaker::{BreakerConfig, BreakerError, CircuitBreaker, CircuitState};
pub use http::{GatewayError, HttpTransport, Transport, UpstreamRequest};
pub use retry::{RetryConfig, RetryEngine};
pub use social::SocialGateway;
