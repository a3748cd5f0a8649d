//! Resilience primitives wrapped around outbound API calls.
//!
//! [`ResilienceStack`] composes them in the order calls should meet them: the retry
//! policy drives attempts, each attempt takes a rate-limiter token, and the circuit
//! breaker guards the call itself.

pub mod circuit;
pub mod rate_limit;
pub mod retry;
pub mod stack;

pub use circuit::*;
pub use rate_limit::*;
pub use retry::*;
pub use stack::*;
