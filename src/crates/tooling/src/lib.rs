//! Shared utilities for the agentflow workspace
//!
//! This crate carries the ambient concerns the execution crates lean on:
//!
//! - `async_utils` - Backoff policies and deadline helpers for async operations
//! - `rate_limit` - Sliding window rate limiting with blocking acquire
//! - `logging` - Structured logging helpers built on `tracing`
//! - `config` - Environment-driven runtime settings
//! - `validation` - Lightweight JSON schema checks for tool inputs

pub mod async_utils;
pub mod config;
pub mod logging;
pub mod rate_limit;
pub mod validation;

pub use async_utils::retry::{run_with_retry, Backoff};
pub use async_utils::timeout::{with_timeout, TimeoutError};
pub use rate_limit::SlidingWindowLimiter;

/// Get version information
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
