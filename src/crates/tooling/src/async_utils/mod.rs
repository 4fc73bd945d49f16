//! Async utilities for common async patterns
//!
//! - Backoff policies with exponential delay and jitter
//! - Deadline wrappers for slow operations
//!
//! # Example
//!
//! ```rust,ignore
//! use tooling::async_utils::retry::{Backoff, run_with_retry};
//! use tooling::async_utils::timeout::with_timeout;
//! use std::time::Duration;
//!
//! let backoff = Backoff::new(3).with_initial_delay(Duration::from_millis(100));
//!
//! let result = run_with_retry(&backoff, || async {
//!     with_timeout(Duration::from_secs(10), async {
//!         // operation that may fail transiently
//!         Ok::<_, String>("done".to_string())
//!     })
//!     .await
//!     .map_err(|e| e.to_string())?
//! })
//! .await;
//! ```

pub mod retry;
pub mod timeout;
