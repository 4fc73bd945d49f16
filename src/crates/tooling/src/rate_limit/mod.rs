//! Rate limiting utilities
//!
//! A sliding-window limiter bounding how many operations may start within a
//! rolling time window. Callers either poll with [`SlidingWindowLimiter::try_acquire`]
//! or block on [`SlidingWindowLimiter::acquire`] until a slot frees up.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Sliding window rate limiter
///
/// Tracks the start time of recent operations; an operation is admitted when
/// fewer than `max_operations` started within the trailing window.
#[derive(Clone)]
pub struct SlidingWindowLimiter {
    state: Arc<Mutex<WindowState>>,
}

struct WindowState {
    max_operations: usize,
    window: Duration,
    started: Vec<Instant>,
}

impl SlidingWindowLimiter {
    /// Create a limiter admitting `max_operations` per `window`
    pub fn new(max_operations: usize, window: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(WindowState {
                max_operations,
                window,
                started: Vec::new(),
            })),
        }
    }

    /// Try to admit an operation without blocking
    ///
    /// Returns `true` and records the operation when the window has room.
    pub async fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.evict(now);

        if state.started.len() < state.max_operations {
            state.started.push(now);
            true
        } else {
            false
        }
    }

    /// Block until an operation is admitted
    ///
    /// Sleeps until the oldest recorded operation ages out of the window,
    /// then retries.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                state.evict(now);

                if state.started.len() < state.max_operations {
                    state.started.push(now);
                    return;
                }

                // Time until the oldest entry leaves the window.
                let oldest = state.started[0];
                state.window.saturating_sub(now.duration_since(oldest))
            };

            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }

    /// Block until admitted or the token is cancelled
    ///
    /// Returns `false` when cancellation won the race.
    pub async fn acquire_with_cancellation(&self, token: &CancellationToken) -> bool {
        tokio::select! {
            _ = self.acquire() => true,
            _ = token.cancelled() => false,
        }
    }

    /// Number of operations recorded in the current window
    pub async fn in_flight(&self) -> usize {
        let mut state = self.state.lock().await;
        state.evict(Instant::now());
        state.started.len()
    }

    /// Forget all recorded operations
    pub async fn reset(&self) {
        self.state.lock().await.started.clear();
    }
}

impl WindowState {
    fn evict(&mut self, now: Instant) {
        let window = self.window;
        self.started.retain(|&t| now.duration_since(t) < window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_admits_up_to_limit() {
        let limiter = SlidingWindowLimiter::new(3, Duration::from_secs(1));

        assert!(limiter.try_acquire().await);
        assert!(limiter.try_acquire().await);
        assert!(limiter.try_acquire().await);
        assert!(!limiter.try_acquire().await);
        assert_eq!(limiter.in_flight().await, 3);
    }

    #[tokio::test]
    async fn test_window_ages_out() {
        let limiter = SlidingWindowLimiter::new(2, Duration::from_millis(50));

        assert!(limiter.try_acquire().await);
        assert!(limiter.try_acquire().await);
        assert!(!limiter.try_acquire().await);

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(limiter.try_acquire().await);
        assert_eq!(limiter.in_flight().await, 1);
    }

    #[tokio::test]
    async fn test_acquire_blocks_until_slot_frees() {
        let limiter = SlidingWindowLimiter::new(1, Duration::from_millis(50));
        limiter.try_acquire().await;

        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_acquire_respects_cancellation() {
        let limiter = SlidingWindowLimiter::new(1, Duration::from_secs(60));
        limiter.try_acquire().await;

        let token = CancellationToken::new();
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
        });

        assert!(!limiter.acquire_with_cancellation(&token).await);
    }

    #[tokio::test]
    async fn test_reset() {
        let limiter = SlidingWindowLimiter::new(2, Duration::from_secs(1));
        limiter.try_acquire().await;
        limiter.try_acquire().await;

        limiter.reset().await;
        assert_eq!(limiter.in_flight().await, 0);
    }
}
