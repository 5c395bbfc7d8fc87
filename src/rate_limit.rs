//! Shared request budget.
//!
//! Every outbound API request first acquires a token from a
//! [`RequestBudget`]. The fetcher holds the budget behind an `Arc`, so all
//! concurrently running sync units draw from the same bucket.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[async_trait]
pub trait RequestBudget: Send + Sync {
    /// Suspend until one request may be sent.
    async fn acquire(&self);
}

/// Sliding-window token bucket: at most `capacity` grants in any `window`.
///
/// A spent token becomes available again exactly one window after it was
/// granted, so bursts never exceed `capacity` even at window boundaries.
/// Waiters queue on a `tokio::sync::Mutex`, which is FIFO, and the lock is
/// held while the head waiter sleeps, so grants are handed out in arrival
/// order.
pub struct TokenBucket {
    capacity: usize,
    window: Duration,
    grants: Mutex<VecDeque<Instant>>,
}

impl TokenBucket {
    /// `requests_per_second` tokens per one-second window. Zero is treated
    /// as one.
    pub fn per_second(requests_per_second: u32) -> Self {
        Self::new(requests_per_second.max(1) as usize, Duration::from_secs(1))
    }

    pub fn new(capacity: usize, window: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            window,
            grants: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[async_trait]
impl RequestBudget for TokenBucket {
    async fn acquire(&self) {
        let mut grants = self.grants.lock().await;
        loop {
            let now = Instant::now();
            while let Some(&oldest) = grants.front() {
                if now.duration_since(oldest) >= self.window {
                    grants.pop_front();
                } else {
                    break;
                }
            }
            if grants.len() < self.capacity {
                grants.push_back(now);
                return;
            }
            if let Some(&oldest) = grants.front() {
                tokio::time::sleep_until(oldest + self.window).await;
            }
        }
    }
}

/// No limit at all; for tests and local mocks.
pub struct Unlimited;

#[async_trait]
impl RequestBudget for Unlimited {
    async fn acquire(&self) {}
}
