//! Request rate gate
//!
//! One [`RateLimiter`] is shared by every listing task of a refresh, so the
//! aggregate request rate stays bounded no matter how wide the fan-out is.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{interval, Interval, MissedTickBehavior};

/// Admission gate awaited before every page request
#[async_trait]
pub trait Throttle: Send + Sync {
    /// Wait until the caller may issue its next request
    async fn admit(&self);
}

/// Fixed-frequency gate: at most `n` admissions per second across all callers.
///
/// Waiters are served in arrival order. Consecutive admissions are always at
/// least one period apart, an idle gate does not bank ticks.
pub struct RateLimiter {
    ticker: Mutex<Interval>,
    period: Duration,
}

impl RateLimiter {
    /// Must be called from within a tokio runtime
    pub fn per_second(admissions: u32) -> Self {
        let period = Duration::from_secs(1) / admissions.max(1);
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            ticker: Mutex::new(ticker),
            period,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

#[async_trait]
impl Throttle for RateLimiter {
    async fn admit(&self) {
        self.ticker.lock().await.tick().await;
    }
}

/// Gate that never blocks
#[derive(Debug, Default, Clone, Copy)]
pub struct Unthrottled;

#[async_trait]
impl Throttle for Unthrottled {
    async fn admit(&self) {}
}
