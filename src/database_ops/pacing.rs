use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Time-based waits, swappable so backoff and pacing can run on a virtual clock in tests.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Gate taken before each unit of catalog work in a batch.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn acquire(&self);
}

/// Fixed spacing between consecutive acquisitions. The first acquisition never waits.
pub struct FixedInterval {
    interval: Duration,
    sleeper: Arc<dyn Sleeper>,
    primed: AtomicBool,
}

impl FixedInterval {
    pub fn new(interval: Duration, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            interval,
            sleeper,
            primed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl RateLimiter for FixedInterval {
    async fn acquire(&self) {
        if !self.primed.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.interval.is_zero() {
            return;
        }
        self.sleeper.sleep(self.interval).await;
    }
}
