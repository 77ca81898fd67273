use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Pacing between enrichment calls. `acquire` returns once the next call is permitted.
#[async_trait]
pub trait RateLimiterPort: Send + Sync {
    async fn acquire(&self);
}

/// Waits a fixed interval every time it is acquired.
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl RateLimiterPort for FixedDelay {
    async fn acquire(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

/// Requests-per-minute token bucket, refilled continuously.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    // tokens available and the time they were last topped up
    state: Mutex<(f64, Instant)>,
}

impl TokenBucket {
    pub fn per_minute(requests_per_min: u32) -> Self {
        let capacity = requests_per_min.max(1) as f64;
        Self {
            capacity,
            state: Mutex::new((capacity, Instant::now())),
        }
    }

    fn refill_rate(&self) -> f64 {
        self.capacity / 60.0
    }
}

#[async_trait]
impl RateLimiterPort for TokenBucket {
    async fn acquire(&self) {
        loop {
            let mut guard = self.state.lock().await;
            let (ref mut tokens, ref mut last) = *guard;
            let now = Instant::now();
            let elapsed = now.duration_since(*last).as_secs_f64();
            *tokens = (*tokens + elapsed * self.refill_rate()).min(self.capacity);
            *last = now;
            if *tokens >= 1.0 {
                *tokens -= 1.0;
                break;
            }
            let need = 1.0 - *tokens;
            let secs = need / self.refill_rate();
            drop(guard);
            tokio::time::sleep(Duration::from_secs_f64(secs.max(0.001))).await;
        }
    }
}
