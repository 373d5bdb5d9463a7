//! Token bucket shared by every outbound provider call.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::deadline::Deadline;
use crate::error::{ServiceError, ServiceResult};

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket limiter: `rate` tokens per second, holding at most `burst`.
pub struct RateLimiter {
    rate: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Start with a full bucket.
    pub fn new(rate_per_sec: f64, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            rate: rate_per_sec.max(1e-6),
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Wait for one token.
    ///
    /// Fails with `ResourceExhausted` without waiting when the next token
    /// would arrive after the caller's deadline.
    pub async fn acquire(&self, deadline: Deadline) -> ServiceResult<()> {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                self.refill(&mut bucket);
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return Ok(());
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.rate)
            };

            if let Some(left) = deadline.remaining() {
                if wait > left {
                    return Err(ServiceError::ResourceExhausted(format!(
                        "rate limit wait of {:?} exceeds deadline",
                        wait
                    )));
                }
            }

            debug!(wait_ms = wait.as_millis() as u64, "Waiting for rate limit token");
            tokio::time::sleep(wait).await;
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst);
        bucket.last_refill = now;
    }
}
