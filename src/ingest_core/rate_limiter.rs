//! Token-bucket rate limiter for external API quotas

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Token bucket shared by every task unit hitting one source.
///
/// `acquire` suspends until a token is available; the burst capacity absorbs
/// short spikes without exceeding the sustained rate.
pub struct TokenBucket {
    inner: Mutex<BucketInner>,
    capacity: f64,
    refill_per_sec: f64,
}

struct BucketInner {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rate_per_sec: f64, burst: f64) -> Self {
        Self {
            inner: Mutex::new(BucketInner {
                tokens: burst,
                last_refill: Instant::now(),
            }),
            capacity: burst,
            refill_per_sec: rate_per_sec.max(f64::MIN_POSITIVE),
        }
    }

    fn refill(&self, inner: &mut BucketInner, now: Instant) {
        let elapsed = now.duration_since(inner.last_refill).as_secs_f64();
        inner.tokens = (inner.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        inner.last_refill = now;
    }

    /// Take one token, sleeping until the bucket refills when empty.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut inner = self.inner.lock().unwrap();
                self.refill(&mut inner, Instant::now());
                if inner.tokens >= 1.0 {
                    inner.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - inner.tokens) / self.refill_per_sec)
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Non-suspending variant.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        self.refill(&mut inner, Instant::now());
        if inner.tokens >= 1.0 {
            inner.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
