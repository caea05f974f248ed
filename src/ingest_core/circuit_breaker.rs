//! Circuit breaker guarding one external source
//!
//! State machine: closed → open after `failure_threshold` consecutive
//! transient failures within the sliding `window`; while open every call
//! fails fast without contacting the source; after `cooldown` one half-open
//! probe is allowed. Probe success closes the circuit, probe failure reopens
//! it and restarts the cooldown.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub window: Duration,
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Shared per external source; safe under concurrent task units.
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: VecDeque::new(),
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Ask permission for one call. Returns `false` while the circuit is
    /// open (fail fast, do not contact the source). May transition
    /// open → half-open once the cooldown has elapsed, in which case exactly
    /// one caller gets the probe slot.
    pub fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled = inner
                    .opened_at
                    .map_or(true, |t| now.duration_since(t) >= self.config.cooldown);
                if cooled {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    log::info!("🔌 Circuit half-open: allowing one probe call");
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != CircuitState::Closed {
            log::info!("🔌 Circuit closed after successful probe");
        }
        inner.state = CircuitState::Closed;
        inner.failures.clear();
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }

    /// Record a transient failure. Permanent failures do not trip the
    /// breaker; the caller filters.
    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                inner.probe_in_flight = false;
                inner.failures.clear();
                log::warn!("🔌 Probe failed, circuit re-opened");
            }
            CircuitState::Open => {}
            CircuitState::Closed => {
                inner.failures.push_back(now);
                while let Some(first) = inner.failures.front() {
                    if now.duration_since(*first) > self.config.window {
                        inner.failures.pop_front();
                    } else {
                        break;
                    }
                }
                if inner.failures.len() as u32 >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                    inner.failures.clear();
                    log::warn!(
                        "🔌 Circuit opened after {} consecutive transient failures",
                        self.config.failure_threshold
                    );
                }
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, cooldown_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig {
            failure_threshold: threshold,
            window: Duration::from_secs(60),
            cooldown: Duration::from_millis(cooldown_ms),
        })
    }

    #[test]
    fn test_opens_after_threshold() {
        let cb = breaker(5, 1000);

        for _ in 0..4 {
            assert!(cb.try_acquire());
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Closed);

        assert!(cb.try_acquire());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.try_acquire());
    }

    #[test]
    fn test_success_resets_consecutive_count() {
        let cb = breaker(3, 1000);

        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();

        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_probe_success_closes() {
        let cb = breaker(1, 10);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.try_acquire());

        std::thread::sleep(Duration::from_millis(20));

        // One probe slot only
        assert!(cb.try_acquire());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(!cb.try_acquire());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.try_acquire());
    }

    #[test]
    fn test_half_open_probe_failure_reopens() {
        let cb = breaker(1, 10);

        cb.record_failure();
        std::thread::sleep(Duration::from_millis(20));
        assert!(cb.try_acquire());

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.try_acquire());
    }
}
