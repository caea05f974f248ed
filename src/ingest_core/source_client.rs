//! External data client: retries, circuit breaking, rate limiting
//!
//! Wraps a raw source (HTTP adapter in production, fixtures in tests) so task
//! units get a single `fetch` call with the full failure policy applied.
//! Breaker and limiter state is shared by every task unit targeting this
//! source: clone the `Arc` holding the client rather than building a second
//! client for the same source.

use super::backoff::ExponentialBackoff;
use super::circuit_breaker::{BreakerConfig, CircuitBreaker, CircuitState};
use super::config::SourceConfig;
use super::rate_limiter::TokenBucket;
use crate::pipeline::types::SensorReading;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
pub enum FetchError {
    /// Timeout, 5xx, or rate-limited upstream. Retried; counts toward the
    /// breaker threshold.
    Transient(String),
    /// Malformed query or auth failure. Never retried.
    Permanent(String),
    /// Breaker is open; the source was not contacted.
    CircuitOpen,
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Transient(msg) => write!(f, "Transient fetch error: {}", msg),
            FetchError::Permanent(msg) => write!(f, "Permanent fetch error: {}", msg),
            FetchError::CircuitOpen => write!(f, "Circuit open: source not contacted"),
        }
    }
}

impl std::error::Error for FetchError {}

/// Query passed to the external source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceQuery {
    pub source_id: String,
    pub region: BoundingRegion,
    pub range: TimeRange,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BoundingRegion {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Raw transport behind the client (HTTP adapter in production).
#[async_trait]
pub trait RawSource: Send + Sync {
    async fn fetch_raw(&self, query: &SourceQuery) -> Result<Vec<SensorReading>, FetchError>;
}

pub struct ExternalDataClient {
    source: Arc<dyn RawSource>,
    breaker: CircuitBreaker,
    limiter: TokenBucket,
    max_retries: u32,
    retry_initial_ms: u64,
    retry_max_ms: u64,
}

impl ExternalDataClient {
    pub fn new(source: Arc<dyn RawSource>, config: &SourceConfig) -> Self {
        Self {
            source,
            breaker: CircuitBreaker::new(BreakerConfig {
                failure_threshold: config.breaker_failure_threshold,
                window: Duration::from_secs(config.breaker_window_secs),
                cooldown: Duration::from_secs(config.breaker_cooldown_secs),
            }),
            limiter: TokenBucket::new(config.rate_limit_per_sec, config.rate_burst),
            max_retries: config.fetch_max_retries,
            retry_initial_ms: config.fetch_retry_initial_ms,
            retry_max_ms: config.fetch_retry_max_ms,
        }
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Fetch a batch of readings with the full failure policy applied.
    ///
    /// Transient errors are retried with exponential backoff up to the retry
    /// ceiling and trip the breaker; permanent errors surface immediately;
    /// an open breaker fails fast with `CircuitOpen`.
    pub async fn fetch(&self, query: &SourceQuery) -> Result<Vec<SensorReading>, FetchError> {
        let mut backoff =
            ExponentialBackoff::new(self.retry_initial_ms, self.retry_max_ms, self.max_retries);

        loop {
            if !self.breaker.try_acquire() {
                return Err(FetchError::CircuitOpen);
            }
            self.limiter.acquire().await;

            match self.source.fetch_raw(query).await {
                Ok(batch) => {
                    self.breaker.record_success();
                    return Ok(batch);
                }
                Err(FetchError::Transient(msg)) => {
                    self.breaker.record_failure();
                    log::warn!(
                        "⚠️  Transient fetch error from {}: {}",
                        query.source_id,
                        msg
                    );
                    if backoff.sleep().await.is_err() {
                        return Err(FetchError::Transient(msg));
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{Location, MetricType, QualityFlag};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedSource {
        calls: AtomicUsize,
        failures_before_success: usize,
        permanent: bool,
    }

    impl ScriptedSource {
        fn failing(failures_before_success: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                failures_before_success,
                permanent: false,
            }
        }

        fn permanent() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                failures_before_success: usize::MAX,
                permanent: true,
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RawSource for ScriptedSource {
        async fn fetch_raw(
            &self,
            query: &SourceQuery,
        ) -> Result<Vec<SensorReading>, FetchError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.permanent {
                return Err(FetchError::Permanent("bad query".to_string()));
            }
            if n < self.failures_before_success {
                return Err(FetchError::Transient("timeout".to_string()));
            }
            Ok(vec![SensorReading {
                source_id: query.source_id.clone(),
                location: Location { lat: 40.0, lon: -73.9 },
                metric: MetricType::Pm25,
                value: 12.0,
                unit: "ug/m3".to_string(),
                observed_at: Utc::now(),
                quality: QualityFlag::Good,
            }])
        }
    }

    fn test_config(threshold: u32, retries: u32) -> SourceConfig {
        SourceConfig {
            base_url: "https://api.example.test".to_string(),
            api_key: None,
            request_timeout_secs: 1,
            rate_limit_per_sec: 10_000.0,
            rate_burst: 10_000.0,
            breaker_failure_threshold: threshold,
            breaker_window_secs: 60,
            breaker_cooldown_secs: 60,
            fetch_max_retries: retries,
            fetch_retry_initial_ms: 1,
            fetch_retry_max_ms: 1,
        }
    }

    fn query() -> SourceQuery {
        SourceQuery {
            source_id: "ground_sensors".to_string(),
            region: BoundingRegion {
                north: 41.0,
                south: 40.0,
                east: -73.0,
                west: -74.0,
            },
            range: TimeRange {
                start: Utc::now() - chrono::Duration::hours(1),
                end: Utc::now(),
            },
        }
    }

    #[tokio::test]
    async fn test_transient_errors_retried_then_succeed() {
        let source = Arc::new(ScriptedSource::failing(2));
        let client = ExternalDataClient::new(source.clone(), &test_config(10, 3));

        let batch = client.fetch(&query()).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(source.call_count(), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let source = Arc::new(ScriptedSource::permanent());
        let client = ExternalDataClient::new(source.clone(), &test_config(10, 3));

        let err = client.fetch(&query()).await.unwrap_err();
        assert!(matches!(err, FetchError::Permanent(_)));
        assert_eq!(source.call_count(), 1);
    }

    #[tokio::test]
    async fn test_circuit_opens_and_fails_fast() {
        // Test: 5 consecutive timeouts open the circuit; the next call fails
        // immediately without contacting the source
        let source = Arc::new(ScriptedSource::failing(usize::MAX));
        let client = ExternalDataClient::new(source.clone(), &test_config(5, 0));

        for _ in 0..5 {
            let err = client.fetch(&query()).await.unwrap_err();
            assert!(err.is_transient());
        }
        assert_eq!(source.call_count(), 5);
        assert_eq!(client.circuit_state(), CircuitState::Open);

        let err = client.fetch(&query()).await.unwrap_err();
        assert!(matches!(err, FetchError::CircuitOpen));
        assert_eq!(source.call_count(), 5);
    }
}
