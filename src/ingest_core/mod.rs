pub mod backoff;
pub mod circuit_breaker;
pub mod config;
pub mod http_source;
pub mod rate_limiter;
pub mod source_client;

pub use backoff::ExponentialBackoff;
pub use circuit_breaker::{BreakerConfig, CircuitBreaker, CircuitState};
pub use config::{ConfigError, SourceConfig};
pub use http_source::HttpSource;
pub use rate_limiter::TokenBucket;
pub use source_client::{
    BoundingRegion, ExternalDataClient, FetchError, RawSource, SourceQuery, TimeRange,
};
