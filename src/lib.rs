//! Aeroflow - environmental monitoring ingestion and alerting
//!
//! Periodically fetches air-quality measurements from external sources
//! (ground sensor networks, satellite retrievals), normalizes and
//! deduplicates them into domain events, and evaluates threshold alert
//! rules against the event stream.
//!
//! Layout:
//! - `scheduler` - periodic task scheduler (cadence, skip policy, backoff)
//! - `ingest_core` - external source client (retries, circuit breaker, rate limit)
//! - `pipeline` - validation, unit normalization, dedup, event publishing
//! - `alert_core` - rule evaluation, cooldown, notification
//! - `cache` - TTL cache with the atomic `get_or_set` primitive
//! - `runner` - glue executing one scheduled fetch end to end

pub mod alert_core;
pub mod cache;
pub mod ingest_core;
pub mod pipeline;
pub mod runner;
pub mod scheduler;
