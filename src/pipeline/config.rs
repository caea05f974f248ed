use std::env;

fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> T {
    env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Runtime configuration for the ingestion pipeline and scheduler.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub enabled: bool,
    pub channel_buffer: usize,
    pub dedup_window_secs: u64,
    pub max_future_skew_secs: i64,
    pub publish_max_retries: u32,
    pub publish_retry_delay_ms: u64,
    pub event_seen_ttl_secs: u64,
    pub scheduler_tick_ms: u64,
    pub max_concurrency: usize,
    pub jitter_ms: u64,
    pub task_backoff_base_secs: u64,
    pub task_backoff_cap_secs: u64,
    pub stop_grace_secs: u64,
}

impl PipelineConfig {
    /// Load from environment variables, falling back to defaults.
    ///
    /// - `AEROFLOW_ENABLE_PIPELINE` (default: true)
    /// - `AEROFLOW_CHANNEL_BUFFER` (default: 10000)
    /// - `AEROFLOW_DEDUP_WINDOW_SECS` (default: 300)
    /// - `AEROFLOW_MAX_FUTURE_SKEW_SECS` (default: 120)
    /// - `AEROFLOW_PUBLISH_MAX_RETRIES` (default: 3)
    /// - `AEROFLOW_PUBLISH_RETRY_DELAY_MS` (default: 200)
    /// - `AEROFLOW_EVENT_SEEN_TTL_SECS` (default: 600)
    /// - `AEROFLOW_SCHEDULER_TICK_MS` (default: 1000)
    /// - `AEROFLOW_MAX_CONCURRENCY` (default: 4)
    /// - `AEROFLOW_JITTER_MS` (default: 2000)
    /// - `AEROFLOW_TASK_BACKOFF_BASE_SECS` (default: 30)
    /// - `AEROFLOW_TASK_BACKOFF_CAP_SECS` (default: 3600)
    /// - `AEROFLOW_STOP_GRACE_SECS` (default: 10)
    pub fn from_env() -> Self {
        let enabled = env::var("AEROFLOW_ENABLE_PIPELINE")
            .map(|v| v.to_lowercase() == "true" || v == "1")
            .unwrap_or(true);

        Self {
            enabled,
            channel_buffer: env_parse("AEROFLOW_CHANNEL_BUFFER", 10_000),
            dedup_window_secs: env_parse("AEROFLOW_DEDUP_WINDOW_SECS", 300),
            max_future_skew_secs: env_parse("AEROFLOW_MAX_FUTURE_SKEW_SECS", 120),
            publish_max_retries: env_parse("AEROFLOW_PUBLISH_MAX_RETRIES", 3),
            publish_retry_delay_ms: env_parse("AEROFLOW_PUBLISH_RETRY_DELAY_MS", 200),
            event_seen_ttl_secs: env_parse("AEROFLOW_EVENT_SEEN_TTL_SECS", 600),
            scheduler_tick_ms: env_parse("AEROFLOW_SCHEDULER_TICK_MS", 1000),
            max_concurrency: env_parse("AEROFLOW_MAX_CONCURRENCY", 4),
            jitter_ms: env_parse("AEROFLOW_JITTER_MS", 2000),
            task_backoff_base_secs: env_parse("AEROFLOW_TASK_BACKOFF_BASE_SECS", 30),
            task_backoff_cap_secs: env_parse("AEROFLOW_TASK_BACKOFF_CAP_SECS", 3600),
            stop_grace_secs: env_parse("AEROFLOW_STOP_GRACE_SECS", 10),
        }
    }
}
