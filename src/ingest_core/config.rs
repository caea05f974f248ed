use std::env;

/// External-source client configuration.
///
/// Loaded from environment variables with defaults matching typical
/// third-party API quotas.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
    pub rate_limit_per_sec: f64,
    pub rate_burst: f64,
    pub breaker_failure_threshold: u32,
    pub breaker_window_secs: u64,
    pub breaker_cooldown_secs: u64,
    pub fetch_max_retries: u32,
    pub fetch_retry_initial_ms: u64,
    pub fetch_retry_max_ms: u64,
}

#[derive(Debug)]
pub enum ConfigError {
    MissingVariable(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingVariable(var) => write!(f, "Missing environment variable: {}", var),
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> T {
    env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl SourceConfig {
    /// Load from environment variables.
    ///
    /// - `AEROFLOW_SOURCE_URL` (required)
    /// - `AEROFLOW_SOURCE_API_KEY` (optional)
    /// - `AEROFLOW_SOURCE_TIMEOUT_SECS` (default: 10)
    /// - `AEROFLOW_SOURCE_RATE_LIMIT` requests/sec (default: 5)
    /// - `AEROFLOW_SOURCE_RATE_BURST` (default: 10)
    /// - `AEROFLOW_BREAKER_THRESHOLD` (default: 5)
    /// - `AEROFLOW_BREAKER_WINDOW_SECS` (default: 60)
    /// - `AEROFLOW_BREAKER_COOLDOWN_SECS` (default: 30)
    /// - `AEROFLOW_FETCH_MAX_RETRIES` (default: 3)
    /// - `AEROFLOW_FETCH_RETRY_INITIAL_MS` (default: 500)
    /// - `AEROFLOW_FETCH_RETRY_MAX_MS` (default: 10000)
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = env::var("AEROFLOW_SOURCE_URL")
            .map_err(|_| ConfigError::MissingVariable("AEROFLOW_SOURCE_URL".to_string()))?;

        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "AEROFLOW_SOURCE_URL must start with http:// or https://".to_string(),
            ));
        }

        let api_key = env::var("AEROFLOW_SOURCE_API_KEY").ok();

        Ok(Self {
            base_url,
            api_key,
            request_timeout_secs: env_parse("AEROFLOW_SOURCE_TIMEOUT_SECS", 10),
            rate_limit_per_sec: env_parse("AEROFLOW_SOURCE_RATE_LIMIT", 5.0),
            rate_burst: env_parse("AEROFLOW_SOURCE_RATE_BURST", 10.0),
            breaker_failure_threshold: env_parse("AEROFLOW_BREAKER_THRESHOLD", 5),
            breaker_window_secs: env_parse("AEROFLOW_BREAKER_WINDOW_SECS", 60),
            breaker_cooldown_secs: env_parse("AEROFLOW_BREAKER_COOLDOWN_SECS", 30),
            fetch_max_retries: env_parse("AEROFLOW_FETCH_MAX_RETRIES", 3),
            fetch_retry_initial_ms: env_parse("AEROFLOW_FETCH_RETRY_INITIAL_MS", 500),
            fetch_retry_max_ms: env_parse("AEROFLOW_FETCH_RETRY_MAX_MS", 10_000),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit_per_sec <= 0.0 {
            return Err(ConfigError::InvalidValue(
                "rate limit must be positive".to_string(),
            ));
        }
        if self.rate_burst < 1.0 {
            return Err(ConfigError::InvalidValue(
                "rate burst must allow at least one request".to_string(),
            ));
        }
        if self.breaker_failure_threshold == 0 {
            return Err(ConfigError::InvalidValue(
                "breaker threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> SourceConfig {
        SourceConfig {
            base_url: "https://api.example.test".to_string(),
            api_key: None,
            request_timeout_secs: 10,
            rate_limit_per_sec: 5.0,
            rate_burst: 10.0,
            breaker_failure_threshold: 5,
            breaker_window_secs: 60,
            breaker_cooldown_secs: 30,
            fetch_max_retries: 3,
            fetch_retry_initial_ms: 500,
            fetch_retry_max_ms: 10_000,
        }
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = base_config();
        config.rate_limit_per_sec = 0.0;
        assert!(config.validate().is_err());

        let mut config = base_config();
        config.breaker_failure_threshold = 0;
        assert!(config.validate().is_err());
    }
}
