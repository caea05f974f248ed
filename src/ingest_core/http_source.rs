//! HTTP adapter for the external measurements API

use super::source_client::{FetchError, RawSource, SourceQuery};
use crate::pipeline::types::{Location, MetricType, QualityFlag, SensorReading};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

/// One measurement as returned by the upstream API.
#[derive(Debug, Deserialize)]
struct ApiMeasurement {
    parameter: String,
    value: f64,
    unit: String,
    latitude: f64,
    longitude: f64,
    #[serde(rename = "observedAt")]
    observed_at: DateTime<Utc>,
    quality: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    results: Vec<ApiMeasurement>,
}

pub struct HttpSource {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpSource {
    pub fn new(base_url: String, api_key: Option<String>, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url,
            api_key,
        }
    }

    fn parse_metric(parameter: &str) -> Option<MetricType> {
        match parameter.to_ascii_lowercase().as_str() {
            "pm25" | "pm2.5" => Some(MetricType::Pm25),
            "pm10" => Some(MetricType::Pm10),
            "no2" => Some(MetricType::No2),
            "o3" => Some(MetricType::O3),
            "so2" => Some(MetricType::So2),
            "co" => Some(MetricType::Co),
            "aod" => Some(MetricType::Aod),
            _ => None,
        }
    }

    fn parse_quality(quality: Option<&str>) -> QualityFlag {
        match quality.map(|q| q.to_ascii_lowercase()) {
            Some(q) if q == "medium" => QualityFlag::Medium,
            Some(q) if q == "low" => QualityFlag::Low,
            Some(q) if q == "invalid" => QualityFlag::Invalid,
            _ => QualityFlag::Good,
        }
    }

    fn to_readings(response: ApiResponse, source_id: &str) -> Vec<SensorReading> {
        response
            .results
            .into_iter()
            .filter_map(|m| {
                let metric = Self::parse_metric(&m.parameter)?;
                Some(SensorReading {
                    source_id: source_id.to_string(),
                    location: Location {
                        lat: m.latitude,
                        lon: m.longitude,
                    },
                    metric,
                    value: m.value,
                    unit: m.unit,
                    observed_at: m.observed_at,
                    quality: Self::parse_quality(m.quality.as_deref()),
                })
            })
            .collect()
    }
}

#[async_trait]
impl RawSource for HttpSource {
    async fn fetch_raw(&self, query: &SourceQuery) -> Result<Vec<SensorReading>, FetchError> {
        let bbox = format!(
            "{},{},{},{}",
            query.region.west, query.region.south, query.region.east, query.region.north
        );
        let params: Vec<(&str, String)> = vec![
            ("source", query.source_id.clone()),
            ("bbox", bbox),
            ("date_from", query.range.start.to_rfc3339()),
            ("date_to", query.range.end.to_rfc3339()),
        ];

        let url = format!("{}/v1/measurements", self.base_url);
        let mut request = self.client.get(&url).query(&params);
        if let Some(key) = &self.api_key {
            request = request.header("X-API-Key", key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                FetchError::Transient(format!("request failed: {}", e))
            } else {
                FetchError::Permanent(format!("request failed: {}", e))
            }
        })?;

        let status = response.status();
        if status.is_server_error()
            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status == reqwest::StatusCode::REQUEST_TIMEOUT
        {
            return Err(FetchError::Transient(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(FetchError::Permanent(format!("HTTP {}", status)));
        }

        let body: ApiResponse = response
            .json()
            .await
            .map_err(|e| FetchError::Permanent(format!("decode failed: {}", e)))?;

        Ok(Self::to_readings(body, &query.source_id))
    }
}
