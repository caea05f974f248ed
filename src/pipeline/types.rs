//! Core data types for the ingestion pipeline
//!
//! Readings arrive from external sources (ground sensor networks, satellite
//! retrievals), are normalized to canonical units, and leave the pipeline as
//! `DomainEvent`s on the message bus. The event types here define the wire
//! schema consumed by downstream services.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pollutant / measurement kind tracked by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Pm25,
    Pm10,
    No2,
    O3,
    So2,
    Co,
    /// Aerosol optical depth (satellite retrievals, dimensionless)
    Aod,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Pm25 => "pm25",
            MetricType::Pm10 => "pm10",
            MetricType::No2 => "no2",
            MetricType::O3 => "o3",
            MetricType::So2 => "so2",
            MetricType::Co => "co",
            MetricType::Aod => "aod",
        }
    }
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data quality flag attached by the source. Satellite retrievals carry
/// per-pixel quality; ground sensors generally report `Good`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityFlag {
    Good,
    Medium,
    Low,
    Invalid,
}

/// Geographic point (WGS84 degrees).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

impl Location {
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

/// A single raw measurement as fetched from an external source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorReading {
    pub source_id: String,
    pub location: Location,
    pub metric: MetricType,
    pub value: f64,
    pub unit: String,
    pub observed_at: DateTime<Utc>,
    pub quality: QualityFlag,
}

/// Deterministic reading identity used for dedup and event idempotency.
///
/// Derived from (source, metric, 0.01° location bucket, observation time
/// rounded to the dedup window). Readings sharing a fingerprint inside one
/// window collapse to a single event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(reading: &SensorReading, dedup_window_secs: i64) -> Self {
        let lat_bucket = (reading.location.lat * 100.0).round() as i64;
        let lon_bucket = (reading.location.lon * 100.0).round() as i64;
        let window_bucket = reading
            .observed_at
            .timestamp()
            .div_euclid(dedup_window_secs.max(1));
        Fingerprint(format!(
            "{}:{}:{}x{}:{}",
            reading.source_id, reading.metric, lat_bucket, lon_bucket, window_bucket
        ))
    }

    /// Cache key used by the ingestion dedup check.
    pub fn dedup_key(&self) -> String {
        format!("dedup:{}", self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Event payload: the normalized reading as it crosses the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPayload {
    pub source_id: String,
    pub metric_type: MetricType,
    pub value: f64,
    pub unit: String,
    pub location: Location,
    pub observed_at: DateTime<Utc>,
}

pub const EVENT_READING_INGESTED: &str = "reading.ingested";

/// Domain event published to the message bus.
///
/// Wire schema (JSON): `event_type`, `correlation_id`, `idempotency_key`,
/// `occurred_at` (ISO-8601), `payload`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub event_type: String,
    pub correlation_id: String,
    pub idempotency_key: String,
    pub occurred_at: DateTime<Utc>,
    pub payload: EventPayload,
}

impl DomainEvent {
    /// Build the ingestion event for a validated, normalized reading.
    pub fn reading_ingested(reading: &SensorReading, fingerprint: &Fingerprint) -> Self {
        Self {
            event_type: EVENT_READING_INGESTED.to_string(),
            correlation_id: new_correlation_id(),
            idempotency_key: fingerprint.as_str().to_string(),
            occurred_at: Utc::now(),
            payload: EventPayload {
                source_id: reading.source_id.clone(),
                metric_type: reading.metric,
                value: reading.value,
                unit: reading.unit.clone(),
                location: reading.location,
                observed_at: reading.observed_at,
            },
        }
    }
}

/// Random 128-bit correlation id, hex-encoded.
pub fn new_correlation_id() -> String {
    hex::encode(rand::random::<u128>().to_be_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn make_reading(lat: f64, lon: f64, observed_at: i64) -> SensorReading {
        SensorReading {
            source_id: "ground_sensors".to_string(),
            location: Location { lat, lon },
            metric: MetricType::Pm25,
            value: 42.0,
            unit: "ug/m3".to_string(),
            observed_at: Utc.timestamp_opt(observed_at, 0).unwrap(),
            quality: QualityFlag::Good,
        }
    }

    #[test]
    fn test_fingerprint_stable_within_window() {
        // Test: two readings in the same 300s window share a fingerprint
        let a = make_reading(40.0, -73.9, 1000);
        let b = make_reading(40.0, -73.9, 1250);

        assert_eq!(Fingerprint::of(&a, 300), Fingerprint::of(&b, 300));
    }

    #[test]
    fn test_fingerprint_differs_across_windows() {
        let a = make_reading(40.0, -73.9, 1000);
        let b = make_reading(40.0, -73.9, 1600);

        assert_ne!(Fingerprint::of(&a, 300), Fingerprint::of(&b, 300));
    }

    #[test]
    fn test_fingerprint_location_bucket() {
        // Test: readings within the same 0.01° cell collapse, outside don't
        let a = make_reading(40.001, -73.902, 1000);
        let b = make_reading(40.002, -73.898, 1000);
        let c = make_reading(40.051, -73.9, 1000);

        assert_eq!(Fingerprint::of(&a, 300), Fingerprint::of(&b, 300));
        assert_ne!(Fingerprint::of(&a, 300), Fingerprint::of(&c, 300));
    }

    #[test]
    fn test_dedup_key_format() {
        let reading = make_reading(40.0, -73.9, 900);
        let fp = Fingerprint::of(&reading, 300);

        assert_eq!(fp.dedup_key(), "dedup:ground_sensors:pm25:4000x-7390:3");
    }

    #[test]
    fn test_location_validation() {
        assert!(Location { lat: 40.0, lon: -73.9 }.is_valid());
        assert!(!Location { lat: 91.0, lon: 0.0 }.is_valid());
        assert!(!Location { lat: 0.0, lon: -181.0 }.is_valid());
        assert!(!Location { lat: f64::NAN, lon: 0.0 }.is_valid());
    }

    #[test]
    fn test_event_wire_schema_fields() {
        // Test: serialized events expose the fields downstream services expect
        let reading = make_reading(40.0, -73.9, 1000);
        let fp = Fingerprint::of(&reading, 300);
        let event = DomainEvent::reading_ingested(&reading, &fp);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "reading.ingested");
        assert_eq!(json["idempotency_key"], fp.as_str());
        assert_eq!(json["payload"]["metric_type"], "pm25");
        assert_eq!(json["payload"]["source_id"], "ground_sensors");
        assert!(json["occurred_at"].is_string());
        assert_eq!(event.correlation_id.len(), 32);
    }
}
