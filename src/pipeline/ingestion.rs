//! Ingestion pipeline: validate, normalize, dedup, emit
//!
//! Each fetched batch passes through three stages in order. Validation drops
//! readings that can never be meaningful (non-finite values, impossible
//! coordinates, far-future timestamps, source-flagged invalid data).
//! Normalization converts surviving readings to canonical units. Dedup
//! collapses readings sharing a fingerprint within the dedup window to a
//! single event, using the cache's atomic `get_or_set` so concurrent task
//! units cannot double-emit.

use crate::cache::{Cache, GetOrSet};
use crate::pipeline::types::{DomainEvent, Fingerprint, QualityFlag, SensorReading};
use crate::pipeline::units;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Per-batch counters reported back to the scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub accepted: usize,
    pub rejected: usize,
    pub duplicates: usize,
}

pub struct IngestionPipeline {
    cache: Arc<dyn Cache>,
    dedup_window: Duration,
    max_future_skew: chrono::Duration,
    now_fn: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl IngestionPipeline {
    pub fn new(cache: Arc<dyn Cache>, dedup_window_secs: u64, max_future_skew_secs: i64) -> Self {
        Self::new_with_timestamp_fn(
            cache,
            dedup_window_secs,
            max_future_skew_secs,
            Box::new(Utc::now),
        )
    }

    /// Test constructor with injectable clock.
    pub fn new_with_timestamp_fn(
        cache: Arc<dyn Cache>,
        dedup_window_secs: u64,
        max_future_skew_secs: i64,
        now_fn: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    ) -> Self {
        Self {
            cache,
            dedup_window: Duration::from_secs(dedup_window_secs.max(1)),
            max_future_skew: chrono::Duration::seconds(max_future_skew_secs),
            now_fn,
        }
    }

    fn is_valid(&self, reading: &SensorReading, now: DateTime<Utc>) -> bool {
        if !reading.value.is_finite() {
            log::debug!("🚮 Dropped reading with non-finite value from {}", reading.source_id);
            return false;
        }
        if !reading.location.is_valid() {
            log::debug!(
                "🚮 Dropped reading with invalid coordinates ({}, {}) from {}",
                reading.location.lat,
                reading.location.lon,
                reading.source_id
            );
            return false;
        }
        if reading.observed_at > now + self.max_future_skew {
            log::debug!(
                "🚮 Dropped reading observed in the future ({}) from {}",
                reading.observed_at,
                reading.source_id
            );
            return false;
        }
        if reading.quality == QualityFlag::Invalid {
            log::debug!("🚮 Dropped reading flagged invalid by {}", reading.source_id);
            return false;
        }
        true
    }

    /// Process one fetched batch. Returns the emitted events in input order
    /// plus the batch counters.
    pub async fn process(&self, batch: Vec<SensorReading>) -> (Vec<DomainEvent>, BatchStats) {
        let now = (self.now_fn)();
        let mut events = Vec::new();
        let mut stats = BatchStats::default();

        for mut reading in batch {
            if !self.is_valid(&reading, now) {
                stats.rejected += 1;
                continue;
            }

            match units::to_canonical(reading.metric, reading.value, &reading.unit) {
                Some(value) => {
                    reading.value = value;
                    reading.unit = units::canonical_unit(reading.metric).to_string();
                }
                None => {
                    log::debug!(
                        "🚮 Dropped {} reading with unknown unit '{}'",
                        reading.metric,
                        reading.unit
                    );
                    stats.rejected += 1;
                    continue;
                }
            }

            let fingerprint = Fingerprint::of(&reading, self.dedup_window.as_secs() as i64);
            match self
                .cache
                .get_or_set(&fingerprint.dedup_key(), "1", self.dedup_window)
                .await
            {
                GetOrSet::Existing(_) => {
                    stats.duplicates += 1;
                }
                GetOrSet::Inserted => {
                    events.push(DomainEvent::reading_ingested(&reading, &fingerprint));
                    stats.accepted += 1;
                }
            }
        }

        (events, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::pipeline::types::{Location, MetricType};
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn pipeline() -> IngestionPipeline {
        IngestionPipeline::new_with_timestamp_fn(
            Arc::new(MemoryCache::new()),
            300,
            120,
            Box::new(fixed_now),
        )
    }

    fn reading(lat: f64, value: f64, unit: &str, offset_secs: i64) -> SensorReading {
        SensorReading {
            source_id: "ground_sensors".to_string(),
            location: Location { lat, lon: -73.9 },
            metric: MetricType::Pm25,
            value,
            unit: unit.to_string(),
            observed_at: fixed_now() + chrono::Duration::seconds(offset_secs),
            quality: QualityFlag::Good,
        }
    }

    #[tokio::test]
    async fn test_duplicate_collapses_to_one_event() {
        let pipeline = pipeline();

        let (events, stats) = pipeline
            .process(vec![reading(40.0, 42.0, "ug/m3", 0), reading(40.0, 43.0, "ug/m3", 10)])
            .await;

        assert_eq!(events.len(), 1);
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.rejected, 0);
    }

    #[tokio::test]
    async fn test_invalid_readings_rejected() {
        let pipeline = pipeline();

        let mut flagged = reading(40.2, 10.0, "ug/m3", 0);
        flagged.quality = QualityFlag::Invalid;

        let (events, stats) = pipeline
            .process(vec![
                reading(40.0, f64::NAN, "ug/m3", 0),
                reading(95.0, 10.0, "ug/m3", 0),
                reading(40.1, 10.0, "ug/m3", 600),
                flagged,
            ])
            .await;

        assert!(events.is_empty());
        assert_eq!(stats.rejected, 4);
    }

    #[tokio::test]
    async fn test_unit_conversion_applied() {
        let pipeline = pipeline();

        let (events, _) = pipeline
            .process(vec![reading(40.0, 0.042, "mg/m3", 0)])
            .await;

        assert_eq!(events.len(), 1);
        assert!((events[0].payload.value - 42.0).abs() < 1e-9);
        assert_eq!(events[0].payload.unit, "ug/m3");
    }

    #[tokio::test]
    async fn test_unknown_unit_rejected() {
        let pipeline = pipeline();

        let (events, stats) = pipeline
            .process(vec![reading(40.0, 1.0, "furlongs", 0)])
            .await;

        assert!(events.is_empty());
        assert_eq!(stats.rejected, 1);
    }

    #[tokio::test]
    async fn test_emission_preserves_input_order() {
        let pipeline = pipeline();

        let batch = vec![
            reading(40.0, 1.0, "ug/m3", 0),
            reading(41.0, 2.0, "ug/m3", 0),
            reading(42.0, 3.0, "ug/m3", 0),
        ];
        let (events, _) = pipeline.process(batch).await;

        let values: Vec<f64> = events.iter().map(|e| e.payload.value).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
    }
}
