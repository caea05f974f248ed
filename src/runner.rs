//! Task runner wiring fetch → pipeline → publisher
//!
//! One `IngestRunner` serves every scheduled task; each task names its
//! source by id. The runner checks the cancel signal between stages and
//! before each publish so graceful shutdown interrupts a run at the next
//! suspension point instead of waiting out a slow source.

use crate::ingest_core::source_client::{ExternalDataClient, FetchError};
use crate::pipeline::ingestion::IngestionPipeline;
use crate::pipeline::publisher::ReliablePublisher;
use crate::scheduler::{RunError, RunStats, ScheduledTask, TaskRunner};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

pub struct IngestRunner {
    clients: HashMap<String, Arc<ExternalDataClient>>,
    pipeline: Arc<IngestionPipeline>,
    publisher: Arc<ReliablePublisher>,
}

impl IngestRunner {
    pub fn new(pipeline: Arc<IngestionPipeline>, publisher: Arc<ReliablePublisher>) -> Self {
        Self {
            clients: HashMap::new(),
            pipeline,
            publisher,
        }
    }

    /// Register the client for one source id. Tasks referencing an
    /// unregistered source fail their runs.
    pub fn add_source(&mut self, source_id: impl Into<String>, client: Arc<ExternalDataClient>) {
        self.clients.insert(source_id.into(), client);
    }
}

#[async_trait]
impl TaskRunner for IngestRunner {
    async fn run(
        &self,
        task: &ScheduledTask,
        cancel: watch::Receiver<bool>,
    ) -> Result<RunStats, RunError> {
        let client = self
            .clients
            .get(&task.spec.source_id)
            .ok_or_else(|| {
                RunError::Failed(format!("no client for source {}", task.spec.source_id))
            })?;

        if *cancel.borrow() {
            return Err(RunError::Cancelled);
        }

        let query = task.spec.to_query(Utc::now());
        let batch = match client.fetch(&query).await {
            Ok(batch) => batch,
            Err(FetchError::CircuitOpen) => return Err(RunError::CircuitOpen),
            Err(err) => return Err(RunError::Failed(err.to_string())),
        };

        if *cancel.borrow() {
            return Err(RunError::Cancelled);
        }

        let fetched = batch.len();
        let (events, stats) = self.pipeline.process(batch).await;

        let mut dead_lettered = 0;
        for event in &events {
            if *cancel.borrow() {
                return Err(RunError::Cancelled);
            }
            if !self.publisher.publish(event).await {
                dead_lettered += 1;
            }
        }

        Ok(RunStats {
            fetched,
            events: events.len(),
            rejected: stats.rejected,
            duplicates: stats.duplicates,
            dead_lettered,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::ingest_core::config::SourceConfig;
    use crate::ingest_core::source_client::{BoundingRegion, RawSource, SourceQuery};
    use crate::pipeline::publisher::{ChannelPublisher, EventPublisher};
    use crate::pipeline::types::{Location, MetricType, QualityFlag, SensorReading};
    use crate::scheduler::{FetchSpec, Schedule};
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct StaticSource {
        readings: Vec<SensorReading>,
    }

    #[async_trait]
    impl RawSource for StaticSource {
        async fn fetch_raw(
            &self,
            _query: &SourceQuery,
        ) -> Result<Vec<SensorReading>, FetchError> {
            Ok(self.readings.clone())
        }
    }

    fn source_config() -> SourceConfig {
        SourceConfig {
            base_url: "https://api.example.test".to_string(),
            api_key: None,
            request_timeout_secs: 1,
            rate_limit_per_sec: 10_000.0,
            rate_burst: 10_000.0,
            breaker_failure_threshold: 5,
            breaker_window_secs: 60,
            breaker_cooldown_secs: 30,
            fetch_max_retries: 0,
            fetch_retry_initial_ms: 1,
            fetch_retry_max_ms: 1,
        }
    }

    fn reading(lat: f64) -> SensorReading {
        SensorReading {
            source_id: "ground_sensors".to_string(),
            location: Location { lat, lon: -73.9 },
            metric: MetricType::Pm25,
            value: 42.0,
            unit: "ug/m3".to_string(),
            observed_at: Utc::now(),
            quality: QualityFlag::Good,
        }
    }

    fn task_for(source_id: &str) -> ScheduledTask {
        ScheduledTask {
            id: format!("{}_fetch", source_id),
            schedule: Schedule::Every(Duration::from_secs(300)),
            spec: FetchSpec {
                source_id: source_id.to_string(),
                region: BoundingRegion {
                    north: 41.0,
                    south: 40.0,
                    east: -73.0,
                    west: -74.0,
                },
                lookback: Duration::from_secs(600),
            },
        }
    }

    fn build_runner(
        readings: Vec<SensorReading>,
    ) -> (IngestRunner, mpsc::Receiver<crate::pipeline::types::DomainEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let pipeline = Arc::new(IngestionPipeline::new(Arc::new(MemoryCache::new()), 300, 120));
        let publisher = Arc::new(ReliablePublisher::new(
            Arc::new(ChannelPublisher::new(tx)) as Arc<dyn EventPublisher>,
            3,
            1,
        ));
        let client = Arc::new(ExternalDataClient::new(
            Arc::new(StaticSource { readings }),
            &source_config(),
        ));
        let mut runner = IngestRunner::new(pipeline, publisher);
        runner.add_source("ground_sensors", client);
        (runner, rx)
    }

    #[tokio::test]
    async fn test_run_fetches_and_publishes() {
        let (runner, mut rx) = build_runner(vec![reading(40.0), reading(40.5)]);
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let stats = runner.run(&task_for("ground_sensors"), cancel_rx).await.unwrap();

        assert_eq!(stats.fetched, 2);
        assert_eq!(stats.events, 2);
        assert_eq!(stats.dead_lettered, 0);
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_unknown_source_fails() {
        let (runner, _rx) = build_runner(vec![]);
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let err = runner.run(&task_for("satellite_cams"), cancel_rx).await.unwrap_err();
        assert!(matches!(err, RunError::Failed(_)));
    }

    #[tokio::test]
    async fn test_cancelled_before_fetch() {
        let (runner, _rx) = build_runner(vec![reading(40.0)]);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        cancel_tx.send(true).unwrap();

        let err = runner.run(&task_for("ground_sensors"), cancel_rx).await.unwrap_err();
        assert!(matches!(err, RunError::Cancelled));
    }
}
