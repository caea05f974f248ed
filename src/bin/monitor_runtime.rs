//! Monitor Runtime - ingestion and alerting daemon
//!
//! This binary wires the full monitoring loop:
//! - Builds the external source clients (rate limited, circuit broken)
//! - Registers a periodic fetch task per configured source
//! - Runs the ingestion pipeline into the in-process event channel
//! - Spawns the alert consumer evaluating threshold rules
//!
//! Usage:
//!   cargo run --release --bin monitor_runtime
//!
//! Environment variables:
//!   AEROFLOW_ENABLE_PIPELINE - Master switch (default: true)
//!   AEROFLOW_SOURCE_URL - External API base URL (required)
//!   AEROFLOW_SOURCES - Comma-separated source ids (default: ground_sensors,satellite_cams)
//!   AEROFLOW_FETCH_INTERVAL_SECS - Fetch cadence per source (default: 300)
//!   AEROFLOW_RULES_PATH - Alert rules JSON file (default: built-in rules)
//!   AEROFLOW_BBOX_N/S/E/W - Monitored bounding box (default: New York area)

use aeroflow::alert_core::{
    load_rules, run_alert_consumer, AlertEvaluator, AlertRule, Comparator, GeoScope, LogNotifier,
    Severity,
};
use aeroflow::cache::MemoryCache;
use aeroflow::ingest_core::{
    BoundingRegion, ExternalDataClient, HttpSource, SourceConfig,
};
use aeroflow::pipeline::{
    ChannelPublisher, DomainEvent, IngestionPipeline, MetricType, PipelineConfig,
    ReliablePublisher,
};
use aeroflow::runner::IngestRunner;
use aeroflow::scheduler::{FetchSpec, Schedule, ScheduledTask, Scheduler, SchedulerConfig};
use dotenv::dotenv;
use log::{error, info, warn};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> T {
    env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn bbox_from_env() -> BoundingRegion {
    BoundingRegion {
        north: env_parse("AEROFLOW_BBOX_N", 40.9),
        south: env_parse("AEROFLOW_BBOX_S", 40.5),
        east: env_parse("AEROFLOW_BBOX_E", -73.7),
        west: env_parse("AEROFLOW_BBOX_W", -74.3),
    }
}

/// Built-in rules used when no rules file is configured.
fn default_rules(region: &BoundingRegion) -> Vec<AlertRule> {
    let scope = GeoScope {
        id: "monitored_area".to_string(),
        north: region.north,
        south: region.south,
        east: region.east,
        west: region.west,
    };
    vec![
        AlertRule {
            id: "pm25_high".to_string(),
            metric_type: MetricType::Pm25,
            comparator: Comparator::GreaterThan,
            threshold: 150.0,
            scope: scope.clone(),
            cooldown_secs: 1800,
            severity: Severity::High,
        },
        AlertRule {
            id: "pm25_critical".to_string(),
            metric_type: MetricType::Pm25,
            comparator: Comparator::GreaterThan,
            threshold: 250.0,
            scope: scope.clone(),
            cooldown_secs: 1800,
            severity: Severity::Critical,
        },
        AlertRule {
            id: "no2_high".to_string(),
            metric_type: MetricType::No2,
            comparator: Comparator::GreaterThan,
            threshold: 200.0,
            scope: scope.clone(),
            cooldown_secs: 1800,
            severity: Severity::High,
        },
        AlertRule {
            id: "o3_elevated".to_string(),
            metric_type: MetricType::O3,
            comparator: Comparator::GreaterThan,
            threshold: 180.0,
            scope,
            cooldown_secs: 3600,
            severity: Severity::Medium,
        },
    ]
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize environment and logging
    dotenv().ok();
    env_logger::init();

    info!("🚀 Monitor Runtime - ingestion and alerting daemon");

    let config = PipelineConfig::from_env();
    if !config.enabled {
        info!("⚠️  Pipeline is DISABLED (set AEROFLOW_ENABLE_PIPELINE=true to activate)");
        return Ok(());
    }

    let source_config = SourceConfig::from_env()?;
    source_config.validate()?;

    let region = bbox_from_env();
    let fetch_interval = Duration::from_secs(env_parse("AEROFLOW_FETCH_INTERVAL_SECS", 300u64));
    let source_ids: Vec<String> = env::var("AEROFLOW_SOURCES")
        .unwrap_or_else(|_| "ground_sensors,satellite_cams".to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    info!("✅ Pipeline ENABLED");
    info!("   ├─ API: {}", source_config.base_url);
    info!("   ├─ Sources: {}", source_ids.join(", "));
    info!("   ├─ Fetch interval: {}s", fetch_interval.as_secs());
    info!("   ├─ Dedup window: {}s", config.dedup_window_secs);
    info!(
        "   └─ Region: {}N {}S {}E {}W",
        region.north, region.south, region.east, region.west
    );

    // Shared cache backs dedup, cooldowns, and the redelivery guard
    let cache = Arc::new(MemoryCache::new());

    // Event channel between pipeline and alert consumer
    let (tx, rx) = mpsc::channel::<DomainEvent>(config.channel_buffer);

    // Alert rules
    let rules = match env::var("AEROFLOW_RULES_PATH") {
        Ok(path) => {
            info!("🔔 Loading alert rules from {}", path);
            load_rules(&path)?
        }
        Err(_) => {
            info!("🔔 Using built-in alert rules");
            default_rules(&region)
        }
    };

    let evaluator = Arc::new(AlertEvaluator::new(
        rules,
        cache.clone(),
        Arc::new(LogNotifier),
        config.event_seen_ttl_secs,
    ));
    let consumer = tokio::spawn(run_alert_consumer(rx, evaluator));

    // Pipeline and publisher
    let pipeline = Arc::new(IngestionPipeline::new(
        cache.clone(),
        config.dedup_window_secs,
        config.max_future_skew_secs,
    ));
    let publisher = Arc::new(ReliablePublisher::new(
        Arc::new(ChannelPublisher::new(tx)),
        config.publish_max_retries,
        config.publish_retry_delay_ms,
    ));

    // One shared HTTP client per source id; breaker and limiter state lives
    // in the client, so all tasks for a source share the same policy
    let mut runner = IngestRunner::new(pipeline, publisher.clone());
    for source_id in &source_ids {
        let source = Arc::new(HttpSource::new(
            source_config.base_url.clone(),
            source_config.api_key.clone(),
            source_config.request_timeout_secs,
        ));
        runner.add_source(
            source_id.clone(),
            Arc::new(ExternalDataClient::new(source, &source_config)),
        );
    }

    // Scheduler
    let scheduler_config = SchedulerConfig {
        tick_interval: Duration::from_millis(config.scheduler_tick_ms),
        max_concurrency: config.max_concurrency,
        jitter_ms: config.jitter_ms,
        backoff_base: Duration::from_secs(config.task_backoff_base_secs),
        backoff_cap: Duration::from_secs(config.task_backoff_cap_secs),
    };
    let mut scheduler = Scheduler::new(Arc::new(runner), scheduler_config);
    for source_id in &source_ids {
        scheduler.register(ScheduledTask {
            id: format!("{}_fetch", source_id),
            schedule: Schedule::Every(fetch_interval),
            spec: FetchSpec {
                source_id: source_id.clone(),
                region,
                // Overlap consecutive fetches; dedup collapses the repeats
                lookback: fetch_interval * 2,
            },
        });
    }
    let handle = scheduler.start();

    info!("✅ Monitor runtime started, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    info!("🔄 Shutdown signal received");

    let statuses = handle
        .stop(Duration::from_secs(config.stop_grace_secs))
        .await;
    for (task_id, status) in statuses {
        info!("   ├─ {}: {:?}", task_id, status);
    }
    if publisher.dead_letter_count() > 0 {
        warn!(
            "⚠️  {} events in the dead-letter buffer at shutdown",
            publisher.dead_letter_count()
        );
    }

    // Closing the publisher side lets the consumer drain and exit
    drop(publisher);
    match tokio::time::timeout(Duration::from_secs(5), consumer).await {
        Ok(Ok((consumed, sent))) => {
            info!("✅ Shutdown complete ({} events, {} alerts)", consumed, sent);
        }
        Ok(Err(e)) => error!("❌ Alert consumer panicked: {}", e),
        Err(_) => warn!("⚠️  Alert consumer did not drain within 5s"),
    }

    Ok(())
}
