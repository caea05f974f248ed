pub mod config;
pub mod ingestion;
pub mod publisher;
pub mod types;
pub mod units;

pub use config::PipelineConfig;
pub use ingestion::{BatchStats, IngestionPipeline};
pub use publisher::{ChannelPublisher, EventPublisher, PublishError, ReliablePublisher};
pub use types::{
    DomainEvent, EventPayload, Fingerprint, Location, MetricType, QualityFlag, SensorReading,
    EVENT_READING_INGESTED,
};
