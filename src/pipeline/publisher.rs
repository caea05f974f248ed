//! Event publisher port with at-least-once delivery
//!
//! `EventPublisher` is the seam between the pipeline and the message bus.
//! `ChannelPublisher` backs it with the in-process tokio channel the alert
//! consumer reads from. `ReliablePublisher` wraps any publisher with bounded
//! retries and a dead-letter buffer so a bus outage never loses events
//! silently.

use crate::pipeline::types::DomainEvent;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug)]
pub enum PublishError {
    /// Bus rejected or dropped the event; retryable.
    Bus(String),
    /// Bus is gone (receiver dropped). Not retryable.
    Closed,
}

impl std::fmt::Display for PublishError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PublishError::Bus(msg) => write!(f, "Publish failed: {}", msg),
            PublishError::Closed => write!(f, "Event bus closed"),
        }
    }
}

impl std::error::Error for PublishError {}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError>;
}

/// Publishes onto the in-process event channel.
pub struct ChannelPublisher {
    tx: mpsc::Sender<DomainEvent>,
}

impl ChannelPublisher {
    pub fn new(tx: mpsc::Sender<DomainEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl EventPublisher for ChannelPublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
        self.tx
            .send(event.clone())
            .await
            .map_err(|_| PublishError::Closed)
    }
}

/// Retry wrapper with a dead-letter buffer.
///
/// Failed events are retried up to `max_retries` with a fixed delay; events
/// still failing land in the dead-letter buffer for operator inspection.
/// Duplicate delivery is possible by design; consumers guard with the
/// idempotency key.
pub struct ReliablePublisher {
    inner: Arc<dyn EventPublisher>,
    max_retries: u32,
    retry_delay: Duration,
    dead_letters: Mutex<Vec<DomainEvent>>,
}

impl ReliablePublisher {
    pub fn new(inner: Arc<dyn EventPublisher>, max_retries: u32, retry_delay_ms: u64) -> Self {
        Self {
            inner,
            max_retries,
            retry_delay: Duration::from_millis(retry_delay_ms),
            dead_letters: Mutex::new(Vec::new()),
        }
    }

    /// Publish with retries. Returns `true` when delivered, `false` when the
    /// event was dead-lettered.
    pub async fn publish(&self, event: &DomainEvent) -> bool {
        let mut attempt = 0;
        loop {
            match self.inner.publish(event).await {
                Ok(()) => return true,
                Err(err) => {
                    if attempt >= self.max_retries || matches!(err, PublishError::Closed) {
                        log::error!(
                            "❌ Dead-lettering event {} after {} attempts: {}",
                            event.idempotency_key,
                            attempt + 1,
                            err
                        );
                        self.dead_letters.lock().unwrap().push(event.clone());
                        return false;
                    }
                    attempt += 1;
                    log::warn!(
                        "⚠️  Publish attempt {} failed for {}: {}",
                        attempt,
                        event.idempotency_key,
                        err
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }

    pub fn dead_letter_count(&self) -> usize {
        self.dead_letters.lock().unwrap().len()
    }

    /// Drain the dead-letter buffer (e.g. for re-publication after an outage).
    pub fn take_dead_letters(&self) -> Vec<DomainEvent> {
        std::mem::take(&mut *self.dead_letters.lock().unwrap())
    }
}
