//! Event consumer loop feeding the alert evaluator

use super::evaluator::{AlertEvaluator, AlertState};
use crate::pipeline::types::DomainEvent;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// Drain the event channel through the evaluator until the senders close.
/// Returns (events consumed, alerts sent).
pub async fn run_alert_consumer(
    mut rx: mpsc::Receiver<DomainEvent>,
    evaluator: Arc<AlertEvaluator>,
) -> (u64, u64) {
    let mut consumed: u64 = 0;
    let mut sent: u64 = 0;
    let mut last_report = Instant::now();

    log::info!("🔄 Alert consumer started");

    while let Some(event) = rx.recv().await {
        consumed += 1;
        let alerts = evaluator.on_event(&event).await;
        sent += alerts
            .iter()
            .filter(|a| a.state == AlertState::Sent)
            .count() as u64;

        if last_report.elapsed().as_secs() >= 10 {
            log::info!("📊 Alert consumer: {} events, {} alerts sent", consumed, sent);
            last_report = Instant::now();
        }
    }

    log::info!(
        "✅ Alert consumer stopped after {} events ({} alerts sent)",
        consumed,
        sent
    );
    (consumed, sent)
}
