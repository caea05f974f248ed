//! Notifier port for delivering triggered alerts

use super::evaluator::Alert;
use async_trait::async_trait;

#[derive(Debug)]
pub struct NotifyError(pub String);

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Notification failed: {}", self.0)
    }
}

impl std::error::Error for NotifyError {}

/// Delivery channel for alerts (paging, email, webhooks). The evaluator only
/// marks an alert `Sent` after the notifier accepts it.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError>;
}

/// Writes alerts to the structured log. Default channel for deployments
/// without an external paging integration.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError> {
        log::info!(
            "🚨 ALERT [{:?}] rule {} triggered: {} {} = {:.2} {} at ({:.4}, {:.4})",
            alert.severity,
            alert.rule_id,
            alert.reading.source_id,
            alert.reading.metric_type,
            alert.reading.value,
            alert.reading.unit,
            alert.reading.location.lat,
            alert.reading.location.lon
        );
        Ok(())
    }
}
