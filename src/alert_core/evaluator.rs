//! Alert evaluator: rule matching, cooldown, redelivery guard
//!
//! Consumes `reading.ingested` events and fires alerts for matching rules.
//! Two cache guards keep delivery at-least-once semantics honest: a `seen:`
//! key drops redelivered events before any rule runs, and a `cooldown:` key
//! per rule+scope suppresses repeat alerts inside the cooldown window. Both
//! use the cache's atomic `get_or_set`, so concurrent evaluation of a
//! duplicate cannot fire twice.

use super::notify::Notifier;
use super::rules::{AlertRule, Severity};
use crate::cache::{Cache, GetOrSet};
use crate::pipeline::types::{DomainEvent, EventPayload, EVENT_READING_INGESTED};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertState {
    /// Triggered but notification failed; eligible for redelivery.
    Pending,
    Sent,
    /// Matched a rule inside its cooldown window.
    Suppressed,
}

#[derive(Debug, Clone)]
pub struct Alert {
    pub rule_id: String,
    pub triggered_at: DateTime<Utc>,
    pub reading: EventPayload,
    pub severity: Severity,
    pub state: AlertState,
}

pub struct AlertEvaluator {
    rules: Vec<AlertRule>,
    cache: Arc<dyn Cache>,
    notifier: Arc<dyn Notifier>,
    seen_ttl: Duration,
}

impl AlertEvaluator {
    pub fn new(
        rules: Vec<AlertRule>,
        cache: Arc<dyn Cache>,
        notifier: Arc<dyn Notifier>,
        seen_ttl_secs: u64,
    ) -> Self {
        log::info!("🔔 Alert evaluator loaded {} rules", rules.len());
        Self {
            rules,
            cache,
            notifier,
            seen_ttl: Duration::from_secs(seen_ttl_secs.max(1)),
        }
    }

    fn rule_matches(rule: &AlertRule, payload: &EventPayload) -> bool {
        rule.metric_type == payload.metric_type
            && rule.scope.contains(&payload.location)
            && rule.comparator.matches(payload.value, rule.threshold)
    }

    /// Evaluate one event against all rules. Returns the alerts produced,
    /// including suppressed ones, so callers can observe cooldown behavior.
    /// Redelivered events (same idempotency key) produce nothing.
    pub async fn on_event(&self, event: &DomainEvent) -> Vec<Alert> {
        if event.event_type != EVENT_READING_INGESTED {
            return Vec::new();
        }

        let seen_key = format!("seen:{}", event.idempotency_key);
        if let GetOrSet::Existing(_) = self.cache.get_or_set(&seen_key, "1", self.seen_ttl).await {
            log::debug!("🔁 Skipping redelivered event {}", event.idempotency_key);
            return Vec::new();
        }

        let mut alerts = Vec::new();
        for rule in &self.rules {
            if !Self::rule_matches(rule, &event.payload) {
                continue;
            }

            let cooldown = Duration::from_secs(rule.cooldown_secs.max(1));
            let state = match self
                .cache
                .get_or_set(&rule.cooldown_key(), "1", cooldown)
                .await
            {
                GetOrSet::Existing(_) => {
                    log::debug!(
                        "🔕 Rule {} in cooldown for scope {}",
                        rule.id,
                        rule.scope.id
                    );
                    AlertState::Suppressed
                }
                GetOrSet::Inserted => AlertState::Pending,
            };

            let mut alert = Alert {
                rule_id: rule.id.clone(),
                triggered_at: Utc::now(),
                reading: event.payload.clone(),
                severity: rule.severity,
                state,
            };

            if alert.state == AlertState::Pending {
                match self.notifier.notify(&alert).await {
                    Ok(()) => alert.state = AlertState::Sent,
                    Err(err) => {
                        log::warn!("⚠️  Notification failed for rule {}: {}", rule.id, err);
                    }
                }
            }

            alerts.push(alert);
        }

        alerts
    }
}
