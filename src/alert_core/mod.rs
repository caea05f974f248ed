pub mod consumer;
pub mod evaluator;
pub mod notify;
pub mod rules;

pub use consumer::run_alert_consumer;
pub use evaluator::{Alert, AlertEvaluator, AlertState};
pub use notify::{LogNotifier, Notifier, NotifyError};
pub use rules::{load_rules, AlertRule, Comparator, GeoScope, RuleLoadError, Severity};
