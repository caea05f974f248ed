//! Alert rules: thresholds, geographic scopes, severity

use crate::pipeline::types::{Location, MetricType};
use serde::{Deserialize, Serialize};

/// Alert severity, ordered so `Critical` compares highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
}

impl Comparator {
    pub fn matches(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparator::GreaterThan => value > threshold,
            Comparator::GreaterOrEqual => value >= threshold,
            Comparator::LessThan => value < threshold,
            Comparator::LessOrEqual => value <= threshold,
        }
    }
}

/// Bounding-box region a rule applies to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoScope {
    pub id: String,
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl GeoScope {
    pub fn contains(&self, location: &Location) -> bool {
        location.lat <= self.north
            && location.lat >= self.south
            && location.lon <= self.east
            && location.lon >= self.west
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub metric_type: MetricType,
    pub comparator: Comparator,
    pub threshold: f64,
    pub scope: GeoScope,
    /// Seconds to suppress repeat alerts for this rule+scope after one fires.
    pub cooldown_secs: u64,
    pub severity: Severity,
}

impl AlertRule {
    /// Cache key for the cooldown window of this rule in its scope.
    pub fn cooldown_key(&self) -> String {
        format!("cooldown:{}:{}", self.id, self.scope.id)
    }
}

#[derive(Debug)]
pub enum RuleLoadError {
    Io(std::io::Error),
    Parse(serde_json::Error),
}

impl std::fmt::Display for RuleLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleLoadError::Io(e) => write!(f, "Failed to read rules file: {}", e),
            RuleLoadError::Parse(e) => write!(f, "Failed to parse rules file: {}", e),
        }
    }
}

impl std::error::Error for RuleLoadError {}

/// Load rules from a JSON file (array of rule objects).
pub fn load_rules(path: &str) -> Result<Vec<AlertRule>, RuleLoadError> {
    let contents = std::fs::read_to_string(path).map_err(RuleLoadError::Io)?;
    serde_json::from_str(&contents).map_err(RuleLoadError::Parse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn scope() -> GeoScope {
        GeoScope {
            id: "nyc".to_string(),
            north: 40.9,
            south: 40.5,
            east: -73.7,
            west: -74.3,
        }
    }

    #[test]
    fn test_scope_contains() {
        let scope = scope();

        assert!(scope.contains(&Location { lat: 40.7, lon: -74.0 }));
        assert!(!scope.contains(&Location { lat: 41.5, lon: -74.0 }));
        assert!(!scope.contains(&Location { lat: 40.7, lon: -73.0 }));
    }

    #[test]
    fn test_comparator_matches() {
        assert!(Comparator::GreaterThan.matches(151.0, 150.0));
        assert!(!Comparator::GreaterThan.matches(150.0, 150.0));
        assert!(Comparator::GreaterOrEqual.matches(150.0, 150.0));
        assert!(Comparator::LessThan.matches(9.0, 10.0));
        assert!(Comparator::LessOrEqual.matches(10.0, 10.0));
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn test_cooldown_key_format() {
        let rule = AlertRule {
            id: "pm25_high".to_string(),
            metric_type: MetricType::Pm25,
            comparator: Comparator::GreaterThan,
            threshold: 150.0,
            scope: scope(),
            cooldown_secs: 1800,
            severity: Severity::High,
        };

        assert_eq!(rule.cooldown_key(), "cooldown:pm25_high:nyc");
    }

    #[test]
    fn test_load_rules_from_file() {
        let json = r#"[
            {
                "id": "pm25_high",
                "metric_type": "pm25",
                "comparator": "greater_than",
                "threshold": 150.0,
                "scope": {"id": "nyc", "north": 40.9, "south": 40.5, "east": -73.7, "west": -74.3},
                "cooldown_secs": 1800,
                "severity": "high"
            }
        ]"#;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let rules = load_rules(file.path().to_str().unwrap()).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].metric_type, MetricType::Pm25);
        assert_eq!(rules[0].severity, Severity::High);
        assert_eq!(rules[0].comparator, Comparator::GreaterThan);
    }

    #[test]
    fn test_load_rules_missing_file() {
        assert!(matches!(
            load_rules("/nonexistent/rules.json"),
            Err(RuleLoadError::Io(_))
        ));
    }
}
