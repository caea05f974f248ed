//! Unit normalization for incoming readings
//!
//! Sources report concentrations in whatever unit the upstream API uses
//! (µg/m³, mg/m³, ppb, ppm). Everything is converted to the canonical unit
//! per metric before fingerprinting so equal measurements dedup together.

use super::types::MetricType;

/// Canonical unit readings are normalized to, per metric.
pub fn canonical_unit(metric: MetricType) -> &'static str {
    match metric {
        // Dimensionless satellite retrieval
        MetricType::Aod => "1",
        _ => "ug/m3",
    }
}

/// Gas conversion coefficients at 25 °C and 1013 hPa (µg/m³ per ppb).
fn ppb_factor(metric: MetricType) -> Option<f64> {
    match metric {
        MetricType::No2 => Some(1.88),
        MetricType::O3 => Some(1.96),
        MetricType::So2 => Some(2.62),
        MetricType::Co => Some(1.145),
        _ => None,
    }
}

/// Convert a value to the canonical unit for its metric.
///
/// Returns `None` when the unit is unknown for that metric; the caller drops
/// the reading as a validation failure.
pub fn to_canonical(metric: MetricType, value: f64, unit: &str) -> Option<f64> {
    match (metric, normalize_unit_label(unit).as_str()) {
        (MetricType::Aod, "1") | (MetricType::Aod, "") => Some(value),
        (MetricType::Aod, _) => None,
        (_, "ug/m3") => Some(value),
        (_, "mg/m3") => Some(value * 1000.0),
        (m, "ppb") => ppb_factor(m).map(|f| value * f),
        (m, "ppm") => ppb_factor(m).map(|f| value * f * 1000.0),
        _ => None,
    }
}

fn normalize_unit_label(unit: &str) -> String {
    let lower = unit.trim().to_lowercase();
    match lower.as_str() {
        "µg/m³" | "µg/m3" | "ug/m³" | "ug/m3" => "ug/m3".to_string(),
        "mg/m³" | "mg/m3" => "mg/m3".to_string(),
        other => other.to_string(),
    }
}
