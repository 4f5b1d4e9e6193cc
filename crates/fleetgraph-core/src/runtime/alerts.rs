// crates/fleetgraph-core/src/runtime/alerts.rs
// ============================================================================
// Module: Alert Evaluation
// Description: Threshold/anomaly checks against a project's North-Star and
//              operational metrics.
// ============================================================================

//! ## Overview
//! [`evaluate_project_alerts`] reads a project's latest metrics snapshot and
//! checks each known metric key against [`THRESHOLDS`], persisting and
//! returning one [`Alert`] per metric that has crossed a severity tier.
//! [`evaluate_anomaly`] is a separate, standalone check against a caller-
//! supplied history; nothing in this module's production path calls it,
//! since a single snapshot carries no history of its own.

use serde_json::json;

use crate::clock::Clock;
use crate::errors::ErrorCode;
use crate::errors::OperationError;
use crate::ids::AlertId;
use crate::ids::ProjectId;
use crate::interfaces::StoreTransaction;
use crate::model::Alert;
use crate::model::AlertSeverity;
use crate::model::AlertType;
use crate::model::MetricsSnapshot;

/// The direction in which a metric's value is unhealthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// Healthy above the threshold, unhealthy below it.
    Below,
    /// Healthy below the threshold, unhealthy above it.
    Above,
}

/// A metric's threshold configuration: the direction it degrades in, and its
/// warning/critical/emergency cutoffs.
struct ThresholdConfig {
    metric_key: &'static str,
    direction: Direction,
    warning: f64,
    critical: f64,
    emergency: f64,
}

/// The fixed threshold table for every metric this engine can alert on.
const THRESHOLDS: &[ThresholdConfig] = &[
    ThresholdConfig { metric_key: "DPI", direction: Direction::Below, warning: 0.65, critical: 0.50, emergency: 0.35 },
    ThresholdConfig { metric_key: "FES", direction: Direction::Below, warning: 0.30, critical: 0.20, emergency: 0.10 },
    ThresholdConfig { metric_key: "IRS", direction: Direction::Below, warning: 0.75, critical: 0.60, emergency: 0.45 },
    ThresholdConfig {
        metric_key: "lead_time_p90",
        direction: Direction::Above,
        warning: 240.0,
        critical: 336.0,
        emergency: 504.0,
    },
    ThresholdConfig {
        metric_key: "blocked_ratio",
        direction: Direction::Above,
        warning: 0.15,
        critical: 0.25,
        emergency: 0.40,
    },
    ThresholdConfig {
        metric_key: "ini_backlog",
        direction: Direction::Above,
        warning: 10.0,
        critical: 20.0,
        emergency: 40.0,
    },
];

/// The outcome of checking one metric's value against its threshold config.
#[derive(Debug, Clone, Copy)]
struct ThresholdResult {
    severity: AlertSeverity,
    threshold: f64,
}

/// Checks `value` against `metric_key`'s threshold config, worst severity
/// first. Returns `None` if `metric_key` has no configured thresholds.
fn evaluate_threshold(metric_key: &str, value: f64) -> Option<Option<ThresholdResult>> {
    let config = THRESHOLDS.iter().find(|config| config.metric_key == metric_key)?;
    for (severity, threshold) in [
        (AlertSeverity::Emergency, config.emergency),
        (AlertSeverity::Critical, config.critical),
        (AlertSeverity::Warning, config.warning),
    ] {
        let triggered = match config.direction {
            Direction::Below => value < threshold,
            Direction::Above => value > threshold,
        };
        if triggered {
            return Some(Some(ThresholdResult { severity, threshold }));
        }
    }
    Some(None)
}

/// The outcome of an anomaly check against a metric's recent history.
#[derive(Debug, Clone, Copy)]
pub struct AnomalyResult {
    /// Whether `current` deviated from history by more than `z_threshold`.
    pub triggered: bool,
    /// The observed z-score, rounded to 4 decimal places.
    pub z_score: f64,
    /// The mean of `values`, rounded to 4 decimal places.
    pub mean: f64,
    /// The population standard deviation of `values`, rounded to 4 decimal places.
    pub stddev: f64,
}

/// Checks `current` against the mean/stddev of `values` via z-score.
/// Returns `None` if fewer than two historical values are given or the
/// population has zero variance.
///
/// Not wired into [`evaluate_project_alerts`]: a [`MetricsSnapshot`] carries
/// no history of its own, so this is left for a caller that supplies one.
#[must_use]
pub fn evaluate_anomaly(values: &[f64], current: f64, z_threshold: f64) -> Option<AnomalyResult> {
    if values.len() < 2 {
        return None;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|value| (value - mean).powi(2)).sum::<f64>() / values.len() as f64;
    let stddev = variance.sqrt();
    if stddev == 0.0 {
        return None;
    }
    let z_score = ((current - mean) / stddev).abs();
    let round4 = |value: f64| (value * 10_000.0).round() / 10_000.0;
    Some(AnomalyResult {
        triggered: z_score > z_threshold,
        z_score: round4(z_score),
        mean: round4(mean),
        stddev: round4(stddev),
    })
}

/// Reads off `(metric_key, value)` pairs from a snapshot's North-Star and
/// operational metrics, skipping any metric with no recorded value yet.
fn snapshot_metric_values(snapshot: &MetricsSnapshot) -> Vec<(&'static str, f64)> {
    let mut values = Vec::new();
    if let Some(value) = snapshot.north_star.delivery_predictability_index {
        values.push(("DPI", value));
    }
    if let Some(value) = snapshot.north_star.flow_efficiency_score {
        values.push(("FES", value));
    }
    if let Some(value) = snapshot.north_star.integration_reliability_score {
        values.push(("IRS", value));
    }
    if let Some(value) = snapshot.operational.cycle_time_p90_seconds {
        values.push(("lead_time_p90", value));
    }
    if let Some(value) = snapshot.operational.blocked_ratio {
        values.push(("blocked_ratio", value));
    }
    values.push(("ini_backlog", snapshot.operational.implemented_backlog_count as f64));
    values
}

/// Evaluates `project_id`'s latest metrics snapshot against [`THRESHOLDS`],
/// persisting and returning one [`Alert`] per metric that triggered.
///
/// Mirrors the threshold-only evaluation path: anomaly detection is a
/// separate utility ([`evaluate_anomaly`]) that nothing here calls.
///
/// # Errors
///
/// Returns [`ErrorCode::DbError`] on store failure. A project with no
/// captured snapshot yet returns an empty list rather than an error.
pub fn evaluate_project_alerts(
    txn: &mut dyn StoreTransaction,
    clock: &dyn Clock,
    project_id: &ProjectId,
    new_alert_id: impl Fn() -> AlertId,
) -> Result<Vec<Alert>, OperationError> {
    let Some(snapshot) = txn
        .get_latest_metrics_snapshot(project_id)
        .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?
    else {
        return Ok(Vec::new());
    };

    let now = clock.now();
    let mut alerts = Vec::new();
    for (metric_key, value) in snapshot_metric_values(&snapshot) {
        let Some(Some(result)) = evaluate_threshold(metric_key, value) else {
            continue;
        };
        let config = THRESHOLDS.iter().find(|config| config.metric_key == metric_key);
        let direction = config.map_or("below", |config| match config.direction {
            Direction::Below => "below",
            Direction::Above => "above",
        });
        let alert = Alert {
            id: new_alert_id(),
            project_id: project_id.clone(),
            metric_key: metric_key.to_string(),
            alert_type: AlertType::Threshold,
            severity: Some(result.severity),
            value,
            threshold: Some(result.threshold),
            context: json!({ "direction": direction }),
            created_at: now,
        };
        txn.insert_alert(&alert).map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?;
        alerts.push(alert);
    }
    Ok(alerts)
}

#[cfg(test)]
mod tests {
    use super::evaluate_anomaly;
    use super::evaluate_threshold;
    use super::AlertSeverity;

    #[test]
    fn threshold_unconfigured_metric_returns_none() {
        assert!(evaluate_threshold("not_a_real_metric", 1.0).is_none());
    }

    #[test]
    fn threshold_below_direction_escalates_with_value() {
        assert!(evaluate_threshold("DPI", 0.90).expect("configured").is_none());
        let warning = evaluate_threshold("DPI", 0.60).expect("configured").expect("triggered");
        assert_eq!(warning.severity, AlertSeverity::Warning);
        let emergency = evaluate_threshold("DPI", 0.10).expect("configured").expect("triggered");
        assert_eq!(emergency.severity, AlertSeverity::Emergency);
    }

    #[test]
    fn threshold_above_direction_escalates_with_value() {
        let critical = evaluate_threshold("blocked_ratio", 0.30).expect("configured").expect("triggered");
        assert_eq!(critical.severity, AlertSeverity::Critical);
    }

    #[test]
    fn anomaly_requires_at_least_two_historical_values() {
        assert!(evaluate_anomaly(&[1.0], 5.0, 2.0).is_none());
    }

    #[test]
    fn anomaly_flags_values_past_the_z_threshold() {
        let result = evaluate_anomaly(&[10.0, 10.0, 10.0, 10.0], 40.0, 2.0).expect("non-zero variance");
        assert!(result.triggered);
    }

    #[test]
    fn anomaly_is_silent_on_zero_variance_history() {
        assert!(evaluate_anomaly(&[5.0, 5.0, 5.0], 5.0, 2.0).is_none());
    }
}
