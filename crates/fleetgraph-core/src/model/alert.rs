// crates/fleetgraph-core/src/model/alert.rs
// ============================================================================
// Module: Alert
// Description: A raised threshold or anomaly breach against a project's
//              latest metrics snapshot.
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::clock::Timestamp;
use crate::ids::AlertId;
use crate::ids::ProjectId;

/// What triggered an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    /// The metric crossed a fixed warning/critical/emergency threshold.
    Threshold,
    /// The metric deviated from its recent history by more than a z-score
    /// cutoff. Not currently raised by [`crate::runtime::alerts::evaluate_project_alerts`];
    /// reserved for a caller that supplies its own history.
    Anomaly,
}

/// How far past its threshold a triggered alert is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    /// The least severe threshold was crossed.
    Warning,
    /// The middle threshold was crossed.
    Critical,
    /// The most severe threshold was crossed.
    Emergency,
}

/// A single raised alert against one metric of one project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Unique identifier.
    pub id: AlertId,
    /// Owning project.
    pub project_id: ProjectId,
    /// The metric key this alert concerns, e.g. `"DPI"` or `"blocked_ratio"`.
    pub metric_key: String,
    /// Threshold or anomaly.
    pub alert_type: AlertType,
    /// The severity tier crossed. Always `Some` for threshold alerts that
    /// reach this struct (non-triggering evaluations never persist one).
    pub severity: Option<AlertSeverity>,
    /// The metric's value at evaluation time.
    pub value: f64,
    /// The threshold value crossed, if this is a threshold alert.
    pub threshold: Option<f64>,
    /// Free-form evaluation context, e.g. `{"direction": "below"}`.
    pub context: serde_json::Value,
    /// Instant this alert was raised.
    pub created_at: Timestamp,
}
