// crates/fleetgraph-core/src/model/metrics_snapshot.rs
// ============================================================================
// Module: MetricsSnapshot
// Description: One computed read-model snapshot of a project's North-Star
//              and operational metrics.
// ============================================================================

//! ## Overview
//! Unlike [`crate::model::MetricsStateTransitionCounter`], a snapshot is not
//! part of the checkpointed event-log replay path (see `spec` §4.9's
//! `[ADDED — supplemental]` note in `SPEC_FULL.md`). It is recomputed from
//! the live `Task`/`IntegrationAttempt` rows each time `fleetgraph-metrics`'s
//! snapshot materializer runs, and is not itself idempotency-keyed.

use serde::Deserialize;
use serde::Serialize;

use crate::clock::Timestamp;
use crate::ids::MetricsSnapshotId;
use crate::ids::ProjectId;

/// The three North-Star scores, each `0.0..=1.0`, `None` when the project
/// has no data to compute them from yet.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct NorthStarMetrics {
    /// Schedule reliability × 0.40 + cycle-time stability × 0.35 +
    /// blocker-resolution rate × 0.25.
    pub delivery_predictability_index: Option<f64>,
    /// Fraction of flow time spent actively worked vs. waiting/blocked.
    pub flow_efficiency_score: Option<f64>,
    /// Integration success rate × 0.60 + recovery-time score × 0.40.
    pub integration_reliability_score: Option<f64>,
}

/// Operational metrics computed alongside the North-Star scores.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationalMetrics {
    /// Count of tasks that reached `integrated`.
    pub throughput: i64,
    /// Cycle-time percentiles in seconds, for tasks that reached `integrated`.
    pub cycle_time_p50_seconds: Option<f64>,
    /// 90th percentile cycle time in seconds.
    pub cycle_time_p90_seconds: Option<f64>,
    /// 95th percentile cycle time in seconds.
    pub cycle_time_p95_seconds: Option<f64>,
    /// Count of tasks currently in a work-in-progress state
    /// (`claimed`, `in_progress`, `blocked`, `implemented`).
    pub wip_count: i64,
    /// `blocked` tasks as a fraction of `wip_count`.
    pub blocked_ratio: Option<f64>,
    /// Average age, in seconds, of tasks currently in a WIP state.
    pub wip_average_age_seconds: f64,
    /// Count of tasks in `implemented` awaiting integration.
    pub implemented_backlog_count: i64,
    /// Average age, in seconds, of `implemented` tasks awaiting integration.
    pub implemented_backlog_average_age_seconds: f64,
    /// Count of successful integration attempts.
    pub integration_success_count: i64,
    /// Count of conflict-failed integration attempts.
    pub integration_conflict_count: i64,
    /// Count of check-failed integration attempts.
    pub integration_check_failure_count: i64,
    /// Fractional contribution of each task state to total estimated stage
    /// time, keyed by the state's wire name; the state with the largest
    /// share is named in `bottleneck_state` when it is at least 0.40.
    pub bottleneck_contributions: serde_json::Value,
    /// The dominant bottleneck state, if any cleared the 0.40 threshold.
    pub bottleneck_state: Option<String>,
}

/// One computed snapshot of a project's metrics read-model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Unique identifier.
    pub id: MetricsSnapshotId,
    /// Owning project.
    pub project_id: ProjectId,
    /// The three North-Star scores.
    pub north_star: NorthStarMetrics,
    /// The operational metrics.
    pub operational: OperationalMetrics,
    /// Instant this snapshot was computed.
    pub captured_at: Timestamp,
}
