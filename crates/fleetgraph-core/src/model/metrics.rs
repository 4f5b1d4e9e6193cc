// crates/fleetgraph-core/src/model/metrics.rs
// ============================================================================
// Module: MetricsJobCheckpoint / MetricsJobRun / MetricsStateTransitionCounter
// Description: The durable state backing the event-sourced metrics
//              materializer (see `fleetgraph-metrics`).
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::clock::Timestamp;
use crate::ids::EventLogId;
use crate::ids::MetricsJobRunId;
use crate::ids::ProjectId;
use crate::model::task::TaskState;

/// Which materializer mode a checkpoint/run belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricsMode {
    /// Cadence 900s, up to 10 000 events per run.
    Batch,
    /// Cadence 30s, up to 500 events per run.
    NearRealTime,
}

impl MetricsMode {
    /// Default cadence for this mode, in seconds.
    #[must_use]
    pub const fn default_cadence_seconds(self) -> i64 {
        match self {
            Self::Batch => 900,
            Self::NearRealTime => 30,
        }
    }

    /// Default maximum events processed by one run in this mode.
    #[must_use]
    pub const fn default_batch_size(self) -> i64 {
        match self {
            Self::Batch => 10_000,
            Self::NearRealTime => 500,
        }
    }
}

/// The sole resumable state for a `(project_id, mode)` materializer stream:
/// the last event id successfully processed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsJobCheckpoint {
    /// Owning project.
    pub project_id: ProjectId,
    /// Which mode this checkpoint tracks.
    pub mode: MetricsMode,
    /// The last event id folded into the counters.
    pub last_event_id: i64,
    /// The instant of the last successful run.
    pub last_success_at: Option<Timestamp>,
}

/// Terminal status of one materializer run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricsRunStatus {
    /// All scanned events processed and folded into the counters.
    Succeeded,
    /// An unrecoverable condition (e.g. an unrecognized event payload)
    /// stopped the run before the checkpoint advanced.
    Failed,
}

/// A durable record of one invocation of the materializer `run` operation,
/// keyed by `(project_id, idempotency_key)` so retries are observably
/// at-most-once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsJobRun {
    /// Unique identifier.
    pub id: MetricsJobRunId,
    /// Owning project.
    pub project_id: ProjectId,
    /// Which mode this run executed under.
    pub mode: MetricsMode,
    /// The caller-supplied or derived idempotency key.
    pub idempotency_key: String,
    /// Terminal status.
    pub status: MetricsRunStatus,
    /// The first event id considered by this run (checkpoint + 1).
    pub start_event_id: i64,
    /// The last event id actually processed by this run.
    pub end_event_id: i64,
    /// Count of events folded into counters by this run.
    pub processed_events: i64,
    /// Present iff `status = failed`.
    pub failure_reason: Option<String>,
    /// Completion instant.
    pub completed_at: Timestamp,
}

/// A per-`(project_id, mode, to_state)` running total of task-state-transition
/// events observed by the materializer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsStateTransitionCounter {
    /// Owning project.
    pub project_id: ProjectId,
    /// Which mode accumulated this counter.
    pub mode: MetricsMode,
    /// The destination state the counter tallies transitions into.
    pub to_state: TaskState,
    /// Running total of transitions into `to_state` observed so far.
    pub transition_count: i64,
    /// The highest event id folded into this counter.
    pub last_event_id: EventLogId,
}
