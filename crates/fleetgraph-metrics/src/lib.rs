// crates/fleetgraph-metrics/src/lib.rs
// ============================================================================
// Crate: fleetgraph-metrics
// Description: North-Star and operational metrics materialization: an
//              idempotent incremental consumer of the task-state event log,
//              plus a live-row snapshot materializer.
// Purpose: Turn the event log and current task/integration-attempt rows into
//          the read models dashboards and the gate policy engine query.
// Dependencies: fleetgraph-core, serde_json
// ============================================================================

//! ## Overview
//! Two independent materializers live here, matching `app/metrics/`'s split
//! between its event-driven counters and its point-in-time snapshot:
//!
//! - [`run`] folds `task_state_transitioned` events into per-state transition
//!   counters, one checkpointed batch at a time, with [`run::backfill`] and
//!   [`run::recover`] built on top of it for catch-up and failure recovery.
//! - [`snapshot::materialize_snapshot`] computes a [`fleetgraph_core::model::MetricsSnapshot`]
//!   directly from the current `Task`/`IntegrationAttempt` rows. It shares no
//!   state with the checkpointed path and carries no idempotency guarantee.

pub mod calculators;
pub mod primitives;
pub mod run;
pub mod snapshot;

pub use run::backfill;
pub use run::recover;
pub use run::run;
pub use run::BackfillOutcome;
pub use snapshot::materialize_snapshot;
