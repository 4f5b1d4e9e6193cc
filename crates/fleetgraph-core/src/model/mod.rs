// crates/fleetgraph-core/src/model/mod.rs
// ============================================================================
// Module: Fleetgraph Domain Model
// Description: The persisted entities described by the data model.
// ============================================================================

//! ## Overview
//! Plain data types with no behavior beyond small, pure helper methods (e.g.
//! [`task::Task::capability_filter_satisfied`]). All mutation logic lives in
//! `runtime`; these types are what gets loaded from and written back to a
//! [`crate::interfaces::Store`].

pub mod alert;
pub mod api_key;
pub mod artifact;
pub mod event;
pub mod gate;
pub mod graph;
pub mod integration_attempt;
pub mod lease;
pub mod metrics;
pub mod metrics_snapshot;
pub mod plan;
pub mod project;
pub mod reservation;
pub mod snapshot;
pub mod task;

pub use alert::Alert;
pub use alert::AlertSeverity;
pub use alert::AlertType;
pub use api_key::ApiKey;
pub use api_key::ApiKeyScope;
pub use api_key::ApiKeyStatus;
pub use api_key::Role;
pub use artifact::Artifact;
pub use event::EventLog;
pub use event::EventType;
pub use gate::CandidateRollup;
pub use gate::CandidateRollupStatus;
pub use gate::GateDecision;
pub use gate::GateOutcome;
pub use gate::GatePolicy;
pub use gate::GateRule;
pub use gate::GateScope;
pub use gate::PolicyTrigger;
pub use graph::DependencyEdge;
pub use graph::UnlockOn;
pub use integration_attempt::IntegrationAttempt;
pub use integration_attempt::IntegrationAttemptStatus;
pub use integration_attempt::IntegrationResult;
pub use lease::Lease;
pub use lease::LeaseStatus;
pub use metrics::MetricsJobCheckpoint;
pub use metrics::MetricsJobRun;
pub use metrics::MetricsMode;
pub use metrics::MetricsRunStatus;
pub use metrics::MetricsStateTransitionCounter;
pub use metrics_snapshot::MetricsSnapshot;
pub use metrics_snapshot::NorthStarMetrics;
pub use metrics_snapshot::OperationalMetrics;
pub use plan::ChangeKind;
pub use plan::ChangeSetStatus;
pub use plan::PlanChangeSet;
pub use plan::PlanOperation;
pub use plan::PlanVersion;
pub use plan::TaskPatch;
pub use project::Milestone;
pub use project::Phase;
pub use project::Project;
pub use project::ProjectStatus;
pub use reservation::Reservation;
pub use reservation::ReservationStatus;
pub use snapshot::TaskExecutionSnapshot;
pub use task::Task;
pub use task::TaskClass;
pub use task::TaskState;
pub use task::WorkSpec;
