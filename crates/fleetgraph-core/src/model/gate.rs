// crates/fleetgraph-core/src/model/gate.rs
// ============================================================================
// Module: GateRule / GateDecision / GatePolicy
// Description: Policy-derived gate tasks and the human decisions that clear
//              them for integration.
// ============================================================================

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

use crate::clock::Timestamp;
use crate::ids::GateDecisionId;
use crate::ids::GateRuleId;
use crate::ids::PhaseId;
use crate::ids::ProjectId;
use crate::ids::TaskId;
use crate::model::task::TaskClass;

/// A declared scope + evidence + reviewer-role requirement for a gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateRule {
    /// Unique identifier.
    pub id: GateRuleId,
    /// Owning project.
    pub project_id: ProjectId,
    /// Human-readable name.
    pub name: String,
    /// Task classes this rule applies to.
    pub applies_to_task_classes: BTreeSet<TaskClass>,
    /// Evidence reference kinds required before a decision may be recorded
    /// (free-form labels, e.g. `"review"`, `"ci_run"`).
    pub required_evidence_kinds: BTreeSet<String>,
    /// Reviewer roles permitted to record a decision under this rule.
    pub required_reviewer_roles: BTreeSet<String>,
}

/// The recorded outcome of a gate decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateOutcome {
    /// Cleared to integrate without reservation.
    Approved,
    /// Cleared to integrate, with a documented risk acceptance.
    ApprovedWithRisk,
    /// Not cleared.
    Rejected,
}

impl GateOutcome {
    /// Returns true for the outcomes that clear integration
    /// (`approved` and `approved_with_risk`).
    #[must_use]
    pub const fn clears_integration(self) -> bool {
        matches!(self, Self::Approved | Self::ApprovedWithRisk)
    }
}

/// Exactly one of `task_id`/`phase_id` a decision refers to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateScope {
    /// Decision scoped to a single task.
    Task(TaskId),
    /// Decision scoped to an entire phase.
    Phase(PhaseId),
}

/// A recorded human (or service) decision clearing or rejecting a gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateDecision {
    /// Unique identifier.
    pub id: GateDecisionId,
    /// Owning project.
    pub project_id: ProjectId,
    /// The rule this decision was recorded under, if any.
    pub gate_rule_id: Option<GateRuleId>,
    /// Exactly one of task or phase.
    pub scope: GateScope,
    /// The recorded outcome.
    pub outcome: GateOutcome,
    /// References to the evidence the reviewer consulted.
    pub evidence_refs: Vec<String>,
    /// Identity of the reviewer.
    pub decided_by: String,
    /// Decision instant.
    pub decided_at: Timestamp,
}

/// The trigger that caused a policy-emitted gate task to be synthesized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyTrigger {
    /// Too many `implemented` tasks are backlogged awaiting integration.
    ImplementedBacklog,
    /// A risk-classified task overlaps in-flight work.
    RiskOverlap,
    /// An `implemented` task has aged past the configured SLA.
    ImplementedAgeSla,
    /// All tasks in a milestone have reached `implemented`/`integrated`.
    MilestoneCompletion,
}

/// A per-project policy governing when the gate engine synthesizes gate
/// tasks automatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatePolicy {
    /// Owning project.
    pub project_id: ProjectId,
    /// Trip threshold for [`PolicyTrigger::ImplementedBacklog`].
    pub implemented_backlog_threshold: i64,
    /// Fraction (0.0..=1.0) of candidate tasks classed as risk that trips
    /// [`PolicyTrigger::RiskOverlap`].
    pub risk_threshold: f64,
    /// Age in hours that trips [`PolicyTrigger::ImplementedAgeSla`].
    pub implemented_age_hours: i64,
    /// Task classes considered "risk" for [`PolicyTrigger::RiskOverlap`].
    pub risk_task_classes: BTreeSet<TaskClass>,
}

/// Rollup of a candidate set's readiness for a policy-emitted gate task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateRollupStatus {
    /// Every candidate has reached a state that satisfies the trigger.
    Ready,
    /// At least one candidate has not yet reached a qualifying state.
    Blocked,
}

/// The derived readiness of a policy-emitted gate's candidate set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CandidateRollup {
    /// Overall rollup status.
    pub status: CandidateRollupStatus,
    /// Count of candidates currently in a qualifying state.
    pub ready_candidates: i64,
    /// Total candidate count.
    pub total_candidates: i64,
}
