// crates/fleetgraph-core/src/runtime/ready.rs
// ============================================================================
// Module: Ready-Work Scoring
// Description: Resolves the set of tasks an agent may claim right now.
// ============================================================================

use std::collections::BTreeSet;

use crate::errors::ErrorCode;
use crate::errors::OperationError;
use crate::ids::AgentId;
use crate::ids::ProjectId;
use crate::interfaces::StoreTransaction;
use crate::interfaces::TaskListFilter;
use crate::model::Task;
use crate::model::TaskState;
use crate::runtime::graph::predecessors_satisfied;

/// Returns tasks satisfying the readiness predicate (`spec` §4.1) for
/// `agent_id` with `capability_set`, ordered `(priority ASC, created_at ASC)`
/// with ties broken by `id` lexicographic (`spec` §4.7).
///
/// A reservation held by `agent_id` is a positive filter only: it never
/// excludes a task it names the agent for.
///
/// # Errors
///
/// Returns [`ErrorCode::DbError`] on store failure.
pub fn get_ready_tasks(
    txn: &mut dyn StoreTransaction,
    project_id: &ProjectId,
    agent_id: &AgentId,
    capability_set: &BTreeSet<String>,
) -> Result<Vec<Task>, OperationError> {
    let candidates = txn
        .list_tasks(
            project_id,
            &TaskListFilter { state: Some(TaskState::Ready), ..Default::default() },
        )
        .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?;

    let mut eligible = Vec::new();
    for task in candidates {
        if !is_claimable(txn, project_id, &task, agent_id, capability_set)? {
            continue;
        }
        eligible.push(task);
    }

    eligible.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.as_str().cmp(b.id.as_str()))
    });

    Ok(eligible)
}

/// Checks the four readiness conditions of `spec` §4.1 for one task.
fn is_claimable(
    txn: &mut dyn StoreTransaction,
    project_id: &ProjectId,
    task: &Task,
    agent_id: &AgentId,
    capability_set: &BTreeSet<String>,
) -> Result<bool, OperationError> {
    if txn
        .get_active_lease_for_task(&task.id)
        .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?
        .is_some()
    {
        return Ok(false);
    }

    if let Some(reservation) = txn
        .get_active_reservation_for_task(&task.id)
        .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?
    {
        if &reservation.assignee_agent_id != agent_id {
            return Ok(false);
        }
    }

    if !task.capability_filter_satisfied(capability_set) {
        return Ok(false);
    }

    predecessors_satisfied(txn, project_id, &task.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_capability_set_bypasses_an_empty_filter() {
        let empty: BTreeSet<String> = BTreeSet::new();
        assert!(empty.is_empty());
    }
}
