//! Seed-scenario fixtures shared by every suite: a project with one phase
//! and one milestone, built through [`Orchestrator`] itself rather than by
//! hand-inserting rows, so these tests exercise exactly the path a real
//! caller would.

use std::collections::BTreeSet;
use std::sync::Arc;

use fleetgraph_core::clock::Clock;
use fleetgraph_core::clock::Timestamp;
use fleetgraph_core::ids::MilestoneId;
use fleetgraph_core::ids::PhaseId;
use fleetgraph_core::ids::ProjectId;
use fleetgraph_core::interfaces::Store;
use fleetgraph_core::interfaces::StoreTransaction;
use fleetgraph_core::model::Task;
use fleetgraph_core::model::TaskClass;
use fleetgraph_core::runtime::service::CreateTaskRequest;
use fleetgraph_core::runtime::service::Orchestrator;
use serde_json::json;
use time::Duration;

use crate::helpers::clock::FixedClock;
use crate::helpers::shared_store::SharedStore;

/// Default lease duration for fixture orchestrators: 300 seconds, matching
/// [`fleetgraph_core::runtime::lease::DEFAULT_LEASE_DURATION`].
pub const DEFAULT_LEASE_SECONDS: i64 = 300;

/// Default reservation TTL for fixture orchestrators.
pub const DEFAULT_RESERVATION_TTL_SECONDS: i64 = 1800;

/// A project seeded with one phase and one milestone, plus the orchestrator,
/// store handle, and clock that created it. The store handle is kept
/// alongside the orchestrator (which owns its own clone) so a suite that
/// needs to drive `fleetgraph-metrics::run` or inspect the event log
/// directly, outside any `Orchestrator` method, still shares the same
/// backing database.
pub struct SeededProject {
    pub orchestrator: Orchestrator<SharedStore>,
    store: SharedStore,
    pub clock: Arc<FixedClock>,
    pub project_id: ProjectId,
    pub phase_id: PhaseId,
    pub milestone_id: MilestoneId,
}

impl SeededProject {
    /// Opens a transaction directly against the project's backing store,
    /// for suites that need to call into `fleetgraph-metrics` or append
    /// events the `Orchestrator` API has no operation for.
    pub fn begin(&self) -> Box<dyn StoreTransaction + '_> {
        self.store.begin().expect("begin transaction")
    }

    /// Returns the clock as a `&dyn Clock`, for passing straight into a
    /// `fleetgraph-metrics` call.
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Returns a cloned handle to the project's backing store, for suites
    /// that build their own collaborator (e.g. an `Authenticator`) over the
    /// same in-memory database the `Orchestrator` is using.
    pub fn store_handle(&self) -> SharedStore {
        self.store.clone()
    }
}

/// Builds an [`Orchestrator`] over a fresh in-memory [`SharedStore`] and
/// seeds `Project P` / `Phase P1` / `Milestone P1.M1` (`spec` §8's seed
/// scenarios use exactly this shape).
pub fn seeded_project() -> SeededProject {
    let clock = Arc::new(FixedClock::new());
    let store = SharedStore::in_memory();
    let orchestrator = Orchestrator::new(
        store.clone(),
        Box::new(ArcClock(clock.clone())),
        Duration::seconds(DEFAULT_LEASE_SECONDS),
        Duration::seconds(DEFAULT_RESERVATION_TTL_SECONDS),
    );

    let project = orchestrator.create_project("P".to_string()).expect("create project");
    let phase = orchestrator.create_phase(&project.id, "P1".to_string()).expect("create phase");
    let milestone =
        orchestrator.create_milestone(&project.id, &phase.id, "P1.M1".to_string()).expect("create milestone");

    SeededProject { orchestrator, store, clock, project_id: project.id, phase_id: phase.id, milestone_id: milestone.id }
}

/// A [`Clock`] that reads through a shared [`FixedClock`], letting a test
/// advance time after the orchestrator has already taken ownership of its
/// own boxed clock handle.
struct ArcClock(Arc<FixedClock>);

impl Clock for ArcClock {
    fn now(&self) -> Timestamp {
        self.0.now()
    }
}

/// Builds a minimal, otherwise-default [`CreateTaskRequest`] for `phase_id`/
/// `milestone_id`, named `title`.
pub fn task_request(phase_id: &PhaseId, milestone_id: &MilestoneId, title: &str) -> CreateTaskRequest {
    CreateTaskRequest {
        phase_id: phase_id.clone(),
        milestone_id: milestone_id.clone(),
        title: title.to_string(),
        priority: 10,
        work_spec: json!({ "objective": title }),
        task_class: TaskClass::Backend,
        capability_tags: BTreeSet::new(),
        expected_touches: BTreeSet::new(),
        exclusive_paths: BTreeSet::new(),
        shared_paths: BTreeSet::new(),
    }
}

/// Creates a task named `title` under `seeded.phase_id`/`seeded.milestone_id`.
pub fn create_task(seeded: &SeededProject, title: &str) -> Task {
    seeded
        .orchestrator
        .create_task(&seeded.project_id, task_request(&seeded.phase_id, &seeded.milestone_id, title))
        .expect("create task")
}
