// system-tests/tests/functional.rs
// ============================================================================
// Module: Functional Suite
// Description: Aggregates task lifecycle and plan-changeset functional tests.
// Purpose: Reduce binaries while keeping functional coverage centralized.
// Dependencies: suites/*, helpers
// ============================================================================

mod helpers;

#[path = "suites/lifecycle.rs"]
mod lifecycle;
#[path = "suites/plan_changes.rs"]
mod plan_changes;
