// system-tests/tests/invariants.rs
// ============================================================================
// Module: Invariants Suite
// Description: Aggregates universal invariants and boundary-condition tests.
// Purpose: Reduce binaries while keeping invariant coverage centralized.
// Dependencies: suites/*, helpers
// ============================================================================

mod helpers;

#[path = "suites/invariants.rs"]
mod invariants;
