// system-tests/tests/gates.rs
// ============================================================================
// Module: Gates Suite
// Description: Aggregates integration-precondition and gate-class tests.
// Purpose: Reduce binaries while keeping gate coverage centralized.
// Dependencies: suites/*, helpers
// ============================================================================

mod helpers;

#[path = "suites/gates.rs"]
mod gates;
