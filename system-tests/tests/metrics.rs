// system-tests/tests/metrics.rs
// ============================================================================
// Module: Metrics Suite
// Description: Aggregates metrics-replay determinism tests.
// Purpose: Reduce binaries while keeping metrics coverage centralized.
// Dependencies: suites/*, helpers
// ============================================================================

mod helpers;

#[path = "suites/metrics_replay.rs"]
mod metrics_replay;
