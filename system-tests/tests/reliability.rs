// system-tests/tests/reliability.rs
// ============================================================================
// Module: Reliability Suite
// Description: Aggregates cross-dialect parity tests, gated behind an
//              operator-provided Postgres database.
// Purpose: Confirm both store dialects honor the same invariants without
//          requiring Postgres for the default local test run.
// Dependencies: suites/*, helpers
// ============================================================================

mod helpers;

#[path = "suites/postgres_parity.rs"]
mod postgres_parity;
