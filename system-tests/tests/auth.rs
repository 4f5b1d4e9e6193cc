// system-tests/tests/auth.rs
// ============================================================================
// Module: Auth Suite
// Description: Aggregates bearer-token authentication and authorization
//              tests.
// Purpose: Reduce binaries while keeping auth coverage centralized.
// Dependencies: suites/*, helpers
// ============================================================================

mod helpers;

#[path = "suites/auth.rs"]
mod auth;
