// crates/fleetgraph-core/src/runtime/mod.rs
// ============================================================================
// Module: Fleetgraph Runtime
// Description: Orchestration logic operating against the Store seam.
// ============================================================================

//! ## Overview
//! Everything under `runtime` is backend-agnostic and holds no mutable
//! module-level state; every function takes its collaborators (a store
//! transaction, a clock) as explicit parameters. [`service::Orchestrator`]
//! is the single entry point transport shells call into; the other
//! submodules are its internal building blocks, kept separate so each can
//! be reasoned about (and tested) against a plain transaction.

pub mod alerts;
pub mod gate;
pub mod graph;
pub mod lease;
pub mod plan;
pub mod ready;
pub mod service;
pub mod state_machine;

pub use service::Orchestrator;
pub use service::OrchestratorError;
