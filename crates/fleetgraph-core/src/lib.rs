// crates/fleetgraph-core/src/lib.rs
// ============================================================================
// Crate: fleetgraph-core
// Description: Domain model, persistence seam, and orchestration logic for
//              coordinating a multi-tenant fleet of autonomous worker agents
//              against a versioned task graph.
// ============================================================================

//! `fleetgraph-core` is backend-agnostic: it depends only on the
//! [`interfaces::Store`] trait, never on a concrete database driver. A
//! storage crate (`fleetgraph-store-sqlite`, `fleetgraph-store-postgres`)
//! implements that trait; `runtime::service::Orchestrator` is generic over
//! it.

pub mod clock;
pub mod errors;
pub mod hashing;
pub mod ids;
pub mod interfaces;
pub mod model;
pub mod runtime;
