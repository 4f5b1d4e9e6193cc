// crates/fleetgraph-store-postgres/src/lib.rs
// ============================================================================
// Crate: fleetgraph-store-postgres
// Description: A `Postgres`-backed dialect of `fleetgraph_core::interfaces::Store`.
// Purpose: Give multi-node deployments a shared durable backend that can
//          serve concurrent readers and writers across processes.
// Dependencies: fleetgraph-core, postgres, r2d2, r2d2_postgres, serde,
//               serde_json, thiserror, time
// ============================================================================

//! ## Overview
//! [`PostgresStore`] holds an `r2d2` connection pool rather than a single
//! exclusive connection: unlike the `SQLite` dialect, which serializes every
//! transaction behind one mutex, `Postgres` natively supports many concurrent
//! writers, so [`Store::begin`] pulls its own pooled connection per
//! transaction. The connection is held for the transaction's entire lifetime
//! and dropped (rolling back if not committed) when the transaction ends.
//!
//! [`Store::begin`]: fleetgraph_core::interfaces::Store::begin

mod config;
mod convert;
mod schema;
mod store;

pub use config::PostgresStoreConfig;
pub use store::PostgresStore;
pub use store::PostgresStoreError;
