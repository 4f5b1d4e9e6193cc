// crates/fleetgraph-store-sqlite/src/lib.rs
// ============================================================================
// Crate: fleetgraph-store-sqlite
// Description: A `SQLite`-backed dialect of `fleetgraph_core::interfaces::Store`.
// Purpose: Give single-node deployments and the system test suite a durable,
//          dependency-light store with no external service to stand up.
// Dependencies: fleetgraph-core, rusqlite, serde, serde_json, thiserror, time
// ============================================================================

//! ## Overview
//! [`SqliteStore`] opens one [`rusqlite::Connection`] behind an
//! [`std::sync::Mutex`] and hands out transactions one at a time; every
//! `fleetgraph-core` operation runs inside exactly one `BEGIN IMMEDIATE`
//! transaction, matching `spec` §5's single-writer, no-partial-mutation rule.
//! There is no writer-queue batching thread and no perf-histogram
//! instrumentation: every `fleetgraph-core` operation issues one mutation
//! per transaction rather than amortized batches, so there is nothing to
//! batch.

mod config;
mod convert;
mod schema;
mod store;

pub use config::SqliteStoreConfig;
pub use config::SqliteStoreMode;
pub use config::SqliteSyncMode;
pub use store::SqliteStore;
pub use store::SqliteStoreError;
