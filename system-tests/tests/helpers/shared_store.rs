//! A cheaply cloned handle onto one [`SqliteStore`], so a single test can
//! build both an [`Orchestrator`](fleetgraph_core::runtime::Orchestrator)
//! and an [`Authenticator`](fleetgraph_auth::Authenticator) over the same
//! backing database. Neither store type is `Clone` on its own: `SqliteStore`
//! holds its connection behind a bare `Mutex`, not an `Arc`, since
//! production callers only ever need one owner per process.

use std::sync::Arc;

use fleetgraph_core::interfaces::Store;
use fleetgraph_core::interfaces::StoreError;
use fleetgraph_core::interfaces::StoreTransaction;
use fleetgraph_store_sqlite::SqliteStore;
use fleetgraph_store_sqlite::SqliteStoreConfig;

/// An `Arc`-backed handle onto one in-memory [`SqliteStore`]. Cloning shares
/// the same underlying connection rather than opening a second, empty
/// `:memory:` database.
#[derive(Clone)]
pub struct SharedStore(Arc<SqliteStore>);

impl SharedStore {
    /// Opens a fresh in-memory store.
    pub fn in_memory() -> Self {
        let store = SqliteStore::open(&SqliteStoreConfig::in_memory()).expect("open in-memory store");
        Self(Arc::new(store))
    }
}

impl Store for SharedStore {
    fn begin(&self) -> Result<Box<dyn StoreTransaction + '_>, StoreError> {
        self.0.begin()
    }
}
