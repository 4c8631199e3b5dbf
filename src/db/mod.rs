use std::sync::Arc;

use log::info;

use crate::config::Settings;

pub mod checkpoint;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod sanitize;
pub mod store;
pub mod writer;

pub use checkpoint::{CheckpointStore, Stream};
pub use memory::MemoryStore;
pub use postgres::PostgresClient;
pub use store::{OperationQuery, Store};
pub use writer::{InsertOutcome, Writer};

/// Handles onto the persistent store, shared by every worker.
///
/// Reads go straight to `store`; mutations of persisted records go through
/// `writer`, cursors through `checkpoints`.
#[derive(Clone)]
pub struct Database {
    pub store: Arc<dyn Store>,
    pub writer: Writer,
    pub checkpoints: CheckpointStore,
}

impl Database {
    /// Connect to PostgreSQL and apply the schema.
    pub async fn new(settings: Arc<Settings>) -> anyhow::Result<Self> {
        let postgres = PostgresClient::new(settings.postgres.clone()).await?;
        postgres.migrate().await?;
        info!("Database ready");
        Ok(Self::from_store(Arc::new(postgres)))
    }

    pub fn from_store(store: Arc<dyn Store>) -> Self {
        Self {
            writer: Writer::new(store.clone()),
            checkpoints: CheckpointStore::new(store.clone()),
            store,
        }
    }

    /// Fresh in-memory database, returned with a typed handle for inspection.
    pub fn in_memory() -> (Self, Arc<MemoryStore>) {
        let memory = Arc::new(MemoryStore::new());
        (Self::from_store(memory.clone()), memory)
    }
}
