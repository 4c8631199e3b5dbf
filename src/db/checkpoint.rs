use std::{fmt, sync::Arc};

use log::debug;

use crate::{
    db::{
        models::{Checkpoint, Position},
        store::Store,
    },
    error::StoreError,
};

/// Logical ingestion streams, each owning exactly one cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    Operations,
    Accounts,
    Comments,
    PostProcessing,
}

impl Stream {
    pub fn name(self) -> &'static str {
        match self {
            Self::Operations => "operations",
            Self::Accounts => "accounts",
            Self::Comments => "comments",
            Self::PostProcessing => "post_processing",
        }
    }

    /// Start value used when no cursor has been persisted yet.
    pub fn default_position(self) -> Position {
        match self {
            Self::Accounts => Position::Token(String::new()),
            _ => Position::Height(1),
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Durable per-stream cursors. Last write wins; callers keep one writer per
/// stream.
#[derive(Clone)]
pub struct CheckpointStore {
    store: Arc<dyn Store>,
}

impl CheckpointStore {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn get(&self, stream: Stream) -> Result<Position, StoreError> {
        Ok(self
            .store
            .load_checkpoint(stream.name())
            .await?
            .map(|c| c.position)
            .unwrap_or_else(|| stream.default_position()))
    }

    /// Height cursor for block-driven streams. A token-valued cursor under a
    /// height stream is treated as absent.
    pub async fn get_height(&self, stream: Stream) -> Result<u64, StoreError> {
        Ok(self.get(stream).await?.as_height().unwrap_or(1))
    }

    pub async fn set(&self, stream: Stream, position: Position) -> Result<(), StoreError> {
        debug!("[{stream}] checkpoint -> {position:?}");
        self.store
            .save_checkpoint(&Checkpoint::new(stream.name(), position))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;

    #[tokio::test]
    async fn defaults_until_first_write() {
        let checkpoints = CheckpointStore::new(Arc::new(MemoryStore::new()));
        assert_eq!(checkpoints.get_height(Stream::Operations).await.unwrap(), 1);
        assert_eq!(
            checkpoints.get(Stream::Accounts).await.unwrap(),
            Position::Token(String::new())
        );

        checkpoints
            .set(Stream::Operations, Position::Height(500))
            .await
            .unwrap();
        checkpoints
            .set(Stream::Operations, Position::Height(499))
            .await
            .unwrap();
        assert_eq!(checkpoints.get_height(Stream::Operations).await.unwrap(), 499);
        assert_eq!(checkpoints.get_height(Stream::Comments).await.unwrap(), 1);
    }
}
