use std::time::{Duration, Instant};

use futures::StreamExt;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::{
    config::IngestSettings,
    db::{models::Block, Database, InsertOutcome},
    error::{IntegrityFault, SyncResult},
    ledger::LedgerReader,
};

/// Gate in front of block persistence: a block above genesis is only
/// accepted once its parent is stored.
#[derive(Clone)]
pub struct ChainContinuity {
    db: Database,
}

impl ChainContinuity {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn accept(&self, block: Block) -> SyncResult<InsertOutcome> {
        if block.requires_parent() && !self.db.store.block_id_exists(&block.previous_block_id).await? {
            return Err(IntegrityFault::MissingAncestor {
                block_num: block.block_num,
                previous_block_id: block.previous_block_id,
            }
            .into());
        }
        Ok(self.db.writer.insert_block(block).await?)
    }
}

/// Full-block ingestion: batched catch-up while far behind, then live.
pub struct BlockIngestor {
    reader: LedgerReader,
    db: Database,
    continuity: ChainContinuity,
    settings: IngestSettings,
}

impl BlockIngestor {
    pub fn new(reader: LedgerReader, db: Database, settings: IngestSettings) -> Self {
        Self {
            reader,
            continuity: ChainContinuity::new(db.clone()),
            db,
            settings,
        }
    }

    async fn next_height(&self) -> SyncResult<u64> {
        Ok(self.db.store.last_block_num().await?.map_or(1, |n| n + 1))
    }

    /// Insert missing blocks in fixed-size batches if the gap to the head
    /// exceeds the threshold. Returns the number of blocks accepted.
    pub async fn catch_up(&self, cancel: &CancellationToken) -> SyncResult<u64> {
        let from = self.next_height().await?;
        let head = self.reader.head_height().await?;
        if head < from || head - from + 1 <= self.settings.catchup_threshold {
            return Ok(0);
        }

        info!("[scrape_blockchain] {} blocks behind, catching up from {}", head - from + 1, from);
        let batch = self.settings.catchup_batch_size.max(1) as u64;
        let mut accepted = 0;
        let mut start = from;
        while start <= head {
            if cancel.is_cancelled() {
                break;
            }
            let end = (start + batch - 1).min(head);
            for block in self.reader.blocks(start..=end).await? {
                self.continuity.accept(block).await?;
                accepted += 1;
            }
            info!("[scrape_blockchain] Checkpoint: {}", end);
            start = end + 1;
        }
        Ok(accepted)
    }

    /// Catch up, then follow the head until cancelled.
    pub async fn run(&self, cancel: CancellationToken) -> SyncResult<()> {
        self.catch_up(&cancel).await?;

        let from = self.next_height().await?;
        info!("[scrape_blockchain] Streaming blocks from {}", from);
        let mut blocks = Box::pin(self.reader.block_stream(from, cancel.clone()));
        let mut last_log = Instant::now();

        while let Some(block) = blocks.next().await {
            let block = block?;
            let block_num = block.block_num;
            if self.continuity.accept(block).await? == InsertOutcome::AlreadyPresent {
                warn!("[scrape_blockchain] Block {} was already stored", block_num);
            }
            if block_num % self.settings.progress_log_every.max(1) == 0
                || last_log.elapsed() > Duration::from_secs(10)
            {
                info!("[scrape_blockchain] Checkpoint: {}", block_num);
                last_log = Instant::now();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::SyncError,
        ledger::fake::{chain_block, FakeLedger},
    };
    use std::sync::Arc;

    #[tokio::test]
    async fn rejects_block_with_unknown_parent() {
        let (db, memory) = Database::in_memory();
        let continuity = ChainContinuity::new(db);
        for height in 1..=100 {
            continuity.accept(chain_block(height)).await.unwrap();
        }

        let mut forked = chain_block(101);
        forked.previous_block_id = "00000064ffffffffffffffffffffffffffffffff".into();
        let err = continuity.accept(forked).await.unwrap_err();

        assert!(matches!(
            err.integrity(),
            Some(IntegrityFault::MissingAncestor { block_num: 101, .. })
        ));
        assert_eq!(memory.block_count(), 100);
    }

    #[tokio::test]
    async fn sibling_of_a_stored_block_is_a_conflict() {
        let (db, memory) = Database::in_memory();
        let continuity = ChainContinuity::new(db);
        for height in 1..=10 {
            continuity.accept(chain_block(height)).await.unwrap();
        }

        let mut sibling = chain_block(10);
        sibling.block_id = "0000000affffffffffffffffffffffffffffffff".into();
        let err = continuity.accept(sibling).await.unwrap_err();

        assert!(matches!(err, SyncError::Store(ref e) if e.is_conflict()));
        assert_eq!(memory.block_at(10).map(|b| b.block_id), Some(chain_block(10).block_id));
        assert_eq!(memory.block_count(), 10);
    }

    #[tokio::test]
    async fn reaccepting_a_block_is_idempotent() {
        let (db, memory) = Database::in_memory();
        let continuity = ChainContinuity::new(db);
        continuity.accept(chain_block(1)).await.unwrap();
        assert_eq!(
            continuity.accept(chain_block(1)).await.unwrap(),
            InsertOutcome::AlreadyPresent
        );
        assert_eq!(memory.block_count(), 1);
    }

    #[tokio::test]
    async fn catch_up_works_in_batches() {
        let fake = Arc::new(FakeLedger::new());
        fake.set_head(250);
        let (db, memory) = Database::in_memory();
        let reader = LedgerReader::new(fake.clone(), Duration::from_millis(10));
        let ingestor = BlockIngestor::new(reader, db, IngestSettings::default());

        let accepted = ingestor.catch_up(&CancellationToken::new()).await.unwrap();
        assert_eq!(accepted, 250);
        assert_eq!(memory.block_count(), 250);
        let batches = fake.calls().iter().filter(|c| c.starts_with("get_blocks")).count();
        assert_eq!(batches, 3);
    }

    #[tokio::test]
    async fn small_gap_skips_catch_up() {
        let fake = Arc::new(FakeLedger::new());
        fake.set_head(50);
        let (db, _) = Database::in_memory();
        let reader = LedgerReader::new(fake, Duration::from_millis(10));
        let ingestor = BlockIngestor::new(reader, db, IngestSettings::default());
        assert_eq!(ingestor.catch_up(&CancellationToken::new()).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn live_ingestion_stops_on_cancel() {
        let fake = Arc::new(FakeLedger::new());
        fake.set_head(30);
        let (db, memory) = Database::in_memory();
        let reader = LedgerReader::new(fake, Duration::from_secs(3));
        let ingestor = BlockIngestor::new(reader, db, IngestSettings::default());

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            trigger.cancel();
        });
        ingestor.run(cancel).await.unwrap();
        assert_eq!(memory.block_count(), 30);
        assert_eq!(memory.block_at(30).map(|b| b.block_num), Some(30));
    }
}
