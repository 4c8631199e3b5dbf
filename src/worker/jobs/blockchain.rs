use anyhow::Context;
use log::{error, info};
use tokio_util::sync::CancellationToken;

use crate::{
    error::IntegrityFault,
    worker::{BlockIngestor, WorkerContext},
};

/// Ingest full blocks through the continuity gate.
///
/// A broken link means the stored tail disagrees with the ledger. The tail is
/// reconciled before the fault is returned, so the supervised restart can
/// link onto the canonical chain.
pub async fn scrape_blockchain(ctx: &WorkerContext, cancel: CancellationToken) -> anyhow::Result<()> {
    let ingestor = BlockIngestor::new(ctx.reader.clone(), ctx.db.clone(), ctx.settings.ingest.clone());

    let err = match ingestor.run(cancel).await {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };

    if let Some(IntegrityFault::MissingAncestor { block_num, .. }) = err.integrity() {
        let to = block_num.saturating_sub(1);
        let from = to.saturating_sub(ctx.settings.ingest.heal_depth).max(1);
        error!("[scrape_blockchain] {}, reconciling blocks {}..={}", err, from, to);
        let replaced = ctx
            .validator
            .reconcile_blocks(from..=to)
            .await
            .context("Failed to reconcile stored blocks")?;
        info!("[scrape_blockchain] Replaced {} stored blocks", replaced);
    }

    Err(err).context("Block ingestion stopped")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Settings,
        db::Database,
        ledger::fake::{chain_block, FakeLedger},
    };
    use std::{sync::Arc, time::Duration};

    #[tokio::test(start_paused = true)]
    async fn forked_tail_is_healed_then_ingestion_resumes() {
        let fake = Arc::new(FakeLedger::new());
        fake.set_head(15);
        let (db, memory) = Database::in_memory();
        for height in 1..=9 {
            db.writer.insert_block(chain_block(height)).await.unwrap();
        }
        let mut forked = chain_block(10);
        forked.block_id = "0000000affffffffffffffffffffffffffffffff".into();
        db.writer.insert_block(forked).await.unwrap();

        let ctx = WorkerContext::new(Arc::new(Settings::default()), fake, db, None);
        let err = scrape_blockchain(&ctx, CancellationToken::new()).await.unwrap_err();
        assert!(format!("{err:#}").contains("missing previous block"));
        assert_eq!(memory.block_at(10).map(|b| b.block_id), Some(chain_block(10).block_id));
        assert_eq!(memory.block_count(), 10);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            trigger.cancel();
        });
        scrape_blockchain(&ctx, cancel).await.unwrap();
        assert_eq!(memory.block_count(), 15);
    }
}
