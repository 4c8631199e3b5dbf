use std::time::{Duration, Instant};

use anyhow::Context;
use futures::StreamExt;
use log::info;
use tokio_util::sync::CancellationToken;

use crate::{
    db::{models::Position, Stream},
    worker::WorkerContext,
};

/// Interval for logging progress updates
const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Persist every operation (virtual ones included) from the checkpoint on.
///
/// Entering block N checkpoints N-1: block N may be cut short by a crash, so
/// a restart re-fetches it rather than skipping what was not yet stored.
pub async fn scrape_operations(ctx: &WorkerContext, cancel: CancellationToken) -> anyhow::Result<()> {
    let mut last_block = ctx.db.checkpoints.get_height(Stream::Operations).await?;
    info!("[scrape_operations] Fetching operations, starting with block {}", last_block);

    let every = ctx.settings.ingest.progress_log_every.max(1);
    let mut last_progress_log = Instant::now();
    let mut operations = Box::pin(ctx.reader.stream(last_block, cancel));

    while let Some(op) = operations.next().await {
        let op = op.context("Operation stream failed")?;

        if op.block_num != last_block {
            last_block = op.block_num;
            ctx.db
                .checkpoints
                .set(Stream::Operations, Position::Height(last_block.saturating_sub(1)))
                .await
                .context("Failed to save operations checkpoint")?;

            if last_block % every == 0 || last_progress_log.elapsed() >= PROGRESS_LOG_INTERVAL {
                info!("[scrape_operations] Checkpoint: {}", last_block);
                last_progress_log = Instant::now();
            }
        }

        ctx.db
            .writer
            .insert_operation(op)
            .await
            .context("Failed to store operation")?;
    }

    info!("[scrape_operations] Stopped at block {}", last_block);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Settings,
        db::Database,
        error::LedgerError,
        ledger::fake::FakeLedger,
    };
    use std::sync::Arc;

    fn ledger_with_transfers() -> Arc<FakeLedger> {
        let fake = Arc::new(FakeLedger::new());
        fake.set_head(5);
        for block in 1..=5 {
            fake.push_transfer(block, "alice", "bob");
        }
        fake
    }

    async fn run_until_idle(ctx: &WorkerContext) -> anyhow::Result<()> {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            trigger.cancel();
        });
        scrape_operations(ctx, cancel).await
    }

    #[tokio::test(start_paused = true)]
    async fn restart_after_crash_neither_skips_nor_duplicates() {
        let settings = Arc::new(Settings::default());
        let (db, memory) = Database::in_memory();

        let flaky = ledger_with_transfers();
        flaky.fail_ops_at(4, LedgerError::Rpc {
            method: "condenser_api.get_ops_in_block".into(),
            code: -32602,
            message: "bad request".into(),
        });
        let ctx = WorkerContext::new(settings.clone(), flaky, db.clone(), None);
        assert!(run_until_idle(&ctx).await.is_err());
        assert_eq!(memory.operation_count(), 3);
        assert_eq!(db.checkpoints.get_height(Stream::Operations).await.unwrap(), 2);

        let ctx = WorkerContext::new(settings, ledger_with_transfers(), db.clone(), None);
        run_until_idle(&ctx).await.unwrap();
        assert_eq!(memory.operation_count(), 5);
        assert_eq!(db.checkpoints.get_height(Stream::Operations).await.unwrap(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn rerun_is_idempotent() {
        let settings = Arc::new(Settings::default());
        let (db, memory) = Database::in_memory();
        let ctx = WorkerContext::new(settings, ledger_with_transfers(), db, None);

        run_until_idle(&ctx).await.unwrap();
        let first = memory.operations();
        run_until_idle(&ctx).await.unwrap();
        assert_eq!(memory.operations(), first);
        assert_eq!(first.len(), 5);
    }
}
