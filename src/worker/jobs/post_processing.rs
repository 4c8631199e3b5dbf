use anyhow::Context;
use log::{debug, info};

use crate::{
    db::{models::Position, OperationQuery, Stream},
    worker::{
        classifier::classify_all,
        jobs::{is_recent, operations_window},
        BatchDispatcher, WorkerContext,
    },
};

/// Classify the next window of persisted operations and refresh what they
/// touched: comment chains always, accounts only while the window is recent.
/// Older windows leave accounts to `scrape_all_users`.
pub async fn post_processing(ctx: &WorkerContext) -> anyhow::Result<()> {
    let batch_size = ctx.settings.post_processing.batch_size;
    let Some((start, end)) = operations_window(&ctx.db, Stream::PostProcessing, batch_size).await?
    else {
        debug!("[post_processing] Waiting for operations to be ingested");
        return Ok(());
    };

    let ops = ctx
        .db
        .store
        .find_operations(&OperationQuery::window(start, end))
        .await
        .context("Failed to load operations")?;
    let classification = classify_all(&ops);

    let head = ctx.reader.head_height().await.context("Failed to fetch head block")?;
    let recent = is_recent(start, head, ctx.settings.refresh.recent_account_days);
    let plan = BatchDispatcher::plan(&classification, recent, true);
    let report = ctx.dispatcher.run(plan).await;

    ctx.db
        .checkpoints
        .set(Stream::PostProcessing, Position::Height(end))
        .await?;

    info!(
        "[post_processing] Checkpoint: {} - {} comments, {} accounts (+{} full){} ({} failed)",
        end,
        classification.comments.len(),
        classification.accounts_light.len(),
        classification.accounts_full.len(),
        if recent { "" } else { ", accounts skipped" },
        report.failed,
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Settings,
        db::Database,
        ledger::fake::{make_op, make_post, FakeLedger},
        worker::jobs::BLOCKS_PER_DAY,
    };
    use serde_json::json;
    use std::sync::Arc;

    async fn seeded(head: u64) -> (WorkerContext, Arc<crate::db::MemoryStore>) {
        let fake = Arc::new(FakeLedger::new());
        fake.set_head(head);
        fake.put_post(make_post("bob/post1", None, 0));
        fake.put_post(make_post("carol/reply2", Some("bob/post1"), 1));
        for name in ["alice", "carol"] {
            fake.put_account(name, json!({"name": name}));
        }
        fake.put_history("alice", 3);

        let (db, memory) = Database::in_memory();
        db.writer
            .insert_operation(make_op(10, "vote", json!({"voter": "alice", "author": "carol", "permlink": "reply2"})))
            .await
            .unwrap();
        db.writer
            .insert_operation(make_op(12, "account_update", json!({"account": "carol"})))
            .await
            .unwrap();
        db.checkpoints
            .set(Stream::Operations, Position::Height(50))
            .await
            .unwrap();

        let ctx = WorkerContext::new(Arc::new(Settings::default()), fake, db, None);
        (ctx, memory)
    }

    #[tokio::test]
    async fn recent_window_refreshes_chains_and_accounts() {
        let (ctx, memory) = seeded(60).await;
        post_processing(&ctx).await.unwrap();

        assert!(memory.comment("carol/reply2").is_some());
        assert!(memory.post("bob/post1").is_some());
        assert!(memory.account("alice").is_some());
        assert!(memory.account("carol").is_some());
        assert_eq!(memory.account_operation_indexes("alice"), vec![0, 1, 2]);
        assert_eq!(ctx.db.checkpoints.get_height(Stream::PostProcessing).await.unwrap(), 50);
    }

    #[tokio::test]
    async fn stale_window_skips_accounts() {
        let (ctx, memory) = seeded(20 * BLOCKS_PER_DAY).await;
        post_processing(&ctx).await.unwrap();

        assert!(memory.post("bob/post1").is_some());
        assert!(memory.account("alice").is_none());
        assert_eq!(ctx.db.checkpoints.get_height(Stream::PostProcessing).await.unwrap(), 50);
    }
}
