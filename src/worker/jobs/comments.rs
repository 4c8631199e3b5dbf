use anyhow::Context;
use log::{debug, info};
use rustc_hash::FxHashSet;

use crate::{
    db::{models::Position, OperationQuery, Stream},
    worker::{jobs::operations_window, RefreshTask, WorkerContext},
};

/// Refresh every post or comment written in the next window of `comment`
/// operations. Ancestors are left to `post_processing`.
pub async fn scrape_comments(ctx: &WorkerContext) -> anyhow::Result<()> {
    let batch_size = ctx.settings.comments.batch_size;
    let Some((start, end)) = operations_window(&ctx.db, Stream::Comments, batch_size).await? else {
        debug!("[scrape_comments] Waiting for operations to be ingested");
        return Ok(());
    };

    let ops = ctx
        .db
        .store
        .find_operations(&OperationQuery::window(start, end).of_type("comment"))
        .await
        .context("Failed to load comment operations")?;

    let identifiers: FxHashSet<String> = ops.iter().filter_map(|op| op.comment_identifier()).collect();
    let mut identifiers: Vec<String> = identifiers.into_iter().collect();
    identifiers.sort();

    let tasks = identifiers
        .into_iter()
        .map(|identifier| RefreshTask::CommentChain {
            identifier,
            recursive: false,
        })
        .collect();
    let report = ctx.dispatcher.dispatch(tasks).await;

    // Comment operations are sparse, the window may hold none at all
    let index = ops.iter().map(|op| op.block_num).max().unwrap_or(end);
    ctx.db
        .checkpoints
        .set(Stream::Comments, Position::Height(index))
        .await?;

    info!(
        "[scrape_comments] Checkpoint: {} ({} refreshed, {} failed)",
        index, report.succeeded, report.failed
    );
    Ok(())
}
