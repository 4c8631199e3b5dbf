use anyhow::Context;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::{
    db::{
        models::{Position, RefreshDepth},
        Stream,
    },
    error::{SyncError, SyncResult},
    worker::{HistoryMode, WorkerContext},
};

/// Names fetched per `lookup_accounts` call.
pub const USERNAME_BATCH: u32 = 1000;

/// Walk every account alphabetically, one batch per pass: light refresh and
/// full history backfill per account, checkpointing the name after each.
/// An account the ledger fails on is logged and skipped.
///
/// A short batch means the scan reached the end; the cursor goes back to the
/// start so stale accounts keep being revisited.
pub async fn scrape_all_users(ctx: &WorkerContext, cancel: CancellationToken) -> anyhow::Result<()> {
    let position = ctx.db.checkpoints.get(Stream::Accounts).await?;
    let lower_bound = position.as_token().unwrap_or_default().to_string();

    let names = ctx
        .ledger()
        .lookup_accounts(&lower_bound, USERNAME_BATCH)
        .await
        .with_context(|| format!("Failed to list accounts from {lower_bound:?}"))?;

    for name in &names {
        if cancel.is_cancelled() {
            return Ok(());
        }
        match refresh_user(ctx, name).await {
            Ok(inserted) => {
                info!("[scrape_all_users] Updated @{} ({} new operations)", name, inserted)
            },
            // store failures abort the pass
            Err(SyncError::Store(e)) => {
                return Err(e).with_context(|| format!("Failed to update @{name}"));
            },
            Err(e) => warn!("[scrape_all_users] Skipping @{}: {}", name, e),
        }

        ctx.db
            .checkpoints
            .set(Stream::Accounts, Position::Token(name.clone()))
            .await?;
    }

    if !lower_bound.is_empty() && names.len() < USERNAME_BATCH as usize {
        info!("[scrape_all_users] Reached the last account, starting over");
        ctx.db
            .checkpoints
            .set(Stream::Accounts, Position::Token(String::new()))
            .await?;
    }
    Ok(())
}

async fn refresh_user(ctx: &WorkerContext, name: &str) -> SyncResult<u64> {
    ctx.refresher.refresh_account(name, RefreshDepth::Light).await?;
    ctx.refresher
        .refresh_account_history(name, HistoryMode::Backfill)
        .await
}
