use tokio_util::sync::CancellationToken;

use crate::{cron::CronScheduler, worker::WorkerContext};

/// Run the periodic operation audit until cancelled.
pub async fn validate_operations(ctx: &WorkerContext, cancel: CancellationToken) -> anyhow::Result<()> {
    let scheduler = CronScheduler::new(
        ctx.db.clone(),
        ctx.validator.clone(),
        ctx.settings.audit.clone(),
    );
    scheduler.run(cancel).await
}
