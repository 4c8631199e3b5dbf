//! Cron scheduler for periodic background tasks.
//!
//! Runs the operation audit: the trailing window below the operations
//! checkpoint is replayed from the ledger and diffed against the store.

use std::time::Duration;

use anyhow::Result;
use log::{error, info};
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;

use crate::{config::AuditSettings, db::Database, worker::Validator};

use super::jobs;

/// Cron scheduler that manages periodic background jobs.
pub struct CronScheduler {
    db: Database,
    validator: Validator,
    settings: AuditSettings,
}

impl CronScheduler {
    pub fn new(db: Database, validator: Validator, settings: AuditSettings) -> Self {
        Self {
            db,
            validator,
            settings,
        }
    }

    /// Starts the cron scheduler and runs until cancellation.
    pub async fn run(&self, cancellation_token: CancellationToken) -> Result<()> {
        let mut scheduler = JobScheduler::new().await?;

        self.register_validate_operations_job(&scheduler).await?;

        scheduler.start().await?;
        info!("Cron scheduler started");

        // First audit runs right away instead of one interval later
        if let Err(e) =
            jobs::validate_operations::run(&self.db, &self.validator, self.settings.window_blocks)
                .await
        {
            error!("Failed to validate operations: {:#}", e);
        }

        cancellation_token.cancelled().await;
        info!("Cron scheduler shutting down...");

        scheduler.shutdown().await?;
        Ok(())
    }

    async fn register_validate_operations_job(&self, scheduler: &JobScheduler) -> Result<()> {
        let db = self.db.clone();
        let validator = self.validator.clone();
        let window = self.settings.window_blocks;
        let interval = self.settings.interval_secs;

        let job = Job::new_repeated_async(Duration::from_secs(interval), move |_uuid, _lock| {
            let db = db.clone();
            let validator = validator.clone();
            Box::pin(async move {
                if let Err(e) = jobs::validate_operations::run(&db, &validator, window).await {
                    error!("Failed to validate operations: {:#}", e);
                }
            })
        })?;

        scheduler.add(job).await?;
        info!("Registered validate_operations job (every {}s)", interval);
        Ok(())
    }
}
