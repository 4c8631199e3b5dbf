use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{
    config::{DeliveryMode, Settings},
    db::Database,
    ledger::{Ledger, LedgerReader},
    worker::{
        dispatcher::{BatchDispatcher, Delivery, TaskQueue, TaskSource},
        jobs,
        refresher::EntityRefresher,
        supervisor::{Supervisor, SupervisorReport},
        validator::Validator,
    },
};

#[derive(Debug, Error)]
#[error(
    "unknown worker `{0}`, expected one of: {expected}",
    expected = WorkerName::ALL.map(WorkerName::name).join(", ")
)]
pub struct UnknownWorker(String);

/// The long-running workers a process can be started as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerName {
    ScrapeOperations,
    ScrapeBlockchain,
    ScrapeComments,
    PostProcessing,
    ScrapeAllUsers,
    ValidateOperations,
    ProcessRefreshTasks,
}

impl WorkerName {
    pub const ALL: [WorkerName; 7] = [
        Self::ScrapeOperations,
        Self::ScrapeBlockchain,
        Self::ScrapeComments,
        Self::PostProcessing,
        Self::ScrapeAllUsers,
        Self::ValidateOperations,
        Self::ProcessRefreshTasks,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::ScrapeOperations => "scrape_operations",
            Self::ScrapeBlockchain => "scrape_blockchain",
            Self::ScrapeComments => "scrape_comments",
            Self::PostProcessing => "post_processing",
            Self::ScrapeAllUsers => "scrape_all_users",
            Self::ValidateOperations => "validate_operations",
            Self::ProcessRefreshTasks => "process_refresh_tasks",
        }
    }

    /// One pass of the worker. Streaming workers only return on error or
    /// cancellation; windowed workers return after one window.
    pub async fn run_once(self, ctx: &WorkerContext, cancel: CancellationToken) -> anyhow::Result<()> {
        match self {
            Self::ScrapeOperations => jobs::operations::scrape_operations(ctx, cancel).await,
            Self::ScrapeBlockchain => jobs::blockchain::scrape_blockchain(ctx, cancel).await,
            Self::ScrapeComments => jobs::comments::scrape_comments(ctx).await,
            Self::PostProcessing => jobs::post_processing::post_processing(ctx).await,
            Self::ScrapeAllUsers => jobs::accounts::scrape_all_users(ctx, cancel).await,
            Self::ValidateOperations => jobs::audit::validate_operations(ctx, cancel).await,
            Self::ProcessRefreshTasks => jobs::refresh_tasks::process_refresh_tasks(ctx, cancel).await,
        }
    }

    /// Run under a [`Supervisor`] until `cancel` fires.
    pub async fn supervise(self, ctx: WorkerContext, cancel: CancellationToken) -> SupervisorReport {
        let supervisor = Supervisor::from_settings(self.name(), &ctx.settings.supervisor);
        supervisor
            .run(cancel, |token| {
                let ctx = ctx.clone();
                async move { self.run_once(&ctx, token).await }
            })
            .await
    }
}

impl FromStr for WorkerName {
    type Err = UnknownWorker;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|w| w.name() == s)
            .ok_or_else(|| UnknownWorker(s.to_string()))
    }
}

impl fmt::Display for WorkerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Handles shared by every worker. Cheap to clone.
#[derive(Clone)]
pub struct WorkerContext {
    pub settings: Arc<Settings>,
    pub db: Database,
    pub reader: LedgerReader,
    pub refresher: EntityRefresher,
    pub dispatcher: BatchDispatcher,
    pub validator: Validator,
    pub tasks: Option<Arc<dyn TaskSource>>,
}

impl WorkerContext {
    /// Refresh work is delivered to `queue` when the settings ask for queued
    /// delivery and one is given, otherwise it runs inline.
    pub fn new(
        settings: Arc<Settings>,
        ledger: Ledger,
        db: Database,
        queue: Option<Arc<dyn TaskQueue>>,
    ) -> Self {
        let reader = LedgerReader::new(
            ledger.clone(),
            Duration::from_millis(settings.ledger.poll_interval_ms),
        );
        let refresher = EntityRefresher::new(ledger.clone(), db.clone(), settings.refresh.clone());
        let delivery = match queue {
            Some(queue) if settings.refresh.delivery == DeliveryMode::Queue => Delivery::Queue(queue),
            _ => Delivery::Inline(refresher.clone()),
        };

        Self {
            dispatcher: BatchDispatcher::new(delivery, settings.refresh.max_workers),
            validator: Validator::new(ledger, db.clone()),
            reader,
            refresher,
            db,
            settings,
            tasks: None,
        }
    }

    pub fn with_task_source(mut self, tasks: Arc<dyn TaskSource>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    pub fn ledger(&self) -> &Ledger {
        self.reader.ledger()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_match_exactly() {
        for worker in WorkerName::ALL {
            assert_eq!(worker.name().parse::<WorkerName>().unwrap(), worker);
        }
        assert!("scrape-operations".parse::<WorkerName>().is_err());
        assert!("Scrape_Operations".parse::<WorkerName>().is_err());
        assert!("".parse::<WorkerName>().is_err());
    }

    #[test]
    fn unknown_worker_lists_choices() {
        let err = "nope".parse::<WorkerName>().unwrap_err();
        assert!(err.to_string().contains("post_processing"));
    }
}
