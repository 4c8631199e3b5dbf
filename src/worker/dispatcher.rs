//! Fans classified entities out to refreshers with bounded concurrency.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use futures::{stream, StreamExt};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{
    db::models::RefreshDepth,
    error::SyncResult,
    worker::{
        classifier::Classification,
        refresher::{EntityRefresher, HistoryMode},
    },
};

/// One unit of refresh work. Also the payload of queued delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum RefreshTask {
    Account { name: String, depth: RefreshDepth },
    AccountHistory { name: String, mode: HistoryMode },
    CommentChain { identifier: String, recursive: bool },
}

impl RefreshTask {
    /// Partitioning key: tasks for the same entity land on the same partition.
    pub fn key(&self) -> &str {
        match self {
            Self::Account { name, .. } | Self::AccountHistory { name, .. } => name,
            Self::CommentChain { identifier, .. } => identifier,
        }
    }

    pub async fn execute(&self, refresher: &EntityRefresher) -> SyncResult<()> {
        match self {
            Self::Account { name, depth } => {
                refresher.refresh_account(name, *depth).await?;
            },
            Self::AccountHistory { name, mode } => {
                refresher.refresh_account_history(name, *mode).await?;
            },
            Self::CommentChain {
                identifier,
                recursive,
            } => {
                refresher.refresh_comment_chain(identifier, *recursive).await?;
            },
        }
        Ok(())
    }
}

impl fmt::Display for RefreshTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Account { name, depth } => write!(f, "account @{name} ({depth:?})"),
            Self::AccountHistory { name, mode } => write!(f, "history @{name} ({mode:?})"),
            Self::CommentChain {
                identifier,
                recursive,
            } => write!(f, "comment {identifier} (recursive: {recursive})"),
        }
    }
}

/// External task delivery. Fire-and-forget, at-least-once, unordered.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: &RefreshTask) -> anyhow::Result<()>;
}

/// Consumer side of the task queue.
#[async_trait]
pub trait TaskSource: Send + Sync {
    /// Wait for the next task. `None` means the source is closed.
    async fn recv(&self) -> anyhow::Result<Option<RefreshTask>>;

    /// Confirm the last received task was applied.
    async fn ack(&self) -> anyhow::Result<()>;
}

/// Where dispatched tasks go.
#[derive(Clone)]
pub enum Delivery {
    Inline(EntityRefresher),
    Queue(Arc<dyn TaskQueue>),
}

/// Per-batch tally. Failures are logged and counted, never propagated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub succeeded: usize,
    pub failed: usize,
}

impl DispatchReport {
    fn record(&mut self, ok: bool) {
        if ok {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }

    pub fn absorb(&mut self, other: DispatchReport) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
    }
}

/// Tasks for one window, grouped into phases that run one after another.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshPlan {
    pub comments: Vec<RefreshTask>,
    pub accounts: Vec<RefreshTask>,
    pub histories: Vec<RefreshTask>,
}

impl RefreshPlan {
    pub fn len(&self) -> usize {
        self.comments.len() + self.accounts.len() + self.histories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn sorted<'a>(names: impl IntoIterator<Item = &'a String>) -> Vec<String> {
    let mut names: Vec<String> = names.into_iter().cloned().collect();
    names.sort();
    names.dedup();
    names
}

#[derive(Clone)]
pub struct BatchDispatcher {
    delivery: Delivery,
    max_workers: usize,
}

impl BatchDispatcher {
    pub fn new(delivery: Delivery, max_workers: usize) -> Self {
        Self {
            delivery,
            max_workers: max_workers.max(1),
        }
    }

    /// Turn a merged classification into refresh tasks. Accounts and their
    /// recent history are only planned when `include_accounts` is set.
    pub fn plan(
        classification: &Classification,
        include_accounts: bool,
        recursive_comments: bool,
    ) -> RefreshPlan {
        let comments = sorted(&classification.comments)
            .into_iter()
            .map(|identifier| RefreshTask::CommentChain {
                identifier,
                recursive: recursive_comments,
            })
            .collect();

        if !include_accounts {
            return RefreshPlan {
                comments,
                ..RefreshPlan::default()
            };
        }

        let light = sorted(&classification.accounts_light)
            .into_iter()
            .map(|name| RefreshTask::Account {
                name,
                depth: RefreshDepth::Light,
            });
        let full = sorted(&classification.accounts_full)
            .into_iter()
            .map(|name| RefreshTask::Account {
                name,
                depth: RefreshDepth::Full,
            });
        let histories = sorted(
            classification
                .accounts_light
                .iter()
                .chain(&classification.accounts_full),
        )
        .into_iter()
        .map(|name| RefreshTask::AccountHistory {
            name,
            mode: HistoryMode::Recent,
        })
        .collect();

        RefreshPlan {
            comments,
            accounts: light.chain(full).collect(),
            histories,
        }
    }

    /// Run every phase of `plan` in order.
    pub async fn run(&self, plan: RefreshPlan) -> DispatchReport {
        let mut report = DispatchReport::default();
        for phase in [plan.comments, plan.accounts, plan.histories] {
            report.absorb(self.dispatch(phase).await);
        }
        report
    }

    /// Deliver `tasks` with at most `max_workers` in flight. A failing task
    /// never aborts the others.
    pub async fn dispatch(&self, tasks: Vec<RefreshTask>) -> DispatchReport {
        if tasks.is_empty() {
            return DispatchReport::default();
        }
        debug!("Dispatching {} refresh tasks", tasks.len());

        stream::iter(tasks)
            .map(|task| {
                let delivery = self.delivery.clone();
                async move {
                    let result = match &delivery {
                        Delivery::Inline(refresher) => {
                            task.execute(refresher).await.map_err(anyhow::Error::from)
                        },
                        Delivery::Queue(queue) => queue.enqueue(&task).await,
                    };
                    if let Err(e) = &result {
                        warn!("Refresh of {} failed: {:#}", task, e);
                    }
                    result.is_ok()
                }
            })
            .buffer_unordered(self.max_workers)
            .fold(DispatchReport::default(), |mut report, ok| async move {
                report.record(ok);
                report
            })
            .await
    }
}
