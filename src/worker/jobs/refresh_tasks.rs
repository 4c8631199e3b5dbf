use anyhow::Context;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::worker::WorkerContext;

/// Execute queued refresh tasks until cancelled.
///
/// A task is acknowledged once it ran, whether it succeeded or not: a failed
/// entity is picked up again the next time an operation touches it.
pub async fn process_refresh_tasks(ctx: &WorkerContext, cancel: CancellationToken) -> anyhow::Result<()> {
    let source = ctx
        .tasks
        .clone()
        .context("process_refresh_tasks requires an enabled redpanda section")?;
    info!("[process_refresh_tasks] Waiting for tasks");

    loop {
        let task = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            task = source.recv() => task.context("Failed to receive refresh task")?,
        };
        let Some(task) = task else {
            info!("[process_refresh_tasks] Task source closed");
            return Ok(());
        };

        if let Err(e) = task.execute(&ctx.refresher).await {
            warn!("[process_refresh_tasks] Refresh of {} failed: {}", task, e);
        }
        source.ack().await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Settings,
        db::{models::RefreshDepth, Database},
        ledger::fake::FakeLedger,
        worker::{RefreshTask, TaskSource},
    };
    use async_trait::async_trait;
    use serde_json::json;
    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
    };

    #[derive(Default)]
    struct ScriptedSource {
        tasks: Mutex<VecDeque<RefreshTask>>,
        acks: Mutex<usize>,
    }

    #[async_trait]
    impl TaskSource for ScriptedSource {
        async fn recv(&self) -> anyhow::Result<Option<RefreshTask>> {
            Ok(self.tasks.lock().unwrap().pop_front())
        }

        async fn ack(&self) -> anyhow::Result<()> {
            *self.acks.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn executes_and_acknowledges_every_task() {
        let fake = Arc::new(FakeLedger::new());
        fake.put_account("alice", json!({"name": "alice"}));
        fake.fail_account("bob");

        let source = Arc::new(ScriptedSource::default());
        for name in ["alice", "bob"] {
            source.tasks.lock().unwrap().push_back(RefreshTask::Account {
                name: name.into(),
                depth: RefreshDepth::Light,
            });
        }

        let (db, memory) = Database::in_memory();
        let ctx = WorkerContext::new(Arc::new(Settings::default()), fake, db, None)
            .with_task_source(source.clone());
        process_refresh_tasks(&ctx, CancellationToken::new()).await.unwrap();

        assert!(memory.account("alice").is_some());
        assert!(memory.account("bob").is_none());
        assert_eq!(*source.acks.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn requires_a_task_source() {
        let (db, _) = Database::in_memory();
        let ctx = WorkerContext::new(
            Arc::new(Settings::default()),
            Arc::new(FakeLedger::new()),
            db,
            None,
        );
        assert!(process_refresh_tasks(&ctx, CancellationToken::new()).await.is_err());
    }
}
