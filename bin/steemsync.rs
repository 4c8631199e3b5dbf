use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use jemallocator::Jemalloc;
use log::{info, LevelFilter};
use simple_logger::SimpleLogger;
use tokio_util::sync::CancellationToken;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use steemsync::{
    config::DeliveryMode,
    ledger::Ledger,
    worker::{TaskQueue, TaskSource},
    Database, RedpandaConsumer, RedpandaPublisher, Settings, SteemRpcClient, WorkerContext,
    WorkerName,
};

#[derive(Parser)]
#[clap(author, version, about = "Steem blockchain to PostgreSQL sync service")]
struct Args {
    /// Worker to run, e.g. scrape_operations or post_processing
    #[clap(short, long)]
    worker: WorkerName,
}

#[tokio::main()]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .env()
        .init()
        .context("Failed to initialize logger")?;

    // Load configuration
    let settings = Arc::new(
        Settings::new()
            .context("Failed to load config.yaml. Please ensure it exists and is valid")?,
    );

    let db = Database::new(settings.clone())
        .await
        .context("Failed to initialize database connection")?;

    let ledger: Ledger = Arc::new(
        SteemRpcClient::new(&settings.ledger).context("Failed to create ledger client")?,
    );
    let head = ledger
        .head_height()
        .await
        .context("Failed to reach the ledger. Check ledger.nodes")?;
    info!("Ledger reachable, last irreversible block {}", head);

    let mut queue: Option<Arc<dyn TaskQueue>> = None;
    let mut source: Option<Arc<dyn TaskSource>> = None;
    if let Some(redpanda) = settings.redpanda.as_ref().filter(|r| r.enabled) {
        if settings.refresh.delivery == DeliveryMode::Queue {
            let publisher = RedpandaPublisher::new(redpanda)
                .context("Queued delivery is configured but the Redpanda producer is unavailable")?;
            queue = Some(Arc::new(publisher));
        }
        if args.worker == WorkerName::ProcessRefreshTasks {
            source = Some(Arc::new(RedpandaConsumer::new(redpanda)?));
        }
    }

    let mut ctx = WorkerContext::new(settings.clone(), ledger, db, queue);
    if let Some(source) = source {
        ctx = ctx.with_task_source(source);
    }

    run_worker(args.worker, ctx).await
}

async fn run_worker(worker: WorkerName, ctx: WorkerContext) -> anyhow::Result<()> {
    let cancellation_token = CancellationToken::new();

    let worker_token = cancellation_token.child_token();
    let worker_handle = tokio::spawn(async move { worker.supervise(ctx, worker_token).await });

    info!("[{}] Worker started. Press Ctrl+C to stop.", worker);

    #[cfg(unix)]
    let mut sigterm_stream = {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?
    };

    #[cfg(unix)]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
            _ = sigterm_stream.recv() => {
                info!("Received SIGTERM, exiting gracefully...");
            },
        };
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
        };
    }

    cancellation_token.cancel();

    info!("Waiting for {} to stop...", worker);
    let report = worker_handle.await.context("Worker task panicked")?;
    info!(
        "[{}] Stopped after {} runs, {} failures",
        worker, report.runs, report.failures
    );
    Ok(())
}
