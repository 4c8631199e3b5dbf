pub mod config;
pub mod cron;
pub mod db;
pub mod error;
pub mod ledger;
pub mod pubsub;
pub mod worker;

pub use config::Settings;
pub use cron::CronScheduler;
pub use db::Database;
pub use ledger::{LedgerReader, SteemRpcClient};
pub use pubsub::{RedpandaConsumer, RedpandaPublisher};
pub use worker::{WorkerContext, WorkerName};
