//! Task queue delivery for refresh work.
//!
//! Provides Redpanda (Kafka-compatible) integration for handing refresh
//! tasks from the ingesting process to `process_refresh_tasks` workers.

mod redpanda;

pub use redpanda::{RedpandaConsumer, RedpandaPublisher};
