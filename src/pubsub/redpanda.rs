//! Redpanda (Kafka-compatible) task queue.
//!
//! The publisher hands refresh tasks to a topic keyed by entity, so repeated
//! work for one account or post lands on the same partition. The consumer
//! commits offsets only after a task was executed, giving at-least-once
//! delivery.

use std::{sync::Mutex, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use log::{info, warn};
use rdkafka::{
    config::ClientConfig,
    consumer::{CommitMode, Consumer, StreamConsumer},
    producer::{FutureProducer, FutureRecord, Producer},
    Message, Offset, TopicPartitionList,
};

use crate::{
    config::RedpandaSettings,
    worker::{RefreshTask, TaskQueue, TaskSource},
};

/// Publishes refresh tasks for another process to execute.
pub struct RedpandaPublisher {
    producer: FutureProducer,
    topic: String,
}

impl RedpandaPublisher {
    /// Returns None if Redpanda is disabled in settings or the producer can't
    /// be created.
    pub fn new(settings: &RedpandaSettings) -> Option<Self> {
        if !settings.enabled {
            info!("Redpanda publishing is disabled");
            return None;
        }

        info!("Connecting to Redpanda brokers: {}", settings.brokers);

        let producer: FutureProducer = match ClientConfig::new()
            .set("bootstrap.servers", &settings.brokers)
            .set("message.timeout.ms", "5000")
            .set("queue.buffering.max.messages", "100000")
            .set("linger.ms", "5")
            .create()
        {
            Ok(p) => p,
            Err(e) => {
                warn!("Failed to create Redpanda producer: {}", e);
                return None;
            },
        };

        info!("Redpanda publisher initialized for topic {}", settings.topic);

        Some(Self {
            producer,
            topic: settings.topic.clone(),
        })
    }

    /// Flush any pending messages (call on shutdown).
    pub fn flush(&self) {
        self.producer.flush(Duration::from_secs(5)).ok();
    }
}

#[async_trait]
impl TaskQueue for RedpandaPublisher {
    async fn enqueue(&self, task: &RefreshTask) -> anyhow::Result<()> {
        let payload = serde_json::to_string(task).context("Failed to serialize refresh task")?;
        let record = FutureRecord::to(&self.topic).key(task.key()).payload(&payload);

        self.producer
            .send(record, Duration::from_millis(500))
            .await
            .map_err(|(e, _)| anyhow::anyhow!("Failed to send {} to {}: {}", task, self.topic, e))?;
        Ok(())
    }
}

impl Drop for RedpandaPublisher {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Position of the last task handed out and not yet acknowledged.
struct Pending {
    topic: String,
    partition: i32,
    offset: i64,
}

/// Consumes refresh tasks in a consumer group with manual commits.
pub struct RedpandaConsumer {
    consumer: StreamConsumer,
    pending: Mutex<Option<Pending>>,
}

impl RedpandaConsumer {
    pub fn new(settings: &RedpandaSettings) -> anyhow::Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &settings.brokers)
            .set("group.id", &settings.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()
            .context("Failed to create Redpanda consumer")?;

        consumer
            .subscribe(&[settings.topic.as_str()])
            .with_context(|| format!("Failed to subscribe to {}", settings.topic))?;

        info!(
            "Consuming refresh tasks from {} as {}",
            settings.topic, settings.group_id
        );

        Ok(Self {
            consumer,
            pending: Mutex::new(None),
        })
    }

    fn set_pending(&self, pending: Option<Pending>) {
        *self.pending.lock().unwrap_or_else(|e| e.into_inner()) = pending;
    }

    fn commit(&self, pending: &Pending) -> anyhow::Result<()> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&pending.topic, pending.partition, Offset::Offset(pending.offset + 1))
            .context("Failed to build commit offsets")?;
        self.consumer
            .commit(&tpl, CommitMode::Async)
            .context("Failed to commit offsets")?;
        Ok(())
    }
}

#[async_trait]
impl TaskSource for RedpandaConsumer {
    async fn recv(&self) -> anyhow::Result<Option<RefreshTask>> {
        loop {
            let message = self.consumer.recv().await.context("Failed to receive message")?;
            let pending = Pending {
                topic: message.topic().to_string(),
                partition: message.partition(),
                offset: message.offset(),
            };

            let decoded = message
                .payload()
                .map(serde_json::from_slice::<RefreshTask>);
            match decoded {
                Some(Ok(task)) => {
                    self.set_pending(Some(pending));
                    return Ok(Some(task));
                },
                Some(Err(e)) => {
                    warn!(
                        "Skipping undecodable task at {}/{}@{}: {}",
                        pending.topic, pending.partition, pending.offset, e
                    );
                    self.commit(&pending)?;
                },
                None => self.commit(&pending)?,
            }
        }
    }

    async fn ack(&self) -> anyhow::Result<()> {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner()).take();
        match pending {
            Some(pending) => self.commit(&pending),
            None => Ok(()),
        }
    }
}
