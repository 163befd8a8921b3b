//! Event log client: partitioned consumer over the `score-submitted` topic.
//!
//! Wraps an rdkafka [`StreamConsumer`] with manual offset management: a
//! batch's offsets are committed only after the handler returns
//! successfully, so a failed batch is redelivered (at-least-once).
//!
//! # Batch assembly
//!
//! The underlying client exposes a merged message stream rather than
//! broker fetches, so batches are assembled here: the loop waits up to
//! [`POLL_INTERVAL`] for a first message, then keeps draining until the
//! linger window closes or the batch is full. An idle poll window yields
//! an *empty* batch to the handler, exactly like an empty fetch, which
//! is what advances the replay empty-batch counter at the tail of the log.
//! Intra-partition order is preserved by the merged stream; messages for
//! the same key always share a partition and therefore arrive in order.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::{Offset, TopicPartitionList};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// How long one poll waits for a first message before yielding an empty
/// batch.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Retries for transient broker errors before the error is fatal.
const MAX_RECV_RETRIES: u32 = 8;

/// Initial backoff between transient-error retries.
const RECV_BACKOFF: Duration = Duration::from_millis(100);

/// Consumer configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub brokers: String,
    pub client_id: String,
    pub group_id: String,
    pub topic: String,
    pub max_batch_size: usize,
    pub batch_linger: Duration,
}

/// One consumed message, decoupled from the client's borrowed types.
#[derive(Debug, Clone)]
pub struct ConsumedMessage {
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
}

/// A batch of consumed messages, possibly empty.
#[derive(Debug, Clone, Default)]
pub struct ConsumedBatch {
    pub messages: Vec<ConsumedMessage>,
}

impl ConsumedBatch {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Receives consumed batches. The batch's offsets are committed iff
/// `handle_batch` returns `Ok`.
#[async_trait]
pub trait BatchHandler: Send + Sync {
    async fn handle_batch(&self, batch: ConsumedBatch) -> Result<()>;
}

/// Consumer-group client over the input topic.
pub struct LogClient {
    config: LogConfig,
    consumer: Option<StreamConsumer>,
}

impl LogClient {
    pub fn new(config: LogConfig) -> Self {
        Self {
            config,
            consumer: None,
        }
    }

    /// Delete the consumer group's stored offsets so a subsequent
    /// subscribe starts from the earliest offset on every partition.
    ///
    /// Idempotent: a group that does not exist is a success. Returns
    /// `false` on any other failure; the caller's fallback is still to
    /// subscribe with `from_beginning`, which covers partitions without
    /// committed offsets.
    pub async fn reset_group_to_earliest(&self) -> bool {
        let admin: AdminClient<DefaultClientContext> = match ClientConfig::new()
            .set("bootstrap.servers", &self.config.brokers)
            .set("client.id", &self.config.client_id)
            .create()
        {
            Ok(admin) => admin,
            Err(e) => {
                warn!(error = %e, "could not create admin client for group reset");
                return false;
            }
        };

        let results = match admin
            .delete_groups(&[self.config.group_id.as_str()], &AdminOptions::new())
            .await
        {
            Ok(results) => results,
            Err(e) => {
                warn!(error = %e, group = %self.config.group_id, "group offset reset failed");
                return false;
            }
        };

        for result in results {
            match result {
                Ok(group) => info!(group = %group, "consumer group offsets deleted"),
                Err((group, RDKafkaErrorCode::GroupIdNotFound)) => {
                    debug!(group = %group, "consumer group does not exist, nothing to reset");
                }
                Err((group, code)) => {
                    warn!(group = %group, ?code, "group offset reset failed");
                    return false;
                }
            }
        }
        true
    }

    /// Create the consumer and subscribe to the input topic.
    ///
    /// `from_beginning` selects the offset-reset policy for partitions
    /// with no committed offset for this group.
    pub fn subscribe(&mut self, from_beginning: bool) -> Result<()> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.config.brokers)
            .set("client.id", &self.config.client_id)
            .set("group.id", &self.config.group_id)
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "30000")
            .set("heartbeat.interval.ms", "3000")
            .set(
                "auto.offset.reset",
                if from_beginning { "earliest" } else { "latest" },
            )
            .create()?;

        consumer.subscribe(&[self.config.topic.as_str()])?;
        info!(
            topic = %self.config.topic,
            group = %self.config.group_id,
            from_beginning,
            "subscribed to event log"
        );

        self.consumer = Some(consumer);
        Ok(())
    }

    /// Drop the consumer, leaving the group.
    pub fn disconnect(&mut self) {
        self.consumer = None;
    }

    /// Cooperative consume loop: assembles batches and feeds them to the
    /// handler, committing each batch's offsets after the handler returns
    /// successfully. Returns on cancellation or on a fatal error.
    pub async fn consume_batches(
        &self,
        cancel: &CancellationToken,
        handler: &dyn BatchHandler,
    ) -> Result<()> {
        let consumer = self
            .consumer
            .as_ref()
            .ok_or_else(|| Error::Config("consume_batches called before subscribe".to_string()))?;

        loop {
            let batch = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("consume loop cancelled");
                    return Ok(());
                }
                batch = self.next_batch(consumer) => batch?,
            };

            metrics::counter!("consumer_batches_total").increment(1);
            metrics::counter!("consumer_events_total").increment(batch.len() as u64);

            let offsets = batch_offsets(&self.config.topic, &batch)?;
            handler.handle_batch(batch).await?;

            if let Some(tpl) = offsets {
                consumer.commit(&tpl, CommitMode::Async)?;
            }
        }
    }

    /// Assemble the next batch: wait for a first message, then drain until
    /// the linger window closes or the batch is full.
    async fn next_batch(&self, consumer: &StreamConsumer) -> Result<ConsumedBatch> {
        let mut batch = ConsumedBatch::default();

        let first = tokio::time::timeout(POLL_INTERVAL, self.recv_with_retry(consumer)).await;
        match first {
            Err(_) => return Ok(batch), // idle window: empty batch
            Ok(message) => batch.messages.push(message?),
        }

        let deadline = tokio::time::Instant::now() + self.config.batch_linger;
        while batch.len() < self.config.max_batch_size {
            match tokio::time::timeout_at(deadline, consumer.recv()).await {
                Err(_) => break,
                Ok(Ok(message)) => batch.messages.push(convert(&message)),
                // Drain errors are not retried here; the next poll's
                // retrying receive surfaces persistent problems.
                Ok(Err(e)) => {
                    debug!(error = %e, "receive error while draining batch");
                    break;
                }
            }
        }

        Ok(batch)
    }

    /// Receive one message, retrying transient broker errors with
    /// exponential backoff before giving up.
    async fn recv_with_retry(&self, consumer: &StreamConsumer) -> Result<ConsumedMessage> {
        let mut delay = RECV_BACKOFF;

        for attempt in 0..=MAX_RECV_RETRIES {
            match consumer.recv().await {
                Ok(message) => return Ok(convert(&message)),
                Err(e) if attempt < MAX_RECV_RETRIES && is_transient(&e) => {
                    warn!(attempt, error = %e, "transient log error, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => return Err(Error::Log(e)),
            }
        }
        unreachable!("loop returns on success or final error")
    }
}

fn convert(message: &rdkafka::message::BorrowedMessage<'_>) -> ConsumedMessage {
    ConsumedMessage {
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(<[u8]>::to_vec),
        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
    }
}

/// Highest offset per partition in the batch, as a commit list. `None`
/// for an empty batch.
fn batch_offsets(topic: &str, batch: &ConsumedBatch) -> Result<Option<TopicPartitionList>> {
    if batch.is_empty() {
        return Ok(None);
    }

    let mut highest: std::collections::HashMap<i32, i64> = std::collections::HashMap::new();
    for message in &batch.messages {
        let entry = highest.entry(message.partition).or_insert(message.offset);
        *entry = (*entry).max(message.offset);
    }

    let mut tpl = TopicPartitionList::new();
    for (partition, offset) in highest {
        // Committed offset is the next offset to consume.
        tpl.add_partition_offset(topic, partition, Offset::Offset(offset + 1))?;
    }
    Ok(Some(tpl))
}

/// Broker errors worth retrying in place.
fn is_transient(e: &KafkaError) -> bool {
    matches!(
        e.rdkafka_error_code(),
        Some(
            RDKafkaErrorCode::BrokerTransportFailure
                | RDKafkaErrorCode::AllBrokersDown
                | RDKafkaErrorCode::OperationTimedOut
                | RDKafkaErrorCode::RequestTimedOut
                | RDKafkaErrorCode::NotCoordinator
                | RDKafkaErrorCode::CoordinatorLoadInProgress
                | RDKafkaErrorCode::CoordinatorNotAvailable
        )
    )
}
