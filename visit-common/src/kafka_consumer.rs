use std::fmt;
use std::sync::{Arc, Weak};

use health::HealthHandle;
use metrics::gauge;
use rdkafka::consumer::{Consumer, ConsumerContext, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::{ClientConfig, Message};
use tracing::{debug, error, info};

use crate::config::{ConsumerConfig, KafkaConfig};

pub struct KafkaContext {
    liveness: HealthHandle,
}

impl rdkafka::ClientContext for KafkaContext {
    fn stats(&self, stats: rdkafka::Statistics) {
        // The librdkafka main loop is alive as long as it keeps calling us
        self.liveness.report_healthy();

        gauge!("kafka_consumer_callback_queue_depth").set(stats.replyq as f64);
        for (topic, topic_stats) in stats.topics {
            for (partition, partition_stats) in topic_stats.partitions {
                if partition < 0 {
                    continue;
                }
                gauge!(
                    "kafka_consumer_lag",
                    "topic" => topic.clone(),
                    "partition" => partition.to_string()
                )
                .set(partition_stats.consumer_lag as f64);
            }
        }
    }
}

impl ConsumerContext for KafkaContext {}

/// Consumes a single topic, handing out an `Offset` with each message.
///
/// Offsets are never stored automatically: a message counts as consumed once
/// its `Offset` is committed, and the stored offsets are then committed to
/// the group in the background.
#[derive(Clone)]
pub struct SingleTopicConsumer {
    inner: Arc<Inner>,
}

struct Inner {
    consumer: StreamConsumer<KafkaContext>,
    topic: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RecvErr {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("Received empty payload")]
    Empty,
}

#[derive(Debug, thiserror::Error)]
pub enum OffsetErr {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("Consumer gone")]
    Gone,
}

impl SingleTopicConsumer {
    pub fn new(
        common_config: &KafkaConfig,
        consumer_config: ConsumerConfig,
        liveness: HealthHandle,
    ) -> Result<Self, KafkaError> {
        info!(
            topic = %consumer_config.kafka_consumer_topic,
            group = %consumer_config.kafka_consumer_group,
            "connecting to Kafka brokers at {}...",
            common_config.kafka_hosts
        );

        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &common_config.kafka_hosts)
            .set("statistics.interval.ms", "10000")
            .set("group.id", &consumer_config.kafka_consumer_group)
            .set(
                "auto.offset.reset",
                &consumer_config.kafka_consumer_offset_reset,
            )
            .set("enable.auto.offset.store", "false")
            .set("enable.auto.commit", "true")
            .set(
                "auto.commit.interval.ms",
                consumer_config
                    .kafka_consumer_auto_commit_interval_ms
                    .to_string(),
            );

        if common_config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        debug!("rdkafka configuration: {:?}", client_config);
        let consumer: StreamConsumer<KafkaContext> =
            client_config.create_with_context(KafkaContext { liveness })?;
        consumer.subscribe(&[consumer_config.kafka_consumer_topic.as_str()])?;

        Ok(Self {
            inner: Arc::new(Inner {
                consumer,
                topic: consumer_config.kafka_consumer_topic,
            }),
        })
    }

    /// Wait for the next message and return its raw payload.
    ///
    /// Empty messages are checkpointed here and surface as `RecvErr::Empty`.
    pub async fn recv(&self) -> Result<(Vec<u8>, Offset), RecvErr> {
        let message = self.inner.consumer.recv().await?;

        let offset = Offset {
            handle: Arc::downgrade(&self.inner),
            partition: message.partition(),
            offset: message.offset(),
            topic: self.inner.topic.clone(),
        };

        match message.payload() {
            Some(payload) => Ok((payload.to_vec(), offset)),
            None => {
                store_poison_pill(offset);
                Err(RecvErr::Empty)
            }
        }
    }
}

fn store_poison_pill(offset: Offset) {
    let position = format!("{:?}", offset);
    if let Err(e) = offset.store() {
        error!("failed to store offset {} of empty message: {}", position, e);
    }
}

/// Marks an upstream message as consumed.
pub trait Checkpoint {
    fn commit(self) -> Result<(), OffsetErr>;
}

pub struct Offset {
    handle: Weak<Inner>,
    pub(crate) topic: String,
    pub(crate) partition: i32,
    pub(crate) offset: i64,
}

impl Offset {
    pub fn store(self) -> Result<(), OffsetErr> {
        let inner = self.handle.upgrade().ok_or(OffsetErr::Gone)?;
        inner
            .consumer
            .store_offset(&self.topic, self.partition, self.offset)?;
        Ok(())
    }
}

impl Checkpoint for Offset {
    fn commit(self) -> Result<(), OffsetErr> {
        self.store()
    }
}

impl fmt::Debug for Offset {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{{ topic: {}, partition: {}, offset: {} }}",
            self.topic, self.partition, self.offset
        )
    }
}
