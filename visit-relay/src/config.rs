use envconfig::Envconfig;
use visit_common::config::{ConsumerConfig, KafkaConfig};

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3311")]
    pub port: u16,

    // Updates queued per subscriber before new ones are dropped
    #[envconfig(default = "64")]
    pub subscriber_buffer: usize,

    #[envconfig(default = "visit-relay")]
    pub kafka_consumer_group: String,

    #[envconfig(default = "device_updates")]
    pub kafka_consumer_topic: String,

    // Live updates only matter to connected subscribers, so skip the backlog
    #[envconfig(default = "latest")]
    pub kafka_consumer_offset_reset: String,

    #[envconfig(default = "5000")]
    pub kafka_consumer_auto_commit_interval_ms: u32,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,
}

impl Config {
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn consumer(&self) -> ConsumerConfig {
        ConsumerConfig {
            kafka_consumer_group: self.kafka_consumer_group.clone(),
            kafka_consumer_topic: self.kafka_consumer_topic.clone(),
            kafka_consumer_offset_reset: self.kafka_consumer_offset_reset.clone(),
            kafka_consumer_auto_commit_interval_ms: self.kafka_consumer_auto_commit_interval_ms,
        }
    }
}
