use std::num::NonZeroUsize;
use std::time;

use envconfig::Envconfig;
use url::Url;
use visit_common::config::{ConsumerConfig, EnvMsDuration, KafkaConfig};

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3310")]
    pub port: u16,

    #[envconfig(default = "10")]
    pub tracking_capacity: NonZeroUsize,

    // How long an object must be seen before an outcome is emitted for it
    #[envconfig(default = "1000")]
    pub dwell_threshold: EnvMsDuration,

    #[envconfig(default = "bird_visits")]
    pub visits_topic: String,

    #[envconfig(default = "http://localhost:8080")]
    pub device_methods_url: Url,

    #[envconfig(default = "20")]
    pub method_connect_timeout_secs: u64,

    #[envconfig(default = "30")]
    pub method_response_timeout_secs: u64,

    // Log outcomes instead of publishing them, for local runs without a hub
    #[envconfig(default = "false")]
    pub print_sink: bool,

    #[envconfig(default = "visit-analyzer")]
    pub kafka_consumer_group: String,

    #[envconfig(default = "detection_messages")]
    pub kafka_consumer_topic: String,

    #[envconfig(default = "latest")]
    pub kafka_consumer_offset_reset: String,

    #[envconfig(default = "5000")]
    pub kafka_consumer_auto_commit_interval_ms: u32,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
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

    pub fn method_timeouts(&self) -> MethodTimeouts {
        MethodTimeouts {
            connect: time::Duration::from_secs(self.method_connect_timeout_secs),
            response: time::Duration::from_secs(self.method_response_timeout_secs),
        }
    }
}

/// Budgets for a direct method call on a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodTimeouts {
    /// How long the hub waits for the device to be connected.
    pub connect: time::Duration,
    /// How long the hub waits for the device to answer once connected.
    pub response: time::Duration,
}

impl Default for MethodTimeouts {
    fn default() -> Self {
        Self {
            connect: time::Duration::from_secs(20),
            response: time::Duration::from_secs(30),
        }
    }
}
