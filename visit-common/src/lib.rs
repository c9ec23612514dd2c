pub mod config;
pub mod detection;
pub mod kafka_consumer;
pub mod kafka_producer;
pub mod metrics;
pub mod outcome;
pub mod signal;
pub mod time;
pub mod tracking;
