use rdkafka::error::KafkaError;
use thiserror::Error;

/// Enumeration of errors raised while handing an outcome to a downstream consumer.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("failed to serialize outcome: {0}")]
    SerializeError(#[from] serde_json::Error),
    #[error("failed to publish bird visit: {0}")]
    PublishError(KafkaError),
    #[error("device method request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("device {device_id} answered {method} with status {status}: {data}")]
    MethodRejected {
        device_id: String,
        method: String,
        status: u16,
        data: String,
    },
    #[error("{0} cannot be used as a base url for device methods")]
    InvalidBaseUrl(url::Url),
}
