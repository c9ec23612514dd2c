use std::time::Duration;

use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use reqwest::header;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use url::Url;
use visit_common::kafka_producer::KafkaContext;
use visit_common::outcome::{BirdVisit, UnwelcomeAlert};

use crate::config::MethodTimeouts;
use crate::error::GatewayError;

/// Name of the direct method a device exposes to vet a non-bird visitor.
pub const CHECK_VISITOR_METHOD: &str = "checkIfVisitorUnwelcome";

/// Downstream consumers of the decisions taken by the analyzer.
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    /// Hand a confirmed visit over for persistence and broadcast.
    async fn report_visit(&self, visit: &BirdVisit) -> Result<(), GatewayError>;

    /// Ask the originating device whether the visitor is unwelcome.
    async fn alert_unwelcome(&self, alert: &UnwelcomeAlert) -> Result<MethodResult, GatewayError>;
}

/// Logs outcomes instead of delivering them.
pub struct PrintGateway {}

#[async_trait]
impl NotificationGateway for PrintGateway {
    async fn report_visit(&self, visit: &BirdVisit) -> Result<(), GatewayError> {
        info!("bird visit: {}", serde_json::to_string(visit)?);
        Ok(())
    }

    async fn alert_unwelcome(&self, alert: &UnwelcomeAlert) -> Result<MethodResult, GatewayError> {
        info!(device_id = %alert.device_id, "unwelcome visitor: {}", alert.payload);
        Ok(MethodResult {
            result: true,
            data: "printed".to_owned(),
        })
    }
}

/// Publishes visits to a Kafka topic and calls device methods over HTTP.
pub struct HubGateway {
    producer: FutureProducer<KafkaContext>,
    visits_topic: String,
    devices: DeviceMethodClient,
}

impl HubGateway {
    pub fn new(
        producer: FutureProducer<KafkaContext>,
        visits_topic: String,
        devices: DeviceMethodClient,
    ) -> Self {
        Self {
            producer,
            visits_topic,
            devices,
        }
    }
}

#[async_trait]
impl NotificationGateway for HubGateway {
    async fn report_visit(&self, visit: &BirdVisit) -> Result<(), GatewayError> {
        let payload = serde_json::to_string(visit)?;
        let record = FutureRecord::to(&self.visits_topic)
            .key(&visit.device_id)
            .payload(&payload);

        // Waits for the delivery report, bounded by the producer's message timeout.
        self.producer
            .send(record, Timeout::After(Duration::ZERO))
            .await
            .map_err(|(error, _)| GatewayError::PublishError(error))?;

        Ok(())
    }

    async fn alert_unwelcome(&self, alert: &UnwelcomeAlert) -> Result<MethodResult, GatewayError> {
        self.devices
            .invoke(&alert.device_id, CHECK_VISITOR_METHOD, &alert.payload)
            .await
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceMethodRequest<'a> {
    pub method_name: &'a str,
    pub response_timeout_in_seconds: u64,
    pub connect_timeout_in_seconds: u64,
    pub payload: &'a Value,
}

#[derive(Debug, Deserialize)]
pub struct DeviceMethodResponse {
    pub status: u16,
    pub payload: MethodResult,
}

/// What the device answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodResult {
    pub result: bool,
    pub data: String,
}

/// Invokes direct methods on devices through the hub's REST endpoint:
/// `POST {base}/twins/{device_id}/methods`.
#[derive(Clone)]
pub struct DeviceMethodClient {
    client: reqwest::Client,
    base_url: Url,
    timeouts: MethodTimeouts,
}

impl DeviceMethodClient {
    pub fn new(base_url: Url, timeouts: MethodTimeouts) -> Result<Self, GatewayError> {
        if base_url.cannot_be_a_base() {
            return Err(GatewayError::InvalidBaseUrl(base_url));
        }

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        // The hub holds the request open for up to connect + response.
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent("Feeder Visit Analyzer")
            .connect_timeout(timeouts.connect)
            .timeout(timeouts.connect + timeouts.response)
            .build()?;

        Ok(Self {
            client,
            base_url,
            timeouts,
        })
    }

    fn method_url(&self, device_id: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["twins", device_id, "methods"]);
        }
        url
    }

    pub async fn invoke(
        &self,
        device_id: &str,
        method: &str,
        payload: &Value,
    ) -> Result<MethodResult, GatewayError> {
        let request = DeviceMethodRequest {
            method_name: method,
            response_timeout_in_seconds: self.timeouts.response.as_secs(),
            connect_timeout_in_seconds: self.timeouts.connect.as_secs(),
            payload,
        };

        let response = self
            .client
            .post(self.method_url(device_id))
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json::<DeviceMethodResponse>()
            .await?;

        if response.status != 200 {
            return Err(GatewayError::MethodRejected {
                device_id: device_id.to_owned(),
                method: method.to_owned(),
                status: response.status,
                data: response.payload.data,
            });
        }

        Ok(response.payload)
    }
}
