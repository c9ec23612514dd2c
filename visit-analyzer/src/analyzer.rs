use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use visit_common::detection::{DetectionEvent, DetectionMessage};
use visit_common::kafka_consumer::{Checkpoint, RecvErr, SingleTopicConsumer};
use visit_common::outcome::{UnwelcomeAlert, VisitOutcome};
use visit_common::time::TimeSource;

use crate::engine::{Decision, VisitDecisionEngine};
use crate::gateway::NotificationGateway;

/// The detection consumer: decodes each message, runs it through the
/// decision engine and routes the outcome, one message at a time.
pub struct Analyzer<T> {
    engine: VisitDecisionEngine<T>,
    gateway: Arc<dyn NotificationGateway>,
}

impl<T: TimeSource> Analyzer<T> {
    pub fn new(engine: VisitDecisionEngine<T>, gateway: Arc<dyn NotificationGateway>) -> Self {
        Self { engine, gateway }
    }

    pub fn engine(&self) -> &VisitDecisionEngine<T> {
        &self.engine
    }

    /// Consume detections until `shutdown` resolves.
    pub async fn run<F>(&self, consumer: SingleTopicConsumer, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(
            threshold_ms = self.engine.threshold().as_millis() as u64,
            capacity = self.engine.capacity(),
            "starting detection consumer"
        );
        tokio::pin!(shutdown);

        loop {
            let received = tokio::select! {
                _ = &mut shutdown => break,
                received = consumer.recv() => received,
            };

            match received {
                Ok((payload, offset)) => {
                    self.handle(&payload, offset).await;
                }
                Err(RecvErr::Kafka(e)) => {
                    error!("failed to receive detection message: {}", e);
                    metrics::counter!("visit_detections_receive_errors_total").increment(1);
                }
                Err(e) => {
                    warn!("dropping unreadable detection message: {}", e);
                    metrics::counter!("visit_detections_dropped_total", "reason" => "unreadable")
                        .increment(1);
                }
            }
        }

        info!("detection consumer stopped");
    }

    /// Decode and process one upstream message, then checkpoint it.
    ///
    /// The checkpoint is committed exactly once, after the visit (if any) was
    /// published, whether the message was usable or not.
    pub async fn handle<C: Checkpoint>(
        &self,
        payload: &[u8],
        checkpoint: C,
    ) -> Option<JoinHandle<()>> {
        let alert = match serde_json::from_slice::<DetectionMessage>(payload) {
            Ok(message) => self.process(message).await,
            Err(e) => {
                warn!("dropping unreadable detection message: {}", e);
                metrics::counter!("visit_detections_dropped_total", "reason" => "unreadable")
                    .increment(1);
                None
            }
        };

        if let Err(e) = checkpoint.commit() {
            error!("failed to store detection offset: {}", e);
        }

        alert
    }

    /// Handle one detection. Returns the handle of the spawned alert task,
    /// if the detection triggered one.
    pub async fn process(&self, message: DetectionMessage) -> Option<JoinHandle<()>> {
        metrics::counter!("visit_detections_total").increment(1);

        let event = match DetectionEvent::try_from(message) {
            Ok(event) => event,
            Err(e) => {
                warn!("dropping detection: {}", e);
                metrics::counter!("visit_detections_dropped_total", "reason" => "invalid")
                    .increment(1);
                return None;
            }
        };

        let tracking_id = event.tracking_id.clone();
        let outcome = match self.engine.decide(event) {
            Decision::Emit(outcome) => outcome,
            Decision::Started => {
                debug!(tracking_id = %tracking_id, "started tracking object");
                return None;
            }
            Decision::Waiting { dwell } => {
                debug!(tracking_id = %tracking_id, dwell_ms = dwell.as_millis() as u64, "object not confirmed yet");
                return None;
            }
            Decision::AlreadyReported => return None,
        };

        info!(
            tracking_id = %tracking_id,
            device_id = outcome.device_id(),
            kind = outcome.kind(),
            "object confirmed"
        );
        metrics::counter!("visit_outcomes_total", "kind" => outcome.kind()).increment(1);

        match outcome {
            VisitOutcome::ReportVisit(visit) => {
                if let Err(e) = self.gateway.report_visit(&visit).await {
                    error!(device_id = %visit.device_id, "failed to report bird visit: {}", e);
                    metrics::counter!("visit_report_failures_total").increment(1);
                }
                None
            }
            VisitOutcome::AlertUnwelcome(alert) => Some(self.spawn_alert(alert)),
        }
    }

    // Device calls can take tens of seconds, they must not hold up the next detection.
    fn spawn_alert(&self, alert: UnwelcomeAlert) -> JoinHandle<()> {
        let gateway = self.gateway.clone();

        tokio::spawn(async move {
            match gateway.alert_unwelcome(&alert).await {
                Ok(answer) => info!(
                    device_id = %alert.device_id,
                    unwelcome = answer.result,
                    "device answered: {}",
                    answer.data
                ),
                Err(e) => {
                    error!(device_id = %alert.device_id, "failed to alert device: {}", e);
                    metrics::counter!("visit_alert_failures_total").increment(1);
                }
            }
        })
    }
}
