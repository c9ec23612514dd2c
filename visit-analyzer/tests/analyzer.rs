use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};

use visit_analyzer::analyzer::Analyzer;
use visit_analyzer::engine::VisitDecisionEngine;
use visit_analyzer::error::GatewayError;
use visit_analyzer::gateway::{MethodResult, NotificationGateway};
use visit_common::detection::DetectionMessage;
use visit_common::kafka_consumer::{Checkpoint, OffsetErr};
use visit_common::outcome::{BirdVisit, UnwelcomeAlert};
use visit_common::time::ManualTime;

/// Records every outcome it is handed. Alerts can be held back until the
/// test releases them.
struct RecordingGateway {
    visits: mpsc::UnboundedSender<BirdVisit>,
    alerts: mpsc::UnboundedSender<UnwelcomeAlert>,
    release_alerts: Arc<Notify>,
    hold_alerts: bool,
}

#[async_trait]
impl NotificationGateway for RecordingGateway {
    async fn report_visit(&self, visit: &BirdVisit) -> Result<(), GatewayError> {
        self.visits.send(visit.clone()).unwrap();
        Ok(())
    }

    async fn alert_unwelcome(&self, alert: &UnwelcomeAlert) -> Result<MethodResult, GatewayError> {
        if self.hold_alerts {
            self.release_alerts.notified().await;
        }
        self.alerts.send(alert.clone()).unwrap();
        Ok(MethodResult {
            result: true,
            data: "Visitor unwelcome - sounding alarm".to_owned(),
        })
    }
}

/// Counts how many times it was committed.
#[derive(Clone, Default)]
struct CountingCheckpoint(Arc<AtomicU32>);

impl CountingCheckpoint {
    fn commits(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}

impl Checkpoint for CountingCheckpoint {
    fn commit(self) -> Result<(), OffsetErr> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Harness {
    analyzer: Analyzer<ManualTime>,
    clock: ManualTime,
    visits: mpsc::UnboundedReceiver<BirdVisit>,
    alerts: mpsc::UnboundedReceiver<UnwelcomeAlert>,
    release_alerts: Arc<Notify>,
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 4, 9, 30, 0).unwrap()
}

fn harness(capacity: usize, hold_alerts: bool) -> Harness {
    let clock = ManualTime::new(t0());
    let (visits_tx, visits) = mpsc::unbounded_channel();
    let (alerts_tx, alerts) = mpsc::unbounded_channel();
    let release_alerts = Arc::new(Notify::new());

    let gateway = RecordingGateway {
        visits: visits_tx,
        alerts: alerts_tx,
        release_alerts: release_alerts.clone(),
        hold_alerts,
    };
    let engine = VisitDecisionEngine::new(
        NonZeroUsize::new(capacity).unwrap(),
        Duration::from_secs(1),
        clock.clone(),
    );

    Harness {
        analyzer: Analyzer::new(engine, Arc::new(gateway)),
        clock,
        visits,
        alerts,
        release_alerts,
    }
}

fn detection(object: Value) -> DetectionMessage {
    serde_json::from_value(json!({
        "sensor": {"id": "feeder-1", "location": {"lat": 47.6, "lon": -122.3}},
        "object": object
    }))
    .unwrap()
}

fn bird(id: u64) -> DetectionMessage {
    detection(json!({"id": id, "bird": {"species": "House Finch"}}))
}

fn dog(id: u64) -> DetectionMessage {
    detection(json!({"id": id, "dog": {}}))
}

#[tokio::test]
async fn bird_seen_long_enough_is_reported_once() {
    let mut h = harness(10, false);

    assert!(h.analyzer.process(bird(42)).await.is_none());
    h.clock.advance(chrono::Duration::milliseconds(1200));
    assert!(h.analyzer.process(bird(42)).await.is_none());
    h.clock.advance(chrono::Duration::milliseconds(500));
    assert!(h.analyzer.process(bird(42)).await.is_none());

    let visit = h.visits.try_recv().unwrap();
    assert_eq!(
        visit,
        BirdVisit {
            visiting_bird: "House Finch".to_owned(),
            device_id: "feeder-1".to_owned(),
            visited_at: t0(),
            latitude: 47.6,
            longitude: -122.3,
        }
    );
    assert!(h.visits.try_recv().is_err());
    assert!(h.alerts.try_recv().is_err());
}

#[tokio::test]
async fn short_glimpse_is_ignored() {
    let mut h = harness(10, false);

    h.analyzer.process(bird(1)).await;
    for _ in 0..5 {
        h.clock.advance(chrono::Duration::milliseconds(150));
        h.analyzer.process(bird(1)).await;
    }

    assert!(h.visits.try_recv().is_err());
}

#[tokio::test]
async fn non_bird_alerts_device_once() {
    let mut h = harness(10, false);

    h.analyzer.process(dog(5)).await;
    h.clock.advance(chrono::Duration::seconds(1));
    let task = h.analyzer.process(dog(5)).await.expect("alert task spawned");
    task.await.unwrap();

    h.clock.advance(chrono::Duration::seconds(1));
    assert!(h.analyzer.process(dog(5)).await.is_none());

    let alert = h.alerts.try_recv().unwrap();
    assert_eq!(alert.device_id, "feeder-1");
    assert_eq!(alert.payload, json!({"id": 5, "dog": {}}));
    assert!(h.alerts.try_recv().is_err());
    assert!(h.visits.try_recv().is_err());
}

#[tokio::test]
async fn pending_alert_does_not_block_ingestion() {
    let mut h = harness(10, true);

    h.analyzer.process(dog(5)).await;
    h.analyzer.process(bird(6)).await;
    h.clock.advance(chrono::Duration::seconds(2));

    // The device has not answered, yet the next detection goes through.
    let alert_task = h.analyzer.process(dog(5)).await.expect("alert task spawned");
    tokio::time::timeout(Duration::from_secs(1), h.analyzer.process(bird(6)))
        .await
        .expect("ingestion stalled behind a device call");
    assert_eq!(h.visits.try_recv().unwrap().visiting_bird, "House Finch");
    assert!(h.alerts.try_recv().is_err());

    h.release_alerts.notify_one();
    alert_task.await.unwrap();
    assert_eq!(h.alerts.try_recv().unwrap().device_id, "feeder-1");
}

#[tokio::test]
async fn invalid_detections_are_dropped() {
    let mut h = harness(10, false);

    let no_object: DetectionMessage = serde_json::from_value(json!({
        "sensor": {"id": "feeder-1", "location": {"lat": 1.0, "lon": 2.0}}
    }))
    .unwrap();
    let no_id = detection(json!({"bird": {"species": "Robin"}}));

    for message in [no_object, no_id] {
        assert!(h.analyzer.process(message).await.is_none());
    }
    assert_eq!(h.analyzer.engine().tracked(), 0);
    assert!(h.visits.try_recv().is_err());
}

#[tokio::test]
async fn evicted_object_is_tracked_again_from_scratch() {
    let mut h = harness(2, false);

    for id in [1, 2, 3] {
        h.analyzer.process(bird(id)).await;
    }
    assert_eq!(h.analyzer.engine().tracked(), 2);

    // Object 1 was evicted, this sighting restarts its clock.
    h.clock.advance(chrono::Duration::seconds(5));
    h.analyzer.process(bird(1)).await;
    assert!(h.visits.try_recv().is_err());

    h.clock.advance(chrono::Duration::seconds(1));
    h.analyzer.process(bird(1)).await;
    let visit = h.visits.try_recv().unwrap();
    assert_eq!(visit.visited_at, t0() + chrono::Duration::seconds(5));
}

#[tokio::test]
async fn every_message_is_checkpointed_once() {
    let mut h = harness(10, false);
    let encode = |message: Value| serde_json::to_vec(&message).unwrap();
    let bird_payload = encode(json!({
        "sensor": {"id": "feeder-1", "location": {"lat": 47.6, "lon": -122.3}},
        "object": {"id": 42, "bird": {"species": "House Finch"}}
    }));
    let dog_payload = encode(json!({
        "sensor": {"id": "feeder-1", "location": {"lat": 47.6, "lon": -122.3}},
        "object": {"id": 5, "dog": {}}
    }));
    let no_id_payload = encode(json!({
        "sensor": {"id": "feeder-1", "location": {"lat": 47.6, "lon": -122.3}},
        "object": {"bird": {"species": "Robin"}}
    }));

    // First sightings only start tracking.
    for payload in [&bird_payload, &dog_payload] {
        let checkpoint = CountingCheckpoint::default();
        assert!(h.analyzer.handle(payload, checkpoint.clone()).await.is_none());
        assert_eq!(checkpoint.commits(), 1);
    }

    // Dropped messages are checkpointed all the same.
    let dropped: [&[u8]; 3] = [&no_id_payload, b"not json", br#"{"sensor": 3}"#];
    for payload in dropped {
        let checkpoint = CountingCheckpoint::default();
        assert!(h.analyzer.handle(payload, checkpoint.clone()).await.is_none());
        assert_eq!(checkpoint.commits(), 1);
    }

    h.clock.advance(chrono::Duration::milliseconds(1200));

    let checkpoint = CountingCheckpoint::default();
    assert!(h.analyzer.handle(&bird_payload, checkpoint.clone()).await.is_none());
    assert_eq!(checkpoint.commits(), 1);
    assert_eq!(h.visits.try_recv().unwrap().visited_at, t0());

    let checkpoint = CountingCheckpoint::default();
    let alert = h
        .analyzer
        .handle(&dog_payload, checkpoint.clone())
        .await
        .expect("alert task spawned");
    assert_eq!(checkpoint.commits(), 1);
    alert.await.unwrap();
    assert_eq!(h.alerts.try_recv().unwrap().device_id, "feeder-1");
}
