//! Turns a stream of per-frame detections into at most one outcome per
//! tracked object.
//!
//! An object first enters the tracking cache, which starts its dwell clock.
//! Later detections of the same object compare the time since that first
//! sighting against the dwell threshold; the first one to clear it emits an
//! outcome and flags the object as reported so further frames are ignored.
//! Evaluation only happens when a detection arrives: an object that leaves
//! before clearing the threshold produces nothing.
use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use visit_common::detection::{Classification, DetectionEvent};
use visit_common::outcome::{BirdVisit, UnwelcomeAlert, VisitOutcome};
use visit_common::time::TimeSource;
use visit_common::tracking::TrackingCache;

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// First sighting: the dwell clock started.
    Started,
    /// Seen before but not for long enough yet.
    Waiting { dwell: Duration },
    /// An outcome was already emitted for this object.
    AlreadyReported,
    /// The object just cleared the threshold.
    Emit(VisitOutcome),
}

pub struct VisitDecisionEngine<T> {
    cache: Mutex<TrackingCache>,
    threshold: Duration,
    timesource: T,
}

impl<T: TimeSource> VisitDecisionEngine<T> {
    pub fn new(capacity: NonZeroUsize, threshold: Duration, timesource: T) -> Self {
        Self {
            cache: Mutex::new(TrackingCache::new(capacity)),
            threshold,
            timesource,
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub fn capacity(&self) -> usize {
        self.lock_cache().capacity()
    }

    /// Number of objects currently tracked.
    pub fn tracked(&self) -> usize {
        self.lock_cache().len()
    }

    pub fn decide(&self, event: DetectionEvent) -> Decision {
        let now = self.timesource.now();
        let mut cache = self.lock_cache();

        let tracked = cache
            .get(&event.tracking_id)
            .map(|tracked| (tracked.arrival_time, tracked.reported));

        let arrival_time = match tracked {
            None => {
                cache.start_tracking(event.tracking_id, now);
                metrics::gauge!("visit_tracking_cache_size").set(cache.len() as f64);
                return Decision::Started;
            }
            Some((_, true)) => return Decision::AlreadyReported,
            Some((arrival_time, false)) => arrival_time,
        };

        // A clock stepping backwards counts as no time spent.
        let dwell = (now - arrival_time).to_std().unwrap_or_default();
        if dwell < self.threshold {
            return Decision::Waiting { dwell };
        }

        cache.mark_reported(&event.tracking_id);
        drop(cache);

        Decision::Emit(into_outcome(event, arrival_time))
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, TrackingCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn into_outcome(event: DetectionEvent, arrival_time: DateTime<Utc>) -> VisitOutcome {
    match event.classification {
        Classification::Bird { species } => VisitOutcome::ReportVisit(BirdVisit {
            visiting_bird: species,
            device_id: event.device_id,
            visited_at: arrival_time,
            latitude: event.location.lat,
            longitude: event.location.lon,
        }),
        Classification::Other(payload) => VisitOutcome::AlertUnwelcome(UnwelcomeAlert {
            device_id: event.device_id,
            payload,
        }),
    }
}
