//! Bounded store of the objects currently in front of a camera.
//!
//! Entries are keyed by the detector's tracking id and remember when the
//! object was first seen and whether an outcome was already emitted for it.
//! There is no expiry: the only way an entry leaves is being the oldest one
//! when a new object pushes the cache over capacity.
use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

/// Identifier assigned by the upstream detector to one continuously observed
/// object. Detectors emit it either as a string or as an integer; both forms
/// normalise to the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TrackingId(String);

impl TrackingId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackingId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrackingId {
    fn from(id: &str) -> Self {
        TrackingId(id.to_owned())
    }
}

impl From<u64> for TrackingId {
    fn from(id: u64) -> Self {
        TrackingId(id.to_string())
    }
}

impl<'de> Deserialize<'de> for TrackingId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Unsigned(u64),
            Signed(i64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(id) => TrackingId(id),
            Raw::Unsigned(id) => TrackingId(id.to_string()),
            Raw::Signed(id) => TrackingId(id.to_string()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedObject {
    /// First time the object was observed. Never updated.
    pub arrival_time: DateTime<Utc>,
    /// Whether an outcome has been emitted for this object.
    pub reported: bool,
    // Insertion order, breaks arrival time ties on eviction.
    sequence: u64,
}

pub struct TrackingCache {
    capacity: NonZeroUsize,
    next_sequence: u64,
    entries: HashMap<TrackingId, TrackedObject>,
}

impl TrackingCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity,
            next_sequence: 0,
            entries: HashMap::with_capacity(capacity.get() + 1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &TrackingId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &TrackingId) -> Option<&TrackedObject> {
        self.entries.get(id)
    }

    /// Start tracking `id` as first seen at `now`.
    ///
    /// Returns false, leaving the existing entry untouched, if `id` is
    /// already tracked. Inserting past capacity evicts the entry with the
    /// earliest arrival time.
    pub fn start_tracking(&mut self, id: TrackingId, now: DateTime<Utc>) -> bool {
        if self.entries.contains_key(&id) {
            return false;
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.entries.insert(
            id,
            TrackedObject {
                arrival_time: now,
                reported: false,
                sequence,
            },
        );

        if self.entries.len() > self.capacity.get() {
            if let Some(evicted) = self.evict_oldest() {
                debug!(tracking_id = %evicted, "evicted oldest tracked object");
            }
        }

        true
    }

    /// Flag `id` as reported. Unknown ids are ignored.
    pub fn mark_reported(&mut self, id: &TrackingId) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.reported = true;
        }
    }

    fn evict_oldest(&mut self) -> Option<TrackingId> {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| (entry.arrival_time, entry.sequence))
            .map(|(id, _)| id.clone())?;

        self.entries.remove(&oldest);
        Some(oldest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn cache(capacity: usize) -> TrackingCache {
        TrackingCache::new(NonZeroUsize::new(capacity).unwrap())
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 4, 9, 30, 0).unwrap()
    }

    #[test]
    fn start_tracking_keeps_first_arrival() {
        let mut cache = cache(10);
        let id = TrackingId::from("7");

        assert!(cache.start_tracking(id.clone(), t0()));
        assert!(!cache.start_tracking(id.clone(), t0() + Duration::seconds(5)));

        let entry = cache.get(&id).unwrap();
        assert_eq!(entry.arrival_time, t0());
        assert!(!entry.reported);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn size_never_exceeds_capacity() {
        let mut cache = cache(3);
        for i in 0..20u64 {
            cache.start_tracking(TrackingId::from(i), t0() + Duration::milliseconds(i as i64));
            assert!(cache.len() <= 3);
        }
        assert_eq!(cache.len(), 3);
        for i in 17..20u64 {
            assert!(cache.contains(&TrackingId::from(i)));
        }
    }

    #[test]
    fn evicts_earliest_arrival_not_earliest_insert() {
        let mut cache = cache(2);
        // Inserted first but arrived later.
        cache.start_tracking(TrackingId::from("late"), t0() + Duration::seconds(10));
        cache.start_tracking(TrackingId::from("early"), t0());
        cache.start_tracking(TrackingId::from("newest"), t0() + Duration::seconds(20));

        assert!(!cache.contains(&TrackingId::from("early")));
        assert!(cache.contains(&TrackingId::from("late")));
        assert!(cache.contains(&TrackingId::from("newest")));
    }

    #[test]
    fn arrival_ties_evict_first_inserted() {
        let mut cache = cache(2);
        for id in ["A", "B", "C"] {
            cache.start_tracking(TrackingId::from(id), t0());
        }

        assert!(!cache.contains(&TrackingId::from("A")));
        assert!(cache.contains(&TrackingId::from("B")));
        assert!(cache.contains(&TrackingId::from("C")));

        // An evicted id comes back as a brand new object.
        let later = t0() + Duration::seconds(3);
        assert!(cache.start_tracking(TrackingId::from("A"), later));
        assert_eq!(cache.get(&TrackingId::from("A")).unwrap().arrival_time, later);
        assert!(!cache.contains(&TrackingId::from("B")));
    }

    #[test]
    fn mark_reported_ignores_unknown_ids() {
        let mut cache = cache(1);
        let id = TrackingId::from(42);
        cache.mark_reported(&id);
        assert!(cache.is_empty());

        cache.start_tracking(id.clone(), t0());
        cache.mark_reported(&id);
        assert!(cache.get(&id).unwrap().reported);
    }

    #[test]
    fn tracking_ids_accept_strings_and_numbers() {
        let from_number: TrackingId = serde_json::from_str("42").unwrap();
        let from_text: TrackingId = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(from_number, from_text);
        assert!(serde_json::from_str::<TrackingId>("{}").is_err());
    }
}
