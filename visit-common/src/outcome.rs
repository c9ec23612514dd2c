use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// A confirmed bird visit, as published for persistence and broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BirdVisit {
    pub visiting_bird: String,
    pub device_id: String,
    /// When the bird was first seen, not when the visit was confirmed.
    #[serde(serialize_with = "serialize_iso8601")]
    pub visited_at: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
}

/// A non-bird visitor the device should check against its unwelcome list.
#[derive(Debug, Clone, PartialEq)]
pub struct UnwelcomeAlert {
    pub device_id: String,
    /// The detected object as received from the vision pipeline.
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VisitOutcome {
    ReportVisit(BirdVisit),
    AlertUnwelcome(UnwelcomeAlert),
}

impl VisitOutcome {
    /// Label used for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            VisitOutcome::ReportVisit(_) => "report_visit",
            VisitOutcome::AlertUnwelcome(_) => "alert_unwelcome",
        }
    }

    pub fn device_id(&self) -> &str {
        match self {
            VisitOutcome::ReportVisit(visit) => &visit.device_id,
            VisitOutcome::AlertUnwelcome(alert) => &alert.device_id,
        }
    }
}

fn serialize_iso8601<S>(datetime: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&datetime.to_rfc3339_opts(SecondsFormat::Micros, true))
}
