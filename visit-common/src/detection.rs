use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::tracking::TrackingId;

/// A detection message as produced by the vision pipeline. Everything is
/// optional here: validation happens when converting into `DetectionEvent`.
#[derive(Debug, Default, Deserialize)]
pub struct DetectionMessage {
    pub sensor: Option<SensorMessage>,
    pub object: Option<Map<String, Value>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SensorMessage {
    pub id: Option<String>,
    pub location: Option<LocationMessage>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LocationMessage {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// The classifier recognised a bird.
    Bird { species: String },
    /// Anything else. Holds the detected object exactly as received.
    Other(Value),
}

/// A validated detection of one tracked object by one device.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionEvent {
    pub tracking_id: TrackingId,
    pub device_id: String,
    pub location: Location,
    pub classification: Classification,
}

#[derive(Error, Debug, PartialEq)]
pub enum DetectionError {
    #[error("object detection data not found in message")]
    MissingObject,
    #[error("tracking id not found in object detection data")]
    MissingTrackingId,
    #[error("tracking id is neither a string nor an integer")]
    InvalidTrackingId,
    #[error("sensor id not found in message")]
    MissingDeviceId,
    #[error("sensor location not found in message")]
    MissingLocation,
    #[error("bird detection without a species")]
    MissingSpecies,
}

impl TryFrom<DetectionMessage> for DetectionEvent {
    type Error = DetectionError;

    fn try_from(message: DetectionMessage) -> Result<Self, Self::Error> {
        let object = message.object.ok_or(DetectionError::MissingObject)?;

        let tracking_id = object
            .get("id")
            .ok_or(DetectionError::MissingTrackingId)?;
        let tracking_id = TrackingId::deserialize(tracking_id)
            .map_err(|_| DetectionError::InvalidTrackingId)?;

        let sensor = message.sensor.unwrap_or_default();
        let device_id = sensor
            .id
            .filter(|id| !id.is_empty())
            .ok_or(DetectionError::MissingDeviceId)?;
        let location = match sensor.location {
            Some(LocationMessage {
                lat: Some(lat),
                lon: Some(lon),
            }) => Location { lat, lon },
            _ => return Err(DetectionError::MissingLocation),
        };

        let classification = match object.get("bird") {
            Some(bird) => {
                let species = bird
                    .get("species")
                    .and_then(Value::as_str)
                    .ok_or(DetectionError::MissingSpecies)?;
                Classification::Bird {
                    species: species.to_owned(),
                }
            }
            None => Classification::Other(Value::Object(object)),
        };

        Ok(DetectionEvent {
            tracking_id,
            device_id,
            location,
            classification,
        })
    }
}
