//! gaze.input_event.v1 schema definition
//!
//! One event per line of a session replay stream:
//! - Landmark frames from the detector (or an explicit "no face")
//! - Pre-reduced feature vectors, for replaying recorded sessions
//! - Calibration control: start, abort, retake

use crate::types::{Direction, FeatureVector, LandmarkFrame, NoSignalReason};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current schema version
pub const SCHEMA_VERSION: &str = "gaze.input_event.v1";

/// Event body, tagged by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// Detector output; `null` or missing landmarks means no face was found
    Frame {
        #[serde(default)]
        landmarks: Option<LandmarkFrame>,
    },
    /// Already reduced frame. Exactly one of the fields must be set.
    Features {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        features: Option<FeatureVector>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        no_signal: Option<NoSignalReason>,
    },
    /// Begin calibration; the full five-pose sequence when omitted
    StartCalibration {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sequence: Option<Vec<Direction>>,
    },
    AbortCalibration,
    RetakePose,
}

impl EventPayload {
    pub fn type_name(&self) -> &'static str {
        match self {
            EventPayload::Frame { .. } => "frame",
            EventPayload::Features { .. } => "features",
            EventPayload::StartCalibration { .. } => "start_calibration",
            EventPayload::AbortCalibration => "abort_calibration",
            EventPayload::RetakePose => "retake_pose",
        }
    }
}

/// A single replay event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputEvent {
    /// Schema version (must be "gaze.input_event.v1")
    pub schema_version: String,
    /// Optional caller-assigned identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl InputEvent {
    pub fn new(timestamp: DateTime<Utc>, payload: EventPayload) -> Self {
        InputEvent {
            schema_version: SCHEMA_VERSION.to_string(),
            event_id: None,
            timestamp,
            payload,
        }
    }

    /// Detector frame event; `None` means no face
    pub fn frame(timestamp: DateTime<Utc>, landmarks: Option<LandmarkFrame>) -> Self {
        Self::new(timestamp, EventPayload::Frame { landmarks })
    }

    pub fn features(timestamp: DateTime<Utc>, features: FeatureVector) -> Self {
        Self::new(
            timestamp,
            EventPayload::Features {
                features: Some(features),
                no_signal: None,
            },
        )
    }

    pub fn start_calibration(timestamp: DateTime<Utc>, sequence: Option<Vec<Direction>>) -> Self {
        Self::new(timestamp, EventPayload::StartCalibration { sequence })
    }

    /// Check the event on its own, without session context
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(ValidationError::InvalidSchemaVersion {
                expected: SCHEMA_VERSION.to_string(),
                actual: self.schema_version.clone(),
            });
        }

        match &self.payload {
            EventPayload::Frame {
                landmarks: Some(frame),
            } => {
                if !(frame.image_width.is_finite() && frame.image_width > 0.0)
                    || !(frame.image_height.is_finite() && frame.image_height > 0.0)
                {
                    return Err(ValidationError::InvalidFrame(format!(
                        "image dimensions must be positive, got {}x{}",
                        frame.image_width, frame.image_height
                    )));
                }
                if let Some(i) = frame
                    .points
                    .iter()
                    .position(|p| !p.x.is_finite() || !p.y.is_finite())
                {
                    return Err(ValidationError::InvalidFrame(format!(
                        "landmark {i} is not finite"
                    )));
                }
                Ok(())
            }
            EventPayload::Frame { landmarks: None } => Ok(()),
            EventPayload::Features {
                features,
                no_signal,
            } => match (features, no_signal) {
                (Some(fv), None) if fv.is_finite() => Ok(()),
                (Some(_), None) => Err(ValidationError::InvalidFeatures(
                    "feature values must be finite".to_string(),
                )),
                _ => Err(ValidationError::InvalidFeatures(
                    "exactly one of features and no_signal must be set".to_string(),
                )),
            },
            EventPayload::StartCalibration {
                sequence: Some(sequence),
            } => crate::calibration::validate_sequence(sequence)
                .map_err(|e| ValidationError::InvalidSequence(e.to_string())),
            EventPayload::StartCalibration { sequence: None }
            | EventPayload::AbortCalibration
            | EventPayload::RetakePose => Ok(()),
        }
    }
}

/// Validation errors for input events
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid schema version: expected {expected}, got {actual}")]
    InvalidSchemaVersion { expected: String, actual: String },

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Invalid features: {0}")]
    InvalidFeatures(String),

    #[error("Invalid calibration sequence: {0}")]
    InvalidSequence(String),

    #[error("Timestamp goes backwards: {previous} then {current}")]
    TimestampRegression {
        previous: DateTime<Utc>,
        current: DateTime<Utc>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Point;
    use pretty_assertions::assert_eq;

    fn ts() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-01-15T14:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_parse_frame_event() {
        let json = r#"{
            "schema_version": "gaze.input_event.v1",
            "timestamp": "2024-01-15T14:00:00Z",
            "type": "frame",
            "landmarks": {"points": [[1.0, 2.0], [3.0, 4.0]], "image_width": 640, "image_height": 480}
        }"#;
        let event: InputEvent = serde_json::from_str(json).unwrap();
        match &event.payload {
            EventPayload::Frame {
                landmarks: Some(frame),
            } => {
                assert_eq!(frame.points[1], Point::new(3.0, 4.0));
                assert!(frame.valid);
            }
            other => panic!("unexpected payload {other:?}"),
        }
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_missing_landmarks_means_no_face() {
        let json = r#"{"schema_version": "gaze.input_event.v1",
                       "timestamp": "2024-01-15T14:00:00Z", "type": "frame"}"#;
        let event: InputEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event, InputEvent::frame(ts(), None));
    }

    #[test]
    fn test_control_events() {
        let json = r#"{"schema_version": "gaze.input_event.v1",
                       "timestamp": "2024-01-15T14:00:00Z",
                       "type": "start_calibration", "sequence": ["straight", "left"]}"#;
        let event: InputEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event.payload,
            EventPayload::StartCalibration {
                sequence: Some(vec![Direction::Straight, Direction::Left])
            }
        );
        assert_eq!(event.payload.type_name(), "start_calibration");

        let json = r#"{"schema_version": "gaze.input_event.v1",
                       "timestamp": "2024-01-15T14:00:00Z", "type": "retake_pose"}"#;
        let event: InputEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.payload, EventPayload::RetakePose);
    }

    #[test]
    fn test_validation_failures() {
        let mut event = InputEvent::frame(ts(), None);
        event.schema_version = "gaze.input_event.v0".to_string();
        assert!(matches!(
            event.validate(),
            Err(ValidationError::InvalidSchemaVersion { .. })
        ));

        let frame = LandmarkFrame::new(vec![Point::new(f64::NAN, 0.0)], 640.0, 480.0);
        assert!(matches!(
            InputEvent::frame(ts(), Some(frame)).validate(),
            Err(ValidationError::InvalidFrame(_))
        ));

        let zero = LandmarkFrame::new(vec![], 0.0, 480.0);
        assert!(InputEvent::frame(ts(), Some(zero)).validate().is_err());

        let both = InputEvent::new(
            ts(),
            EventPayload::Features {
                features: Some(FeatureVector::default()),
                no_signal: Some(NoSignalReason::Blink),
            },
        );
        assert!(matches!(
            both.validate(),
            Err(ValidationError::InvalidFeatures(_))
        ));

        let no_straight = InputEvent::start_calibration(ts(), Some(vec![Direction::Left]));
        assert!(matches!(
            no_straight.validate(),
            Err(ValidationError::InvalidSequence(_))
        ));
    }

    #[test]
    fn test_serialize_round_trip_keeps_tag() {
        let event = InputEvent::features(ts(), FeatureVector::new(-0.3, 0.0, 0.0, 0.0, 0.3));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "features");
        assert_eq!(value["schema_version"], SCHEMA_VERSION);
        assert!(value.get("no_signal").is_none());
    }
}
