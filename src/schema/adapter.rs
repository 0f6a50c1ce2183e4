//! Adapter for driving a [`GazeSession`] from gaze.input_event.v1 streams
//!
//! Parsing accepts a JSON array or NDJSON. Frame events run through the
//! session in order; control events start, abort, or retake calibration.

use crate::error::GazeError;
use crate::pipeline::{FrameOutcome, GazeSession};
use crate::schema::input_event::*;
use crate::types::{Direction, FrameSignal};
use chrono::{DateTime, Utc};

/// Adapter for converting input events into session calls
pub struct InputEventAdapter;

impl InputEventAdapter {
    /// Parse a JSON string containing an array of InputEvents
    pub fn parse_array(json: &str) -> Result<Vec<InputEvent>, GazeError> {
        let events: Vec<InputEvent> = serde_json::from_str(json)?;
        Ok(events)
    }

    /// Parse NDJSON (newline-delimited JSON) containing InputEvents
    pub fn parse_ndjson(ndjson: &str) -> Result<Vec<InputEvent>, GazeError> {
        let mut events = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<InputEvent>(trimmed) {
                Ok(event) => events.push(event),
                Err(e) => {
                    return Err(GazeError::ParseError(format!(
                        "Failed to parse line {}: {}",
                        line_num + 1,
                        e
                    )));
                }
            }
        }
        Ok(events)
    }

    /// Parse either format: a leading `[` selects the array form
    pub fn parse(input: &str) -> Result<Vec<InputEvent>, GazeError> {
        if input.trim_start().starts_with('[') {
            Self::parse_array(input)
        } else {
            Self::parse_ndjson(input)
        }
    }

    /// Validate a batch of events, including timestamp order.
    ///
    /// Only failing events are returned.
    pub fn validate_events(events: &[InputEvent]) -> Vec<ValidationResult> {
        let mut previous: Option<DateTime<Utc>> = None;
        let mut failures = Vec::new();
        for (index, event) in events.iter().enumerate() {
            let result = event.validate().and_then(|()| match previous {
                Some(prev) if event.timestamp < prev => Err(ValidationError::TimestampRegression {
                    previous: prev,
                    current: event.timestamp,
                }),
                _ => Ok(()),
            });
            previous = Some(previous.map_or(event.timestamp, |p| p.max(event.timestamp)));
            if let Err(error) = result {
                failures.push(ValidationResult {
                    index,
                    event_id: event.event_id.clone(),
                    event_type: event.payload.type_name(),
                    error,
                });
            }
        }
        failures
    }

    /// Apply one event. Frame events return their outcome; control events
    /// return `None`.
    pub fn apply(
        session: &mut GazeSession,
        event: &InputEvent,
    ) -> Result<Option<FrameOutcome>, GazeError> {
        event
            .validate()
            .map_err(|e| GazeError::ParseError(format!("Invalid event: {e}")))?;

        match &event.payload {
            EventPayload::Frame { landmarks } => {
                Ok(Some(session.process_frame(landmarks.as_ref(), event.timestamp)))
            }
            EventPayload::Features {
                features,
                no_signal,
            } => {
                let signal = match (features, no_signal) {
                    (Some(fv), _) => FrameSignal::Features(*fv),
                    (None, Some(reason)) => FrameSignal::NoSignal(*reason),
                    (None, None) => {
                        return Err(GazeError::ParseError(
                            "features event carries no signal".to_string(),
                        ))
                    }
                };
                Ok(Some(session.process_signal(signal, event.timestamp)))
            }
            EventPayload::StartCalibration { sequence } => {
                let sequence = sequence.as_deref().unwrap_or(&Direction::POSES);
                session.start_calibration(sequence)?;
                Ok(None)
            }
            EventPayload::AbortCalibration => {
                session.abort_calibration()?;
                Ok(None)
            }
            EventPayload::RetakePose => {
                session.retake_pose()?;
                Ok(None)
            }
        }
    }

    /// Run every event through `session`, stopping at the first error
    pub fn replay(
        session: &mut GazeSession,
        events: &[InputEvent],
    ) -> Result<Vec<FrameOutcome>, GazeError> {
        let mut outcomes = Vec::new();
        for event in events {
            if let Some(outcome) = Self::apply(session, event)? {
                outcomes.push(outcome);
            }
        }
        Ok(outcomes)
    }
}

/// A failing event from [`InputEventAdapter::validate_events`]
#[derive(Debug)]
pub struct ValidationResult {
    pub index: usize,
    pub event_id: Option<String>,
    pub event_type: &'static str,
    pub error: ValidationError,
}
