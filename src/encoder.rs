//! Session export encoding
//!
//! This module packages a session log snapshot with its configuration,
//! active profile, and summary into a self-describing export payload.

use crate::calibration::CalibrationProfile;
use crate::config::GazeConfig;
use crate::error::GazeError;
use crate::pipeline::GazeSession;
use crate::recorder::SessionSummary;
use crate::types::SessionRecord;
use crate::{GAZE_VERSION, PRODUCER_NAME};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current export schema version
pub const EXPORT_VERSION: &str = "gaze.session_export.v1";

/// Software that produced an export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportProducer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

/// Full export payload for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionExport {
    pub export_version: String,
    pub producer: ExportProducer,
    pub session_id: String,
    pub exported_at: DateTime<Utc>,
    pub config: GazeConfig,
    /// Profile active at export time
    pub profile: Option<CalibrationProfile>,
    pub summary: SessionSummary,
    pub records: Vec<SessionRecord>,
}

/// Export encoder; one per session so exports share a session id
pub struct SessionExporter {
    instance_id: String,
    session_id: String,
}

impl Default for SessionExporter {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionExporter {
    /// Create an exporter with fresh instance and session IDs
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
            session_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create an exporter with specific IDs
    pub fn with_ids(instance_id: String, session_id: String) -> Self {
        Self {
            instance_id,
            session_id,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Snapshot `session` into an export payload
    pub fn export(&self, session: &GazeSession) -> SessionExport {
        let profile = session.active_profile();
        self.export_records(
            session.config(),
            profile.as_deref(),
            session.export_snapshot(),
        )
    }

    /// Build an export from records taken elsewhere, e.g. through a
    /// `RecorderHandle` on another thread
    pub fn export_records(
        &self,
        config: &GazeConfig,
        profile: Option<&CalibrationProfile>,
        records: Vec<SessionRecord>,
    ) -> SessionExport {
        SessionExport {
            export_version: EXPORT_VERSION.to_string(),
            producer: ExportProducer {
                name: PRODUCER_NAME.to_string(),
                version: GAZE_VERSION.to_string(),
                instance_id: self.instance_id.clone(),
            },
            session_id: self.session_id.clone(),
            exported_at: Utc::now(),
            config: config.clone(),
            profile: profile.cloned(),
            summary: SessionSummary::from_records(&records),
            records,
        }
    }

    /// Encode to a pretty-printed JSON document
    pub fn encode_to_json(&self, session: &GazeSession) -> Result<String, GazeError> {
        let export = self.export(session);
        serde_json::to_string_pretty(&export).map_err(GazeError::JsonError)
    }

    /// Encode to NDJSON: a header line without records, then one record
    /// per line
    pub fn encode_to_ndjson(&self, session: &GazeSession) -> Result<String, GazeError> {
        encode_ndjson(&self.export(session))
    }
}

/// NDJSON form of an export
pub fn encode_ndjson(export: &SessionExport) -> Result<String, GazeError> {
    let mut header = serde_json::to_value(export)?;
    if let Some(fields) = header.as_object_mut() {
        fields.remove("records");
        fields.insert("type".to_string(), "header".into());
    }

    let mut out = serde_json::to_string(&header)?;
    out.push('\n');
    for record in &export.records {
        out.push_str(&serde_json::to_string(record)?);
        out.push('\n');
    }
    Ok(out)
}
