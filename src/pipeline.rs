//! Pipeline orchestration
//!
//! [`GazeSession`] owns every stage of one user session and runs each frame
//! through them in arrival order:
//! 1. FeatureReducer - landmark geometry to a frame signal
//! 2. CalibrationRun - consumes the frame while calibration is in progress
//! 3. classify - raw label against the active profile
//! 4. TemporalSmoother - debounced label
//! 5. SessionRecorder - one record per frame

use crate::calibration::{CalibrationProfile, CalibrationProgress, CalibrationRun, CalibrationStep};
use crate::classifier::classify;
use crate::config::GazeConfig;
use crate::error::GazeError;
use crate::features::FeatureReducer;
use crate::landmarks::LandmarkExtractor;
use crate::recorder::{RecorderHandle, SessionRecorder, SessionSummary};
use crate::smoother::TemporalSmoother;
use crate::types::{
    Classification, Direction, FeatureVector, FramePhase, FrameSignal, LandmarkFrame,
    NoSignalReason, SessionRecord, SmoothedState,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// What a calibration run reported for one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CalibrationEvent {
    Collecting {
        pose: Direction,
        collected: usize,
        required: usize,
    },
    PoseCompleted {
        pose: Direction,
        next: Direction,
    },
    RetakeRequired {
        pose: Direction,
        collected: usize,
        required: usize,
    },
    /// A new profile was verified and is now active
    Finished { epoch: u64 },
    /// The run ended without a profile; the prior profile is still active
    Failed { error: String },
}

/// Per-frame result of [`GazeSession::process_frame`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameOutcome {
    pub frame_index: u64,
    pub timestamp: DateTime<Utc>,
    pub phase: FramePhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<FeatureVector>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_signal: Option<NoSignalReason>,
    /// Classifier verdict; `None` while calibrating
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,
    pub smoothed_label: Direction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calibration: Option<CalibrationEvent>,
}

/// One gaze tracking session.
///
/// The active profile is swapped atomically: a calibration in progress never
/// touches it, and it is replaced only by a verified profile.
#[derive(Debug)]
pub struct GazeSession {
    config: GazeConfig,
    reducer: FeatureReducer,
    profile: Option<Arc<CalibrationProfile>>,
    next_epoch: u64,
    calibration: Option<CalibrationRun>,
    smoother: TemporalSmoother,
    recorder: SessionRecorder,
    frame_index: u64,
    latest: Option<Classification>,
    face_absent: bool,
}

impl Default for GazeSession {
    fn default() -> Self {
        Self::build(GazeConfig::default())
    }
}

impl GazeSession {
    /// Create a session. The configuration is validated up front.
    pub fn new(config: GazeConfig) -> Result<Self, GazeError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: GazeConfig) -> Self {
        Self {
            reducer: FeatureReducer::from_config(&config),
            smoother: TemporalSmoother::from_config(&config),
            config,
            profile: None,
            next_epoch: 1,
            calibration: None,
            recorder: SessionRecorder::new(),
            frame_index: 0,
            latest: None,
            face_absent: false,
        }
    }

    pub fn config(&self) -> &GazeConfig {
        &self.config
    }

    /// Process one frame. `None` means the detector found no face.
    pub fn process_frame(
        &mut self,
        frame: Option<&LandmarkFrame>,
        timestamp: DateTime<Utc>,
    ) -> FrameOutcome {
        let signal = self.reducer.reduce(frame);
        self.process_signal(signal, timestamp)
    }

    /// Run the detector on `image`, then process the result
    pub fn process_image<E: LandmarkExtractor>(
        &mut self,
        extractor: &mut E,
        image: &E::Image,
        timestamp: DateTime<Utc>,
    ) -> Result<FrameOutcome, GazeError> {
        let frame = extractor.extract(image)?;
        Ok(self.process_frame(frame.as_ref(), timestamp))
    }

    /// Process an already reduced frame. Features with closed eyes are
    /// treated as a blink, as for landmark frames.
    pub fn process_signal(&mut self, signal: FrameSignal, timestamp: DateTime<Utc>) -> FrameOutcome {
        let signal = self.reducer.screen(signal);
        self.track_presence(&signal);

        let outcome = match self.calibration.as_mut() {
            Some(run) => {
                let step = run.feed(&signal, timestamp);
                let event = self.apply_calibration_step(step);
                FrameOutcome {
                    frame_index: self.frame_index,
                    timestamp,
                    phase: FramePhase::Calibrating,
                    features: signal.features().copied(),
                    no_signal: signal.no_signal_reason(),
                    classification: None,
                    smoothed_label: self.smoother.current_label(),
                    calibration: Some(event),
                }
            }
            None => {
                let classification = classify(&signal, self.profile.as_deref(), timestamp);
                let smoothed_label = self.smoother.update(classification.label);
                self.latest = Some(classification);
                FrameOutcome {
                    frame_index: self.frame_index,
                    timestamp,
                    phase: FramePhase::Live,
                    features: signal.features().copied(),
                    no_signal: signal.no_signal_reason(),
                    classification: Some(classification),
                    smoothed_label,
                    calibration: None,
                }
            }
        };

        self.recorder.append(record_for(&outcome));
        self.frame_index += 1;
        outcome
    }

    fn apply_calibration_step(&mut self, step: CalibrationStep) -> CalibrationEvent {
        match step {
            CalibrationStep::Collecting {
                pose,
                collected,
                required,
            } => CalibrationEvent::Collecting {
                pose,
                collected,
                required,
            },
            CalibrationStep::PoseCompleted { pose, next } => {
                CalibrationEvent::PoseCompleted { pose, next }
            }
            CalibrationStep::RetakeRequired {
                pose,
                collected,
                required,
            } => CalibrationEvent::RetakeRequired {
                pose,
                collected,
                required,
            },
            CalibrationStep::Finished(profile) => {
                self.calibration = None;
                let epoch = self.install(profile);
                CalibrationEvent::Finished { epoch }
            }
            CalibrationStep::Failed(error) => {
                self.calibration = None;
                warn!(error = %error, "calibration failed; keeping previous profile");
                CalibrationEvent::Failed {
                    error: error.to_string(),
                }
            }
        }
    }

    fn install(&mut self, profile: CalibrationProfile) -> u64 {
        let epoch = profile.epoch();
        info!(
            epoch,
            poses = ?profile.poses().collect::<Vec<_>>(),
            "calibration profile activated"
        );
        self.profile = Some(Arc::new(profile));
        self.smoother.reset();
        epoch
    }

    fn track_presence(&mut self, signal: &FrameSignal) {
        let absent = signal.no_signal_reason() == Some(NoSignalReason::FaceAbsent);
        if absent && !self.face_absent {
            warn!(frame_index = self.frame_index, "face lost");
        } else if !absent && self.face_absent {
            info!(frame_index = self.frame_index, "face reacquired");
        }
        self.face_absent = absent;
    }

    fn allocate_epoch(&mut self) -> u64 {
        let epoch = self.next_epoch;
        self.next_epoch += 1;
        epoch
    }

    /// Begin calibrating over `sequence`. Classification is suspended and
    /// the smoother reset until the run finishes, fails, or is aborted.
    pub fn start_calibration(&mut self, sequence: &[Direction]) -> Result<(), GazeError> {
        if self.calibration.is_some() {
            return Err(GazeError::CalibrationInProgress);
        }
        let run = CalibrationRun::new(sequence, &self.config, self.next_epoch)?;
        self.allocate_epoch();
        self.smoother.reset();
        self.calibration = Some(run);
        Ok(())
    }

    /// Calibrate all five poses in canonical order
    pub fn start_full_calibration(&mut self) -> Result<(), GazeError> {
        self.start_calibration(&Direction::POSES)
    }

    /// Drop the run in progress; the prior profile stays active
    pub fn abort_calibration(&mut self) -> Result<(), GazeError> {
        let run = self
            .calibration
            .take()
            .ok_or(GazeError::NoCalibrationInProgress)?;
        info!(pose = %run.current_pose(), "calibration aborted");
        Ok(())
    }

    /// Restart the pose that ran out of time
    pub fn retake_pose(&mut self) -> Result<Direction, GazeError> {
        self.calibration
            .as_mut()
            .ok_or(GazeError::NoCalibrationInProgress)?
            .retake_pose()
    }

    pub fn is_calibrating(&self) -> bool {
        self.calibration.is_some()
    }

    pub fn calibration_progress(&self) -> Option<CalibrationProgress> {
        self.calibration.as_ref().map(CalibrationRun::progress)
    }

    pub fn current_label(&self) -> Direction {
        self.smoother.current_label()
    }

    pub fn smoothed_state(&self) -> &SmoothedState {
        self.smoother.state()
    }

    pub fn latest_classification(&self) -> Option<&Classification> {
        self.latest.as_ref()
    }

    pub fn active_profile(&self) -> Option<Arc<CalibrationProfile>> {
        self.profile.clone()
    }

    /// Re-derive the active profile's thresholds under a new sensitivity.
    ///
    /// The re-derived profile gets a fresh epoch. Rejected while calibrating.
    pub fn set_sensitivity(&mut self, sensitivity: f64) -> Result<(), GazeError> {
        if self.calibration.is_some() {
            return Err(GazeError::CalibrationInProgress);
        }
        let config = self.config.clone().with_sensitivity(sensitivity)?;
        if let Some(profile) = &self.profile {
            let rederived = profile.with_sensitivity(sensitivity)?;
            let epoch = self.allocate_epoch();
            self.install(rederived.with_epoch(epoch));
        }
        self.config = config;
        Ok(())
    }

    /// Serialize the active profile for reuse in a later session
    pub fn save_profile(&self) -> Result<String, GazeError> {
        self.profile
            .as_ref()
            .ok_or(GazeError::NoActiveProfile)?
            .to_json()
    }

    /// Load and activate a saved profile under a fresh epoch
    pub fn load_profile(&mut self, json: &str) -> Result<u64, GazeError> {
        let profile = CalibrationProfile::from_json(json)?;
        self.use_profile(profile)
    }

    /// Activate an externally built profile under a fresh epoch
    pub fn use_profile(&mut self, profile: CalibrationProfile) -> Result<u64, GazeError> {
        if self.calibration.is_some() {
            return Err(GazeError::CalibrationInProgress);
        }
        let epoch = self.allocate_epoch();
        Ok(self.install(profile.with_epoch(epoch)))
    }

    /// Ordered copy of the session log
    pub fn export_snapshot(&self) -> Vec<SessionRecord> {
        self.recorder.snapshot()
    }

    /// Handle for exporting from another thread
    pub fn recorder_handle(&self) -> RecorderHandle {
        self.recorder.handle()
    }

    pub fn summary(&self) -> SessionSummary {
        self.recorder.handle().summary()
    }

    pub fn frames_processed(&self) -> u64 {
        self.frame_index
    }

    /// Start a new session log, keeping configuration and profile.
    ///
    /// Handles taken before the restart keep the old log.
    pub fn restart(&mut self) {
        if let Some(run) = self.calibration.take() {
            info!(pose = %run.current_pose(), "calibration dropped by restart");
        }
        self.smoother.reset();
        self.recorder = SessionRecorder::new();
        self.frame_index = 0;
        self.latest = None;
        self.face_absent = false;
    }
}

fn record_for(outcome: &FrameOutcome) -> SessionRecord {
    let (raw_label, confidence, profile_epoch) = match &outcome.classification {
        Some(c) => (c.label, c.confidence, c.profile_epoch),
        None => (Direction::Unknown, 0.0, None),
    };
    SessionRecord {
        frame_index: outcome.frame_index,
        timestamp: outcome.timestamp,
        phase: outcome.phase,
        features: outcome.features,
        no_signal: outcome.no_signal,
        raw_label,
        smoothed_label: outcome.smoothed_label,
        confidence,
        profile_epoch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::fixtures::SyntheticFace;
    use pretty_assertions::assert_eq;

    fn t(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000 + ms).unwrap()
    }

    fn fv(h: f64) -> FrameSignal {
        FrameSignal::Features(FeatureVector::new(h, 0.0, 0.0, 0.0, 1.0))
    }

    fn session(samples: usize) -> GazeSession {
        let config = GazeConfig {
            debounce_threshold: 3,
            sensitivity: 1.0,
            samples_per_pose: samples,
            pose_time_budget_ms: 1_000,
            ..GazeConfig::default()
        };
        GazeSession::new(config).unwrap()
    }

    /// Calibrate straight at 0.0 and left at -0.3, five samples each
    fn calibrated(clock: &mut i64) -> GazeSession {
        let mut s = session(5);
        s.start_calibration(&[Direction::Straight, Direction::Left]).unwrap();
        for h in [0.0; 5].into_iter().chain([-0.3; 5]) {
            *clock += 33;
            s.process_signal(fv(h), t(*clock));
        }
        assert!(!s.is_calibrating());
        s
    }

    #[test]
    fn test_end_to_end_left_after_debounce() {
        let mut clock = 0;
        let mut s = calibrated(&mut clock);
        let epoch = s.active_profile().unwrap().epoch();

        let mut smoothed = Vec::new();
        for _ in 0..3 {
            clock += 33;
            let outcome = s.process_signal(fv(-0.35), t(clock));
            let c = outcome.classification.unwrap();
            assert_eq!(c.label, Direction::Left);
            assert_eq!(c.profile_epoch, Some(epoch));
            smoothed.push(outcome.smoothed_label);
        }
        assert_eq!(
            smoothed,
            vec![Direction::Unknown, Direction::Unknown, Direction::Left]
        );
        assert_eq!(s.current_label(), Direction::Left);
    }

    #[test]
    fn test_calibration_outcomes_and_finish_event() {
        let mut s = session(2);
        s.start_calibration(&[Direction::Straight, Direction::Left]).unwrap();
        let events: Vec<_> = [0.0, 0.0, -0.3, -0.3]
            .iter()
            .enumerate()
            .map(|(i, &h)| s.process_signal(fv(h), t(i as i64 * 33)).calibration.unwrap())
            .collect();
        assert_eq!(
            events,
            vec![
                CalibrationEvent::Collecting {
                    pose: Direction::Straight,
                    collected: 1,
                    required: 2
                },
                CalibrationEvent::PoseCompleted {
                    pose: Direction::Straight,
                    next: Direction::Left
                },
                CalibrationEvent::Collecting {
                    pose: Direction::Left,
                    collected: 1,
                    required: 2
                },
                CalibrationEvent::Finished { epoch: 1 },
            ]
        );
    }

    #[test]
    fn test_classification_suspended_while_calibrating() {
        let mut clock = 0;
        let mut s = calibrated(&mut clock);
        for _ in 0..3 {
            clock += 33;
            s.process_signal(fv(-0.35), t(clock));
        }
        let latest = *s.latest_classification().unwrap();

        s.start_full_calibration().unwrap();
        assert_eq!(s.current_label(), Direction::Unknown);
        for _ in 0..4 {
            clock += 33;
            let outcome = s.process_signal(fv(-0.35), t(clock));
            assert_eq!(outcome.phase, FramePhase::Calibrating);
            assert_eq!(outcome.classification, None);
            assert_eq!(outcome.smoothed_label, Direction::Unknown);
        }
        assert_eq!(*s.smoothed_state(), SmoothedState::default());
        assert_eq!(s.latest_classification(), Some(&latest));
        assert!(matches!(
            s.start_full_calibration(),
            Err(GazeError::CalibrationInProgress)
        ));
    }

    #[test]
    fn test_straight_failure_keeps_prior_profile_bytes() {
        let mut clock = 0;
        let mut s = calibrated(&mut clock);
        let before = s.save_profile().unwrap();

        s.start_full_calibration().unwrap();
        clock += 33;
        s.process_signal(fv(0.0), t(clock));
        clock += 1_500;
        let outcome = s.process_signal(FrameSignal::NoSignal(NoSignalReason::FaceAbsent), t(clock));
        assert!(matches!(
            outcome.calibration,
            Some(CalibrationEvent::Failed { .. })
        ));
        assert!(!s.is_calibrating());
        assert_eq!(s.save_profile().unwrap(), before);
    }

    #[test]
    fn test_abort_and_retake_control() {
        let mut s = session(1);
        assert!(matches!(
            s.abort_calibration(),
            Err(GazeError::NoCalibrationInProgress)
        ));
        assert!(matches!(
            s.retake_pose(),
            Err(GazeError::NoCalibrationInProgress)
        ));

        s.start_calibration(&[Direction::Straight, Direction::Up]).unwrap();
        s.process_signal(fv(0.0), t(0));
        s.process_signal(FrameSignal::NoSignal(NoSignalReason::Blink), t(10));
        let outcome = s.process_signal(FrameSignal::NoSignal(NoSignalReason::Blink), t(1_100));
        assert!(matches!(
            outcome.calibration,
            Some(CalibrationEvent::RetakeRequired { pose: Direction::Up, .. })
        ));
        assert!(s.calibration_progress().unwrap().awaiting_retake);
        assert_eq!(s.retake_pose().unwrap(), Direction::Up);

        s.abort_calibration().unwrap();
        assert!(!s.is_calibrating());
        assert!(s.active_profile().is_none());
        assert!(matches!(s.save_profile(), Err(GazeError::NoActiveProfile)));
    }

    #[test]
    fn test_every_frame_is_recorded_in_order() {
        let mut clock = 0;
        let mut s = calibrated(&mut clock);
        let handle = s.recorder_handle();
        clock += 33;
        s.process_frame(None, t(clock));
        clock += 33;
        s.process_signal(fv(-0.35), t(clock));

        let records = handle.snapshot();
        assert_eq!(records.len(), 12);
        assert_eq!(s.frames_processed(), 12);
        assert!(records
            .iter()
            .enumerate()
            .all(|(i, r)| r.frame_index == i as u64));
        assert!(records[..10].iter().all(|r| r.phase == FramePhase::Calibrating));
        assert_eq!(records[10].no_signal, Some(NoSignalReason::FaceAbsent));
        assert_eq!(records[10].raw_label, Direction::Unknown);
        assert_eq!(records[11].raw_label, Direction::Left);
        assert_eq!(records[11].profile_epoch, Some(1));
    }

    #[test]
    fn test_unknown_without_profile() {
        let mut s = GazeSession::default();
        let outcome = s.process_signal(fv(-0.5), t(0));
        assert_eq!(outcome.classification.unwrap().label, Direction::Unknown);
        assert_eq!(outcome.smoothed_label, Direction::Unknown);
    }

    #[test]
    fn test_load_profile_gets_fresh_epoch() {
        let mut clock = 0;
        let first = calibrated(&mut clock);
        let saved = first.save_profile().unwrap();

        let mut second = session(5);
        second.start_full_calibration().unwrap();
        assert!(matches!(
            second.load_profile(&saved),
            Err(GazeError::CalibrationInProgress)
        ));
        second.abort_calibration().unwrap();
        let epoch = second.load_profile(&saved).unwrap();
        assert_eq!(epoch, 2);
        let loaded = second.active_profile().unwrap();
        assert_eq!(loaded.reference(Direction::Left), first.active_profile().unwrap().reference(Direction::Left));
    }

    #[test]
    fn test_set_sensitivity_rederives_profile() {
        let mut clock = 0;
        let mut s = calibrated(&mut clock);
        // Left threshold 0.15 -> 0.3 at sensitivity 2.0
        s.set_sensitivity(2.0).unwrap();
        let profile = s.active_profile().unwrap();
        assert_eq!(profile.epoch(), 2);
        assert!((profile.threshold(Direction::Left).unwrap().threshold - 0.3).abs() < 1e-12);
        clock += 33;
        let outcome = s.process_signal(fv(-0.25), t(clock));
        assert_eq!(outcome.classification.unwrap().label, Direction::Straight);
        assert!(s.set_sensitivity(-1.0).is_err());
        assert_eq!(s.config().sensitivity, 2.0);
    }

    #[test]
    fn test_set_sensitivity_rejected_while_calibrating() {
        let mut clock = 0;
        let mut s = calibrated(&mut clock);
        let before = s.save_profile().unwrap();

        s.start_calibration(&[Direction::Straight, Direction::Left]).unwrap();
        clock += 33;
        s.process_signal(fv(0.0), t(clock));
        assert!(matches!(
            s.set_sensitivity(2.0),
            Err(GazeError::CalibrationInProgress)
        ));
        assert!(s.is_calibrating());
        assert_eq!(s.save_profile().unwrap(), before);
        assert_eq!(s.config().sensitivity, 1.0);

        for h in [0.0; 4].into_iter().chain([-0.3; 5]) {
            clock += 33;
            s.process_signal(fv(h), t(clock));
        }
        let profile = s.active_profile().unwrap();
        assert_eq!(profile.epoch(), 2);
        assert_eq!(profile.sensitivity(), s.config().sensitivity);

        s.set_sensitivity(2.0).unwrap();
        assert_eq!(s.active_profile().unwrap().epoch(), 3);
    }

    #[test]
    fn test_closed_eye_features_are_not_classified() {
        let mut clock = 0;
        let mut s = calibrated(&mut clock);
        clock += 33;
        let closed = FrameSignal::Features(FeatureVector::new(-0.35, 0.0, 0.0, 0.0, 0.05));
        let outcome = s.process_signal(closed, t(clock));
        assert_eq!(outcome.no_signal, Some(NoSignalReason::Blink));
        assert_eq!(outcome.features, None);
        assert_eq!(outcome.classification.unwrap().label, Direction::Unknown);
        assert_eq!(
            s.export_snapshot().last().unwrap().no_signal,
            Some(NoSignalReason::Blink)
        );
    }

    #[test]
    fn test_restart_keeps_profile_and_old_log() {
        let mut clock = 0;
        let mut s = calibrated(&mut clock);
        let old = s.recorder_handle();
        s.restart();
        assert_eq!(s.frames_processed(), 0);
        assert!(s.export_snapshot().is_empty());
        assert_eq!(old.len(), 10);
        assert!(s.active_profile().is_some());
    }

    #[test]
    fn test_landmark_frames_end_to_end() {
        let mut s = session(3);
        s.start_calibration(&[Direction::Straight, Direction::Left, Direction::Right])
            .unwrap();
        let mut clock = 0;
        for dx in [0.0, 0.0, 0.0, -30.0, -30.0, -30.0, 30.0, 30.0, 30.0] {
            clock += 33;
            s.process_frame(Some(&SyntheticFace::looking(dx, 0.0).frame()), t(clock));
        }
        assert!(s.active_profile().is_some());

        let labels: Vec<_> = [-35.0, -35.0, -35.0, 5.0]
            .iter()
            .map(|&dx| {
                clock += 33;
                s.process_frame(Some(&SyntheticFace::looking(dx, 0.0).frame()), t(clock))
                    .classification
                    .unwrap()
                    .label
            })
            .collect();
        assert_eq!(
            labels,
            vec![Direction::Left, Direction::Left, Direction::Left, Direction::Straight]
        );
        assert_eq!(s.current_label(), Direction::Left);
    }

    struct ScriptedExtractor {
        faces: Vec<Option<SyntheticFace>>,
    }

    impl LandmarkExtractor for ScriptedExtractor {
        type Image = usize;

        fn extract(&mut self, image: &usize) -> Result<Option<LandmarkFrame>, GazeError> {
            self.faces
                .get(*image)
                .map(|face| face.map(|f| f.frame()))
                .ok_or_else(|| GazeError::InvalidLandmarkFrame(format!("no image {image}")))
        }
    }

    #[test]
    fn test_process_image_through_extractor() {
        let mut extractor = ScriptedExtractor {
            faces: vec![Some(SyntheticFace::default()), None],
        };
        let mut s = GazeSession::default();
        let outcome = s.process_image(&mut extractor, &0, t(0)).unwrap();
        assert!(outcome.features.is_some());
        let outcome = s.process_image(&mut extractor, &1, t(33)).unwrap();
        assert_eq!(outcome.no_signal, Some(NoSignalReason::FaceAbsent));
        assert!(s.process_image(&mut extractor, &2, t(66)).is_err());
        assert_eq!(s.frames_processed(), 2);
    }
}
