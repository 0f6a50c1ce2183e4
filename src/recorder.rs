//! Session recording
//!
//! An append-only log with one [`SessionRecord`] per processed frame. The
//! pipeline thread owns the [`SessionRecorder`]; any number of
//! [`RecorderHandle`]s may take snapshots from other threads. A snapshot holds
//! the read lock only for the clone.

use crate::types::{Direction, FramePhase, NoSignalReason, SessionRecord};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Append-only session log, written by the pipeline
#[derive(Debug, Default)]
pub struct SessionRecorder {
    records: Arc<RwLock<Vec<SessionRecord>>>,
}

impl SessionRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, record: SessionRecord) {
        self.records.write().push(record);
    }

    /// Read-only handle sharing this log
    pub fn handle(&self) -> RecorderHandle {
        RecorderHandle {
            records: Arc::clone(&self.records),
        }
    }

    pub fn snapshot(&self) -> Vec<SessionRecord> {
        self.records.read().clone()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

/// Cloneable read-only view of a session log
#[derive(Debug, Clone)]
pub struct RecorderHandle {
    records: Arc<RwLock<Vec<SessionRecord>>>,
}

impl RecorderHandle {
    /// Ordered copy of every record appended so far
    pub fn snapshot(&self) -> Vec<SessionRecord> {
        self.records.read().clone()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary::from_records(&self.records.read())
    }
}

/// Frames inspected when checking for excessive blinking
pub const EXCESSIVE_BLINK_WINDOW: usize = 30;

/// Blink frames within one window above which blinking is excessive
pub const EXCESSIVE_BLINK_FRAMES: usize = 15;

/// A run of live frames whose smoothed label stayed on one off-center pose
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookingAwayEpisode {
    pub direction: Direction,
    pub started_at: DateTime<Utc>,
    /// Timestamp of the frame that ended the episode, or of its last frame
    /// when the log ends first
    pub ended_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub frames: u64,
}

/// Aggregate view of a session log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub total_frames: u64,
    pub live_frames: u64,
    pub calibration_frames: u64,
    /// Smoothed label counts over live frames
    pub label_counts: BTreeMap<Direction, u64>,
    /// Share of live frames whose smoothed label is `unknown`
    pub unknown_ratio: f64,
    /// Runs of consecutive blink frames
    pub blink_episodes: u64,
    /// Runs of consecutive face-absent frames
    pub face_absence_episodes: u64,
    /// Smoothed label transitions between consecutive live frames
    pub label_changes: u64,
    /// Share of all frames in which a face was found; blinks count as found
    pub face_detection_rate: f64,
    /// Blink episodes per minute of session time
    pub blink_rate_per_minute: f64,
    /// Some window of consecutive frames had more than half its frames
    /// closed-eye
    pub excessive_blinking: bool,
    /// Sustained off-center smoothed labels, in order
    pub looking_away: Vec<LookingAwayEpisode>,
    /// Distinct calibration epochs seen, in order of first appearance
    pub profile_epochs: Vec<u64>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: i64,
}

impl SessionSummary {
    pub fn from_records(records: &[SessionRecord]) -> Self {
        let mut label_counts = BTreeMap::new();
        let mut live_frames = 0u64;
        let mut blink_episodes = 0u64;
        let mut face_absence_episodes = 0u64;
        let mut label_changes = 0u64;
        let mut profile_epochs: Vec<u64> = Vec::new();
        let mut previous_reason: Option<NoSignalReason> = None;
        let mut previous_live_label: Option<Direction> = None;

        for record in records {
            if record.no_signal != previous_reason {
                match record.no_signal {
                    Some(NoSignalReason::Blink) => blink_episodes += 1,
                    Some(NoSignalReason::FaceAbsent) => face_absence_episodes += 1,
                    None => {}
                }
            }
            previous_reason = record.no_signal;

            if let Some(epoch) = record.profile_epoch {
                if !profile_epochs.contains(&epoch) {
                    profile_epochs.push(epoch);
                }
            }

            if record.phase == FramePhase::Live {
                live_frames += 1;
                *label_counts.entry(record.smoothed_label).or_insert(0) += 1;
                if previous_live_label.is_some_and(|prev| prev != record.smoothed_label) {
                    label_changes += 1;
                }
                previous_live_label = Some(record.smoothed_label);
            }
        }

        let unknown = label_counts.get(&Direction::Unknown).copied().unwrap_or(0);
        let unknown_ratio = if live_frames > 0 {
            unknown as f64 / live_frames as f64
        } else {
            0.0
        };
        let face_found = records
            .iter()
            .filter(|r| r.no_signal != Some(NoSignalReason::FaceAbsent))
            .count();
        let face_detection_rate = if records.is_empty() {
            0.0
        } else {
            face_found as f64 / records.len() as f64
        };
        let started_at = records.first().map(|r| r.timestamp);
        let ended_at = records.last().map(|r| r.timestamp);
        let duration_ms = match (started_at, ended_at) {
            (Some(start), Some(end)) => (end - start).num_milliseconds(),
            _ => 0,
        };
        let blink_rate_per_minute = if duration_ms > 0 {
            blink_episodes as f64 * 60_000.0 / duration_ms as f64
        } else {
            0.0
        };

        Self {
            total_frames: records.len() as u64,
            live_frames,
            calibration_frames: records.len() as u64 - live_frames,
            label_counts,
            unknown_ratio,
            blink_episodes,
            face_absence_episodes,
            label_changes,
            face_detection_rate,
            blink_rate_per_minute,
            excessive_blinking: has_excessive_blinking(records),
            looking_away: looking_away_episodes(records),
            profile_epochs,
            started_at,
            ended_at,
            duration_ms,
        }
    }
}

fn has_excessive_blinking(records: &[SessionRecord]) -> bool {
    let is_blink = |r: &SessionRecord| r.no_signal == Some(NoSignalReason::Blink);
    let mut in_window = 0usize;
    for (i, record) in records.iter().enumerate() {
        if is_blink(record) {
            in_window += 1;
        }
        if i >= EXCESSIVE_BLINK_WINDOW && is_blink(&records[i - EXCESSIVE_BLINK_WINDOW]) {
            in_window -= 1;
        }
        if i + 1 >= EXCESSIVE_BLINK_WINDOW && in_window > EXCESSIVE_BLINK_FRAMES {
            return true;
        }
    }
    false
}

fn looking_away_episodes(records: &[SessionRecord]) -> Vec<LookingAwayEpisode> {
    let mut episodes = Vec::new();
    let mut open: Option<LookingAwayEpisode> = None;

    for record in records {
        let away = Some(record.smoothed_label)
            .filter(|label| record.phase == FramePhase::Live && label.axis().is_some());

        match open.as_mut() {
            Some(episode) if away == Some(episode.direction) => {
                episode.frames += 1;
                episode.ended_at = record.timestamp;
                continue;
            }
            _ => {}
        }

        if let Some(mut episode) = open.take() {
            episode.ended_at = record.timestamp;
            episodes.push(episode);
        }
        open = away.map(|direction| LookingAwayEpisode {
            direction,
            started_at: record.timestamp,
            ended_at: record.timestamp,
            duration_ms: 0,
            frames: 1,
        });
    }
    episodes.extend(open);

    for episode in &mut episodes {
        episode.duration_ms = (episode.ended_at - episode.started_at).num_milliseconds();
    }
    episodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FeatureVector;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::thread;

    fn record(index: u64, label: Direction, no_signal: Option<NoSignalReason>) -> SessionRecord {
        SessionRecord {
            frame_index: index,
            timestamp: DateTime::from_timestamp_millis(1_700_000_000_000 + index as i64 * 33)
                .unwrap(),
            phase: FramePhase::Live,
            features: no_signal
                .is_none()
                .then(|| FeatureVector::new(0.0, 0.0, 0.0, 0.0, 0.3)),
            no_signal,
            raw_label: if no_signal.is_some() { Direction::Unknown } else { label },
            smoothed_label: label,
            confidence: 0.0,
            profile_epoch: Some(1),
        }
    }

    #[test]
    fn test_handle_shares_log() {
        let recorder = SessionRecorder::new();
        let handle = recorder.handle();
        assert!(handle.is_empty());
        recorder.append(record(0, Direction::Straight, None));
        recorder.append(record(1, Direction::Straight, None));
        assert_eq!(handle.len(), 2);
        assert_eq!(handle.snapshot(), recorder.snapshot());
    }

    #[test]
    fn test_concurrent_exports_never_roll_back() {
        const FRAMES: u64 = 2_000;
        let recorder = SessionRecorder::new();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let handle = recorder.handle();
                thread::spawn(move || {
                    let mut last_len = 0;
                    while last_len < FRAMES as usize {
                        let snapshot = handle.snapshot();
                        assert!(snapshot.len() >= last_len);
                        for (i, r) in snapshot.iter().enumerate() {
                            assert_eq!(r.frame_index, i as u64);
                        }
                        last_len = snapshot.len();
                    }
                })
            })
            .collect();

        for i in 0..FRAMES {
            recorder.append(record(i, Direction::Left, None));
        }
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(recorder.len(), FRAMES as usize);
    }

    #[test]
    fn test_summary_counts_episodes_and_changes() {
        use crate::types::Direction::*;
        let blink = Some(NoSignalReason::Blink);
        let absent = Some(NoSignalReason::FaceAbsent);
        let mut records = vec![
            record(0, Straight, None),
            record(1, Straight, blink),
            record(2, Straight, blink),
            record(3, Left, None),
            record(4, Left, absent),
            record(5, Unknown, absent),
            record(6, Unknown, blink),
            record(7, Straight, None),
        ];
        records[0].phase = FramePhase::Calibrating;
        records[0].profile_epoch = None;
        records[7].profile_epoch = Some(2);

        let summary = SessionSummary::from_records(&records);
        assert_eq!(summary.total_frames, 8);
        assert_eq!(summary.calibration_frames, 1);
        assert_eq!(summary.live_frames, 7);
        assert_eq!(summary.blink_episodes, 2);
        assert_eq!(summary.face_absence_episodes, 1);
        // straight -> left -> unknown -> straight
        assert_eq!(summary.label_changes, 3);
        assert_eq!(summary.label_counts.get(&Unknown), Some(&2));
        assert!((summary.unknown_ratio - 2.0 / 7.0).abs() < 1e-12);
        assert_eq!(summary.profile_epochs, vec![1, 2]);
        assert_eq!(summary.duration_ms, 7 * 33);
    }

    #[test]
    fn test_face_detection_rate_counts_blinks_as_found() {
        use crate::types::Direction::*;
        let records = vec![
            record(0, Straight, None),
            record(1, Straight, Some(NoSignalReason::Blink)),
            record(2, Unknown, Some(NoSignalReason::FaceAbsent)),
            record(3, Unknown, Some(NoSignalReason::FaceAbsent)),
        ];
        let summary = SessionSummary::from_records(&records);
        assert!((summary.face_detection_rate - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_blink_rate_per_minute() {
        use crate::types::Direction::*;
        let blink = Some(NoSignalReason::Blink);
        let mut records = vec![
            record(0, Straight, None),
            record(1, Straight, blink),
            record(2, Straight, None),
            record(3, Straight, blink),
            record(4, Straight, blink),
            record(5, Straight, None),
        ];
        // Two blink episodes over 30 seconds
        records[5].timestamp = records[0].timestamp + chrono::Duration::seconds(30);
        let summary = SessionSummary::from_records(&records);
        assert_eq!(summary.blink_episodes, 2);
        assert!((summary.blink_rate_per_minute - 4.0).abs() < 1e-9);
        assert!(!summary.excessive_blinking);
    }

    #[test]
    fn test_excessive_blinking_needs_majority_of_window() {
        use crate::types::Direction::*;
        let blink = Some(NoSignalReason::Blink);
        let window = |closed: usize| -> Vec<SessionRecord> {
            (0..40)
                .map(|i| {
                    let closed_frame = (5..5 + closed).contains(&(i as usize));
                    record(i, Straight, closed_frame.then_some(blink).flatten())
                })
                .collect()
        };

        assert!(!SessionSummary::from_records(&window(15)).excessive_blinking);
        assert!(SessionSummary::from_records(&window(16)).excessive_blinking);
        // Fewer frames than one window never flags
        let short: Vec<_> = (0..20).map(|i| record(i, Straight, blink)).collect();
        assert!(!SessionSummary::from_records(&short).excessive_blinking);
    }

    #[test]
    fn test_looking_away_episodes() {
        use crate::types::Direction::*;
        let mut records = vec![
            record(0, Straight, None),
            record(1, Left, None),
            record(2, Left, None),
            record(3, Left, None),
            record(4, Up, None),
            record(5, Unknown, Some(NoSignalReason::FaceAbsent)),
            record(6, Straight, None),
            record(7, Right, None),
            record(8, Right, None),
            record(9, Right, None),
        ];
        records[8].phase = FramePhase::Calibrating;

        let episodes = SessionSummary::from_records(&records).looking_away;
        let shape: Vec<_> = episodes
            .iter()
            .map(|e| (e.direction, e.frames, e.duration_ms))
            .collect();
        assert_eq!(
            shape,
            vec![(Left, 3, 3 * 33), (Up, 1, 33), (Right, 1, 33), (Right, 1, 0)]
        );
        assert_eq!(episodes[0].started_at, records[1].timestamp);
        assert_eq!(episodes[0].ended_at, records[4].timestamp);
        assert_eq!(episodes[3].ended_at, records[9].timestamp);
    }

    #[test]
    fn test_empty_summary() {
        let summary = SessionSummary::from_records(&[]);
        assert_eq!(summary.total_frames, 0);
        assert_eq!(summary.unknown_ratio, 0.0);
        assert_eq!(summary.face_detection_rate, 0.0);
        assert_eq!(summary.blink_rate_per_minute, 0.0);
        assert!(summary.looking_away.is_empty());
        assert_eq!(summary.started_at, None);
        assert_eq!(summary.duration_ms, 0);
    }

    fn direction() -> impl Strategy<Value = Direction> {
        prop_oneof![
            Just(Direction::Straight),
            Just(Direction::Left),
            Just(Direction::Right),
            Just(Direction::Up),
            Just(Direction::Down),
            Just(Direction::Unknown),
        ]
    }

    proptest! {
        #[test]
        fn prop_snapshot_preserves_append_order(labels in prop::collection::vec(direction(), 0..200)) {
            let recorder = SessionRecorder::new();
            for (i, label) in labels.iter().enumerate() {
                recorder.append(record(i as u64, *label, None));
            }
            let snapshot = recorder.handle().snapshot();
            prop_assert_eq!(snapshot.len(), labels.len());
            for (i, (r, label)) in snapshot.iter().zip(&labels).enumerate() {
                prop_assert_eq!(r.frame_index, i as u64);
                prop_assert_eq!(r.smoothed_label, *label);
            }

            let summary = recorder.handle().summary();
            prop_assert_eq!(summary.label_counts.values().sum::<u64>(), summary.live_frames);
        }
    }
}
