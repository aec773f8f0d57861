//! Recorded expression playback.
//!
//! Tracks are authored at their own frame rate and replayed against the host tick rate: host
//! tick `k` shows track frame `floor(k * track_fps / host_fps)`. Frames are copied into the
//! live map as-is. With no track active, every relaxing key eases back toward the rest pose,
//! which also pulls idle head and eye motion back once a blink or sway is over.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use pet_types::{ExpressionTrack, MotionSource, ParameterMap};

use crate::blend::LiveParameters;
use crate::error::TrackError;

/// Per-tick blend factor toward the rest pose while relaxing.
pub const RELAX_RATE: f32 = 0.05;
/// Relaxation stops once every touched key is this close to its rest value.
pub const RELAX_TOLERANCE: f32 = 0.01;

/// Track frame shown on host tick `host_frame`.
pub fn track_frame_index(host_frame: u64, track_fps: f32, host_fps: f32) -> usize {
    if !(track_fps > 0.0 && host_fps > 0.0) {
        return 0;
    }
    (host_frame as f64 * track_fps as f64 / host_fps as f64).floor() as usize
}

/// Named recorded tracks, fixed once the engine is built.
#[derive(Clone, Debug, Default)]
pub struct ExpressionRegistry {
    tracks: HashMap<String, Arc<ExpressionTrack>>,
}

impl ExpressionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `track` under `name`, replacing any earlier track with that name.
    pub fn insert(&mut self, name: impl Into<String>, track: ExpressionTrack) -> Result<(), TrackError> {
        let name = name.into();
        validate(&name, &track)?;
        tracing::debug!(
            name = %name,
            fps = track.fps,
            frames = track.frame_count(),
            "expression track registered"
        );
        self.tracks.insert(name, Arc::new(track));
        Ok(())
    }

    /// Load a recorded track JSON file and register it under `name`.
    pub fn load_file(&mut self, name: impl Into<String>, path: &Path) -> Result<(), TrackError> {
        let raw = std::fs::read(path).map_err(|source| TrackError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let track: ExpressionTrack =
            serde_json::from_slice(&raw).map_err(|source| TrackError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        self.insert(name, track)
    }

    pub fn get(&self, name: &str) -> Option<Arc<ExpressionTrack>> {
        self.tracks.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tracks.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tracks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

fn validate(name: &str, track: &ExpressionTrack) -> Result<(), TrackError> {
    let reason = if !(track.fps.is_finite() && track.fps > 0.0) {
        "fps must be positive"
    } else if track.frames.is_empty() {
        "track has no frames"
    } else {
        return Ok(());
    };
    Err(TrackError::Invalid {
        name: name.to_string(),
        reason,
    })
}

/// Active track and the number of host ticks it has been shown for.
#[derive(Clone, Debug)]
pub struct PlaybackCursor {
    pub name: String,
    pub track: Arc<ExpressionTrack>,
    pub host_frame: u64,
}

/// What one sequencer tick did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SequencerStep {
    /// Copied this track frame into the live map.
    Frame(usize),
    /// The active track ran past its last frame and was cleared.
    Finished,
    /// Easing touched keys back toward the rest pose.
    Relaxing,
    /// Nothing left to relax.
    Settled,
}

#[derive(Debug)]
pub struct ExpressionSequencer {
    registry: ExpressionRegistry,
    host_fps: f32,
    cursor: Option<PlaybackCursor>,
    touched: BTreeSet<String>,
    non_relaxing: HashSet<String>,
}

impl ExpressionSequencer {
    pub fn new(
        registry: ExpressionRegistry,
        host_fps: f32,
        non_relaxing: impl IntoIterator<Item = String>,
    ) -> Self {
        let host_fps = if host_fps.is_finite() && host_fps > 0.0 {
            host_fps
        } else {
            60.0
        };
        Self {
            registry,
            host_fps,
            cursor: None,
            touched: BTreeSet::new(),
            non_relaxing: non_relaxing.into_iter().collect(),
        }
    }

    pub fn registry(&self) -> &ExpressionRegistry {
        &self.registry
    }

    /// Start `name` from its first frame. Unknown names are ignored and leave the current
    /// playback untouched; returns whether a track was started.
    pub fn play(&mut self, name: &str) -> bool {
        let Some(track) = self.registry.get(name) else {
            tracing::debug!(name, "unknown expression ignored");
            return false;
        };
        tracing::info!(name, fps = track.fps, frames = track.frame_count(), "expression started");
        self.cursor = Some(PlaybackCursor {
            name: name.to_string(),
            track,
            host_frame: 0,
        });
        true
    }

    /// Drop the active track; touched keys start relaxing on the next tick.
    pub fn stop(&mut self) {
        if let Some(cursor) = self.cursor.take() {
            tracing::info!(name = %cursor.name, "expression stopped");
        }
    }

    pub fn is_active(&self) -> bool {
        self.cursor.is_some()
    }

    /// Name of the active track.
    pub fn active(&self) -> Option<&str> {
        self.cursor.as_ref().map(|c| c.name.as_str())
    }

    pub fn cursor(&self) -> Option<&PlaybackCursor> {
        self.cursor.as_ref()
    }

    /// True when no track is playing and nothing is left to ease back to rest.
    pub fn is_settled(&self) -> bool {
        self.cursor.is_none() && self.touched.is_empty()
    }

    /// Advance one host tick.
    pub fn tick(&mut self, live: &mut LiveParameters, rest: &ParameterMap) -> SequencerStep {
        if let Some(cursor) = self.cursor.as_mut() {
            let index = track_frame_index(cursor.host_frame, cursor.track.fps, self.host_fps);
            match cursor.track.frame(index) {
                Some(frame) => {
                    for (key, value) in frame.iter() {
                        if live.write(MotionSource::Expression, key, value) {
                            self.touched.insert(key.to_string());
                        }
                    }
                    cursor.host_frame += 1;
                    return SequencerStep::Frame(index);
                }
                None => {
                    tracing::info!(
                        name = %cursor.name,
                        host_frames = cursor.host_frame,
                        "expression finished"
                    );
                    // Relaxation starts on the next tick.
                    self.cursor = None;
                    return SequencerStep::Finished;
                }
            }
        }
        self.relax(live, rest)
    }

    /// Ease every relaxing key toward its rest value.
    ///
    /// Settling only waits on keys a track wrote; idle motion keeps moving the others.
    fn relax(&mut self, live: &mut LiveParameters, rest: &ParameterMap) -> SequencerStep {
        let mut converged = true;
        for (key, target) in rest.iter() {
            if self.non_relaxing.contains(key) {
                continue;
            }
            let Some(current) = live.get(key) else {
                continue;
            };
            if current.is_nan() || current == target {
                continue;
            }
            if (current - target).abs() > RELAX_TOLERANCE && self.touched.contains(key) {
                converged = false;
            }
            live.write(
                MotionSource::Relax,
                key,
                current * (1.0 - RELAX_RATE) + target * RELAX_RATE,
            );
        }
        if self.touched.is_empty() {
            return SequencerStep::Settled;
        }
        if converged {
            tracing::debug!(keys = self.touched.len(), "relaxed to rest pose");
            self.touched.clear();
            SequencerStep::Settled
        } else {
            SequencerStep::Relaxing
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn rest() -> ParameterMap {
        [("ParamAngleX", 0.0), ("ParamEyeLOpen", 1.0), ("Param2", 0.0)]
            .into_iter()
            .collect()
    }

    /// Track whose frame `i` sets `ParamAngleX = i`.
    fn counting_track(fps: f32, frames: usize) -> ExpressionTrack {
        let frames = (0..frames)
            .map(|i| [("ParamAngleX", i as f32)].into_iter().collect())
            .collect();
        ExpressionTrack::new(fps, frames)
    }

    fn sequencer(host_fps: f32) -> ExpressionSequencer {
        let mut registry = ExpressionRegistry::new();
        registry.insert("wave", counting_track(30.0, 90)).unwrap();
        let pose: ParameterMap = [("ParamAngleX", 20.0), ("Param2", 1.0), ("ParamMissing", 3.0)]
            .into_iter()
            .collect();
        registry.insert("pose", ExpressionTrack::new(60.0, vec![pose])).unwrap();
        ExpressionSequencer::new(registry, host_fps, ["Param2".to_string()])
    }

    #[test]
    fn frame_index_is_floored() {
        assert_eq!(track_frame_index(0, 30.0, 60.0), 0);
        assert_eq!(track_frame_index(1, 30.0, 60.0), 0);
        assert_eq!(track_frame_index(3, 30.0, 60.0), 1);
        assert_eq!(track_frame_index(5, 24.0, 60.0), 2);
        assert_eq!(track_frame_index(7, 60.0, 60.0), 7);
        assert_eq!(track_frame_index(7, 0.0, 60.0), 0);
    }

    #[test]
    fn wave_visits_floor_frames_and_clears_at_tick_180() {
        let mut seq = sequencer(60.0);
        let rest = rest();
        let mut live = LiveParameters::from_rest(&rest);
        assert!(seq.play("wave"));
        for k in 0..180u64 {
            let step = seq.tick(&mut live, &rest);
            let expected = (k / 2) as usize;
            assert_eq!(step, SequencerStep::Frame(expected), "host tick {k}");
            assert_eq!(live.get("ParamAngleX"), Some(expected as f32));
            assert!(seq.is_active());
        }
        assert_eq!(seq.tick(&mut live, &rest), SequencerStep::Finished);
        assert!(!seq.is_active());
        assert_eq!(seq.active(), None);
        assert_eq!(seq.tick(&mut live, &rest), SequencerStep::Relaxing);
    }

    #[test]
    fn unknown_name_keeps_current_track() {
        let mut seq = sequencer(60.0);
        let rest = rest();
        let mut live = LiveParameters::from_rest(&rest);
        seq.play("wave");
        seq.tick(&mut live, &rest);
        seq.tick(&mut live, &rest);
        assert!(!seq.play("does-not-exist"));
        assert_eq!(seq.active(), Some("wave"));
        assert_eq!(seq.cursor().unwrap().host_frame, 2);
    }

    #[test]
    fn replay_restarts_cursor() {
        let mut seq = sequencer(60.0);
        let rest = rest();
        let mut live = LiveParameters::from_rest(&rest);
        seq.play("wave");
        for _ in 0..10 {
            seq.tick(&mut live, &rest);
        }
        seq.play("wave");
        assert_eq!(seq.tick(&mut live, &rest), SequencerStep::Frame(0));
    }

    #[test]
    fn frames_only_touch_defined_keys() {
        let mut seq = sequencer(60.0);
        let rest = rest();
        let mut live = LiveParameters::from_rest(&rest);
        seq.play("pose");
        seq.tick(&mut live, &rest);
        assert_eq!(live.get("ParamAngleX"), Some(20.0));
        assert_eq!(live.get("ParamEyeLOpen"), Some(1.0));
        assert_eq!(live.get("ParamMissing"), None);
        assert_eq!(live.owner("ParamAngleX"), Some(MotionSource::Expression));
    }

    #[test]
    fn relaxation_converges_and_skips_non_relaxing_keys() {
        let mut seq = sequencer(60.0);
        let rest = rest();
        let mut live = LiveParameters::from_rest(&rest);
        assert!(seq.is_settled());
        seq.play("pose");
        seq.tick(&mut live, &rest);
        assert_eq!(seq.tick(&mut live, &rest), SequencerStep::Finished);
        assert_eq!(live.get("ParamAngleX"), Some(20.0));
        assert!(!seq.is_settled());
        assert_eq!(seq.tick(&mut live, &rest), SequencerStep::Relaxing);
        assert!((live.get("ParamAngleX").unwrap() - 19.0).abs() < 1e-4);

        let mut ticks = 0;
        while seq.tick(&mut live, &rest) != SequencerStep::Settled {
            ticks += 1;
            assert!(ticks < 1000, "relaxation never converged");
        }
        assert!(seq.is_settled());
        assert!(live.get("ParamAngleX").unwrap().abs() <= RELAX_TOLERANCE);
        assert_eq!(live.get("Param2"), Some(1.0));
        assert_eq!(seq.tick(&mut live, &rest), SequencerStep::Settled);
    }

    #[test]
    fn stop_begins_relaxing() {
        let mut seq = sequencer(60.0);
        let rest = rest();
        let mut live = LiveParameters::from_rest(&rest);
        seq.play("wave");
        for _ in 0..40 {
            seq.tick(&mut live, &rest);
        }
        seq.stop();
        seq.stop();
        assert!(!seq.is_active());
        assert_eq!(seq.tick(&mut live, &rest), SequencerStep::Relaxing);
    }

    #[test]
    fn registry_rejects_invalid_tracks() {
        let mut registry = ExpressionRegistry::new();
        let err = registry
            .insert("empty", ExpressionTrack::new(30.0, Vec::new()))
            .unwrap_err();
        assert!(matches!(err, TrackError::Invalid { .. }));
        let err = registry
            .insert("still", counting_track(0.0, 4))
            .unwrap_err();
        assert!(err.to_string().contains("fps"));
        assert!(registry.is_empty());
    }

    #[test]
    fn registry_loads_track_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("smile.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, r#"{{"fps": 30, "data": [{{"ParamAngleX": 2.5}}]}}"#).unwrap();

        let mut registry = ExpressionRegistry::new();
        registry.load_file("smile", &path).unwrap();
        assert_eq!(registry.names(), vec!["smile"]);
        assert_eq!(registry.get("smile").unwrap().frame_count(), 1);

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "not json").unwrap();
        assert!(matches!(
            registry.load_file("bad", &bad),
            Err(TrackError::Json { .. })
        ));
        assert!(matches!(
            registry.load_file("gone", &dir.path().join("missing.json")),
            Err(TrackError::Io { .. })
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn untracked_keys_relax_without_holding_settle() {
        let mut seq = sequencer(60.0);
        let rest = rest();
        let mut live = LiveParameters::from_rest(&rest);
        live.write(MotionSource::Idle, "ParamEyeLOpen", -0.8);
        assert_eq!(seq.tick(&mut live, &rest), SequencerStep::Settled);
        assert!(seq.is_settled());
        let eye = live.get("ParamEyeLOpen").unwrap();
        assert!((eye - (-0.8 * 0.95 + 0.05)).abs() < 1e-5);
        assert_eq!(live.owner("ParamEyeLOpen"), Some(MotionSource::Relax));
        for _ in 0..200 {
            seq.tick(&mut live, &rest);
        }
        assert!((live.get("ParamEyeLOpen").unwrap() - 1.0).abs() <= RELAX_TOLERANCE);
    }
}
