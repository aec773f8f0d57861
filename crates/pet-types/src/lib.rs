use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Named parameter values handed to the model renderer each frame.
///
/// Keys are the model's own parameter ids (for example `ParamAngleX`). The map is ordered so
/// serialized frames are stable across runs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterMap(BTreeMap<String, f32>);

impl ParameterMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value for `key`, if the key is present.
    pub fn get(&self, key: &str) -> Option<f32> {
        self.0.get(key).copied()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Insert or replace a key unconditionally.
    ///
    /// Used when building a vocabulary (model defaults, recorded frames). Runtime writers go
    /// through [`ParameterMap::set`] so they can never introduce new keys.
    pub fn insert(&mut self, key: impl Into<String>, value: f32) -> Option<f32> {
        self.0.insert(key.into(), value)
    }

    /// Overwrite an existing key. Returns `false` (and leaves the map untouched) when the key
    /// is not part of the vocabulary.
    pub fn set(&mut self, key: &str, value: f32) -> bool {
        match self.0.get_mut(key) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, f32)> for ParameterMap {
    fn from_iter<I: IntoIterator<Item = (K, f32)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// A recorded, fixed-fps sequence of parameter frames (face-capture expression file).
///
/// On disk this is JSON: `{ "fps": 30, "data": [ { "ParamAngleX": 1.5, ... }, ... ] }`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExpressionTrack {
    /// Authoring frame rate.
    pub fps: f32,
    /// Frames in playback order.
    #[serde(rename = "data")]
    pub frames: Vec<ParameterMap>,
}

impl ExpressionTrack {
    pub fn new(fps: f32, frames: Vec<ParameterMap>) -> Self {
        Self { fps, frames }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn frame(&self, index: usize) -> Option<&ParameterMap> {
        self.frames.get(index)
    }

    /// Length in seconds at the authoring frame rate.
    pub fn duration_secs(&self) -> f32 {
        if self.fps > 0.0 {
            self.frames.len() as f32 / self.fps
        } else {
            0.0
        }
    }
}

/// Which producer wrote a parameter during the current tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionSource {
    /// Value left over from the rest pose or an earlier tick.
    Rest,
    /// Continuous breathing cycle.
    Breath,
    /// Idle behavior state machine.
    Idle,
    /// Frame of a recorded expression track.
    Expression,
    /// Relaxation back toward the rest pose after a track ended.
    Relax,
    /// Auxiliary channel forced to zero while idle.
    Suppressed,
    /// Mouth-open value driven by audio loudness.
    LipSync,
}

/// Lifecycle of the streaming speech player.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    #[default]
    Idle,
    Streaming,
    Paused,
    Stopped,
}

/// Snapshot of the speech stream reported by the host.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamStatus {
    pub state: StreamState,
    /// Operating sample rate in Hz.
    pub sample_rate: u32,
    /// Seconds of audio accepted so far.
    pub buffered_secs: f64,
    /// Seconds already handed to the output callback.
    pub played_secs: f64,
    /// Number of live segment records.
    pub segments: usize,
    /// Most recent loudness envelope value.
    pub loudness: f32,
}
