//! Per-tick parameter blend.
//!
//! The blender is the only producer of the map the renderer reads. Each tick it runs the
//! motion sources in priority order; the last writer of a key wins and is recorded as that
//! key's owner for the tick:
//!
//! 1. breathing
//! 2. idle behavior (only while no expression track is active)
//! 3. expression track frame, or, with no track active, relaxation toward the rest pose
//! 4. breathing again, so a recorded frame never freezes it
//! 5. auxiliary channels forced to zero while idle
//! 6. audio-driven mouth opening

use std::collections::BTreeMap;
use std::f64::consts::TAU;

use pet_types::{MotionSource, ParameterMap};

use crate::config::{AnimationConfig, ParameterNames};
use crate::expression::{ExpressionRegistry, ExpressionSequencer};
use crate::idle::IdleMotion;

const BREATH_CYCLE_MS: f64 = 3000.0;

/// Breathing value at `now_ms`: `0.5 + 0.6 * sin(2π t / 3 s)`.
pub fn breath_value(now_ms: f64) -> f32 {
    (0.5 + 0.6 * (now_ms / BREATH_CYCLE_MS * TAU).sin()) as f32
}

/// Mouth-open value for a loudness envelope reading.
pub fn lip_sync_value(loudness: f32, gain: f32) -> f32 {
    let v = loudness * gain;
    if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 }
}

/// Live parameter values plus the source that last wrote each key this tick.
#[derive(Clone, Debug, Default)]
pub struct LiveParameters {
    values: ParameterMap,
    owners: BTreeMap<String, MotionSource>,
}

impl LiveParameters {
    /// Start from the rest pose; the rest pose also fixes the key vocabulary.
    pub fn from_rest(rest: &ParameterMap) -> Self {
        Self {
            values: rest.clone(),
            owners: BTreeMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<f32> {
        self.values.get(key)
    }

    /// Write `value` to `key` on behalf of `source`. Keys the model does not define are
    /// ignored and `false` is returned.
    pub fn write(&mut self, source: MotionSource, key: &str, value: f32) -> bool {
        if !self.values.set(key, value) {
            return false;
        }
        match self.owners.get_mut(key) {
            Some(owner) => *owner = source,
            None => {
                self.owners.insert(key.to_string(), source);
            }
        }
        true
    }

    /// Source that last wrote `key` this tick, if any.
    pub fn owner(&self, key: &str) -> Option<MotionSource> {
        self.owners.get(key).copied()
    }

    pub fn owners(&self) -> &BTreeMap<String, MotionSource> {
        &self.owners
    }

    pub fn values(&self) -> &ParameterMap {
        &self.values
    }

    fn begin_tick(&mut self) {
        self.owners.clear();
    }
}

/// Merges breathing, idle motion, expression playback and lip sync into one parameter map.
#[derive(Debug)]
pub struct ParameterBlender {
    names: ParameterNames,
    lip_sync_gain: f32,
    rest: Option<ParameterMap>,
    live: LiveParameters,
    idle: IdleMotion,
    sequencer: ExpressionSequencer,
}

impl ParameterBlender {
    pub fn new(
        animation: &AnimationConfig,
        names: ParameterNames,
        registry: ExpressionRegistry,
    ) -> Self {
        let idle = match animation.seed {
            Some(seed) => IdleMotion::with_seed(seed, 0.0),
            None => IdleMotion::new(0.0),
        };
        // Breath and mouth are rewritten every tick by their own sources.
        let non_relaxing = names
            .non_relaxing
            .iter()
            .chain(&names.mouth)
            .chain(std::iter::once(&names.breath))
            .cloned();
        let sequencer = ExpressionSequencer::new(registry, animation.host_fps, non_relaxing);
        Self {
            names,
            lip_sync_gain: animation.lip_sync_gain,
            rest: None,
            live: LiveParameters::default(),
            idle,
            sequencer,
        }
    }

    /// Rest pose captured on the first tick, if it has happened.
    pub fn rest_pose(&self) -> Option<&ParameterMap> {
        self.rest.as_ref()
    }

    pub fn live(&self) -> &LiveParameters {
        &self.live
    }

    pub fn idle(&self) -> &IdleMotion {
        &self.idle
    }

    pub fn sequencer(&self) -> &ExpressionSequencer {
        &self.sequencer
    }

    pub fn sequencer_mut(&mut self) -> &mut ExpressionSequencer {
        &mut self.sequencer
    }

    /// Run one host tick and return the blended map.
    ///
    /// `defaults` is called once, on the first tick, to capture the rest pose.
    pub fn tick(
        &mut self,
        now_ms: f64,
        loudness: f32,
        defaults: impl FnOnce() -> ParameterMap,
    ) -> &ParameterMap {
        if self.rest.is_none() {
            let rest = defaults();
            tracing::info!(parameters = rest.len(), "rest pose captured");
            self.live = LiveParameters::from_rest(&rest);
            self.rest = Some(rest);
        }
        let Some(rest) = self.rest.as_ref() else {
            return self.live.values();
        };

        self.live.begin_tick();
        let breath = breath_value(now_ms);
        self.live.write(MotionSource::Breath, &self.names.breath, breath);

        self.idle.advance(now_ms);
        if !self.sequencer.is_active() {
            self.idle.apply(now_ms, &mut self.live, &self.names);
        }

        self.sequencer.tick(&mut self.live, rest);
        self.live.write(MotionSource::Breath, &self.names.breath, breath);

        if !self.sequencer.is_active() {
            for key in &self.names.auxiliary {
                self.live.write(MotionSource::Suppressed, key, 0.0);
            }
        }

        let mouth = lip_sync_value(loudness, self.lip_sync_gain);
        for key in &self.names.mouth {
            self.live.write(MotionSource::LipSync, key, mouth);
        }

        self.live.values()
    }

    /// Gaze target for the renderer's focus controller: head angles scaled to `[-1, 1]`.
    pub fn focus_target(&self) -> (f32, f32) {
        let axis = |key: &str| {
            self.live
                .get(key)
                .filter(|v| v.is_finite())
                .map(|v| v / 30.0)
                .unwrap_or(0.0)
        };
        (axis(&self.names.angle_x), axis(&self.names.angle_y))
    }
}
