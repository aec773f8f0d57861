//! Engine state and the per-render-frame hook.
//!
//! [`PetEngine`] owns everything the animation needs between ticks. The renderer is reached
//! only through [`ModelParameters`]: read the model's default values once, then set named
//! parameters every frame.

use std::sync::Arc;

use pet_types::ParameterMap;

use crate::blend::ParameterBlender;
use crate::config::EngineConfig;
use crate::expression::ExpressionRegistry;
use crate::gesture::{ExpressionDispatch, GestureBook, MotionRef};
use crate::status::EngineStatus;
use crate::stream::StreamingAudioPlayer;

/// The renderer-side model.
pub trait ModelParameters {
    /// Default value of every parameter the model defines.
    fn parameter_defaults(&self) -> ParameterMap;
    /// Set one named parameter for the next rendered frame.
    fn set_parameter(&mut self, id: &str, value: f32);
}

pub struct PetEngine {
    player: Arc<StreamingAudioPlayer>,
    blender: ParameterBlender,
    gestures: GestureBook,
}

impl PetEngine {
    pub fn new(config: &EngineConfig, registry: ExpressionRegistry, gestures: GestureBook) -> Self {
        let player = Arc::new(StreamingAudioPlayer::new(&config.audio));
        Self::with_player(config, player, registry, gestures)
    }

    /// Build around an existing player (shared with an output stage already running).
    pub fn with_player(
        config: &EngineConfig,
        player: Arc<StreamingAudioPlayer>,
        registry: ExpressionRegistry,
        gestures: GestureBook,
    ) -> Self {
        tracing::info!(
            expressions = registry.len(),
            native_expressions = gestures.native_expressions.len(),
            motions = gestures.motions.len(),
            host_fps = config.animation.host_fps,
            "engine ready"
        );
        Self {
            player,
            blender: ParameterBlender::new(&config.animation, config.params.clone(), registry),
            gestures,
        }
    }

    pub fn player(&self) -> &Arc<StreamingAudioPlayer> {
        &self.player
    }

    pub fn blender(&self) -> &ParameterBlender {
        &self.blender
    }

    /// Per-frame hook: blend this tick's parameters and push them into `model`.
    ///
    /// Values that are not finite are never pushed. Returns how many parameters were set.
    pub fn tick(&mut self, now_ms: f64, model: &mut dyn ModelParameters) -> usize {
        let loudness = self.player.loudness();
        let values = self
            .blender
            .tick(now_ms, loudness, || model.parameter_defaults());
        let mut pushed = 0;
        for (id, value) in values.iter() {
            if value.is_finite() {
                model.set_parameter(id, value);
                pushed += 1;
            }
        }
        pushed
    }

    /// Start a recorded track by name. Unknown names are ignored.
    pub fn play(&mut self, name: &str) -> bool {
        self.blender.sequencer_mut().play(name)
    }

    /// Stop the recorded track, if any; the pose eases back to rest.
    pub fn stop_expression(&mut self) {
        self.blender.sequencer_mut().stop();
    }

    /// Resolve an expression name: renderer-native first, then recorded tracks.
    pub fn set_expression(&mut self, name: &str) -> ExpressionDispatch {
        self.gestures
            .dispatch_expression(name, self.blender.sequencer_mut())
    }

    /// Look up a renderer motion by name. Unknown names yield `None`.
    pub fn launch_motion(&self, name: &str) -> Option<MotionRef> {
        let motion = self.gestures.motion(name).cloned();
        match &motion {
            Some(m) => tracing::info!(name, group = %m.group, order = m.order, "motion"),
            None => tracing::debug!(name, "unknown motion ignored"),
        }
        motion
    }

    pub fn focus_target(&self) -> (f32, f32) {
        self.blender.focus_target()
    }

    pub fn is_settled(&self) -> bool {
        self.blender.sequencer().is_settled()
    }

    pub fn status(&self) -> EngineStatus {
        let sequencer = self.blender.sequencer();
        EngineStatus {
            stream: self.player.status(),
            expression: sequencer.active().map(str::to_string),
            expression_frame: sequencer.cursor().map(|c| c.host_frame),
            idle_state: self.blender.idle().state(),
            settled: sequencer.is_settled(),
            rest_captured: self.blender.rest_pose().is_some(),
            focus: self.blender.focus_target(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AnimationConfig, AudioConfig};
    use crate::testutil::pcm16_sine_wav;
    use pet_types::ExpressionTrack;
    use std::collections::BTreeMap;

    struct FakeModel {
        defaults: ParameterMap,
        set: BTreeMap<String, f32>,
    }

    impl ModelParameters for FakeModel {
        fn parameter_defaults(&self) -> ParameterMap {
            self.defaults.clone()
        }

        fn set_parameter(&mut self, id: &str, value: f32) {
            self.set.insert(id.to_string(), value);
        }
    }

    impl FakeModel {
        fn cubism() -> Self {
            Self {
                defaults: [
                    ("ParamAngleX", 0.0),
                    ("ParamAngleY", 0.0),
                    ("ParamAngleZ", 0.0),
                    ("ParamEyeLOpen", 1.0),
                    ("ParamEyeROpen", 1.0),
                    ("ParamBreath", 0.0),
                    ("ParamMouthOpenY", 0.0),
                    ("Param2", 0.0),
                    ("ParamBroken", f32::NAN),
                ]
                .into_iter()
                .collect(),
                set: BTreeMap::new(),
            }
        }
    }

    fn config() -> EngineConfig {
        EngineConfig {
            audio: AudioConfig {
                sample_rate: 24_000,
                block_frames: 400,
                wait_poll_ms: 10,
            },
            animation: AnimationConfig {
                seed: Some(42),
                ..AnimationConfig::default()
            },
            ..EngineConfig::default()
        }
    }

    fn engine() -> PetEngine {
        let mut registry = ExpressionRegistry::new();
        let frames = (0..90)
            .map(|i| [("ParamAngleX", i as f32 / 3.0)].into_iter().collect())
            .collect();
        registry
            .insert("wave", ExpressionTrack::new(30.0, frames))
            .unwrap();
        let gestures: GestureBook = toml::from_str(
            r#"
                native_expressions = { happy = 1 }
                motions = { bow = { group = "idle", order = 3 } }
            "#,
        )
        .unwrap();
        PetEngine::new(&config(), registry, gestures)
    }

    fn host_ms(k: u64) -> f64 {
        k as f64 * 1000.0 / 60.0
    }

    #[test]
    fn tick_pushes_finite_values_only() {
        let mut engine = engine();
        let mut model = FakeModel::cubism();
        let pushed = engine.tick(0.0, &mut model);
        assert_eq!(pushed, 8);
        assert!(!model.set.contains_key("ParamBroken"));
        assert!(model.set.values().all(|v| v.is_finite()));
        assert!(engine.status().rest_captured);
    }

    #[test]
    fn wave_track_clears_at_host_tick_180() {
        let mut engine = engine();
        let mut model = FakeModel::cubism();
        assert!(engine.play("wave"));
        for k in 0..180 {
            engine.tick(host_ms(k), &mut model);
            assert_eq!(engine.status().expression.as_deref(), Some("wave"), "tick {k}");
        }
        engine.tick(host_ms(180), &mut model);
        assert_eq!(engine.status().expression, None);
        assert!(!engine.is_settled());
    }

    #[test]
    fn speech_drives_mouth() {
        let mut engine = engine();
        let mut model = FakeModel::cubism();
        let player = engine.player().clone();
        player.start_stream();
        let id = player
            .add_segment(&pcm16_sine_wav(440.0, 24_000, 0.5, 0.5))
            .unwrap();
        assert_eq!(id, 1);

        let mut block = vec![0.0f32; player.block_frames()];
        player.fill_block(&mut block);
        engine.tick(16.0, &mut model);
        let open = model.set["ParamMouthOpenY"];
        assert!(open > 0.0 && open <= 1.0);

        for _ in 0..60 {
            player.fill_block(&mut block);
        }
        engine.tick(32.0, &mut model);
        assert!(model.set["ParamMouthOpenY"] < 1e-3);
    }

    #[test]
    fn expression_and_motion_lookup() {
        let mut engine = engine();
        assert_eq!(engine.set_expression("happy"), ExpressionDispatch::Native(1));
        assert_eq!(engine.set_expression("wave"), ExpressionDispatch::Recorded);
        assert_eq!(engine.set_expression("nope"), ExpressionDispatch::Ignored);
        assert_eq!(engine.status().expression.as_deref(), Some("wave"));
        assert_eq!(
            engine.launch_motion("bow"),
            Some(MotionRef {
                group: "idle".into(),
                order: 3
            })
        );
        assert_eq!(engine.launch_motion("dance"), None);
        engine.stop_expression();
        assert_eq!(engine.status().expression, None);
    }

    #[test]
    fn status_reports_stream_and_focus() {
        let mut engine = engine();
        let mut model = FakeModel::cubism();
        engine.play("wave");
        for k in 0..100 {
            engine.tick(host_ms(k), &mut model);
        }
        let status = engine.status();
        assert_eq!(status.expression_frame, Some(100));
        assert_eq!(status.stream.sample_rate, 24_000);
        // Frame floor(99 / 2) = 49 sets ParamAngleX to 49 / 3.
        assert!((status.focus.0 - 49.0 / 3.0 / 30.0).abs() < 1e-5);
    }
}
