use std::time::Duration;

use serde::Deserialize;

/// Engine tuning shared by the audio and animation stages.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub audio: AudioConfig,
    pub animation: AnimationConfig,
    pub params: ParameterNames,
}

/// Speech playback settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Operating sample rate of the playback buffer in Hz. Submitted audio is resampled to it.
    pub sample_rate: u32,
    /// Samples per output block; one loudness update per block.
    pub block_frames: usize,
    /// Upper bound on how long a completion waiter sleeps between checks.
    pub wait_poll_ms: u64,
}

impl Default for AudioConfig {
    /// 24 kHz mono TTS output with ~60 Hz blocks.
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            block_frames: 400,
            wait_poll_ms: 100,
        }
    }
}

impl AudioConfig {
    pub fn wait_poll(&self) -> Duration {
        Duration::from_millis(self.wait_poll_ms.max(1))
    }
}

/// Animation tick settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AnimationConfig {
    /// Host render/tick rate in frames per second.
    pub host_fps: f32,
    /// Seed for the idle behavior RNG. `None` seeds from entropy.
    pub seed: Option<u64>,
    /// Multiplier from loudness envelope to mouth-open value. The product is clamped to
    /// `[0, 1]` before it is written.
    pub lip_sync_gain: f32,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            host_fps: 60.0,
            seed: None,
            lip_sync_gain: 1.0,
        }
    }
}

impl AnimationConfig {
    /// Wall-clock length of one host tick.
    pub fn tick_period(&self) -> Duration {
        let fps = if self.host_fps.is_finite() && self.host_fps > 0.0 {
            self.host_fps
        } else {
            60.0
        };
        Duration::from_secs_f64(1.0 / fps as f64)
    }
}

/// Model parameter ids driven by the engine.
///
/// Defaults follow the Cubism 3 standard parameter names. Keys a particular model does not
/// define are skipped at write time.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ParameterNames {
    pub angle_x: String,
    pub angle_y: String,
    pub angle_z: String,
    pub eye_l_open: String,
    pub eye_r_open: String,
    pub breath: String,
    /// Every key that receives the lip-sync value.
    pub mouth: Vec<String>,
    /// Secondary-motion channels forced to zero while no expression is playing.
    pub auxiliary: Vec<String>,
    /// Keys that are left alone when relaxing back to the rest pose.
    pub non_relaxing: Vec<String>,
}

impl Default for ParameterNames {
    fn default() -> Self {
        Self {
            angle_x: "ParamAngleX".to_string(),
            angle_y: "ParamAngleY".to_string(),
            angle_z: "ParamAngleZ".to_string(),
            eye_l_open: "ParamEyeLOpen".to_string(),
            eye_r_open: "ParamEyeROpen".to_string(),
            breath: "ParamBreath".to_string(),
            mouth: vec![
                "PARAM_MOUTH_OPEN_Y".to_string(),
                "ParamMouthOpenY".to_string(),
                "ParamA".to_string(),
            ],
            auxiliary: vec!["Param2".to_string(), "Param3".to_string()],
            non_relaxing: vec!["Param2".to_string(), "Param3".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_period_falls_back_for_invalid_fps() {
        let mut anim = AnimationConfig::default();
        assert!((anim.tick_period().as_secs_f64() - 1.0 / 60.0).abs() < 1e-9);
        anim.host_fps = 0.0;
        assert!((anim.tick_period().as_secs_f64() - 1.0 / 60.0).abs() < 1e-9);
        anim.host_fps = 30.0;
        assert!((anim.tick_period().as_secs_f64() - 1.0 / 30.0).abs() < 1e-9);
    }

    #[test]
    fn wait_poll_never_zero() {
        let audio = AudioConfig {
            wait_poll_ms: 0,
            ..AudioConfig::default()
        };
        assert_eq!(audio.wait_poll(), Duration::from_millis(1));
    }

    #[test]
    fn default_blocks_run_near_sixty_hz() {
        let audio = AudioConfig::default();
        let hz = audio.sample_rate as f32 / audio.block_frames as f32;
        assert!((hz - 60.0).abs() < 1.0);
    }
}
