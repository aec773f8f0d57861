//! Configuration loading and parsing.
//!
//! One TOML file describes the engine tuning, the model's parameter table, and the gesture
//! tables. Recorded track paths are resolved relative to the config file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::cli::Args;
use pet_engine::config::{AnimationConfig, AudioConfig, EngineConfig, ParameterNames};
use pet_engine::expression::ExpressionRegistry;
use pet_engine::gesture::{GestureBook, MotionRef};
use pet_types::ParameterMap;

/// Top-level pet configuration loaded from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PetConfig {
    /// Output device substring match.
    pub device: Option<String>,
    pub audio: AudioConfig,
    pub animation: AnimationConfig,
    pub params: ParameterNames,
    /// Model parameter defaults for the headless model (parameter id -> rest value).
    pub model: Option<ParameterMap>,
    /// Recorded expression tracks.
    pub expressions: Vec<ExpressionEntry>,
    /// Renderer-native expression name -> expression index.
    pub native_expressions: HashMap<String, u32>,
    /// Renderer motion name -> group and order.
    pub motions: HashMap<String, MotionRef>,
    /// Directory relative track paths resolve against. Set by [`PetConfig::load`].
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// A recorded expression track file.
#[derive(Clone, Debug, Deserialize)]
pub struct ExpressionEntry {
    pub name: String,
    pub path: PathBuf,
}

impl PetConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let mut cfg =
            toml::from_str::<PetConfig>(&raw).with_context(|| format!("parse config {:?}", path))?;
        cfg.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(cfg)
    }

    /// Load `--config` if given, else defaults; then apply command-line overrides.
    pub fn from_args(args: &Args) -> Result<Self> {
        let mut cfg = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        cfg.apply_overrides(args);
        Ok(cfg)
    }

    pub fn apply_overrides(&mut self, args: &Args) {
        if let Some(device) = normalize_device_name(args.device.clone()) {
            self.device = Some(device);
        }
        if let Some(rate) = args.sample_rate {
            self.audio.sample_rate = rate;
        }
        if let Some(frames) = args.block_frames {
            self.audio.block_frames = frames;
        }
        if let Some(seed) = args.seed {
            self.animation.seed = Some(seed);
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            audio: self.audio.clone(),
            animation: self.animation.clone(),
            params: self.params.clone(),
        }
    }

    pub fn gestures(&self) -> GestureBook {
        GestureBook {
            native_expressions: self.native_expressions.clone(),
            motions: self.motions.clone(),
        }
    }

    /// Load every configured track. Any failure aborts startup.
    pub fn load_registry(&self) -> Result<ExpressionRegistry> {
        let mut registry = ExpressionRegistry::new();
        for entry in &self.expressions {
            let path = self.resolve_path(&entry.path);
            registry
                .load_file(entry.name.clone(), &path)
                .with_context(|| format!("load expression '{}'", entry.name))?;
        }
        Ok(registry)
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    const SAMPLE: &str = r#"
device = "Speakers"

[audio]
sample_rate = 48000

[animation]
host_fps = 30
seed = 3

[params]
mouth = ["ParamMouthOpenY"]

[model]
ParamAngleX = 0.0
ParamMouthOpenY = 0.0

[[expressions]]
name = "wave"
path = "tracks/wave.json"

[native_expressions]
happy = 1

[motions.bow]
group = "idle"
order = 2
"#;

    fn write_sample(dir: &Path) -> PathBuf {
        std::fs::create_dir_all(dir.join("tracks")).unwrap();
        std::fs::write(
            dir.join("tracks/wave.json"),
            r#"{"fps": 30, "data": [{"ParamAngleX": 4.0}, {"ParamAngleX": 8.0}]}"#,
        )
        .unwrap();
        let path = dir.join("pet.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        path
    }

    #[test]
    fn loads_sections_and_resolves_tracks() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = PetConfig::load(&write_sample(dir.path())).unwrap();
        assert_eq!(cfg.device.as_deref(), Some("Speakers"));
        assert_eq!(cfg.audio.sample_rate, 48_000);
        assert_eq!(cfg.audio.block_frames, AudioConfig::default().block_frames);
        assert_eq!(cfg.animation.host_fps, 30.0);
        assert_eq!(cfg.params.mouth, vec!["ParamMouthOpenY".to_string()]);
        assert_eq!(cfg.params.angle_x, "ParamAngleX");
        assert_eq!(cfg.model.as_ref().unwrap().len(), 2);

        let registry = cfg.load_registry().unwrap();
        assert_eq!(registry.get("wave").unwrap().frame_count(), 2);
        assert_eq!(cfg.gestures().native_expression("happy"), Some(1));
        assert_eq!(cfg.gestures().motion("bow").unwrap().order, 2);
    }

    #[test]
    fn missing_track_fails_with_context() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(dir.path());
        std::fs::remove_file(dir.path().join("tracks/wave.json")).unwrap();
        let cfg = PetConfig::load(&path).unwrap();
        let err = cfg.load_registry().unwrap_err();
        assert!(format!("{err:#}").contains("load expression 'wave'"));
    }

    #[test]
    fn cli_overrides_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(dir.path());
        let path_arg = path.to_string_lossy().to_string();
        let args = Args::parse_from([
            "pet",
            "--config",
            path_arg.as_str(),
            "--device",
            "  ",
            "--sample-rate",
            "16000",
            "--seed",
            "11",
        ]);
        let cfg = PetConfig::from_args(&args).unwrap();
        assert_eq!(cfg.device.as_deref(), Some("Speakers"));
        assert_eq!(cfg.audio.sample_rate, 16_000);
        assert_eq!(cfg.engine_config().animation.seed, Some(11));
    }

    #[test]
    fn bad_toml_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[audio\nsample_rate = ").unwrap();
        let err = PetConfig::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("parse config"));
    }

    #[test]
    fn normalize_device_name_trims_and_drops_empty() {
        assert_eq!(normalize_device_name(None), None);
        assert_eq!(normalize_device_name(Some(" ".to_string())), None);
        assert_eq!(
            normalize_device_name(Some(" USB ".to_string())),
            Some("USB".to_string())
        );
    }
}
