use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, MacroResult},
    global_event::{
        player::PlaybackOptions,
        throttle::{DEFAULT_MIN_DISTANCE, DEFAULT_MIN_INTERVAL, MoveThrottle},
    },
    hotkey::HotkeyBindings,
};

pub const APP_DIR: &str = "replaykey";
const CONFIG_FILE: &str = "config.json";

pub fn app_dir() -> MacroResult<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR))
        .ok_or_else(|| Error::Config("no configuration directory on this platform".into()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub track_mouse: bool,
    pub track_keys: bool,
    pub move_min_interval_ms: u64,
    pub move_min_distance: f64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            track_mouse: true,
            track_keys: true,
            move_min_interval_ms: DEFAULT_MIN_INTERVAL.as_millis() as u64,
            move_min_distance: DEFAULT_MIN_DISTANCE,
        }
    }
}

impl CaptureSettings {
    pub fn throttle(&self) -> MoveThrottle {
        MoveThrottle::new(
            Duration::from_millis(self.move_min_interval_ms),
            self.move_min_distance,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackDefaults {
    pub speed: f64,
    /// Zero repeats until cancelled.
    pub loops: u32,
    pub jitter_radius: f64,
}

impl Default for PlaybackDefaults {
    fn default() -> Self {
        Self {
            speed: 1.0,
            loops: 1,
            jitter_radius: 0.0,
        }
    }
}

impl From<&PlaybackDefaults> for PlaybackOptions {
    fn from(defaults: &PlaybackDefaults) -> Self {
        PlaybackOptions {
            speed: defaults.speed,
            loops: defaults.loops,
            jitter_radius: defaults.jitter_radius,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub hotkeys: HotkeyBindings,
    pub playback: PlaybackDefaults,
    pub capture: CaptureSettings,
}

impl Config {
    pub fn default_path() -> MacroResult<PathBuf> {
        Ok(app_dir()?.join(CONFIG_FILE))
    }

    pub fn load() -> MacroResult<Self> {
        Self::load_from(Self::default_path()?)
    }

    /// Missing file yields defaults, missing fields are filled from defaults.
    pub fn load_from(path: impl AsRef<Path>) -> MacroResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("Config: {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let data = fs::read(path)?;
        let config: Config = serde_json::from_slice(&data)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        info!("Config: loaded {}", path.display());
        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> MacroResult<()> {
        let path = path.as_ref();
        self.validate()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data =
            serde_json::to_vec_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        fs::write(path, data)?;
        info!("Config: saved {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> MacroResult<()> {
        self.hotkeys.validate()?;
        PlaybackOptions::from(&self.playback).validate()?;
        if self.capture.move_min_distance.is_nan() || self.capture.move_min_distance < 0.0 {
            return Err(Error::Config(format!(
                "move_min_distance must be non-negative, got {}",
                self.capture.move_min_distance
            )));
        }
        Ok(())
    }
}
