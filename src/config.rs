use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Number of raw RMS values the envelope remembers for its decay target.
pub const RMS_WINDOW_SIZE: usize = 30;
/// Fraction of the gap closed per frame when the input is louder than the envelope.
pub const ATTACK_FACTOR: f32 = 0.3;
/// Fraction of the gap to the window peak closed per frame otherwise.
pub const DECAY_FACTOR: f32 = 0.005;
/// Samples per analysis frame (one render quantum of the host audio clock).
pub const ANALYSIS_FRAME_SIZE: usize = 128;
/// Ceiling for the aggregate direction magnitude.
pub const MAX_MAGNITUDE: f32 = 3.0;
/// Upper bound of a track's radius on the dial.
pub const MAX_RADIUS: f32 = 3.0;

/// Attack/decay parameters of the envelope smoother.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingParams {
    pub window_size: usize,
    pub attack: f32,
    pub decay: f32,
}

impl Default for SmoothingParams {
    fn default() -> Self {
        Self {
            window_size: RMS_WINDOW_SIZE,
            attack: ATTACK_FACTOR,
            decay: DECAY_FACTOR,
        }
    }
}

/// All tunables of the radar core.
///
/// Loaded from JSON; any field missing from the file keeps its default, so a
/// file containing only `{ "smoothing": { "decay": 0.01 } }` is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadarConfig {
    pub smoothing: SmoothingParams,
    /// Analysis frame length in samples
    pub frame_size: usize,
    pub max_magnitude: f32,
    /// Radius given to freshly registered tracks
    pub default_radius: f32,
    pub max_radius: f32,
    /// Bounded capacity of the audio -> UI message channel
    pub channel_capacity: usize,
}

impl Default for RadarConfig {
    fn default() -> Self {
        Self {
            smoothing: SmoothingParams::default(),
            frame_size: ANALYSIS_FRAME_SIZE,
            max_magnitude: MAX_MAGNITUDE,
            default_radius: MAX_RADIUS,
            max_radius: MAX_RADIUS,
            channel_capacity: 1024,
        }
    }
}

impl RadarConfig {
    /// Load and validate a config file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save as pretty-printed JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write config {}", path.display()))?;
        Ok(())
    }

    /// Load from `path` when given, defaults otherwise.
    pub fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.smoothing;
        if s.window_size == 0 {
            anyhow::bail!("smoothing.window_size must be at least 1");
        }
        if !(s.attack > 0.0 && s.attack <= 1.0) {
            anyhow::bail!("smoothing.attack must be in (0, 1], got {}", s.attack);
        }
        if !(0.0..=1.0).contains(&s.decay) {
            anyhow::bail!("smoothing.decay must be in [0, 1], got {}", s.decay);
        }
        if self.frame_size == 0 {
            anyhow::bail!("frame_size must be at least 1");
        }
        if !(self.max_magnitude.is_finite() && self.max_magnitude > 0.0) {
            anyhow::bail!("max_magnitude must be a positive number, got {}", self.max_magnitude);
        }
        if !(self.max_radius.is_finite() && self.max_radius >= 0.0) {
            anyhow::bail!("max_radius must be a non-negative number, got {}", self.max_radius);
        }
        if !(0.0..=self.max_radius).contains(&self.default_radius) {
            anyhow::bail!(
                "default_radius must be within [0, {}], got {}",
                self.max_radius,
                self.default_radius
            );
        }
        if self.channel_capacity == 0 {
            anyhow::bail!("channel_capacity must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_constants() {
        let config = RadarConfig::default();
        assert_eq!(config.smoothing.window_size, 30);
        assert_eq!(config.smoothing.attack, 0.3);
        assert_eq!(config.smoothing.decay, 0.005);
        assert_eq!(config.frame_size, 128);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: RadarConfig =
            serde_json::from_str(r#"{ "smoothing": { "decay": 0.01 }, "max_magnitude": 2.0 }"#).unwrap();
        assert_eq!(config.smoothing.decay, 0.01);
        assert_eq!(config.smoothing.attack, ATTACK_FACTOR);
        assert_eq!(config.smoothing.window_size, RMS_WINDOW_SIZE);
        assert_eq!(config.max_magnitude, 2.0);
        assert_eq!(config.frame_size, ANALYSIS_FRAME_SIZE);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = RadarConfig::default();
        config.smoothing.attack = 0.0;
        assert!(config.validate().is_err());

        let mut config = RadarConfig::default();
        config.smoothing.window_size = 0;
        assert!(config.validate().is_err());

        let mut config = RadarConfig::default();
        config.max_magnitude = f32::NAN;
        assert!(config.validate().is_err());

        let mut config = RadarConfig::default();
        config.default_radius = 4.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_then_load() {
        let path = std::env::temp_dir().join(format!("dragon_radar_config_{}.json", std::process::id()));
        let mut config = RadarConfig::default();
        config.smoothing.decay = 0.02;
        config.max_magnitude = 1.5;
        config.save(&path).unwrap();

        let loaded = RadarConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_load_missing_file_is_error() {
        let path = std::env::temp_dir().join("dragon_radar_missing_config.json");
        assert!(RadarConfig::load(&path).is_err());
        assert_eq!(RadarConfig::load_or_default(None::<&Path>).unwrap(), RadarConfig::default());
    }
}
