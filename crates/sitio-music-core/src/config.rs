//! Engine configuration.
//!
//! Loaded from TOML; every field has a default so partial files work.
//! The host decides where the file lives.

use crate::error::ConfigError;
use crate::theory::{PitchClass, Scale};
use crate::timing::LatencyCompensation;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default lookahead window for the scheduler.
pub const DEFAULT_LOOKAHEAD_MS: u64 = 250;

/// Default scsynth-compatible server address.
pub const DEFAULT_OSC_ADDR: &str = "127.0.0.1:57110";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Master switch for background music and sound effects.
    pub music_enabled: bool,
    /// Root of the major scale the game plays in, e.g. "G".
    pub scale_root: String,
    /// How far ahead of the transport notes are sent, in milliseconds.
    pub lookahead_ms: u64,
    /// Seed for the humanization RNG.
    pub seed: u64,
    /// Directory holding sampled instruments (`<dir>/<instrument>/<note>.wav`).
    pub soundfont_dir: Option<PathBuf>,
    /// Synthesis server address for live playback.
    pub osc_addr: String,
    pub latency: LatencyCompensation,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            music_enabled: true,
            scale_root: "G".to_string(),
            lookahead_ms: DEFAULT_LOOKAHEAD_MS,
            seed: 0x5171_0da1,
            soundfont_dir: None,
            osc_addr: DEFAULT_OSC_ADDR.to_string(),
            latency: LatencyCompensation::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document and validate it.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::Invalid(format!(
                "Config file not found at {:?}",
                path
            )));
        }
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load from a file, falling back to defaults on any error.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load_from(path) {
            Ok(config) => config,
            Err(e) => {
                log::debug!("[CONFIG] Using defaults: {}", e);
                Self::default()
            }
        }
    }

    /// Write as pretty TOML, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if PitchClass::parse(&self.scale_root).is_none() {
            return Err(ConfigError::Invalid(format!(
                "scale_root '{}' is not a note name",
                self.scale_root
            )));
        }
        if self.lookahead_ms == 0 {
            return Err(ConfigError::Invalid(
                "lookahead_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// The major scale rooted on `scale_root` (G major if unparsable).
    pub fn scale(&self) -> Scale {
        PitchClass::parse(&self.scale_root)
            .map(Scale::major)
            .unwrap_or_default()
    }

    /// Commented template written by `init`.
    pub fn template() -> &'static str {
        r#"# sitio-music configuration file

# Master switch for background music and sound effects
music_enabled = true

# Root of the major scale (the game plays in G)
scale_root = "G"

# Scheduler lookahead in milliseconds
lookahead_ms = 250

# Seed for strum humanization
seed = 1366363553

# Directory with sampled instruments: <dir>/guitar/C4.wav, <dir>/flute/C5.wav, ...
# soundfont_dir = "/usr/share/sitio-music/samples"

# Synthesis server (scsynth) address for live playback
osc_addr = "127.0.0.1:57110"

[latency]
network_latency_ms = 20.0
server_processing_ms = 10.0
audio_buffer_ms = 2.0
safety_margin_ms = 20.0
"#
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config = EngineConfig::from_toml_str("scale_root = \"D\"\n").unwrap();
        assert_eq!(config.scale_root, "D");
        assert_eq!(config.lookahead_ms, DEFAULT_LOOKAHEAD_MS);
        assert!(config.music_enabled);
        assert_eq!(config.scale().root(), PitchClass::D);
    }

    #[test]
    fn test_template_parses_to_defaults() {
        let config = EngineConfig::from_toml_str(EngineConfig::template()).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(EngineConfig::from_toml_str("scale_root = \"X\"").is_err());
        assert!(EngineConfig::from_toml_str("lookahead_ms = 0").is_err());
        assert!(EngineConfig::from_toml_str("lookahead_ms = \"soon\"").is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = EngineConfig::default();
        config.music_enabled = false;
        config.soundfont_dir = Some(PathBuf::from("/tmp/samples"));
        config.save_to(&path).unwrap();

        assert_eq!(EngineConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(EngineConfig::load_from(&path).is_err());
        assert_eq!(EngineConfig::load_or_default(&path), EngineConfig::default());
    }
}
