//! Playback configuration loading
//!
//! Resolution priority: explicit path argument, then the `JUKEBOT_CONFIG`
//! environment variable, then the per-user config directory, then compiled
//! defaults.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_ENV_VAR: &str = "JUKEBOT_CONFIG";

/// Tunables of the playback pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Lower clamp applied to the player volume right after a song starts
    pub volume_min: f32,

    /// Upper clamp applied to the player volume right after a song starts
    pub volume_max: f32,

    /// Seconds before the projected end of the current song at which
    /// preparation of the next song should begin work
    pub prefetch_lead_secs: u64,

    /// Start playback automatically when something is enqueued onto an
    /// idle queue
    pub auto_start_playing: bool,

    /// Broadcast channel capacity for playback events
    pub event_capacity: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            volume_min: 0.0,
            volume_max: 1.0,
            prefetch_lead_secs: 30,
            auto_start_playing: true,
            event_capacity: 1000,
        }
    }
}

impl PlaybackConfig {
    /// The prefetch lead as a [`Duration`].
    pub fn prefetch_lead(&self) -> Duration {
        Duration::from_secs(self.prefetch_lead_secs)
    }

    /// Load configuration, falling back to defaults when no file is found.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match resolve_config_path(path) {
            Some(path) => Self::from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load and validate configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PlaybackConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.volume_min) || !(0.0..=1.0).contains(&self.volume_max) {
            return Err(Error::Config(
                "volume bounds must lie within [0.0, 1.0]".to_string(),
            ));
        }
        if self.volume_min > self.volume_max {
            return Err(Error::Config(format!(
                "volume_min ({}) exceeds volume_max ({})",
                self.volume_min, self.volume_max
            )));
        }
        if self.event_capacity == 0 {
            return Err(Error::Config("event_capacity must be nonzero".to_string()));
        }
        Ok(())
    }
}

fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        return Some(PathBuf::from(path));
    }
    let user_config = dirs::config_dir().map(|d| d.join("jukebot").join("config.toml"));
    match user_config {
        Some(path) if path.exists() => Some(path),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = PlaybackConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.prefetch_lead(), Duration::from_secs(30));
    }

    #[test]
    fn loads_partial_file_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "prefetch_lead_secs = 10").unwrap();
        writeln!(file, "auto_start_playing = false").unwrap();

        let config = PlaybackConfig::from_file(file.path()).unwrap();
        assert_eq!(config.prefetch_lead_secs, 10);
        assert!(!config.auto_start_playing);
        assert_eq!(config.volume_max, 1.0);
    }

    #[test]
    fn rejects_inverted_volume_bounds() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "volume_min = 0.9").unwrap();
        writeln!(file, "volume_max = 0.2").unwrap();

        assert!(PlaybackConfig::from_file(file.path()).is_err());
    }
}
