/// Jukebox configuration
use crate::error::{AppError, Result};
use jukebox_playback::{DecoderSettings, PlaybackConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_FILE: &str = "jukebox.toml";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct JukeboxConfig {
    #[serde(default)]
    pub playback: PlaybackConfig,

    #[serde(default)]
    pub decoder: DecoderSettings,
}

impl JukeboxConfig {
    /// Load configuration from file and environment
    ///
    /// An explicit `path` must exist; otherwise `jukebox.toml` in the working
    /// directory is used when present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = config::Config::builder();

        match path {
            Some(path) => {
                if !path.exists() {
                    return Err(AppError::Config(format!(
                        "config file not found: {}",
                        path.display()
                    )));
                }
                settings = settings.add_source(config::File::from(path.to_path_buf()));
            }
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    settings = settings.add_source(config::File::from(default_path));
                }
            }
        }

        // Override with environment variables, e.g. JUKEBOX_PLAYBACK__VOLUME=0.8
        settings = settings.add_source(
            config::Environment::with_prefix("JUKEBOX")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.playback.volume) {
            return Err(AppError::Config(format!(
                "playback.volume must be between 0.0 and 1.0, got {}",
                self.playback.volume
            )));
        }

        if self.playback.history_size == 0 {
            return Err(AppError::Config(
                "playback.history_size must be greater than 0".to_string(),
            ));
        }

        if self.playback.intro.begin_percent > 100 {
            return Err(AppError::Config(
                "playback.intro.begin_percent must be at most 100".to_string(),
            ));
        }

        self.decoder
            .validate()
            .map_err(|e| AppError::Config(e.to_string()))
    }
}
