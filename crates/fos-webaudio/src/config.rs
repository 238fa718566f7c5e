//! Media configuration

use serde::{Deserialize, Serialize};
use url::Url;

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid base URL: {0}")]
    BaseUrl(#[from] url::ParseError),

    #[error("default_playback_rate out of range: {0}")]
    PlaybackRate(f64),
}

/// Element defaults shared through a [`MediaContext`](crate::MediaContext)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Base for resolving relative source URLs
    pub base_url: Option<String>,
    pub default_playback_rate: f64,
    pub default_muted: bool,
    /// Initial autoplay flag of new elements
    pub autoplay: bool,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            default_playback_rate: 1.0,
            default_muted: false,
            autoplay: true,
        }
    }
}

impl MediaConfig {
    /// Parse and validate; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(-1.0..=2.0).contains(&self.default_playback_rate) {
            return Err(ConfigError::PlaybackRate(self.default_playback_rate));
        }
        if let Some(base) = &self.base_url {
            Url::parse(base)?;
        }
        Ok(())
    }

    /// Resolve `src` against `base_url`. Unresolvable input is returned as is.
    pub fn resolve(&self, src: &str) -> String {
        if let Ok(absolute) = Url::parse(src) {
            return absolute.to_string();
        }
        self.base_url
            .as_deref()
            .and_then(|base| Url::parse(base).ok())
            .and_then(|base| base.join(src).ok())
            .map_or_else(|| src.to_string(), |joined| joined.to_string())
    }
}
