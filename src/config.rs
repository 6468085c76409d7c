//! Tunables loaded from an optional YAML settings file.
//!
//! Every key is optional; missing keys keep their defaults. Command-line
//! flags are applied on top by `main`.
//!
//! ```yaml
//! limit: 5
//! batch_size: 5
//! navigation_timeout_ms: 45000
//! pause_min_ms: 500
//! pause_max_ms: 1500
//! retry:
//!   max_attempts: 3
//!   base_delay_ms: 2000
//! analysis:
//!   workspace: demo-en
//!   transcript_language: en
//!   audio_channel_mapping: left
//!   tasks: [mxt]
//! ```

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::analysis::AnalysisSettings;
use crate::error::ConfigError;
use crate::pipeline::{DEFAULT_LIMIT, DEFAULT_PAUSE_MAX, DEFAULT_PAUSE_MIN};
use crate::retry::{DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, RetryPolicy};
use crate::submitter::DEFAULT_BATCH_SIZE;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY.as_millis() as u64,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Candidates processed per source and run.
    pub limit: usize,
    /// Records submitted for analysis per run.
    pub batch_size: usize,
    pub navigation_timeout_ms: u64,
    pub analysis_timeout_ms: u64,
    pub pause_min_ms: u64,
    pub pause_max_ms: u64,
    pub retry: RetrySettings,
    pub analysis: AnalysisSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            batch_size: DEFAULT_BATCH_SIZE,
            navigation_timeout_ms: 45_000,
            analysis_timeout_ms: 60_000,
            pause_min_ms: DEFAULT_PAUSE_MIN.as_millis() as u64,
            pause_max_ms: DEFAULT_PAUSE_MAX.as_millis() as u64,
            retry: RetrySettings::default(),
            analysis: AnalysisSettings::default(),
        }
    }
}

impl Settings {
    /// Read and parse `path`.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let label = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: label.clone(),
            source,
        })?;
        let settings = Self::from_yaml(&text, &label)?;
        debug!(?settings, "Loaded settings");
        Ok(settings)
    }

    pub fn from_yaml(text: &str, label: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: label.to_string(),
            source,
        })
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_millis(self.analysis_timeout_ms)
    }

    pub fn pause_range(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.pause_min_ms),
            Duration::from_millis(self.pause_max_ms),
        )
    }
}
