use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use super::storage::JsonFile;
use crate::config::{
    DEFAULT_BASE_URL, DEFAULT_MAX_HISTORY, DEFAULT_MAX_LOG_ENTRIES, DEFAULT_MODEL,
    DEFAULT_PREVIEW_CHARS, SETTINGS_FILE,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub top_p: f32,
    pub stream_responses: bool,
    pub max_history: usize,
    pub max_log_entries: usize,
    pub preview_chars: usize,
    pub stream_idle_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            temperature: 1.0,
            max_tokens: Some(1024),
            top_p: 1.0,
            stream_responses: true,
            max_history: DEFAULT_MAX_HISTORY,
            max_log_entries: DEFAULT_MAX_LOG_ENTRIES,
            preview_chars: DEFAULT_PREVIEW_CHARS,
            stream_idle_timeout_secs: 30,
            request_timeout_secs: 120,
        }
    }
}

impl AppSettings {
    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.base_url)
            .with_context(|| format!("Invalid base URL: {}", self.base_url))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            bail!("Base URL must use http or https: {}", self.base_url);
        }
        if self.model.trim().is_empty() {
            bail!("Model identifier must not be empty");
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            bail!("Temperature must be between 0.0 and 2.0, got {}", self.temperature);
        }
        if !(0.0..=1.0).contains(&self.top_p) || self.top_p == 0.0 {
            bail!("top_p must be in (0.0, 1.0], got {}", self.top_p);
        }
        if self.max_tokens == Some(0) {
            bail!("max_tokens must be positive");
        }
        if self.max_history < 2 {
            bail!("max_history must keep at least one message besides the persona");
        }
        if self.stream_idle_timeout_secs == 0 || self.request_timeout_secs == 0 {
            bail!("Timeouts must be positive");
        }
        Ok(())
    }
}

pub struct SettingsService;

impl SettingsService {
    pub fn load(data_dir: &Path) -> AppSettings {
        Self::file(data_dir).load_or_none().unwrap_or_default()
    }

    pub fn save(data_dir: &Path, settings: &AppSettings) -> Result<()> {
        Self::file(data_dir)
            .save(settings)
            .context("Failed to save settings")
    }

    fn file(data_dir: &Path) -> JsonFile<AppSettings> {
        JsonFile::new(data_dir.join(SETTINGS_FILE))
    }
}
