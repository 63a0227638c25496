use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use uuid::Uuid;

use super::settings::AppSettings;
use crate::config::{APP_NAME, CONVERSATION_FILE, REQUEST_LOG_FILE};

/// Everything one interactive session needs to open its stores.
///
/// Created once per session and dropped when the session ends. Stores are
/// built from it; nothing is shared between sessions.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub id: Uuid,
    pub data_dir: PathBuf,
    pub settings: AppSettings,
    pub persona: String,
}

impl SessionContext {
    pub fn new(data_dir: PathBuf, settings: AppSettings, persona: String) -> Self {
        let id = Uuid::new_v4();
        tracing::debug!(session = %id, data_dir = %data_dir.display(), "Session created");
        Self {
            id,
            data_dir,
            settings,
            persona,
        }
    }

    pub fn conversation_path(&self) -> PathBuf {
        self.data_dir.join(CONVERSATION_FILE)
    }

    pub fn request_log_path(&self) -> PathBuf {
        self.data_dir.join(REQUEST_LOG_FILE)
    }

    pub fn export_path(&self, prefix: &str) -> PathBuf {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        self.data_dir.join(format!("{}-{}.txt", prefix, stamp))
    }
}

impl Drop for SessionContext {
    fn drop(&mut self) {
        tracing::debug!(session = %self.id, "Session ended");
    }
}

/// `$XDG_DATA_HOME/persona-chat`, falling back to `~/.local/share/persona-chat`.
pub fn default_data_dir() -> Result<PathBuf> {
    let data_dir = match std::env::var_os("XDG_DATA_HOME") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => {
            let home = std::env::var_os("HOME").context("HOME not set")?;
            PathBuf::from(home).join(".local/share")
        }
    };
    Ok(data_dir.join(APP_NAME))
}

pub fn ensure_data_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("Failed to create data directory: {}", path.display()))
}

#[cfg(test)]
pub(crate) fn test_context(dir: &Path) -> SessionContext {
    SessionContext::new(dir.to_path_buf(), AppSettings::default(), "persona".to_string())
}
