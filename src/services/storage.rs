use std::fs::{self, File};
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed JSON in {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Streamed turn is no longer open")]
    StaleTurn,
}

/// Outcome of a write-through mutation. The in-memory state is already
/// updated either way; `Unsaved` means the durable copy lags behind.
#[must_use]
#[derive(Debug)]
pub enum Durability {
    Saved,
    Unsaved(StoreError),
}

impl Durability {
    pub fn warning(self) -> Option<StoreError> {
        match self {
            Durability::Saved => None,
            Durability::Unsaved(e) => Some(e),
        }
    }
}

impl From<Result<(), StoreError>> for Durability {
    fn from(result: Result<(), StoreError>) -> Self {
        match result {
            Ok(()) => Durability::Saved,
            Err(e) => {
                tracing::warn!("{}", e);
                Durability::Unsaved(e)
            }
        }
    }
}

/// A JSON document on disk, replaced whole on every save.
///
/// Single writer only: two processes sharing the file race and the last
/// rename wins.
#[derive(Debug, Clone)]
pub struct JsonFile<T> {
    path: PathBuf,
    _phantom: PhantomData<T>,
}

impl<T> JsonFile<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            _phantom: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when the file is missing or blank.
    pub fn load(&self) -> Result<Option<T>, StoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };

        if content.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| StoreError::Malformed {
                path: self.path.clone(),
                source,
            })
    }

    /// Load, treating any failure as absence.
    pub fn load_or_none(&self) -> Option<T> {
        match self.load() {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!("Ignoring stored state: {}", e);
                None
            }
        }
    }

    /// Write through a temporary sibling file and rename over the target.
    pub fn save(&self, data: &T) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
            }
        }

        let json = serde_json::to_string_pretty(data).map_err(|source| StoreError::Serialize {
            path: self.path.clone(),
            source,
        })?;

        let tmp_path = self.temp_path();
        let written = File::create(&tmp_path).and_then(|mut tmp_file| {
            tmp_file.write_all(json.as_bytes())?;
            tmp_file.sync_all()
        });

        written
            .and_then(|_| fs::rename(&tmp_path, &self.path))
            .map_err(|e| {
                let _ = fs::remove_file(&tmp_path);
                self.io_error(e)
            })
    }

    fn temp_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.path.with_file_name(format!(".{}.tmp", file_name))
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
