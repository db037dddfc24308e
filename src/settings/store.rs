//! Persisted key/value settings
//!
//! A small JSON document standing in for extension local storage. Values are
//! stored under well-known keys and read once when a capture session starts.

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Key holding the watermark configuration
pub const WATERMARK_SETTINGS_KEY: &str = "watermarkSettings";

/// Key holding the watermark image as a base64 `data:` URL
pub const WATERMARK_IMAGE_KEY: &str = "watermarkImageData";

/// Settings errors
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Settings file is not a JSON object: {0}")]
    InvalidDocument(String),
}

/// JSON-file backed settings store
pub struct SettingsStore {
    path: Option<PathBuf>,
    values: Mutex<Map<String, Value>>,
}

impl SettingsStore {
    /// Open the store at `path`, creating an empty one if the file is missing
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        let values = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<Value>(&content)? {
                Value::Object(map) => map,
                _ => {
                    return Err(SettingsError::InvalidDocument(
                        path.to_string_lossy().to_string(),
                    ))
                }
            }
        } else {
            Map::new()
        };

        tracing::debug!("Opened settings store at {:?} ({} keys)", path, values.len());

        Ok(Self {
            path: Some(path),
            values: Mutex::new(values),
        })
    }

    /// A store that never touches the filesystem
    pub fn in_memory() -> Self {
        Self {
            path: None,
            values: Mutex::new(Map::new()),
        }
    }

    /// Read and deserialize a value
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SettingsError> {
        let values = self.values.lock();
        match values.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    /// Serialize and store a value, then persist the document
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), SettingsError> {
        let value = serde_json::to_value(value)?;
        let snapshot = {
            let mut values = self.values.lock();
            values.insert(key.to_string(), value);
            values.clone()
        };
        self.persist(&snapshot)
    }

    fn persist(&self, values: &Map<String, Value>) -> Result<(), SettingsError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;

        // Write-then-rename so a crash never leaves a truncated document
        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        file.write_all(serde_json::to_string_pretty(values)?.as_bytes())?;
        file.persist(path).map_err(|e| SettingsError::Io(e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        enabled: bool,
        text: String,
    }

    #[test]
    fn test_set_then_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let store = SettingsStore::open(&path).unwrap();
        let sample = Sample {
            enabled: true,
            text: "hello".to_string(),
        };
        store.set(WATERMARK_SETTINGS_KEY, &sample).unwrap();

        let reopened = SettingsStore::open(&path).unwrap();
        let loaded: Option<Sample> = reopened.get(WATERMARK_SETTINGS_KEY).unwrap();
        assert_eq!(loaded, Some(sample));
    }

    #[test]
    fn test_missing_key() {
        let store = SettingsStore::in_memory();
        let loaded: Option<Sample> = store.get("nope").unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_set_replaces_value() {
        let store = SettingsStore::in_memory();
        store.set(WATERMARK_IMAGE_KEY, &"data:image/png;base64,AAAA").unwrap();
        store.set(WATERMARK_IMAGE_KEY, &"data:image/png;base64,BBBB").unwrap();
        let loaded: Option<String> = store.get(WATERMARK_IMAGE_KEY).unwrap();
        assert_eq!(loaded.as_deref(), Some("data:image/png;base64,BBBB"));
    }

    #[test]
    fn test_non_object_document_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();
        assert!(matches!(
            SettingsStore::open(&path),
            Err(SettingsError::InvalidDocument(_))
        ));
    }
}
