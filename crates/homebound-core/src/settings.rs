//! Persistent settings shared by the pipeline.
//!
//! Everything the coordinator must remember across restarts lives in one
//! [`PersistedState`] document: the device identity, the quarantine zone
//! and flag, and the rate-limit timestamps. [`FileSettingsStore`] keeps it as
//! pretty JSON on disk; [`MemorySettingsStore`] backs tests.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::beacon::DeviceIdentifier;
use crate::location::QuarantineZone;

/// Errors from the settings store.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file could not be read.
    #[error("failed to read settings {}: {source}", path.display())]
    ReadError {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The settings file could not be written.
    #[error("failed to write settings {}: {source}", path.display())]
    WriteError {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The settings file is not valid JSON for [`PersistedState`].
    #[error("failed to parse settings {}: {source}", path.display())]
    ParseError {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// The state could not be serialized.
    #[error("failed to serialize settings: {0}")]
    SerializeError(#[from] serde_json::Error),
}

/// Result type for settings operations.
pub type SettingsResult<T> = std::result::Result<T, SettingsError>;

/// State persisted across restarts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PersistedState {
    /// Opaque device identity string sent with every report.
    pub device_id: String,
    /// Profile identifier assigned at registration.
    pub profile_id: Option<DeviceIdentifier>,
    /// Current quarantine zone, if one was ever configured.
    pub quarantine_zone: Option<QuarantineZone>,
    /// Whether the quarantine is currently in force.
    pub quarantine_active: bool,
    /// Epoch seconds of the last quarantine report decision.
    pub last_quarantine_update: Option<f64>,
    /// Epoch seconds of the last acknowledged location batch.
    pub last_location_update: Option<f64>,
    /// Epoch seconds of the last acknowledged contact upload.
    pub last_connections_update: Option<f64>,
}

impl PersistedState {
    /// The zone that is in force, if any.
    #[must_use]
    pub fn active_zone(&self) -> Option<QuarantineZone> {
        if self.quarantine_active {
            self.quarantine_zone
        } else {
            None
        }
    }
}

/// Key-value store that survives process restarts.
pub trait SettingsStore: Send + Sync {
    /// Loads the current state. A store that was never written returns the
    /// default state.
    ///
    /// # Errors
    ///
    /// Returns an error if stored data exists but cannot be read.
    fn load(&self) -> SettingsResult<PersistedState>;

    /// Replaces the stored state.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be written.
    fn save(&self, state: &PersistedState) -> SettingsResult<()>;
}

/// Settings stored as a JSON file.
#[derive(Debug, Clone)]
pub struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    /// Creates a store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for FileSettingsStore {
    fn load(&self) -> SettingsResult<PersistedState> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(PersistedState::default())
            }
            Err(source) => {
                return Err(SettingsError::ReadError {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        serde_json::from_str(&content).map_err(|source| SettingsError::ParseError {
            path: self.path.clone(),
            source,
        })
    }

    fn save(&self, state: &PersistedState) -> SettingsResult<()> {
        let write_err = |source| SettingsError::WriteError {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let content = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, content).map_err(write_err)?;
        std::fs::rename(&tmp, &self.path).map_err(write_err)?;

        debug!(path = %self.path.display(), "saved settings");
        Ok(())
    }
}

/// In-memory settings, lost on drop.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    state: Mutex<PersistedState>,
}

impl MemorySettingsStore {
    /// Creates a store seeded with `state`.
    #[must_use]
    pub fn with_state(state: PersistedState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> SettingsResult<PersistedState> {
        Ok(self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone())
    }

    fn save(&self, state: &PersistedState) -> SettingsResult<()> {
        *self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = state.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::Coordinate;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_loads_default() {
        let dir = TempDir::new().unwrap();
        let store = FileSettingsStore::new(dir.path().join("settings.json"));
        assert_eq!(store.load().unwrap(), PersistedState::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = FileSettingsStore::new(dir.path().join("nested").join("settings.json"));
        let state = PersistedState {
            device_id: "device-1".into(),
            profile_id: Some(DeviceIdentifier(7)),
            quarantine_zone: Some(
                QuarantineZone::new(Coordinate::new(48.1, 17.1), 100.0).unwrap(),
            ),
            quarantine_active: true,
            last_quarantine_update: Some(1_000.0),
            ..PersistedState::default()
        };
        store.save(&state).unwrap();
        assert_eq!(store.load().unwrap(), state);
        assert!(!store.path().with_extension("tmp").exists());
    }

    #[test]
    fn test_corrupt_file_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ nope").unwrap();
        let err = FileSettingsStore::new(&path).load().unwrap_err();
        assert!(matches!(err, SettingsError::ParseError { .. }));
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"deviceId":"abc","quarantineActive":true}"#).unwrap();
        let state = FileSettingsStore::new(&path).load().unwrap();
        assert_eq!(state.device_id, "abc");
        assert!(state.quarantine_active);
        assert!(state.active_zone().is_none());
    }

    #[test]
    fn test_active_zone_requires_flag() {
        let zone = QuarantineZone::new(Coordinate::new(1.0, 1.0), 50.0).unwrap();
        let mut state = PersistedState {
            quarantine_zone: Some(zone),
            ..PersistedState::default()
        };
        assert!(state.active_zone().is_none());
        state.quarantine_active = true;
        assert_eq!(state.active_zone(), Some(zone));
    }
}
