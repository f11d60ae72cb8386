//! Runtime settings
//!
//! Toggles that can be flipped while the daemon runs. The UI persists them
//! when handling a command; the orchestrator re-reads the file at the start
//! of every run, so the two never share memory.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Settings persistence errors
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to access settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A toggleable setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Setting {
    /// Reprocess everything, ignoring the ledger dates
    ForceRescan,
    /// Write a `.txt` sidecar next to each processed document
    OutputText,
    /// Show non-urgent notifications
    Notifications,
}

/// Persisted runtime toggles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    pub force_rescan: bool,
    pub output_txt: bool,
    pub notifications: bool,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            force_rescan: false,
            output_txt: false,
            notifications: true,
        }
    }
}

impl RuntimeSettings {
    pub fn get(&self, setting: Setting) -> bool {
        match setting {
            Setting::ForceRescan => self.force_rescan,
            Setting::OutputText => self.output_txt,
            Setting::Notifications => self.notifications,
        }
    }

    /// Flip a setting and return its new value
    pub fn toggle(&mut self, setting: Setting) -> bool {
        let slot = match setting {
            Setting::ForceRescan => &mut self.force_rescan,
            Setting::OutputText => &mut self.output_txt,
            Setting::Notifications => &mut self.notifications,
        };
        *slot = !*slot;
        *slot
    }

    /// Load from `path`, or return `fallback` if the file does not exist
    pub fn load_or(path: &Path, fallback: Self) -> Result<Self, SettingsError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(fallback),
            Err(source) => {
                return Err(SettingsError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&raw).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Atomically write the settings to `path`
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let io_err = |source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        };
        let json = serde_json::to_string_pretty(self).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(io_err)?;
        let mut temp = NamedTempFile::new_in(dir).map_err(io_err)?;
        temp.write_all(json.as_bytes()).map_err(io_err)?;
        temp.persist(path).map_err(|e| io_err(e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_toggle() {
        let mut settings = RuntimeSettings::default();
        assert!(settings.toggle(Setting::ForceRescan));
        assert!(settings.force_rescan);
        assert!(!settings.toggle(Setting::Notifications));
        assert!(!settings.get(Setting::Notifications));
    }

    #[test]
    fn test_missing_file_uses_fallback() {
        let dir = TempDir::new().unwrap();
        let fallback = RuntimeSettings {
            output_txt: true,
            ..RuntimeSettings::default()
        };
        let loaded = RuntimeSettings::load_or(&dir.path().join("settings.json"), fallback).unwrap();
        assert_eq!(loaded, fallback);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("settings.json");

        let mut settings = RuntimeSettings::default();
        settings.toggle(Setting::OutputText);
        settings.save(&path).unwrap();

        let loaded = RuntimeSettings::load_or(&path, RuntimeSettings::default()).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"force_rescan": true}"#).unwrap();

        let loaded = RuntimeSettings::load_or(&path, RuntimeSettings::default()).unwrap();
        assert!(loaded.force_rescan);
        assert!(loaded.notifications);
    }

    #[test]
    fn test_invalid_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "not json").unwrap();

        let result = RuntimeSettings::load_or(&path, RuntimeSettings::default());
        assert!(matches!(result, Err(SettingsError::Parse { .. })));
    }
}
