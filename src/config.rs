//! Configuration management for the OCR pipeline

use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::backup::{is_same_root, BackupPolicy};
use crate::ledger::RetryPolicy;
use crate::settings::RuntimeSettings;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Backup directory cannot be the same as working directory ({0})")]
    SameRoot(PathBuf),

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub ledger: LedgerConfig,
    pub schedule: ScheduleConfig,
    pub ocr: OcrSettings,
    pub decrypt: DecryptConfig,
    /// Initial runtime toggles, used until the settings file exists
    pub defaults: RuntimeSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Tree scanned for documents
    pub working_dir: PathBuf,
    /// Backup tree, relative to `working_dir` unless absolute
    pub backup_dir: PathBuf,
    /// Persisted runtime toggles
    pub settings_path: PathBuf,
    pub backup_policy: BackupPolicy,
    /// Run housekeeping after this many processed documents
    pub clean_after: usize,
    /// Documents above this size get a "may take longer" notice
    pub large_file_kb: u64,
    /// Whether the first scheduled invocation does real work
    pub run_on_startup: bool,
    /// Pause before aborting on a missing dependency
    pub fatal_pause_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    pub path: PathBuf,
    pub retry_interval_secs: u64,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    pub interval_secs: u64,
}

/// Settings for the external OCR engine (ocrmypdf)
#[derive(Debug, Clone, Deserialize)]
pub struct OcrSettings {
    /// Executable to run
    pub command: String,
    /// Tesseract language(s), e.g. `eng+deu`
    pub language: String,
    /// Keep existing text and only OCR image areas
    pub redo_ocr: bool,
    pub deskew: bool,
    pub clean: bool,
    pub unpaper_args: Option<String>,
    pub rotate_pages: bool,
    pub rotate_pages_threshold: f32,
    /// Skip images larger than this many megapixels
    pub skip_big: u32,
    pub output_type: String,
    pub optimize: u8,
    pub tesseract_timeout_secs: u64,
    /// Hard limit for one engine invocation
    pub timeout_secs: u64,
    pub jobs: Option<u32>,
    pub quiet: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DecryptConfig {
    /// Command run on each encrypted PDF; `{}` is replaced by the path
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            pipeline: PipelineConfig {
                working_dir: PathBuf::from("."),
                backup_dir: PathBuf::from("backup"),
                settings_path: PathBuf::from("settings.json"),
                backup_policy: BackupPolicy::Unidentified,
                clean_after: 10,
                large_file_kb: 4_000,
                run_on_startup: true,
                fatal_pause_ms: 2_000,
            },
            ledger: LedgerConfig {
                path: PathBuf::from("ocr_ledger.csv"),
                retry_interval_secs: 15,
                max_attempts: 99_999,
            },
            schedule: ScheduleConfig {
                interval_secs: 3_600,
            },
            ocr: OcrSettings::default(),
            decrypt: DecryptConfig {
                command: Vec::new(),
                timeout_secs: 120,
            },
            defaults: RuntimeSettings::default(),
        }
    }
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            command: "ocrmypdf".to_string(),
            language: "eng".to_string(),
            redo_ocr: false,
            deskew: true,
            clean: false,
            unpaper_args: None,
            rotate_pages: true,
            rotate_pages_threshold: 14.0,
            skip_big: 50,
            output_type: "pdf".to_string(),
            optimize: 1,
            tesseract_timeout_secs: 180,
            timeout_secs: 3_600,
            jobs: None,
            quiet: true,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let d = Config::default();

        let config = Config {
            pipeline: PipelineConfig {
                working_dir: env::var("OCR_WORKING_DIRECTORY")
                    .map(PathBuf::from)
                    .unwrap_or(d.pipeline.working_dir),
                backup_dir: env::var("OCR_BACKUP_DIRECTORY")
                    .map(PathBuf::from)
                    .unwrap_or(d.pipeline.backup_dir),
                settings_path: env::var("OCR_SETTINGS_PATH")
                    .map(PathBuf::from)
                    .unwrap_or(d.pipeline.settings_path),
                backup_policy: var_or("OCR_BACKUP_POLICY", d.pipeline.backup_policy)?,
                clean_after: var_or("OCR_CLEAN_AFTER", d.pipeline.clean_after)?,
                large_file_kb: var_or("OCR_LARGE_FILE_KB", d.pipeline.large_file_kb)?,
                run_on_startup: flag_or("OCR_RUN_ON_STARTUP", d.pipeline.run_on_startup)?,
                fatal_pause_ms: var_or("OCR_FATAL_PAUSE_MS", d.pipeline.fatal_pause_ms)?,
            },
            ledger: LedgerConfig {
                path: env::var("OCR_LEDGER_PATH")
                    .map(PathBuf::from)
                    .unwrap_or(d.ledger.path),
                retry_interval_secs: var_or(
                    "OCR_LEDGER_RETRY_SECS",
                    d.ledger.retry_interval_secs,
                )?,
                max_attempts: var_or("OCR_LEDGER_MAX_ATTEMPTS", d.ledger.max_attempts)?,
            },
            schedule: ScheduleConfig {
                interval_secs: var_or("OCR_INTERVAL_SECS", d.schedule.interval_secs)?,
            },
            ocr: OcrSettings {
                command: env::var("OCR_COMMAND").unwrap_or(d.ocr.command),
                language: env::var("OCR_LANGUAGE").unwrap_or(d.ocr.language),
                redo_ocr: flag_or("OCR_REDO_OCR", d.ocr.redo_ocr)?,
                deskew: flag_or("OCR_DESKEW", d.ocr.deskew)?,
                clean: flag_or("OCR_CLEAN", d.ocr.clean)?,
                unpaper_args: env::var("OCR_UNPAPER_ARGS").ok().filter(|s| !s.is_empty()),
                rotate_pages: flag_or("OCR_ROTATE_PAGES", d.ocr.rotate_pages)?,
                rotate_pages_threshold: var_or(
                    "OCR_ROTATE_PAGES_THRESHOLD",
                    d.ocr.rotate_pages_threshold,
                )?,
                skip_big: var_or("OCR_SKIP_BIG", d.ocr.skip_big)?,
                output_type: env::var("OCR_OUTPUT_TYPE").unwrap_or(d.ocr.output_type),
                optimize: var_or("OCR_OPTIMIZE", d.ocr.optimize)?,
                tesseract_timeout_secs: var_or(
                    "OCR_TESSERACT_TIMEOUT_SECS",
                    d.ocr.tesseract_timeout_secs,
                )?,
                timeout_secs: var_or("OCR_TIMEOUT_SECS", d.ocr.timeout_secs)?,
                jobs: match env::var("OCR_JOBS") {
                    Ok(raw) => Some(parse_value("OCR_JOBS", &raw)?),
                    Err(_) => d.ocr.jobs,
                },
                quiet: flag_or("OCR_QUIET", d.ocr.quiet)?,
            },
            decrypt: DecryptConfig {
                command: env::var("OCR_DECRYPT_COMMAND")
                    .map(|raw| raw.split_whitespace().map(str::to_string).collect())
                    .unwrap_or(d.decrypt.command),
                timeout_secs: var_or("OCR_DECRYPT_TIMEOUT_SECS", d.decrypt.timeout_secs)?,
            },
            defaults: RuntimeSettings {
                force_rescan: flag_or("OCR_FORCE_RESCAN", d.defaults.force_rescan)?,
                output_txt: flag_or("OCR_OUTPUT_TXT", d.defaults.output_txt)?,
                notifications: flag_or("OCR_NOTIFICATIONS", d.defaults.notifications)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ocr.skip_big == 0 {
            return Err(ConfigError::Invalid(
                "OCR_SKIP_BIG cannot be 0".to_string(),
            ));
        }
        if self.pipeline.clean_after == 0 {
            return Err(ConfigError::Invalid(
                "OCR_CLEAN_AFTER cannot be 0".to_string(),
            ));
        }
        if self.ocr.command.trim().is_empty() {
            return Err(ConfigError::Invalid("OCR_COMMAND is empty".to_string()));
        }
        if is_same_root(&self.pipeline.working_dir, &self.pipeline.backup_root()) {
            return Err(ConfigError::SameRoot(self.pipeline.working_dir.clone()));
        }
        Ok(())
    }
}

impl PipelineConfig {
    /// Backup tree location
    pub fn backup_root(&self) -> PathBuf {
        self.working_dir.join(&self.backup_dir)
    }

    pub fn fatal_pause(&self) -> Duration {
        Duration::from_millis(self.fatal_pause_ms)
    }
}

impl LedgerConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_secs(self.retry_interval_secs),
        )
    }
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

fn var_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn flag_or(key: &str, default: bool) -> Result<bool, ConfigError> {
    match env::var(key) {
        Ok(raw) => parse_flag(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.pipeline.backup_root(), PathBuf::from("./backup"));
        assert_eq!(config.ledger.retry_policy().max_attempts, 99_999);
    }

    #[test]
    fn test_same_root_is_rejected() {
        let mut config = Config::default();
        config.pipeline.working_dir = PathBuf::from("/srv/scans");
        config.pipeline.backup_dir = PathBuf::from("/srv/scans/");
        assert!(matches!(config.validate(), Err(ConfigError::SameRoot(_))));

        config.pipeline.backup_dir = PathBuf::from(".");
        assert!(matches!(config.validate(), Err(ConfigError::SameRoot(_))));
    }

    #[test]
    fn test_absolute_backup_dir() {
        let mut config = Config::default();
        config.pipeline.working_dir = PathBuf::from("/srv/scans");
        config.pipeline.backup_dir = PathBuf::from("/mnt/backup");
        assert_eq!(config.pipeline.backup_root(), PathBuf::from("/mnt/backup"));
        config.validate().unwrap();
    }

    #[test]
    fn test_zero_values_are_rejected() {
        let mut config = Config::default();
        config.ocr.skip_big = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.pipeline.clean_after = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("X", "Yes").unwrap());
        assert!(!parse_flag("X", " off ").unwrap());
        assert!(matches!(
            parse_flag("X", "maybe"),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_parse_value() {
        let jobs: u32 = parse_value("OCR_JOBS", " 4 ").unwrap();
        assert_eq!(jobs, 4);
        assert!(parse_value::<u32>("OCR_JOBS", "four").is_err());
    }
}
