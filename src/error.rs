//! Error types for the OCR pipeline

use thiserror::Error;

use crate::backup::BackupError;
use crate::config::ConfigError;
use crate::identity::IdentityError;
use crate::ledger::LedgerError;
use crate::ocr::DecryptError;
use crate::settings::SettingsError;
use crate::staging::StagingError;

/// Pipeline-wide result type
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Pipeline error type
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Backup error: {0}")]
    Backup(#[from] BackupError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Staging error: {0}")]
    Staging(#[from] StagingError),

    #[error("Decrypt error: {0}")]
    Decrypt(#[from] DecryptError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
