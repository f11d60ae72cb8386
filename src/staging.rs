//! Staging protocol
//!
//! Before the OCR engine runs, a document is renamed to `<name>.tmp` and the
//! engine reads from that artifact while writing its output under the
//! original name. The original name therefore never points at a half-written
//! file from the previous content's point of view: either the output is
//! complete, or the artifact is renamed back.
//!
//! ```text
//! ORIGINAL --stage--> STAGED --commit--> TRANSFORMED
//!                        |
//!                        +--restore--> ORIGINAL
//! ```
//!
//! A [`StagedDocument`] that is dropped while still staged is restored.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Suffix appended to a document's file name while it is staged
pub const STAGING_SUFFIX: &str = "tmp";

/// Staging errors
#[derive(Debug, Error)]
pub enum StagingError {
    #[error("A staging artifact already exists for {0}")]
    AlreadyStaged(PathBuf),

    #[error("Failed to rename {from} to {to}: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to remove partial output {path}: {source}")]
    RemovePartial {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Staging artifact path for a document
pub fn staging_path(original: &Path) -> PathBuf {
    let mut name = original.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(STAGING_SUFFIX);
    original.with_file_name(name)
}

/// Document path a staging artifact belongs to
pub fn original_path(staging: &Path) -> Option<PathBuf> {
    let name = staging.file_name()?.to_str()?;
    let stem = name.strip_suffix(STAGING_SUFFIX)?.strip_suffix('.')?;
    (!stem.is_empty()).then(|| staging.with_file_name(stem))
}

/// Lifecycle of a staged document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingState {
    /// Document is under its original name
    Original,
    /// Document is under the staging name, transform in flight
    Staged,
    /// Transform succeeded; output lives under the original name
    Transformed,
    /// Left staged on purpose for the recovery sweep
    Abandoned,
}

/// A document renamed to its staging artifact
#[derive(Debug)]
pub struct StagedDocument {
    original: PathBuf,
    staging: PathBuf,
    state: StagingState,
}

impl StagedDocument {
    /// Rename `original` to its staging name
    pub fn stage(original: &Path) -> Result<Self, StagingError> {
        let staging = staging_path(original);
        if staging.exists() {
            return Err(StagingError::AlreadyStaged(original.to_path_buf()));
        }

        rename(original, &staging)?;
        tracing::debug!("Staged {} as {}", original.display(), staging.display());

        Ok(Self {
            original: original.to_path_buf(),
            staging,
            state: StagingState::Staged,
        })
    }

    /// Where the document lives under its original name
    pub fn original(&self) -> &Path {
        &self.original
    }

    /// The staging artifact (transform input)
    pub fn staging(&self) -> &Path {
        &self.staging
    }

    pub fn state(&self) -> StagingState {
        self.state
    }

    /// STAGED -> ORIGINAL. Any partial output under the original name is
    /// discarded first.
    pub fn restore(mut self) -> Result<(), StagingError> {
        self.restore_in_place()
    }

    /// STAGED -> TRANSFORMED. The artifact stays on disk until the next
    /// housekeeping sweep removes it.
    pub fn commit(mut self) {
        self.state = StagingState::Transformed;
    }

    /// Leave the artifact staged; the recovery sweep puts it back. Partial
    /// output under the original name is removed so the sweep cannot
    /// mistake it for a finished transform.
    pub fn abandon(mut self) {
        if self.original.exists() {
            if let Err(e) = fs::remove_file(&self.original) {
                tracing::error!(
                    "Failed to remove partial output {}: {}",
                    self.original.display(),
                    e
                );
            }
        }
        tracing::warn!("Leaving {} staged for recovery", self.staging.display());
        self.state = StagingState::Abandoned;
    }

    fn restore_in_place(&mut self) -> Result<(), StagingError> {
        if self.state != StagingState::Staged {
            return Ok(());
        }

        if self.original.exists() {
            fs::remove_file(&self.original).map_err(|source| StagingError::RemovePartial {
                path: self.original.clone(),
                source,
            })?;
        }
        rename(&self.staging, &self.original)?;
        self.state = StagingState::Original;
        tracing::debug!("Restored {}", self.original.display());
        Ok(())
    }
}

impl Drop for StagedDocument {
    fn drop(&mut self) {
        if let Err(e) = self.restore_in_place() {
            tracing::error!(
                "Could not restore {}: {}. The next sweep will retry.",
                self.original.display(),
                e
            );
        }
    }
}

fn rename(from: &Path, to: &Path) -> Result<(), StagingError> {
    fs::rename(from, to).map_err(|source| StagingError::Rename {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    })
}
