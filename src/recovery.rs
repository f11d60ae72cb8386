//! Recovery sweep
//!
//! Repairs staging artifacts left behind by an earlier run. An artifact whose
//! original exists is stale (the transform finished) and is removed; an
//! artifact without its original was interrupted mid-transform and is renamed
//! back.

use std::fs;
use std::io;
use std::ops::AddAssign;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::library::LibraryScanner;
use crate::staging::original_path;

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("{0} is not a staging artifact")]
    NotAnArtifact(PathBuf),

    #[error("Failed to remove stale artifact {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to restore {path}: {source}")]
    Restore {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// What a sweep did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Stale artifacts deleted
    pub removed: usize,
    /// Orphaned artifacts renamed back
    pub restored: usize,
    pub failed: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl AddAssign for SweepReport {
    fn add_assign(&mut self, other: Self) {
        self.removed += other.removed;
        self.restored += other.restored;
        self.failed += other.failed;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Repair {
    Removed,
    Restored,
}

/// Sweep every staging artifact the scanner can see
pub fn sweep(scanner: &LibraryScanner) -> SweepReport {
    let mut report = SweepReport::default();

    for artifact in scanner.staging_artifacts() {
        match repair(&artifact.path) {
            Ok(Repair::Removed) => {
                tracing::debug!(path = %artifact.path.display(), "Removed stale artifact");
                report.removed += 1;
            }
            Ok(Repair::Restored) => {
                tracing::info!(path = %artifact.path.display(), "Restored interrupted document");
                report.restored += 1;
            }
            Err(e) => {
                tracing::warn!("{}", e);
                report.failed += 1;
            }
        }
    }

    if !report.is_empty() {
        tracing::info!(
            "Recovery sweep under {}: {} removed, {} restored, {} failed",
            scanner.root().display(),
            report.removed,
            report.restored,
            report.failed
        );
    }
    report
}

fn repair(artifact: &Path) -> Result<Repair, SweepError> {
    let original =
        original_path(artifact).ok_or_else(|| SweepError::NotAnArtifact(artifact.to_path_buf()))?;

    if original.exists() {
        remove_artifact(artifact).map_err(|source| SweepError::Remove {
            path: artifact.to_path_buf(),
            source,
        })?;
        Ok(Repair::Removed)
    } else {
        fs::rename(artifact, &original).map_err(|source| SweepError::Restore {
            path: original,
            source,
        })?;
        Ok(Repair::Restored)
    }
}

fn remove_artifact(path: &Path) -> io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    if permissions.readonly() {
        #[allow(clippy::permissions_set_readonly_false)]
        permissions.set_readonly(false);
        fs::set_permissions(path, permissions)?;
    }
    fs::remove_file(path)
}
