//! Backup mirror
//!
//! Keeps a byte-identical shadow of working-tree documents under the backup
//! root (same relative paths). Copies are refreshed when missing or different
//! and never deleted. The mirror is also where original timestamps are read
//! back from after a transform rewrote a document.

use std::collections::HashMap;
use std::fs::{self, File, FileTimes};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::time::SystemTime;

use serde::Deserialize;
use thiserror::Error;

use crate::config::ConfigError;
use crate::identity::{content_hash_with, embedded_identity, Identity, IdentityTag};
use crate::library::{DocumentEntry, LibraryScanner};

/// Which documents get mirrored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackupPolicy {
    /// Only documents without an embedded identity (not yet transformed)
    #[default]
    Unidentified,
    /// Every document
    Always,
}

impl FromStr for BackupPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unidentified" => Ok(Self::Unidentified),
            "always" => Ok(Self::Always),
            other => Err(format!("unknown backup policy: {}", other)),
        }
    }
}

/// Backup errors
#[derive(Debug, Error)]
pub enum BackupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to create backup root {path}: {source}")]
    CreateRoot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Counters for one mirror pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackupReport {
    pub copied: usize,
    pub unchanged: usize,
    pub skipped_identified: usize,
    pub failed: usize,
}

/// Mirror of the working tree under the backup root
#[derive(Debug, Clone)]
pub struct BackupMirror {
    working_root: PathBuf,
    backup_root: PathBuf,
    policy: BackupPolicy,
}

impl BackupMirror {
    /// Fails before any I/O when both roots are the same directory
    pub fn new(
        working_root: impl Into<PathBuf>,
        backup_root: impl Into<PathBuf>,
        policy: BackupPolicy,
    ) -> Result<Self, ConfigError> {
        let working_root = working_root.into();
        let backup_root = backup_root.into();
        if is_same_root(&working_root, &backup_root) {
            return Err(ConfigError::SameRoot(working_root));
        }
        Ok(Self {
            working_root,
            backup_root,
            policy,
        })
    }

    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    /// Mirrored location of a working-tree document
    pub fn backup_path(&self, document: &DocumentEntry) -> PathBuf {
        let relative = document
            .path
            .strip_prefix(&self.working_root)
            .unwrap_or(&document.relative);
        self.backup_root.join(relative)
    }

    /// Copy every document the policy selects. Per-file failures are logged
    /// and counted.
    pub fn mirror(&self, documents: &[DocumentEntry]) -> Result<BackupReport, BackupError> {
        fs::create_dir_all(&self.backup_root).map_err(|source| BackupError::CreateRoot {
            path: self.backup_root.clone(),
            source,
        })?;

        let mut report = BackupReport::default();
        for document in documents {
            if self.policy == BackupPolicy::Unidentified
                && embedded_identity(&document.path).is_some()
            {
                report.skipped_identified += 1;
                continue;
            }

            let target = self.backup_path(document);
            match self.mirror_one(&document.path, &target) {
                Ok(true) => {
                    tracing::debug!(path = %document.path.display(), "Backed up");
                    report.copied += 1;
                }
                Ok(false) => report.unchanged += 1,
                Err(e) => {
                    tracing::warn!(
                        "Failed to back up {} to {}: {}",
                        document.path.display(),
                        target.display(),
                        e
                    );
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            "Backup: {} copied, {} unchanged, {} already identified, {} failed",
            report.copied,
            report.unchanged,
            report.skipped_identified,
            report.failed
        );
        Ok(report)
    }

    /// Returns `true` when a copy was made
    fn mirror_one(&self, source: &Path, target: &Path) -> io::Result<bool> {
        if target.exists() && files_identical(source, target)? {
            return Ok(false);
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        copy_preserving(source, target)?;
        Ok(true)
    }
}

/// Compare two paths lexically, then by canonical form when both exist
pub fn is_same_root(a: &Path, b: &Path) -> bool {
    fn lexical(path: &Path) -> Vec<Component<'_>> {
        path.components()
            .filter(|c| !matches!(c, Component::CurDir))
            .collect()
    }

    if lexical(a) == lexical(b) {
        return true;
    }
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Byte-for-byte comparison
pub fn files_identical(a: &Path, b: &Path) -> io::Result<bool> {
    let (meta_a, meta_b) = (fs::metadata(a)?, fs::metadata(b)?);
    if meta_a.len() != meta_b.len() {
        return Ok(false);
    }

    let mut reader_a = BufReader::new(File::open(a)?);
    let mut reader_b = BufReader::new(File::open(b)?);
    let mut buf_a = [0u8; 8192];
    let mut buf_b = [0u8; 8192];
    loop {
        let n = reader_a.read(&mut buf_a)?;
        if n == 0 {
            return Ok(true);
        }
        reader_b.read_exact(&mut buf_b[..n])?;
        if buf_a[..n] != buf_b[..n] {
            return Ok(false);
        }
    }
}

/// Copy with permissions and access/modification times
pub fn copy_preserving(source: &Path, target: &Path) -> io::Result<()> {
    if let Ok(meta) = fs::metadata(target) {
        let mut permissions = meta.permissions();
        if permissions.readonly() {
            #[allow(clippy::permissions_set_readonly_false)]
            permissions.set_readonly(false);
            fs::set_permissions(target, permissions)?;
        }
    }

    fs::copy(source, target)?;
    let (accessed, modified) = file_times(source)?;
    set_file_times(target, accessed, modified)
}

/// Access and modification time of a file
pub fn file_times(path: &Path) -> io::Result<(SystemTime, SystemTime)> {
    let meta = fs::metadata(path)?;
    Ok((meta.accessed()?, meta.modified()?))
}

/// Set access and modification time of a file
pub fn set_file_times(path: &Path, accessed: SystemTime, modified: SystemTime) -> io::Result<()> {
    let file = File::options().write(true).open(path)?;
    file.set_times(
        FileTimes::new()
            .set_accessed(accessed)
            .set_modified(modified),
    )
}

/// Content hash → backup copy, one table per hash algorithm, each built on
/// first use
#[derive(Debug, Default)]
pub struct BackupIndex {
    root: PathBuf,
    by_tag: HashMap<IdentityTag, HashMap<String, PathBuf>>,
}

impl BackupIndex {
    pub fn new(backup_root: impl Into<PathBuf>) -> Self {
        Self {
            root: backup_root.into(),
            by_tag: HashMap::new(),
        }
    }

    /// Backup copy whose content hash, computed with the identity's own
    /// algorithm, equals the identity token
    pub fn find(&mut self, identity: &Identity) -> Option<&Path> {
        let root = &self.root;
        self.by_tag
            .entry(identity.tag())
            .or_insert_with(|| build_index(root, identity.tag()))
            .get(identity.token())
            .map(PathBuf::as_path)
    }

    /// Copy timestamps of the matching backup onto `target`. Returns `false`
    /// when there is no matching backup.
    pub fn restore_times(&mut self, identity: &Identity, target: &Path) -> io::Result<bool> {
        let Some(backup) = self.find(identity) else {
            return Ok(false);
        };
        let (accessed, modified) = file_times(backup)?;
        set_file_times(target, accessed, modified)?;
        Ok(true)
    }
}

fn build_index(root: &Path, tag: IdentityTag) -> HashMap<String, PathBuf> {
    let mut index = HashMap::new();
    for entry in LibraryScanner::new(root, None).documents() {
        match content_hash_with(&entry.path, tag) {
            Ok(hash) => {
                index.entry(hash).or_insert(entry.path);
            }
            Err(e) => tracing::warn!("Cannot hash backup {}: {}", entry.path.display(), e),
        }
    }
    tracing::debug!(
        "Indexed {} backup copies under {} by {}",
        index.len(),
        root.display(),
        tag
    );
    index
}
