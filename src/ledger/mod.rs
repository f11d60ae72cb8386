//! Completion ledger
//!
//! A flat comma-separated file mapping document identity to the date it was
//! last processed, its display name and the problematic flag. New records are
//! appended in place; updates rewrite the whole file through a temporary file
//! that atomically replaces the ledger, so a crash never leaves it truncated.
//!
//! Writers serialize on an exclusive lock held on a `<ledger>.lock` sidecar.
//! Programs outside the pipeline that keep the ledger open surface as
//! permission or lock errors and are waited out by the [`RetryPolicy`].

mod record;
mod retry;

pub use record::{sanitize_display_name, LedgerEntry, HEADER};
pub use retry::{RetryPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_INTERVAL};

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::ui::Notifier;

/// Windows ERROR_SHARING_VIOLATION / ERROR_LOCK_VIOLATION
const SHARING_VIOLATION_CODES: [i32; 2] = [32, 33];

/// Notice shown when the ledger cannot be written
const LOCKED_NOTICE: &str =
    "Unable to update the OCR ledger. Please close any program that uses the file.";

/// Ledger errors
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Ledger {path} is locked by another writer")]
    Locked { path: PathBuf },

    #[error("Failed to replace ledger {path}: {source}")]
    Replace {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LedgerError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Another process holds the ledger (or its lock)
    pub fn is_lock_contention(&self) -> bool {
        match self {
            Self::Locked { .. } => true,
            Self::Io { source, .. } | Self::Replace { source, .. } => {
                matches!(
                    source.kind(),
                    io::ErrorKind::PermissionDenied | io::ErrorKind::WouldBlock
                ) || source
                    .raw_os_error()
                    .is_some_and(|code| SHARING_VIOLATION_CODES.contains(&code))
            }
        }
    }
}

/// The completion ledger
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
    retry: RetryPolicy,
}

impl Ledger {
    /// Open a ledger at `path` with the default retry policy.
    /// Nothing is created until the first lookup or write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            retry: RetryPolicy::default(),
        }
    }

    /// Replace the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up the record for `identity`.
    ///
    /// Creates the ledger with its header row when it does not exist yet.
    pub fn lookup(&self, identity: &str) -> Result<Option<LedgerEntry>, LedgerError> {
        if self.ensure_exists()? {
            return Ok(None);
        }

        Ok(self
            .read_records()?
            .into_iter()
            .find(|entry| entry.identity == identity))
    }

    /// All records in file order
    pub fn entries(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        self.read_records()
    }

    /// Append a record for an identity that has never been recorded
    pub async fn append(
        &self,
        entry: &LedgerEntry,
        notifier: &dyn Notifier,
    ) -> Result<(), LedgerError> {
        self.retry
            .run(
                || self.append_once(entry),
                |_| notifier.notify(LOCKED_NOTICE, true),
            )
            .await?;

        tracing::debug!(identity = %entry.identity, "Appended ledger record");
        Ok(())
    }

    /// Replace the record with the same identity, keeping every other record
    /// and their order. Appends when no record matches.
    ///
    /// Returns `true` when an existing record was replaced.
    pub async fn upsert(
        &self,
        entry: &LedgerEntry,
        notifier: &dyn Notifier,
    ) -> Result<bool, LedgerError> {
        let replaced = self
            .retry
            .run(
                || self.rewrite_once(entry),
                |_| notifier.notify(LOCKED_NOTICE, true),
            )
            .await?;

        tracing::debug!(identity = %entry.identity, replaced, "Upserted ledger record");
        Ok(replaced)
    }

    /// Flag an existing record for reprocessing.
    ///
    /// Returns `false` when the identity is not in the ledger.
    pub async fn mark_problematic(
        &self,
        identity: &str,
        notifier: &dyn Notifier,
    ) -> Result<bool, LedgerError> {
        let Some(mut entry) = self.lookup(identity)? else {
            return Ok(false);
        };
        entry.problematic = true;
        self.upsert(&entry, notifier).await
    }

    /// Create the ledger (header only) if it is missing or empty.
    /// Returns `true` when it was created.
    fn ensure_exists(&self) -> Result<bool, LedgerError> {
        let is_empty = match fs::metadata(&self.path) {
            Ok(meta) => meta.len() == 0,
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(e) => return Err(LedgerError::io(&self.path, e)),
        };
        if !is_empty {
            return Ok(false);
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| LedgerError::io(&self.path, e))?;
        }
        fs::write(&self.path, format!("{}\n", HEADER))
            .map_err(|e| LedgerError::io(&self.path, e))?;
        tracing::info!("Created ledger at {}", self.path.display());
        Ok(true)
    }

    fn read_lines(&self) -> Result<Vec<String>, LedgerError> {
        let content =
            fs::read_to_string(&self.path).map_err(|e| LedgerError::io(&self.path, e))?;
        Ok(content.lines().map(str::to_string).collect())
    }

    fn read_records(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        let records = self
            .read_lines()?
            .iter()
            .skip(1)
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| {
                let entry = LedgerEntry::parse_line(line);
                if entry.is_none() {
                    tracing::warn!("Ignoring malformed ledger line: {:?}", line);
                }
                entry
            })
            .collect();
        Ok(records)
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".lock");
        self.path.with_file_name(name)
    }

    /// Take the writer lock. Released when the returned handle drops.
    fn acquire_lock(&self) -> Result<File, LedgerError> {
        let lock_path = self.lock_path();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| LedgerError::io(&lock_path, e))?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(file),
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                Err(LedgerError::Locked {
                    path: self.path.clone(),
                })
            }
            Err(e) => Err(LedgerError::io(&lock_path, e)),
        }
    }

    fn append_once(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        self.ensure_exists()?;
        let _lock = self.acquire_lock()?;

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| LedgerError::io(&self.path, e))?;
        let line = if ends_with_newline(&mut file).map_err(|e| LedgerError::io(&self.path, e))? {
            format!("{}\n", entry.to_line())
        } else {
            format!("\n{}\n", entry.to_line())
        };
        file.write_all(line.as_bytes())
            .and_then(|_| file.sync_data())
            .map_err(|e| LedgerError::io(&self.path, e))
    }

    fn rewrite_once(&self, entry: &LedgerEntry) -> Result<bool, LedgerError> {
        self.ensure_exists()?;
        let _lock = self.acquire_lock()?;

        let lines = self.read_lines()?;
        let mut replaced = false;
        let mut output = String::new();

        for (index, line) in lines.iter().enumerate() {
            if index > 0 && record::identity_field(line) == Some(entry.identity.as_str()) {
                if !replaced {
                    output.push_str(&entry.to_line());
                    output.push('\n');
                    replaced = true;
                }
                continue;
            }
            output.push_str(line);
            output.push('\n');
        }
        if !replaced {
            output.push_str(&entry.to_line());
            output.push('\n');
        }

        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut temp = NamedTempFile::new_in(dir).map_err(|e| LedgerError::io(dir, e))?;
        temp.write_all(output.as_bytes())
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|e| LedgerError::io(temp.path(), e))?;
        temp.persist(&self.path)
            .map_err(|e| LedgerError::Replace {
                path: self.path.clone(),
                source: e.error,
            })?;

        Ok(replaced)
    }
}

/// A hand-edited ledger may lack the trailing newline
fn ends_with_newline(file: &mut File) -> io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}
