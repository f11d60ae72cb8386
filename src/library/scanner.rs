//! Library scanner for the working tree
//!
//! Lists documents (and leftover staging artifacts) below the working root,
//! never descending into the backup tree.

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

use crate::staging::STAGING_SUFFIX;

/// Extension of the documents the pipeline works on
pub const DOCUMENT_EXTENSION: &str = "pdf";

/// A file found below the scanned root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentEntry {
    /// File name
    pub name: String,
    /// Full path
    pub path: PathBuf,
    /// Path relative to the scanned root
    pub relative: PathBuf,
}

impl DocumentEntry {
    /// Size in kilobytes (0 if the file vanished)
    pub fn size_kb(&self) -> u64 {
        fs::metadata(&self.path)
            .map(|meta| meta.len() / 1_000)
            .unwrap_or(0)
    }
}

/// Scanner for a document tree
#[derive(Debug, Clone)]
pub struct LibraryScanner {
    root: PathBuf,
    excluded: Option<PathBuf>,
}

impl LibraryScanner {
    /// Create a scanner for `root`, skipping the `excluded` subtree
    pub fn new(root: impl Into<PathBuf>, excluded: Option<PathBuf>) -> Self {
        Self {
            root: root.into(),
            excluded,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All documents, sorted by path
    pub fn documents(&self) -> Vec<DocumentEntry> {
        self.scan(|name| has_extension(name, DOCUMENT_EXTENSION))
    }

    /// Staging artifacts (`<name>.pdf.tmp`), sorted by path
    pub fn staging_artifacts(&self) -> Vec<DocumentEntry> {
        let suffix = format!(".{}.{}", DOCUMENT_EXTENSION, STAGING_SUFFIX);
        self.scan(|name| name.to_ascii_lowercase().ends_with(&suffix))
    }

    fn scan<F>(&self, matches: F) -> Vec<DocumentEntry>
    where
        F: Fn(&str) -> bool,
    {
        let start = std::time::Instant::now();
        let excluded_canonical = self
            .excluded
            .as_ref()
            .and_then(|path| fs::canonicalize(path).ok());

        let walker = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !self.is_excluded(entry, excluded_canonical.as_deref()));

        let mut entries = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().to_string();
            if !matches(&name) {
                continue;
            }

            let path = entry.into_path();
            let relative = path
                .strip_prefix(&self.root)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| PathBuf::from(&name));
            entries.push(DocumentEntry {
                name,
                path,
                relative,
            });
        }

        tracing::debug!(
            "Scanned {} in {:?}: {} matching files",
            self.root.display(),
            start.elapsed(),
            entries.len()
        );
        entries
    }

    fn is_excluded(&self, entry: &DirEntry, excluded_canonical: Option<&Path>) -> bool {
        let Some(excluded) = self.excluded.as_deref() else {
            return false;
        };
        if !entry.file_type().is_dir() || entry.depth() == 0 {
            return false;
        }
        entry.path() == excluded
            || excluded_canonical.is_some_and(|canonical| {
                fs::canonicalize(entry.path()).is_ok_and(|path| path == canonical)
            })
    }
}

fn has_extension(name: &str, extension: &str) -> bool {
    name.rsplit_once('.')
        .is_some_and(|(stem, ext)| !stem.is_empty() && ext.eq_ignore_ascii_case(extension))
}
