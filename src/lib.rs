//! OCR Pipeline Library
//!
//! Periodically scans a document tree, OCRs each document once through an
//! external engine and records completion in a flat ledger. Interrupted runs
//! are repaired by the recovery sweep on the next invocation.
//!
//! # Modules
//!
//! - `identity`: content identity of a document (embedded or hashed)
//! - `ledger`: completion ledger with locked, retried writes
//! - `backup`: backup mirror of the working tree
//! - `staging`: rename-out / rename-in protocol around the transform
//! - `recovery`: sweep for orphaned and stale staging artifacts
//! - `orchestrator`: one pipeline run
//! - `ocr`: transform engine, failure taxonomy and decrypt pass
//! - `trigger`, `ui`, `settings`: scheduler, notifications and runtime toggles

pub mod backup;
pub mod config;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod library;
pub mod ocr;
pub mod orchestrator;
pub mod recovery;
pub mod settings;
pub mod staging;
pub mod trigger;
pub mod ui;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use error::{PipelineError, Result};
pub use orchestrator::{RunOrchestrator, RunReport};
