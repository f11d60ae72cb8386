//! Decrypt pass
//!
//! Runs before the per-document loop so that password-free but encrypted
//! PDFs (owner password only) can still be transformed.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::DecryptConfig;
use crate::library::DocumentEntry;

#[derive(Debug, thiserror::Error)]
pub enum DecryptError {
    #[error("Could not decrypt {}", .0.join(", "))]
    Failed(Vec<String>),
}

/// Decrypt pass over the working tree
#[async_trait]
pub trait Decryptor: Send + Sync {
    /// Returns how many documents were decrypted
    async fn decrypt(&self, documents: &[DocumentEntry]) -> Result<usize, DecryptError>;
}

/// True when the document parses as a PDF with an encryption dictionary
pub fn is_encrypted_pdf(path: &Path) -> bool {
    match lopdf::Document::load(path) {
        Ok(document) => document.is_encrypted(),
        Err(_) => false,
    }
}

/// Decrypts by running an external command (e.g. `qpdf --decrypt
/// --replace-input {}`) on every encrypted document. `{}` is replaced by the
/// document path; without a placeholder the path is appended.
pub struct CommandDecryptor {
    command: Vec<String>,
    timeout: Duration,
    detect: fn(&Path) -> bool,
}

impl CommandDecryptor {
    pub fn new(config: &DecryptConfig) -> Self {
        Self {
            command: config.command.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            detect: is_encrypted_pdf,
        }
    }

    /// Replace the encryption check
    pub fn with_detector(mut self, detect: fn(&Path) -> bool) -> Self {
        self.detect = detect;
        self
    }

    fn command_for(&self, path: &Path) -> Option<Command> {
        let (program, rest) = self.command.split_first()?;
        let path_arg = path.to_string_lossy();

        let mut command = Command::new(program);
        let mut substituted = false;
        for arg in rest {
            if arg.contains("{}") {
                command.arg(arg.replace("{}", &path_arg));
                substituted = true;
            } else {
                command.arg(arg);
            }
        }
        if !substituted {
            command.arg(path);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Some(command)
    }

    async fn decrypt_one(&self, path: &Path) -> Result<(), String> {
        let Some(mut command) = self.command_for(path) else {
            return Err("no decrypt command configured".to_string());
        };

        match tokio::time::timeout(self.timeout, command.output()).await {
            Err(_) => Err(format!("timed out after {:?}", self.timeout)),
            Ok(Err(e)) => Err(e.to_string()),
            Ok(Ok(output)) if output.status.success() => Ok(()),
            Ok(Ok(output)) => Err(format!(
                "{}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )),
        }
    }
}

#[async_trait]
impl Decryptor for CommandDecryptor {
    async fn decrypt(&self, documents: &[DocumentEntry]) -> Result<usize, DecryptError> {
        if self.command.is_empty() {
            tracing::debug!("No decrypt command configured, skipping decrypt pass");
            return Ok(0);
        }

        let mut decrypted = 0;
        let mut failed = Vec::new();

        for document in documents {
            if !(self.detect)(&document.path) {
                continue;
            }
            match self.decrypt_one(&document.path).await {
                Ok(()) => {
                    tracing::info!(path = %document.path.display(), "Decrypted");
                    decrypted += 1;
                }
                Err(e) => {
                    tracing::warn!("Failed to decrypt {}: {}", document.path.display(), e);
                    failed.push(document.name.clone());
                }
            }
        }

        if failed.is_empty() {
            Ok(decrypted)
        } else {
            Err(DecryptError::Failed(failed))
        }
    }
}
