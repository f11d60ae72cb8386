//! OCR Types
//!
//! Transform requests, the failure taxonomy and the per-kind handling policy.

use std::fmt;
use std::path::PathBuf;

use crate::identity::Identity;

/// Input for one transform invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformRequest {
    /// Staging artifact the engine reads
    pub input: PathBuf,
    /// Original document path the engine writes
    pub output: PathBuf,
    /// Identity to embed in the output
    pub identity: Identity,
    /// Reprocess with relaxed settings
    pub problematic: bool,
    /// Also write a plain-text sidecar next to the output
    pub sidecar: bool,
}

/// Transform failures
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    #[error("Input is encrypted: {0}")]
    EncryptedInput(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Unclassified failure: {0}")]
    Unclassified(String),
}

impl TransformError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::MissingDependency(_) => FailureKind::MissingDependency,
            Self::EncryptedInput(_) => FailureKind::EncryptedInput,
            Self::Transient(_) => FailureKind::Transient,
            Self::Unclassified(_) => FailureKind::Unclassified,
        }
    }

    fn detail(&self) -> &str {
        match self {
            Self::MissingDependency(d)
            | Self::EncryptedInput(d)
            | Self::Transient(d)
            | Self::Unclassified(d) => d,
        }
    }

    /// Tag the failure with its severity
    pub fn classify(&self) -> Disposition {
        let kind = self.kind();
        let detail = self.detail().to_string();
        match kind.policy().severity {
            Severity::Recoverable => Disposition::Recoverable { kind, detail },
            Severity::Fatal => Disposition::Fatal { kind, detail },
        }
    }
}

/// Failure classes of the transform step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    MissingDependency,
    EncryptedInput,
    Transient,
    Unclassified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Skip the document and continue with the next one
    Recoverable,
    /// Stop the run after this document
    Fatal,
}

/// How the orchestrator reacts to a failure kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailurePolicy {
    pub severity: Severity,
    /// Rename the staging artifact back
    pub restore: bool,
    /// Ask the trigger for an immediate re-run
    pub request_rerun: bool,
    /// Wait before stopping
    pub pause: bool,
    /// Notification urgency
    pub urgent: bool,
}

impl FailureKind {
    pub fn policy(self) -> FailurePolicy {
        match self {
            // The artifact stays staged; the next sweep restores it
            Self::MissingDependency => FailurePolicy {
                severity: Severity::Fatal,
                restore: false,
                request_rerun: false,
                pause: true,
                urgent: false,
            },
            Self::EncryptedInput => FailurePolicy {
                severity: Severity::Recoverable,
                restore: true,
                request_rerun: false,
                pause: false,
                urgent: false,
            },
            Self::Transient => FailurePolicy {
                severity: Severity::Recoverable,
                restore: true,
                request_rerun: true,
                pause: false,
                urgent: true,
            },
            Self::Unclassified => FailurePolicy {
                severity: Severity::Fatal,
                restore: true,
                request_rerun: false,
                pause: false,
                urgent: true,
            },
        }
    }

    /// User-facing message for a document that failed with this kind
    pub fn notice(self, name: &str, detail: &str) -> String {
        match self {
            Self::MissingDependency => format!("Cannot OCR '{}': {}", name, detail),
            Self::EncryptedInput => format!(
                "Cannot OCR '{}'. PDF is encrypted. Please remove any passwords, and the file will be rescanned automatically during the next run.",
                name
            ),
            Self::Transient => format!("Error processing '{}'. Restarting the job...", name),
            Self::Unclassified => format!(
                "Error processing '{}'. Please refer to the log output.",
                name
            ),
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::MissingDependency => "missing dependency",
            Self::EncryptedInput => "encrypted input",
            Self::Transient => "transient",
            Self::Unclassified => "unclassified",
        };
        f.write_str(name)
    }
}

/// Classified transform failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Recoverable { kind: FailureKind, detail: String },
    Fatal { kind: FailureKind, detail: String },
}

impl Disposition {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Recoverable { kind, .. } | Self::Fatal { kind, .. } => *kind,
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            Self::Recoverable { detail, .. } | Self::Fatal { detail, .. } => detail,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        let fatal = TransformError::MissingDependency("tesseract".into()).classify();
        assert!(fatal.is_fatal());
        assert_eq!(fatal.kind(), FailureKind::MissingDependency);
        assert_eq!(fatal.detail(), "tesseract");

        let recoverable = TransformError::Transient("timed out".into()).classify();
        assert_eq!(
            recoverable,
            Disposition::Recoverable {
                kind: FailureKind::Transient,
                detail: "timed out".into()
            }
        );
        assert!(TransformError::Unclassified("boom".into()).classify().is_fatal());
        assert!(!TransformError::EncryptedInput("x".into()).classify().is_fatal());
    }

    #[test]
    fn test_policy_table() {
        let missing = FailureKind::MissingDependency.policy();
        assert!(!missing.restore && missing.pause);

        let transient = FailureKind::Transient.policy();
        assert!(transient.restore && transient.request_rerun && transient.urgent);

        let encrypted = FailureKind::EncryptedInput.policy();
        assert!(encrypted.restore && !encrypted.request_rerun);

        let unclassified = FailureKind::Unclassified.policy();
        assert_eq!(unclassified.severity, Severity::Fatal);
        assert!(unclassified.restore && unclassified.urgent);
    }

    #[test]
    fn test_notice_names_the_document() {
        let notice = FailureKind::EncryptedInput.notice("A.pdf", "");
        assert!(notice.contains("'A.pdf'"));
        assert!(notice.contains("PDF is encrypted"));
    }
}
