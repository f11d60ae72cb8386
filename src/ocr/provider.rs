//! OCR Providers
//!
//! The transform step behind a trait, and the `ocrmypdf` implementation.

use std::ffi::OsString;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::types::{TransformError, TransformRequest};
use crate::config::OcrSettings;

/// External transform
#[async_trait]
pub trait Transformer: Send + Sync {
    /// Engine name for logs
    fn name(&self) -> &'static str;

    /// Read `request.input`, write `request.output`. `Ok` carries the exit
    /// status: zero is success, anything else a soft failure.
    async fn transform(&self, request: &TransformRequest) -> Result<i32, TransformError>;
}

/// `ocrmypdf` command line engine
pub struct OcrMyPdf {
    settings: OcrSettings,
}

impl OcrMyPdf {
    pub fn new(settings: OcrSettings) -> Self {
        Self { settings }
    }

    /// Command line arguments for one request
    pub fn build_args(&self, request: &TransformRequest) -> Vec<OsString> {
        let s = &self.settings;
        let redo_ocr = s.redo_ocr && !request.problematic;
        if s.redo_ocr && request.problematic {
            tracing::info!("Document is marked problematic, forcing OCR");
        }

        let mut args: Vec<OsString> = Vec::new();
        let mut push = |arg: &str| args.push(arg.into());

        if redo_ocr {
            push("--redo-ocr");
        } else {
            push("--force-ocr");
            if s.deskew {
                push("--deskew");
            }
            if s.clean {
                push("--clean");
            }
            if let Some(unpaper_args) = &s.unpaper_args {
                push("--unpaper-args");
                push(unpaper_args);
            }
        }
        if s.rotate_pages {
            push("--rotate-pages");
            push("--rotate-pages-threshold");
            push(&s.rotate_pages_threshold.to_string());
        }

        push("-l");
        push(&s.language);
        push("--skip-big");
        push(&s.skip_big.to_string());
        push("--output-type");
        push(&s.output_type);
        push("--optimize");
        push(&s.optimize.to_string());
        push("--tesseract-timeout");
        push(&s.tesseract_timeout_secs.to_string());
        if let Some(jobs) = s.jobs {
            push("--jobs");
            push(&jobs.to_string());
        }
        if s.quiet {
            push("-q");
        }
        push("--keywords");
        push(&request.identity.keywords());

        if request.sidecar {
            args.push("--sidecar".into());
            args.push(request.output.with_extension("txt").into_os_string());
        }
        args.push(request.input.clone().into_os_string());
        args.push(request.output.clone().into_os_string());
        args
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.settings.timeout_secs)
    }
}

#[async_trait]
impl Transformer for OcrMyPdf {
    fn name(&self) -> &'static str {
        "ocrmypdf"
    }

    async fn transform(&self, request: &TransformRequest) -> Result<i32, TransformError> {
        let args = self.build_args(request);
        tracing::debug!(
            "Running {} on {}",
            self.settings.command,
            request.input.display()
        );

        let mut command = Command::new(&self.settings.command);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout(), command.output()).await {
            Err(_) => {
                return Err(TransformError::Transient(format!(
                    "{} timed out after {:?}",
                    self.settings.command,
                    self.timeout()
                )))
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TransformError::MissingDependency(format!(
                    "{} is not installed or not on PATH",
                    self.settings.command
                )))
            }
            Ok(Err(e)) => {
                return Err(TransformError::Unclassified(format!(
                    "Failed to start {}: {}",
                    self.settings.command, e
                )))
            }
            Ok(Ok(output)) => output,
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = last_line(&stderr);
        if !output.status.success() {
            tracing::debug!("{} stderr:\n{}", self.settings.command, stderr);
        }
        classify_exit(output.status.code(), detail)
    }
}

/// Map an `ocrmypdf` exit status onto the failure taxonomy. `None` means the
/// process was killed by a signal.
pub fn classify_exit(code: Option<i32>, detail: &str) -> Result<i32, TransformError> {
    let detail = |fallback: &str| {
        if detail.is_empty() {
            fallback.to_string()
        } else {
            detail.to_string()
        }
    };

    match code {
        Some(0) => Ok(0),
        Some(3) => Err(TransformError::MissingDependency(detail(
            "a required program is missing",
        ))),
        Some(8) => Err(TransformError::EncryptedInput(detail("input PDF is encrypted"))),
        Some(4) => Err(TransformError::Transient(detail("output file is invalid"))),
        Some(7) => Err(TransformError::Transient(detail("a child process failed"))),
        None => Err(TransformError::Transient(detail("terminated by a signal"))),
        Some(code @ (1 | 9 | 15)) => Err(TransformError::Unclassified(detail(&format!(
            "exit code {}",
            code
        )))),
        Some(code) => Ok(code),
    }
}

fn last_line(text: &str) -> &str {
    text.lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("")
}
