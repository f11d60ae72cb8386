//! OCR Module
//!
//! The transform step of the pipeline: an external engine behind the
//! [`Transformer`] trait, the failure taxonomy it reports with, and the
//! decrypt pass that runs before the per-document loop.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ocr_pipeline::config::OcrSettings;
//! use ocr_pipeline::ocr::{OcrMyPdf, Transformer, TransformRequest};
//!
//! let engine = OcrMyPdf::new(OcrSettings::default());
//! let status = engine.transform(&TransformRequest {
//!     input: "scans/A.pdf.tmp".into(),
//!     output: "scans/A.pdf".into(),
//!     identity: ocr_pipeline::identity::resolve(path)?,
//!     problematic: false,
//!     sidecar: false,
//! }).await?;
//! ```

mod decrypt;
mod provider;
mod types;

pub use decrypt::{is_encrypted_pdf, CommandDecryptor, DecryptError, Decryptor};
pub use provider::{classify_exit, OcrMyPdf, Transformer};
pub use types::{
    Disposition, FailureKind, FailurePolicy, Severity, TransformError, TransformRequest,
};
