pub mod command;
pub mod marker;
pub mod ocr;
pub mod orchestrator;
pub mod pdf;
pub mod sanitize;
pub mod text_only;
pub mod types;

pub use orchestrator::*;
pub use sanitize::*;
pub use types::*;

use thiserror::Error;

/// Extensions read directly as UTF-8 text.
pub const TEXT_EXTENSIONS: &[&str] = &["md", "txt", "csv", "json", "yaml", "yml"];

/// Extensions handed to the external OCR/document tool.
pub const OCR_EXTENSIONS: &[&str] = &["pdf", "png", "jpg", "jpeg", "tif", "tiff", "bmp", "webp"];

pub fn is_text_extension(ext: &str) -> bool {
    TEXT_EXTENSIONS.contains(&ext)
}

pub fn is_ocr_extension(ext: &str) -> bool {
    OCR_EXTENSIONS.contains(&ext)
}

/// Failures of a single extraction step.
///
/// These never escape the pipeline: the orchestrator renders them into
/// the `error` string of an [`ExtractionOutcome`].
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{tool} command not found: {program}")]
    CommandNotFound { tool: String, program: String },

    #[error("{0}")]
    CommandFailed(String),

    #[error("{tool} timed out after {secs}s")]
    Timeout { tool: String, secs: u64 },

    #[error("{tool} produced empty output")]
    EmptyOutput { tool: String },

    #[error("Marker returned success but no text output was produced")]
    NoMarkerOutput,

    #[error("{tool} command is empty")]
    EmptyCommand { tool: String },

    #[error("Unsupported extension for OCR indexing: {0}")]
    Unsupported(String),

    #[error("Unable to read text file")]
    EmptyText,
}
