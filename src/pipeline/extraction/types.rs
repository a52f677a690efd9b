use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::models::{normalize_extension, CatalogFile, Extractor};

use super::{is_ocr_extension, is_text_extension};

/// What the pipeline needs to know about a file besides its path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    /// Lowercase, no leading dot.
    pub extension: String,
    pub is_text: bool,
}

impl FileDescriptor {
    pub fn new(extension: &str, is_text: bool) -> Self {
        Self {
            extension: normalize_extension(extension),
            is_text,
        }
    }

    /// Descriptor derived only from the path's extension.
    pub fn from_path(path: &Path) -> Self {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        let extension = normalize_extension(&extension);
        let is_text = is_text_extension(&extension);
        Self { extension, is_text }
    }

    pub fn from_catalog(file: &CatalogFile) -> Self {
        Self::new(&file.extension, file.is_text)
    }

    pub fn reads_as_text(&self) -> bool {
        self.is_text || is_text_extension(&self.extension)
    }

    /// Indexable at all: plain text or an OCR-supported format.
    pub fn is_searchable(&self) -> bool {
        self.is_text || is_ocr_extension(&self.extension)
    }

    /// Extraction of this file would spawn an external tool.
    pub fn needs_external_tool(&self) -> bool {
        !self.is_text
    }
}

/// Result of running the pipeline on one file.
///
/// Exactly one of `text` / `error` is set. `extractor` names the
/// method that produced the text, or the primary method that failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionOutcome {
    pub text: Option<String>,
    pub extractor: Extractor,
    pub error: Option<String>,
}

impl ExtractionOutcome {
    pub fn success(text: String, extractor: Extractor) -> Self {
        Self {
            text: Some(text),
            extractor,
            error: None,
        }
    }

    pub fn failure(extractor: Extractor, error: impl Into<String>) -> Self {
        Self {
            text: None,
            extractor,
            error: Some(error.into()),
        }
    }
}

/// Text extraction abstraction (allows mocking for tests)
pub trait TextExtractor: Send + Sync {
    fn extract(&self, path: &Path, descriptor: &FileDescriptor) -> ExtractionOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn descriptor_from_path() {
        let d = FileDescriptor::from_path(&PathBuf::from("/x/Report.MD"));
        assert_eq!(d.extension, "md");
        assert!(d.is_text);
        assert!(d.reads_as_text());

        let d = FileDescriptor::from_path(&PathBuf::from("/x/scan.PDF"));
        assert_eq!(d.extension, "pdf");
        assert!(!d.is_text);
        assert!(d.is_searchable());
        assert!(d.needs_external_tool());

        let d = FileDescriptor::from_path(&PathBuf::from("/x/noext"));
        assert_eq!(d.extension, "");
        assert!(!d.is_searchable());
    }

    #[test]
    fn text_flag_overrides_extension() {
        let d = FileDescriptor::new(".log", true);
        assert!(d.is_searchable());
        assert!(d.reads_as_text());
        assert!(!d.needs_external_tool());
    }

    #[test]
    fn docx_is_not_searchable() {
        assert!(!FileDescriptor::new("docx", false).is_searchable());
    }
}
