//! Extraction chain shared by the document indexer and attachment jobs.
//!
//! Plain text is read directly. PDFs and images go to the marker tool
//! first; PDFs then fall back to `pdftotext`, other images to `tesseract`.

use std::path::Path;
use std::time::Duration;

use super::command::CommandRunner;
use super::marker::{MarkerTool, OutputDirMode};
use super::ocr::TesseractTool;
use super::pdf::PdfTextTool;
use super::text_only::read_text_file;
use super::types::{ExtractionOutcome, FileDescriptor, TextExtractor};
use super::{is_ocr_extension, ExtractionError};
use crate::config::Settings;
use crate::models::Extractor;

/// Lower bound on the marker timeout.
pub const MIN_MARKER_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionSettings {
    pub marker_command: String,
    pub marker_timeout: Duration,
    pub pdftotext_command: String,
    pub pdftotext_timeout: Duration,
    pub tesseract_command: String,
    pub tesseract_timeout: Duration,
}

impl From<&Settings> for ExtractionSettings {
    fn from(s: &Settings) -> Self {
        Self {
            marker_command: s.marker_command.clone(),
            marker_timeout: Duration::from_secs(s.marker_timeout_secs.max(MIN_MARKER_TIMEOUT_SECS)),
            pdftotext_command: s.pdftotext_command.clone(),
            pdftotext_timeout: Duration::from_secs(s.pdftotext_timeout_secs),
            tesseract_command: s.tesseract_command.clone(),
            tesseract_timeout: Duration::from_secs(s.tesseract_timeout_secs),
        }
    }
}

/// The production extraction pipeline.
pub struct DocumentExtractor {
    runner: CommandRunner,
    marker: MarkerTool,
    pdftotext: PdfTextTool,
    tesseract: TesseractTool,
}

impl DocumentExtractor {
    pub fn new(settings: &ExtractionSettings) -> Result<Self, ExtractionError> {
        Ok(Self {
            runner: CommandRunner::new()?,
            marker: MarkerTool::new(&settings.marker_command, settings.marker_timeout),
            pdftotext: PdfTextTool::new(&settings.pdftotext_command, settings.pdftotext_timeout),
            tesseract: TesseractTool::new(&settings.tesseract_command, settings.tesseract_timeout),
        })
    }

    /// Effective marker command line (blank configuration resolved to the default).
    pub fn marker_command(&self) -> &str {
        self.marker.command()
    }

    pub fn marker_mode(&self) -> Option<OutputDirMode> {
        self.marker.mode()
    }

    fn extract_with_tools(&self, path: &Path, extension: &str) -> ExtractionOutcome {
        let marker_err = match self.marker.extract(&self.runner, path) {
            Ok(text) => return ExtractionOutcome::success(text, Extractor::Marker),
            Err(e) => e,
        };
        tracing::debug!(path = %path.display(), error = %marker_err, "Marker failed, trying fallback");

        let (fallback, extractor) = if extension == "pdf" {
            (self.pdftotext.extract(&self.runner, path), Extractor::Pdftotext)
        } else {
            (self.tesseract.extract(&self.runner, path), Extractor::Tesseract)
        };

        match fallback {
            Ok(text) => ExtractionOutcome::success(text, extractor),
            Err(fallback_err) => {
                ExtractionOutcome::failure(Extractor::Marker, format!("{marker_err}; {fallback_err}"))
            }
        }
    }
}

impl TextExtractor for DocumentExtractor {
    fn extract(&self, path: &Path, descriptor: &FileDescriptor) -> ExtractionOutcome {
        if descriptor.reads_as_text() {
            return match read_text_file(path) {
                Ok(text) => ExtractionOutcome::success(text, Extractor::NativeText),
                Err(e) => ExtractionOutcome::failure(Extractor::NativeText, e.to_string()),
            };
        }

        if is_ocr_extension(&descriptor.extension) {
            return self.extract_with_tools(path, &descriptor.extension);
        }

        let shown = if descriptor.extension.is_empty() {
            String::new()
        } else {
            format!(".{}", descriptor.extension)
        };
        ExtractionOutcome::failure(
            Extractor::Unsupported,
            ExtractionError::Unsupported(shown).to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_with(marker: &str, pdftotext: &str, tesseract: &str) -> ExtractionSettings {
        ExtractionSettings {
            marker_command: marker.into(),
            marker_timeout: Duration::from_secs(10),
            pdftotext_command: pdftotext.into(),
            pdftotext_timeout: Duration::from_secs(10),
            tesseract_command: tesseract.into(),
            tesseract_timeout: Duration::from_secs(10),
        }
    }

    fn missing_tools() -> ExtractionSettings {
        settings_with(
            "no-such-marker-casevault",
            "no-such-pdftotext-casevault",
            "no-such-tesseract-casevault",
        )
    }

    #[test]
    fn marker_timeout_has_floor() {
        let settings = Settings {
            marker_timeout_secs: 2,
            ..Settings::default()
        };
        let derived = ExtractionSettings::from(&settings);
        assert_eq!(derived.marker_timeout, Duration::from_secs(10));
    }

    #[test]
    fn plain_text_is_read_natively() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.md");
        std::fs::write(&path, "Platelets 520\n").unwrap();
        let extractor = DocumentExtractor::new(&missing_tools()).unwrap();
        let outcome = extractor.extract(&path, &FileDescriptor::from_path(&path));
        assert_eq!(outcome, ExtractionOutcome::success("Platelets 520".into(), Extractor::NativeText));
    }

    #[test]
    fn unreadable_text_reports_native_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.txt");
        let extractor = DocumentExtractor::new(&missing_tools()).unwrap();
        let outcome = extractor.extract(&path, &FileDescriptor::from_path(&path));
        assert!(outcome.text.is_none());
        assert_eq!(outcome.extractor, Extractor::NativeText);
        assert!(outcome.error.is_some());
    }

    #[test]
    fn unsupported_extension_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("letter.docx");
        std::fs::write(&path, b"PK").unwrap();
        let extractor = DocumentExtractor::new(&missing_tools()).unwrap();
        let outcome = extractor.extract(&path, &FileDescriptor::from_path(&path));
        assert_eq!(outcome.extractor, Extractor::Unsupported);
        assert_eq!(
            outcome.error.as_deref(),
            Some("Unsupported extension for OCR indexing: .docx")
        );
    }

    #[test]
    fn missing_tools_combine_both_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.png");
        std::fs::write(&path, b"png").unwrap();
        let extractor = DocumentExtractor::new(&missing_tools()).unwrap();
        let outcome = extractor.extract(&path, &FileDescriptor::from_path(&path));
        assert_eq!(outcome.extractor, Extractor::Marker);
        assert_eq!(
            outcome.error.as_deref(),
            Some(
                "Marker command not found: no-such-marker-casevault; \
                 tesseract command not found: no-such-tesseract-casevault"
            )
        );
    }

    #[cfg(unix)]
    #[test]
    fn pdf_falls_back_to_pdftotext() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker.sh");
        std::fs::write(&marker, "echo 'CUDA unavailable' >&2; exit 1\n").unwrap();
        let pdftotext = dir.path().join("pdftotext.sh");
        std::fs::write(&pdftotext, "printf 'Total Bilirubin 2.4 mg/dL\\n'\n").unwrap();
        let input = dir.path().join("lft.pdf");
        std::fs::write(&input, b"%PDF").unwrap();

        let extractor = DocumentExtractor::new(&settings_with(
            &format!("sh {}", marker.display()),
            &format!("sh {}", pdftotext.display()),
            "no-such-tesseract-casevault",
        ))
        .unwrap();
        let outcome = extractor.extract(&input, &FileDescriptor::from_path(&input));
        assert_eq!(
            outcome,
            ExtractionOutcome::success("Total Bilirubin 2.4 mg/dL".into(), Extractor::Pdftotext)
        );
        assert_eq!(extractor.marker_mode(), None);
    }

    #[cfg(unix)]
    #[test]
    fn marker_success_wins() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker.sh");
        std::fs::write(&marker, "printf 'CT abdomen\\n' > \"$3/out.md\"\n").unwrap();
        let input = dir.path().join("ct.pdf");
        std::fs::write(&input, b"%PDF").unwrap();

        let extractor = DocumentExtractor::new(&settings_with(
            &format!("sh {}", marker.display()),
            "no-such-pdftotext-casevault",
            "no-such-tesseract-casevault",
        ))
        .unwrap();
        let outcome = extractor.extract(&input, &FileDescriptor::from_path(&input));
        assert_eq!(outcome, ExtractionOutcome::success("CT abdomen".into(), Extractor::Marker));
        assert_eq!(extractor.marker_mode(), Some(OutputDirMode::Flag));
    }
}
