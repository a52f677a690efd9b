//! Direct read of plain-text formats. No external tool involved.

use std::path::Path;

use super::sanitize::normalize_extracted_text;
use super::ExtractionError;

/// Read a text file as UTF-8, replacing invalid bytes, and normalize it.
///
/// An empty result after normalization is reported as [`ExtractionError::EmptyText`].
pub fn read_text_file(path: &Path) -> Result<String, ExtractionError> {
    let bytes = std::fs::read(path)?;
    let text = normalize_extracted_text(&String::from_utf8_lossy(&bytes));
    if text.is_empty() {
        return Err(ExtractionError::EmptyText);
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_and_normalizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        std::fs::write(&path, "Platelets 520   \n\n").unwrap();
        assert_eq!(read_text_file(&path).unwrap(), "Platelets 520");
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        std::fs::write(&path, b"Hb \xff 9.8").unwrap();
        let text = read_text_file(&path).unwrap();
        assert!(text.contains('\u{FFFD}'));
        assert!(text.ends_with("9.8"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_text_file(&dir.path().join("gone.txt")).unwrap_err();
        assert!(matches!(err, ExtractionError::Io(_)));
    }

    #[test]
    fn blank_file_is_empty_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blank.md");
        std::fs::write(&path, "   \n").unwrap();
        assert!(matches!(read_text_file(&path).unwrap_err(), ExtractionError::EmptyText));
    }
}
