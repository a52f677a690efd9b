use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::catalog::{CatalogFile, PatientCard};
use super::enums::{DocumentStatus, Extractor};

pub const INDEX_VERSION: u32 = 1;

/// Extracted-text state of one (patient, file) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub patient_key: String,
    pub patient_display_name: Option<String>,
    pub study_id: Option<String>,
    pub case_bucket: Option<String>,
    pub svt_status: Option<String>,
    pub file_id: String,
    pub file_name: String,
    pub relative_path: String,
    pub category: Option<String>,
    pub mime_type: Option<String>,
    pub extension: String,
    pub updated_at: Option<String>,
    pub size_bytes: u64,
    /// `"{len}:{mtime_ns}"` of the source file when it was last looked at.
    pub signature: Option<String>,
    pub status: DocumentStatus,
    pub error: Option<String>,
    pub extractor: Extractor,
    pub indexed_at: DateTime<Utc>,
    pub text: String,
    pub text_chars: usize,
    pub truncated: bool,
}

impl DocumentRecord {
    fn base(
        patient: &PatientCard,
        file: &CatalogFile,
        signature: Option<String>,
        status: DocumentStatus,
        extractor: Extractor,
    ) -> Self {
        Self {
            patient_key: patient.patient_key.clone(),
            patient_display_name: patient.display_name.clone(),
            study_id: patient.study_id.clone(),
            case_bucket: patient.case_bucket.clone(),
            svt_status: patient.svt_status.clone(),
            file_id: file.file_id.clone(),
            file_name: file.file_name.clone(),
            relative_path: file.relative_path.clone(),
            category: file.category.clone(),
            mime_type: file.mime_type.clone(),
            extension: file.extension.clone(),
            updated_at: file.updated_at.clone(),
            size_bytes: file.size_bytes,
            signature,
            status,
            error: None,
            extractor,
            indexed_at: Utc::now(),
            text: String::new(),
            text_chars: 0,
            truncated: false,
        }
    }

    /// Successful extraction. `text` is cut to `max_chars` characters.
    pub fn indexed(
        patient: &PatientCard,
        file: &CatalogFile,
        signature: String,
        text: String,
        extractor: Extractor,
        max_chars: usize,
    ) -> Self {
        let (text, truncated) = truncate_chars(text, max_chars);
        let mut record = Self::base(patient, file, Some(signature), DocumentStatus::Indexed, extractor);
        record.text_chars = text.chars().count();
        record.text = text;
        record.truncated = truncated;
        record
    }

    pub fn failed(
        patient: &PatientCard,
        file: &CatalogFile,
        signature: Option<String>,
        extractor: Extractor,
        error: impl Into<String>,
    ) -> Self {
        let mut record = Self::base(patient, file, signature, DocumentStatus::Failed, extractor);
        record.error = Some(error.into());
        record
    }

    pub fn pending(
        patient: &PatientCard,
        file: &CatalogFile,
        signature: String,
        reason: impl Into<String>,
    ) -> Self {
        let mut record = Self::base(patient, file, Some(signature), DocumentStatus::Pending, Extractor::Queued);
        record.error = Some(reason.into());
        record
    }

    /// Copy catalog-owned attributes onto an unchanged record without touching its text.
    pub fn refresh_metadata(&mut self, patient: &PatientCard, file: &CatalogFile) {
        self.patient_display_name = patient.display_name.clone();
        self.study_id = patient.study_id.clone();
        self.case_bucket = patient.case_bucket.clone();
        self.svt_status = patient.svt_status.clone();
        self.category = file.category.clone();
        self.updated_at = file.updated_at.clone();
        self.size_bytes = file.size_bytes;
        self.mime_type = file.mime_type.clone();
        self.extension = file.extension.clone();
        self.file_name = file.file_name.clone();
        self.relative_path = file.relative_path.clone();
    }

    pub fn is_lab_report(&self) -> bool {
        self.category
            .as_deref()
            .map(|c| c.trim().eq_ignore_ascii_case("lab_report"))
            .unwrap_or(false)
    }
}

/// Durable form of the document index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub version: u32,
    pub updated_at: Option<DateTime<Utc>>,
    pub last_cycle_started_at: Option<DateTime<Utc>>,
    pub last_cycle_finished_at: Option<DateTime<Utc>>,
    pub last_cycle_error: Option<String>,
    pub documents: BTreeMap<String, DocumentRecord>,
}

/// Lowercased `"{patient_key}::{file_id}"`.
pub fn document_key(patient_key: &str, file_id: &str) -> String {
    format!("{patient_key}::{file_id}").to_lowercase()
}

/// Keep at most `max_chars` characters. Returns whether anything was cut.
pub fn truncate_chars(text: String, max_chars: usize) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => {
            let mut text = text;
            text.truncate(byte_idx);
            (text, true)
        }
        None => (text, false),
    }
}

/// Borrowing variant of [`truncate_chars`] for previews.
pub fn prefix_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}
