use serde::{Deserialize, Serialize};

/// Patient attributes denormalized onto every indexed document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientCard {
    pub patient_key: String,
    pub display_name: Option<String>,
    pub study_id: Option<String>,
    pub case_bucket: Option<String>,
    pub svt_status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogFile {
    pub file_id: String,
    pub file_name: String,
    /// Path relative to the vault root.
    pub relative_path: String,
    /// Lowercase, with or without the leading dot.
    pub extension: String,
    pub mime_type: Option<String>,
    pub category: Option<String>,
    pub size_bytes: u64,
    /// Source modification time as reported by the catalog (ISO-8601).
    pub updated_at: Option<String>,
    pub is_text: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub patient: PatientCard,
    pub files: Vec<CatalogFile>,
}

impl CatalogFile {
    /// Extension without the leading dot, lowercased.
    pub fn normalized_extension(&self) -> String {
        normalize_extension(&self.extension)
    }
}

pub fn normalize_extension(raw: &str) -> String {
    raw.trim().trim_start_matches('.').to_lowercase()
}
