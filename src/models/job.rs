use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{ExtractionStatus, Extractor, JobStatus, ReviewDecision, ReviewStatus, Section};

pub const JOB_LOG_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub file_name: String,
    pub stored_path: String,
    #[serde(default)]
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReview {
    pub status: ReviewStatus,
    pub decision: Option<ReviewDecision>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub reviewer_note: Option<String>,
    pub applied_payload: Option<serde_json::Value>,
}

impl Default for JobReview {
    fn default() -> Self {
        Self {
            status: ReviewStatus::NotReady,
            decision: None,
            reviewed_at: None,
            reviewer_note: None,
            applied_payload: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistJob {
    pub job_id: String,
    pub status: JobStatus,
    pub section: Section,
    pub patient_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub uploaded_file: UploadedFile,
    pub result: Option<AttachmentAnalysis>,
    #[serde(default)]
    pub review: JobReview,
}

impl AssistJob {
    /// Put the job back at the start of its lifecycle.
    pub fn reset_to_queued(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Queued;
        self.updated_at = now;
        self.started_at = None;
        self.finished_at = None;
        self.error = None;
        self.result = None;
        self.review = JobReview::default();
    }
}

/// Durable form of the job log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobLog {
    pub version: u32,
    pub updated_at: Option<DateTime<Utc>>,
    pub jobs: HashMap<String, AssistJob>,
}

// ═══════════════════════════════════════════════════════════
// Attachment analysis payload
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabEntry {
    pub date: String,
    pub parameter: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagingEntry {
    pub date: String,
    pub modality: String,
    pub findings: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Suggestions {
    pub lab_entries: Vec<LabEntry>,
    pub imaging_entries: Vec<ImagingEntry>,
    pub extra_fields: BTreeMap<String, String>,
    pub review_notes: Vec<String>,
}

/// Extraction plus auto-fill suggestions for one uploaded attachment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentAnalysis {
    pub section: Section,
    pub extraction_status: ExtractionStatus,
    pub extractor: Extractor,
    pub extraction_error: Option<String>,
    pub extracted_text_preview: String,
    pub suggestions: Suggestions,
}
