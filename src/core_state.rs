//! Service handle shared with the HTTP layer.
//!
//! `CoreState` owns the document indexer, the attachment job manager and
//! their background threads. Every call goes through it so a caller gets
//! one error type, and a "not initialized" answer before the services are
//! started or after they are shut down.

use std::sync::{Arc, Mutex, RwLock};

use serde_json::Value;

use crate::models::{AssistJob, UploadedFile};
use crate::pipeline::assist_jobs::{AssistJobError, AssistJobManager};
use crate::pipeline::background::{BackgroundHandle, DEFAULT_STOP_WAIT};
use crate::pipeline::extraction::ExtractionError;
use crate::pipeline::indexer::{
    DocumentIndexer, ExtractedDocument, IndexStatus, IndexerError, LabTimelineRow, LabTrends,
    PatientDocumentRow, SearchHit,
};

// ═══════════════════════════════════════════════════════════
// CoreState
// ═══════════════════════════════════════════════════════════

pub struct CoreState {
    indexer: RwLock<Option<Arc<DocumentIndexer>>>,
    jobs: RwLock<Option<Arc<AssistJobManager>>>,
    /// Indexer loop and job worker, stopped by `shutdown`.
    workers: Mutex<Vec<BackgroundHandle>>,
}

impl CoreState {
    /// Empty state; every service call reports "not initialized".
    pub fn new() -> Self {
        Self {
            indexer: RwLock::new(None),
            jobs: RwLock::new(None),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn set_indexer(&self, indexer: Arc<DocumentIndexer>) -> Result<(), CoreError> {
        *self.indexer.write().map_err(|_| CoreError::LockPoisoned)? = Some(indexer);
        Ok(())
    }

    pub fn set_job_manager(&self, jobs: Arc<AssistJobManager>) -> Result<(), CoreError> {
        *self.jobs.write().map_err(|_| CoreError::LockPoisoned)? = Some(jobs);
        Ok(())
    }

    /// Keep a background thread alive until `shutdown`.
    pub fn adopt_worker(&self, handle: BackgroundHandle) -> Result<(), CoreError> {
        self.workers
            .lock()
            .map_err(|_| CoreError::LockPoisoned)?
            .push(handle);
        Ok(())
    }

    pub fn indexer(&self) -> Result<Arc<DocumentIndexer>, CoreError> {
        self.indexer
            .read()
            .map_err(|_| CoreError::LockPoisoned)?
            .clone()
            .ok_or(CoreError::NotInitialized("document indexer"))
    }

    pub fn job_manager(&self) -> Result<Arc<AssistJobManager>, CoreError> {
        self.jobs
            .read()
            .map_err(|_| CoreError::LockPoisoned)?
            .clone()
            .ok_or(CoreError::NotInitialized("attachment assist jobs"))
    }

    /// Stop both background threads (bounded wait each) and detach the services.
    pub fn shutdown(&self) {
        let handles: Vec<BackgroundHandle> = match self.workers.lock() {
            Ok(mut workers) => workers.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };
        for mut handle in handles {
            handle.shutdown(DEFAULT_STOP_WAIT);
        }
        if let Ok(mut indexer) = self.indexer.write() {
            *indexer = None;
        }
        if let Ok(mut jobs) = self.jobs.write() {
            *jobs = None;
        }
        tracing::info!("Document services stopped");
    }

    // ── Document index ──────────────────────────────────────

    pub fn index_status(&self) -> Result<IndexStatus, CoreError> {
        Ok(self.indexer()?.status()?)
    }

    pub fn run_index_cycle(
        &self,
        force: bool,
        patient_key: Option<&str>,
        file_id: Option<&str>,
    ) -> Result<IndexStatus, CoreError> {
        Ok(self.indexer()?.run_index_cycle(force, patient_key, file_id)?)
    }

    pub fn reindex(
        &self,
        force: bool,
        patient_key: Option<&str>,
        file_id: Option<&str>,
    ) -> Result<IndexStatus, CoreError> {
        Ok(self.indexer()?.reindex(force, patient_key, file_id)?)
    }

    pub fn search_documents(
        &self,
        query: &str,
        patient_key: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<SearchHit>, CoreError> {
        Ok(self.indexer()?.search(query, patient_key, limit)?)
    }

    pub fn list_patient_documents(&self, patient_key: &str) -> Result<Vec<PatientDocumentRow>, CoreError> {
        Ok(self.indexer()?.list_patient_documents(patient_key)?)
    }

    pub fn list_patient_lab_timeline(
        &self,
        patient_key: &str,
        limit: Option<usize>,
    ) -> Result<Vec<LabTimelineRow>, CoreError> {
        Ok(self.indexer()?.list_patient_lab_timeline(patient_key, limit)?)
    }

    pub fn list_patient_lab_trends(
        &self,
        patient_key: &str,
        limit_reports: Option<usize>,
    ) -> Result<LabTrends, CoreError> {
        Ok(self.indexer()?.list_patient_lab_trends(patient_key, limit_reports)?)
    }

    pub fn get_extracted_document(
        &self,
        patient_key: &str,
        file_id: &str,
        max_chars: Option<usize>,
    ) -> Result<ExtractedDocument, CoreError> {
        Ok(self.indexer()?.get_extracted_document(patient_key, file_id, max_chars)?)
    }

    // ── Attachment assist jobs ──────────────────────────────

    pub fn create_assist_job(
        &self,
        section: &str,
        patient_id: Option<&str>,
        uploaded_file: UploadedFile,
    ) -> Result<AssistJob, CoreError> {
        Ok(self.job_manager()?.create_job(section, patient_id, uploaded_file)?)
    }

    pub fn list_assist_jobs(
        &self,
        patient_id: Option<&str>,
        status: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<AssistJob>, CoreError> {
        Ok(self.job_manager()?.list_jobs(patient_id, status, limit)?)
    }

    pub fn get_assist_job(&self, job_id: &str) -> Result<AssistJob, CoreError> {
        Ok(self.job_manager()?.get_job(job_id)?)
    }

    pub fn review_assist_job(
        &self,
        job_id: &str,
        decision: &str,
        reviewer_note: Option<&str>,
        applied_payload: Option<Value>,
    ) -> Result<AssistJob, CoreError> {
        Ok(self
            .job_manager()?
            .set_review(job_id, decision, reviewer_note, applied_payload)?)
    }

    pub fn retry_assist_job(&self, job_id: &str) -> Result<AssistJob, CoreError> {
        Ok(self.job_manager()?.retry_job(job_id)?)
    }
}

impl Default for CoreState {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════
// Error types
// ═══════════════════════════════════════════════════════════

/// Caller-facing failure class, for mapping onto transport status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidArgument,
    InvalidState,
    Unavailable,
    Internal,
}

/// Errors from CoreState operations.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("{0} is not initialized")]
    NotInitialized(&'static str),
    #[error("Internal lock error")]
    LockPoisoned,
    #[error(transparent)]
    Indexer(#[from] IndexerError),
    #[error(transparent)]
    Jobs(#[from] AssistJobError),
    #[error("Extraction pipeline unavailable: {0}")]
    Extraction(#[from] ExtractionError),
    #[error("Failed to start background thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotInitialized(_) => ErrorKind::Unavailable,
            Self::Indexer(IndexerError::NotFound(_)) => ErrorKind::NotFound,
            Self::Indexer(IndexerError::Catalog(_)) => ErrorKind::Unavailable,
            Self::Jobs(AssistJobError::NotFound(_)) => ErrorKind::NotFound,
            Self::Jobs(AssistJobError::InvalidArgument(_)) => ErrorKind::InvalidArgument,
            Self::Jobs(AssistJobError::InvalidState(_)) => ErrorKind::InvalidState,
            Self::Indexer(_)
            | Self::Jobs(_)
            | Self::LockPoisoned
            | Self::Extraction(_)
            | Self::Spawn(_) => ErrorKind::Internal,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_state_is_not_initialized() {
        let state = CoreState::new();
        let err = state.index_status().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert_eq!(err.to_string(), "document indexer is not initialized");
        assert_eq!(state.get_assist_job("ajob_x").unwrap_err().kind(), ErrorKind::Unavailable);
    }

    #[test]
    fn error_kinds_follow_taxonomy() {
        let not_found = CoreError::from(IndexerError::NotFound("p::f".into()));
        assert_eq!(not_found.kind(), ErrorKind::NotFound);
        assert_eq!(not_found.to_string(), "Document not found: p::f");

        let bad = CoreError::from(AssistJobError::InvalidArgument("section must be either 'lab' or 'imaging'".into()));
        assert_eq!(bad.kind(), ErrorKind::InvalidArgument);
        assert_eq!(bad.to_string(), "section must be either 'lab' or 'imaging'");

        let conflict = CoreError::from(AssistJobError::InvalidState("nope".into()));
        assert_eq!(conflict.kind(), ErrorKind::InvalidState);

        assert_eq!(CoreError::LockPoisoned.kind(), ErrorKind::Internal);
        assert_eq!(CoreError::from(AssistJobError::LockPoisoned).kind(), ErrorKind::Internal);
    }

    #[test]
    fn shutdown_without_services_is_harmless() {
        let state = CoreState::default();
        state.shutdown();
        state.shutdown();
        assert!(state.indexer().is_err());
    }
}
