//! Attachment-Assist Job Manager.
//!
//! Uploaded reports are analysed asynchronously: `create_job` records a
//! queued job and hands its id to a single worker thread, which runs
//! [`analyze_attachment`](crate::pipeline::assist::analyze_attachment)
//! outside the state lock and stores the payload for human review.
//! Every transition is persisted to the job log.

pub mod store;
mod worker;

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::config::Settings;
use crate::models::{AssistJob, JobLog, JobReview, JobStatus, ReviewDecision, Section, UploadedFile};
use crate::pipeline::background::BackgroundHandle;
use crate::pipeline::extraction::TextExtractor;
use crate::pipeline::json_store::StoreError;

pub const MIN_ATTACHMENT_MAX_CHARS: usize = 20_000;
pub const DEFAULT_LIST_LIMIT: usize = 50;
pub const MAX_LIST_LIMIT: usize = 300;

#[derive(Error, Debug)]
pub enum AssistJobError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("Failed to persist job log: {0}")]
    Store(#[from] StoreError),

    #[error("Attachment analysis panicked: {0}")]
    Panicked(String),

    #[error("Job state lock poisoned")]
    LockPoisoned,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssistJobSettings {
    pub jobs_path: PathBuf,
    pub uploads_root: PathBuf,
    pub max_chars: usize,
}

impl From<&Settings> for AssistJobSettings {
    fn from(s: &Settings) -> Self {
        Self {
            jobs_path: s.attachment_assist_jobs_path.clone(),
            uploads_root: s.uploads_dir.clone(),
            max_chars: s.attachment_max_chars.max(MIN_ATTACHMENT_MAX_CHARS),
        }
    }
}

pub struct AssistJobManager {
    settings: AssistJobSettings,
    uploads_root: PathBuf,
    extractor: Arc<dyn TextExtractor>,
    state: RwLock<JobLog>,
    queue_tx: Sender<String>,
    queue_rx: Mutex<Receiver<String>>,
}

impl AssistJobManager {
    /// Load the job log and re-queue anything a previous process left unfinished.
    pub fn new(settings: AssistJobSettings, extractor: Arc<dyn TextExtractor>) -> Self {
        if let Err(e) = std::fs::create_dir_all(&settings.uploads_root) {
            tracing::warn!(path = %settings.uploads_root.display(), error = %e, "Cannot create uploads root");
        }
        let uploads_root = settings
            .uploads_root
            .canonicalize()
            .unwrap_or_else(|_| settings.uploads_root.clone());

        let mut log = store::load_jobs(&settings.jobs_path);
        let (queue_tx, queue_rx) = mpsc::channel();

        let now = Utc::now();
        let mut unfinished: Vec<&mut AssistJob> = log
            .jobs
            .values_mut()
            .filter(|j| matches!(j.status, JobStatus::Queued | JobStatus::Processing))
            .collect();
        unfinished.sort_by(|a, b| (a.created_at, &a.job_id).cmp(&(b.created_at, &b.job_id)));
        for job in unfinished {
            job.reset_to_queued(now);
            // The receiver is alive in this scope.
            let _ = queue_tx.send(job.job_id.clone());
            tracing::info!(job_id = %job.job_id, "Re-queued unfinished job");
        }

        Self {
            settings,
            uploads_root,
            extractor,
            state: RwLock::new(log),
            queue_tx,
            queue_rx: Mutex::new(queue_rx),
        }
    }

    pub fn settings(&self) -> &AssistJobSettings {
        &self.settings
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, JobLog>, AssistJobError> {
        self.state.read().map_err(|_| AssistJobError::LockPoisoned)
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, JobLog>, AssistJobError> {
        self.state.write().map_err(|_| AssistJobError::LockPoisoned)
    }

    fn enqueue(&self, job_id: &str) {
        if self.queue_tx.send(job_id.to_string()).is_err() {
            tracing::error!(job_id, "Job queue closed");
        }
    }

    /// Canonical path of an uploaded file, which must live under the uploads root.
    fn ensure_upload_path(&self, stored_path: &str) -> Result<PathBuf, AssistJobError> {
        let missing = || AssistJobError::InvalidArgument("Stored upload file does not exist".into());
        let resolved = Path::new(stored_path).canonicalize().map_err(|_| missing())?;
        if !resolved.is_file() {
            return Err(missing());
        }
        if !resolved.starts_with(&self.uploads_root) {
            return Err(AssistJobError::InvalidArgument(
                "Stored upload file is outside uploads root".into(),
            ));
        }
        Ok(resolved)
    }

    /// Record a queued job for an uploaded file and schedule it.
    pub fn create_job(
        &self,
        section: &str,
        patient_id: Option<&str>,
        uploaded_file: UploadedFile,
    ) -> Result<AssistJob, AssistJobError> {
        let section: Section = section.trim().to_lowercase().parse().map_err(|_| {
            AssistJobError::InvalidArgument("section must be either 'lab' or 'imaging'".into())
        })?;

        let file_name = uploaded_file.file_name.trim();
        let stored_path = uploaded_file.stored_path.trim();
        if file_name.is_empty() || stored_path.is_empty() {
            return Err(AssistJobError::InvalidArgument(
                "uploaded_file must include file_name and stored_path".into(),
            ));
        }
        let resolved = self.ensure_upload_path(stored_path)?;

        let now = Utc::now();
        let job = AssistJob {
            job_id: format!("ajob_{}", Uuid::new_v4().simple()),
            status: JobStatus::Queued,
            section,
            patient_id: patient_id
                .map(|p| p.trim().to_uppercase())
                .filter(|p| !p.is_empty()),
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
            error: None,
            uploaded_file: UploadedFile {
                file_name: file_name.to_string(),
                stored_path: resolved.to_string_lossy().into_owned(),
                size_bytes: uploaded_file.size_bytes,
            },
            result: None,
            review: JobReview::default(),
        };

        {
            let mut state = self.write_state()?;
            state.jobs.insert(job.job_id.clone(), job.clone());
            state.updated_at = Some(now);
            if let Err(e) = store::save_jobs(&self.settings.jobs_path, &state) {
                state.jobs.remove(&job.job_id);
                return Err(e.into());
            }
        }
        self.enqueue(&job.job_id);
        tracing::info!(job_id = %job.job_id, section = %job.section, "Attachment assist job queued");
        Ok(job)
    }

    /// Newest first, optionally filtered by patient and status.
    pub fn list_jobs(
        &self,
        patient_id: Option<&str>,
        status: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<AssistJob>, AssistJobError> {
        let patient = patient_id.map(|p| p.trim().to_uppercase()).filter(|p| !p.is_empty());
        let status = status.map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty());

        let mut rows: Vec<AssistJob> = {
            let state = self.read_state()?;
            state
                .jobs
                .values()
                .filter(|j| {
                    patient.as_deref().map_or(true, |p| {
                        j.patient_id.as_deref().unwrap_or_default().to_uppercase() == p
                    })
                })
                .filter(|j| status.as_deref().map_or(true, |s| j.status.as_str() == s))
                .cloned()
                .collect()
        };

        rows.sort_by(|a, b| (b.created_at, &b.job_id).cmp(&(a.created_at, &a.job_id)));
        rows.truncate(limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT));
        Ok(rows)
    }

    pub fn get_job(&self, job_id: &str) -> Result<AssistJob, AssistJobError> {
        let token = job_id.trim();
        let state = self.read_state()?;
        state
            .jobs
            .get(token)
            .cloned()
            .ok_or_else(|| AssistJobError::NotFound(token.to_string()))
    }

    /// Record the reviewer's decision on a completed job.
    pub fn set_review(
        &self,
        job_id: &str,
        decision: &str,
        reviewer_note: Option<&str>,
        applied_payload: Option<Value>,
    ) -> Result<AssistJob, AssistJobError> {
        let token = job_id.trim();
        if token.is_empty() {
            return Err(AssistJobError::NotFound(token.to_string()));
        }
        let decision: ReviewDecision = decision.trim().to_lowercase().parse().map_err(|_| {
            AssistJobError::InvalidArgument("decision must be 'accepted' or 'rejected'".into())
        })?;

        let mut state = self.write_state()?;
        let now = Utc::now();
        let job = state
            .jobs
            .get_mut(token)
            .ok_or_else(|| AssistJobError::NotFound(token.to_string()))?;
        if job.status != JobStatus::Completed {
            return Err(AssistJobError::InvalidState(
                "Review can only be recorded for completed jobs".into(),
            ));
        }

        job.review = JobReview {
            status: decision.review_status(),
            decision: Some(decision),
            reviewed_at: Some(now),
            reviewer_note: reviewer_note
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty()),
            applied_payload: Some(applied_payload.unwrap_or_else(|| Value::Object(Map::new()))),
        };
        job.updated_at = now;
        let updated = job.clone();

        state.updated_at = Some(now);
        store::save_jobs(&self.settings.jobs_path, &state)?;
        tracing::info!(job_id = %updated.job_id, decision = %decision, "Attachment assist review recorded");
        Ok(updated)
    }

    /// Reset a job to queued, dropping its result and review, and schedule it again.
    pub fn retry_job(&self, job_id: &str) -> Result<AssistJob, AssistJobError> {
        let token = job_id.trim();
        let updated = {
            let mut state = self.write_state()?;
            let now = Utc::now();
            let job = state
                .jobs
                .get_mut(token)
                .ok_or_else(|| AssistJobError::NotFound(token.to_string()))?;
            job.reset_to_queued(now);
            let updated = job.clone();
            state.updated_at = Some(now);
            store::save_jobs(&self.settings.jobs_path, &state)?;
            updated
        };
        self.enqueue(&updated.job_id);
        tracing::info!(job_id = %updated.job_id, "Attachment assist job re-queued");
        Ok(updated)
    }

    /// Spawn the worker thread.
    pub fn start(self: &Arc<Self>) -> std::io::Result<BackgroundHandle> {
        let manager = Arc::clone(self);
        BackgroundHandle::spawn("attachment-assist-worker", move |signal| manager.run_worker(signal))
    }
}
