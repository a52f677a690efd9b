use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::{store, AssistJobError, AssistJobManager};
use crate::models::{AttachmentAnalysis, ExtractionStatus, JobStatus, ReviewStatus, Section, UploadedFile};
use crate::pipeline::assist::analyze_attachment;
use crate::pipeline::background::{catch_panic, ShutdownSignal};

/// How long the worker blocks on the queue before re-checking for shutdown.
const QUEUE_POLL: Duration = Duration::from_secs(1);

/// What the worker needs from a job once it has claimed it.
struct ClaimedJob {
    section: Section,
    upload: UploadedFile,
    started_at: DateTime<Utc>,
}

impl AssistJobManager {
    pub(super) fn run_worker(&self, signal: ShutdownSignal) {
        while !signal.is_triggered() {
            let next = match self.queue_rx.lock() {
                Ok(rx) => rx.recv_timeout(QUEUE_POLL),
                Err(poisoned) => poisoned.into_inner().recv_timeout(QUEUE_POLL),
            };
            match next {
                Ok(job_id) => self.process_job(&job_id),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    /// Process every id already waiting in the queue on the calling thread.
    /// Returns how many ids were taken.
    pub fn drain_queue(&self) -> usize {
        let mut taken = 0;
        loop {
            let next = match self.queue_rx.lock() {
                Ok(rx) => rx.try_recv(),
                Err(poisoned) => poisoned.into_inner().try_recv(),
            };
            let Ok(job_id) = next else {
                return taken;
            };
            taken += 1;
            self.process_job(&job_id);
        }
    }

    pub(super) fn process_job(&self, job_id: &str) {
        let claimed = match self.claim(job_id) {
            Ok(Some(claimed)) => claimed,
            Ok(None) => return,
            Err(e) => {
                tracing::error!(job_id, error = %e, "Failed to start attachment assist job");
                return;
            }
        };

        let analysis = self.ensure_upload_path(&claimed.upload.stored_path).and_then(|path| {
            let original_name = if claimed.upload.file_name.trim().is_empty() {
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            } else {
                claimed.upload.file_name.clone()
            };
            catch_panic(|| {
                analyze_attachment(
                    self.extractor.as_ref(),
                    &path,
                    &original_name,
                    claimed.section,
                    self.settings.max_chars,
                )
            })
            .map_err(AssistJobError::Panicked)
        });

        if let Err(e) = self.finish(job_id, claimed.started_at, analysis) {
            tracing::error!(job_id, error = %e, "Failed to finalize attachment assist job");
        }
    }

    /// Move a queued job to processing. `None` if the id is unknown or not queued,
    /// which happens for duplicate queue entries after a retry.
    fn claim(&self, job_id: &str) -> Result<Option<ClaimedJob>, AssistJobError> {
        let mut state = self.write_state()?;
        let now = Utc::now();
        let Some(job) = state.jobs.get_mut(job_id) else {
            return Ok(None);
        };
        if job.status != JobStatus::Queued {
            tracing::debug!(job_id, status = %job.status, "Skipping job that is no longer queued");
            return Ok(None);
        }

        job.status = JobStatus::Processing;
        job.started_at = Some(now);
        job.updated_at = now;
        job.error = None;
        let claimed = ClaimedJob {
            section: job.section,
            upload: job.uploaded_file.clone(),
            started_at: now,
        };

        state.updated_at = Some(now);
        store::save_jobs(&self.settings.jobs_path, &state)?;
        tracing::info!(job_id, status = %JobStatus::Processing, "Attachment assist job started");
        Ok(Some(claimed))
    }

    fn finish(
        &self,
        job_id: &str,
        started_at: DateTime<Utc>,
        analysis: Result<AttachmentAnalysis, AssistJobError>,
    ) -> Result<(), AssistJobError> {
        let (status, error, result) = match analysis {
            Ok(a) if a.extraction_status == ExtractionStatus::Ok => (JobStatus::Completed, None, Some(a)),
            Ok(a) => (JobStatus::Failed, a.extraction_error.clone(), Some(a)),
            Err(e) => (JobStatus::Failed, Some(e.to_string()), None),
        };

        let mut state = self.write_state()?;
        let now = Utc::now();
        let Some(job) = state.jobs.get_mut(job_id) else {
            return Ok(());
        };
        // A retry while we were busy re-queued the job; its fresh run owns it now.
        if job.status != JobStatus::Processing || job.started_at != Some(started_at) {
            tracing::info!(job_id, "Discarding result of a job that was reset while processing");
            return Ok(());
        }

        job.status = status;
        job.finished_at = Some(now);
        job.updated_at = now;
        job.error = error;
        job.result = result;
        job.review.status = if status == JobStatus::Completed {
            ReviewStatus::PendingReview
        } else {
            ReviewStatus::NotReady
        };

        state.updated_at = Some(now);
        store::save_jobs(&self.settings.jobs_path, &state)?;
        tracing::info!(job_id, status = %status, "Attachment assist job finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::Fixture;
    use super::*;
    use crate::models::Extractor;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn completed_job_awaits_review() {
        let fx = Fixture::new();
        let job = fx.manager.create_job("lab", Some("P1"), fx.upload("cbc.pdf")).unwrap();
        assert_eq!(fx.manager.drain_queue(), 1);

        let done = fx.manager.get_job(&job.job_id).unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.started_at.is_some());
        assert!(done.finished_at.is_some());
        assert!(done.error.is_none());
        assert_eq!(done.review.status, ReviewStatus::PendingReview);

        let result = done.result.unwrap();
        assert_eq!(result.extraction_status, ExtractionStatus::Ok);
        assert_eq!(result.extractor, Extractor::Marker);
        let entries = &result.suggestions.lab_entries;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].parameter, "Hemoglobin");
        assert_eq!(entries[0].date, "2024-04-02");
        assert_eq!(entries[1].value, "520 10^3/uL");
    }

    #[test]
    fn failed_extraction_fails_job_then_retry_resets_it() {
        let fx = Fixture::new();
        let job = fx.manager.create_job("imaging", None, fx.upload("unreadable.png")).unwrap();
        fx.manager.drain_queue();

        let failed = fx.manager.get_job(&job.job_id).unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(
            failed.error.as_deref(),
            Some("Marker timed out after 60s; pdftotext produced empty output")
        );
        assert_eq!(failed.review.status, ReviewStatus::NotReady);
        assert!(failed.result.is_some());
        assert!(matches!(
            fx.manager.set_review(&job.job_id, "accepted", None, None),
            Err(AssistJobError::InvalidState(_))
        ));

        let retried = fx.manager.retry_job(&job.job_id).unwrap();
        assert_eq!(retried.status, JobStatus::Queued);
        assert!(retried.error.is_none());
        assert!(retried.result.is_none());
        assert!(retried.started_at.is_none());
        assert!(retried.finished_at.is_none());
    }

    #[test]
    fn vanished_upload_fails_job() {
        let fx = Fixture::new();
        let upload = fx.upload("cbc.pdf");
        let job = fx.manager.create_job("lab", None, upload.clone()).unwrap();
        std::fs::remove_file(&upload.stored_path).unwrap();
        fx.manager.drain_queue();

        let failed = fx.manager.get_job(&job.job_id).unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("Stored upload file does not exist"));
        assert!(failed.result.is_none());
    }

    #[test]
    fn analysis_panic_fails_job_and_worker_continues() {
        let fx = Fixture::new();
        let crashed = fx.manager.create_job("imaging", None, fx.upload("crash.png")).unwrap();
        let next = fx.manager.create_job("lab", None, fx.upload("cbc.pdf")).unwrap();
        assert_eq!(fx.manager.drain_queue(), 2);

        let failed = fx.manager.get_job(&crashed.job_id).unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(
            failed.error.as_deref(),
            Some("Attachment analysis panicked: decoder crashed on crash.png")
        );
        assert!(failed.finished_at.is_some());
        assert_eq!(failed.review.status, ReviewStatus::NotReady);
        assert_eq!(fx.manager.get_job(&next.job_id).unwrap().status, JobStatus::Completed);
    }

    #[test]
    fn duplicate_queue_entries_run_once() {
        let fx = Fixture::new();
        let job = fx.manager.create_job("lab", None, fx.upload("cbc.pdf")).unwrap();
        fx.manager.retry_job(&job.job_id).unwrap();
        assert_eq!(fx.manager.drain_queue(), 2);
        let done = fx.manager.get_job(&job.job_id).unwrap();
        assert_eq!(done.status, JobStatus::Completed);
    }

    #[test]
    fn reset_during_processing_discards_stale_result() {
        let fx = Fixture::new();
        let job = fx.manager.create_job("lab", None, fx.upload("cbc.pdf")).unwrap();
        let claimed = fx.manager.claim(&job.job_id).unwrap().unwrap();
        fx.manager.retry_job(&job.job_id).unwrap();

        let analysis = Err(AssistJobError::InvalidArgument("stale".into()));
        fx.manager.finish(&job.job_id, claimed.started_at, analysis).unwrap();
        let current = fx.manager.get_job(&job.job_id).unwrap();
        assert_eq!(current.status, JobStatus::Queued);
        assert!(current.error.is_none());
    }

    #[test]
    fn worker_thread_processes_jobs() {
        let fx = Fixture::new();
        let manager = Arc::new(fx.reopen());
        let mut handle = manager.start().unwrap();
        let job = manager.create_job("lab", None, fx.upload("cbc.pdf")).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while manager.get_job(&job.job_id).unwrap().status != JobStatus::Completed && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(manager.get_job(&job.job_id).unwrap().status, JobStatus::Completed);
        assert!(handle.shutdown(Duration::from_secs(5)));
    }
}
