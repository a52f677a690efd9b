//! Durable job log.

use std::path::Path;

use crate::models::{AssistJob, JobLog, JOB_LOG_VERSION};
use crate::pipeline::json_store::{self, StoreError};

pub fn load_jobs(path: &Path) -> JobLog {
    let Some(object) = json_store::load_object(path) else {
        return JobLog {
            version: JOB_LOG_VERSION,
            ..Default::default()
        };
    };

    let log = JobLog {
        version: JOB_LOG_VERSION,
        updated_at: json_store::field(&object, "updated_at"),
        jobs: json_store::records::<AssistJob>(&object, "jobs")
            .into_iter()
            .collect(),
    };
    tracing::info!(path = %path.display(), jobs = log.jobs.len(), "Loaded attachment assist jobs");
    log
}

pub fn save_jobs(path: &Path, log: &JobLog) -> Result<(), StoreError> {
    json_store::save_json(path, log)
}
