pub mod config;
pub mod core_state;
pub mod models;
pub mod pipeline;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::config::Settings;
use crate::core_state::{CoreError, CoreState};
use crate::pipeline::assist_jobs::{AssistJobManager, AssistJobSettings};
use crate::pipeline::extraction::{DocumentExtractor, ExtractionSettings, TextExtractor};
use crate::pipeline::indexer::{CatalogProvider, DocumentIndexer, IndexerSettings};

/// Install the global tracing subscriber. Later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init();
}

/// Build the shared extraction pipeline, both services and their background
/// threads. The indexer's first cycle starts immediately.
pub fn start_services(settings: &Settings, catalog: Arc<dyn CatalogProvider>) -> Result<CoreState, CoreError> {
    tracing::info!("{} document services starting v{}", config::APP_NAME, config::APP_VERSION);

    let extractor: Arc<dyn TextExtractor> =
        Arc::new(DocumentExtractor::new(&ExtractionSettings::from(settings))?);
    let indexer = Arc::new(DocumentIndexer::new(
        IndexerSettings::from(settings),
        Arc::clone(&extractor),
        catalog,
    ));
    let jobs = Arc::new(AssistJobManager::new(AssistJobSettings::from(settings), extractor));

    let state = CoreState::new();
    state.set_indexer(Arc::clone(&indexer))?;
    state.set_job_manager(Arc::clone(&jobs))?;
    state.adopt_worker(indexer.start()?)?;
    state.adopt_worker(jobs.start()?)?;

    tracing::info!(
        vault_root = %settings.vault_root.display(),
        uploads = %settings.uploads_dir.display(),
        "Document services started"
    );
    Ok(state)
}
