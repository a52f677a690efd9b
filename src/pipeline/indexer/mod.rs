//! Document Indexer.
//!
//! Keeps a durable, searchable index of the extracted text of every
//! searchable file in the vault, keyed by `patient::file`. A cycle walks the
//! current catalog snapshot, re-extracts only what changed, throttles
//! external OCR work on routine passes, evicts vanished files and persists
//! the result. Queries in [`queries`] read the in-memory index and never
//! touch the extraction tools.

pub mod catalog;
pub mod queries;
pub mod store;

pub use catalog::{CatalogError, CatalogProvider, StaticCatalog};
pub use queries::{
    ExtractedDocument, LabTimelineRow, LabTrends, MetricTrend, PatientDocumentRow, SearchHit,
    TrendPoint,
};

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};
use std::time::{Duration, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::config::{Settings, DEFAULT_MARKER_COMMAND};
use crate::models::{document_key, DocumentRecord, DocumentStatus, Extractor, IndexSnapshot};
use crate::pipeline::background::{catch_panic, BackgroundHandle, ShutdownSignal};
use crate::pipeline::extraction::{FileDescriptor, TextExtractor};
use crate::pipeline::json_store::StoreError;

pub const MIN_SCAN_INTERVAL_SECS: f64 = 5.0;
pub const MIN_DOCUMENT_MAX_CHARS: usize = 10_000;

pub const MISSING_FILE_ERROR: &str = "File is missing or outside vault root";
pub const THROTTLED_REASON: &str = "Queued for upcoming cycle (binary extraction throttle)";
const GENERIC_EXTRACTION_ERROR: &str = "Extraction failed";

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("Failed to persist document index: {0}")]
    Store(#[from] StoreError),

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Index cycle panicked: {0}")]
    Panicked(String),

    #[error("Document index lock poisoned")]
    LockPoisoned,
}

/// Indexer settings with lower bounds applied.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexerSettings {
    pub vault_root: PathBuf,
    pub index_path: PathBuf,
    pub scan_interval: Duration,
    /// Echoed in status only; the extractor owns the real command.
    pub marker_command: String,
    pub max_document_chars: usize,
    pub binary_per_cycle_limit: usize,
}

impl From<&Settings> for IndexerSettings {
    fn from(s: &Settings) -> Self {
        let interval = if s.document_scan_interval_secs.is_finite() {
            s.document_scan_interval_secs.max(MIN_SCAN_INTERVAL_SECS)
        } else {
            MIN_SCAN_INTERVAL_SECS
        };
        let marker = s.marker_command.trim();
        Self {
            vault_root: s.vault_root.clone(),
            index_path: s.document_index_path.clone(),
            scan_interval: Duration::from_secs_f64(interval),
            marker_command: if marker.is_empty() {
                DEFAULT_MARKER_COMMAND.to_string()
            } else {
                marker.to_string()
            },
            max_document_chars: s.document_max_chars.max(MIN_DOCUMENT_MAX_CHARS),
            binary_per_cycle_limit: s.document_binary_per_cycle_limit.max(1),
        }
    }
}

/// Snapshot of index health returned by status, cycle and reindex calls.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStatus {
    pub documents_total: usize,
    pub documents_indexed: usize,
    pub documents_failed: usize,
    pub documents_pending: usize,
    pub last_cycle_started_at: Option<DateTime<Utc>>,
    pub last_cycle_finished_at: Option<DateTime<Utc>>,
    pub last_cycle_error: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    pub scan_interval_secs: f64,
    pub marker_command: String,
    pub binary_per_cycle_limit: usize,
    pub running: bool,
    pub cycle_in_progress: bool,
}

/// Per-cycle counters, logged when the cycle finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct CycleStats {
    searchable: usize,
    extracted: usize,
    unchanged: usize,
    deferred: usize,
    failed: usize,
    evicted: usize,
}

/// Restrict a cycle to one patient and/or one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct CycleTarget {
    patient_key: Option<String>,
    file_id: Option<String>,
}

impl CycleTarget {
    fn new(patient_key: Option<&str>, file_id: Option<&str>) -> Self {
        let norm = |v: Option<&str>| {
            v.map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
        };
        Self {
            patient_key: norm(patient_key),
            file_id: norm(file_id),
        }
    }

    fn is_targeted(&self) -> bool {
        self.patient_key.is_some() || self.file_id.is_some()
    }

    fn admits(&self, patient_key: &str, file_id: &str) -> bool {
        self.patient_key.as_deref().map_or(true, |p| p == patient_key)
            && self.file_id.as_deref().map_or(true, |f| f == file_id)
    }
}

/// Resets a flag however the enclosing scope exits.
struct ClearOnDrop<'a>(&'a AtomicBool);

impl Drop for ClearOnDrop<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct DocumentIndexer {
    settings: IndexerSettings,
    extractor: Arc<dyn TextExtractor>,
    catalog: Arc<dyn CatalogProvider>,
    state: RwLock<IndexSnapshot>,
    cycle_lock: Mutex<()>,
    cycle_in_progress: AtomicBool,
    loop_running: AtomicBool,
}

impl DocumentIndexer {
    /// Build an indexer over the persisted index at `settings.index_path`.
    pub fn new(
        settings: IndexerSettings,
        extractor: Arc<dyn TextExtractor>,
        catalog: Arc<dyn CatalogProvider>,
    ) -> Self {
        let snapshot = store::load_index(&settings.index_path);
        Self {
            settings,
            extractor,
            catalog,
            state: RwLock::new(snapshot),
            cycle_lock: Mutex::new(()),
            cycle_in_progress: AtomicBool::new(false),
            loop_running: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &IndexerSettings {
        &self.settings
    }

    pub(crate) fn read_state(&self) -> Result<RwLockReadGuard<'_, IndexSnapshot>, IndexerError> {
        self.state.read().map_err(|_| IndexerError::LockPoisoned)
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, IndexSnapshot>, IndexerError> {
        self.state.write().map_err(|_| IndexerError::LockPoisoned)
    }

    pub fn status(&self) -> Result<IndexStatus, IndexerError> {
        let state = self.read_state()?;
        let count = |status: DocumentStatus| {
            state.documents.values().filter(|d| d.status == status).count()
        };
        Ok(IndexStatus {
            documents_total: state.documents.len(),
            documents_indexed: count(DocumentStatus::Indexed),
            documents_failed: count(DocumentStatus::Failed),
            documents_pending: count(DocumentStatus::Pending),
            last_cycle_started_at: state.last_cycle_started_at,
            last_cycle_finished_at: state.last_cycle_finished_at,
            last_cycle_error: state.last_cycle_error.clone(),
            updated_at: state.updated_at,
            scan_interval_secs: self.settings.scan_interval.as_secs_f64(),
            marker_command: self.settings.marker_command.clone(),
            binary_per_cycle_limit: self.settings.binary_per_cycle_limit,
            running: self.loop_running.load(Ordering::SeqCst),
            cycle_in_progress: self.cycle_in_progress.load(Ordering::SeqCst),
        })
    }

    /// On-demand cycle, usually targeted at one patient and/or file.
    pub fn reindex(
        &self,
        force: bool,
        patient_key: Option<&str>,
        file_id: Option<&str>,
    ) -> Result<IndexStatus, IndexerError> {
        tracing::info!(force, patient_key, file_id, "Reindex requested");
        self.run_index_cycle(force, patient_key, file_id)
    }

    /// Run one indexing pass, or return the current status straight away
    /// if another pass is already running.
    pub fn run_index_cycle(
        &self,
        force: bool,
        patient_key: Option<&str>,
        file_id: Option<&str>,
    ) -> Result<IndexStatus, IndexerError> {
        let _cycle = match self.cycle_lock.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => {
                tracing::debug!("Index cycle already running, returning status");
                return self.status();
            }
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        self.cycle_in_progress.store(true, Ordering::SeqCst);
        let _flag = ClearOnDrop(&self.cycle_in_progress);

        let target = CycleTarget::new(patient_key, file_id);
        let started_at = Utc::now();
        let mut documents = {
            let mut state = self.write_state()?;
            state.last_cycle_started_at = Some(started_at);
            state.documents.clone()
        };
        tracing::info!(
            force,
            patient_key = target.patient_key.as_deref(),
            file_id = target.file_id.as_deref(),
            "Index cycle started"
        );

        let outcome = catch_panic(|| self.process_catalog(&mut documents, force, &target))
            .unwrap_or_else(|msg| Err(IndexerError::Panicked(msg)));

        let finished_at = Utc::now();
        {
            let mut state = self.write_state()?;
            state.documents = documents;
            state.last_cycle_finished_at = Some(finished_at);
            match &outcome {
                Ok(_) => {
                    state.updated_at = Some(finished_at);
                    state.last_cycle_error = None;
                }
                Err(e) => state.last_cycle_error = Some(e.to_string()),
            }
        }

        match &outcome {
            Ok(stats) => tracing::info!(
                searchable = stats.searchable,
                extracted = stats.extracted,
                unchanged = stats.unchanged,
                deferred = stats.deferred,
                failed = stats.failed,
                evicted = stats.evicted,
                elapsed_ms = (finished_at - started_at).num_milliseconds(),
                "Index cycle finished"
            ),
            Err(e) => tracing::error!(error = %e, "Index cycle aborted"),
        }

        self.persist()?;
        self.status()
    }

    /// Write the index to disk. A failure is recorded as the cycle error.
    fn persist(&self) -> Result<(), IndexerError> {
        let saved = {
            let state = self.read_state()?;
            store::save_index(&self.settings.index_path, &state)
        };
        if let Err(e) = saved {
            let err = IndexerError::from(e);
            tracing::error!(path = %self.settings.index_path.display(), error = %err, "Index persistence failed");
            self.write_state()?.last_cycle_error = Some(err.to_string());
        }
        Ok(())
    }

    fn process_catalog(
        &self,
        documents: &mut BTreeMap<String, DocumentRecord>,
        force: bool,
        target: &CycleTarget,
    ) -> Result<CycleStats, IndexerError> {
        let catalog = self.catalog.snapshot()?;
        let vault_root = self
            .settings
            .vault_root
            .canonicalize()
            .unwrap_or_else(|_| self.settings.vault_root.clone());
        let routine = !force && !target.is_targeted();

        let mut stats = CycleStats::default();
        let mut searchable_keys = HashSet::new();
        let mut external_runs = 0usize;

        for entry in &catalog {
            let patient = &entry.patient;
            let patient_key = patient.patient_key.trim().to_lowercase();
            if patient_key.is_empty() {
                continue;
            }

            for file in &entry.files {
                let file_id = file.file_id.trim().to_lowercase();
                if file_id.is_empty() {
                    continue;
                }
                let descriptor = FileDescriptor::from_catalog(file);
                if !descriptor.is_searchable() {
                    continue;
                }

                let key = document_key(&patient_key, &file_id);
                searchable_keys.insert(key.clone());
                stats.searchable += 1;

                if !target.admits(&patient_key, &file_id) {
                    continue;
                }
                let relative_path = file.relative_path.trim();
                if relative_path.is_empty() {
                    continue;
                }

                let Some(path) = resolve_in_root(&vault_root, relative_path) else {
                    documents.insert(
                        key,
                        DocumentRecord::failed(patient, file, None, Extractor::None, MISSING_FILE_ERROR),
                    );
                    stats.failed += 1;
                    continue;
                };
                let Some(signature) = file_signature(&path) else {
                    continue;
                };

                if !force {
                    if let Some(existing) = documents.get_mut(&key) {
                        if existing.status == DocumentStatus::Indexed
                            && existing.signature.as_deref() == Some(signature.as_str())
                        {
                            existing.refresh_metadata(patient, file);
                            stats.unchanged += 1;
                            continue;
                        }
                    }
                }

                let external = descriptor.needs_external_tool();
                if external && routine && external_runs >= self.settings.binary_per_cycle_limit {
                    documents.insert(key, DocumentRecord::pending(patient, file, signature, THROTTLED_REASON));
                    stats.deferred += 1;
                    continue;
                }

                let outcome = self.extractor.extract(&path, &descriptor);
                if external {
                    external_runs += 1;
                }

                let record = match outcome.text {
                    Some(text) if !text.trim().is_empty() => {
                        stats.extracted += 1;
                        DocumentRecord::indexed(
                            patient,
                            file,
                            signature,
                            text,
                            outcome.extractor,
                            self.settings.max_document_chars,
                        )
                    }
                    _ => {
                        let error = outcome
                            .error
                            .unwrap_or_else(|| GENERIC_EXTRACTION_ERROR.to_string());
                        tracing::warn!(file_id = %file_id, extractor = %outcome.extractor, error = %error, "Document extraction failed");
                        stats.failed += 1;
                        DocumentRecord::failed(patient, file, Some(signature), outcome.extractor, error)
                    }
                };
                documents.insert(key, record);
            }
        }

        if !target.is_targeted() {
            let before = documents.len();
            documents.retain(|key, _| searchable_keys.contains(key));
            stats.evicted = before - documents.len();
        }

        Ok(stats)
    }

    /// Spawn the periodic indexing loop. The first cycle runs immediately.
    pub fn start(self: &Arc<Self>) -> std::io::Result<BackgroundHandle> {
        let indexer = Arc::clone(self);
        BackgroundHandle::spawn("document-indexer", move |signal| indexer.run_loop(signal))
    }

    fn run_loop(&self, signal: ShutdownSignal) {
        self.loop_running.store(true, Ordering::SeqCst);
        let _running = ClearOnDrop(&self.loop_running);
        loop {
            if let Err(e) = self.run_index_cycle(false, None, None) {
                tracing::error!(error = %e, "Background index cycle failed");
            }
            if signal.wait_timeout(self.settings.scan_interval) {
                break;
            }
        }
    }
}

/// Canonical path of `relative` if it is an existing file under `root`.
fn resolve_in_root(root: &Path, relative: &str) -> Option<PathBuf> {
    let resolved = root.join(relative).canonicalize().ok()?;
    if resolved.is_file() && resolved.starts_with(root) {
        Some(resolved)
    } else {
        None
    }
}

/// `"{len}:{mtime_ns}"`; changes whenever the file is rewritten.
fn file_signature(path: &Path) -> Option<String> {
    let meta = std::fs::metadata(path).ok()?;
    let modified = meta.modified().ok()?.duration_since(UNIX_EPOCH).ok()?;
    Some(format!("{}:{}", meta.len(), modified.as_nanos()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{CatalogEntry, CatalogFile, PatientCard};
    use crate::pipeline::extraction::text_only::read_text_file;
    use crate::pipeline::extraction::ExtractionOutcome;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    /// Reads text files natively and fakes OCR for everything else, counting calls.
    #[derive(Default)]
    pub(crate) struct CountingExtractor {
        pub calls: AtomicUsize,
        pub ocr_calls: AtomicUsize,
    }

    impl TextExtractor for CountingExtractor {
        fn extract(&self, path: &Path, descriptor: &FileDescriptor) -> ExtractionOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if path.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.starts_with("crash")) {
                panic!("decoder crashed on {}", path.display());
            }
            if descriptor.reads_as_text() {
                return match read_text_file(path) {
                    Ok(text) => ExtractionOutcome::success(text, Extractor::NativeText),
                    Err(e) => ExtractionOutcome::failure(Extractor::NativeText, e.to_string()),
                };
            }
            self.ocr_calls.fetch_add(1, Ordering::SeqCst);
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if name.starts_with("broken") {
                ExtractionOutcome::failure(Extractor::Marker, "marker exploded; tesseract missing")
            } else {
                ExtractionOutcome::success(format!("OCR text of {name}"), Extractor::Marker)
            }
        }
    }

    /// Vault directory + catalog + indexer wired together.
    pub(crate) struct Fixture {
        pub dir: TempDir,
        pub catalog: Arc<StaticCatalog>,
        pub extractor: Arc<CountingExtractor>,
        pub indexer: DocumentIndexer,
    }

    pub(crate) fn settings_for(dir: &Path) -> IndexerSettings {
        IndexerSettings {
            vault_root: dir.join("vault"),
            index_path: dir.join("data").join("index.json"),
            scan_interval: Duration::from_secs(60),
            marker_command: "marker_single".into(),
            max_document_chars: 10_000,
            binary_per_cycle_limit: 2,
        }
    }

    impl Fixture {
        pub fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            std::fs::create_dir_all(dir.path().join("vault")).unwrap();
            let catalog = Arc::new(StaticCatalog::default());
            let extractor = Arc::new(CountingExtractor::default());
            let indexer = DocumentIndexer::new(settings_for(dir.path()), extractor.clone(), catalog.clone());
            Self {
                dir,
                catalog,
                extractor,
                indexer,
            }
        }

        pub fn reopen(&self) -> DocumentIndexer {
            DocumentIndexer::new(settings_for(self.dir.path()), self.extractor.clone(), self.catalog.clone())
        }

        pub fn write(&self, relative: &str, contents: &str) {
            let path = self.dir.path().join("vault").join(relative);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, contents).unwrap();
        }

        pub fn calls(&self) -> usize {
            self.extractor.calls.load(Ordering::SeqCst)
        }

        pub fn ocr_calls(&self) -> usize {
            self.extractor.ocr_calls.load(Ordering::SeqCst)
        }
    }

    pub(crate) fn patient(key: &str) -> PatientCard {
        PatientCard {
            patient_key: key.into(),
            display_name: Some(format!("Case {key}")),
            case_bucket: Some("active".into()),
            ..Default::default()
        }
    }

    pub(crate) fn file(id: &str, relative: &str, category: &str, updated_at: &str) -> CatalogFile {
        let name = relative.rsplit('/').next().unwrap_or(relative);
        let extension = name.rsplit('.').next().unwrap_or_default().to_lowercase();
        let is_text = matches!(extension.as_str(), "txt" | "md");
        CatalogFile {
            file_id: id.into(),
            file_name: name.into(),
            relative_path: relative.into(),
            extension,
            category: Some(category.into()),
            size_bytes: 1,
            updated_at: Some(updated_at.into()),
            is_text,
            ..Default::default()
        }
    }

    pub(crate) fn entry(patient_card: PatientCard, files: Vec<CatalogFile>) -> CatalogEntry {
        CatalogEntry {
            patient: patient_card,
            files,
        }
    }

    fn note_fixture() -> Fixture {
        let fx = Fixture::new();
        fx.write("P1/cbc.txt", "CBC\nPlatelets 520\n");
        fx.catalog
            .replace(vec![entry(
                patient("P1"),
                vec![file("f1", "P1/cbc.txt", "lab_report", "2024-03-01T10:00:00Z")],
            )])
            .unwrap();
        fx
    }

    #[test]
    fn settings_floors_are_applied() {
        let settings = Settings {
            document_scan_interval_secs: 0.5,
            document_max_chars: 10,
            document_binary_per_cycle_limit: 0,
            marker_command: "  ".into(),
            ..Settings::default()
        };
        let derived = IndexerSettings::from(&settings);
        assert_eq!(derived.scan_interval, Duration::from_secs(5));
        assert_eq!(derived.max_document_chars, MIN_DOCUMENT_MAX_CHARS);
        assert_eq!(derived.binary_per_cycle_limit, 1);
        assert_eq!(derived.marker_command, "marker_single");
    }

    #[test]
    fn first_cycle_indexes_text_note() {
        let fx = note_fixture();
        let status = fx.indexer.run_index_cycle(false, None, None).unwrap();
        assert_eq!(status.documents_total, 1);
        assert_eq!(status.documents_indexed, 1);
        assert!(status.last_cycle_error.is_none());
        assert!(status.updated_at.is_some());
        assert!(!status.cycle_in_progress);

        let state = fx.indexer.read_state().unwrap();
        let record = &state.documents["p1::f1"];
        assert_eq!(record.extractor, Extractor::NativeText);
        assert_eq!(record.text, "CBC\nPlatelets 520");
        assert_eq!(record.patient_display_name.as_deref(), Some("Case P1"));
        assert!(record.signature.is_some());
    }

    #[test]
    fn unchanged_file_is_not_reextracted() {
        let fx = note_fixture();
        fx.indexer.run_index_cycle(false, None, None).unwrap();
        let before = fx.indexer.read_state().unwrap().documents.clone();
        fx.indexer.run_index_cycle(false, None, None).unwrap();
        assert_eq!(fx.calls(), 1);
        assert_eq!(fx.indexer.read_state().unwrap().documents, before);
    }

    #[test]
    fn metadata_refresh_without_extraction() {
        let fx = note_fixture();
        fx.indexer.run_index_cycle(false, None, None).unwrap();

        let mut card = patient("P1");
        card.display_name = Some("Renamed".into());
        card.case_bucket = Some("closed".into());
        fx.catalog
            .replace(vec![entry(
                card,
                vec![file("f1", "P1/cbc.txt", "discharge", "2024-03-02T10:00:00Z")],
            )])
            .unwrap();
        fx.indexer.run_index_cycle(false, None, None).unwrap();

        assert_eq!(fx.calls(), 1);
        let state = fx.indexer.read_state().unwrap();
        let record = &state.documents["p1::f1"];
        assert_eq!(record.patient_display_name.as_deref(), Some("Renamed"));
        assert_eq!(record.case_bucket.as_deref(), Some("closed"));
        assert_eq!(record.category.as_deref(), Some("discharge"));
        assert_eq!(record.text, "CBC\nPlatelets 520");
    }

    #[test]
    fn modified_file_is_reextracted() {
        let fx = note_fixture();
        fx.indexer.run_index_cycle(false, None, None).unwrap();
        fx.write("P1/cbc.txt", "CBC\nPlatelets 610 repeat sample\n");
        fx.indexer.run_index_cycle(false, None, None).unwrap();
        assert_eq!(fx.calls(), 2);
        let state = fx.indexer.read_state().unwrap();
        assert!(state.documents["p1::f1"].text.contains("610"));
    }

    #[test]
    fn forced_cycle_reextracts_everything() {
        let fx = note_fixture();
        fx.indexer.run_index_cycle(false, None, None).unwrap();
        fx.indexer.reindex(true, None, None).unwrap();
        assert_eq!(fx.calls(), 2);
    }

    #[test]
    fn missing_file_is_recorded_as_failed() {
        let fx = Fixture::new();
        fx.catalog
            .replace(vec![entry(
                patient("P1"),
                vec![file("f9", "P1/gone.txt", "lab_report", "2024-01-01T00:00:00Z")],
            )])
            .unwrap();
        let status = fx.indexer.run_index_cycle(false, None, None).unwrap();
        assert_eq!(status.documents_failed, 1);
        let state = fx.indexer.read_state().unwrap();
        let record = &state.documents["p1::f9"];
        assert_eq!(record.error.as_deref(), Some(MISSING_FILE_ERROR));
        assert_eq!(record.extractor, Extractor::None);
        assert!(record.text.is_empty());
        assert_eq!(fx.calls(), 0);
    }

    #[test]
    fn path_escaping_vault_is_rejected() {
        let fx = Fixture::new();
        std::fs::write(fx.dir.path().join("secret.txt"), "top secret").unwrap();
        fx.catalog
            .replace(vec![entry(
                patient("P1"),
                vec![file("f1", "../secret.txt", "lab_report", "2024-01-01T00:00:00Z")],
            )])
            .unwrap();
        fx.indexer.run_index_cycle(false, None, None).unwrap();
        let state = fx.indexer.read_state().unwrap();
        assert_eq!(state.documents["p1::f1"].error.as_deref(), Some(MISSING_FILE_ERROR));
        assert_eq!(fx.calls(), 0);
    }

    #[test]
    fn non_searchable_files_are_ignored() {
        let fx = Fixture::new();
        fx.write("P1/letter.docx", "PK");
        fx.catalog
            .replace(vec![entry(
                patient("P1"),
                vec![file("f1", "P1/letter.docx", "other", "2024-01-01T00:00:00Z")],
            )])
            .unwrap();
        let status = fx.indexer.run_index_cycle(false, None, None).unwrap();
        assert_eq!(status.documents_total, 0);
        assert_eq!(fx.calls(), 0);
    }

    fn scans_fixture(count: usize) -> Fixture {
        let fx = Fixture::new();
        let files = (0..count)
            .map(|i| {
                let relative = format!("P1/scan{i}.png");
                fx.write(&relative, "png");
                file(&format!("s{i}"), &relative, "imaging", "2024-01-01T00:00:00Z")
            })
            .collect();
        fx.catalog.replace(vec![entry(patient("P1"), files)]).unwrap();
        fx
    }

    #[test]
    fn routine_cycle_throttles_external_tools() {
        let fx = scans_fixture(5);
        let status = fx.indexer.run_index_cycle(false, None, None).unwrap();
        assert_eq!(fx.ocr_calls(), 2);
        assert_eq!(status.documents_indexed, 2);
        assert_eq!(status.documents_pending, 3);
        {
            let state = fx.indexer.read_state().unwrap();
            let pending: Vec<_> = state
                .documents
                .values()
                .filter(|d| d.status == DocumentStatus::Pending)
                .collect();
            assert!(pending.iter().all(|d| d.extractor == Extractor::Queued));
            assert!(pending.iter().all(|d| d.error.as_deref() == Some(THROTTLED_REASON)));
            assert!(pending.iter().all(|d| d.text.is_empty()));
        }

        fx.indexer.run_index_cycle(false, None, None).unwrap();
        let status = fx.indexer.run_index_cycle(false, None, None).unwrap();
        assert_eq!(fx.ocr_calls(), 5);
        assert_eq!(status.documents_indexed, 5);
        assert_eq!(status.documents_pending, 0);
    }

    #[test]
    fn failed_ocr_counts_against_cap_and_retries() {
        let fx = Fixture::new();
        fx.write("P1/broken.png", "png");
        fx.write("P1/ok.png", "png");
        fx.catalog
            .replace(vec![entry(
                patient("P1"),
                vec![
                    file("a", "P1/broken.png", "imaging", "2024-01-01T00:00:00Z"),
                    file("b", "P1/ok.png", "imaging", "2024-01-01T00:00:00Z"),
                ],
            )])
            .unwrap();
        let status = fx.indexer.run_index_cycle(false, None, None).unwrap();
        assert_eq!(status.documents_failed, 1);
        {
            let state = fx.indexer.read_state().unwrap();
            let failed = &state.documents["p1::a"];
            assert_eq!(failed.extractor, Extractor::Marker);
            assert_eq!(failed.error.as_deref(), Some("marker exploded; tesseract missing"));
        }
        // Failed records are retried even when the file is unchanged.
        fx.indexer.run_index_cycle(false, None, None).unwrap();
        assert_eq!(fx.ocr_calls(), 3);
    }

    #[test]
    fn forced_or_targeted_cycles_ignore_throttle() {
        let fx = scans_fixture(4);
        fx.indexer.reindex(true, None, None).unwrap();
        assert_eq!(fx.ocr_calls(), 4);

        let fx = scans_fixture(4);
        fx.indexer.run_index_cycle(false, Some("p1"), None).unwrap();
        assert_eq!(fx.ocr_calls(), 4);
    }

    #[test]
    fn targeted_cycle_touches_only_target() {
        let fx = Fixture::new();
        fx.write("P1/a.txt", "alpha");
        fx.write("P2/b.txt", "beta");
        fx.catalog
            .replace(vec![
                entry(patient("P1"), vec![file("a", "P1/a.txt", "note", "2024-01-01T00:00:00Z")]),
                entry(patient("P2"), vec![file("b", "P2/b.txt", "note", "2024-01-01T00:00:00Z")]),
            ])
            .unwrap();
        fx.indexer.reindex(true, Some(" P2 "), Some("B")).unwrap();
        let state = fx.indexer.read_state().unwrap();
        assert_eq!(state.documents.len(), 1);
        assert!(state.documents.contains_key("p2::b"));
    }

    #[test]
    fn full_cycle_evicts_vanished_files() {
        let fx = note_fixture();
        fx.write("P1/old.txt", "old note");
        fx.catalog
            .replace(vec![entry(
                patient("P1"),
                vec![
                    file("f1", "P1/cbc.txt", "lab_report", "2024-03-01T10:00:00Z"),
                    file("f2", "P1/old.txt", "note", "2024-01-01T00:00:00Z"),
                ],
            )])
            .unwrap();
        fx.indexer.run_index_cycle(false, None, None).unwrap();
        assert_eq!(fx.indexer.status().unwrap().documents_total, 2);

        fx.catalog
            .replace(vec![entry(
                patient("P1"),
                vec![file("f1", "P1/cbc.txt", "lab_report", "2024-03-01T10:00:00Z")],
            )])
            .unwrap();
        // A targeted cycle keeps the stale entry...
        fx.indexer.run_index_cycle(false, Some("p1"), Some("f1")).unwrap();
        assert_eq!(fx.indexer.status().unwrap().documents_total, 2);
        // ...the next full cycle drops it.
        let status = fx.indexer.run_index_cycle(false, None, None).unwrap();
        assert_eq!(status.documents_total, 1);
    }

    /// Catalog that always fails.
    struct BrokenCatalog;

    impl CatalogProvider for BrokenCatalog {
        fn snapshot(&self) -> Result<Vec<CatalogEntry>, CatalogError> {
            Err(CatalogError::Unavailable("vault unmounted".into()))
        }
    }

    #[test]
    fn catalog_failure_is_recorded_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let indexer = DocumentIndexer::new(
            settings_for(dir.path()),
            Arc::new(CountingExtractor::default()),
            Arc::new(BrokenCatalog),
        );
        let status = indexer.run_index_cycle(false, None, None).unwrap();
        assert_eq!(status.last_cycle_error.as_deref(), Some("Catalog unavailable: vault unmounted"));
        assert!(status.last_cycle_finished_at.is_some());
        assert!(status.updated_at.is_none());
        assert!(dir.path().join("data").join("index.json").exists());
    }

    #[test]
    fn extractor_panic_aborts_cycle_without_killing_indexer() {
        let fx = note_fixture();
        fx.write("P1/crash.png", "png");
        let files = vec![
            file("f1", "P1/cbc.txt", "lab_report", "2024-03-01T10:00:00Z"),
            file("f2", "P1/crash.png", "imaging", "2024-03-02T10:00:00Z"),
        ];
        fx.catalog.replace(vec![entry(patient("P1"), files)]).unwrap();

        let status = fx.indexer.run_index_cycle(false, None, None).unwrap();
        let error = status.last_cycle_error.unwrap();
        assert!(error.starts_with("Index cycle panicked: decoder crashed"), "{error}");
        assert_eq!(status.documents_indexed, 1);
        assert!(!status.cycle_in_progress);
        assert!(status.updated_at.is_none());

        fx.catalog
            .replace(vec![entry(
                patient("P1"),
                vec![file("f1", "P1/cbc.txt", "lab_report", "2024-03-01T10:00:00Z")],
            )])
            .unwrap();
        let status = fx.indexer.run_index_cycle(false, None, None).unwrap();
        assert!(status.last_cycle_error.is_none());
        assert!(status.updated_at.is_some());
    }

    #[test]
    fn index_survives_restart() {
        let fx = note_fixture();
        let status = fx.indexer.run_index_cycle(false, None, None).unwrap();
        let reopened = fx.reopen();
        assert_eq!(reopened.status().unwrap(), status);
        assert_eq!(
            reopened.search("platelets", None, None).unwrap(),
            fx.indexer.search("platelets", None, None).unwrap()
        );
        reopened.run_index_cycle(false, None, None).unwrap();
        assert_eq!(fx.calls(), 1);
    }

    #[test]
    fn overlapping_cycle_returns_status_immediately() {
        let fx = note_fixture();
        let _held = fx.indexer.cycle_lock.lock().unwrap();
        let status = fx.indexer.run_index_cycle(true, None, None).unwrap();
        assert_eq!(status.documents_total, 0);
        assert_eq!(fx.calls(), 0);
    }

    #[test]
    fn background_loop_runs_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("vault/P1")).unwrap();
        std::fs::write(dir.path().join("vault/P1/cbc.txt"), "Hb 9").unwrap();
        let catalog = Arc::new(StaticCatalog::new(vec![entry(
            patient("P1"),
            vec![file("f1", "P1/cbc.txt", "lab_report", "2024-01-01T00:00:00Z")],
        )]));
        let indexer = Arc::new(DocumentIndexer::new(
            settings_for(dir.path()),
            Arc::new(CountingExtractor::default()),
            catalog,
        ));

        let mut handle = indexer.start().unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while indexer.status().unwrap().documents_indexed == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(indexer.status().unwrap().documents_indexed, 1);
        assert!(indexer.status().unwrap().running);

        assert!(handle.shutdown(Duration::from_secs(5)));
        assert!(!indexer.status().unwrap().running);
    }
}
