pub mod assist;
pub mod assist_jobs; // Attachment-assist job queue + worker
pub mod background;
pub mod extraction;
pub mod heuristics;
pub mod indexer; // Document index, search and lab projections
pub mod json_store;
