//! Source of the patient/file catalog consumed by every index cycle.

use std::sync::RwLock;

use thiserror::Error;

use crate::models::CatalogEntry;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Catalog unavailable: {0}")]
    Unavailable(String),

    #[error("Catalog lock poisoned")]
    LockPoisoned,
}

/// Point-in-time snapshot of patients and their files.
///
/// Called once per cycle; the indexer never caches the result.
pub trait CatalogProvider: Send + Sync {
    fn snapshot(&self) -> Result<Vec<CatalogEntry>, CatalogError>;
}

/// In-memory catalog, replaced wholesale by whoever builds the catalog.
#[derive(Default)]
pub struct StaticCatalog {
    entries: RwLock<Vec<CatalogEntry>>,
}

impl StaticCatalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }

    pub fn replace(&self, entries: Vec<CatalogEntry>) -> Result<(), CatalogError> {
        let mut guard = self.entries.write().map_err(|_| CatalogError::LockPoisoned)?;
        *guard = entries;
        Ok(())
    }
}

impl CatalogProvider for StaticCatalog {
    fn snapshot(&self) -> Result<Vec<CatalogEntry>, CatalogError> {
        let guard = self.entries.read().map_err(|_| CatalogError::LockPoisoned)?;
        Ok(guard.clone())
    }
}
