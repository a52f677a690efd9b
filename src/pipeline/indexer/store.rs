//! Durable document index artifact.

use std::path::Path;

use crate::models::{DocumentRecord, IndexSnapshot, INDEX_VERSION};
use crate::pipeline::json_store::{self, StoreError};

/// Load the index, tolerating a missing or damaged artifact.
pub fn load_index(path: &Path) -> IndexSnapshot {
    let Some(object) = json_store::load_object(path) else {
        return IndexSnapshot {
            version: INDEX_VERSION,
            ..Default::default()
        };
    };

    let snapshot = IndexSnapshot {
        version: INDEX_VERSION,
        updated_at: json_store::field(&object, "updated_at"),
        last_cycle_started_at: json_store::field(&object, "last_cycle_started_at"),
        last_cycle_finished_at: json_store::field(&object, "last_cycle_finished_at"),
        last_cycle_error: json_store::field(&object, "last_cycle_error"),
        documents: json_store::records::<DocumentRecord>(&object, "documents"),
    };
    tracing::info!(
        path = %path.display(),
        documents = snapshot.documents.len(),
        "Loaded document index"
    );
    snapshot
}

pub fn save_index(path: &Path, snapshot: &IndexSnapshot) -> Result<(), StoreError> {
    json_store::save_json(path, snapshot)
}
