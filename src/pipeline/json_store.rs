//! Whole-file JSON artifacts.
//!
//! Saves go to a temp file in the destination directory and are renamed
//! over the target, so a crash never leaves a half-written artifact.
//! Loads are tolerant: an unreadable or malformed file is logged and
//! treated as absent.

use std::collections::BTreeMap;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to replace artifact: {0}")]
    Persist(#[from] tempfile::PersistError),
}

pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer(&mut tmp, value)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}

/// Top-level JSON object of an artifact, or `None` if missing or unusable.
pub fn load_object(path: &Path) -> Option<Map<String, Value>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Unreadable artifact, starting empty");
            return None;
        }
    };
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Some(map),
        Ok(_) => {
            tracing::warn!(path = %path.display(), "Artifact is not a JSON object, starting empty");
            None
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Malformed artifact, starting empty");
            None
        }
    }
}

/// Decode one optional field, falling back to the default when absent or invalid.
pub fn field<T: DeserializeOwned + Default>(object: &Map<String, Value>, key: &str) -> T {
    object
        .get(key)
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

/// Decode a keyed record map, skipping records that do not parse.
pub fn records<T: DeserializeOwned>(object: &Map<String, Value>, key: &str) -> BTreeMap<String, T> {
    let Some(Value::Object(entries)) = object.get(key) else {
        return BTreeMap::new();
    };
    entries
        .iter()
        .filter_map(|(id, raw)| match serde_json::from_value::<T>(raw.clone()) {
            Ok(record) => Some((id.clone(), record)),
            Err(e) => {
                tracing::warn!(record = %id, error = %e, "Skipping malformed record");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Item {
        name: String,
        size: u32,
    }

    #[test]
    fn save_creates_parent_dirs_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/data/artifact.json");
        let value = serde_json::json!({"version": 1, "items": {"a": {"name": "a", "size": 3}}});
        save_json(&path, &value).unwrap();

        let object = load_object(&path).unwrap();
        assert_eq!(field::<u32>(&object, "version"), 1);
        let items: BTreeMap<String, Item> = records(&object, "items");
        assert_eq!(items["a"], Item { name: "a".into(), size: 3 });
    }

    #[test]
    fn save_replaces_existing_file_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact.json");
        save_json(&path, &serde_json::json!({"v": 1})).unwrap();
        save_json(&path, &serde_json::json!({"v": 2})).unwrap();
        assert_eq!(field::<u32>(&load_object(&path).unwrap(), "v"), 2);
        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn missing_and_malformed_files_load_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_object(&dir.path().join("absent.json")).is_none());

        let garbage = dir.path().join("garbage.json");
        std::fs::write(&garbage, "{not json").unwrap();
        assert!(load_object(&garbage).is_none());

        let list = dir.path().join("list.json");
        std::fs::write(&list, "[1, 2]").unwrap();
        assert!(load_object(&list).is_none());
    }

    #[test]
    fn bad_records_are_skipped() {
        let object = serde_json::json!({
            "items": {
                "good": {"name": "g", "size": 1},
                "bad": {"name": "b", "size": "huge"},
                "worse": 7
            }
        });
        let object = object.as_object().unwrap();
        let items: BTreeMap<String, Item> = records(object, "items");
        assert_eq!(items.len(), 1);
        assert!(items.contains_key("good"));
    }

    #[test]
    fn invalid_field_uses_default() {
        let object = serde_json::json!({"updated_at": 12});
        let parsed: Option<chrono::DateTime<chrono::Utc>> = field(object.as_object().unwrap(), "updated_at");
        assert!(parsed.is_none());
    }
}
