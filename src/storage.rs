//! Best-effort key/value persistence for opaque JSON values.
//!
//! Each key is stored as `{data_dir}/{sanitized key}.json`. Writes are
//! atomic (temp file + fsync + rename). The public `save` / `load`
//! surface never fails: problems are logged and reported as `false` or
//! `None`.
//!
//! # Examples
//!
//! ```no_run
//! use ember::storage::JsonStore;
//!
//! let store = JsonStore::new("/tmp/ember-data").unwrap();
//! store.save("settings", &serde_json::json!({"theme": "dark"}));
//! assert!(store.load("settings").is_some());
//! ```

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{EmberError, ErrorKind, Result};

/// Directory-backed JSON store.
#[derive(Debug, Clone)]
pub struct JsonStore {
    data_dir: PathBuf,
}

impl JsonStore {
    /// Open a store, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`EmberError::Persistence`] if the directory cannot be created.
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir).map_err(|e| {
            EmberError::Persistence(format!(
                "failed to create data directory {}: {e}",
                data_dir.display()
            ))
        })?;
        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Save `value` under `key`. Returns whether the write succeeded.
    pub fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> bool {
        match self.try_save(key, value) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key, code = ErrorKind::PersistenceFailure.code(), error = %e, "save failed");
                false
            }
        }
    }

    /// Load the raw value under `key`; `None` if absent or unreadable.
    pub fn load(&self, key: &str) -> Option<serde_json::Value> {
        self.load_as(key)
    }

    /// Load and deserialize the value under `key`; `None` if absent,
    /// unreadable, or of the wrong shape.
    pub fn load_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.try_load(key) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, code = ErrorKind::PersistenceFailure.code(), error = %e, "load failed");
                None
            }
        }
    }

    /// Remove the value under `key`. Absent keys are not an error.
    pub fn remove(&self, key: &str) -> bool {
        let path = self.key_path(key);
        match std::fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => {
                tracing::warn!(key, error = %e, "remove failed");
                false
            }
        }
    }

    /// Fallible save.
    ///
    /// # Errors
    ///
    /// Returns [`EmberError::Persistence`] on serialization or I/O failure.
    pub fn try_save<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let path = self.key_path(key);
        let json = serde_json::to_string(value)
            .map_err(|e| EmberError::Persistence(format!("failed to serialize {key}: {e}")))?;

        let tmp_path = self.data_dir.join(format!(".{}.tmp", sanitize_key(key)));
        std::fs::write(&tmp_path, json.as_bytes()).map_err(|e| {
            EmberError::Persistence(format!(
                "failed to write temp file {}: {e}",
                tmp_path.display()
            ))
        })?;

        if let Ok(file) = std::fs::File::open(&tmp_path) {
            let _ = file.sync_all();
        }

        std::fs::rename(&tmp_path, &path).map_err(|e| {
            EmberError::Persistence(format!(
                "failed to rename temp file to {}: {e}",
                path.display()
            ))
        })
    }

    /// Fallible load; `Ok(None)` for an absent key.
    ///
    /// # Errors
    ///
    /// Returns [`EmberError::Persistence`] on I/O or parse failure.
    pub fn try_load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let path = self.key_path(key);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(EmberError::Persistence(format!(
                    "failed to read {}: {e}",
                    path.display()
                )));
            }
        };
        serde_json::from_str(&content).map(Some).map_err(|e| {
            EmberError::Persistence(format!("failed to parse {}: {e}", path.display()))
        })
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{}.json", sanitize_key(key)))
    }
}

/// Map an arbitrary key to a file-name-safe, collision-free stem.
///
/// ASCII alphanumerics, `-` and `_` pass through; every other byte is
/// written as `%XX`.
fn sanitize_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    if out.is_empty() {
        out.push('%');
    }
    out
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use serde_json::json;

    fn store() -> (tempfile::TempDir, JsonStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonStore::new(dir.path().join("data")).expect("store");
        (dir, store)
    }

    #[test]
    fn round_trip_returns_equal_value() {
        let (_dir, store) = store();
        let values = [
            json!(null),
            json!(42),
            json!("text with \"quotes\" and ünïcode"),
            json!([1, 2.5, false]),
            json!({"history": [{"role": "user", "content": "hi"}], "nested": {"a": []}}),
        ];
        for (i, value) in values.iter().enumerate() {
            let key = format!("key-{i}");
            assert!(store.save(&key, value));
            assert_eq!(store.load(&key).as_ref(), Some(value));
        }
    }

    #[test]
    fn absent_key_loads_none() {
        let (_dir, store) = store();
        assert_eq!(store.load("missing"), None);
        assert!(store.try_load::<serde_json::Value>("missing").unwrap().is_none());
    }

    #[test]
    fn corrupt_file_loads_none() {
        let (_dir, store) = store();
        std::fs::write(store.data_dir().join("bad.json"), "{not json").unwrap();
        assert_eq!(store.load("bad"), None);
        assert!(matches!(
            store.try_load::<serde_json::Value>("bad"),
            Err(EmberError::Persistence(_))
        ));
    }

    #[test]
    fn overwrite_replaces_value() {
        let (_dir, store) = store();
        store.save("k", &json!(1));
        store.save("k", &json!(2));
        assert_eq!(store.load("k"), Some(json!(2)));
        assert!(store.remove("k"));
        assert!(store.remove("k"));
        assert_eq!(store.load("k"), None);
    }

    #[test]
    fn keys_with_path_characters_stay_inside_data_dir() {
        let (_dir, store) = store();
        assert!(store.save("../escape/attempt", &json!("x")));
        assert_eq!(store.load("../escape/attempt"), Some(json!("x")));
        let entries: Vec<_> = std::fs::read_dir(store.data_dir()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn sanitized_keys_do_not_collide() {
        assert_ne!(sanitize_key("a/b"), sanitize_key("a_b"));
        assert_ne!(sanitize_key("a%2F"), sanitize_key("a/"));
        assert_eq!(sanitize_key("chat_history"), "chat_history");
        assert_eq!(sanitize_key(""), "%");
    }

    #[test]
    fn save_fails_softly_when_directory_vanishes() {
        let (_dir, store) = store();
        std::fs::remove_dir_all(store.data_dir()).unwrap();
        assert!(!store.save("k", &json!(1)));
        assert_eq!(store.load("k"), None);
    }

    #[test]
    fn load_as_typed_value() {
        let (_dir, store) = store();
        store.save("list", &vec!["a".to_owned(), "b".to_owned()]);
        let list: Option<Vec<String>> = store.load_as("list");
        assert_eq!(list, Some(vec!["a".to_owned(), "b".to_owned()]));
        let wrong: Option<u32> = store.load_as("list");
        assert_eq!(wrong, None);
    }
}
