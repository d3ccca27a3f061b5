//! Keyed store of records that have already reached the CDP. Keys are either
//! normalised emails (prefixed with `profile:`) or hashed event keys.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct StoreFile<'a> {
    events: Vec<&'a str>,
    last_updated: String,
    total_events: usize,
}

/// Older logs are a bare list of keys.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredKeys {
    Object { events: Vec<String> },
    List(Vec<String>),
}

pub struct ProcessedStore {
    path: Option<PathBuf>,
    keys: HashSet<String>,
}

impl ProcessedStore {
    /// A store that is never persisted.
    pub fn in_memory() -> Self {
        ProcessedStore {
            path: None,
            keys: HashSet::new(),
        }
    }

    /// Loads the store at `path`. A missing file yields an empty store, and so
    /// does a file that cannot be parsed (with a warning).
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let keys = match File::open(&path) {
            Ok(file) => match serde_json::from_reader::<_, StoredKeys>(BufReader::new(file)) {
                Ok(StoredKeys::Object { events }) | Ok(StoredKeys::List(events)) => {
                    events.into_iter().collect()
                }
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "could not parse processed log, starting empty"
                    );
                    HashSet::new()
                }
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => HashSet::new(),
            Err(err) => return Err(err.into()),
        };

        tracing::debug!(path = %path.display(), keys = keys.len(), "loaded processed log");
        Ok(ProcessedStore {
            path: Some(path),
            keys,
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    /// Returns `true` if the key was not present yet.
    pub fn insert(&mut self, key: String) -> bool {
        self.keys.insert(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Writes the store to a temporary sibling file and renames it into place.
    pub fn save(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut events: Vec<&str> = self.keys.iter().map(String::as_str).collect();
        events.sort_unstable();
        let data = StoreFile {
            total_events: events.len(),
            events,
            last_updated: Utc::now().to_rfc3339(),
        };

        let tmp_path = path.with_extension("tmp");
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        serde_json::to_writer_pretty(&mut writer, &data)?;
        writer.flush()?;
        drop(writer);
        fs::rename(&tmp_path, path)?;

        tracing::debug!(path = %path.display(), keys = data.total_events, "stored processed log");
        Ok(())
    }
}

/// Store key marking a profile as synced.
pub fn profile_key(email: &str) -> String {
    format!("profile:{}", email.trim().to_lowercase())
}

/// Hex-encoded SHA-256 of the lowercased email and the given parts, joined by `|`.
pub fn event_key(email: &str, parts: &[&str]) -> String {
    let mut key = email.trim().to_lowercase();
    for part in parts {
        key.push('|');
        key.push_str(part.trim());
    }

    hex::encode(Sha256::digest(key.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_key() {
        let key = event_key(" Ada@Example.com", &["T-100", "SKU1 ", "2024-05-01T12:00:00+00:00"]);
        assert_eq!(key.len(), 64);
        assert_eq!(
            key,
            event_key("ada@example.com", &["T-100", "SKU1", "2024-05-01T12:00:00+00:00"])
        );
        assert_ne!(key, event_key("ada@example.com", &["T-101", "SKU1", ""]));

        // sha256("a@b.c|x")
        assert_eq!(
            event_key("a@b.c", &["x"]),
            "13cf702d7facd34c9646617d2a76338c6c03c55df147e3fa8e1e742dae09f5cd"
        );
    }

    #[test]
    fn test_filesystem_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("processed.json");

        let mut store = ProcessedStore::open(&path).unwrap();
        assert!(store.is_empty());
        assert!(store.insert(profile_key("Ada@Example.com")));
        assert!(!store.insert(profile_key("ada@example.com")));
        store.insert("abc".into());
        store.save().unwrap();

        let loaded = ProcessedStore::open(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.contains("profile:ada@example.com"));
        assert!(loaded.contains("abc"));

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["total_events"], 2);
        assert_eq!(raw["events"][0], "abc");
    }

    #[test]
    fn test_legacy_list_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed.json");
        fs::write(&path, r#"["k1", "k2"]"#).unwrap();

        let store = ProcessedStore::open(&path).unwrap();
        assert!(store.contains("k1"));
        assert!(store.contains("k2"));
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed.json");
        fs::write(&path, "{not json").unwrap();

        let store = ProcessedStore::open(&path).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_in_memory_save_is_noop() {
        let mut store = ProcessedStore::in_memory();
        store.insert("k".into());
        store.save().unwrap();
        assert!(store.contains("k"));
    }
}
