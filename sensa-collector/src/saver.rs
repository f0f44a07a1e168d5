//! Persistence consumer
//!
//! Stores every `parse_results` record under its natural key: `user_id` for
//! users, the snapshot `id` for everything else. Saving is idempotent; a
//! redelivered record merges into the stored document and writes nothing
//! when the result is unchanged.

use crate::broker::{Broker, Exchange};
use crate::error::{Error, Result};
use crate::records::parse_object;
use crate::store::{LockTable, write_atomic};
use crate::topics;
use serde_json::{Map, Value};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// A stored JSON document
pub type Record = Map<String, Value>;

/// Outcome of an upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
    Unchanged,
}

/// Keyed document store
pub trait Store: Send + Sync {
    fn upsert(&self, topic: &str, key: &str, record: &Record) -> Result<Upsert>;

    fn get(&self, topic: &str, key: &str) -> Result<Option<Record>>;
}

/// One pretty-printed JSON file per record: `<root>/<topic>/<key>.json`
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    locks: LockTable<(String, String)>,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: LockTable::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, topic: &str, key: &str) -> PathBuf {
        self.root.join(topic).join(format!("{}.json", key))
    }

    fn load(path: &Path) -> Result<Option<Record>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(parse_object(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl Store for FileStore {
    fn upsert(&self, topic: &str, key: &str, record: &Record) -> Result<Upsert> {
        let path = self.path_for(topic, key);
        self.locks
            .with_lock(&(topic.to_string(), key.to_string()), || -> Result<Upsert> {
                let existing = Self::load(&path)?;
                let (merged, outcome) = match existing {
                    None => (record.clone(), Upsert::Inserted),
                    Some(mut stored) => {
                        let before = stored.clone();
                        stored.extend(record.iter().map(|(k, v)| (k.clone(), v.clone())));
                        if stored == before {
                            return Ok(Upsert::Unchanged);
                        }
                        (stored, Upsert::Updated)
                    }
                };
                write_atomic(&path, &serde_json::to_vec_pretty(&merged)?)?;
                Ok(outcome)
            })
    }

    fn get(&self, topic: &str, key: &str) -> Result<Option<Record>> {
        Self::load(&self.path_for(topic, key))
    }
}

/// Field holding the natural key of records on `topic`
pub fn key_field(topic: &str) -> &'static str {
    if topic == topics::USERS { "user_id" } else { "id" }
}

pub struct Saver {
    store: Box<dyn Store>,
}

impl Saver {
    pub fn new(store: impl Store + 'static) -> Self {
        Self {
            store: Box::new(store),
        }
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    /// Persist one raw `parse_results` message published on `topic`.
    pub fn save(&self, topic: &str, data: &[u8]) -> Result<Upsert> {
        if !topics::ALL.contains(&topic) {
            return Err(Error::Persistence(format!("unknown topic \"{}\"", topic)));
        }
        let record = parse_object(data)?;
        let field = key_field(topic);
        let key = match record.get(field) {
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::String(s)) if is_safe_key(s) => s.clone(),
            Some(other) => {
                return Err(Error::Persistence(format!(
                    "{} record has unusable {}: {}",
                    topic, field, other
                )));
            }
            None => {
                return Err(Error::Persistence(format!(
                    "{} record has no {}",
                    topic, field
                )));
            }
        };

        let outcome = self.store.upsert(topic, &key, &record)?;
        log::debug!("{} {} -> {:?}", topic, key, outcome);
        Ok(outcome)
    }

    /// Persist a JSON file as one message on `topic`.
    pub fn save_file(&self, topic: &str, path: &Path) -> Result<Upsert> {
        let data = fs::read(path)?;
        self.save(topic, &data)
    }

    /// Consume `topics` from the broker until `running` is cleared.
    pub fn run(&self, broker: &dyn Broker, topics: &[&str], running: &AtomicBool) -> Result<()> {
        let subscription = broker.subscribe(Exchange::ParseResults, topics)?;
        log::info!("Saver consuming {:?}", topics);

        while running.load(Ordering::Relaxed) {
            let Some(delivery) = subscription.recv_timeout(Duration::from_millis(200))? else {
                continue;
            };
            if let Err(e) = self.save(&delivery.routing_key, &delivery.body) {
                log::warn!("Dropping {} message: {}", delivery.routing_key, e);
            }
        }
        log::info!("Saver stopped");
        Ok(())
    }
}

fn is_safe_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn saver() -> (tempfile::TempDir, Saver) {
        let dir = tempfile::tempdir().unwrap();
        let saver = Saver::new(FileStore::new(dir.path()));
        (dir, saver)
    }

    #[test]
    fn test_save_is_idempotent() {
        let (dir, saver) = saver();
        let body = br#"{"user_id": 123, "username": "Test Testenson"}"#;

        assert_eq!(saver.save("users", body).unwrap(), Upsert::Inserted);
        assert_eq!(saver.save("users", body).unwrap(), Upsert::Unchanged);

        let entries = fs::read_dir(dir.path().join("users")).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_merge_updates_fields() {
        let (_dir, saver) = saver();
        saver.save("pose", br#"{"id": 5, "user_id": 1}"#).unwrap();
        assert_eq!(
            saver
                .save("pose", br#"{"id": 5, "translation": {"x": 1.0}}"#)
                .unwrap(),
            Upsert::Updated
        );

        let stored = saver.store().get("pose", "5").unwrap().unwrap();
        assert_eq!(stored["user_id"], 1);
        assert_eq!(stored["translation"], json!({"x": 1.0}));
    }

    #[test]
    fn test_rejects_bad_input() {
        let (_dir, saver) = saver();
        assert!(saver.save("users", b"not json").is_err());
        assert!(saver.save("users", b"[1, 2]").is_err());
        assert!(matches!(
            saver.save("users", br#"{"username": "x"}"#),
            Err(Error::Persistence(_))
        ));
        assert!(saver.save("pose", br#"{"id": "../escape"}"#).is_err());
        assert!(saver.save("moods", br#"{"id": 1}"#).is_err());
    }

    #[test]
    fn test_save_file() {
        let (dir, saver) = saver();
        let path = dir.path().join("feelings.result");
        fs::write(
            &path,
            r#"{"id": 1575446887339, "user_id": 3, "hunger": 0.5, "thirst": 0.3}"#,
        )
        .unwrap();

        assert_eq!(saver.save_file("feelings", &path).unwrap(), Upsert::Inserted);
        let stored = saver.store().get("feelings", "1575446887339").unwrap().unwrap();
        assert_eq!(stored["thirst"], 0.3);

        assert!(matches!(
            saver.save_file("feelings", &dir.path().join("missing.json")),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_missing_record() {
        let (_dir, saver) = saver();
        assert!(saver.store().get("users", "1").unwrap().is_none());
    }
}
