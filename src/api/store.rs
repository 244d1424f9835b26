//! Purpose: Storage capability consumed by the loader, plus two local stores.
//! Exports: `RecordStore`, `MemoryStore`, `JsonlStore`.
//! Role: The only seam between the pipeline and wherever records end up.
//! Invariants: Stores are shared across workers and must accept concurrent `save` calls.
//! Invariants: A failed `save` leaves no partial record visible to readers.
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::core::error::{Error, ErrorKind};
use crate::core::record::Keyed;

pub trait RecordStore<T>: Send + Sync + 'static {
    fn save(&self, record: &T) -> Result<(), Error>;
}

impl<T, S> RecordStore<T> for Arc<S>
where
    S: RecordStore<T> + ?Sized,
{
    fn save(&self, record: &T) -> Result<(), Error> {
        (**self).save(record)
    }
}

fn lock<'a, V>(mutex: &'a Mutex<V>, what: &str) -> Result<MutexGuard<'a, V>, Error> {
    mutex.lock().map_err(|_| {
        Error::new(ErrorKind::Internal).with_message(format!("{what} lock poisoned"))
    })
}

/// In-process store keyed by record id; a later save replaces an earlier one.
///
/// A single insert cannot leave the map half-written, so a poisoned lock is recovered
/// rather than reported.
pub struct MemoryStore<T> {
    records: Mutex<HashMap<String, T>>,
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Keyed + Clone> MemoryStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, T>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, id: &str) -> Result<T, Error> {
        if id.is_empty() {
            return Err(Error::new(ErrorKind::Usage).with_message("record id is missing"));
        }
        self.entries().get(id).cloned().ok_or_else(|| {
            Error::new(ErrorKind::NotFound)
                .with_message("record not found")
                .with_record(id)
        })
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every stored record, in no particular order.
    pub fn records(&self) -> Vec<T> {
        self.entries().values().cloned().collect()
    }
}

impl<T: Keyed + Clone> RecordStore<T> for MemoryStore<T> {
    fn save(&self, record: &T) -> Result<(), Error> {
        if record.id().is_empty() {
            return Err(Error::new(ErrorKind::Usage).with_message("record id is missing"));
        }
        self.entries().insert(record.id().to_string(), record.clone());
        Ok(())
    }
}

/// Appends each saved record to a file as one JSON line.
pub struct JsonlStore {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonlStore {
    /// Opens `path` for appending, creating it when missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| {
                let kind = if err.kind() == std::io::ErrorKind::NotFound {
                    ErrorKind::NotFound
                } else {
                    ErrorKind::Io
                };
                Error::new(kind)
                    .with_message(format!("failed to open {}", path.display()))
                    .with_source(err)
            })?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn flush(&self) -> Result<(), Error> {
        let mut writer = lock(&self.writer, "jsonl store")?;
        writer.flush().map_err(|err| {
            Error::new(ErrorKind::Storage)
                .with_message("failed to flush records")
                .with_source(err)
        })
    }
}

impl<T: Keyed + Serialize> RecordStore<T> for JsonlStore {
    fn save(&self, record: &T) -> Result<(), Error> {
        // Encode outside the lock so a bad record never leaves half a line behind.
        let mut line = serde_json::to_vec(record).map_err(|err| {
            Error::new(ErrorKind::Storage)
                .with_message("failed to encode record")
                .with_source(err)
        })?;
        line.push(b'\n');
        let mut writer = lock(&self.writer, "jsonl store")?;
        writer.write_all(&line).map_err(|err| {
            Error::new(ErrorKind::Storage)
                .with_message("failed to write record")
                .with_source(err)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader};
    use std::sync::Arc;

    use super::{JsonlStore, MemoryStore, RecordStore};
    use crate::core::error::ErrorKind;
    use crate::core::record::Record;

    fn record(id: &str, name: &str) -> Record {
        Record {
            id: id.to_string(),
            name: name.to_string(),
            ..Record::default()
        }
    }

    #[test]
    fn memory_store_saves_and_gets() {
        let store = MemoryStore::new();
        store.save(&record("A", "first")).expect("save");
        store.save(&record("A", "second")).expect("save");
        store.save(&record("B", "other")).expect("save");
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("A").expect("get").name, "second");
    }

    #[test]
    fn memory_store_rejects_missing_ids() {
        let store = MemoryStore::new();
        let err = store.save(&record("", "nameless")).expect_err("missing id");
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert!(store.is_empty());
        assert_eq!(
            store.get("").expect_err("missing id").kind(),
            ErrorKind::Usage
        );
    }

    #[test]
    fn memory_store_reports_unknown_ids() {
        let store: MemoryStore<Record> = MemoryStore::new();
        let err = store.get("ZZZZZ").expect_err("not found");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.record(), Some("ZZZZZ"));
    }

    #[test]
    fn memory_store_survives_a_poisoned_lock() {
        let store = Arc::new(MemoryStore::new());
        store.save(&record("A", "a")).expect("save");
        let holder = Arc::clone(&store);
        let crashed = std::thread::spawn(move || {
            let _records = holder.records.lock().expect("lock");
            panic!("writer crashed while holding the lock");
        })
        .join();
        assert!(crashed.is_err());
        assert!(store.records.is_poisoned());

        assert_eq!(store.len(), 1);
        assert_eq!(store.records().len(), 1);
        assert_eq!(store.get("A").expect("get").name, "a");
        store.save(&record("B", "b")).expect("save after poison");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn shared_store_saves_through_arc() {
        let store = Arc::new(MemoryStore::new());
        let shared: Arc<MemoryStore<Record>> = Arc::clone(&store);
        shared.save(&record("A", "a")).expect("save");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn jsonl_store_appends_lines() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("records.jsonl");
        let store = JsonlStore::open(&path).expect("open");
        store.save(&record("A", "a")).expect("save");
        store.save(&record("B", "b")).expect("save");
        store.flush().expect("flush");

        let file = std::fs::File::open(store.path()).expect("file");
        let lines: Vec<serde_json::Value> = BufReader::new(file)
            .lines()
            .map(|line| serde_json::from_str(&line.expect("line")).expect("json"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["id"], "A");
        assert_eq!(lines[1]["name"], "b");
        assert_eq!(lines[1]["coordinates"], serde_json::json!([0.0, 0.0]));
    }

    #[test]
    fn jsonl_store_open_fails_for_missing_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = JsonlStore::open(temp.path().join("missing").join("out.jsonl"))
            .err()
            .expect("open error");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
