//! In-process [`DataStore`] with an optional JSON snapshot file.
//!
//! Without a snapshot path the store is purely in memory; this is how the
//! engine holds transient (session-only) data. With a path, every write
//! outside a bulk operation rewrites the snapshot, and [`MemoryDataStore::reload`]
//! picks up out-of-band edits to the file and notifies listeners.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};
use warden_core::ImmutableSubjectData;

use crate::errors::{Result, StoreError};
use crate::store::{BulkOperation, DataStore, StoreListener};

type SubjectKey = (String, String);
type Snapshot = BTreeMap<String, BTreeMap<String, ImmutableSubjectData>>;

/// In-memory subject data store.
pub struct MemoryDataStore {
    name: String,
    data: DashMap<SubjectKey, ImmutableSubjectData>,
    listeners: DashMap<SubjectKey, Vec<StoreListener>>,
    snapshot_path: Option<PathBuf>,
    write_lock: tokio::sync::Mutex<()>,
    bulk_depth: AtomicUsize,
    dirty: AtomicBool,
    persist_count: AtomicUsize,
    read_count: AtomicUsize,
    read_delay: Mutex<Option<Duration>>,
    write_delay: Mutex<Option<Duration>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryDataStore {
    /// A purely in-memory store.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: DashMap::new(),
            listeners: DashMap::new(),
            snapshot_path: None,
            write_lock: tokio::sync::Mutex::new(()),
            bulk_depth: AtomicUsize::new(0),
            dirty: AtomicBool::new(false),
            persist_count: AtomicUsize::new(0),
            read_count: AtomicUsize::new(0),
            read_delay: Mutex::new(None),
            write_delay: Mutex::new(None),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// A store persisted to `path`, loading any existing snapshot.
    pub async fn with_snapshot(name: impl Into<String>, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut store = Self::new(name);
        for ((subject_type, identifier), data) in flatten(read_snapshot(&path).await?) {
            let _ = store.data.insert((subject_type, identifier), data);
        }
        debug!(store = %store.name, path = ?path, entries = store.data.len(), "loaded snapshot");
        store.snapshot_path = Some(path);
        Ok(store)
    }

    /// Path of the snapshot file, if any.
    #[must_use]
    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    /// Number of `get_data` calls served.
    #[must_use]
    pub fn read_count(&self) -> usize {
        self.read_count.load(Ordering::SeqCst)
    }

    /// Number of times the store persisted its contents.
    #[must_use]
    pub fn persist_count(&self) -> usize {
        self.persist_count.load(Ordering::SeqCst)
    }

    /// Delay every `get_data` by `delay`.
    pub fn set_read_delay(&self, delay: Option<Duration>) {
        *self.read_delay.lock() = delay;
    }

    /// Delay every `set_data` by `delay`, before anything is written.
    pub fn set_write_delay(&self, delay: Option<Duration>) {
        *self.write_delay.lock() = delay;
    }

    /// Make every `get_data` fail with an I/O error.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every `set_data` fail with an I/O error, leaving the data as is.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Replace one subject's data as if changed outside this process and
    /// notify its listeners.
    pub fn apply_external(&self, subject_type: &str, identifier: &str, data: ImmutableSubjectData) {
        let key = (subject_type.to_owned(), identifier.to_owned());
        self.put(key.clone(), data.clone());
        self.notify(&key, data);
    }

    /// Re-read the snapshot file and notify listeners of every subject whose
    /// data changed. Returns the number of changed subjects.
    pub async fn reload(&self) -> Result<usize> {
        let Some(path) = &self.snapshot_path else {
            return Ok(0);
        };
        let fresh: BTreeMap<SubjectKey, ImmutableSubjectData> =
            flatten(read_snapshot(path).await?).collect();

        let mut keys: BTreeSet<SubjectKey> = self.data.iter().map(|e| e.key().clone()).collect();
        keys.extend(fresh.keys().cloned());

        let mut changed = 0;
        for key in keys {
            let next = fresh.get(&key).cloned().unwrap_or_default();
            let current = self.data.get(&key).map(|e| e.value().clone()).unwrap_or_default();
            if next == current {
                continue;
            }
            changed += 1;
            self.put(key.clone(), next.clone());
            self.notify(&key, next);
        }
        debug!(store = %self.name, changed, "reloaded snapshot");
        Ok(changed)
    }

    fn put(&self, key: SubjectKey, data: ImmutableSubjectData) {
        if data.is_empty() {
            let _ = self.data.remove(&key);
        } else {
            let _ = self.data.insert(key, data);
        }
    }

    fn notify(&self, key: &SubjectKey, data: ImmutableSubjectData) {
        let listeners = self
            .listeners
            .get(key)
            .map(|l| l.value().clone())
            .unwrap_or_default();
        for listener in listeners {
            listener(data.clone());
        }
    }

    async fn persist(&self) -> Result<()> {
        if self.bulk_depth.load(Ordering::SeqCst) > 0 {
            self.dirty.store(true, Ordering::SeqCst);
            return Ok(());
        }
        let _guard = self.write_lock.lock().await;
        self.dirty.store(false, Ordering::SeqCst);
        let _ = self.persist_count.fetch_add(1, Ordering::SeqCst);
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let mut snapshot = Snapshot::new();
        for entry in &self.data {
            let (subject_type, identifier) = entry.key();
            let _ = snapshot
                .entry(subject_type.clone())
                .or_default()
                .insert(identifier.clone(), entry.value().clone());
        }
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl DataStore for MemoryDataStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_data(
        &self,
        subject_type: &str,
        identifier: &str,
        listener: Option<StoreListener>,
    ) -> Result<ImmutableSubjectData> {
        let _ = self.read_count.fetch_add(1, Ordering::SeqCst);
        let delay = *self.read_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Io(format!(
                "read of {subject_type}:{identifier} failed"
            )));
        }
        let key = (subject_type.to_owned(), identifier.to_owned());
        if let Some(listener) = listener {
            self.listeners.entry(key.clone()).or_default().push(listener);
        }
        Ok(self
            .data
            .get(&key)
            .map(|e| e.value().clone())
            .unwrap_or_default())
    }

    async fn set_data(
        &self,
        subject_type: &str,
        identifier: &str,
        data: Option<ImmutableSubjectData>,
    ) -> Result<ImmutableSubjectData> {
        let delay = *self.write_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Io(format!(
                "write of {subject_type}:{identifier} failed"
            )));
        }
        let data = data.unwrap_or_default();
        self.put((subject_type.to_owned(), identifier.to_owned()), data.clone());
        self.persist().await?;
        Ok(data)
    }

    async fn is_registered(&self, subject_type: &str, identifier: &str) -> Result<bool> {
        Ok(self
            .data
            .contains_key(&(subject_type.to_owned(), identifier.to_owned())))
    }

    async fn all_identifiers(&self, subject_type: &str) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .data
            .iter()
            .filter(|e| e.key().0 == subject_type)
            .map(|e| e.key().1.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn registered_types(&self) -> Result<Vec<String>> {
        let types: BTreeSet<String> = self.data.iter().map(|e| e.key().0.clone()).collect();
        Ok(types.into_iter().collect())
    }

    async fn perform_bulk<'a>(&'a self, op: BulkOperation<'a>) -> Result<()> {
        let _ = self.bulk_depth.fetch_add(1, Ordering::SeqCst);
        let result = op.await;
        let remaining = self.bulk_depth.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining == 0 && self.dirty.load(Ordering::SeqCst) {
            if let Err(err) = self.persist().await {
                warn!(store = %self.name, error = %err, "failed to persist after bulk operation");
                return result.and(Err(err));
            }
        }
        result
    }
}

async fn read_snapshot(path: &Path) -> Result<Snapshot> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Snapshot::new()),
        Err(err) => Err(err.into()),
    }
}

fn flatten(snapshot: Snapshot) -> impl Iterator<Item = (SubjectKey, ImmutableSubjectData)> {
    snapshot.into_iter().flat_map(|(subject_type, subjects)| {
        subjects
            .into_iter()
            .filter(|(_, data)| !data.is_empty())
            .map(move |(identifier, data)| ((subject_type.clone(), identifier), data))
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
