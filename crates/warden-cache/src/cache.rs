//! Per-subject-type coalescing cache.
//!
//! A [`SubjectDataCache`] maps identifiers to in-flight or completed loads
//! from one [`DataStore`]. All state that depends on the store lives in a
//! `CacheGeneration`; replacing the backend swaps in a fresh generation
//! atomically, and every notification is tagged with the generation that
//! produced it so late results from the old store are dropped.
//!
//! Concurrent loads of one identifier share a single [`Shared`] future, so a
//! generation performs at most one store read per identifier until the entry
//! is evicted or invalidated. Writes for one identifier are serialized by a
//! per-identifier async mutex, and every write holds the backend lock shared
//! so a backend swap waits for in-flight writes and no write straddles it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::{DashMap, DashSet};
use futures::FutureExt;
use futures::future::{self, BoxFuture, Shared};
use parking_lot::RwLock;
use tracing::{debug, info, warn};
use warden_core::ImmutableSubjectData;
use warden_store::{DataStore, StoreError, StoreListener};

use crate::errors::{CacheError, Result};
use crate::listeners::{Listener, ListenerHandle, ListenerRegistry};
use crate::reference::{Change, ListenerMode, SubjectDataReference};

type LoadFuture =
    Shared<BoxFuture<'static, std::result::Result<ImmutableSubjectData, StoreError>>>;

struct CacheEntry {
    load: LoadFuture,
    last_access: AtomicU64,
}

impl CacheEntry {
    fn new(load: LoadFuture, tick: u64) -> Self {
        Self {
            load,
            last_access: AtomicU64::new(tick),
        }
    }

    fn ready(data: ImmutableSubjectData, tick: u64) -> Self {
        let load = future::ready(Ok(data)).boxed().shared();
        // poll once so the value is observable through `peek`
        let _ = load.clone().now_or_never();
        Self::new(load, tick)
    }

    fn touch(&self, tick: u64) {
        self.last_access.store(tick, Ordering::Relaxed);
    }

    fn loaded(&self) -> Option<ImmutableSubjectData> {
        match self.load.peek() {
            Some(Ok(data)) => Some(data.clone()),
            _ => None,
        }
    }
}

struct CacheGeneration {
    id: u64,
    store: Arc<dyn DataStore>,
    entries: DashMap<String, CacheEntry>,
    // identifiers whose store listener is already registered in this generation
    subscribed: DashSet<String>,
    clock: AtomicU64,
}

impl CacheGeneration {
    fn new(id: u64, store: Arc<dyn DataStore>) -> Self {
        Self {
            id,
            store,
            entries: DashMap::new(),
            subscribed: DashSet::new(),
            clock: AtomicU64::new(0),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Origin {
    /// A write through [`SubjectDataCache::set`] or [`SubjectDataCache::update`].
    Cache,
    /// A write committed by the identifier's reference.
    Reference,
    /// An out-of-band change reported by the store.
    Store,
    /// A re-fetch after a backend swap.
    Reload,
}

/// Coalescing, bounded cache of one subject type's data.
pub struct SubjectDataCache {
    subject_type: String,
    max_size: Option<usize>,
    generation: RwLock<Arc<CacheGeneration>>,
    listeners: ListenerRegistry<String, ImmutableSubjectData>,
    type_listeners: ListenerRegistry<(), (String, ImmutableSubjectData)>,
    references: DashMap<String, Arc<SubjectDataReference>>,
    write_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    // shared by writes, exclusive for a backend swap
    backend_lock: tokio::sync::RwLock<()>,
    me: Weak<SubjectDataCache>,
}

impl SubjectDataCache {
    /// Create a cache over `store`. `max_size` of `None` means unbounded.
    pub fn new(
        subject_type: impl Into<String>,
        store: Arc<dyn DataStore>,
        max_size: Option<usize>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            subject_type: subject_type.into(),
            max_size,
            generation: RwLock::new(Arc::new(CacheGeneration::new(0, store))),
            listeners: ListenerRegistry::new(),
            type_listeners: ListenerRegistry::new(),
            references: DashMap::new(),
            write_locks: DashMap::new(),
            backend_lock: tokio::sync::RwLock::new(()),
            me: me.clone(),
        })
    }

    /// Subject type this cache serves.
    #[must_use]
    pub fn subject_type(&self) -> &str {
        &self.subject_type
    }

    /// Entry bound, `None` when unbounded.
    #[must_use]
    pub fn max_size(&self) -> Option<usize> {
        self.max_size
    }

    /// Store backing the current generation.
    #[must_use]
    pub fn store(&self) -> Arc<dyn DataStore> {
        Arc::clone(&self.current().store)
    }

    /// Current backend generation, incremented by every [`Self::update_backend`].
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.current().id
    }

    fn current(&self) -> Arc<CacheGeneration> {
        Arc::clone(&self.generation.read())
    }

    // ── Reads ───────────────────────────────────────────────────────

    /// Current data for `identifier`, loading it if needed.
    ///
    /// A supplied listener is registered only once the load has succeeded.
    pub async fn get_data(
        &self,
        identifier: &str,
        listener: Option<Listener<ImmutableSubjectData>>,
    ) -> Result<ImmutableSubjectData> {
        let data = self.load(identifier).await?;
        if let Some(listener) = listener {
            let _ = self.listeners.register(identifier.to_owned(), listener);
        }
        Ok(data)
    }

    /// Like [`Self::get_data`] with a listener, returning its handle.
    pub async fn listen(
        &self,
        identifier: &str,
        listener: Listener<ImmutableSubjectData>,
    ) -> Result<(ImmutableSubjectData, ListenerHandle)> {
        let data = self.load(identifier).await?;
        let handle = self.listeners.register(identifier.to_owned(), listener);
        Ok((data, handle))
    }

    /// Remove a listener registered through this cache.
    pub fn remove_listener(&self, handle: ListenerHandle) -> bool {
        self.listeners.unregister(handle)
    }

    /// Register a listener for changes to any identifier of this type.
    pub fn on_any_update(
        &self,
        listener: Listener<(String, ImmutableSubjectData)>,
    ) -> ListenerHandle {
        self.type_listeners.register((), listener)
    }

    /// Remove a listener registered with [`Self::on_any_update`].
    pub fn remove_any_listener(&self, handle: ListenerHandle) -> bool {
        self.type_listeners.unregister(handle)
    }

    async fn load(&self, identifier: &str) -> Result<ImmutableSubjectData> {
        let (generation, data) = self.fetch(identifier).await?;
        self.evict_overflow(&generation);
        Ok(data)
    }

    /// Load without evicting, returning the generation the data came from.
    async fn fetch(
        &self,
        identifier: &str,
    ) -> Result<(Arc<CacheGeneration>, ImmutableSubjectData)> {
        let generation = self.current();
        let load = self.load_future(&generation, identifier);
        match load.clone().await {
            Ok(data) => Ok((generation, data)),
            Err(source) => {
                let _ = generation
                    .entries
                    .remove_if(identifier, |_, entry| Shared::ptr_eq(&entry.load, &load));
                let _ = generation.subscribed.remove(identifier);
                warn!(
                    subject_type = %self.subject_type,
                    identifier,
                    error = %source,
                    "failed to load subject data"
                );
                Err(CacheError::Loading {
                    subject_type: self.subject_type.clone(),
                    identifier: identifier.to_owned(),
                    source,
                })
            }
        }
    }

    fn load_future(&self, generation: &Arc<CacheGeneration>, identifier: &str) -> LoadFuture {
        let tick = generation.tick();
        if let Some(entry) = generation.entries.get(identifier) {
            entry.touch(tick);
            return entry.load.clone();
        }
        let entry = generation
            .entries
            .entry(identifier.to_owned())
            .or_insert_with(|| {
                let listener = generation
                    .subscribed
                    .insert(identifier.to_owned())
                    .then(|| self.store_listener(generation.id, identifier));
                let store = Arc::clone(&generation.store);
                let subject_type = self.subject_type.clone();
                let id = identifier.to_owned();
                debug!(subject_type = %subject_type, identifier, generation = generation.id, "loading subject data");
                let load = async move { store.get_data(&subject_type, &id, listener).await }
                    .boxed()
                    .shared();
                CacheEntry::new(load, tick)
            });
        entry.touch(tick);
        entry.load.clone()
    }

    fn store_listener(&self, generation_id: u64, identifier: &str) -> StoreListener {
        let cache = self.me.clone();
        let identifier = identifier.to_owned();
        Arc::new(move |data| {
            if let Some(cache) = cache.upgrade() {
                let _ = cache.publish(generation_id, &identifier, data, Origin::Store);
            }
        })
    }

    /// Whether `identifier` has an entry (loading or loaded).
    #[must_use]
    pub fn contains(&self, identifier: &str) -> bool {
        self.current().entries.contains_key(identifier)
    }

    /// Identifiers currently cached, sorted.
    #[must_use]
    pub fn cached_identifiers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .current()
            .entries
            .iter()
            .map(|e| e.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.current().entries.len()
    }

    /// Whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every identifier the store knows for this subject type.
    pub async fn all_identifiers(&self) -> Result<Vec<String>> {
        Ok(self.store().all_identifiers(&self.subject_type).await?)
    }

    /// Whether the store holds data for `identifier`.
    pub async fn is_registered(&self, identifier: &str) -> Result<bool> {
        Ok(self
            .store()
            .is_registered(&self.subject_type, identifier)
            .await?)
    }

    /// Load every identifier the store knows for this subject type.
    ///
    /// Returns the number of identifiers loaded.
    pub async fn cache_all(&self) -> Result<usize> {
        let identifiers = self.all_identifiers().await?;
        let _ = future::try_join_all(identifiers.iter().map(|id| self.load(id))).await?;
        debug!(subject_type = %self.subject_type, count = identifiers.len(), "cached all subjects");
        Ok(identifiers.len())
    }

    // ── Writes ──────────────────────────────────────────────────────

    /// Atomically transform the data for `identifier`.
    ///
    /// Updates to one identifier are serialized; `op` runs exactly once per
    /// call against the latest value. Unchanged results are not written.
    pub async fn update<F>(&self, identifier: &str, op: F) -> Result<Change<ImmutableSubjectData>>
    where
        F: FnOnce(&ImmutableSubjectData) -> ImmutableSubjectData,
    {
        let lock = self.write_lock(identifier);
        let _guard = lock.lock().await;
        let _backend = self.backend_lock.read().await;
        let current = self.load(identifier).await?;
        let next = op(&current);
        if next == current {
            return Ok(Change::new(current, next));
        }
        let stored = self.write(identifier, next, Origin::Cache).await?;
        Ok(Change::new(current, stored))
    }

    /// Persist `data` for `identifier`, then publish it.
    pub async fn set(
        &self,
        identifier: &str,
        data: ImmutableSubjectData,
    ) -> Result<ImmutableSubjectData> {
        let lock = self.write_lock(identifier);
        let _guard = lock.lock().await;
        let _backend = self.backend_lock.read().await;
        self.write(identifier, data, Origin::Cache).await
    }

    /// Persist the latest value of `reference` after it committed `change`.
    ///
    /// On success the reference's own listeners see `change.new`; on failure
    /// the reference is rolled back to `change.old` if nothing has been
    /// committed on top of it since.
    pub(crate) async fn persist_reference(
        &self,
        reference: &SubjectDataReference,
        change: &Change<ImmutableSubjectData>,
    ) -> Result<()> {
        let identifier = reference.identifier();
        let lock = self.write_lock(identifier);
        let _guard = lock.lock().await;
        let _backend = self.backend_lock.read().await;
        // persist the latest local value, not the one that scheduled this write
        match self.write(identifier, reference.get(), Origin::Reference).await {
            Ok(_) => {
                reference.committed(&change.new);
                Ok(())
            }
            Err(err) => {
                if reference.roll_back(change) {
                    warn!(
                        subject_type = %self.subject_type,
                        identifier,
                        error = %err,
                        "reference update not persisted, rolled back"
                    );
                }
                Err(err)
            }
        }
    }

    /// Caller holds the identifier's write lock and `backend_lock` shared.
    async fn write(
        &self,
        identifier: &str,
        data: ImmutableSubjectData,
        origin: Origin,
    ) -> Result<ImmutableSubjectData> {
        let generation = self.current();
        let stored = generation
            .store
            .set_data(&self.subject_type, identifier, Some(data))
            .await
            .map_err(|source| CacheError::Persist {
                subject_type: self.subject_type.clone(),
                identifier: identifier.to_owned(),
                source,
            })?;
        let _ = self.publish(generation.id, identifier, stored.clone(), origin);
        Ok(stored)
    }

    fn write_lock(&self, identifier: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            self.write_locks
                .entry(identifier.to_owned())
                .or_default()
                .value(),
        )
    }

    /// Install `data` as the cached value and notify, if `generation_id` is
    /// still current. Returns `false` when the notification was discarded.
    fn publish(
        &self,
        generation_id: u64,
        identifier: &str,
        data: ImmutableSubjectData,
        origin: Origin,
    ) -> bool {
        let generation = self.current();
        if generation.id != generation_id {
            debug!(
                subject_type = %self.subject_type,
                identifier,
                stale = generation_id,
                current = generation.id,
                ?origin,
                "discarding notification from replaced backend"
            );
            return false;
        }
        if origin != Origin::Reload {
            let _ = generation
                .entries
                .insert(identifier.to_owned(), CacheEntry::ready(data.clone(), generation.tick()));
        }
        let _ = self.listeners.call(&identifier.to_owned(), &data);
        let _ = self
            .type_listeners
            .call(&(), &(identifier.to_owned(), data.clone()));
        if origin != Origin::Reference {
            let reference = self
                .references
                .get(identifier)
                .map(|r| Arc::clone(r.value()));
            if let Some(reference) = reference {
                let _ = reference.accept(data);
            }
        }
        self.evict_overflow(&generation);
        true
    }

    /// Drop the cached entry and every cache listener for `identifier`.
    pub fn invalidate(&self, identifier: &str) {
        let _ = self.current().entries.remove(identifier);
        let removed = self.listeners.remove_all(&identifier.to_owned());
        debug!(subject_type = %self.subject_type, identifier, listeners = removed, "invalidated");
    }

    // ── References ──────────────────────────────────────────────────

    /// The cache-owned reference for `identifier`, created on first request.
    ///
    /// `mode` applies only when the reference is created.
    pub async fn reference_for(
        &self,
        identifier: &str,
        mode: ListenerMode,
    ) -> Result<Arc<SubjectDataReference>> {
        if let Some(existing) = self.references.get(identifier) {
            return Ok(Arc::clone(existing.value()));
        }
        let (generation, data) = self.fetch(identifier).await?;
        let reference = Arc::clone(
            self.references
                .entry(identifier.to_owned())
                .or_insert_with(|| {
                    Arc::new(SubjectDataReference::new(
                        identifier.to_owned(),
                        self.me.clone(),
                        data,
                        mode,
                    ))
                })
                .value(),
        );
        // catch up with anything published while the reference was being built
        let latest = self
            .current()
            .entries
            .get(identifier)
            .and_then(|e| e.loaded());
        if let Some(latest) = latest {
            let _ = reference.accept(latest);
        }
        // only now is the entry pinned by the reference
        self.evict_overflow(&generation);
        Ok(reference)
    }

    // ── Eviction ────────────────────────────────────────────────────

    fn evict_overflow(&self, generation: &CacheGeneration) {
        let Some(max_size) = self.max_size else {
            return;
        };
        let overflow = generation.entries.len().saturating_sub(max_size);
        if overflow == 0 {
            return;
        }
        let mut candidates: Vec<(u64, String)> = generation
            .entries
            .iter()
            .filter(|e| e.load.peek().is_some())
            .map(|e| (e.last_access.load(Ordering::Relaxed), e.key().clone()))
            .collect();
        candidates.retain(|(_, id)| self.is_evictable(id));
        candidates.sort();
        for (_, identifier) in candidates.into_iter().take(overflow) {
            let _ = generation.entries.remove(&identifier);
            let _ = self
                .references
                .remove_if(&identifier, |_, r| Arc::strong_count(r) == 1);
            debug!(subject_type = %self.subject_type, identifier = %identifier, "evicted");
        }
    }

    fn is_evictable(&self, identifier: &str) -> bool {
        if self.listeners.has_listeners(&identifier.to_owned()) {
            return false;
        }
        !self
            .references
            .get(identifier)
            .is_some_and(|r| Arc::strong_count(r.value()) > 1 || r.has_listeners())
    }

    // ── Backend replacement ─────────────────────────────────────────

    /// Swap to `store` and refresh every identifier cached at the time.
    ///
    /// Waits for in-flight writes to finish against the old store; writes
    /// issued meanwhile run against the new one. Each previously cached
    /// identifier is re-read from the new store and its listeners notified
    /// exactly once. Notifications from the old store arriving after the
    /// swap are discarded. Returns the number of
    /// identifiers refreshed.
    pub async fn update_backend(&self, store: Arc<dyn DataStore>) -> Result<usize> {
        let _swap = self.backend_lock.write().await;
        let old = self.current();
        let identifiers: Vec<String> = old.entries.iter().map(|e| e.key().clone()).collect();
        let next = Arc::new(CacheGeneration::new(old.id + 1, store));
        *self.generation.write() = Arc::clone(&next);
        info!(
            subject_type = %self.subject_type,
            generation = next.id,
            store = next.store.name(),
            identifiers = identifiers.len(),
            "swapped subject data backend"
        );

        let results = future::join_all(
            identifiers
                .iter()
                .map(|id| async move { (id, self.load(id).await) }),
        )
        .await;

        let mut refreshed = 0;
        for (identifier, result) in results {
            match result {
                Ok(loaded) => {
                    let latest = next
                        .entries
                        .get(identifier)
                        .and_then(|e| e.loaded())
                        .unwrap_or(loaded);
                    if self.publish(next.id, identifier, latest, Origin::Reload) {
                        refreshed += 1;
                    }
                }
                Err(err) => warn!(
                    subject_type = %self.subject_type,
                    identifier = %identifier,
                    error = %err,
                    "failed to refresh subject after backend swap"
                ),
            }
        }
        Ok(refreshed)
    }

    /// Drop every entry, listener and reference.
    pub fn close(&self) {
        self.references.clear();
        self.listeners.clear();
        self.type_listeners.clear();
        self.current().entries.clear();
        debug!(subject_type = %self.subject_type, "cache closed");
    }
}

impl std::fmt::Debug for SubjectDataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubjectDataCache")
            .field("subject_type", &self.subject_type)
            .field("max_size", &self.max_size)
            .field("generation", &self.generation())
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use warden_core::{ContextSet, Segment};
    use warden_store::MemoryDataStore;

    fn global() -> ContextSet {
        ContextSet::global()
    }

    fn data_with(key: &str, value: i32) -> ImmutableSubjectData {
        ImmutableSubjectData::empty()
            .with_segment(global(), Segment::empty().with_permission(key, value))
    }

    fn perm(data: &ImmutableSubjectData, key: &str) -> i32 {
        data.segment(&global()).permission(key)
    }

    fn setup(max_size: Option<usize>) -> (Arc<MemoryDataStore>, Arc<SubjectDataCache>) {
        let store = Arc::new(MemoryDataStore::new("memory"));
        let cache = SubjectDataCache::new("user", Arc::clone(&store) as Arc<dyn DataStore>, max_size);
        (store, cache)
    }

    fn recorder() -> (Arc<Mutex<Vec<ImmutableSubjectData>>>, Listener<ImmutableSubjectData>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, Arc::new(move |d: &ImmutableSubjectData| sink.lock().push(d.clone())))
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_loads_share_one_read() {
        let (store, cache) = setup(None);
        let _ = store.set_data("user", "alice", Some(data_with("fly", 1))).await.unwrap();
        store.set_read_delay(Some(Duration::from_millis(50)));

        let loads = (0..16).map(|_| cache.get_data("alice", None));
        let results = future::join_all(loads).await;

        assert_eq!(store.read_count(), 1);
        for result in results {
            assert_eq!(perm(&result.unwrap(), "fly"), 1);
        }
        // served from cache afterwards
        let _ = cache.get_data("alice", None).await.unwrap();
        assert_eq!(store.read_count(), 1);
    }

    #[tokio::test]
    async fn failed_load_is_not_cached() {
        let (store, cache) = setup(None);
        store.set_fail_reads(true);
        let (seen, listener) = recorder();

        let err = cache.get_data("alice", Some(listener)).await.unwrap_err();
        assert_matches!(err, CacheError::Loading { ref identifier, .. } if identifier == "alice");
        assert!(!cache.contains("alice"));

        store.set_fail_reads(false);
        let data = cache.get_data("alice", None).await.unwrap();
        assert!(data.is_empty());
        assert_eq!(store.read_count(), 2);

        // the listener from the failed call was never registered
        let _ = cache.set("alice", data_with("x", 1)).await.unwrap();
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn failure_for_one_identifier_leaves_others() {
        let (store, cache) = setup(None);
        let _ = cache.get_data("bob", None).await.unwrap();
        store.set_fail_reads(true);
        assert!(cache.get_data("alice", None).await.is_err());
        assert!(cache.contains("bob"));
        assert!(cache.get_data("bob", None).await.is_ok());
    }

    #[tokio::test]
    async fn set_persists_and_notifies() {
        let (store, cache) = setup(None);
        let (seen, listener) = recorder();
        let _ = cache.get_data("alice", Some(listener)).await.unwrap();

        let _ = cache.set("alice", data_with("fly", 1)).await.unwrap();

        assert_eq!(seen.lock().len(), 1);
        assert_eq!(perm(&seen.lock()[0], "fly"), 1);
        assert_eq!(perm(&cache.get_data("alice", None).await.unwrap(), "fly"), 1);
        let stored = store.get_data("user", "alice", None).await.unwrap();
        assert_eq!(perm(&stored, "fly"), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_updates_are_serialized() {
        let (_store, cache) = setup(None);
        let updates = (0..32).map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .update("counter", |d| {
                        let n = perm(d, "n");
                        d.update_segment(&global(), |s| s.with_permission("n", n + 1))
                    })
                    .await
            })
        });
        for handle in future::join_all(updates).await {
            let _ = handle.unwrap().unwrap();
        }
        assert_eq!(perm(&cache.get_data("counter", None).await.unwrap(), "n"), 32);
    }

    #[tokio::test]
    async fn unchanged_update_is_not_written() {
        let (store, cache) = setup(None);
        let change = cache.update("alice", ImmutableSubjectData::clone).await.unwrap();
        assert!(change.new.is_empty());
        assert_eq!(store.persist_count(), 0);
    }

    #[tokio::test]
    async fn invalidate_drops_entry_and_listeners() {
        let (store, cache) = setup(None);
        let (seen, listener) = recorder();
        let _ = cache.get_data("alice", Some(listener)).await.unwrap();

        cache.invalidate("alice");
        assert!(!cache.contains("alice"));

        let _ = cache.set("alice", data_with("x", 1)).await.unwrap();
        assert!(seen.lock().is_empty());
        let _ = cache.get_data("alice", None).await.unwrap();
        assert_eq!(store.read_count(), 1);
    }

    #[tokio::test]
    async fn cache_all_loads_every_identifier() {
        let (store, cache) = setup(None);
        for id in ["a", "b", "c"] {
            let _ = store.set_data("user", id, Some(data_with("x", 1))).await.unwrap();
        }
        let _ = store.set_data("group", "g", Some(data_with("x", 1))).await.unwrap();

        assert_eq!(cache.cache_all().await.unwrap(), 3);
        assert_eq!(cache.cached_identifiers(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn external_store_change_is_published() {
        let (store, cache) = setup(None);
        let (seen, listener) = recorder();
        let _ = cache.get_data("alice", Some(listener)).await.unwrap();

        store.apply_external("user", "alice", data_with("fly", 1));

        assert_eq!(seen.lock().len(), 1);
        assert_eq!(perm(&cache.get_data("alice", None).await.unwrap(), "fly"), 1);
        assert_eq!(store.read_count(), 1);
    }

    #[tokio::test]
    async fn store_listener_registered_once_per_generation() {
        let (store, cache) = setup(Some(1));
        let (seen, listener) = recorder();
        // load, evict, reload: the store must not end up with two listeners
        let _ = cache.get_data("alice", None).await.unwrap();
        let _ = cache.get_data("bob", None).await.unwrap();
        let _ = cache.get_data("alice", None).await.unwrap();
        let _ = cache.get_data("alice", Some(listener)).await.unwrap();

        store.apply_external("user", "alice", data_with("x", 1));
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn bounded_cache_evicts_least_recently_used() {
        let (_store, cache) = setup(Some(2));
        for id in ["a", "b", "c"] {
            let _ = cache.get_data(id, None).await.unwrap();
        }
        assert_eq!(cache.cached_identifiers(), vec!["b", "c"]);

        // touching b makes c the eviction candidate
        let _ = cache.get_data("b", None).await.unwrap();
        let _ = cache.get_data("d", None).await.unwrap();
        assert_eq!(cache.cached_identifiers(), vec!["b", "d"]);
    }

    #[tokio::test]
    async fn entries_with_listeners_or_live_references_stay() {
        let (_store, cache) = setup(Some(1));
        let (_seen, listener) = recorder();
        let _ = cache.get_data("watched", Some(listener)).await.unwrap();
        let reference = cache.reference_for("held", ListenerMode::Strong).await.unwrap();
        let _ = cache.get_data("plain", None).await.unwrap();

        assert!(cache.contains("watched"));
        assert!(cache.contains("held"));
        assert!(!cache.contains("plain"));
        assert_eq!(reference.identifier(), "held");
    }

    #[tokio::test]
    async fn reference_is_shared_and_receives_pushes() {
        let (_store, cache) = setup(None);
        let first = cache.reference_for("alice", ListenerMode::Strong).await.unwrap();
        let second = cache.reference_for("alice", ListenerMode::Weak).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.mode(), ListenerMode::Strong);

        let _ = cache.set("alice", data_with("fly", 1)).await.unwrap();
        assert_eq!(perm(&first.get(), "fly"), 1);
    }

    #[tokio::test]
    async fn reference_write_reaches_cache_listeners_once() {
        let (_store, cache) = setup(None);
        let (seen, listener) = recorder();
        let _ = cache.get_data("alice", Some(listener)).await.unwrap();
        let reference = cache.reference_for("alice", ListenerMode::Strong).await.unwrap();
        let reference_hits = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&reference_hits);
        let _ = reference.on_update(Arc::new(move |_| {
            let _ = sink.fetch_add(1, Ordering::SeqCst);
        }));

        let _ = reference
            .update(|d| d.update_segment(&global(), |s| s.with_permission("a", 1)))
            .await
            .unwrap();

        assert_eq!(seen.lock().len(), 1);
        assert_eq!(reference_hits.load(Ordering::SeqCst), 1);
        assert_eq!(perm(&cache.get_data("alice", None).await.unwrap(), "a"), 1);
    }

    #[tokio::test]
    async fn backend_swap_refreshes_each_identifier_once() {
        let (old_store, cache) = setup(None);
        let _ = old_store.set_data("user", "alice", Some(data_with("fly", 1))).await.unwrap();
        let (seen, listener) = recorder();
        let _ = cache.get_data("alice", Some(listener)).await.unwrap();
        let _ = cache.get_data("bob", None).await.unwrap();

        let new_store = Arc::new(MemoryDataStore::new("replacement"));
        let _ = new_store.set_data("user", "alice", Some(data_with("fly", -1))).await.unwrap();

        let refreshed = cache
            .update_backend(Arc::clone(&new_store) as Arc<dyn DataStore>)
            .await
            .unwrap();
        assert_eq!(refreshed, 2);
        assert_eq!(cache.generation(), 1);
        assert_eq!(cache.store().name(), "replacement");

        assert_eq!(seen.lock().len(), 1);
        assert_eq!(perm(&seen.lock()[0], "fly"), -1);

        // the old store is no longer heard from
        old_store.apply_external("user", "alice", data_with("fly", 5));
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(perm(&cache.get_data("alice", None).await.unwrap(), "fly"), -1);

        // the new one is
        new_store.apply_external("user", "alice", data_with("fly", 2));
        assert_eq!(seen.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn backend_swap_waits_for_in_flight_writes() {
        let (old_store, cache) = setup(None);
        old_store.set_write_delay(Some(Duration::from_millis(100)));
        let (seen, listener) = recorder();
        let _ = cache.get_data("alice", Some(listener)).await.unwrap();

        let in_flight = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.set("alice", data_with("fly", 1)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let new_store = Arc::new(MemoryDataStore::new("replacement"));
        let swap = {
            let cache = Arc::clone(&cache);
            let store = Arc::clone(&new_store) as Arc<dyn DataStore>;
            tokio::spawn(async move { cache.update_backend(store).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let queued = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.set("bob", data_with("swim", 1)).await })
        };

        let _ = in_flight.await.unwrap().unwrap();
        assert_eq!(swap.await.unwrap().unwrap(), 1);
        let _ = queued.await.unwrap().unwrap();

        // the in-flight write landed in the old store and was published
        // before the swap re-read alice from the new one
        let old = old_store.get_data("user", "alice", None).await.unwrap();
        assert_eq!(perm(&old, "fly"), 1);
        assert_eq!(seen.lock().len(), 2);
        assert_eq!(perm(&seen.lock()[0], "fly"), 1);
        assert!(cache.get_data("alice", None).await.unwrap().is_empty());

        // the write queued behind the swap went to the new store
        let bob = new_store.get_data("user", "bob", None).await.unwrap();
        assert_eq!(perm(&bob, "swim"), 1);
        assert_eq!(perm(&cache.get_data("bob", None).await.unwrap(), "swim"), 1);
        assert!(!old_store.is_registered("user", "bob").await.unwrap());
    }

    #[tokio::test]
    async fn type_listener_sees_every_identifier() {
        let (store, cache) = setup(None);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handle = cache.on_any_update(Arc::new(move |change: &(String, ImmutableSubjectData)| {
            sink.lock().push(change.0.clone());
        }));

        let _ = cache.set("alice", data_with("a", 1)).await.unwrap();
        let _ = cache.get_data("bob", None).await.unwrap();
        store.apply_external("user", "bob", data_with("b", 1));
        assert_eq!(*seen.lock(), vec!["alice", "bob"]);

        assert!(cache.remove_any_listener(handle));
        let _ = cache.set("alice", data_with("a", 2)).await.unwrap();
        assert_eq!(seen.lock().len(), 2);
    }

    #[tokio::test]
    async fn close_drops_everything() {
        let (_store, cache) = setup(None);
        let _ = cache.get_data("alice", None).await.unwrap();
        let reference = cache.reference_for("alice", ListenerMode::Strong).await.unwrap();
        cache.close();
        assert!(cache.is_empty());
        assert!(!Arc::ptr_eq(
            &reference,
            &cache.reference_for("alice", ListenerMode::Strong).await.unwrap()
        ));
    }
}
