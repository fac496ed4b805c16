//! The permissions engine facade.
//!
//! [`PermissionsEngine`] owns every registry the resolver needs: the
//! context-definition registry, the context inheritance, one
//! [`SubjectType`] per subject type and the memo of baked results. Nothing is
//! global; dropping or closing the engine releases all of it.
//!
//! Baked results are memoized per `(subject, queried contexts)` and cleared
//! wholesale whenever any subject data, context definition or inheritance
//! changes. An epoch counter is bumped before every clear; a bake that
//! observes a different epoch after storing its result removes it again, so
//! a bake racing an invalidation is never served.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, info, trace};
use warden_cache::{CacheError, Listener, ListenerHandle, ListenerRegistry};
use warden_core::context::definitions::{ServerTagContextDefinition, TimeContextDefinition};
use warden_core::subject::GLOBAL_DEFAULT_IDENTIFIER;
use warden_core::{
    ContextDefinition, ContextDefinitionRegistry, ContextInheritance, ContextSet, ContextValue,
    DynContextDefinition, ImmutableSubjectData, SubjectRef,
};
use warden_settings::{CacheSettings, ResolutionSettings, WardenSettings};
use warden_store::{BulkOperation, DataStore};

use crate::bake::{SubjectDataSource, SubjectLayers, bake};
use crate::baked::BakedSubjectData;
use crate::calculated::CalculatedSubject;
use crate::errors::{EngineError, Result};
use crate::subject_type::SubjectType;

type BakeKey = (SubjectRef, ContextSet);

/// Entry point for permission resolution.
pub struct PermissionsEngine {
    cache_settings: CacheSettings,
    resolution: ResolutionSettings,
    registry: ContextDefinitionRegistry,
    server_tags: Arc<ServerTagContextDefinition>,
    inheritance: RwLock<ContextInheritance>,
    store: RwLock<Arc<dyn DataStore>>,
    subject_types: DashMap<String, Arc<SubjectType>>,
    baked: DashMap<BakeKey, Arc<BakedSubjectData>>,
    epoch: AtomicU64,
    listeners: ListenerRegistry<SubjectRef, SubjectRef>,
    closed: AtomicBool,
    me: Weak<PermissionsEngine>,
}

impl PermissionsEngine {
    /// Build an engine over `store` and warm every always-resident type.
    pub async fn new(settings: &WardenSettings, store: Arc<dyn DataStore>) -> Result<Arc<Self>> {
        settings.validate()?;
        let inheritance = settings.contexts.context_inheritance()?;

        let registry = ContextDefinitionRegistry::new(settings.resolution.allow_context_fallback);
        let server_tags = Arc::new(ServerTagContextDefinition::new(
            settings.contexts.server_tags.clone(),
        ));
        registry.register_dyn(Arc::clone(&server_tags) as Arc<dyn DynContextDefinition>);
        registry.register(TimeContextDefinition::before());
        registry.register(TimeContextDefinition::after());

        let engine = Arc::new_cyclic(|me| Self {
            cache_settings: settings.cache.clone(),
            resolution: settings.resolution.clone(),
            registry,
            server_tags,
            inheritance: RwLock::new(inheritance),
            store: RwLock::new(store),
            subject_types: DashMap::new(),
            baked: DashMap::new(),
            epoch: AtomicU64::new(0),
            listeners: ListenerRegistry::new(),
            closed: AtomicBool::new(false),
            me: me.clone(),
        });

        for name in &settings.cache.always_resident {
            let count = engine.subject_type(name)?.persistent().cache_all().await?;
            debug!(subject_type = %name, count, "warmed always-resident subject type");
        }
        info!(
            store = engine.store().name(),
            contexts = ?engine.registry.names(),
            "permissions engine ready"
        );
        Ok(engine)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EngineError::Closed);
        }
        Ok(())
    }

    /// Current persistent data store.
    #[must_use]
    pub fn store(&self) -> Arc<dyn DataStore> {
        Arc::clone(&self.store.read())
    }

    // ── Subject types ───────────────────────────────────────────────

    /// The holder for `name`, created on first use.
    pub fn subject_type(&self, name: &str) -> Result<Arc<SubjectType>> {
        self.ensure_open()?;
        if name.is_empty() {
            return Err(EngineError::UnknownSubjectType(name.to_owned()));
        }
        if let Some(existing) = self.subject_types.get(name) {
            return Ok(Arc::clone(existing.value()));
        }
        Ok(Arc::clone(
            self.subject_types
                .entry(name.to_owned())
                .or_insert_with(|| self.create_subject_type(name))
                .value(),
        ))
    }

    /// Names of every subject type created so far, sorted.
    #[must_use]
    pub fn subject_type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.subject_types.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    fn create_subject_type(&self, name: &str) -> Arc<SubjectType> {
        let subject_type = Arc::new(SubjectType::new(
            name,
            self.store(),
            &self.cache_settings,
            &self.resolution,
        ));
        for cache in [subject_type.persistent(), subject_type.transient()] {
            let engine = self.me.clone();
            let type_name = name.to_owned();
            let _ = cache.on_any_update(Arc::new(
                move |change: &(String, ImmutableSubjectData)| {
                    if let Some(engine) = engine.upgrade() {
                        engine.subject_changed(&SubjectRef::new(type_name.clone(), change.0.clone()));
                    }
                },
            ));
        }
        debug!(subject_type = %name, "created subject type");
        subject_type
    }

    fn subject_changed(&self, subject: &SubjectRef) {
        self.invalidate_bakes();
        let delivered = self.listeners.call(subject, subject);
        trace!(subject = %subject, listeners = delivered, "subject data changed");
    }

    // ── Resolution ──────────────────────────────────────────────────

    /// Effective data of `subject` under `contexts`, memoized.
    ///
    /// `contexts` is expanded through the current context inheritance before
    /// resolution; the memo is keyed by the unexpanded set.
    pub async fn baked(
        &self,
        subject: &SubjectRef,
        contexts: &ContextSet,
    ) -> Result<Arc<BakedSubjectData>> {
        self.ensure_open()?;
        let key: BakeKey = (subject.clone(), contexts.clone());
        if let Some(hit) = self.baked.get(&key) {
            return Ok(Arc::clone(hit.value()));
        }

        let epoch = self.epoch.load(Ordering::SeqCst);
        let active = self.inheritance.read().expand(contexts);
        let defaults = self.defaults_for(subject);
        let baked = Arc::new(bake(self, &self.registry, subject, &active, &defaults).await?);

        if self.baked.len() >= self.cache_settings.max_size {
            self.baked.clear();
        }
        let _ = self.baked.insert(key.clone(), Arc::clone(&baked));
        if self.epoch.load(Ordering::SeqCst) != epoch {
            let _ = self.baked.remove(&key);
        }
        Ok(baked)
    }

    /// Default subjects walked after `subject`'s own graph.
    fn defaults_for(&self, subject: &SubjectRef) -> Vec<SubjectRef> {
        let default_type = self.resolution.default_subject_type.as_str();
        let global = SubjectRef::new(default_type, GLOBAL_DEFAULT_IDENTIFIER);
        let mut defaults = Vec::with_capacity(2);
        if subject.subject_type() != default_type {
            defaults.push(SubjectRef::new(default_type, subject.subject_type()));
        }
        if *subject != global && !defaults.contains(&global) {
            defaults.push(global);
        }
        defaults
    }

    /// Effective value of permission `key`.
    pub async fn effective_permission(
        &self,
        subject: &SubjectRef,
        contexts: &ContextSet,
        key: &str,
    ) -> Result<i32> {
        Ok(self.baked(subject, contexts).await?.permission(key))
    }

    /// Effective value of option `key`.
    pub async fn effective_option(
        &self,
        subject: &SubjectRef,
        contexts: &ContextSet,
        key: &str,
    ) -> Result<Option<String>> {
        Ok(self
            .baked(subject, contexts)
            .await?
            .option(key)
            .map(str::to_owned))
    }

    /// Every parent reached while resolving `subject`, in visiting order.
    pub async fn effective_parents(
        &self,
        subject: &SubjectRef,
        contexts: &ContextSet,
    ) -> Result<Vec<SubjectRef>> {
        Ok(self.baked(subject, contexts).await?.parents().to_vec())
    }

    /// Drop every memoized bake.
    pub fn invalidate_bakes(&self) {
        let _ = self.epoch.fetch_add(1, Ordering::SeqCst);
        self.baked.clear();
    }

    /// Number of memoized bakes.
    #[must_use]
    pub fn baked_count(&self) -> usize {
        self.baked.len()
    }

    // ── Subjects & listeners ────────────────────────────────────────

    /// A handle bound to `subject`.
    #[must_use]
    pub fn subject(self: &Arc<Self>, subject: SubjectRef) -> CalculatedSubject {
        CalculatedSubject::new(Arc::clone(self), subject)
    }

    /// Call `listener` whenever the persistent or transient data of
    /// `subject` changes.
    pub fn on_update(&self, subject: SubjectRef, listener: Listener<SubjectRef>) -> ListenerHandle {
        self.listeners.register(subject, listener)
    }

    /// Remove a listener added with [`Self::on_update`].
    pub fn remove_listener(&self, handle: ListenerHandle) -> bool {
        self.listeners.unregister(handle)
    }

    // ── Contexts ────────────────────────────────────────────────────

    /// Values every registered definition reports as active for `subject`.
    #[must_use]
    pub fn active_contexts(&self, subject: &SubjectRef) -> ContextSet {
        let mut active = ContextSet::global();
        for definition in self.registry.all() {
            for raw in definition.current_values(subject) {
                let _ = active.insert(ContextValue::new(definition.name(), raw));
            }
        }
        active
    }

    /// The context definition registry.
    #[must_use]
    pub fn context_definitions(&self) -> &ContextDefinitionRegistry {
        &self.registry
    }

    /// Register (or replace) a context definition.
    pub fn register_context_definition<D: ContextDefinition>(&self, definition: D) {
        self.registry.register(definition);
        self.invalidate_bakes();
    }

    /// Remove a context definition by name.
    pub fn unregister_context_definition(&self, name: &str) -> bool {
        let removed = self.registry.unregister(name);
        if removed {
            self.invalidate_bakes();
        }
        removed
    }

    /// Replace the server tags reported by the `server-tag` context.
    pub fn set_server_tags(&self, tags: Vec<String>) {
        self.server_tags.set_tags(tags);
        self.invalidate_bakes();
    }

    /// Current context inheritance.
    #[must_use]
    pub fn context_inheritance(&self) -> ContextInheritance {
        self.inheritance.read().clone()
    }

    /// Replace the context inheritance.
    pub fn set_context_inheritance(&self, inheritance: ContextInheritance) {
        *self.inheritance.write() = inheritance;
        self.invalidate_bakes();
    }

    /// Run `op` as one batch against the current data store.
    ///
    /// Writes made inside `op` (through references or caches) still go
    /// through the caches as usual; the store may defer persisting them
    /// until the batch ends.
    pub async fn perform_bulk(&self, op: BulkOperation<'_>) -> Result<()> {
        self.ensure_open()?;
        let store = self.store();
        store
            .perform_bulk(op)
            .await
            .map_err(|err| EngineError::Cache(CacheError::Store(err)))
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Move persistent data to `store`.
    ///
    /// Every subject type swaps its persistent cache to the new store and
    /// re-notifies the identifiers it had cached.
    pub async fn update_data_store(&self, store: Arc<dyn DataStore>) -> Result<()> {
        self.ensure_open()?;
        let previous = std::mem::replace(&mut *self.store.write(), Arc::clone(&store));
        info!(from = previous.name(), to = store.name(), "replacing data store");

        let subject_types: Vec<Arc<SubjectType>> = self
            .subject_types
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        for subject_type in subject_types {
            let cache = subject_type.persistent();
            let refreshed = cache.update_backend(Arc::clone(&store)).await?;
            if self.cache_settings.is_always_resident(subject_type.name()) {
                let _ = cache.cache_all().await?;
            }
            debug!(subject_type = subject_type.name(), refreshed, "moved subject type to new store");
        }
        self.invalidate_bakes();
        Ok(())
    }

    /// Release every cache, reference and listener. Later calls fail with
    /// [`EngineError::Closed`].
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for entry in &self.subject_types {
            entry.value().close();
        }
        self.subject_types.clear();
        self.invalidate_bakes();
        self.listeners.clear();
        info!("permissions engine closed");
    }

    /// Whether [`Self::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl SubjectDataSource for PermissionsEngine {
    async fn layers(&self, subject: &SubjectRef) -> Result<SubjectLayers> {
        self.subject_type(subject.subject_type())?
            .layers(subject.identifier())
            .await
    }
}

impl std::fmt::Debug for PermissionsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionsEngine")
            .field("subject_types", &self.subject_type_names())
            .field("baked", &self.baked.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use warden_store::MemoryDataStore;

    async fn engine() -> Arc<PermissionsEngine> {
        let store: Arc<dyn DataStore> = Arc::new(MemoryDataStore::new("memory"));
        PermissionsEngine::new(&WardenSettings::default(), store)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn always_resident_types_exist_at_start() {
        let engine = engine().await;
        assert_eq!(engine.subject_type_names(), vec!["default", "group"]);
    }

    #[tokio::test]
    async fn empty_type_name_is_rejected() {
        let engine = engine().await;
        assert_matches!(engine.subject_type(""), Err(EngineError::UnknownSubjectType(_)));
    }

    #[tokio::test]
    async fn defaults_chain() {
        let engine = engine().await;
        assert_eq!(
            engine.defaults_for(&SubjectRef::new("user", "alice")),
            vec![SubjectRef::new("default", "user"), SubjectRef::new("default", "default")]
        );
        assert_eq!(
            engine.defaults_for(&SubjectRef::new("default", "user")),
            vec![SubjectRef::new("default", "default")]
        );
        assert!(engine.defaults_for(&SubjectRef::new("default", "default")).is_empty());
    }

    #[tokio::test]
    async fn server_tags_are_active() {
        let engine = engine().await;
        engine.set_server_tags(vec!["lobby".into()]);
        let active = engine.active_contexts(&SubjectRef::new("user", "alice"));
        assert!(active.contains(&ContextValue::new("server-tag", "lobby")));
    }

    #[tokio::test]
    async fn invalid_settings_are_rejected() {
        let mut settings = WardenSettings::default();
        settings.cache.max_size = 0;
        let store: Arc<dyn DataStore> = Arc::new(MemoryDataStore::new("memory"));
        let err = PermissionsEngine::new(&settings, store).await.unwrap_err();
        assert_matches!(err, EngineError::Settings(_));
    }

    #[tokio::test]
    async fn closed_engine_refuses_work() {
        let engine = engine().await;
        engine.close();
        assert!(engine.is_closed());
        let err = engine
            .effective_permission(&SubjectRef::new("user", "alice"), &ContextSet::global(), "x")
            .await
            .unwrap_err();
        assert_matches!(err, EngineError::Closed);
        assert!(engine.subject_type_names().is_empty());
    }
}
