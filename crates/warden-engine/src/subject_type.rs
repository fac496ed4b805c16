//! Per-type data holders.

use std::sync::Arc;

use warden_cache::SubjectDataCache;
use warden_settings::{CacheSettings, ResolutionSettings};
use warden_store::{DataStore, MemoryDataStore};

use crate::bake::SubjectLayers;
use crate::errors::Result;

/// The persistent and transient caches of one subject type.
pub struct SubjectType {
    name: String,
    persistent: Arc<SubjectDataCache>,
    transient: Arc<SubjectDataCache>,
    transient_has_priority: bool,
}

impl SubjectType {
    /// Create the caches for `name`. Persistent data goes to `store`;
    /// transient data lives in a private in-memory store.
    #[must_use]
    pub fn new(
        name: &str,
        store: Arc<dyn DataStore>,
        cache: &CacheSettings,
        resolution: &ResolutionSettings,
    ) -> Self {
        let max_size = (!cache.is_always_resident(name)).then_some(cache.max_size);
        let transient_store: Arc<dyn DataStore> =
            Arc::new(MemoryDataStore::new(format!("transient:{name}")));
        Self {
            name: name.to_owned(),
            persistent: SubjectDataCache::new(name, store, max_size),
            transient: SubjectDataCache::new(name, transient_store, max_size),
            transient_has_priority: resolution.transient_priority_for(name),
        }
    }

    /// Type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cache over the data store.
    #[must_use]
    pub fn persistent(&self) -> &Arc<SubjectDataCache> {
        &self.persistent
    }

    /// Cache over session-only data.
    #[must_use]
    pub fn transient(&self) -> &Arc<SubjectDataCache> {
        &self.transient
    }

    /// Whether transient data merges before persistent data.
    #[must_use]
    pub fn transient_has_priority(&self) -> bool {
        self.transient_has_priority
    }

    /// Both layers of `identifier`, loaded concurrently.
    pub async fn layers(&self, identifier: &str) -> Result<SubjectLayers> {
        let (persistent, transient) = futures::try_join!(
            self.persistent.get_data(identifier, None),
            self.transient.get_data(identifier, None),
        )?;
        Ok(SubjectLayers {
            persistent,
            transient,
            transient_has_priority: self.transient_has_priority,
        })
    }

    pub(crate) fn close(&self) {
        self.persistent.close();
        self.transient.close();
    }
}

impl std::fmt::Debug for SubjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubjectType")
            .field("name", &self.name)
            .field("transient_has_priority", &self.transient_has_priority)
            .finish_non_exhaustive()
    }
}
