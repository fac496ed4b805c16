//! Mutable view over one identifier's subject data.
//!
//! A [`SubjectDataReference`] holds the latest [`ImmutableSubjectData`] it
//! has seen for one identifier. Local writes go through [`update`], an
//! optimistic loop: snapshot the cell, apply the transform with no lock held,
//! then commit only if the cell still holds the same snapshot (pointer
//! identity). Pushes from the cache go through [`accept`] under the same
//! lock, so a push and a local commit never overwrite each other unseen: a
//! push landing mid-update makes the commit fail and the transform re-runs
//! on the pushed value.
//!
//! [`update`]: SubjectDataReference::update
//! [`accept`]: SubjectDataReference::accept

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::trace;
use warden_core::ImmutableSubjectData;

use crate::cache::SubjectDataCache;
use crate::errors::{CacheError, Result};
use crate::listeners::{Listener, ListenerHandle, ListenerRegistry};

/// How a reference retains the listeners registered on it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ListenerMode {
    /// Listeners live until removed.
    #[default]
    Strong,
    /// Listeners live as long as the caller keeps its `Arc`.
    Weak,
}

/// Old and new values of a committed update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Change<T> {
    /// Value the transform was applied to.
    pub old: T,
    /// Value that was committed.
    pub new: T,
}

impl<T> Change<T> {
    /// Construct a change.
    pub fn new(old: T, new: T) -> Self {
        Self { old, new }
    }
}

/// A cache-owned mutable cell over one identifier.
pub struct SubjectDataReference {
    identifier: String,
    cache: Weak<SubjectDataCache>,
    cell: Mutex<ImmutableSubjectData>,
    mode: ListenerMode,
    listeners: ListenerRegistry<String, ImmutableSubjectData>,
}

impl SubjectDataReference {
    pub(crate) fn new(
        identifier: String,
        cache: Weak<SubjectDataCache>,
        initial: ImmutableSubjectData,
        mode: ListenerMode,
    ) -> Self {
        Self {
            identifier,
            cache,
            cell: Mutex::new(initial),
            mode,
            listeners: ListenerRegistry::new(),
        }
    }

    /// Identifier this reference tracks.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Listener retention chosen at construction.
    #[must_use]
    pub fn mode(&self) -> ListenerMode {
        self.mode
    }

    /// Latest local snapshot.
    #[must_use]
    pub fn get(&self) -> ImmutableSubjectData {
        self.cell.lock().clone()
    }

    /// Apply `op` and persist the result through the owning cache.
    ///
    /// `op` may run more than once if a concurrent push or update wins the
    /// race; it must be pure. Persistence runs on a spawned task, so it
    /// completes even if this future is dropped. Listeners are called once
    /// the store has accepted the value. If the store rejects it, the cell
    /// goes back to the old value unless another update has already been
    /// committed on top.
    pub async fn update<F>(self: &Arc<Self>, op: F) -> Result<Change<ImmutableSubjectData>>
    where
        F: Fn(&ImmutableSubjectData) -> ImmutableSubjectData,
    {
        let cache = self.cache.upgrade().ok_or(CacheError::Closed)?;
        let (old, new) = loop {
            let snapshot = self.get();
            let next = op(&snapshot);
            let mut cell = self.cell.lock();
            if cell.ptr_eq(&snapshot) {
                *cell = next.clone();
                break (snapshot, next);
            }
            drop(cell);
            trace!(identifier = %self.identifier, "concurrent change, retrying update");
        };
        let change = Change::new(old, new);
        if change.new.ptr_eq(&change.old) {
            return Ok(change);
        }

        let reference = Arc::clone(self);
        let task = tokio::spawn(async move {
            let result = cache.persist_reference(&reference, &change).await;
            result.map(|()| change)
        });
        task.await
            .map_err(|err| CacheError::Task(err.to_string()))?
    }

    /// Notify listeners of a value the store has accepted.
    pub(crate) fn committed(&self, data: &ImmutableSubjectData) {
        let _ = self.listeners.call(&self.identifier, data);
    }

    /// Restore `change.old` if the cell still holds `change.new`.
    pub(crate) fn roll_back(&self, change: &Change<ImmutableSubjectData>) -> bool {
        let mut cell = self.cell.lock();
        if !cell.ptr_eq(&change.new) {
            return false;
        }
        *cell = change.old.clone();
        true
    }

    /// Receive data pushed by the cache.
    ///
    /// Returns `false` when the cell already held exactly this value.
    pub fn accept(&self, data: ImmutableSubjectData) -> bool {
        {
            let mut cell = self.cell.lock();
            if cell.ptr_eq(&data) {
                return false;
            }
            *cell = data.clone();
        }
        let _ = self.listeners.call(&self.identifier, &data);
        true
    }

    /// Register a listener for changes to this identifier.
    ///
    /// In [`ListenerMode::Weak`] only a weak pointer is kept; the caller's
    /// `Arc` decides how long the listener lives.
    pub fn on_update(&self, listener: Listener<ImmutableSubjectData>) -> ListenerHandle {
        match self.mode {
            ListenerMode::Strong => self.listeners.register(self.identifier.clone(), listener),
            ListenerMode::Weak => self.listeners.register_weak(self.identifier.clone(), &listener),
        }
    }

    /// Remove a listener registered with [`Self::on_update`].
    pub fn remove_listener(&self, handle: ListenerHandle) -> bool {
        self.listeners.unregister(handle)
    }

    /// Whether any listener is still live.
    #[must_use]
    pub fn has_listeners(&self) -> bool {
        self.listeners.has_listeners(&self.identifier)
    }
}

impl std::fmt::Debug for SubjectDataReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubjectDataReference")
            .field("identifier", &self.identifier)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
