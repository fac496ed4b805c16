//! Subject handles.

use std::sync::Arc;

use warden_cache::{Listener, ListenerHandle, ListenerMode, SubjectDataReference};
use warden_core::{ContextSet, SubjectRef};

use crate::baked::BakedSubjectData;
use crate::engine::PermissionsEngine;
use crate::errors::Result;

/// A subject bound to the engine that resolves it.
///
/// Queries taking explicit contexts resolve exactly those; the `*_now`
/// variants use the contexts currently active for the subject.
#[derive(Clone, Debug)]
pub struct CalculatedSubject {
    engine: Arc<PermissionsEngine>,
    subject: SubjectRef,
}

impl CalculatedSubject {
    pub(crate) fn new(engine: Arc<PermissionsEngine>, subject: SubjectRef) -> Self {
        Self { engine, subject }
    }

    /// The subject this handle resolves.
    #[must_use]
    pub fn identifier(&self) -> &SubjectRef {
        &self.subject
    }

    /// Contexts currently active for this subject.
    #[must_use]
    pub fn active_contexts(&self) -> ContextSet {
        self.engine.active_contexts(&self.subject)
    }

    /// Effective data under `contexts`.
    pub async fn baked(&self, contexts: &ContextSet) -> Result<Arc<BakedSubjectData>> {
        self.engine.baked(&self.subject, contexts).await
    }

    /// Effective value of permission `key` under `contexts`.
    pub async fn permission(&self, contexts: &ContextSet, key: &str) -> Result<i32> {
        self.engine
            .effective_permission(&self.subject, contexts, key)
            .await
    }

    /// Effective value of permission `key` under the active contexts.
    pub async fn permission_now(&self, key: &str) -> Result<i32> {
        self.permission(&self.active_contexts(), key).await
    }

    /// Whether permission `key` resolves positive under the active contexts.
    pub async fn has_permission(&self, key: &str) -> Result<bool> {
        Ok(self.permission_now(key).await? > 0)
    }

    /// Effective value of option `key` under `contexts`.
    pub async fn option(&self, contexts: &ContextSet, key: &str) -> Result<Option<String>> {
        self.engine
            .effective_option(&self.subject, contexts, key)
            .await
    }

    /// Effective value of option `key` under the active contexts.
    pub async fn option_now(&self, key: &str) -> Result<Option<String>> {
        self.option(&self.active_contexts(), key).await
    }

    /// Parents reached under `contexts`.
    pub async fn parents(&self, contexts: &ContextSet) -> Result<Vec<SubjectRef>> {
        self.engine.effective_parents(&self.subject, contexts).await
    }

    /// Parents reached under the active contexts.
    pub async fn parents_now(&self) -> Result<Vec<SubjectRef>> {
        self.parents(&self.active_contexts()).await
    }

    /// Mutable reference to this subject's persistent data.
    pub async fn data(&self) -> Result<Arc<SubjectDataReference>> {
        let subject_type = self.engine.subject_type(self.subject.subject_type())?;
        Ok(subject_type
            .persistent()
            .reference_for(self.subject.identifier(), ListenerMode::Strong)
            .await?)
    }

    /// Mutable reference to this subject's session-only data.
    pub async fn transient_data(&self) -> Result<Arc<SubjectDataReference>> {
        let subject_type = self.engine.subject_type(self.subject.subject_type())?;
        Ok(subject_type
            .transient()
            .reference_for(self.subject.identifier(), ListenerMode::Strong)
            .await?)
    }

    /// Call `listener` whenever this subject's data changes.
    pub fn on_update(&self, listener: Listener<SubjectRef>) -> ListenerHandle {
        self.engine.on_update(self.subject.clone(), listener)
    }
}
