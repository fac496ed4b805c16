//! Flattened resolution results.

use std::collections::BTreeMap;

use warden_core::{ContextSet, NodeTree, SubjectRef};

/// Effective data of one subject under one exact set of active contexts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BakedSubjectData {
    contexts: ContextSet,
    permissions: NodeTree,
    options: BTreeMap<String, String>,
    parents: Vec<SubjectRef>,
}

impl BakedSubjectData {
    /// Assemble a result.
    #[must_use]
    pub fn new(
        contexts: ContextSet,
        permissions: NodeTree,
        options: BTreeMap<String, String>,
        parents: Vec<SubjectRef>,
    ) -> Self {
        Self {
            contexts,
            permissions,
            options,
            parents,
        }
    }

    /// The (expanded) active contexts this result was computed for.
    #[must_use]
    pub fn contexts(&self) -> &ContextSet {
        &self.contexts
    }

    /// Effective value of `key`, inheriting from the nearest set ancestor
    /// node and finally from the fallback.
    #[must_use]
    pub fn permission(&self, key: &str) -> i32 {
        self.permissions.get(key)
    }

    /// The permission index.
    #[must_use]
    pub fn permissions(&self) -> &NodeTree {
        &self.permissions
    }

    /// The merged fallback value, `0` when unset.
    #[must_use]
    pub fn fallback(&self) -> i32 {
        self.permissions.fallback()
    }

    /// Effective value of option `key`.
    #[must_use]
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Every merged option.
    #[must_use]
    pub fn options(&self) -> &BTreeMap<String, String> {
        &self.options
    }

    /// Every parent encountered during resolution, in visiting order.
    #[must_use]
    pub fn parents(&self) -> &[SubjectRef] {
        &self.parents
    }
}
