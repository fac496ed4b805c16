//! Context-to-context inheritance.
//!
//! Declares that one context value implies others, e.g. `world=nether`
//! inheriting from `world=overworld`. Active contexts are expanded through
//! these declarations before segment lookup.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use super::{ContextSet, ContextValue};

/// Immutable mapping from a context value to its ordered parents.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContextInheritance {
    parents: Arc<BTreeMap<ContextValue, Vec<ContextValue>>>,
}

impl ContextInheritance {
    /// Inheritance with no declarations.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Declared parents of `context`, in order.
    #[must_use]
    pub fn parents(&self, context: &ContextValue) -> &[ContextValue] {
        self.parents.get(context).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Return a copy with the parents of `context` replaced.
    /// An empty list removes the declaration.
    #[must_use]
    pub fn with_parents(&self, context: ContextValue, parents: Vec<ContextValue>) -> Self {
        let mut next = (*self.parents).clone();
        if parents.is_empty() {
            let _ = next.remove(&context);
        } else {
            let _ = next.insert(context, parents);
        }
        Self {
            parents: Arc::new(next),
        }
    }

    /// Every declaration.
    pub fn all_parents(&self) -> impl Iterator<Item = (&ContextValue, &[ContextValue])> {
        self.parents.iter().map(|(k, v)| (k, v.as_slice()))
    }

    /// Whether nothing is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    /// Transitively union the parents of every value in `raw`.
    ///
    /// A value already in the result is not expanded again, so cyclic
    /// declarations terminate.
    #[must_use]
    pub fn expand(&self, raw: &ContextSet) -> ContextSet {
        let mut expanded = ContextSet::global();
        let mut pending: VecDeque<ContextValue> = raw.iter().cloned().collect();
        while let Some(context) = pending.pop_front() {
            if expanded.contains(&context) {
                continue;
            }
            pending.extend(self.parents(&context).iter().cloned());
            let _ = expanded.insert(context);
        }
        expanded
    }
}

impl FromIterator<(ContextValue, Vec<ContextValue>)> for ContextInheritance {
    fn from_iter<I: IntoIterator<Item = (ContextValue, Vec<ContextValue>)>>(iter: I) -> Self {
        let parents = iter
            .into_iter()
            .filter(|(_, parents)| !parents.is_empty())
            .collect();
        Self {
            parents: Arc::new(parents),
        }
    }
}
