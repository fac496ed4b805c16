//! Resolution of effective subject data ("baking").
//!
//! A bake walks the subject's inheritance graph depth-first. At each subject
//! the stored context sets satisfied by the active contexts are visited from
//! most to least specific, and at each of those the transient and persistent
//! segments are merged in the subject type's priority order. Parents found in
//! merged segments are visited after the subject itself. The default subjects
//! are walked last so subject-specific data always outranks them.
//!
//! Permissions and the fallback use magnitude priority: a value replaces the
//! accumulated one only if its absolute value is strictly greater. Options are
//! first-write-wins. Parents are appended as encountered.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use tracing::{debug, warn};
use warden_core::{
    ContextDefinitionProvider, ContextSet, ImmutableSubjectData, NodeTree, Segment, SubjectRef,
};

use crate::baked::BakedSubjectData;
use crate::errors::Result;

/// Both data layers of one subject.
#[derive(Clone, Debug)]
pub struct SubjectLayers {
    /// Data persisted through the data store.
    pub persistent: ImmutableSubjectData,
    /// Session-only data.
    pub transient: ImmutableSubjectData,
    /// Merge transient before persistent at each context combination.
    pub transient_has_priority: bool,
}

impl SubjectLayers {
    fn in_merge_order(&self) -> [&ImmutableSubjectData; 2] {
        if self.transient_has_priority {
            [&self.transient, &self.persistent]
        } else {
            [&self.persistent, &self.transient]
        }
    }
}

impl Default for SubjectLayers {
    fn default() -> Self {
        Self {
            persistent: ImmutableSubjectData::empty(),
            transient: ImmutableSubjectData::empty(),
            transient_has_priority: true,
        }
    }
}

/// Where a bake reads subject data from.
#[async_trait]
pub trait SubjectDataSource: Send + Sync {
    /// Current data of `subject`. Unknown subjects yield empty layers.
    async fn layers(&self, subject: &SubjectRef) -> Result<SubjectLayers>;
}

/// Compute the effective data of `subject` under `active`.
///
/// `active` must already be expanded through context inheritance. The
/// subjects in `defaults` are walked after the subject's own graph, in
/// order. Any failure to read a visited subject aborts the whole bake.
pub async fn bake(
    source: &dyn SubjectDataSource,
    provider: &dyn ContextDefinitionProvider,
    subject: &SubjectRef,
    active: &ContextSet,
    defaults: &[SubjectRef],
) -> Result<BakedSubjectData> {
    let mut baker = Baker::new(provider, active);
    baker.walk(source, subject.clone()).await?;
    for default in defaults {
        if baker.visited.contains(default) {
            continue;
        }
        baker.walk(source, default.clone()).await?;
    }
    debug!(
        subject = %subject,
        contexts = %active,
        visited = baker.visited.len(),
        "baked subject"
    );
    Ok(baker.finish())
}

struct Baker<'a> {
    provider: &'a dyn ContextDefinitionProvider,
    active: &'a ContextSet,
    permissions: HashMap<String, i32>,
    fallback: i32,
    options: BTreeMap<String, String>,
    parents: Vec<SubjectRef>,
    visited: HashSet<SubjectRef>,
    warned_keys: HashSet<String>,
}

impl<'a> Baker<'a> {
    fn new(provider: &'a dyn ContextDefinitionProvider, active: &'a ContextSet) -> Self {
        Self {
            provider,
            active,
            permissions: HashMap::new(),
            fallback: 0,
            options: BTreeMap::new(),
            parents: Vec::new(),
            visited: HashSet::new(),
            warned_keys: HashSet::new(),
        }
    }

    async fn walk(&mut self, source: &dyn SubjectDataSource, start: SubjectRef) -> Result<()> {
        let mut pending = vec![start];
        while let Some(subject) = pending.pop() {
            if !self.visited.insert(subject.clone()) {
                warn!(subject = %subject, "subject already visited in this resolution, skipping");
                continue;
            }
            let layers = source.layers(&subject).await?;
            let parents = self.merge_subject(&layers);
            // depth-first: the first parent is visited next
            pending.extend(parents.into_iter().rev());
        }
        Ok(())
    }

    /// Merge every applicable segment of one subject. Returns the parents
    /// found, in order.
    fn merge_subject(&mut self, layers: &SubjectLayers) -> Vec<SubjectRef> {
        let mut parents = Vec::new();
        for contexts in self.combinations(layers) {
            for data in layers.in_merge_order() {
                if let Some(segment) = data.get_segment(&contexts) {
                    self.merge_segment(segment, &mut parents);
                }
            }
        }
        parents
    }

    /// Stored context sets satisfied by the active contexts, most specific
    /// first. The global set sorts last.
    fn combinations(&mut self, layers: &SubjectLayers) -> Vec<ContextSet> {
        let mut combinations: Vec<ContextSet> = layers
            .persistent
            .contexts()
            .chain(layers.transient.contexts())
            .filter(|contexts| self.applies(contexts))
            .cloned()
            .collect();
        combinations.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        combinations.dedup();
        combinations
    }

    fn applies(&mut self, contexts: &ContextSet) -> bool {
        for value in contexts {
            if !self.provider.is_registered(value.key())
                && self.warned_keys.insert(value.key().to_owned())
            {
                warn!(
                    context = value.key(),
                    "no definition for context key, matching by raw value"
                );
            }
        }
        contexts.is_satisfied_by(self.active, self.provider)
    }

    fn merge_segment(&mut self, segment: &Segment, parents: &mut Vec<SubjectRef>) {
        for (key, &value) in segment.permissions() {
            match self.permissions.entry(key.to_lowercase()) {
                Entry::Vacant(slot) => {
                    let _ = slot.insert(value);
                }
                Entry::Occupied(mut slot) => {
                    if value.unsigned_abs() > slot.get().unsigned_abs() {
                        let _ = slot.insert(value);
                    }
                }
            }
        }
        if let Some(fallback) = segment.fallback() {
            if fallback.unsigned_abs() > self.fallback.unsigned_abs() {
                self.fallback = fallback;
            }
        }
        for (key, value) in segment.options() {
            let _ = self
                .options
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        for parent in segment.parents() {
            self.parents.push(parent.clone());
            parents.push(parent.clone());
        }
    }

    fn finish(self) -> BakedSubjectData {
        BakedSubjectData::new(
            self.active.clone(),
            NodeTree::of(self.permissions, self.fallback),
            self.options,
            self.parents,
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
