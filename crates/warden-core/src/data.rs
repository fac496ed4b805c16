//! Per-subject data keyed by context set.
//!
//! [`ImmutableSubjectData`] maps each [`ContextSet`] to the [`Segment`] stored
//! for it. The map is structurally immutable: every mutation returns a new
//! instance that shares all untouched segments with the original. An empty
//! segment is never stored; setting one removes its key instead.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::ContextSet;
use crate::segment::Segment;
use crate::subject::SubjectRef;

/// Immutable map from context set to segment.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<SegmentEntry>", into = "Vec<SegmentEntry>")]
pub struct ImmutableSubjectData {
    segments: Arc<BTreeMap<ContextSet, Arc<Segment>>>,
}

/// Serialized form of one stored segment.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct SegmentEntry {
    #[serde(default)]
    contexts: ContextSet,
    #[serde(flatten)]
    segment: Segment,
}

impl From<Vec<SegmentEntry>> for ImmutableSubjectData {
    fn from(entries: Vec<SegmentEntry>) -> Self {
        let segments = entries
            .into_iter()
            .filter(|e| !e.segment.is_empty())
            .map(|e| (e.contexts, Arc::new(e.segment)))
            .collect();
        Self {
            segments: Arc::new(segments),
        }
    }
}

impl From<ImmutableSubjectData> for Vec<SegmentEntry> {
    fn from(data: ImmutableSubjectData) -> Self {
        data.segments
            .iter()
            .map(|(contexts, segment)| SegmentEntry {
                contexts: contexts.clone(),
                segment: (**segment).clone(),
            })
            .collect()
    }
}

impl ImmutableSubjectData {
    /// Data with no segments.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether two handles share the same underlying map.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.segments, &other.segments)
    }

    /// The stored segment for exactly `contexts`, if any.
    #[must_use]
    pub fn get_segment(&self, contexts: &ContextSet) -> Option<&Arc<Segment>> {
        self.segments.get(contexts)
    }

    /// The segment for exactly `contexts`, or an empty one.
    #[must_use]
    pub fn segment(&self, contexts: &ContextSet) -> Segment {
        self.segments
            .get(contexts)
            .map(|s| (**s).clone())
            .unwrap_or_default()
    }

    /// Store `segment` under `contexts`, removing the key if it is empty.
    #[must_use]
    pub fn with_segment(&self, contexts: ContextSet, segment: Segment) -> Self {
        let mut next = (*self.segments).clone();
        if segment.is_empty() {
            let _ = next.remove(&contexts);
        } else {
            let _ = next.insert(contexts, Arc::new(segment));
        }
        Self {
            segments: Arc::new(next),
        }
    }

    /// Transform the segment under `contexts`.
    ///
    /// Returns `self` unchanged (same map) when the transform is a no-op.
    #[must_use]
    pub fn update_segment<F>(&self, contexts: &ContextSet, op: F) -> Self
    where
        F: FnOnce(&Segment) -> Segment,
    {
        let current = self.segment(contexts);
        let updated = op(&current);
        if updated == current {
            return self.clone();
        }
        self.with_segment(contexts.clone(), updated)
    }

    /// Remove the segment under `contexts`.
    #[must_use]
    pub fn without_segment(&self, contexts: &ContextSet) -> Self {
        if !self.segments.contains_key(contexts) {
            return self.clone();
        }
        let mut next = (*self.segments).clone();
        let _ = next.remove(contexts);
        Self {
            segments: Arc::new(next),
        }
    }

    /// Overlay every segment of `other` onto this data.
    #[must_use]
    pub fn merge_from(&self, other: &ImmutableSubjectData) -> Self {
        let mut next = (*self.segments).clone();
        for (contexts, segment) in other.segments.iter() {
            let merged = match next.get(contexts) {
                Some(existing) => existing.merge_from(segment),
                None => (**segment).clone(),
            };
            if merged.is_empty() {
                let _ = next.remove(contexts);
            } else {
                let _ = next.insert(contexts.clone(), Arc::new(merged));
            }
        }
        Self {
            segments: Arc::new(next),
        }
    }

    /// Every context set with stored data.
    pub fn contexts(&self) -> impl Iterator<Item = &ContextSet> {
        self.segments.keys()
    }

    /// Every stored `(contexts, segment)` pair.
    pub fn segments(&self) -> impl Iterator<Item = (&ContextSet, &Arc<Segment>)> {
        self.segments.iter()
    }

    /// Number of stored segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Permissions for every context set that has any.
    #[must_use]
    pub fn all_permissions(&self) -> BTreeMap<ContextSet, BTreeMap<String, i32>> {
        self.collect_non_empty(|s| Some(s.permissions().clone()).filter(|p| !p.is_empty()))
    }

    /// Options for every context set that has any.
    #[must_use]
    pub fn all_options(&self) -> BTreeMap<ContextSet, BTreeMap<String, String>> {
        self.collect_non_empty(|s| Some(s.options().clone()).filter(|o| !o.is_empty()))
    }

    /// Parents for every context set that has any.
    #[must_use]
    pub fn all_parents(&self) -> BTreeMap<ContextSet, Vec<SubjectRef>> {
        self.collect_non_empty(|s| Some(s.parents().to_vec()).filter(|p| !p.is_empty()))
    }

    /// Fallback values for every context set that has one.
    #[must_use]
    pub fn all_fallbacks(&self) -> BTreeMap<ContextSet, i32> {
        self.collect_non_empty(Segment::fallback)
    }

    fn collect_non_empty<T>(&self, f: impl Fn(&Segment) -> Option<T>) -> BTreeMap<ContextSet, T> {
        self.segments
            .iter()
            .filter_map(|(contexts, segment)| f(segment).map(|v| (contexts.clone(), v)))
            .collect()
    }
}
