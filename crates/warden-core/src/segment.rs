//! The data bundle stored for one exact context set.
//!
//! A [`Segment`] holds permissions (signed magnitudes, `0` meaning unset),
//! options, ordered parent references and an optional fallback value. It is
//! immutable: every operation returns a new segment.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::subject::SubjectRef;

/// Permissions, options, parents and fallback for one context set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "SegmentRepr")]
pub struct Segment {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    permissions: BTreeMap<String, i32>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    options: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    parents: Vec<SubjectRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fallback: Option<i32>,
}

/// Stored form; zero permissions and a zero fallback mean unset.
#[derive(Deserialize)]
struct SegmentRepr {
    #[serde(default)]
    permissions: BTreeMap<String, i32>,
    #[serde(default)]
    options: BTreeMap<String, String>,
    #[serde(default)]
    parents: Vec<SubjectRef>,
    #[serde(default)]
    fallback: Option<i32>,
}

impl From<SegmentRepr> for Segment {
    fn from(repr: SegmentRepr) -> Self {
        Self {
            permissions: repr.permissions.into_iter().filter(|(_, v)| *v != 0).collect(),
            options: repr.options,
            parents: repr.parents,
            fallback: repr.fallback.filter(|v| *v != 0),
        }
    }
}

impl Segment {
    /// An empty segment.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Permission values. Never contains `0`.
    #[must_use]
    pub fn permissions(&self) -> &BTreeMap<String, i32> {
        &self.permissions
    }

    /// Option values.
    #[must_use]
    pub fn options(&self) -> &BTreeMap<String, String> {
        &self.options
    }

    /// Parents in priority order.
    #[must_use]
    pub fn parents(&self) -> &[SubjectRef] {
        &self.parents
    }

    /// Value applied to permissions with no more specific entry.
    #[must_use]
    pub fn fallback(&self) -> Option<i32> {
        self.fallback
    }

    /// The value of a single permission, `0` when unset.
    #[must_use]
    pub fn permission(&self, key: &str) -> i32 {
        self.permissions.get(key).copied().unwrap_or(0)
    }

    /// A single option value.
    #[must_use]
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Whether every field is empty or absent.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty()
            && self.options.is_empty()
            && self.parents.is_empty()
            && self.fallback.is_none()
    }

    /// Set one permission. A value of `0` removes it.
    #[must_use]
    pub fn with_permission(&self, key: impl Into<String>, value: i32) -> Self {
        let key = key.into();
        let mut next = self.clone();
        if value == 0 {
            let _ = next.permissions.remove(&key);
        } else {
            let _ = next.permissions.insert(key, value);
        }
        next
    }

    /// Replace all permissions. Zero values are dropped.
    #[must_use]
    pub fn with_permissions(&self, permissions: BTreeMap<String, i32>) -> Self {
        Self {
            permissions: permissions.into_iter().filter(|(_, v)| *v != 0).collect(),
            ..self.clone()
        }
    }

    /// Remove every permission.
    #[must_use]
    pub fn without_permissions(&self) -> Self {
        Self {
            permissions: BTreeMap::new(),
            ..self.clone()
        }
    }

    /// Set or (with `None`) remove one option.
    #[must_use]
    pub fn with_option(&self, key: impl Into<String>, value: Option<String>) -> Self {
        let key = key.into();
        let mut next = self.clone();
        match value {
            Some(value) => {
                let _ = next.options.insert(key, value);
            }
            None => {
                let _ = next.options.remove(&key);
            }
        }
        next
    }

    /// Replace all options.
    #[must_use]
    pub fn with_options(&self, options: BTreeMap<String, String>) -> Self {
        Self {
            options,
            ..self.clone()
        }
    }

    /// Remove every option.
    #[must_use]
    pub fn without_options(&self) -> Self {
        Self {
            options: BTreeMap::new(),
            ..self.clone()
        }
    }

    /// Add a parent at the front (highest priority), moving it if present.
    #[must_use]
    pub fn plus_parent(&self, parent: SubjectRef) -> Self {
        let mut parents = Vec::with_capacity(self.parents.len() + 1);
        parents.push(parent.clone());
        parents.extend(self.parents.iter().filter(|p| **p != parent).cloned());
        Self {
            parents,
            ..self.clone()
        }
    }

    /// Remove a parent.
    #[must_use]
    pub fn minus_parent(&self, parent: &SubjectRef) -> Self {
        Self {
            parents: self.parents.iter().filter(|p| *p != parent).cloned().collect(),
            ..self.clone()
        }
    }

    /// Replace the parent list.
    #[must_use]
    pub fn with_parents(&self, parents: Vec<SubjectRef>) -> Self {
        Self {
            parents,
            ..self.clone()
        }
    }

    /// Remove every parent.
    #[must_use]
    pub fn without_parents(&self) -> Self {
        Self {
            parents: Vec::new(),
            ..self.clone()
        }
    }

    /// Set or clear the fallback. `Some(0)` clears it.
    #[must_use]
    pub fn with_fallback(&self, fallback: Option<i32>) -> Self {
        Self {
            fallback: fallback.filter(|v| *v != 0),
            ..self.clone()
        }
    }

    /// Overlay `other` onto this segment.
    ///
    /// Permissions and options from `other` replace same-keyed entries,
    /// parents from `other` are appended unless already present, and the
    /// fallback from `other` wins when set.
    #[must_use]
    pub fn merge_from(&self, other: &Segment) -> Self {
        let mut next = self.clone();
        next.permissions
            .extend(other.permissions.iter().map(|(k, v)| (k.clone(), *v)));
        next.options
            .extend(other.options.iter().map(|(k, v)| (k.clone(), v.clone())));
        for parent in &other.parents {
            if !next.parents.contains(parent) {
                next.parents.push(parent.clone());
            }
        }
        if other.fallback.is_some() {
            next.fallback = other.fallback;
        }
        next
    }
}
