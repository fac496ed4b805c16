//! Context values and context sets.
//!
//! A [`ContextValue`] is a `(key, raw value)` pair such as `world=nether`.
//! Identity ([`Eq`], [`Hash`], [`Ord`]) is defined on the pair only, so values
//! stay usable as set members and map keys even when no definition for the key
//! is registered. The parsed form is resolved lazily through a
//! [`ContextDefinitionProvider`] and cached together with the definition that
//! produced it; a cached resolution is reused only while the provider still
//! hands out that same definition for the key.
//!
//! A [`ContextSet`] is the ordered set of values a [`Segment`](crate::Segment)
//! is stored under; the empty set is the global scope.

pub mod definition;
pub mod definitions;
pub mod inheritance;

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::errors::CoreError;
use definition::{ContextDefinition, ContextDefinitionProvider, DynContextDefinition, ParsedValue};

/// A context value bound to the definition that parsed it.
#[derive(Clone)]
pub struct ResolvedContext {
    definition: Arc<dyn DynContextDefinition>,
    parsed: ParsedValue,
}

impl ResolvedContext {
    /// The definition that parsed this value.
    pub fn definition(&self) -> &Arc<dyn DynContextDefinition> {
        &self.definition
    }

    /// The parsed, type-erased value.
    pub fn parsed(&self) -> &ParsedValue {
        &self.parsed
    }
}

/// A single context value, e.g. `world=nether`.
#[derive(Serialize, Deserialize)]
#[serde(from = "ContextValueRepr", into = "ContextValueRepr")]
pub struct ContextValue {
    key: String,
    raw: String,
    resolved: RwLock<Option<ResolvedContext>>,
}

impl Clone for ContextValue {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            raw: self.raw.clone(),
            resolved: RwLock::new(self.resolved.read().clone()),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
struct ContextValueRepr {
    key: String,
    value: String,
}

impl From<ContextValueRepr> for ContextValue {
    fn from(repr: ContextValueRepr) -> Self {
        Self::new(repr.key, repr.value)
    }
}

impl From<ContextValue> for ContextValueRepr {
    fn from(value: ContextValue) -> Self {
        Self {
            key: value.key,
            value: value.raw,
        }
    }
}

impl ContextValue {
    /// Create an unresolved value from its key and raw string.
    #[must_use]
    pub fn new(key: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            raw: raw.into(),
            resolved: RwLock::new(None),
        }
    }

    /// Create a value by serializing a typed value through its definition.
    #[must_use]
    pub fn of<D: ContextDefinition>(definition: &D, value: &D::Value) -> Self {
        Self::new(ContextDefinition::name(definition), definition.serialize(value))
    }

    /// The context key (definition name).
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The raw string value.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Attempt to resolve this value against a provider.
    ///
    /// Returns `false` when the definition is missing or the raw value does
    /// not parse. A failure is never cached, so a later call can succeed once
    /// the definition has been registered.
    pub fn try_resolve(&self, provider: &dyn ContextDefinitionProvider) -> bool {
        self.resolve(provider).is_some()
    }

    /// Resolve and return the bound definition and parsed value.
    ///
    /// The cached resolution is reused only if `provider` still returns the
    /// same definition instance for this key. A registration replacing the
    /// definition (or a fallback) makes the value parse again.
    pub fn resolve(&self, provider: &dyn ContextDefinitionProvider) -> Option<ResolvedContext> {
        let Some(definition) = provider.get(&self.key) else {
            *self.resolved.write() = None;
            return None;
        };
        if let Some(cached) = self.resolved.read().as_ref() {
            if Arc::ptr_eq(&cached.definition, &definition) {
                return Some(cached.clone());
            }
        }
        let resolved = definition
            .parse(&self.raw)
            .map(|parsed| ResolvedContext { definition, parsed });
        self.resolved.write().clone_from(&resolved);
        resolved
    }

    /// The last cached resolution, without consulting a provider.
    #[must_use]
    pub fn resolved(&self) -> Option<ResolvedContext> {
        self.resolved.read().clone()
    }

    /// The cached parsed value downcast to `T`.
    #[must_use]
    pub fn parsed<T: Clone + 'static>(&self) -> Option<T> {
        self.resolved
            .read()
            .as_ref()?
            .parsed
            .downcast_ref::<T>()
            .cloned()
    }

    /// Whether this (stored) value applies when `active` is an active context.
    ///
    /// Keys must be equal. Equal raw values always match; otherwise both sides
    /// must resolve through the same definition and satisfy its `matches`.
    pub fn matches(&self, active: &ContextValue, provider: &dyn ContextDefinitionProvider) -> bool {
        if self.key != active.key {
            return false;
        }
        if self.raw == active.raw {
            return true;
        }
        match (self.resolve(provider), active.resolve(provider)) {
            (Some(own), Some(test)) if own.definition.name() == test.definition.name() => {
                own.definition.matches_parsed(&own.parsed, &test.parsed)
            }
            _ => false,
        }
    }
}

impl PartialEq for ContextValue {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.raw == other.raw
    }
}

impl Eq for ContextValue {}

impl Hash for ContextValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
        self.raw.hash(state);
    }
}

impl PartialOrd for ContextValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ContextValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| self.raw.cmp(&other.raw))
    }
}

impl fmt::Debug for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextValue")
            .field("key", &self.key)
            .field("raw", &self.raw)
            .field("resolved", &self.resolved.read().is_some())
            .finish()
    }
}

impl fmt::Display for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.raw)
    }
}

impl FromStr for ContextValue {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((key, raw)) if !key.is_empty() => Ok(Self::new(key, raw)),
            _ => Err(CoreError::InvalidContextValue(s.to_owned())),
        }
    }
}

/// An ordered set of context values. The empty set is the global scope.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextSet(BTreeSet<ContextValue>);

impl ContextSet {
    /// The empty (global) context set.
    #[must_use]
    pub fn global() -> Self {
        Self(BTreeSet::new())
    }

    /// Build a set from any iterator of values.
    pub fn of(values: impl IntoIterator<Item = ContextValue>) -> Self {
        Self(values.into_iter().collect())
    }

    /// Return a copy with `value` added.
    #[must_use]
    pub fn with(&self, value: ContextValue) -> Self {
        let mut next = self.0.clone();
        let _ = next.insert(value);
        Self(next)
    }

    /// Add a value in place. Returns `false` if it was already present.
    pub fn insert(&mut self, value: ContextValue) -> bool {
        self.0.insert(value)
    }

    /// Whether the value (by key and raw) is present.
    #[must_use]
    pub fn contains(&self, value: &ContextValue) -> bool {
        self.0.contains(value)
    }

    /// Number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether this is the global scope.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate values in order.
    pub fn iter(&self) -> impl Iterator<Item = &ContextValue> {
        self.0.iter()
    }

    /// Whether every value in this set matches some value in `active`.
    ///
    /// The global set is satisfied by every active set.
    pub fn is_satisfied_by(
        &self,
        active: &ContextSet,
        provider: &dyn ContextDefinitionProvider,
    ) -> bool {
        self.0
            .iter()
            .all(|own| active.0.iter().any(|test| own.matches(test, provider)))
    }
}

impl FromIterator<ContextValue> for ContextSet {
    fn from_iter<I: IntoIterator<Item = ContextValue>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a ContextSet {
    type Item = &'a ContextValue;
    type IntoIter = std::collections::btree_set::Iter<'a, ContextValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl IntoIterator for ContextSet {
    type Item = ContextValue;
    type IntoIter = std::collections::btree_set::IntoIter<ContextValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl fmt::Display for ContextSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("[global]");
        }
        f.write_str("{")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{value}")?;
        }
        f.write_str("}")
    }
}
