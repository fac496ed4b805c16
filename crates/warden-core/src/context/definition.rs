//! Context definitions and the name-keyed registry.
//!
//! A [`ContextDefinition`] is a typed capability: it serializes and parses
//! values of its own type, decides whether a stored value applies to an
//! active one, and reports which values are active for a subject right now.
//! Definitions are independent types; the registry holds them behind the
//! object-safe [`DynContextDefinition`] view, which every typed definition
//! gets through a blanket impl.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::definitions::FallbackContextDefinition;
use crate::subject::SubjectRef;

/// A parsed context value with its concrete type erased.
pub type ParsedValue = Arc<dyn Any + Send + Sync>;

/// A typed context definition.
pub trait ContextDefinition: Send + Sync + 'static {
    /// The parsed value type.
    type Value: Send + Sync + 'static;

    /// The context key this definition handles (e.g. `world`).
    fn name(&self) -> &str;

    /// Serialize a value to its raw string form.
    fn serialize(&self, value: &Self::Value) -> String;

    /// Parse a raw string. `None` when the string is not a valid value.
    fn deserialize(&self, raw: &str) -> Option<Self::Value>;

    /// Whether data stored under `own` applies when `test` is active.
    fn matches(&self, own: &Self::Value, test: &Self::Value) -> bool;

    /// Emit the values of this context that are active for `subject` now.
    fn accumulate_current_values(&self, subject: &SubjectRef, emit: &mut dyn FnMut(Self::Value));
}

/// Object-safe view of a [`ContextDefinition`] operating on raw strings and
/// type-erased parsed values.
pub trait DynContextDefinition: Send + Sync {
    /// The context key.
    fn name(&self) -> &str;

    /// Parse a raw value into its erased form.
    fn parse(&self, raw: &str) -> Option<ParsedValue>;

    /// Compare two values previously produced by [`parse`](Self::parse).
    fn matches_parsed(&self, own: &ParsedValue, test: &ParsedValue) -> bool;

    /// Current values for `subject`, serialized to raw strings.
    fn current_values(&self, subject: &SubjectRef) -> Vec<String>;
}

impl<D: ContextDefinition> DynContextDefinition for D {
    fn name(&self) -> &str {
        ContextDefinition::name(self)
    }

    fn parse(&self, raw: &str) -> Option<ParsedValue> {
        self.deserialize(raw)
            .map(|value| Arc::new(value) as ParsedValue)
    }

    fn matches_parsed(&self, own: &ParsedValue, test: &ParsedValue) -> bool {
        match (
            own.downcast_ref::<D::Value>(),
            test.downcast_ref::<D::Value>(),
        ) {
            (Some(own), Some(test)) => self.matches(own, test),
            _ => false,
        }
    }

    fn current_values(&self, subject: &SubjectRef) -> Vec<String> {
        let mut values = Vec::new();
        self.accumulate_current_values(subject, &mut |value| values.push(self.serialize(&value)));
        values
    }
}

/// Lookup of context definitions by key.
pub trait ContextDefinitionProvider: Send + Sync {
    /// The definition registered for `name`.
    ///
    /// When [`allow_fallback`](Self::allow_fallback) is set, unknown keys yield
    /// a plain string-equality definition instead of `None`.
    fn get(&self, name: &str) -> Option<Arc<dyn DynContextDefinition>>;

    /// Whether a definition other than a fallback is registered for `name`.
    fn is_registered(&self, name: &str) -> bool;

    /// Whether unregistered keys resolve to a fallback definition.
    fn allow_fallback(&self) -> bool;
}

/// Engine-owned registry of context definitions.
///
/// Fallback definitions are created once per unknown key and then handed out
/// again, so values resolved through one keep their cached resolution until a
/// real definition is registered for the key.
pub struct ContextDefinitionRegistry {
    definitions: RwLock<HashMap<String, Arc<dyn DynContextDefinition>>>,
    fallbacks: RwLock<HashMap<String, Arc<dyn DynContextDefinition>>>,
    allow_fallback: bool,
}

impl ContextDefinitionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(allow_fallback: bool) -> Self {
        Self {
            definitions: RwLock::new(HashMap::new()),
            fallbacks: RwLock::new(HashMap::new()),
            allow_fallback,
        }
    }

    /// Register a typed definition, replacing any with the same name.
    pub fn register<D: ContextDefinition>(&self, definition: D) {
        self.register_dyn(Arc::new(definition));
    }

    /// Register an already type-erased definition.
    pub fn register_dyn(&self, definition: Arc<dyn DynContextDefinition>) {
        let name = definition.name().to_owned();
        debug!(context = %name, "registering context definition");
        let _ = self.definitions.write().insert(name, definition);
    }

    /// Remove a definition by name. Returns `true` if one was registered.
    pub fn unregister(&self, name: &str) -> bool {
        self.definitions.write().remove(name).is_some()
    }

    /// Whether a definition (not a fallback) is registered for `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.definitions.read().contains_key(name)
    }

    /// Registered definition names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.definitions.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Snapshot of every registered definition.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<dyn DynContextDefinition>> {
        let mut all: Vec<_> = self.definitions.read().values().cloned().collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    /// Remove every definition.
    pub fn clear(&self) {
        self.definitions.write().clear();
        self.fallbacks.write().clear();
    }
}

impl Default for ContextDefinitionRegistry {
    fn default() -> Self {
        Self::new(false)
    }
}

impl ContextDefinitionProvider for ContextDefinitionRegistry {
    fn get(&self, name: &str) -> Option<Arc<dyn DynContextDefinition>> {
        if let Some(definition) = self.definitions.read().get(name) {
            return Some(Arc::clone(definition));
        }
        if !self.allow_fallback {
            return None;
        }
        if let Some(fallback) = self.fallbacks.read().get(name) {
            return Some(Arc::clone(fallback));
        }
        let mut fallbacks = self.fallbacks.write();
        let fallback = fallbacks.entry(name.to_owned()).or_insert_with(|| {
            Arc::new(FallbackContextDefinition::new(name)) as Arc<dyn DynContextDefinition>
        });
        Some(Arc::clone(fallback))
    }

    fn is_registered(&self, name: &str) -> bool {
        self.contains(name)
    }

    fn allow_fallback(&self) -> bool {
        self.allow_fallback
    }
}

impl std::fmt::Debug for ContextDefinitionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextDefinitionRegistry")
            .field("definitions", &self.names())
            .field("allow_fallback", &self.allow_fallback)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::definitions::SimpleContextDefinition;

    #[test]
    fn register_and_get() {
        let registry = ContextDefinitionRegistry::new(false);
        registry.register(SimpleContextDefinition::new("world"));
        assert!(registry.contains("world"));
        assert!(registry.get("world").is_some());
        assert!(registry.get("dimension").is_none());
    }

    #[test]
    fn fallback_for_unknown_keys() {
        let registry = ContextDefinitionRegistry::new(true);
        let definition = registry.get("dimension").unwrap();
        assert_eq!(definition.name(), "dimension");
        assert!(!registry.contains("dimension"));
        assert!(registry.allow_fallback());
    }

    #[test]
    fn fallback_is_reused_until_registration() {
        let registry = ContextDefinitionRegistry::new(true);
        let first = registry.get("dimension").unwrap();
        let again = registry.get("dimension").unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        registry.register(SimpleContextDefinition::new("dimension"));
        let registered = registry.get("dimension").unwrap();
        assert!(!Arc::ptr_eq(&first, &registered));
    }

    #[test]
    fn unregister_removes() {
        let registry = ContextDefinitionRegistry::new(false);
        registry.register(SimpleContextDefinition::new("world"));
        assert!(registry.unregister("world"));
        assert!(!registry.unregister("world"));
        assert!(registry.get("world").is_none());
    }

    #[test]
    fn names_sorted() {
        let registry = ContextDefinitionRegistry::new(false);
        registry.register(SimpleContextDefinition::new("world"));
        registry.register(SimpleContextDefinition::new("dimension"));
        registry.register(SimpleContextDefinition::new("server-tag"));
        assert_eq!(registry.names(), vec!["dimension", "server-tag", "world"]);
    }

    #[test]
    fn erased_current_values_are_serialized() {
        let definition = SimpleContextDefinition::with_current("world", |_subject| {
            vec!["overworld".to_owned(), "nether".to_owned()]
        });
        let erased: &dyn DynContextDefinition = &definition;
        let values = erased.current_values(&SubjectRef::new("user", "bob"));
        assert_eq!(values, vec!["overworld", "nether"]);
    }

    #[test]
    fn erased_matching_rejects_foreign_types() {
        let definition = SimpleContextDefinition::new("world");
        let own = definition.parse("nether").unwrap();
        let foreign: ParsedValue = Arc::new(42_u32);
        assert!(!definition.matches_parsed(&own, &foreign));
        assert!(definition.matches_parsed(&own, &definition.parse("nether").unwrap()));
    }
}
