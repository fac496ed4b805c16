//! Dotted-prefix permission index.
//!
//! A [`NodeTree`] answers "what is the value of `a.b.c`" by walking the
//! dot-separated segments of the key and returning the value of the deepest
//! node that has one. Keys are matched case-insensitively. A key with no set
//! ancestor at all yields the tree's root fallback.

use std::collections::{BTreeMap, HashMap};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Node {
    value: Option<i32>,
    children: HashMap<String, Node>,
}

/// Immutable prefix tree over permission keys.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeTree {
    root: Node,
    entries: BTreeMap<String, i32>,
}

impl NodeTree {
    /// Build a tree from flat permission values and a root fallback.
    ///
    /// Zero values are treated as unset.
    #[must_use]
    pub fn of(permissions: impl IntoIterator<Item = (String, i32)>, fallback: i32) -> Self {
        let mut root = Node {
            value: (fallback != 0).then_some(fallback),
            children: HashMap::new(),
        };
        let mut entries = BTreeMap::new();
        for (key, value) in permissions {
            if value == 0 {
                continue;
            }
            let key = key.to_lowercase();
            let mut node = &mut root;
            for part in key.split('.') {
                node = node.children.entry(part.to_owned()).or_default();
            }
            node.value = Some(value);
            let _ = entries.insert(key, value);
        }
        Self { root, entries }
    }

    /// Value for `key`: the nearest set ancestor, else the fallback.
    #[must_use]
    pub fn get(&self, key: &str) -> i32 {
        let key = key.to_lowercase();
        let mut node = &self.root;
        let mut found = node.value.unwrap_or(0);
        for part in key.split('.') {
            match node.children.get(part) {
                Some(child) => {
                    node = child;
                    if let Some(value) = node.value {
                        found = value;
                    }
                }
                None => break,
            }
        }
        found
    }

    /// The root fallback, `0` when unset.
    #[must_use]
    pub fn fallback(&self) -> i32 {
        self.root.value.unwrap_or(0)
    }

    /// Every explicitly set key with its value (lowercased keys).
    #[must_use]
    pub fn as_map(&self) -> &BTreeMap<String, i32> {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tree(entries: &[(&str, i32)], fallback: i32) -> NodeTree {
        NodeTree::of(entries.iter().map(|(k, v)| ((*k).to_owned(), *v)), fallback)
    }

    #[test]
    fn child_inherits_nearest_ancestor() {
        let t = tree(&[("a.b", 1)], 0);
        assert_eq!(t.get("a.b"), 1);
        assert_eq!(t.get("a.b.c"), 1);
        assert_eq!(t.get("a.b.c.d"), 1);
        assert_eq!(t.get("a"), 0);
        assert_eq!(t.get("x.y"), 0);
    }

    #[test]
    fn deeper_value_overrides_ancestor() {
        let t = tree(&[("a", 1), ("a.b", -1)], 0);
        assert_eq!(t.get("a.c"), 1);
        assert_eq!(t.get("a.b.c"), -1);
    }

    #[test]
    fn unrelated_keys_return_fallback() {
        let t = tree(&[("a.b", 1)], -3);
        assert_eq!(t.get("x.y"), -3);
        assert_eq!(t.get("a"), -3);
        assert_eq!(t.fallback(), -3);
    }

    #[test]
    fn sibling_prefix_is_not_ancestor() {
        let t = tree(&[("a.b", 1)], 0);
        assert_eq!(t.get("a.bc"), 0);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let t = tree(&[("Warden.Admin", 2)], 0);
        assert_eq!(t.get("warden.admin.reload"), 2);
        assert_eq!(t.get("WARDEN.ADMIN"), 2);
        assert_eq!(t.as_map().get("warden.admin"), Some(&2));
    }

    #[test]
    fn zero_values_are_unset() {
        let t = tree(&[("a", 1), ("a.b", 0)], 0);
        assert_eq!(t.get("a.b"), 1);
        assert_eq!(t.as_map().len(), 1);
    }

    fn key_strategy() -> impl Strategy<Value = String> {
        prop::collection::vec("[a-c]{1,2}", 1..4).prop_map(|parts| parts.join("."))
    }

    proptest! {
        #[test]
        fn stored_keys_return_their_value(
            entries in prop::collection::btree_map(key_strategy(), -5i32..=5, 0..12),
            fallback in -5i32..=5,
        ) {
            let t = NodeTree::of(entries.clone(), fallback);
            for (key, value) in &entries {
                if *value != 0 {
                    prop_assert_eq!(t.get(key), *value);
                }
            }
        }

        #[test]
        fn lookup_matches_nearest_ancestor_scan(
            entries in prop::collection::btree_map(key_strategy(), -5i32..=5, 0..12),
            query in key_strategy(),
        ) {
            let t = NodeTree::of(entries.clone(), 0);
            let parts: Vec<&str> = query.split('.').collect();
            let expected = (1..=parts.len())
                .rev()
                .map(|n| parts[..n].join("."))
                .find_map(|prefix| entries.get(&prefix).copied().filter(|v| *v != 0))
                .unwrap_or(0);
            prop_assert_eq!(t.get(&query), expected);
        }
    }
}
