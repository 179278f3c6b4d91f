//! Path-based state node identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator used when rendering an identifier path.
pub const PATH_SEPARATOR: char = '.';

/// Identifier of a state node: the chain of keys from the root to the node.
///
/// Two identifiers are equal when their paths are equal, so a node can be
/// referenced by id from any instance sharing the same tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateNodeId(Vec<String>);

impl StateNodeId {
    /// Creates the identifier of a root node.
    pub fn root(key: impl Into<String>) -> Self {
        Self(vec![key.into()])
    }

    /// Creates an identifier from a full path (root key first).
    pub fn from_path<I, S>(keys: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let path: Vec<String> = keys.into_iter().map(Into::into).collect();
        if path.is_empty() || path.iter().any(|k| k.is_empty()) {
            return None;
        }
        Some(Self(path))
    }

    /// Parses a dotted path such as `order.payment.pending`.
    pub fn parse(s: &str) -> Option<Self> {
        Self::from_path(s.split(PATH_SEPARATOR))
    }

    /// Returns the identifier of the child named `key`.
    pub fn child(&self, key: impl Into<String>) -> Self {
        let mut path = self.0.clone();
        path.push(key.into());
        Self(path)
    }

    /// Returns the parent identifier, or `None` for a root.
    pub fn parent(&self) -> Option<Self> {
        if self.0.len() <= 1 {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    /// Root key of the chart this node belongs to.
    pub fn root_key(&self) -> &str {
        &self.0[0]
    }

    /// Last key of the path.
    pub fn key(&self) -> &str {
        &self.0[self.0.len() - 1]
    }

    /// All keys from the root to this node.
    pub fn keys(&self) -> &[String] {
        &self.0
    }

    /// Distance from the root (root = 0).
    pub fn depth(&self) -> usize {
        self.0.len() - 1
    }

    /// Returns true if `self` is a strict ancestor of `other`.
    pub fn is_ancestor_of(&self, other: &StateNodeId) -> bool {
        self.0.len() < other.0.len() && other.0.starts_with(&self.0)
    }
}

impl fmt::Display for StateNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, key) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", PATH_SEPARATOR)?;
            }
            f.write_str(key)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_child_and_parent() {
        let root = StateNodeId::root("order");
        let paid = root.child("paid");
        let shipped = paid.child("shipped");

        assert_eq!(shipped.to_string(), "order.paid.shipped");
        assert_eq!(shipped.depth(), 2);
        assert_eq!(shipped.key(), "shipped");
        assert_eq!(shipped.root_key(), "order");
        assert_eq!(shipped.parent(), Some(paid.clone()));
        assert_eq!(root.parent(), None);
    }

    #[test]
    fn test_identity_by_path() {
        let a = StateNodeId::root("s").child("a");
        let b = StateNodeId::parse("s.a").unwrap();
        assert_eq!(a, b);

        let set: HashSet<_> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_ancestry() {
        let s = StateNodeId::root("s");
        let a = s.child("a");
        let a1 = a.child("a1");
        let ab = StateNodeId::parse("s.ab").unwrap();

        assert!(s.is_ancestor_of(&a1));
        assert!(a.is_ancestor_of(&a1));
        assert!(!a1.is_ancestor_of(&a1));
        assert!(!a.is_ancestor_of(&ab));
    }

    #[test]
    fn test_parse_rejects_empty_keys() {
        assert!(StateNodeId::parse("").is_none());
        assert!(StateNodeId::parse("a..b").is_none());
    }
}
