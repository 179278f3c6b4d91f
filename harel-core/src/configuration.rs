//! State configurations: the set of active state nodes.

use crate::id::StateNodeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Set of active state node ids.
///
/// An empty configuration means the instance has not been started.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration(BTreeSet<StateNodeId>);

impl Configuration {
    /// The not-yet-started configuration.
    pub fn not_initialized() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        !self.0.is_empty()
    }

    pub fn contains(&self, id: &StateNodeId) -> bool {
        self.0.contains(id)
    }

    pub fn insert(&mut self, id: StateNodeId) -> bool {
        self.0.insert(id)
    }

    pub fn remove(&mut self, id: &StateNodeId) -> bool {
        self.0.remove(id)
    }

    /// Returns a copy with the given ids added.
    pub fn with<'a, I>(&self, ids: I) -> Self
    where
        I: IntoIterator<Item = &'a StateNodeId>,
    {
        let mut next = self.clone();
        next.0.extend(ids.into_iter().cloned());
        next
    }

    /// Returns a copy with the given ids removed.
    pub fn without<'a, I>(&self, ids: I) -> Self
    where
        I: IntoIterator<Item = &'a StateNodeId>,
    {
        let mut next = self.clone();
        for id in ids {
            next.0.remove(id);
        }
        next
    }

    pub fn union(&self, other: &Configuration) -> Self {
        Self(self.0.union(&other.0).cloned().collect())
    }

    pub fn difference(&self, other: &Configuration) -> Self {
        Self(self.0.difference(&other.0).cloned().collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = &StateNodeId> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if every member's ancestors are members too.
    pub fn is_consistent(&self) -> bool {
        self.0.iter().all(|id| {
            let mut current = id.parent();
            while let Some(parent) = current {
                if !self.0.contains(&parent) {
                    return false;
                }
                current = parent.parent();
            }
            true
        })
    }
}

impl FromIterator<StateNodeId> for Configuration {
    fn from_iter<T: IntoIterator<Item = StateNodeId>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Configuration {
    type Item = &'a StateNodeId;
    type IntoIter = std::collections::btree_set::Iter<'a, StateNodeId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", id)?;
        }
        f.write_str("}")
    }
}
