//! Resolved transitions.

use crate::action::Action;
use crate::configuration::Configuration;
use crate::event::{Event, EventPattern};
use crate::guard::Guard;
use crate::id::StateNodeId;
use crate::tree::NodeIndex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A transition owned by a state node, with targets resolved to nodes.
pub enum Transition<C> {
    /// Swallows the event: no targets, no actions, but ancestors of the
    /// owning node do not see it.
    Forbidden { event: EventPattern },
    Unguarded {
        source: NodeIndex,
        event: EventPattern,
        targets: Vec<NodeIndex>,
        actions: Vec<Action<C>>,
    },
    Guarded {
        source: NodeIndex,
        event: EventPattern,
        guard: Guard<C>,
        targets: Vec<NodeIndex>,
        actions: Vec<Action<C>>,
    },
}

impl<C> Transition<C> {
    pub fn event(&self) -> &EventPattern {
        match self {
            Transition::Forbidden { event }
            | Transition::Unguarded { event, .. }
            | Transition::Guarded { event, .. } => event,
        }
    }

    pub fn source(&self) -> Option<NodeIndex> {
        match self {
            Transition::Forbidden { .. } => None,
            Transition::Unguarded { source, .. } | Transition::Guarded { source, .. } => {
                Some(*source)
            }
        }
    }

    /// Target nodes; empty for forbidden and internal transitions.
    pub fn targets(&self) -> &[NodeIndex] {
        match self {
            Transition::Forbidden { .. } => &[],
            Transition::Unguarded { targets, .. } | Transition::Guarded { targets, .. } => targets,
        }
    }

    pub fn actions(&self) -> &[Action<C>] {
        match self {
            Transition::Forbidden { .. } => &[],
            Transition::Unguarded { actions, .. } | Transition::Guarded { actions, .. } => actions,
        }
    }

    pub fn guard(&self) -> Option<&Guard<C>> {
        match self {
            Transition::Guarded { guard, .. } => Some(guard),
            _ => None,
        }
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(self, Transition::Forbidden { .. })
    }

    /// Returns true if the transition fires for `event`: the pattern matches
    /// and the guard, if any, holds.
    pub fn is_enabled(
        &self,
        owner: &StateNodeId,
        configuration: &Configuration,
        ctx: &C,
        event: &Event,
    ) -> bool {
        if !self.event().matches(owner, event) {
            return false;
        }
        match self.guard() {
            Some(guard) => guard.evaluate(configuration, ctx, &event.data()),
            None => true,
        }
    }
}

impl<C> fmt::Debug for Transition<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::Forbidden { event } => {
                f.debug_struct("Forbidden").field("event", event).finish()
            }
            Transition::Unguarded {
                source,
                event,
                targets,
                actions,
            } => f
                .debug_struct("Unguarded")
                .field("source", source)
                .field("event", event)
                .field("targets", targets)
                .field("actions", &actions.len())
                .finish(),
            Transition::Guarded {
                source,
                event,
                guard,
                targets,
                actions,
            } => f
                .debug_struct("Guarded")
                .field("source", source)
                .field("event", event)
                .field("guard", guard)
                .field("targets", targets)
                .field("actions", &actions.len())
                .finish(),
        }
    }
}

/// Stable reference to a transition: owning node and declaration index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransitionRef {
    pub source: StateNodeId,
    pub index: usize,
}

impl fmt::Display for TransitionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.source, self.index)
    }
}
