//! State node definitions.
//!
//! A chart is declared as a tree of [`StateNodeDef`]s and then built into a
//! [`StateTree`](crate::tree::StateTree), which resolves targets and
//! validates the structure.

use crate::action::Action;
use crate::event::EventPattern;
use crate::guard::GuardDef;
use crate::service::ServiceDef;
use std::time::Duration;

/// Kind of a declared state node.
pub enum NodeKindDef<C> {
    Atomic,
    Final,
    /// Exactly one child active at a time. `initial` names a direct child.
    Compound {
        initial: String,
        initial_actions: Vec<Action<C>>,
    },
    /// All children (regions) active together.
    Orthogonal,
}

impl<C> NodeKindDef<C> {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKindDef::Atomic => "atomic",
            NodeKindDef::Final => "final",
            NodeKindDef::Compound { .. } => "compound",
            NodeKindDef::Orthogonal => "orthogonal",
        }
    }
}

/// Declared state node.
pub struct StateNodeDef<C> {
    pub key: String,
    pub kind: NodeKindDef<C>,
    pub children: Vec<StateNodeDef<C>>,
    pub entry: Vec<Action<C>>,
    pub exit: Vec<Action<C>>,
    pub transitions: Vec<TransitionDef<C>>,
    pub services: Vec<ServiceDef>,
}

impl<C> StateNodeDef<C> {
    fn with_kind(key: impl Into<String>, kind: NodeKindDef<C>) -> Self {
        Self {
            key: key.into(),
            kind,
            children: Vec::new(),
            entry: Vec::new(),
            exit: Vec::new(),
            transitions: Vec::new(),
            services: Vec::new(),
        }
    }

    pub fn atomic(key: impl Into<String>) -> Self {
        Self::with_kind(key, NodeKindDef::Atomic)
    }

    pub fn final_state(key: impl Into<String>) -> Self {
        Self::with_kind(key, NodeKindDef::Final)
    }

    pub fn compound(key: impl Into<String>, initial: impl Into<String>) -> Self {
        Self::with_kind(
            key,
            NodeKindDef::Compound {
                initial: initial.into(),
                initial_actions: Vec::new(),
            },
        )
    }

    pub fn orthogonal(key: impl Into<String>) -> Self {
        Self::with_kind(key, NodeKindDef::Orthogonal)
    }

    pub fn child(mut self, child: StateNodeDef<C>) -> Self {
        self.children.push(child);
        self
    }

    pub fn entry(mut self, action: Action<C>) -> Self {
        self.entry.push(action);
        self
    }

    pub fn exit(mut self, action: Action<C>) -> Self {
        self.exit.push(action);
        self
    }

    /// Adds an action to the initial transition of a compound node.
    /// Ignored for other kinds.
    pub fn initial_action(mut self, action: Action<C>) -> Self {
        if let NodeKindDef::Compound {
            initial_actions, ..
        } = &mut self.kind
        {
            initial_actions.push(action);
        }
        self
    }

    pub fn transition(mut self, transition: TransitionDef<C>) -> Self {
        self.transitions.push(transition);
        self
    }

    /// Shorthand for an unguarded named-event transition to one target.
    pub fn on(self, event: impl Into<String>, target: impl Into<String>) -> Self {
        self.transition(TransitionDef::on(event).to(target))
    }

    /// Shorthand for a forbidden transition.
    pub fn forbid(self, event: impl Into<String>) -> Self {
        self.transition(TransitionDef::forbidden(EventPattern::Named(event.into())))
    }

    pub fn invoke(mut self, service: ServiceDef) -> Self {
        self.services.push(service);
        self
    }
}

/// Declared transition. Targets are relative names or `#`-prefixed
/// absolute paths, resolved when the tree is built.
pub struct TransitionDef<C> {
    pub event: EventPattern,
    pub targets: Vec<String>,
    pub guard: Option<GuardDef<C>>,
    pub actions: Vec<Action<C>>,
    pub forbidden: bool,
}

impl<C> TransitionDef<C> {
    pub fn new(event: EventPattern) -> Self {
        Self {
            event,
            targets: Vec::new(),
            guard: None,
            actions: Vec::new(),
            forbidden: false,
        }
    }

    pub fn on(event: impl Into<String>) -> Self {
        Self::new(EventPattern::Named(event.into()))
    }

    /// Eventless transition, checked after states are entered.
    pub fn always() -> Self {
        Self::new(EventPattern::Immediate)
    }

    /// Fires `delay` after the source was entered.
    pub fn after(delay: Duration) -> Self {
        Self::new(EventPattern::Delayed(delay))
    }

    /// Fires when the source reaches a final configuration.
    pub fn on_done() -> Self {
        Self::new(EventPattern::Done)
    }

    pub fn on_service_success(service_id: impl Into<String>) -> Self {
        Self::new(EventPattern::ServiceSuccess(service_id.into()))
    }

    pub fn on_service_error(service_id: impl Into<String>) -> Self {
        Self::new(EventPattern::ServiceError(service_id.into()))
    }

    pub fn on_execution_error() -> Self {
        Self::new(EventPattern::ExecutionError)
    }

    pub fn forbidden(event: EventPattern) -> Self {
        Self {
            forbidden: true,
            ..Self::new(event)
        }
    }

    pub fn to(mut self, target: impl Into<String>) -> Self {
        self.targets.push(target.into());
        self
    }

    pub fn guard(mut self, guard: GuardDef<C>) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn action(mut self, action: Action<C>) -> Self {
        self.actions.push(action);
        self
    }
}
