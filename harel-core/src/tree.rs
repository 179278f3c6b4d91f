//! The built state-node tree.
//!
//! Nodes live in an arena indexed by [`NodeIndex`]. Nodes are allocated in
//! pre-order, so comparing indices compares document order.

use crate::action::Action;
use crate::configuration::Configuration;
use crate::error::CoreError;
use crate::guard::{Guard, GuardDef};
use crate::id::{StateNodeId, PATH_SEPARATOR};
use crate::node::{NodeKindDef, StateNodeDef, TransitionDef};
use crate::service::Service;
use crate::transition::Transition;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Position of a node in the arena (and in document order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeIndex(usize);

impl NodeIndex {
    pub fn get(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Initial transition of a compound node.
pub struct InitialTransition<C> {
    pub target: NodeIndex,
    pub actions: Vec<Action<C>>,
}

pub enum NodeKind<C> {
    Atomic,
    Final,
    Compound {
        children: Vec<NodeIndex>,
        initial: InitialTransition<C>,
    },
    Orthogonal {
        children: Vec<NodeIndex>,
    },
}

/// A built state node.
pub struct StateNode<C> {
    pub id: StateNodeId,
    pub index: NodeIndex,
    pub parent: Option<NodeIndex>,
    pub entry: Vec<Action<C>>,
    pub exit: Vec<Action<C>>,
    pub transitions: Vec<Transition<C>>,
    pub services: Vec<Service>,
    pub kind: NodeKind<C>,
}

impl<C> StateNode<C> {
    pub fn children(&self) -> &[NodeIndex] {
        match &self.kind {
            NodeKind::Compound { children, .. } | NodeKind::Orthogonal { children } => children,
            NodeKind::Atomic | NodeKind::Final => &[],
        }
    }

    pub fn depth(&self) -> usize {
        self.id.depth()
    }

    /// Atomic and final nodes have no children.
    pub fn is_atomic(&self) -> bool {
        matches!(self.kind, NodeKind::Atomic | NodeKind::Final)
    }

    pub fn is_final(&self) -> bool {
        matches!(self.kind, NodeKind::Final)
    }

    pub fn is_orthogonal(&self) -> bool {
        matches!(self.kind, NodeKind::Orthogonal { .. })
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            NodeKind::Atomic => "atomic",
            NodeKind::Final => "final",
            NodeKind::Compound { .. } => "compound",
            NodeKind::Orthogonal { .. } => "orthogonal",
        }
    }
}

impl<C> fmt::Debug for StateNode<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateNode")
            .field("id", &self.id)
            .field("kind", &self.kind_name())
            .field("children", &self.children())
            .field("transitions", &self.transitions)
            .field("services", &self.services)
            .finish()
    }
}

/// Immutable, shareable chart structure.
pub struct StateTree<C> {
    nodes: Vec<StateNode<C>>,
    index: HashMap<StateNodeId, NodeIndex>,
}

impl<C> StateTree<C> {
    /// Builds and validates a tree from its root definition.
    ///
    /// Fails with an authoring error on unknown targets, misplaced initial
    /// states, duplicate keys or service ids, and other structural mistakes.
    pub fn build(root: StateNodeDef<C>) -> Result<Self, CoreError> {
        let mut builder = Builder {
            nodes: Vec::new(),
            index: HashMap::new(),
            pending: Vec::new(),
            service_ids: HashSet::new(),
        };
        builder.allocate(root, None)?;

        let Builder {
            nodes,
            index,
            pending,
            ..
        } = builder;
        let mut tree = StateTree { nodes, index };

        for (owner, defs) in pending {
            let mut transitions = Vec::with_capacity(defs.len());
            for def in defs {
                transitions.push(tree.resolve_transition(owner, def)?);
            }
            tree.nodes[owner.0].transitions = transitions;
        }

        tracing::debug!(
            root = %tree.root_node().id,
            nodes = tree.len(),
            "built state tree"
        );
        Ok(tree)
    }

    pub fn root(&self) -> NodeIndex {
        NodeIndex(0)
    }

    pub fn root_node(&self) -> &StateNode<C> {
        &self.nodes[0]
    }

    pub fn node(&self, idx: NodeIndex) -> &StateNode<C> {
        &self.nodes[idx.0]
    }

    pub fn index_of(&self, id: &StateNodeId) -> Option<NodeIndex> {
        self.index.get(id).copied()
    }

    pub fn get(&self, id: &StateNodeId) -> Option<&StateNode<C>> {
        self.index_of(id).map(|idx| self.node(idx))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes in document order.
    pub fn iter(&self) -> impl Iterator<Item = &StateNode<C>> {
        self.nodes.iter()
    }

    /// Active nodes in document order.
    pub fn active_nodes(&self, configuration: &Configuration) -> Vec<NodeIndex> {
        self.nodes
            .iter()
            .filter(|n| configuration.contains(&n.id))
            .map(|n| n.index)
            .collect()
    }

    /// Ancestors of `node`, nearest first.
    pub fn parents(&self, node: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        std::iter::successors(self.node(node).parent, move |&p| self.node(p).parent)
    }

    /// Lowest common ancestor: the first node in `parents(a)` that is also in
    /// `parents(b)`. A node is never its own LCA.
    pub fn lca(&self, a: NodeIndex, b: NodeIndex) -> Option<NodeIndex> {
        let ancestors_of_b: HashSet<NodeIndex> = self.parents(b).collect();
        self.parents(a).find(|p| ancestors_of_b.contains(p))
    }

    /// The child of `ancestor` on the path from `ancestor` down to `node`.
    pub fn one_beneath(&self, node: NodeIndex, ancestor: NodeIndex) -> Option<NodeIndex> {
        std::iter::once(node)
            .chain(self.parents(node))
            .find(|&n| self.node(n).parent == Some(ancestor))
    }

    /// Every node strictly below `node`, in document order.
    pub fn descendants(&self, node: NodeIndex) -> Vec<NodeIndex> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeIndex> = self.node(node).children().iter().rev().copied().collect();
        while let Some(n) = stack.pop() {
            out.push(n);
            stack.extend(self.node(n).children().iter().rev().copied());
        }
        out
    }

    /// Ancestors of `node` up to but excluding `stop`, nearest first.
    pub fn ancestors_until(&self, node: NodeIndex, stop: NodeIndex) -> Vec<NodeIndex> {
        self.parents(node).take_while(|&p| p != stop).collect()
    }

    /// Active non-atomic nodes whose required children are not all active:
    /// compounds with no active child and orthogonals missing a region.
    pub fn unstable_nodes(&self, configuration: &Configuration) -> Vec<NodeIndex> {
        self.nodes
            .iter()
            .filter(|n| configuration.contains(&n.id) && self.is_unstable(n, configuration))
            .map(|n| n.index)
            .collect()
    }

    fn is_unstable(&self, node: &StateNode<C>, configuration: &Configuration) -> bool {
        match &node.kind {
            NodeKind::Atomic | NodeKind::Final => false,
            NodeKind::Compound { children, .. } => !children
                .iter()
                .any(|&c| configuration.contains(&self.node(c).id)),
            NodeKind::Orthogonal { children } => !children
                .iter()
                .all(|&c| configuration.contains(&self.node(c).id)),
        }
    }

    /// Returns true if `node` is active and has reached completion: a final
    /// node, a compound whose active child is final, or an orthogonal whose
    /// regions are all done.
    pub fn is_done(&self, node: NodeIndex, configuration: &Configuration) -> bool {
        let n = self.node(node);
        if !configuration.contains(&n.id) {
            return false;
        }
        match &n.kind {
            NodeKind::Atomic => false,
            NodeKind::Final => true,
            NodeKind::Compound { children, .. } => children.iter().any(|&c| {
                let child = self.node(c);
                child.is_final() && configuration.contains(&child.id)
            }),
            NodeKind::Orthogonal { children } => {
                children.iter().all(|&c| self.is_done(c, configuration))
            }
        }
    }

    /// Resolves a target name written on a transition of `source`.
    ///
    /// `#a.b.c` is an absolute path from the root. Anything else is a dotted
    /// path resolved from the parent of `source` (a sibling), or from
    /// `source` itself when it is the root.
    pub fn resolve_target(&self, source: NodeIndex, target: &str) -> Result<NodeIndex, CoreError> {
        let unknown = || CoreError::UnknownTarget {
            state: self.node(source).id.to_string(),
            target: target.to_string(),
        };

        if let Some(absolute) = target.strip_prefix('#') {
            let id = StateNodeId::parse(absolute).ok_or_else(unknown)?;
            return self.index_of(&id).ok_or_else(unknown);
        }

        let anchor = self.node(source).parent.unwrap_or(source);
        let mut id = self.node(anchor).id.clone();
        for key in target.split(PATH_SEPARATOR) {
            if key.is_empty() {
                return Err(unknown());
            }
            id = id.child(key);
        }
        self.index_of(&id).ok_or_else(unknown)
    }

    fn resolve_transition(
        &self,
        owner: NodeIndex,
        def: TransitionDef<C>,
    ) -> Result<Transition<C>, CoreError> {
        let owner_id = &self.node(owner).id;

        if def.forbidden {
            if !def.targets.is_empty() || !def.actions.is_empty() || def.guard.is_some() {
                return Err(CoreError::InvalidDefinition {
                    reason: format!(
                        "{}: forbidden transition cannot have targets, actions or a guard",
                        owner_id
                    ),
                });
            }
            return Ok(Transition::Forbidden { event: def.event });
        }

        let mut targets = Vec::with_capacity(def.targets.len());
        for name in &def.targets {
            let target = self.resolve_target(owner, name)?;
            if target == self.root() {
                return Err(CoreError::InvalidDefinition {
                    reason: format!("{}: the root state cannot be a transition target", owner_id),
                });
            }
            targets.push(target);
        }

        let guard = match def.guard {
            None => None,
            Some(GuardDef::InState(name)) => {
                let state = self.resolve_target(owner, &name)?;
                Some(Guard::InState(self.node(state).id.clone()))
            }
            Some(GuardDef::Context(pred)) => Some(Guard::Context(pred)),
            Some(GuardDef::ContextAndEvent(pred)) => Some(Guard::ContextAndEvent(pred)),
        };

        Ok(match guard {
            None => Transition::Unguarded {
                source: owner,
                event: def.event,
                targets,
                actions: def.actions,
            },
            Some(guard) => Transition::Guarded {
                source: owner,
                event: def.event,
                guard,
                targets,
                actions: def.actions,
            },
        })
    }
}

impl<C> fmt::Debug for StateTree<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.nodes.iter()).finish()
    }
}

struct Builder<C> {
    nodes: Vec<StateNode<C>>,
    index: HashMap<StateNodeId, NodeIndex>,
    pending: Vec<(NodeIndex, Vec<TransitionDef<C>>)>,
    service_ids: HashSet<String>,
}

impl<C> Builder<C> {
    fn allocate(
        &mut self,
        def: StateNodeDef<C>,
        parent: Option<NodeIndex>,
    ) -> Result<NodeIndex, CoreError> {
        validate_key(&def.key)?;
        let id = match parent {
            Some(p) => self.nodes[p.0].id.child(def.key.as_str()),
            None => StateNodeId::root(def.key.as_str()),
        };
        let invalid = |reason: &str| CoreError::InvalidDefinition {
            reason: format!("{}: {}", id, reason),
        };

        let StateNodeDef {
            kind,
            children,
            entry,
            exit,
            transitions,
            services,
            ..
        } = def;

        match &kind {
            NodeKindDef::Atomic | NodeKindDef::Final if !children.is_empty() => {
                return Err(invalid(&format!("{} state cannot have children", kind.name())));
            }
            NodeKindDef::Compound { .. } | NodeKindDef::Orthogonal if children.is_empty() => {
                return Err(invalid(&format!(
                    "{} state needs at least one child",
                    kind.name()
                )));
            }
            NodeKindDef::Final if !transitions.is_empty() || !services.is_empty() => {
                return Err(invalid("final state cannot declare transitions or services"));
            }
            _ => {}
        }

        let mut keys = HashSet::new();
        for child in &children {
            if !keys.insert(child.key.as_str()) {
                return Err(invalid(&format!("duplicate child key '{}'", child.key)));
            }
        }

        let mut resolved = Vec::with_capacity(services.len());
        for (i, service) in services.into_iter().enumerate() {
            let service_id = service
                .id
                .unwrap_or_else(|| format!("{}:invoke[{}]", id, i));
            if !self.service_ids.insert(service_id.clone()) {
                return Err(invalid(&format!("duplicate service id '{}'", service_id)));
            }
            resolved.push(Service {
                id: service_id,
                src: service.src,
                input: service.input,
            });
        }

        let idx = NodeIndex(self.nodes.len());
        self.index.insert(id.clone(), idx);
        self.pending.push((idx, transitions));
        self.nodes.push(StateNode {
            id,
            index: idx,
            parent,
            entry,
            exit,
            transitions: Vec::new(),
            services: resolved,
            kind: NodeKind::Atomic,
        });

        let mut child_indices = Vec::with_capacity(children.len());
        for child in children {
            child_indices.push(self.allocate(child, Some(idx))?);
        }

        let kind = match kind {
            NodeKindDef::Atomic => NodeKind::Atomic,
            NodeKindDef::Final => NodeKind::Final,
            NodeKindDef::Orthogonal => NodeKind::Orthogonal {
                children: child_indices,
            },
            NodeKindDef::Compound {
                initial,
                initial_actions,
            } => {
                let target = child_indices
                    .iter()
                    .copied()
                    .find(|c| self.nodes[c.0].id.key() == initial)
                    .ok_or_else(|| CoreError::InvalidDefinition {
                        reason: format!(
                            "{}: initial state '{}' is not a child",
                            self.nodes[idx.0].id, initial
                        ),
                    })?;
                NodeKind::Compound {
                    children: child_indices,
                    initial: InitialTransition {
                        target,
                        actions: initial_actions,
                    },
                }
            }
        };
        self.nodes[idx.0].kind = kind;

        Ok(idx)
    }
}

fn validate_key(key: &str) -> Result<(), CoreError> {
    if key.is_empty() || key.contains(PATH_SEPARATOR) || key.starts_with('#') {
        return Err(CoreError::InvalidDefinition {
            reason: format!("invalid state key '{}'", key),
        });
    }
    Ok(())
}
