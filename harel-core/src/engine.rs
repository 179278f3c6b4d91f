//! Resolution engine.
//!
//! Pure and synchronous: given a tree, a state and an event queue, the
//! engine selects transitions, computes and applies microsteps, stabilizes
//! the configuration and drains the queue. Side effects outside the state
//! (service start and cancellation) are delegated to [`LifecycleHooks`].

use crate::action::Action;
use crate::configuration::Configuration;
use crate::error::CoreError;
use crate::event::{Event, EventPattern, Priority};
use crate::executor::ActionExecutor;
use crate::id::StateNodeId;
use crate::queue::EventQueue;
use crate::transition::{Transition, TransitionRef};
use crate::tree::{NodeIndex, NodeKind, StateNode, StateTree};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// What to do with a service error no active state handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceErrorPolicy {
    /// Absorb it with a warning.
    #[default]
    Ignore,
    /// Fault the instance.
    Fail,
}

impl FromStr for ServiceErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ignore" => Ok(ServiceErrorPolicy::Ignore),
            "fail" => Ok(ServiceErrorPolicy::Fail),
            other => Err(format!("unknown service error policy '{}'", other)),
        }
    }
}

/// Engine limits and policies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on microsteps applied in one drain.
    pub max_microsteps: usize,
    pub service_errors: ServiceErrorPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_microsteps: 10_000,
            service_errors: ServiceErrorPolicy::Ignore,
        }
    }
}

/// Configuration plus context of one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State<C> {
    pub configuration: Configuration,
    pub context: C,
}

impl<C> State<C> {
    pub fn new(context: C) -> Self {
        Self {
            configuration: Configuration::not_initialized(),
            context,
        }
    }
}

/// Callbacks fired as nodes are entered and exited.
///
/// `node_exited` fires after the node's exit actions and before the
/// transition's actions. `node_entered` fires after the node's entry actions.
pub trait LifecycleHooks<C> {
    fn node_entered(&mut self, _node: &StateNode<C>) {}
    fn node_exited(&mut self, _node: &StateNode<C>) {}
}

/// Hooks that do nothing.
pub struct NoHooks;

impl<C> LifecycleHooks<C> for NoHooks {}

/// Why a microstep was applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MicrostepKind {
    Initialization,
    Stabilization,
    Event {
        event: Event,
        transition: TransitionRef,
    },
}

impl MicrostepKind {
    pub fn label(&self) -> &'static str {
        match self {
            MicrostepKind::Initialization => "initialization",
            MicrostepKind::Stabilization => "stabilization",
            MicrostepKind::Event { .. } => "event",
        }
    }
}

/// An applied microstep: exited nodes deepest first, entered nodes
/// outermost first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Microstep {
    pub kind: MicrostepKind,
    pub exited: Vec<StateNodeId>,
    pub entered: Vec<StateNodeId>,
}

impl fmt::Display for Microstep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            MicrostepKind::Event { event, transition } => {
                write!(f, "{} via {}", event, transition)?;
            }
            other => f.write_str(other.label())?,
        }
        write!(
            f,
            ": exited [{}] entered [{}]",
            join_ids(&self.exited),
            join_ids(&self.entered)
        )
    }
}

/// A microstep before it is applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlannedStep {
    pub exited: Vec<NodeIndex>,
    pub entered: Vec<NodeIndex>,
}

/// Why an instance faulted.
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// An action failed and no active state handled the execution error.
    Execution { message: String },
    /// A service failed, nothing handled it and the policy is `fail`.
    Service { service_id: String, message: String },
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::Execution { message } => write!(f, "unhandled execution error: {}", message),
            Fault::Service {
                service_id,
                message,
            } => write!(f, "unhandled failure of service '{}': {}", service_id, message),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrainOutcome {
    /// The queue is empty and the instance is still active.
    Quiescent,
    /// The root reached a final configuration.
    Completed,
    Faulted(Fault),
}

/// Result of draining the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct DrainReport {
    pub microsteps: Vec<Microstep>,
    pub processed: usize,
    pub outcome: DrainOutcome,
}

/// Result of processing one event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepReport {
    pub microsteps: Vec<Microstep>,
    /// Some active node had a matching transition (forbidden included).
    pub handled: bool,
    /// The root is done.
    pub completed: bool,
}

/// What a microstep is applied for: a label for action failures, the
/// triggering event's data and the trace kind.
struct Cause<'a> {
    origin: &'a str,
    data: &'a Value,
    kind: MicrostepKind,
}

/// The resolution engine for one tree.
pub struct Engine<C> {
    tree: Arc<StateTree<C>>,
    config: EngineConfig,
}

impl<C> Clone for Engine<C> {
    fn clone(&self) -> Self {
        Self {
            tree: self.tree.clone(),
            config: self.config.clone(),
        }
    }
}

impl<C: Clone> Engine<C> {
    pub fn new(tree: Arc<StateTree<C>>, config: EngineConfig) -> Self {
        Self { tree, config }
    }

    pub fn tree(&self) -> &Arc<StateTree<C>> {
        &self.tree
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Selects the transitions taken for `event`, as (owner, index) pairs in
    /// document order.
    ///
    /// Deeper nodes are considered first. Once a node yields a match, its
    /// ancestors are not considered at all.
    pub fn select_transitions(
        &self,
        configuration: &Configuration,
        ctx: &C,
        event: &Event,
    ) -> Vec<(NodeIndex, usize)> {
        self.select_by(configuration, |node, t| {
            t.is_enabled(&node.id, configuration, ctx, event)
        })
    }

    fn select_by<F>(&self, configuration: &Configuration, mut matches: F) -> Vec<(NodeIndex, usize)>
    where
        F: FnMut(&StateNode<C>, &Transition<C>) -> bool,
    {
        let tree = &self.tree;
        let mut active = tree.active_nodes(configuration);
        active.sort_by(|a, b| {
            tree.node(*b)
                .depth()
                .cmp(&tree.node(*a).depth())
                .then(a.cmp(b))
        });

        let mut blocked = HashSet::new();
        let mut selected = Vec::new();
        for idx in active {
            if blocked.contains(&idx) {
                continue;
            }
            let node = tree.node(idx);
            if let Some(i) = node.transitions.iter().position(|t| matches(node, t)) {
                selected.push((idx, i));
                blocked.extend(tree.parents(idx));
            }
        }

        selected.sort_by_key(|&(idx, _)| idx);
        selected
    }

    /// Computes the microstep taking `source` to `target` from `configuration`.
    pub fn plan_microstep(
        &self,
        configuration: &Configuration,
        source: NodeIndex,
        target: NodeIndex,
    ) -> Result<PlannedStep, CoreError> {
        let tree = &self.tree;
        let (lca, boundary) = match tree.lca(source, target) {
            Some(lca) => {
                let boundary =
                    tree.one_beneath(source, lca)
                        .ok_or_else(|| CoreError::InvariantViolation {
                            reason: format!(
                                "{} is not below {}",
                                tree.node(source).id,
                                tree.node(lca).id
                            ),
                        })?;
                (lca, Some(boundary))
            }
            // Transitions declared on the root stay inside it.
            None if source == tree.root() => (source, None),
            None => {
                return Err(CoreError::InvariantViolation {
                    reason: format!(
                        "{} and {} share no ancestor",
                        tree.node(source).id,
                        tree.node(target).id
                    ),
                })
            }
        };

        let is_active = |n: &NodeIndex| configuration.contains(&tree.node(*n).id);

        let mut exit_roots: Vec<NodeIndex> = boundary.into_iter().collect();
        match &tree.node(lca).kind {
            NodeKind::Orthogonal { .. } => {
                if let Some(branch) = tree.one_beneath(target, lca) {
                    if !exit_roots.contains(&branch) {
                        exit_roots.push(branch);
                    }
                }
            }
            NodeKind::Compound { children, .. } if boundary.is_none() => {
                exit_roots.extend(children.iter().copied().filter(is_active));
            }
            _ => {}
        }

        let mut exited = Vec::new();
        for root in exit_roots {
            let mut branch: Vec<NodeIndex> = std::iter::once(root)
                .chain(tree.descendants(root))
                .filter(is_active)
                .collect();
            branch.reverse();
            exited.extend(branch);
        }

        let remaining = configuration.without(exited.iter().map(|&n| &tree.node(n).id));
        let mut entered = tree.ancestors_until(target, lca);
        entered.reverse();
        entered.push(target);
        entered.retain(|&n| !remaining.contains(&tree.node(n).id));

        Ok(PlannedStep { exited, entered })
    }

    /// Next stabilization microstep, if any node is unstable: the initial
    /// child of a compound, or every missing region of an orthogonal node.
    pub fn plan_stabilization(&self, configuration: &Configuration) -> Option<(NodeIndex, PlannedStep)> {
        let unstable = *self.tree.unstable_nodes(configuration).first()?;
        let entered = match &self.tree.node(unstable).kind {
            NodeKind::Compound { initial, .. } => vec![initial.target],
            NodeKind::Orthogonal { children } => children
                .iter()
                .copied()
                .filter(|c| !configuration.contains(&self.tree.node(*c).id))
                .collect(),
            NodeKind::Atomic | NodeKind::Final => return None,
        };
        Some((
            unstable,
            PlannedStep {
                exited: Vec::new(),
                entered,
            },
        ))
    }

    /// Processes one dequeued event: applies its microsteps, stabilizes, and
    /// queues any resulting completion and eventless events.
    pub fn process(
        &self,
        state: &mut State<C>,
        event: &Event,
        queue: &mut EventQueue,
        hooks: &mut dyn LifecycleHooks<C>,
    ) -> Result<StepReport, CoreError> {
        let mut report = StepReport::default();
        let data = event.data();
        let data: &Value = &data;

        if let Event::Initialize = event {
            report.handled = true;
            if state.configuration.is_initialized() {
                return Ok(report);
            }
            let step = PlannedStep {
                exited: Vec::new(),
                entered: vec![self.tree.root()],
            };
            report.microsteps.push(self.apply(
                state,
                queue,
                hooks,
                &step,
                &[],
                Cause {
                    origin: "initialize",
                    data,
                    kind: MicrostepKind::Initialization,
                },
            ));
        } else {
            if !state.configuration.is_initialized() {
                return Err(CoreError::InvariantViolation {
                    reason: format!("event '{}' processed before initialization", event),
                });
            }

            let selected = self.select_transitions(&state.configuration, &state.context, event);
            report.handled = !selected.is_empty();

            for (owner, index) in selected {
                let node = self.tree.node(owner);
                let transition = &node.transitions[index];
                if transition.is_forbidden() {
                    trace!(state = %node.id, event = %event, "event forbidden");
                    continue;
                }
                if !state.configuration.contains(&node.id) {
                    debug!(state = %node.id, event = %event, "source already exited, skipping transition");
                    continue;
                }

                let tref = TransitionRef {
                    source: node.id.clone(),
                    index,
                };
                let origin = format!("transition {}", tref);
                let kind = MicrostepKind::Event {
                    event: event.clone(),
                    transition: tref,
                };

                if transition.targets().is_empty() {
                    report.microsteps.push(self.apply(
                        state,
                        queue,
                        hooks,
                        &PlannedStep::default(),
                        transition.actions(),
                        Cause {
                            origin: &origin,
                            data,
                            kind,
                        },
                    ));
                    continue;
                }

                for (i, &target) in transition.targets().iter().enumerate() {
                    let step = self.plan_microstep(&state.configuration, owner, target)?;
                    let actions: &[Action<C>] = if i == 0 { transition.actions() } else { &[] };
                    report.microsteps.push(self.apply(
                        state,
                        queue,
                        hooks,
                        &step,
                        actions,
                        Cause {
                            origin: &origin,
                            data,
                            kind: kind.clone(),
                        },
                    ));
                }
            }
        }

        self.stabilize(state, queue, hooks, data, &mut report.microsteps);

        let entered: Vec<&StateNodeId> = report
            .microsteps
            .iter()
            .flat_map(|m| m.entered.iter())
            .collect();
        if !entered.is_empty() {
            self.queue_done_events(&state.configuration, &entered, queue);
            report.completed = self.is_complete(&state.configuration);
        }

        // Targetless steps change the context too, so guards on eventless
        // transitions are re-checked after any microstep.
        if !report.microsteps.is_empty()
            && !report.completed
            && self.has_eventless(&state.configuration)
            && !queue.contains(&Event::Immediate, Priority::Stabilization)
        {
            queue.enqueue(Event::Immediate, Priority::Stabilization);
        }

        Ok(report)
    }

    /// Processes queued events until the queue is empty, the instance
    /// completes, or an unhandled error faults it.
    pub fn drain(
        &self,
        state: &mut State<C>,
        queue: &mut EventQueue,
        hooks: &mut dyn LifecycleHooks<C>,
    ) -> Result<DrainReport, CoreError> {
        let mut microsteps = Vec::new();
        let mut processed = 0;

        while let Some((event, priority)) = queue.dequeue() {
            trace!(event = %event, ?priority, "dequeued event");
            let step = self.process(state, &event, queue, hooks)?;
            processed += 1;
            microsteps.extend(step.microsteps);

            if microsteps.len() > self.config.max_microsteps {
                queue.clear();
                return Err(CoreError::MicrostepLimit {
                    limit: self.config.max_microsteps,
                });
            }

            if step.completed {
                queue.clear();
                return Ok(DrainReport {
                    microsteps,
                    processed,
                    outcome: DrainOutcome::Completed,
                });
            }

            if !step.handled {
                if let Some(fault) = self.unhandled(&event) {
                    queue.clear();
                    return Ok(DrainReport {
                        microsteps,
                        processed,
                        outcome: DrainOutcome::Faulted(fault),
                    });
                }
            }
        }

        Ok(DrainReport {
            microsteps,
            processed,
            outcome: DrainOutcome::Quiescent,
        })
    }

    /// Named events some active node would take, ignoring guards and
    /// honouring forbidden transitions. Sorted.
    pub fn next_events(&self, configuration: &Configuration) -> Vec<String> {
        let mut candidates: Vec<&str> = Vec::new();
        for idx in self.tree.active_nodes(configuration) {
            for t in &self.tree.node(idx).transitions {
                if let Some(name) = t.event().name() {
                    if !candidates.contains(&name) {
                        candidates.push(name);
                    }
                }
            }
        }

        let mut names: Vec<String> = candidates
            .into_iter()
            .filter(|name| {
                let event = Event::named(*name);
                self.select_by(configuration, |node, t| t.event().matches(&node.id, &event))
                    .into_iter()
                    .any(|(idx, i)| !self.tree.node(idx).transitions[i].is_forbidden())
            })
            .map(str::to_string)
            .collect();
        names.sort();
        names
    }

    /// Returns true when the root has reached a final configuration.
    pub fn is_complete(&self, configuration: &Configuration) -> bool {
        self.tree.is_done(self.tree.root(), configuration)
    }

    fn apply(
        &self,
        state: &mut State<C>,
        queue: &mut EventQueue,
        hooks: &mut dyn LifecycleHooks<C>,
        step: &PlannedStep,
        actions: &[Action<C>],
        cause: Cause<'_>,
    ) -> Microstep {
        let Cause { origin, data, kind } = cause;
        for &idx in &step.exited {
            let node = self.tree.node(idx);
            ActionExecutor::execute_block(
                &node.exit,
                &mut state.context,
                data,
                queue,
                &format!("exit {}", node.id),
            );
            hooks.node_exited(node);
        }
        for &idx in &step.exited {
            state.configuration.remove(&self.tree.node(idx).id);
        }

        ActionExecutor::execute_block(actions, &mut state.context, data, queue, origin);

        for &idx in &step.entered {
            let node = self.tree.node(idx);
            state.configuration.insert(node.id.clone());
            ActionExecutor::execute_block(
                &node.entry,
                &mut state.context,
                data,
                queue,
                &format!("entry {}", node.id),
            );
            hooks.node_entered(node);
        }

        let microstep = Microstep {
            kind,
            exited: self.ids(&step.exited),
            entered: self.ids(&step.entered),
        };
        debug!(
            kind = microstep.kind.label(),
            exited = %join_ids(&microstep.exited),
            entered = %join_ids(&microstep.entered),
            "applied microstep"
        );
        microstep
    }

    fn stabilize(
        &self,
        state: &mut State<C>,
        queue: &mut EventQueue,
        hooks: &mut dyn LifecycleHooks<C>,
        data: &Value,
        microsteps: &mut Vec<Microstep>,
    ) {
        while let Some((unstable, step)) = self.plan_stabilization(&state.configuration) {
            let node = self.tree.node(unstable);
            let actions: &[Action<C>] = match &node.kind {
                NodeKind::Compound { initial, .. } => &initial.actions,
                _ => &[],
            };
            microsteps.push(self.apply(
                state,
                queue,
                hooks,
                &step,
                actions,
                Cause {
                    origin: &format!("initial {}", node.id),
                    data,
                    kind: MicrostepKind::Stabilization,
                },
            ));
        }
    }

    fn queue_done_events(
        &self,
        configuration: &Configuration,
        entered: &[&StateNodeId],
        queue: &mut EventQueue,
    ) {
        let root = self.tree.root();
        let mut checked = HashSet::new();

        for id in entered {
            let Some(idx) = self.tree.index_of(id) else {
                continue;
            };
            if !self.tree.node(idx).is_final() || !configuration.contains(id) {
                continue;
            }
            for ancestor in self.tree.parents(idx) {
                if ancestor == root || !checked.insert(ancestor) {
                    continue;
                }
                if self.tree.is_done(ancestor, configuration) {
                    let done = Event::Done {
                        state: self.tree.node(ancestor).id.clone(),
                    };
                    if !queue.contains(&done, Priority::CurrentMacrostep) {
                        debug!(state = %self.tree.node(ancestor).id, "state done");
                        queue.enqueue(done, Priority::CurrentMacrostep);
                    }
                }
            }
        }
    }

    fn has_eventless(&self, configuration: &Configuration) -> bool {
        self.tree.active_nodes(configuration).into_iter().any(|idx| {
            self.tree
                .node(idx)
                .transitions
                .iter()
                .any(|t| *t.event() == EventPattern::Immediate)
        })
    }

    fn unhandled(&self, event: &Event) -> Option<Fault> {
        match event {
            Event::ExecutionError { message } => Some(Fault::Execution {
                message: message.clone(),
            }),
            Event::ServiceError {
                service_id,
                message,
            } => match self.config.service_errors {
                ServiceErrorPolicy::Fail => Some(Fault::Service {
                    service_id: service_id.clone(),
                    message: message.clone(),
                }),
                ServiceErrorPolicy::Ignore => {
                    warn!(service_id = %service_id, error = %message, "unhandled service error ignored");
                    None
                }
            },
            other => {
                debug!(event = %other, "event not handled by any active state");
                None
            }
        }
    }

    fn ids(&self, nodes: &[NodeIndex]) -> Vec<StateNodeId> {
        nodes.iter().map(|&n| self.tree.node(n).id.clone()).collect()
    }
}

fn join_ids(ids: &[StateNodeId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ActionError;
    use crate::guard::GuardDef;
    use crate::node::{StateNodeDef, TransitionDef};
    use proptest::prelude::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn id(s: &str) -> StateNodeId {
        StateNodeId::parse(s).unwrap()
    }

    fn config(ids: &[&str]) -> Configuration {
        ids.iter().map(|s| id(s)).collect()
    }

    fn engine<C: Clone>(root: StateNodeDef<C>) -> Engine<C> {
        Engine::new(
            Arc::new(StateTree::build(root).unwrap()),
            EngineConfig::default(),
        )
    }

    /// Runs Initialize and drains.
    fn start<C: Clone>(engine: &Engine<C>, ctx: C) -> (State<C>, EventQueue, DrainReport) {
        let mut state = State::new(ctx);
        let mut queue = EventQueue::new();
        queue.enqueue(Event::Initialize, Priority::Stabilization);
        let report = engine.drain(&mut state, &mut queue, &mut NoHooks).unwrap();
        (state, queue, report)
    }

    fn send<C: Clone>(
        engine: &Engine<C>,
        state: &mut State<C>,
        queue: &mut EventQueue,
        event: Event,
    ) -> DrainReport {
        queue.enqueue(event, Priority::NextMacrostep);
        engine.drain(state, queue, &mut NoHooks).unwrap()
    }

    #[derive(Default)]
    struct Recorder(Vec<String>);

    impl<C> LifecycleHooks<C> for Recorder {
        fn node_entered(&mut self, node: &StateNode<C>) {
            self.0.push(format!("enter {}", node.id));
        }
        fn node_exited(&mut self, node: &StateNode<C>) {
            self.0.push(format!("exit {}", node.id));
        }
    }

    fn push(label: &'static str) -> Action<Vec<String>> {
        Action::assign(move |log: &mut Vec<String>, _: &Value| {
            log.push(label.to_string());
            Ok(())
        })
    }

    #[test]
    fn test_sibling_transition() {
        let engine = engine(
            StateNodeDef::<()>::compound("S", "A")
                .child(StateNodeDef::atomic("A").on("go", "B"))
                .child(StateNodeDef::atomic("B")),
        );

        let (mut state, mut queue, _) = start(&engine, ());
        assert_eq!(state.configuration, config(&["S", "S.A"]));

        let report = send(&engine, &mut state, &mut queue, Event::named("go"));
        assert_eq!(state.configuration, config(&["S", "S.B"]));
        assert_eq!(report.microsteps.len(), 1);
        assert_eq!(report.microsteps[0].exited, vec![id("S.A")]);
        assert_eq!(report.microsteps[0].entered, vec![id("S.B")]);
        assert_eq!(
            report.microsteps[0].kind,
            MicrostepKind::Event {
                event: Event::named("go"),
                transition: TransitionRef {
                    source: id("S.A"),
                    index: 0
                }
            }
        );
        assert_eq!(report.outcome, DrainOutcome::Quiescent);
    }

    #[test]
    fn test_orthogonal_start() {
        let engine = engine(
            StateNodeDef::<()>::orthogonal("O")
                .child(StateNodeDef::compound("R1", "A1").child(StateNodeDef::atomic("A1")))
                .child(StateNodeDef::compound("R2", "A2").child(StateNodeDef::atomic("A2"))),
        );

        let (state, _, report) = start(&engine, ());
        assert_eq!(
            state.configuration,
            config(&["O", "O.R1", "O.R1.A1", "O.R2", "O.R2.A2"])
        );
        assert_eq!(report.microsteps[0].kind, MicrostepKind::Initialization);
        assert_eq!(report.microsteps[1].kind, MicrostepKind::Stabilization);
        assert_eq!(report.microsteps[1].entered, vec![id("O.R1"), id("O.R2")]);
        assert_eq!(report.microsteps.len(), 4);
    }

    #[test]
    fn test_initialize_twice_is_noop() {
        let engine = engine(StateNodeDef::<()>::compound("S", "A").child(StateNodeDef::atomic("A")));
        let (mut state, mut queue, _) = start(&engine, ());

        queue.enqueue(Event::Initialize, Priority::Stabilization);
        let report = engine.drain(&mut state, &mut queue, &mut NoHooks).unwrap();
        assert!(report.microsteps.is_empty());
        assert_eq!(state.configuration, config(&["S", "S.A"]));
    }

    #[test]
    fn test_event_before_initialize_is_rejected() {
        let engine = engine(StateNodeDef::<()>::compound("S", "A").child(StateNodeDef::atomic("A")));
        let mut state = State::new(());
        let mut queue = EventQueue::new();
        let result = engine.process(&mut state, &Event::named("x"), &mut queue, &mut NoHooks);
        assert!(matches!(result, Err(CoreError::InvariantViolation { .. })));
    }

    #[test]
    fn test_descendant_wins_and_ancestor_not_evaluated() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let engine = engine(
            StateNodeDef::<()>::compound("S", "P")
                .child(
                    StateNodeDef::compound("P", "C")
                        .transition(TransitionDef::on("go").to("Q").guard(GuardDef::context(
                            move |_: &()| {
                                counter.fetch_add(1, Ordering::SeqCst);
                                true
                            },
                        )))
                        .child(StateNodeDef::atomic("C").on("go", "D"))
                        .child(StateNodeDef::atomic("D")),
                )
                .child(StateNodeDef::atomic("Q")),
        );

        let (mut state, mut queue, _) = start(&engine, ());
        send(&engine, &mut state, &mut queue, Event::named("go"));

        assert_eq!(state.configuration, config(&["S", "S.P", "S.P.D"]));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failed_guard_falls_through_to_ancestor() {
        let engine = engine(
            StateNodeDef::<u32>::compound("S", "P")
                .child(
                    StateNodeDef::compound("P", "C")
                        .on("go", "Q")
                        .child(StateNodeDef::atomic("C").transition(
                            TransitionDef::on("go")
                                .to("D")
                                .guard(GuardDef::context(|n: &u32| *n > 5)),
                        ))
                        .child(StateNodeDef::atomic("D")),
                )
                .child(StateNodeDef::atomic("Q")),
        );

        let (mut state, mut queue, _) = start(&engine, 1);
        send(&engine, &mut state, &mut queue, Event::named("go"));
        assert_eq!(state.configuration, config(&["S", "S.Q"]));
    }

    #[test]
    fn test_forbidden_blocks_ancestor() {
        let engine = engine(
            StateNodeDef::<()>::compound("S", "P")
                .child(
                    StateNodeDef::compound("P", "C")
                        .on("go", "Q")
                        .child(StateNodeDef::atomic("C").forbid("go"))
                        .child(StateNodeDef::atomic("D")),
                )
                .child(StateNodeDef::atomic("Q")),
        );

        let (mut state, mut queue, _) = start(&engine, ());
        let report = send(&engine, &mut state, &mut queue, Event::named("go"));

        assert!(report.microsteps.is_empty());
        assert_eq!(state.configuration, config(&["S", "S.P", "S.P.C"]));
        assert!(engine.next_events(&state.configuration).is_empty());
    }

    #[test]
    fn test_entry_exit_order() {
        let engine = engine(
            StateNodeDef::compound("S", "A")
                .child(
                    StateNodeDef::compound("A", "A1")
                        .exit(push("exit A"))
                        .child(StateNodeDef::atomic("A1").exit(push("exit A1"))),
                )
                .child(
                    StateNodeDef::compound("B", "B1")
                        .entry(push("entry B"))
                        .child(StateNodeDef::atomic("B1").entry(push("entry B1"))),
                )
                .transition(
                    TransitionDef::on("go")
                        .to("B")
                        .action(push("transition")),
                ),
        );

        let (mut state, mut queue, _) = start(&engine, Vec::new());
        state.context.clear();
        let mut hooks = Recorder::default();
        queue.enqueue(Event::named("go"), Priority::NextMacrostep);
        engine.drain(&mut state, &mut queue, &mut hooks).unwrap();

        assert_eq!(
            state.context,
            vec!["exit A1", "exit A", "transition", "entry B", "entry B1"]
        );
        assert_eq!(hooks.0, vec!["exit S.A.A1", "exit S.A", "enter S.B", "enter S.B.B1"]);
    }

    #[test]
    fn test_self_transition_reenters() {
        let engine = engine(
            StateNodeDef::compound("S", "A").child(
                StateNodeDef::atomic("A")
                    .entry(push("enter"))
                    .exit(push("exit"))
                    .on("again", "A"),
            ),
        );

        let (mut state, mut queue, _) = start(&engine, Vec::new());
        let report = send(&engine, &mut state, &mut queue, Event::named("again"));

        assert_eq!(report.microsteps[0].exited, vec![id("S.A")]);
        assert_eq!(report.microsteps[0].entered, vec![id("S.A")]);
        assert_eq!(state.context, vec!["enter", "exit", "enter"]);
    }

    #[test]
    fn test_internal_transition_keeps_configuration() {
        let engine = engine(
            StateNodeDef::compound("S", "A").child(
                StateNodeDef::atomic("A")
                    .entry(push("enter"))
                    .transition(TransitionDef::on("tick").action(push("tick"))),
            ),
        );

        let (mut state, mut queue, _) = start(&engine, Vec::new());
        let report = send(&engine, &mut state, &mut queue, Event::named("tick"));

        assert_eq!(report.microsteps.len(), 1);
        assert!(report.microsteps[0].exited.is_empty());
        assert!(report.microsteps[0].entered.is_empty());
        assert_eq!(state.context, vec!["enter", "tick"]);
    }

    #[test]
    fn test_raise_runs_before_send() {
        let engine = engine(
            StateNodeDef::compound("S", "A")
                .child(
                    StateNodeDef::atomic("A")
                        .on("go", "B")
                        .exit(Action::send(Event::named("sent")))
                        .exit(Action::raise(Event::named("raised"))),
                )
                .child(
                    StateNodeDef::atomic("B")
                        .on("raised", "C")
                        .on("sent", "D"),
                )
                .child(StateNodeDef::atomic("C").on("sent", "E"))
                .child(StateNodeDef::atomic("D"))
                .child(StateNodeDef::atomic("E")),
        );

        let (mut state, mut queue, _) = start(&engine, Vec::<String>::new());
        let report = send(&engine, &mut state, &mut queue, Event::named("go"));

        assert_eq!(state.configuration, config(&["S", "S.E"]));
        assert_eq!(report.processed, 3);
    }

    #[test]
    fn test_execution_error_handled_by_transition() {
        let engine = engine(
            StateNodeDef::<u32>::compound("S", "A")
                .child(
                    StateNodeDef::atomic("A").on("go", "B"),
                )
                .child(
                    StateNodeDef::atomic("B")
                        .entry(Action::run(|_, _| Err(ActionError::new("boom"))))
                        .entry(Action::assign(|n: &mut u32, _| {
                            *n += 1;
                            Ok(())
                        }))
                        .transition(TransitionDef::on_execution_error().to("Failed")),
                )
                .child(StateNodeDef::atomic("Failed")),
        );

        let (mut state, mut queue, _) = start(&engine, 0);
        let report = send(&engine, &mut state, &mut queue, Event::named("go"));

        assert_eq!(state.configuration, config(&["S", "S.Failed"]));
        assert_eq!(state.context, 0);
        assert_eq!(report.outcome, DrainOutcome::Quiescent);
    }

    #[test]
    fn test_error_handler_sees_error_data() {
        let engine = engine(
            StateNodeDef::compound("S", "A")
                .child(
                    StateNodeDef::atomic("A")
                        .entry(Action::run(|_, _| Err(ActionError::new("boom"))))
                        .transition(TransitionDef::on_execution_error().to("Failed").action(
                            Action::assign(|ctx: &mut Value, data: &Value| {
                                *ctx = data.clone();
                                Ok(())
                            }),
                        )),
                )
                .child(StateNodeDef::atomic("Failed")),
        );

        let (state, _, _) = start(&engine, Value::Null);
        assert_eq!(state.configuration, config(&["S", "S.Failed"]));
        assert_eq!(state.context, json!({"message": "entry S.A: boom"}));
    }

    #[test]
    fn test_unhandled_execution_error_faults() {
        let engine = engine(
            StateNodeDef::<()>::compound("S", "A").child(
                StateNodeDef::atomic("A")
                    .transition(TransitionDef::on("go").action(Action::run(|_, _| {
                        Err(ActionError::new("broken"))
                    }))),
            ),
        );

        let (mut state, mut queue, _) = start(&engine, ());
        let report = send(&engine, &mut state, &mut queue, Event::named("go"));

        match report.outcome {
            DrainOutcome::Faulted(Fault::Execution { message }) => {
                assert!(message.contains("broken"));
                assert!(message.contains("S.A[0]"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_unhandled_service_error_policy() {
        let root = || {
            StateNodeDef::<()>::compound("S", "A").child(StateNodeDef::atomic("A"))
        };
        let failure = Event::ServiceError {
            service_id: "fetch".to_string(),
            message: "timeout".to_string(),
        };

        let ignoring = engine(root());
        let (mut state, mut queue, _) = start(&ignoring, ());
        let report = send(&ignoring, &mut state, &mut queue, failure.clone());
        assert_eq!(report.outcome, DrainOutcome::Quiescent);

        let failing = Engine::new(
            Arc::new(StateTree::build(root()).unwrap()),
            EngineConfig {
                service_errors: ServiceErrorPolicy::Fail,
                ..EngineConfig::default()
            },
        );
        let (mut state, mut queue, _) = start(&failing, ());
        let report = send(&failing, &mut state, &mut queue, failure);
        assert!(matches!(
            report.outcome,
            DrainOutcome::Faulted(Fault::Service { .. })
        ));
    }

    #[test]
    fn test_done_event_and_completion() {
        let engine = engine(
            StateNodeDef::<()>::compound("S", "Work")
                .child(
                    StateNodeDef::compound("Work", "Step")
                        .child(StateNodeDef::atomic("Step").on("finish", "Finished"))
                        .child(StateNodeDef::final_state("Finished"))
                        .transition(TransitionDef::on_done().to("Done")),
                )
                .child(StateNodeDef::final_state("Done")),
        );

        let (mut state, mut queue, report) = start(&engine, ());
        assert_eq!(report.outcome, DrainOutcome::Quiescent);

        let report = send(&engine, &mut state, &mut queue, Event::named("finish"));
        assert_eq!(report.outcome, DrainOutcome::Completed);
        assert_eq!(state.configuration, config(&["S", "S.Done"]));
        assert!(engine.is_complete(&state.configuration));
    }

    #[test]
    fn test_orthogonal_done_waits_for_all_regions() {
        let region = |name: &'static str, event: &'static str| {
            StateNodeDef::compound(name, "busy")
                .child(StateNodeDef::atomic("busy").on(event, "idle"))
                .child(StateNodeDef::final_state("idle"))
        };
        let engine = engine(
            StateNodeDef::<()>::compound("S", "P")
                .child(
                    StateNodeDef::orthogonal("P")
                        .child(region("left", "l"))
                        .child(region("right", "r"))
                        .transition(TransitionDef::on_done().to("End")),
                )
                .child(StateNodeDef::atomic("End")),
        );

        let (mut state, mut queue, _) = start(&engine, ());
        send(&engine, &mut state, &mut queue, Event::named("l"));
        assert!(state.configuration.contains(&id("S.P.left.idle")));
        assert!(state.configuration.contains(&id("S.P")));

        send(&engine, &mut state, &mut queue, Event::named("r"));
        assert_eq!(state.configuration, config(&["S", "S.End"]));
    }

    #[test]
    fn test_final_root_completes_on_start() {
        let engine = engine(StateNodeDef::<()>::final_state("S"));
        let (_, _, report) = start(&engine, ());
        assert_eq!(report.outcome, DrainOutcome::Completed);
    }

    #[test]
    fn test_cross_region_transition_exits_target_region() {
        let engine = engine(
            StateNodeDef::<()>::orthogonal("O")
                .child(
                    StateNodeDef::compound("R1", "A")
                        .child(StateNodeDef::atomic("A").on("cross", "#O.R2.Y"))
                        .child(StateNodeDef::atomic("B")),
                )
                .child(
                    StateNodeDef::compound("R2", "X")
                        .child(StateNodeDef::atomic("X"))
                        .child(StateNodeDef::atomic("Y")),
                ),
        );

        let (mut state, mut queue, _) = start(&engine, ());
        let report = send(&engine, &mut state, &mut queue, Event::named("cross"));

        assert_eq!(
            report.microsteps[0].exited,
            vec![id("O.R1.A"), id("O.R1"), id("O.R2.X"), id("O.R2")]
        );
        assert_eq!(report.microsteps[0].entered, vec![id("O.R2"), id("O.R2.Y")]);
        assert_eq!(
            state.configuration,
            config(&["O", "O.R1", "O.R1.A", "O.R2", "O.R2.Y"])
        );
        assert!(state.configuration.is_consistent());
    }

    #[test]
    fn test_conflicting_region_transitions_apply_in_document_order() {
        let engine = engine(
            StateNodeDef::<Vec<String>>::orthogonal("O")
                .child(
                    StateNodeDef::compound("R1", "A")
                        .child(StateNodeDef::atomic("A").transition(
                            TransitionDef::on("go").to("B").action(push("r1")),
                        ))
                        .child(StateNodeDef::atomic("B")),
                )
                .child(
                    StateNodeDef::compound("R2", "X")
                        .child(StateNodeDef::atomic("X").transition(
                            TransitionDef::on("go").to("Y").action(push("r2")),
                        ))
                        .child(StateNodeDef::atomic("Y")),
                ),
        );

        let (mut state, mut queue, _) = start(&engine, Vec::new());
        let report = send(&engine, &mut state, &mut queue, Event::named("go"));

        assert_eq!(report.microsteps.len(), 2);
        assert_eq!(state.context, vec!["r1", "r2"]);
        assert_eq!(
            state.configuration,
            config(&["O", "O.R1", "O.R1.B", "O.R2", "O.R2.Y"])
        );
    }

    #[test]
    fn test_preempted_transition_is_skipped() {
        // R1 leaves the orthogonal state entirely, so R2's transition is dropped.
        let engine = engine(
            StateNodeDef::<Vec<String>>::compound("S", "O")
                .child(
                    StateNodeDef::orthogonal("O")
                        .child(
                            StateNodeDef::compound("R1", "A").child(
                                StateNodeDef::atomic("A").transition(
                                    TransitionDef::on("go").to("#S.Out").action(push("r1")),
                                ),
                            ),
                        )
                        .child(
                            StateNodeDef::compound("R2", "X")
                                .child(StateNodeDef::atomic("X").transition(
                                    TransitionDef::on("go").to("Y").action(push("r2")),
                                ))
                                .child(StateNodeDef::atomic("Y")),
                        ),
                )
                .child(StateNodeDef::atomic("Out")),
        );

        let (mut state, mut queue, _) = start(&engine, Vec::new());
        send(&engine, &mut state, &mut queue, Event::named("go"));

        assert_eq!(state.context, vec!["r1"]);
        assert_eq!(state.configuration, config(&["S", "S.Out"]));
    }

    #[test]
    fn test_multi_target_into_regions() {
        let engine = engine(
            StateNodeDef::<()>::compound("S", "Idle")
                .child(
                    StateNodeDef::atomic("Idle").transition(
                        TransitionDef::on("go").to("#S.P.R1.B").to("#S.P.R2.Y"),
                    ),
                )
                .child(
                    StateNodeDef::orthogonal("P")
                        .child(
                            StateNodeDef::compound("R1", "A")
                                .child(StateNodeDef::atomic("A"))
                                .child(StateNodeDef::atomic("B")),
                        )
                        .child(
                            StateNodeDef::compound("R2", "X")
                                .child(StateNodeDef::atomic("X"))
                                .child(StateNodeDef::atomic("Y")),
                        ),
                ),
        );

        let (mut state, mut queue, _) = start(&engine, ());
        let report = send(&engine, &mut state, &mut queue, Event::named("go"));

        assert_eq!(
            state.configuration,
            config(&["S", "S.P", "S.P.R1", "S.P.R1.B", "S.P.R2", "S.P.R2.Y"])
        );
        assert_eq!(
            report.microsteps[0].entered,
            vec![id("S.P"), id("S.P.R1"), id("S.P.R1.B")]
        );
        assert_eq!(report.microsteps[1].entered, vec![id("S.P.R2"), id("S.P.R2.Y")]);
        assert_eq!(report.microsteps.len(), 2);
    }

    #[test]
    fn test_root_transition_exits_active_child() {
        let engine = engine(
            StateNodeDef::<()>::compound("S", "A")
                .on("reset", "A")
                .child(StateNodeDef::atomic("A").on("go", "B"))
                .child(StateNodeDef::atomic("B")),
        );

        let (mut state, mut queue, _) = start(&engine, ());
        send(&engine, &mut state, &mut queue, Event::named("go"));
        let report = send(&engine, &mut state, &mut queue, Event::named("reset"));

        assert_eq!(report.microsteps[0].exited, vec![id("S.B")]);
        assert_eq!(report.microsteps[0].entered, vec![id("S.A")]);
        assert_eq!(state.configuration, config(&["S", "S.A"]));
    }

    #[test]
    fn test_eventless_transition() {
        let engine = engine(
            StateNodeDef::<u32>::compound("S", "A")
                .child(StateNodeDef::atomic("A").on("go", "Check"))
                .child(
                    StateNodeDef::atomic("Check")
                        .transition(
                            TransitionDef::always()
                                .to("High")
                                .guard(GuardDef::context(|n: &u32| *n > 10)),
                        )
                        .transition(TransitionDef::always().to("Low")),
                )
                .child(StateNodeDef::atomic("High"))
                .child(StateNodeDef::atomic("Low")),
        );

        let (mut state, mut queue, _) = start(&engine, 3);
        send(&engine, &mut state, &mut queue, Event::named("go"));
        assert_eq!(state.configuration, config(&["S", "S.Low"]));

        let (mut state, mut queue, _) = start(&engine, 30);
        send(&engine, &mut state, &mut queue, Event::named("go"));
        assert_eq!(state.configuration, config(&["S", "S.High"]));
    }

    #[test]
    fn test_eventless_guard_rechecked_after_targetless_step() {
        let engine = engine(
            StateNodeDef::<u32>::compound("S", "A")
                .child(
                    StateNodeDef::atomic("A")
                        .transition(TransitionDef::on("inc").action(Action::assign(
                            |n: &mut u32, _| {
                                *n += 1;
                                Ok(())
                            },
                        )))
                        .transition(
                            TransitionDef::always()
                                .to("B")
                                .guard(GuardDef::context(|n: &u32| *n >= 2)),
                        ),
                )
                .child(StateNodeDef::atomic("B")),
        );

        let (mut state, mut queue, _) = start(&engine, 0);
        send(&engine, &mut state, &mut queue, Event::named("inc"));
        assert_eq!(state.configuration, config(&["S", "S.A"]));

        let report = send(&engine, &mut state, &mut queue, Event::named("inc"));
        assert_eq!(state.configuration, config(&["S", "S.B"]));
        assert_eq!(state.context, 2);
        assert_eq!(report.microsteps.len(), 2);
        assert_eq!(report.outcome, DrainOutcome::Quiescent);
    }

    #[test]
    fn test_microstep_limit() {
        let tree = StateTree::build(
            StateNodeDef::<()>::compound("S", "A")
                .child(StateNodeDef::atomic("A").transition(TransitionDef::always().to("B")))
                .child(StateNodeDef::atomic("B").transition(TransitionDef::always().to("A"))),
        )
        .unwrap();
        let engine = Engine::new(
            Arc::new(tree),
            EngineConfig {
                max_microsteps: 50,
                ..EngineConfig::default()
            },
        );

        let mut state = State::new(());
        let mut queue = EventQueue::new();
        queue.enqueue(Event::Initialize, Priority::Stabilization);
        let result = engine.drain(&mut state, &mut queue, &mut NoHooks);
        assert!(matches!(result, Err(CoreError::MicrostepLimit { limit: 50 })));
    }

    #[test]
    fn test_in_state_guard_uses_dequeue_configuration() {
        let engine = engine(
            StateNodeDef::<()>::orthogonal("P")
                .child(
                    StateNodeDef::compound("left", "idle")
                        .child(StateNodeDef::atomic("idle").transition(
                            TransitionDef::on("go")
                                .to("busy")
                                .guard(GuardDef::in_state("#P.right.on")),
                        ))
                        .child(StateNodeDef::atomic("busy")),
                )
                .child(
                    StateNodeDef::compound("right", "off")
                        .child(StateNodeDef::atomic("off").on("go", "on"))
                        .child(StateNodeDef::atomic("on")),
                ),
        );

        let (mut state, mut queue, _) = start(&engine, ());
        // `right` moves to `on` in the same macrostep, but the guard saw `off`.
        send(&engine, &mut state, &mut queue, Event::named("go"));
        assert!(state.configuration.contains(&id("P.left.idle")));
        assert!(state.configuration.contains(&id("P.right.on")));

        send(&engine, &mut state, &mut queue, Event::named("go"));
        assert!(state.configuration.contains(&id("P.left.busy")));
    }

    #[test]
    fn test_event_data_reaches_guards_and_actions() {
        let engine = engine(
            StateNodeDef::compound("S", "Open").child(
                StateNodeDef::atomic("Open").transition(
                    TransitionDef::on("deposit")
                        .guard(GuardDef::context_and_event(|_: &Value, data: &Value| {
                            data["amount"].as_i64().unwrap_or(0) > 0
                        }))
                        .action(Action::assign(|ctx: &mut Value, data: &Value| {
                            let balance = ctx["balance"].as_i64().unwrap_or(0);
                            ctx["balance"] = json!(balance + data["amount"].as_i64().unwrap_or(0));
                            Ok(())
                        })),
                ),
            ),
        );

        let (mut state, mut queue, _) = start(&engine, json!({"balance": 0}));
        send(&engine, &mut state, &mut queue, Event::with_data("deposit", json!({"amount": 5})));
        send(&engine, &mut state, &mut queue, Event::with_data("deposit", json!({"amount": -3})));
        assert_eq!(state.context, json!({"balance": 5}));
    }

    #[test]
    fn test_next_events() {
        let engine = engine(
            StateNodeDef::<()>::compound("S", "A")
                .on("reset", "A")
                .child(StateNodeDef::atomic("A").on("go", "B").forbid("reset"))
                .child(StateNodeDef::atomic("B").on("back", "A")),
        );

        let (mut state, mut queue, _) = start(&engine, ());
        assert_eq!(engine.next_events(&state.configuration), vec!["go"]);

        send(&engine, &mut state, &mut queue, Event::named("go"));
        assert_eq!(engine.next_events(&state.configuration), vec!["back", "reset"]);
    }

    #[test]
    fn test_stabilization_idempotent() {
        let engine = engine(
            StateNodeDef::<()>::compound("S", "A")
                .child(StateNodeDef::compound("A", "A1").child(StateNodeDef::atomic("A1"))),
        );
        let (state, _, _) = start(&engine, ());
        assert!(engine.plan_stabilization(&state.configuration).is_none());
    }

    #[test]
    fn test_microstep_display() {
        let step = Microstep {
            kind: MicrostepKind::Event {
                event: Event::named("go"),
                transition: TransitionRef {
                    source: id("S.A"),
                    index: 0,
                },
            },
            exited: vec![id("S.A")],
            entered: vec![id("S.B")],
        };
        assert_eq!(step.to_string(), "go via S.A[0]: exited [S.A] entered [S.B]");
    }

    /// Chart used by the property tests: a mix of compound, orthogonal and
    /// cross-level transitions.
    fn property_chart() -> Engine<()> {
        engine(
            StateNodeDef::compound("S", "Idle")
                .on("reset", "Idle")
                .child(
                    StateNodeDef::atomic("Idle")
                        .on("a", "Work")
                        .on("b", "#S.Par.R2.Y"),
                )
                .child(
                    StateNodeDef::compound("Work", "W1")
                        .on("c", "Par")
                        .child(StateNodeDef::atomic("W1").on("a", "W2"))
                        .child(StateNodeDef::atomic("W2").on("b", "W1").on("d", "#S.Idle")),
                )
                .child(
                    StateNodeDef::orthogonal("Par")
                        .on("d", "Work")
                        .child(
                            StateNodeDef::compound("R1", "A")
                                .child(StateNodeDef::atomic("A").on("a", "B"))
                                .child(StateNodeDef::atomic("B").on("b", "#S.Par.R2.X")),
                        )
                        .child(
                            StateNodeDef::compound("R2", "X")
                                .child(StateNodeDef::atomic("X").on("c", "Y"))
                                .child(StateNodeDef::atomic("Y").forbid("d")),
                        ),
                ),
        )
    }

    proptest! {
        #[test]
        fn prop_configuration_stays_consistent(
            events in proptest::collection::vec(
                prop_oneof![
                    Just("a"), Just("b"), Just("c"), Just("d"), Just("reset"), Just("noise")
                ],
                0..40,
            )
        ) {
            let engine = property_chart();
            let (mut state, mut queue, _) = start(&engine, ());
            let tree = engine.tree().clone();

            for name in events {
                let report = send(&engine, &mut state, &mut queue, Event::named(name));
                prop_assert!(state.configuration.is_consistent());
                prop_assert!(tree.unstable_nodes(&state.configuration).is_empty());

                for node in tree.iter() {
                    if let NodeKind::Compound { children, .. } = &node.kind {
                        if state.configuration.contains(&node.id) {
                            let active = children
                                .iter()
                                .filter(|c| state.configuration.contains(&tree.node(**c).id))
                                .count();
                            prop_assert_eq!(active, 1);
                        }
                    }
                }

                for step in &report.microsteps {
                    if let MicrostepKind::Event { transition, .. } = &step.kind {
                        let source = tree.index_of(&transition.source).unwrap();
                        let owner = tree.node(source);
                        let Some(&target) = owner.transitions[transition.index].targets().first() else {
                            continue;
                        };
                        let Some(lca) = tree.lca(source, target) else { continue };
                        let lca_id = &tree.node(lca).id;
                        prop_assert!(!step.exited.contains(lca_id));
                        prop_assert!(!step.entered.contains(lca_id));
                    }
                }
            }
        }
    }
}
