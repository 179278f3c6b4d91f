//! Running-instance coordinator.
//!
//! An [`Interpreter`] owns one instance: its state, event queue and running
//! services. Calls to [`Interpreter::send`] and completions posted by
//! services are serialized on a per-instance mutex, so microsteps of one
//! instance never interleave.
//!
//! Actions run while that mutex is held and must not call back into the
//! same interpreter; use `raise`/`send` actions instead.

use crate::config::Config;
use crate::error::RuntimeError;
use crate::registry::ServiceRegistry;
use crate::services::{ServiceManager, ServiceMessage};
use harel_core::{
    ChartDefinition, Configuration, DrainOutcome, Engine, Event, EventQueue, Fault, Microstep,
    Priority, State, StateTree,
};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn};

/// Lifecycle status of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    NotStarted,
    Active,
    Completed,
    Cancelled,
    Errored,
}

impl InstanceStatus {
    /// Returns true for statuses no event can leave.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstanceStatus::Completed | InstanceStatus::Cancelled | InstanceStatus::Errored
        )
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceStatus::NotStarted => "not_started",
            InstanceStatus::Active => "active",
            InstanceStatus::Completed => "completed",
            InstanceStatus::Cancelled => "cancelled",
            InstanceStatus::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// State of an instance after a call, with the microsteps the call applied.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot<C> {
    pub configuration: Configuration,
    pub context: C,
    pub status: InstanceStatus,
    pub microsteps: Vec<Microstep>,
}

/// How an instance ended without fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
enum Outcome {
    Completed,
    Cancelled,
    Faulted(Fault),
}

/// Resolves once the instance reaches a terminal status.
#[derive(Debug, Clone)]
pub struct Completion {
    rx: watch::Receiver<Option<Outcome>>,
}

impl Completion {
    /// Waits for the instance to terminate. Faults are returned as errors.
    pub async fn wait(mut self) -> Result<Termination, RuntimeError> {
        let outcome = match self.rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            // Interpreter dropped before terminating.
            Err(_) => return Ok(Termination::Cancelled),
        };

        match outcome {
            Some(Outcome::Completed) => Ok(Termination::Completed),
            Some(Outcome::Faulted(fault)) => Err(fault.into()),
            Some(Outcome::Cancelled) | None => Ok(Termination::Cancelled),
        }
    }
}

/// Per-instance options.
#[derive(Debug, Clone, Default)]
pub struct InstanceOptions {
    id: Option<String>,
    cancellation: Option<CancellationToken>,
}

impl InstanceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `id` instead of a generated UUID.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Cancels the instance when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

struct Core<C> {
    state: State<C>,
    queue: EventQueue,
    services: ServiceManager,
    status: InstanceStatus,
}

impl<C: Clone> Core<C> {
    fn snapshot(&self, microsteps: Vec<Microstep>) -> Snapshot<C> {
        Snapshot {
            configuration: self.state.configuration.clone(),
            context: self.state.context.clone(),
            status: self.status,
            microsteps,
        }
    }
}

struct Inner<C> {
    id: String,
    engine: Engine<C>,
    core: Mutex<Core<C>>,
    outcome: watch::Sender<Option<Outcome>>,
    cancel: CancellationToken,
    cancel_on_drop: bool,
}

impl<C: Clone> Inner<C> {
    /// Drains the queue and applies the resulting outcome.
    fn drain(&self, core: &mut Core<C>) -> Result<Vec<Microstep>, RuntimeError> {
        let span = info_span!("instance", id = %self.id);
        let _enter = span.enter();

        let Core {
            state,
            queue,
            services,
            ..
        } = &mut *core;
        let result = self.engine.drain(state, queue, services);

        match result {
            Ok(report) => match report.outcome {
                DrainOutcome::Quiescent => Ok(report.microsteps),
                DrainOutcome::Completed => {
                    info!(microsteps = report.microsteps.len(), "instance completed");
                    self.finish(core, Outcome::Completed);
                    Ok(report.microsteps)
                }
                DrainOutcome::Faulted(fault) => {
                    error!(%fault, "instance faulted");
                    self.finish(core, Outcome::Faulted(fault.clone()));
                    Err(fault.into())
                }
            },
            Err(e) => {
                error!(error = %e, "instance faulted");
                self.finish(
                    core,
                    Outcome::Faulted(Fault::Execution {
                        message: e.to_string(),
                    }),
                );
                Err(e.into())
            }
        }
    }

    fn finish(&self, core: &mut Core<C>, outcome: Outcome) {
        core.status = match &outcome {
            Outcome::Completed => InstanceStatus::Completed,
            Outcome::Cancelled => InstanceStatus::Cancelled,
            Outcome::Faulted(_) => InstanceStatus::Errored,
        };
        core.queue.clear();
        core.services.cancel_all();
        self.outcome.send_replace(Some(outcome));
    }

    fn deliver(&self, msg: ServiceMessage) {
        let mut core = self.core.lock();
        if core.status != InstanceStatus::Active {
            return;
        }
        if !core.services.finish(&msg.node, msg.generation) {
            warn!(id = %self.id, state = %msg.node, event = %msg.event, "dropping completion for exited state");
            return;
        }
        let event = msg.event.name();
        core.queue.enqueue(msg.event, Priority::NextMacrostep);
        // The fault itself reaches callers through the completion.
        if let Err(e) = self.drain(&mut core) {
            error!(id = %self.id, state = %msg.node, %event, error = %e, "delivered event faulted instance");
        }
    }

    fn cancel_now(&self) {
        let mut core = self.core.lock();
        if core.status.is_terminal() {
            return;
        }
        info!(id = %self.id, "instance cancelled");
        self.finish(&mut core, Outcome::Cancelled);
    }
}

impl<C> Drop for Inner<C> {
    fn drop(&mut self) {
        if self.cancel_on_drop {
            self.core.get_mut().services.cancel_all();
        }
        self.cancel.cancel();
    }
}

/// Handle to a running statechart instance. Cheap to clone.
pub struct Interpreter<C> {
    inner: Arc<Inner<C>>,
}

impl<C> Clone for Interpreter<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: Clone + Send + 'static> Interpreter<C> {
    pub fn new(tree: Arc<StateTree<C>>, context: C, config: &Config) -> Self {
        Self::with_options(tree, context, config, InstanceOptions::default())
    }

    pub fn with_options(
        tree: Arc<StateTree<C>>,
        context: C,
        config: &Config,
        options: InstanceOptions,
    ) -> Self {
        let id = options
            .id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let cancel = match options.cancellation {
            Some(token) => token.child_token(),
            None => CancellationToken::new(),
        };
        let (outcome, _) = watch::channel(None);

        Self {
            inner: Arc::new(Inner {
                id,
                engine: Engine::new(tree, config.engine.clone()),
                core: Mutex::new(Core {
                    state: State::new(context),
                    queue: EventQueue::new(),
                    services: ServiceManager::new(),
                    status: InstanceStatus::NotStarted,
                }),
                outcome,
                cancel,
                cancel_on_drop: config.services.cancel_on_drop,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn tree(&self) -> &Arc<StateTree<C>> {
        self.inner.engine.tree()
    }

    /// Enters the root and stabilizes. Must be called within a tokio runtime.
    pub fn start(&self) -> Result<(Snapshot<C>, Completion), RuntimeError> {
        let handle = Handle::try_current().map_err(|_| RuntimeError::NoRuntime)?;
        let completion = self.completion();

        let mut core = self.inner.core.lock();
        match core.status {
            InstanceStatus::NotStarted => {}
            InstanceStatus::Active => return Err(RuntimeError::AlreadyStarted),
            status => return Err(RuntimeError::Terminated { status }),
        }
        if self.inner.cancel.is_cancelled() {
            self.inner.finish(&mut core, Outcome::Cancelled);
            return Err(RuntimeError::Terminated {
                status: InstanceStatus::Cancelled,
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        core.services.attach(handle.clone(), tx);
        core.status = InstanceStatus::Active;
        handle.spawn(pump(
            Arc::downgrade(&self.inner),
            rx,
            self.inner.cancel.clone(),
        ));

        info!(id = %self.inner.id, root = %self.tree().root_node().id, "instance started");
        core.queue.enqueue(Event::Initialize, Priority::NextMacrostep);
        let microsteps = self.inner.drain(&mut core)?;
        Ok((core.snapshot(microsteps), completion))
    }

    /// Delivers an external event and drains the queue.
    pub fn send(&self, event: Event) -> Result<Snapshot<C>, RuntimeError> {
        let mut core = self.inner.core.lock();
        match core.status {
            InstanceStatus::Active => {}
            InstanceStatus::NotStarted => return Err(RuntimeError::NotStarted),
            status => return Err(RuntimeError::Terminated { status }),
        }

        core.queue.enqueue(event, Priority::NextMacrostep);
        let microsteps = self.inner.drain(&mut core)?;
        Ok(core.snapshot(microsteps))
    }

    /// Named events some active state would react to. Empty unless active.
    pub fn next_events(&self) -> Vec<String> {
        let core = self.inner.core.lock();
        if core.status != InstanceStatus::Active {
            return Vec::new();
        }
        self.inner.engine.next_events(&core.state.configuration)
    }

    pub fn snapshot(&self) -> Snapshot<C> {
        self.inner.core.lock().snapshot(Vec::new())
    }

    pub fn state(&self) -> State<C> {
        self.inner.core.lock().state.clone()
    }

    pub fn status(&self) -> InstanceStatus {
        self.inner.core.lock().status
    }

    /// Number of services and timers currently running.
    pub fn running_services(&self) -> usize {
        self.inner.core.lock().services.active_count()
    }

    pub fn completion(&self) -> Completion {
        Completion {
            rx: self.inner.outcome.subscribe(),
        }
    }

    /// Token that cancels this instance when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Cancels all running services and moves the instance to Cancelled.
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
        self.inner.cancel_now();
    }
}

impl Interpreter<Value> {
    /// Builds an instance of a JSON chart, resolving services by name.
    pub fn from_definition(
        definition: &ChartDefinition,
        registry: &ServiceRegistry,
        config: &Config,
    ) -> Result<Self, RuntimeError> {
        let tree = definition.build(registry)?;
        Ok(Self::new(
            Arc::new(tree),
            definition.context().clone(),
            config,
        ))
    }
}

impl<C> fmt::Debug for Interpreter<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interpreter")
            .field("id", &self.inner.id)
            .finish()
    }
}

/// Feeds service completions into the instance until it is dropped or
/// cancelled.
async fn pump<C: Clone>(
    inner: Weak<Inner<C>>,
    mut rx: mpsc::UnboundedReceiver<ServiceMessage>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                if let Some(inner) = inner.upgrade() {
                    inner.cancel_now();
                }
                return;
            }
            msg = rx.recv() => {
                let Some(msg) = msg else { return };
                let Some(inner) = inner.upgrade() else { return };
                inner.deliver(msg);
            }
        }
    }
}
