//! Service lifecycle manager.
//!
//! Starts the services and `after` timers of a state when it is entered and
//! cancels them when it is exited. Tasks never touch the instance directly:
//! each posts a [`ServiceMessage`] to the instance's inbox, and the instance
//! asks [`ServiceManager::finish`] whether the owning registration is still
//! live before turning the message into an event.

use harel_core::{Event, EventPattern, LifecycleHooks, ServiceError, StateNode, StateNodeId};
use std::collections::HashMap;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Completion posted by a service or timer task.
#[derive(Debug)]
pub struct ServiceMessage {
    pub node: StateNodeId,
    pub generation: u64,
    pub event: Event,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TaskKind {
    Service(String),
    Timer(Duration),
}

#[derive(Debug)]
struct Registration {
    kind: TaskKind,
    generation: u64,
    token: CancellationToken,
}

/// Per-instance registry of running services, keyed by owning node.
#[derive(Debug, Default)]
pub struct ServiceManager {
    handle: Option<Handle>,
    tx: Option<UnboundedSender<ServiceMessage>>,
    running: HashMap<StateNodeId, Vec<Registration>>,
    next_generation: u64,
}

impl ServiceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds the manager to a runtime and an inbox. Nodes entered before
    /// this start nothing.
    pub fn attach(&mut self, handle: Handle, tx: UnboundedSender<ServiceMessage>) {
        self.handle = Some(handle);
        self.tx = Some(tx);
    }

    /// Consumes the registration a message came from. Returns false when the
    /// owning node was exited (or re-entered) since the task started.
    pub fn finish(&mut self, node: &StateNodeId, generation: u64) -> bool {
        let Some(registrations) = self.running.get_mut(node) else {
            return false;
        };
        let Some(pos) = registrations
            .iter()
            .position(|r| r.generation == generation)
        else {
            return false;
        };
        registrations.swap_remove(pos);
        if registrations.is_empty() {
            self.running.remove(node);
        }
        true
    }

    /// Cancels everything still running.
    pub fn cancel_all(&mut self) {
        for (node, registrations) in self.running.drain() {
            for r in registrations {
                trace!(state = %node, task = ?r.kind, "cancelling");
                r.token.cancel();
            }
        }
    }

    /// Number of services and timers currently running.
    pub fn active_count(&self) -> usize {
        self.running.values().map(Vec::len).sum()
    }

    /// Returns true if `node` owns a running service with this id.
    pub fn is_running(&self, node: &StateNodeId, service_id: &str) -> bool {
        self.running.get(node).is_some_and(|regs| {
            regs.iter()
                .any(|r| r.kind == TaskKind::Service(service_id.to_string()))
        })
    }

    fn register(&mut self, node: &StateNodeId, kind: TaskKind) -> Option<(u64, CancellationToken)> {
        self.handle.as_ref()?;
        let generation = self.next_generation;
        self.next_generation += 1;
        let token = CancellationToken::new();
        self.running
            .entry(node.clone())
            .or_default()
            .push(Registration {
                kind,
                generation,
                token: token.clone(),
            });
        Some((generation, token))
    }

    fn start<C>(&mut self, node: &StateNode<C>) {
        let (Some(handle), Some(tx)) = (self.handle.clone(), self.tx.clone()) else {
            return;
        };

        for service in &node.services {
            let Some((generation, token)) =
                self.register(&node.id, TaskKind::Service(service.id.clone()))
            else {
                continue;
            };
            debug!(state = %node.id, service_id = %service.id, "starting service");

            let future = service.invoke(token.clone());
            let service_id = service.id.clone();
            let owner = node.id.clone();
            let tx = tx.clone();
            handle.spawn(async move {
                let event = tokio::select! {
                    _ = token.cancelled() => return,
                    result = future => match result {
                        Ok(data) => Event::ServiceSuccess { service_id, data },
                        Err(ServiceError::Cancelled) => return,
                        Err(ServiceError::Failed(message)) => {
                            Event::ServiceError { service_id, message }
                        }
                    },
                };
                let _ = tx.send(ServiceMessage {
                    node: owner,
                    generation,
                    event,
                });
            });
        }

        let mut delays: Vec<Duration> = Vec::new();
        for t in &node.transitions {
            if let EventPattern::Delayed(delay) = t.event() {
                if !delays.contains(delay) {
                    delays.push(*delay);
                }
            }
        }
        for delay in delays {
            let Some((generation, token)) = self.register(&node.id, TaskKind::Timer(delay)) else {
                continue;
            };
            trace!(state = %node.id, ?delay, "starting timer");

            let owner = node.id.clone();
            let tx = tx.clone();
            handle.spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {
                        let _ = tx.send(ServiceMessage {
                            node: owner.clone(),
                            generation,
                            event: Event::Delayed { state: owner, delay },
                        });
                    }
                }
            });
        }
    }

    fn stop(&mut self, node: &StateNodeId) {
        if let Some(registrations) = self.running.remove(node) {
            for r in registrations {
                debug!(state = %node, task = ?r.kind, "cancelling on exit");
                r.token.cancel();
            }
        }
    }
}

impl<C> LifecycleHooks<C> for ServiceManager {
    fn node_entered(&mut self, node: &StateNode<C>) {
        self.start(node);
    }

    fn node_exited(&mut self, node: &StateNode<C>) {
        self.stop(&node.id);
    }
}
