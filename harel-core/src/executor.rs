//! Action execution.

use crate::action::Action;
use crate::error::ActionError;
use crate::event::{Event, Priority};
use crate::queue::EventQueue;
use serde_json::Value;

/// Result of running one action block.
#[derive(Debug, Default, PartialEq)]
pub struct BlockOutcome {
    /// Actions that ran to completion.
    pub executed: usize,
    /// Failure that aborted the rest of the block.
    pub error: Option<ActionError>,
}

/// Executes actions against a context.
pub struct ActionExecutor;

impl ActionExecutor {
    /// Runs a single action.
    ///
    /// `assign` works on a copy of the context that replaces the original
    /// only if the mutation succeeds.
    pub fn execute<C: Clone>(
        action: &Action<C>,
        ctx: &mut C,
        data: &Value,
    ) -> Result<Option<(Event, Priority)>, ActionError> {
        match action {
            Action::Send(event) => Ok(Some((event.clone(), Priority::NextMacrostep))),
            Action::Raise(event) => Ok(Some((event.clone(), Priority::CurrentMacrostep))),
            Action::Log(f) => {
                let message = f(ctx, data)?;
                tracing::info!(target: "harel::action", "{}", message);
                Ok(None)
            }
            Action::Assign(f) => {
                let mut next = ctx.clone();
                f(&mut next, data)?;
                *ctx = next;
                Ok(None)
            }
            Action::Run(f) => {
                f(ctx, data)?;
                Ok(None)
            }
        }
    }

    /// Runs a block of actions in order, queueing any events they produce.
    ///
    /// The first failure stops the block and is queued as an
    /// `ExecutionError` on the current-macrostep band.
    pub fn execute_block<C: Clone>(
        actions: &[Action<C>],
        ctx: &mut C,
        data: &Value,
        queue: &mut EventQueue,
        origin: &str,
    ) -> BlockOutcome {
        let mut outcome = BlockOutcome::default();

        for action in actions {
            tracing::trace!(origin, action = action.kind(), "executing action");
            match Self::execute(action, ctx, data) {
                Ok(Some((event, priority))) => {
                    queue.enqueue(event, priority);
                    outcome.executed += 1;
                }
                Ok(None) => outcome.executed += 1,
                Err(e) => {
                    tracing::debug!(origin, action = action.kind(), error = %e, "action failed");
                    queue.enqueue(
                        Event::ExecutionError {
                            message: format!("{}: {}", origin, e),
                        },
                        Priority::CurrentMacrostep,
                    );
                    outcome.error = Some(e);
                    break;
                }
            }
        }

        outcome
    }
}
