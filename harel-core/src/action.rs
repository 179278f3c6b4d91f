//! Actions run on entry, exit and transitions.

use crate::error::ActionError;
use crate::event::Event;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Mutates the context. Receives the triggering event's data.
pub type AssignFn<C> = Arc<dyn Fn(&mut C, &Value) -> Result<(), ActionError> + Send + Sync>;

/// Runs an arbitrary side effect.
pub type EffectFn<C> = Arc<dyn Fn(&C, &Value) -> Result<(), ActionError> + Send + Sync>;

/// Produces a log message.
pub type LogFn<C> = Arc<dyn Fn(&C, &Value) -> Result<String, ActionError> + Send + Sync>;

/// A single action.
pub enum Action<C> {
    /// Delivers an event after the current macrostep.
    Send(Event),
    /// Delivers an event within the current macrostep.
    Raise(Event),
    Log(LogFn<C>),
    Assign(AssignFn<C>),
    Run(EffectFn<C>),
}

impl<C> Action<C> {
    pub fn send(event: Event) -> Self {
        Action::Send(event)
    }

    pub fn raise(event: Event) -> Self {
        Action::Raise(event)
    }

    pub fn assign(f: impl Fn(&mut C, &Value) -> Result<(), ActionError> + Send + Sync + 'static) -> Self {
        Action::Assign(Arc::new(f))
    }

    pub fn run(f: impl Fn(&C, &Value) -> Result<(), ActionError> + Send + Sync + 'static) -> Self {
        Action::Run(Arc::new(f))
    }

    pub fn log(f: impl Fn(&C, &Value) -> Result<String, ActionError> + Send + Sync + 'static) -> Self {
        Action::Log(Arc::new(f))
    }

    /// Logs a fixed message.
    pub fn log_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Action::Log(Arc::new(move |_, _| Ok(message.clone())))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Action::Send(_) => "send",
            Action::Raise(_) => "raise",
            Action::Log(_) => "log",
            Action::Assign(_) => "assign",
            Action::Run(_) => "run",
        }
    }
}

impl<C> Clone for Action<C> {
    fn clone(&self) -> Self {
        match self {
            Action::Send(e) => Action::Send(e.clone()),
            Action::Raise(e) => Action::Raise(e.clone()),
            Action::Log(f) => Action::Log(f.clone()),
            Action::Assign(f) => Action::Assign(f.clone()),
            Action::Run(f) => Action::Run(f.clone()),
        }
    }
}

impl<C> fmt::Debug for Action<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Send(e) => f.debug_tuple("Send").field(e).finish(),
            Action::Raise(e) => f.debug_tuple("Raise").field(e).finish(),
            other => write!(f, "{}(..)", other.kind()),
        }
    }
}
