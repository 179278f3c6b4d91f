//! Events and the patterns transitions match them against.

use crate::id::StateNodeId;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

/// Name given to execution-error events in traces and logs.
pub const EXECUTION_ERROR_EVENT: &str = "error.execution";

/// An event processed by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Starts an instance: enters the root.
    Initialize,
    /// A caller-defined named event with optional payload.
    Named { name: String, data: Value },
    /// Triggers eventless transitions after states were entered.
    Immediate,
    /// A timer started on entry of `state` fired after `delay`.
    Delayed {
        state: StateNodeId,
        #[serde(with = "duration_millis")]
        delay: Duration,
    },
    /// An invoked service completed.
    ServiceSuccess { service_id: String, data: Value },
    /// An invoked service failed.
    ServiceError { service_id: String, message: String },
    /// A compound or orthogonal state reached completion.
    Done { state: StateNodeId },
    /// An action threw while executing.
    ExecutionError { message: String },
}

impl Event {
    /// Creates a named event without payload.
    pub fn named(name: impl Into<String>) -> Self {
        Event::Named {
            name: name.into(),
            data: Value::Null,
        }
    }

    /// Creates a named event carrying `data`.
    pub fn with_data(name: impl Into<String>, data: Value) -> Self {
        Event::Named {
            name: name.into(),
            data,
        }
    }

    /// Payload visible to guards and actions.
    ///
    /// Error events expose `{"service_id", "message"}` and `{"message"}`.
    pub fn data(&self) -> Cow<'_, Value> {
        match self {
            Event::Named { data, .. } | Event::ServiceSuccess { data, .. } => Cow::Borrowed(data),
            Event::ServiceError {
                service_id,
                message,
            } => Cow::Owned(json!({ "service_id": service_id, "message": message })),
            Event::ExecutionError { message } => Cow::Owned(json!({ "message": message })),
            _ => Cow::Owned(Value::Null),
        }
    }

    /// Name used in traces and logs.
    pub fn name(&self) -> String {
        match self {
            Event::Initialize => "init".to_string(),
            Event::Named { name, .. } => name.clone(),
            Event::Immediate => "always".to_string(),
            Event::Delayed { state, delay } => format!("after.{}.{}", delay.as_millis(), state),
            Event::ServiceSuccess { service_id, .. } => format!("done.invoke.{}", service_id),
            Event::ServiceError { service_id, .. } => format!("error.invoke.{}", service_id),
            Event::Done { state } => format!("done.state.{}", state),
            Event::ExecutionError { .. } => EXECUTION_ERROR_EVENT.to_string(),
        }
    }

    /// Returns true for events reporting a failure.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Event::ServiceError { .. } | Event::ExecutionError { .. }
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// What a transition listens for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventPattern {
    Named(String),
    Immediate,
    /// Timer of the given length started when the source was entered.
    Delayed(Duration),
    /// Completion of the transition's own source node.
    Done,
    ServiceSuccess(String),
    ServiceError(String),
    ExecutionError,
}

impl EventPattern {
    /// Returns true if `event` is matched by this pattern on a transition
    /// whose source is `source`.
    pub fn matches(&self, source: &StateNodeId, event: &Event) -> bool {
        match (self, event) {
            (EventPattern::Named(p), Event::Named { name, .. }) => p == name,
            (EventPattern::Immediate, Event::Immediate) => true,
            (EventPattern::Delayed(d), Event::Delayed { state, delay }) => {
                d == delay && state == source
            }
            (EventPattern::Done, Event::Done { state }) => state == source,
            (EventPattern::ServiceSuccess(p), Event::ServiceSuccess { service_id, .. }) => {
                p == service_id
            }
            (EventPattern::ServiceError(p), Event::ServiceError { service_id, .. }) => {
                p == service_id
            }
            (EventPattern::ExecutionError, Event::ExecutionError { .. }) => true,
            _ => false,
        }
    }

    /// Event name for named patterns.
    pub fn name(&self) -> Option<&str> {
        match self {
            EventPattern::Named(name) => Some(name),
            _ => None,
        }
    }
}

/// Queue band an event is delivered on. Lower value is dequeued first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Stabilization = 1,
    CurrentMacrostep = 2,
    NextMacrostep = 3,
}

impl Priority {
    pub const ALL: [Priority; 3] = [
        Priority::Stabilization,
        Priority::CurrentMacrostep,
        Priority::NextMacrostep,
    ];

    pub(crate) fn band(self) -> usize {
        self as usize - 1
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
