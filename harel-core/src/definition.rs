//! JSON chart definitions.
//!
//! Charts can be written as JSON and built into a [`StateTree`] over a
//! `serde_json::Value` context:
//!
//! ```json
//! {
//!   "id": "order",
//!   "initial": "pending",
//!   "context": {"retries": 0},
//!   "states": {
//!     "pending": {
//!       "invoke": [{"id": "charge", "src": "payments", "onDone": "paid", "onError": "failed"}]
//!     },
//!     "paid": {
//!       "on": {"SHIP": {"target": "shipped", "guard": "ctx.in_stock"}, "PAY": null}
//!     },
//!     "failed": {
//!       "entry": [{"type": "assign", "values": {"retries": 1}}],
//!       "after": {"1000": "pending"}
//!     },
//!     "shipped": {"type": "final"}
//!   }
//! }
//! ```
//!
//! - `type`: `atomic`, `compound`, `parallel` or `final`. Inferred from
//!   `states` when omitted.
//! - `on`: event name to transition(s). `null` forbids the event.
//! - A transition is a target string or an object with `target` (string or
//!   array), `guard` (expression) or `in` (state name), and `actions`.
//!   An array of transitions is tried in order.
//! - `always`, `after` (milliseconds as keys), `onDone` and `onError`
//!   (execution errors) take transitions too.
//! - `invoke` entries name a service from the registry, with optional
//!   `id`, `input`, `onDone` and `onError`.

use crate::action::Action;
use crate::error::{ActionError, CoreError};
use crate::event::{Event, EventPattern};
use crate::guard::GuardDef;
use crate::id::StateNodeId;
use crate::node::{StateNodeDef, TransitionDef};
use crate::service::{ServiceDef, ServiceLookup};
use crate::tree::StateTree;
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

/// JSON object kept in declaration order. Duplicate keys are rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct Keyed<T>(pub Vec<(String, T)>);

impl<T> Keyed<T> {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<T> Default for Keyed<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<T: Serialize> Serialize for Keyed<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Keyed<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct KeyedVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for KeyedVisitor<T> {
            type Value = Keyed<T>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a JSON object")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries: Vec<(String, T)> = Vec::new();
                while let Some((key, value)) = access.next_entry::<String, T>()? {
                    if entries.iter().any(|(k, _)| *k == key) {
                        return Err(de::Error::custom(format!("duplicate key '{}'", key)));
                    }
                    entries.push((key, value));
                }
                Ok(Keyed(entries))
            }
        }

        deserializer.deserialize_map(KeyedVisitor(PhantomData))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeTypeRaw {
    Atomic,
    Compound,
    #[serde(alias = "orthogonal")]
    Parallel,
    Final,
}

/// One target or several.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Targets {
    One(String),
    Many(Vec<String>),
}

impl Targets {
    pub fn as_slice(&self) -> &[String] {
        match self {
            Targets::One(t) => std::slice::from_ref(t),
            Targets::Many(ts) => ts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransitionObjectRaw {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Targets>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,
    /// In-state guard.
    #[serde(default, rename = "in", skip_serializing_if = "Option::is_none")]
    pub in_state: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ActionRaw>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransitionRaw {
    Target(String),
    Object(TransitionObjectRaw),
}

impl TransitionRaw {
    fn to_def(&self, event: EventPattern) -> Result<TransitionDef<Value>, CoreError> {
        let obj = match self {
            TransitionRaw::Target(target) => return Ok(TransitionDef::new(event).to(target.as_str())),
            TransitionRaw::Object(obj) => obj,
        };

        let mut def = TransitionDef::new(event);
        if let Some(targets) = &obj.target {
            for target in targets.as_slice() {
                def = def.to(target.as_str());
            }
        }
        def = match (&obj.guard, &obj.in_state) {
            (Some(_), Some(_)) => {
                return Err(CoreError::InvalidDefinition {
                    reason: "a transition takes either 'guard' or 'in', not both".to_string(),
                })
            }
            (Some(expr), None) => def.guard(GuardDef::expr(expr)?),
            (None, Some(state)) => def.guard(GuardDef::in_state(state.as_str())),
            (None, None) => def,
        };
        for action in &obj.actions {
            def = def.action(action.to_action());
        }
        Ok(def)
    }
}

/// A transition or an ordered list of candidates.
// `Many` comes first: a struct would also accept a JSON array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransitionList {
    Many(Vec<TransitionRaw>),
    One(TransitionRaw),
}

impl TransitionList {
    pub fn as_slice(&self) -> &[TransitionRaw] {
        match self {
            TransitionList::Many(ts) => ts,
            TransitionList::One(t) => std::slice::from_ref(t),
        }
    }

    fn to_defs(&self, event: &EventPattern) -> Result<Vec<TransitionDef<Value>>, CoreError> {
        self.as_slice()
            .iter()
            .map(|t| t.to_def(event.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionRaw {
    /// Merges `values` into the context object.
    Assign { values: Map<String, Value> },
    /// Merges the event data into the context, or stores it under `key`.
    AssignEvent {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
    },
    Raise {
        event: String,
        #[serde(default, skip_serializing_if = "Value::is_null")]
        data: Value,
    },
    Send {
        event: String,
        #[serde(default, skip_serializing_if = "Value::is_null")]
        data: Value,
    },
    Log { message: String },
    /// Always fails with `message`.
    Fail { message: String },
}

impl ActionRaw {
    pub fn to_action(&self) -> Action<Value> {
        match self.clone() {
            ActionRaw::Assign { values } => {
                Action::assign(move |ctx: &mut Value, _: &Value| merge_object(ctx, &values))
            }
            ActionRaw::AssignEvent { key } => {
                Action::assign(move |ctx: &mut Value, data: &Value| match (&key, data) {
                    (Some(key), data) => {
                        let mut values = Map::new();
                        values.insert(key.clone(), data.clone());
                        merge_object(ctx, &values)
                    }
                    (None, Value::Object(values)) => merge_object(ctx, values),
                    (None, Value::Null) => Ok(()),
                    (None, _) => Err(ActionError::new("event data is not an object")),
                })
            }
            ActionRaw::Raise { event, data } => Action::raise(Event::with_data(event, data)),
            ActionRaw::Send { event, data } => Action::send(Event::with_data(event, data)),
            ActionRaw::Log { message } => Action::log_message(message),
            ActionRaw::Fail { message } => {
                Action::run(move |_: &Value, _: &Value| Err(ActionError::new(message.clone())))
            }
        }
    }
}

fn merge_object(ctx: &mut Value, values: &Map<String, Value>) -> Result<(), ActionError> {
    if ctx.is_null() {
        *ctx = Value::Object(Map::new());
    }
    let Value::Object(map) = ctx else {
        return Err(ActionError::new("context is not an object"));
    };
    for (k, v) in values {
        map.insert(k.clone(), v.clone());
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct InvokeRaw {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub src: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_done: Option<TransitionList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<TransitionList>,
}

/// Raw state node as written in JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateNodeRaw {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<NodeTypeRaw>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entry: Vec<ActionRaw>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exit: Vec<ActionRaw>,
    /// `None` values are forbidden transitions.
    #[serde(default, skip_serializing_if = "Keyed::is_empty")]
    pub on: Keyed<Option<TransitionList>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub always: Option<TransitionList>,
    #[serde(default, skip_serializing_if = "Keyed::is_empty")]
    pub after: Keyed<TransitionList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_done: Option<TransitionList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<TransitionList>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub invoke: Vec<InvokeRaw>,
    #[serde(default, skip_serializing_if = "Keyed::is_empty")]
    pub states: Keyed<StateNodeRaw>,
}

impl StateNodeRaw {
    fn node_type(&self, id: &StateNodeId) -> Result<NodeTypeRaw, CoreError> {
        let kind = match self.kind {
            Some(kind) => kind,
            None if self.states.is_empty() => NodeTypeRaw::Atomic,
            None => NodeTypeRaw::Compound,
        };
        if self.initial.is_some() && kind != NodeTypeRaw::Compound {
            return Err(CoreError::InvalidDefinition {
                reason: format!("{}: 'initial' is only valid on compound states", id),
            });
        }
        Ok(kind)
    }

    fn to_node_def(
        &self,
        id: &StateNodeId,
        services: &dyn ServiceLookup,
    ) -> Result<StateNodeDef<Value>, CoreError> {
        let key = id.key();
        let mut def = match self.node_type(id)? {
            NodeTypeRaw::Atomic => StateNodeDef::atomic(key),
            NodeTypeRaw::Final => StateNodeDef::final_state(key),
            NodeTypeRaw::Parallel => StateNodeDef::orthogonal(key),
            NodeTypeRaw::Compound => {
                let initial = self.initial.as_deref().ok_or_else(|| {
                    CoreError::InvalidDefinition {
                        reason: format!("{}: compound state needs 'initial'", id),
                    }
                })?;
                StateNodeDef::compound(key, initial)
            }
        };

        for action in &self.entry {
            def = def.entry(action.to_action());
        }
        for action in &self.exit {
            def = def.exit(action.to_action());
        }

        for (event, list) in self.on.iter() {
            match list {
                None => def = def.forbid(event),
                Some(list) => {
                    for t in list.to_defs(&EventPattern::Named(event.to_string()))? {
                        def = def.transition(t);
                    }
                }
            }
        }

        if let Some(list) = &self.always {
            for t in list.to_defs(&EventPattern::Immediate)? {
                def = def.transition(t);
            }
        }

        for (delay, list) in self.after.iter() {
            let millis: u64 = delay.parse().map_err(|_| CoreError::InvalidDefinition {
                reason: format!("{}: 'after' key '{}' is not a number of milliseconds", id, delay),
            })?;
            let pattern = EventPattern::Delayed(Duration::from_millis(millis));
            for t in list.to_defs(&pattern)? {
                def = def.transition(t);
            }
        }

        if let Some(list) = &self.on_done {
            for t in list.to_defs(&EventPattern::Done)? {
                def = def.transition(t);
            }
        }
        if let Some(list) = &self.on_error {
            for t in list.to_defs(&EventPattern::ExecutionError)? {
                def = def.transition(t);
            }
        }

        for (i, invoke) in self.invoke.iter().enumerate() {
            let service_id = invoke
                .id
                .clone()
                .unwrap_or_else(|| format!("{}:invoke[{}]", id, i));
            let src = services
                .lookup(&invoke.src)
                .ok_or_else(|| CoreError::UnknownService {
                    name: invoke.src.clone(),
                })?;
            def = def.invoke(
                ServiceDef::new(src)
                    .with_id(service_id.as_str())
                    .with_input(invoke.input.clone()),
            );
            if let Some(list) = &invoke.on_done {
                for t in list.to_defs(&EventPattern::ServiceSuccess(service_id.clone()))? {
                    def = def.transition(t);
                }
            }
            if let Some(list) = &invoke.on_error {
                for t in list.to_defs(&EventPattern::ServiceError(service_id.clone()))? {
                    def = def.transition(t);
                }
            }
        }

        for (child_key, child) in self.states.iter() {
            if child_key.is_empty() || child_key.contains(crate::id::PATH_SEPARATOR) {
                return Err(CoreError::InvalidDefinition {
                    reason: format!("{}: invalid state key '{}'", id, child_key),
                });
            }
            def = def.child(child.to_node_def(&id.child(child_key), services)?);
        }

        Ok(def)
    }
}

/// Raw chart document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartRaw {
    /// Key of the root state.
    pub id: String,
    /// Initial context.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub context: Value,
    #[serde(flatten)]
    pub root: StateNodeRaw,
}

/// Parsed chart definition.
#[derive(Debug, Clone)]
pub struct ChartDefinition {
    pub raw: ChartRaw,
    /// crc32c of the canonical JSON, for integrity checks.
    pub checksum: String,
}

impl ChartDefinition {
    /// Parses a chart from JSON.
    pub fn from_json(json: &Value) -> Result<Self, CoreError> {
        let raw: ChartRaw = serde_json::from_value(json.clone())?;
        Self::from_raw(raw)
    }

    /// Parses a chart from JSON text.
    pub fn parse(text: &str) -> Result<Self, CoreError> {
        let raw: ChartRaw = serde_json::from_str(text)?;
        Self::from_raw(raw)
    }

    pub fn from_raw(raw: ChartRaw) -> Result<Self, CoreError> {
        if StateNodeId::parse(&raw.id).is_none() || raw.id.contains(crate::id::PATH_SEPARATOR) {
            return Err(CoreError::InvalidDefinition {
                reason: format!("invalid chart id '{}'", raw.id),
            });
        }

        let json_bytes = serde_json::to_vec(&raw)?;
        let checksum = format!("{:08x}", crc32c::crc32c(&json_bytes));

        Ok(Self { raw, checksum })
    }

    pub fn id(&self) -> &str {
        &self.raw.id
    }

    /// Initial context declared by the chart (`null` if none).
    pub fn context(&self) -> &Value {
        &self.raw.context
    }

    /// Converts the chart into a node definition, resolving services.
    pub fn to_node_def(&self, services: &dyn ServiceLookup) -> Result<StateNodeDef<Value>, CoreError> {
        self.raw
            .root
            .to_node_def(&StateNodeId::root(self.raw.id.as_str()), services)
    }

    /// Builds the validated state tree.
    pub fn build(&self, services: &dyn ServiceLookup) -> Result<StateTree<Value>, CoreError> {
        StateTree::build(self.to_node_def(services)?)
    }

    /// Returns the raw definition as JSON.
    pub fn to_json(&self) -> Result<Value, CoreError> {
        Ok(serde_json::to_value(&self.raw)?)
    }
}
