//! # harel-core
//!
//! Statechart engine for harel.
//!
//! This crate provides:
//! - State node trees with hierarchical and orthogonal states
//! - Transition selection, microstep computation and stabilization
//! - A three-band event queue and the action executor
//! - Guard expressions and JSON chart definitions
//!
//! It is synchronous. Running services and driving instances over time is
//! done by `harel-runtime`.

pub mod action;
pub mod configuration;
pub mod definition;
pub mod engine;
pub mod error;
pub mod event;
pub mod executor;
pub mod guard;
pub mod id;
pub mod node;
pub mod queue;
pub mod service;
pub mod transition;
pub mod tree;

pub use action::Action;
pub use configuration::Configuration;
pub use definition::ChartDefinition;
pub use engine::{
    DrainOutcome, DrainReport, Engine, EngineConfig, Fault, LifecycleHooks, Microstep,
    MicrostepKind, NoHooks, ServiceErrorPolicy, State,
};
pub use error::{ActionError, CoreError, ServiceError};
pub use event::{Event, EventPattern, Priority};
pub use executor::ActionExecutor;
pub use guard::{Guard, GuardDef, GuardExpr};
pub use id::StateNodeId;
pub use node::{StateNodeDef, TransitionDef};
pub use queue::EventQueue;
pub use service::{service_fn, Service, ServiceDef, ServiceFn, ServiceLookup, ServiceRequest};
pub use transition::{Transition, TransitionRef};
pub use tree::{NodeIndex, StateNode, StateTree};
