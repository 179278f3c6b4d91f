//! # harel-runtime
//!
//! Running-instance coordinator for harel.
//!
//! This crate provides:
//! - [`Interpreter`]: start, send, next events, cancellation and completion
//! - The service lifecycle manager: invoked services and `after` timers on tokio
//! - A name-based [`ServiceRegistry`] for JSON charts
//! - Runtime configuration (YAML file plus environment overrides)

pub mod config;
pub mod error;
pub mod instance;
pub mod registry;
pub mod services;

pub use config::{Config, ConfigError, LogConfig, ServicesConfig};
pub use error::RuntimeError;
pub use instance::{Completion, InstanceOptions, InstanceStatus, Interpreter, Snapshot, Termination};
pub use registry::ServiceRegistry;
pub use services::{ServiceManager, ServiceMessage};
