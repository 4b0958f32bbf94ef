//! fleetrun - run ordered task lists against a fleet of hosts over SSH
//!
//! Load an inventory and a task list with [`parser`], then hand both to an
//! [`Engine`]. Every host runs the tasks in order; hosts run concurrently
//! unless configured otherwise. Results flow to a [`report::Reporter`] and
//! come back as a [`RunReport`].

pub mod cancel;
pub mod classify;
pub mod cli;
pub mod engine;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod modules;
pub mod parser;
pub mod report;
pub mod retry;
pub mod runner;
pub mod settings;
pub mod templates;

pub use cancel::{CancelReason, RunContext};
pub use engine::Engine;
pub use error::{FleetError, ModuleError, Result};
pub use models::{FailureKind, Host, HostStatus, HostSummary, ResultRecord, RunReport, Task};
pub use modules::{Module, ModuleRegistry};
pub use settings::EngineSettings;
