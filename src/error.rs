//! Error types for fleetrun

use crate::cancel::CancelReason;
use crate::classify::is_connectivity_error;
use crate::models::FailureKind;
use thiserror::Error;

/// Errors raised while loading inventories, task lists and settings
#[derive(Error, Debug)]
pub enum FleetError {
    /// YAML parsing errors
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// YAML size exceeded limit
    #[error("YAML document exceeds 1MB limit (size: {0} bytes)")]
    YamlSizeExceeded(usize),

    /// Task count exceeded limit
    #[error("Task count {count} exceeds limit of {limit}")]
    TaskCountExceeded { count: usize, limit: usize },

    /// Host count exceeded limit
    #[error("Host count {count} exceeds limit of {limit}")]
    HostCountExceeded { count: usize, limit: usize },

    /// Host or task name that is empty, too long or uses forbidden characters
    #[error("Invalid {kind} name '{name}': {reason}")]
    InvalidName {
        kind: &'static str,
        name: String,
        reason: String,
    },

    /// Duration strings such as `retry_delay: 3s`
    #[error("Invalid duration '{input}': {reason}")]
    InvalidDuration { input: String, reason: String },

    /// Generic validation failure
    #[error("Validation error: {0}")]
    Validation(String),

    /// Settings layering errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Metrics registry errors
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using FleetError
pub type Result<T> = std::result::Result<T, FleetError>;

/// Failure of one module invocation against one host
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModuleError {
    /// A parameter the module requires is absent
    #[error("missing required parameter '{0}'")]
    MissingParameter(String),

    /// Parameters or host settings the module cannot work with
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Connection establishment gave up
    #[error("SSH connection failed after {attempts} attempt(s): {message}")]
    Connect { attempts: u32, message: String },

    /// The remote command could not be run or exited non-zero
    #[error("command execution failed: {0}")]
    Command(String),

    /// The module panicked; caught at the invocation boundary
    #[error("panic during module execution: {0}")]
    Panicked(String),

    /// The run context was cancelled or its deadline passed
    #[error("cancelled: {0}")]
    Cancelled(CancelReason),

    /// Any other module-specific failure
    #[error("{0}")]
    Other(String),
}

impl ModuleError {
    /// Failure class that drives the runner's retry and abort decisions.
    ///
    /// Only transport-level errors go through the connectivity heuristic;
    /// command errors carry remote output and are always retryable.
    pub fn kind(&self) -> FailureKind {
        match self {
            ModuleError::MissingParameter(_) | ModuleError::InvalidConfig(_) => {
                FailureKind::Configuration
            }
            ModuleError::Cancelled(_) => FailureKind::Cancelled,
            ModuleError::Command(_) | ModuleError::Panicked(_) => FailureKind::Execution,
            ModuleError::Connect { .. } | ModuleError::Other(_) => {
                if is_connectivity_error(&self.to_string()) {
                    FailureKind::Connectivity
                } else {
                    FailureKind::Execution
                }
            }
        }
    }
}
