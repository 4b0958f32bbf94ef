//! Core data models for fleetrun

use crate::cancel::CancelReason;
use crate::error::ModuleError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

// Input validation limits
pub const MAX_YAML_SIZE: usize = 1_048_576; // 1 MB
pub const MAX_TASK_COUNT: usize = 1_000;
pub const MAX_HOST_COUNT: usize = 10_000;
pub const MAX_NAME_LEN: usize = 128;
pub const MAX_COMMAND_LEN: usize = 4_096; // 4 KB

pub const DEFAULT_SSH_PORT: u16 = 22;

/// Inventory document: `hosts: [...]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub hosts: Vec<Host>,
}

/// A remote machine subject to task execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub name: String,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>, // Default: 22
    #[serde(default)]
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>, // Path to SSH private key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_ssh: Option<String>, // Connection retry delay, e.g. "5s"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_ssh_count: Option<u32>, // Connection attempts
}

/// How a host authenticates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    KeyFile(PathBuf),
    Password(String),
}

impl Host {
    /// Host with an address and nothing else configured
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            port: None,
            user: String::new(),
            private_key: None,
            password: None,
            retry_ssh: None,
            retry_ssh_count: None,
        }
    }

    pub fn port(&self) -> u16 {
        match self.port {
            Some(port) if port != 0 => port,
            _ => DEFAULT_SSH_PORT,
        }
    }

    /// Resolve the single configured authentication method.
    ///
    /// Empty strings count as absent. Neither or both configured is an error.
    pub fn credentials(&self) -> std::result::Result<Credentials, ModuleError> {
        let key = self.private_key.as_deref().filter(|k| !k.is_empty());
        let password = self.password.as_deref().filter(|p| !p.is_empty());

        match (key, password) {
            (Some(key), None) => Ok(Credentials::KeyFile(PathBuf::from(key))),
            (None, Some(password)) => Ok(Credentials::Password(password.to_string())),
            (None, None) => Err(ModuleError::InvalidConfig(format!(
                "no authentication method provided for host '{}' (private key or password)",
                self.name
            ))),
            (Some(_), Some(_)) => Err(ModuleError::InvalidConfig(format!(
                "host '{}' sets both private_key and password; configure exactly one",
                self.name
            ))),
        }
    }
}

/// A named unit of work bound to a module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    pub module: String,
    #[serde(default)]
    pub params: HashMap<String, String>,
    /// Maximum attempts; 0 or absent uses the engine default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// Delay between attempts, e.g. "3s"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay: Option<String>,
}

impl Task {
    pub fn new(name: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
            params: HashMap::new(),
            max_retries: None,
            retry_delay: None,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_retry_delay(mut self, delay: impl Into<String>) -> Self {
        self.retry_delay = Some(delay.into());
        self
    }
}

/// Failure class of a task outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Unknown module or unusable parameters; never retried
    Configuration,
    /// Command-level failure; retried per policy
    Execution,
    /// Host unreachable; aborts the host
    Connectivity,
    /// Run context ended
    Cancelled,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Configuration => write!(f, "configuration"),
            FailureKind::Execution => write!(f, "execution"),
            FailureKind::Connectivity => write!(f, "connectivity"),
            FailureKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Immutable outcome of one task on one host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub host: String,
    pub task: String,
    pub module: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    pub attempts: u32,
    pub event_id: Uuid,
    pub session_id: Uuid,
    pub executed_at: DateTime<Utc>,
    pub duration: Duration,
}

impl ResultRecord {
    pub fn is_unreachable(&self) -> bool {
        self.failure == Some(FailureKind::Connectivity)
    }
}

/// Final status of a host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HostStatus {
    Ok,
    Failed,
    Unreachable,
}

impl std::fmt::Display for HostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostStatus::Ok => write!(f, "OK"),
            HostStatus::Failed => write!(f, "FAILED"),
            HostStatus::Unreachable => write!(f, "UNREACHABLE"),
        }
    }
}

/// Per-host counts derived from result records
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSummary {
    pub total: usize,
    pub failed: usize,
    pub unreachable: bool,
    pub cancelled: bool,
    /// The host worker faulted; its records may be incomplete
    #[serde(default)]
    pub faulted: bool,
}

impl HostSummary {
    pub fn succeeded(&self) -> usize {
        self.total - self.failed
    }

    pub fn status(&self) -> HostStatus {
        if self.unreachable {
            HostStatus::Unreachable
        } else if self.failed > 0 || self.faulted {
            HostStatus::Failed
        } else {
            HostStatus::Ok
        }
    }
}

/// Fault caught at a host worker boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostFault {
    pub host: String,
    pub message: String,
}

/// Everything a run produced
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    /// Records in completion order
    pub records: Vec<ResultRecord>,
    pub summary: BTreeMap<String, HostSummary>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub faults: Vec<HostFault>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled: Option<CancelReason>,
}

impl RunReport {
    /// True when every host finished OK and no host faulted
    pub fn all_ok(&self) -> bool {
        self.faults.is_empty()
            && self
                .summary
                .values()
                .all(|summary| summary.status() == HostStatus::Ok)
    }

    /// Records of one host, in the order they were produced
    pub fn records_for<'a>(&'a self, host: &'a str) -> impl Iterator<Item = &'a ResultRecord> + 'a {
        self.records.iter().filter(move |record| record.host == host)
    }
}

/// Build the per-host summary. Every host in `hosts` gets an entry, even
/// when it produced no records. A host with a fault is never `OK`.
pub fn summarize(
    hosts: &[Host],
    records: &[ResultRecord],
    faults: &[HostFault],
) -> BTreeMap<String, HostSummary> {
    let mut summary: BTreeMap<String, HostSummary> = hosts
        .iter()
        .map(|host| (host.name.clone(), HostSummary::default()))
        .collect();

    for record in records {
        let entry = summary.entry(record.host.clone()).or_default();
        entry.total += 1;
        if !record.success {
            entry.failed += 1;
            match record.failure {
                Some(FailureKind::Connectivity) => entry.unreachable = true,
                Some(FailureKind::Cancelled) => entry.cancelled = true,
                _ => {}
            }
        }
    }

    for fault in faults {
        summary.entry(fault.host.clone()).or_default().faulted = true;
    }

    summary
}
