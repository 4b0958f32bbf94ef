//! YAML loading and validation for inventories and task lists

use crate::error::{FleetError, Result};
use crate::models::*;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Parse an inventory from a YAML file.
///
/// The file must contain a `hosts` list. Limits enforced:
/// - YAML file size must be <= 1MB
/// - Host count must be <= 10,000
/// - Host names must be alphanumeric plus `.`, `_`, `-` and unique
///
/// # Errors
///
/// * `FleetError::Io` - If file cannot be read
/// * `FleetError::YamlSizeExceeded` - If file exceeds 1MB
/// * `FleetError::YamlParse` - If YAML is malformed
/// * `FleetError::InvalidName` / `FleetError::Validation` - If a host is unusable
///
/// # Example
///
/// ```no_run
/// use fleetrun::parser::parse_inventory_file;
///
/// let inventory = parse_inventory_file("configs/inventory.yml")?;
/// println!("Loaded {} hosts", inventory.hosts.len());
/// # Ok::<(), fleetrun::error::FleetError>(())
/// ```
pub fn parse_inventory_file<P: AsRef<Path>>(path: P) -> Result<Inventory> {
    let content = fs::read_to_string(path)?;
    parse_inventory_yaml(&content)
}

/// Parse an inventory from a YAML string.
///
/// ```
/// use fleetrun::parser::parse_inventory_yaml;
///
/// let yaml = r#"
/// hosts:
///   - name: web1
///     address: 10.0.0.11
///     user: deploy
///     password: hunter2
/// "#;
///
/// let inventory = parse_inventory_yaml(yaml)?;
/// assert_eq!(inventory.hosts[0].port(), 22);
/// # Ok::<(), fleetrun::error::FleetError>(())
/// ```
pub fn parse_inventory_yaml(content: &str) -> Result<Inventory> {
    check_size(content)?;

    let inventory: Inventory = serde_yaml::from_str(content)?;

    if inventory.hosts.len() > MAX_HOST_COUNT {
        return Err(FleetError::HostCountExceeded {
            count: inventory.hosts.len(),
            limit: MAX_HOST_COUNT,
        });
    }

    let mut seen_names = HashSet::with_capacity(inventory.hosts.len());
    for host in &inventory.hosts {
        validate_host(host)?;
        if !seen_names.insert(host.name.as_str()) {
            return Err(FleetError::Validation(format!(
                "Duplicate host name '{}'",
                host.name
            )));
        }
    }

    Ok(inventory)
}

/// Parse an ordered task list from a YAML file.
pub fn parse_tasks_file<P: AsRef<Path>>(path: P) -> Result<Vec<Task>> {
    let content = fs::read_to_string(path)?;
    parse_tasks_yaml(&content)
}

/// Parse an ordered task list from a YAML string.
///
/// The document is a top-level list. Task names must be unique because a
/// result record is identified by (host, task).
///
/// ```
/// use fleetrun::parser::parse_tasks_yaml;
///
/// let yaml = r#"
/// - name: uptime
///   module: shell
///   params:
///     command: uptime
///   max_retries: 2
///   retry_delay: 500ms
/// "#;
///
/// let tasks = parse_tasks_yaml(yaml)?;
/// assert_eq!(tasks[0].module, "shell");
/// # Ok::<(), fleetrun::error::FleetError>(())
/// ```
pub fn parse_tasks_yaml(content: &str) -> Result<Vec<Task>> {
    check_size(content)?;

    let tasks: Vec<Task> = serde_yaml::from_str(content)?;

    if tasks.len() > MAX_TASK_COUNT {
        return Err(FleetError::TaskCountExceeded {
            count: tasks.len(),
            limit: MAX_TASK_COUNT,
        });
    }

    let mut seen_names = HashSet::with_capacity(tasks.len());
    for task in &tasks {
        validate_task(task)?;
        if !seen_names.insert(task.name.as_str()) {
            return Err(FleetError::Validation(format!(
                "Duplicate task name '{}'",
                task.name
            )));
        }
    }

    Ok(tasks)
}

/// Parse a duration string such as `300ms`, `5s`, `1m30s` or `1.5h`.
///
/// A duration is a sequence of decimal numbers, each with an optional
/// fraction and a mandatory unit (`ns`, `us`, `µs`, `ms`, `s`, `m`, `h`).
/// A bare `0` is accepted. Negative durations are rejected.
///
/// ```
/// use fleetrun::parser::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("1m30s")?, Duration::from_secs(90));
/// assert_eq!(parse_duration("250ms")?, Duration::from_millis(250));
/// assert!(parse_duration("ten seconds").is_err());
/// # Ok::<(), fleetrun::error::FleetError>(())
/// ```
pub fn parse_duration(input: &str) -> Result<Duration> {
    let invalid = |reason: &str| FleetError::InvalidDuration {
        input: input.to_string(),
        reason: reason.to_string(),
    };

    let text = input.trim();
    if text.is_empty() {
        return Err(invalid("empty duration"));
    }
    if text == "0" {
        return Ok(Duration::ZERO);
    }
    if text.starts_with('-') {
        return Err(invalid("negative durations are not allowed"));
    }
    let mut rest = text.strip_prefix('+').unwrap_or(text);

    let mut total_nanos = 0f64;
    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_end == 0 {
            return Err(invalid("expected a number"));
        }
        let value: f64 = rest[..number_end]
            .parse()
            .map_err(|_| invalid("malformed number"))?;
        rest = &rest[number_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_end] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3_600e9,
            "" => return Err(invalid("missing unit")),
            _ => return Err(invalid("unknown unit")),
        };
        rest = &rest[unit_end..];

        total_nanos += value * scale;
    }

    if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
        return Err(invalid("duration out of range"));
    }

    Ok(Duration::from_nanos(total_nanos.round() as u64))
}

/// Parse an optional duration, falling back to `default` with a warning
/// when the value is unparseable.
pub fn duration_or_default(value: Option<&str>, default: Duration, what: &str) -> Duration {
    match value {
        None => default,
        Some(text) if text.trim().is_empty() => default,
        Some(text) => match parse_duration(text) {
            Ok(duration) => duration,
            Err(e) => {
                warn!("Invalid {}: {}, using default {:?}", what, e, default);
                default
            }
        },
    }
}

fn check_size(content: &str) -> Result<()> {
    if content.len() > MAX_YAML_SIZE {
        return Err(FleetError::YamlSizeExceeded(content.len()));
    }
    Ok(())
}

/// Validate a host entry
fn validate_host(host: &Host) -> Result<()> {
    validate_name("host", &host.name, |c| {
        c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
    })?;

    if host.address.trim().is_empty() {
        return Err(FleetError::Validation(format!(
            "Host '{}' has an empty address",
            host.name
        )));
    }

    if host.port == Some(0) {
        return Err(FleetError::Validation(format!(
            "Host '{}' has port 0",
            host.name
        )));
    }

    Ok(())
}

/// Validate a task entry
fn validate_task(task: &Task) -> Result<()> {
    validate_name("task", &task.name, |c| !c.is_control())?;

    if task.module.trim().is_empty() {
        return Err(FleetError::Validation(format!(
            "Task '{}' has no module",
            task.name
        )));
    }

    Ok(())
}

/// Validate name length and characters
fn validate_name(kind: &'static str, name: &str, allowed: impl Fn(char) -> bool) -> Result<()> {
    let invalid = |reason: String| FleetError::InvalidName {
        kind,
        name: name.to_string(),
        reason,
    };

    if name.trim().is_empty() {
        return Err(invalid("name is empty".to_string()));
    }

    if name.len() > MAX_NAME_LEN {
        return Err(invalid(format!("exceeds {} characters", MAX_NAME_LEN)));
    }

    if !name.chars().all(allowed) {
        return Err(invalid("contains forbidden characters".to_string()));
    }

    Ok(())
}
