//! Loading inventories and task lists from disk, then running them
//!
//! Tests the complete flow: YAML files → parsing → engine run → summary

use async_trait::async_trait;
use fleetrun::parser::{parse_inventory_file, parse_tasks_file};
use fleetrun::{
    Engine, EngineSettings, FleetError, Host, HostStatus, Module, ModuleError, ModuleRegistry,
    RunContext,
};
use std::collections::HashMap;
use std::io::Write;
use tempfile::{NamedTempFile, TempDir};

/// Stands in for the SSH shell module: echoes the command back
struct FakeShell;

#[async_trait]
impl Module for FakeShell {
    async fn execute(
        &self,
        _ctx: &RunContext,
        host: &Host,
        params: &HashMap<String, String>,
    ) -> Result<String, ModuleError> {
        let command = params
            .get("command")
            .ok_or_else(|| ModuleError::MissingParameter("command".to_string()))?;
        Ok(format!("{}@{}:{} $ {}", host.user, host.address, host.port(), command))
    }
}

fn write_temp(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

const INVENTORY: &str = r#"
hosts:
  - name: web1
    address: 192.168.1.10
    user: deploy
    private_key: /home/deploy/.ssh/id_ed25519
  - name: web2
    address: 192.168.1.11
    port: 2222
    user: deploy
    password: secret
    retry_ssh: 3s
    retry_ssh_count: 2
"#;

const TASKS: &str = r#"
- name: Check uptime
  module: shell
  params:
    command: uptime
- name: Missing command
  module: shell
- name: Restart
  module: shell
  params:
    command: systemctl restart nginx
  max_retries: 5
  retry_delay: 10s
"#;

#[test]
fn test_load_inventory_file() {
    let file = write_temp(INVENTORY);
    let inventory = parse_inventory_file(file.path()).unwrap();

    assert_eq!(inventory.hosts.len(), 2);
    assert_eq!(inventory.hosts[0].port(), 22);
    assert_eq!(inventory.hosts[1].port(), 2222);
    assert_eq!(inventory.hosts[1].retry_ssh.as_deref(), Some("3s"));
    assert_eq!(inventory.hosts[1].retry_ssh_count, Some(2));
}

#[test]
fn test_load_tasks_file_keeps_order() {
    let file = write_temp(TASKS);
    let tasks = parse_tasks_file(file.path()).unwrap();

    let names: Vec<&str> = tasks.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["Check uptime", "Missing command", "Restart"]);
    assert_eq!(tasks[2].max_retries, Some(5));
    assert!(tasks[1].params.is_empty());
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = TempDir::new().unwrap();
    let result = parse_inventory_file(dir.path().join("nope.yaml"));
    assert!(matches!(result, Err(FleetError::Io(_))));
}

#[test]
fn test_malformed_yaml_is_rejected() {
    let file = write_temp("hosts:\n  - name: [unterminated\n");
    assert!(matches!(
        parse_inventory_file(file.path()),
        Err(FleetError::YamlParse(_))
    ));

    // A task list must be a sequence
    let file = write_temp("name: lonely\nmodule: shell\n");
    assert!(parse_tasks_file(file.path()).is_err());
}

#[tokio::test]
async fn test_run_loaded_files() {
    let inventory = parse_inventory_file(write_temp(INVENTORY).path()).unwrap();
    let tasks = parse_tasks_file(write_temp(TASKS).path()).unwrap();

    let settings = EngineSettings {
        run_timeout: None,
        ..EngineSettings::default()
    };
    let engine = Engine::new(ModuleRegistry::new().with("shell", FakeShell), settings);
    let report = engine.run(inventory.hosts, tasks).await;

    assert_eq!(report.records.len(), 6);

    let web2: Vec<_> = report.records_for("web2").collect();
    assert_eq!(
        web2[0].result.as_deref(),
        Some("deploy@192.168.1.11:2222 $ uptime")
    );
    // Configuration errors are not retried and do not stop the host
    assert!(!web2[1].success);
    assert_eq!(web2[1].attempts, 1);
    assert!(web2[2].success);

    assert_eq!(report.summary["web1"].total, 3);
    assert_eq!(report.summary["web1"].failed, 1);
    assert_eq!(report.summary["web1"].status(), HostStatus::Failed);
}
