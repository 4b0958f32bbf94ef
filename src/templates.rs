//! Starter files for `fleetrun template`

/// Metadata for a template type.
#[derive(Debug, Clone)]
pub struct TemplateInfo {
    /// Template name (matches the CLI `--type` value).
    pub name: &'static str,
    pub description: &'static str,
}

/// Every available template.
pub fn list_templates() -> Vec<TemplateInfo> {
    vec![
        TemplateInfo {
            name: "inventory",
            description: "Hosts with key and password authentication",
        },
        TemplateInfo {
            name: "tasks",
            description: "Shell tasks with per-task retry settings",
        },
    ]
}

/// YAML content for `template_type` (`inventory` or `tasks`).
pub fn get_template(template_type: &str) -> Option<&'static str> {
    match template_type {
        "inventory" => Some(TEMPLATE_INVENTORY),
        "tasks" => Some(TEMPLATE_TASKS),
        _ => None,
    }
}

const TEMPLATE_INVENTORY: &str = r#"# fleetrun inventory
# Each host needs exactly one of private_key or password.
hosts:
  - name: web1
    address: 192.168.1.10
    user: deploy
    private_key: /home/deploy/.ssh/id_ed25519

  - name: web2
    address: web2.internal
    port: 2222
    user: deploy
    private_key: /home/deploy/.ssh/id_ed25519
    # Connection attempts and the wait between them
    retry_ssh_count: 3
    retry_ssh: 5s

  - name: db1
    address: 192.168.1.20
    user: admin
    password: change-me
"#;

const TEMPLATE_TASKS: &str = r#"# fleetrun task list
# Tasks run in order on every host. Hosts run concurrently unless
# --sequential is given.
- name: Check uptime
  module: shell
  params:
    command: uptime

- name: Disk usage
  module: shell
  params:
    command: df -h /

- name: Restart service
  module: shell
  params:
    command: sudo systemctl restart nginx
  # Up to 5 attempts, 10 seconds apart
  max_retries: 5
  retry_delay: 10s
"#;
