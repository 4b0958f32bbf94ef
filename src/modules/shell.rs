//! `shell` module: run a command on the host over SSH

use crate::cancel::RunContext;
use crate::error::ModuleError;
use crate::models::{Host, MAX_COMMAND_LEN};
use crate::modules::ssh::{connect, run_command, SshDefaults, SshTarget};
use crate::modules::Module;
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::info;

/// Runs the `command` parameter through the host's login shell
#[derive(Debug, Clone, Default)]
pub struct ShellModule {
    defaults: SshDefaults,
}

impl ShellModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Module with custom connection retry defaults
    pub fn with_defaults(defaults: SshDefaults) -> Self {
        Self { defaults }
    }

    /// Validate the task parameters and return the command
    fn command<'a>(params: &'a HashMap<String, String>) -> Result<&'a str, ModuleError> {
        let command = params
            .get("command")
            .ok_or_else(|| ModuleError::MissingParameter("command".to_string()))?;

        if command.trim().is_empty() {
            return Err(ModuleError::InvalidConfig(
                "parameter 'command' is empty".to_string(),
            ));
        }

        if command.len() > MAX_COMMAND_LEN {
            return Err(ModuleError::InvalidConfig(format!(
                "parameter 'command' exceeds maximum length of {} bytes",
                MAX_COMMAND_LEN
            )));
        }

        Ok(command)
    }
}

#[async_trait]
impl Module for ShellModule {
    async fn execute(
        &self,
        ctx: &RunContext,
        host: &Host,
        params: &HashMap<String, String>,
    ) -> Result<String, ModuleError> {
        let command = Self::command(params)?;
        let target = SshTarget::from_host(host, &self.defaults)?;

        info!(
            "Executing shell command on {}@{}: {}",
            target.user, target.addr, command
        );

        let connection = connect(ctx, &target).await?;
        run_command(ctx, connection, command).await
    }
}
