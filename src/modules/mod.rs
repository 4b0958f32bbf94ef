//! Task execution modules
//!
//! A module executes one task's logic against one host. Modules are looked
//! up by name in a [`ModuleRegistry`] and always invoked through
//! [`execute_isolated`], which turns a panic inside the module into an
//! ordinary [`ModuleError::Panicked`].

pub mod shell;
pub mod ssh;

use crate::cancel::RunContext;
use crate::error::ModuleError;
use crate::models::Host;
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

pub use shell::ShellModule;

/// Executor capability for one task type
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Module: Send + Sync {
    /// Run the task against `host` and return its output text
    async fn execute(
        &self,
        ctx: &RunContext,
        host: &Host,
        params: &HashMap<String, String>,
    ) -> Result<String, ModuleError>;
}

/// Invoke a module, catching any panic at this boundary
pub async fn execute_isolated(
    module: &dyn Module,
    ctx: &RunContext,
    host: &Host,
    params: &HashMap<String, String>,
) -> Result<String, ModuleError> {
    // The call itself happens inside the guarded future: implementations
    // may panic before returning their future.
    let invocation = async { module.execute(ctx, host, params).await };
    match AssertUnwindSafe(invocation).catch_unwind().await
    {
        Ok(result) => result,
        Err(payload) => Err(ModuleError::Panicked(panic_message(&*payload))),
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Name to module lookup, built once at startup
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, Arc<dyn Module>>,
}

impl ModuleRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in modules (`shell`)
    pub fn builtin() -> Self {
        Self::new().with("shell", ShellModule::new())
    }

    /// Add or replace a module, builder style
    pub fn with(mut self, name: impl Into<String>, module: impl Module + 'static) -> Self {
        self.register(name, Arc::new(module));
        self
    }

    /// Add or replace a module
    pub fn register(&mut self, name: impl Into<String>, module: Arc<dyn Module>) {
        self.modules.insert(name.into(), module);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Module>> {
        self.modules.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Registered module names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.modules.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.names())
            .finish()
    }
}
