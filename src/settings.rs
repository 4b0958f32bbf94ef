//! Engine settings
//!
//! Layered with the `config` crate, later layers winning:
//!
//! 1. built-in defaults
//! 2. an optional settings file (YAML, TOML or JSON, by extension)
//! 3. `FLEETRUN_*` environment variables, e.g. `FLEETRUN_MAX_ATTEMPTS=5`
//!
//! Command-line flags are applied on top by the binary.
//!
//! ```yaml
//! max_attempts: 3
//! retry_delay: 2s
//! run_timeout: 10m   # "0" disables the deadline
//! parallel: true
//! stream: true
//! ```

use crate::cancel::RunContext;
use crate::error::{FleetError, Result};
use crate::parser::parse_duration;
use crate::retry::{RetryDefaults, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Default deadline for a whole run
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(600);

const ENV_PREFIX: &str = "FLEETRUN";

/// Settings as they appear in files and the environment
#[derive(Debug, Deserialize)]
struct RawSettings {
    max_attempts: u32,
    retry_delay: String,
    run_timeout: String,
    parallel: bool,
    stream: bool,
}

/// Resolved engine settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Defaults for tasks without their own retry settings
    pub retry: RetryDefaults,
    /// Deadline for the whole run; `None` runs without one
    pub run_timeout: Option<Duration>,
    /// Process hosts concurrently (`true`) or one at a time
    pub parallel: bool,
    /// Report each record as it is produced
    pub stream: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            retry: RetryDefaults::default(),
            run_timeout: Some(DEFAULT_RUN_TIMEOUT),
            parallel: true,
            stream: true,
        }
    }
}

impl EngineSettings {
    /// Load defaults, then `path` if given, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_from(path, Environment::with_prefix(ENV_PREFIX))
    }

    fn load_from(path: Option<&Path>, env: Environment) -> Result<Self> {
        let mut builder = Config::builder()
            .set_default("max_attempts", i64::from(DEFAULT_MAX_ATTEMPTS))?
            .set_default("retry_delay", "2s")?
            .set_default("run_timeout", "10m")?
            .set_default("parallel", true)?
            .set_default("stream", true)?;

        if let Some(path) = path {
            debug!("Loading settings from {}", path.display());
            builder = builder.add_source(File::from(path).required(true));
        }

        let raw: RawSettings = builder
            .add_source(env.try_parsing(true))
            .build()?
            .try_deserialize()?;

        Self::from_raw(raw)
    }

    fn from_raw(raw: RawSettings) -> Result<Self> {
        if raw.max_attempts == 0 {
            return Err(FleetError::Validation(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        let retry_delay = parse_duration(&raw.retry_delay)?;
        let run_timeout = parse_duration(&raw.run_timeout)?;

        Ok(Self {
            retry: RetryDefaults::new(raw.max_attempts, retry_delay),
            run_timeout: (!run_timeout.is_zero()).then_some(run_timeout),
            parallel: raw.parallel,
            stream: raw.stream,
        })
    }

    /// Fresh run context honoring `run_timeout`
    pub fn context(&self) -> RunContext {
        match self.run_timeout {
            Some(timeout) => RunContext::with_timeout(timeout),
            None => RunContext::new(),
        }
    }
}
