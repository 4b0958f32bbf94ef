//! Task retry policy
//!
//! Every task gets a maximum number of attempts and a fixed delay between
//! attempts. Both come from the task when it sets them and from the
//! engine-wide [`RetryDefaults`] otherwise. An unparseable delay is logged
//! and replaced by the default; it never fails the run.
//!
//! # Example
//!
//! ```
//! use fleetrun::models::Task;
//! use fleetrun::retry::{RetryDefaults, RetryPolicy, RetryState};
//! use std::time::Duration;
//!
//! let task = Task::new("restart", "shell").with_max_retries(5);
//! let policy = RetryPolicy::for_task(&task, &RetryDefaults::default());
//! assert_eq!(policy.max_attempts, 5);
//! assert_eq!(policy.delay, Duration::from_secs(2));
//!
//! let mut state = RetryState::new();
//! while state.should_retry(&policy) {
//!     state.record_retry();
//! }
//! assert_eq!(state.attempt, 5);
//! ```

use crate::models::Task;
use crate::parser::duration_or_default;
use std::time::Duration;
use tracing::debug;

/// Default maximum attempts per task
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay between attempts
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Engine-wide retry defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDefaults {
    /// Attempts used when a task does not set `max_retries` (at least 1)
    pub max_attempts: u32,
    /// Delay used when a task does not set a valid `retry_delay`
    pub delay: Duration,
}

impl RetryDefaults {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

impl Default for RetryDefaults {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY)
    }
}

/// Effective retry values for one task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total module invocations allowed, including the first
    pub max_attempts: u32,
    /// Wait between a failed attempt and the next one
    pub delay: Duration,
}

impl RetryPolicy {
    /// Resolve the policy for `task` against the engine defaults
    pub fn for_task(task: &Task, defaults: &RetryDefaults) -> Self {
        let max_attempts = match task.max_retries {
            Some(attempts) if attempts > 0 => attempts,
            _ => defaults.max_attempts,
        };

        let what = format!("retry_delay for task '{}'", task.name);
        let delay = duration_or_default(task.retry_delay.as_deref(), defaults.delay, &what);

        debug!(
            "Retry policy for task '{}': {} attempt(s), {:?} delay",
            task.name, max_attempts, delay
        );

        Self {
            max_attempts,
            delay,
        }
    }
}

/// Attempt counter for one task on one host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    /// Current attempt number (starts at 1)
    pub attempt: u32,
}

impl RetryState {
    pub fn new() -> Self {
        Self { attempt: 1 }
    }

    /// Whether another attempt is allowed after the current one
    pub fn should_retry(&self, policy: &RetryPolicy) -> bool {
        self.attempt < policy.max_attempts
    }

    /// Move to the next attempt
    pub fn record_retry(&mut self) {
        self.attempt += 1;
    }
}

impl Default for RetryState {
    fn default() -> Self {
        Self::new()
    }
}
