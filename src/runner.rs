//! Per-host task runner
//!
//! A [`HostRunner`] walks the task list for one host, strictly in order,
//! and produces at most one [`ResultRecord`] per task. Each task goes
//! through the attempt loop below and the failure class of the last error
//! decides what happens next:
//!
//! | class           | retried | host continues |
//! |-----------------|---------|----------------|
//! | configuration   | no      | yes            |
//! | execution       | yes     | yes            |
//! | connectivity    | no      | no (aborted)   |
//! | cancelled       | no      | no             |

use crate::cancel::RunContext;
use crate::error::ModuleError;
use crate::metrics::RunMetrics;
use crate::models::{FailureKind, Host, ResultRecord, Task};
use crate::modules::{execute_isolated, ModuleRegistry};
use crate::report::{Reporter, RunEvent};
use crate::retry::{RetryDefaults, RetryPolicy, RetryState};
use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Where the runner is in the host's lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    /// Working through the task list
    Running,
    /// Stopped early: host unreachable or run cancelled
    Aborted,
    /// Task list exhausted
    Done,
}

/// Shared, append-only result collection
///
/// Cloned into every host runner. Each record is appended under the mutex
/// before it is counted in the metrics and streamed to the reporter, so a
/// panicking reporter cannot lose a finished task.
#[derive(Clone, Default)]
pub struct ResultSink {
    records: Arc<Mutex<Vec<ResultRecord>>>,
    reporter: Option<Arc<dyn Reporter>>,
    metrics: Option<RunMetrics>,
}

impl ResultSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stream every record to `reporter` as it is produced
    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn with_metrics(mut self, metrics: RunMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Append one record
    pub fn push(&self, record: ResultRecord) {
        self.lock().push(record.clone());

        if let Some(metrics) = &self.metrics {
            metrics.record_task(&record);
        }
        if let Some(reporter) = &self.reporter {
            reporter.emit(RunEvent::Record(&record));
        }
    }

    /// Copy of every record so far, in completion order
    pub fn records(&self) -> Vec<ResultRecord> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // A panic elsewhere never leaves a half-written record behind, so a
    // poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, Vec<ResultRecord>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for ResultSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultSink")
            .field("records", &self.len())
            .field("streaming", &self.reporter.is_some())
            .finish()
    }
}

/// Everything host runners of one run share
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub tasks: Arc<[Task]>,
    pub registry: Arc<ModuleRegistry>,
    pub retry: RetryDefaults,
}

impl RunPlan {
    pub fn new(tasks: Vec<Task>, registry: ModuleRegistry, retry: RetryDefaults) -> Self {
        Self {
            tasks: tasks.into(),
            registry: Arc::new(registry),
            retry,
        }
    }
}

/// Failed outcome of one task, before it becomes a record
struct TaskFailure {
    kind: FailureKind,
    message: String,
}

/// Runs the task list against one host
pub struct HostRunner {
    host: Host,
    plan: RunPlan,
    ctx: RunContext,
    sink: ResultSink,
    session_id: Uuid,
    state: HostState,
}

impl HostRunner {
    /// New runner with a fresh session id
    pub fn new(host: Host, plan: RunPlan, ctx: RunContext, sink: ResultSink) -> Self {
        Self {
            host,
            plan,
            ctx,
            sink,
            session_id: Uuid::new_v4(),
            state: HostState::Running,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn state(&self) -> HostState {
        self.state
    }

    /// Process every task and return the final state
    pub async fn run(mut self) -> HostState {
        info!(
            "Starting host {} ({}) [session {}]",
            self.host.name, self.host.address, self.session_id
        );

        let tasks = Arc::clone(&self.plan.tasks);
        for task in tasks.iter() {
            if let Some(reason) = self.ctx.reason() {
                info!(
                    "Host {}: {} before task '{}', stopping",
                    self.host.name, reason, task.name
                );
                self.state = HostState::Aborted;
                break;
            }

            self.run_task(task).await;

            if self.state != HostState::Running {
                break;
            }
        }

        if self.state == HostState::Running {
            self.state = HostState::Done;
        }

        info!("Finished host {} ({:?})", self.host.name, self.state);
        self.state
    }

    async fn run_task(&mut self, task: &Task) {
        let event_id = Uuid::new_v4();
        let started = Instant::now();

        let Some(module) = self.plan.registry.get(&task.module) else {
            let message = format!("Module {} not found for task {}", task.module, task.name);
            warn!("Host {}: {}", self.host.name, message);
            self.finish(task, event_id, started, 0, Err(TaskFailure {
                kind: FailureKind::Configuration,
                message,
            }));
            return;
        };

        let policy = RetryPolicy::for_task(task, &self.plan.retry);
        let mut retry = RetryState::new();

        loop {
            debug!(
                "Host {}: task '{}' attempt {}/{}",
                self.host.name, task.name, retry.attempt, policy.max_attempts
            );

            let err = match execute_isolated(module.as_ref(), &self.ctx, &self.host, &task.params)
                .await
            {
                Ok(output) => {
                    info!("Host {}: task '{}' succeeded", self.host.name, task.name);
                    self.finish(task, event_id, started, retry.attempt, Ok(output));
                    return;
                }
                Err(err) => err,
            };

            let kind = err.kind();
            if kind == FailureKind::Execution && retry.should_retry(&policy) {
                warn!(
                    "Host {}: task '{}' failed (attempt {}/{}): {}. Retrying in {:?}",
                    self.host.name, task.name, retry.attempt, policy.max_attempts, err, policy.delay
                );

                if let Err(reason) = self.ctx.sleep(policy.delay).await {
                    let err = ModuleError::Cancelled(reason);
                    self.fail(task, event_id, started, retry.attempt, &err);
                    return;
                }

                retry.record_retry();
                continue;
            }

            self.fail(task, event_id, started, retry.attempt, &err);
            return;
        }
    }

    /// Record a terminal failure and move the state machine
    fn fail(
        &mut self,
        task: &Task,
        event_id: Uuid,
        started: Instant,
        attempts: u32,
        err: &ModuleError,
    ) {
        let kind = err.kind();
        let message = format!(
            "Task {} failed after {} attempt(s): {}",
            task.name, attempts, err
        );

        match kind {
            FailureKind::Connectivity => {
                error!(
                    "Host {} unreachable, skipping remaining tasks: {}",
                    self.host.name, err
                );
                self.state = HostState::Aborted;
            }
            FailureKind::Cancelled => {
                warn!("Host {}: task '{}' {}", self.host.name, task.name, err);
                self.state = HostState::Aborted;
            }
            FailureKind::Configuration | FailureKind::Execution => {
                error!("Host {}: {}", self.host.name, message);
            }
        }

        self.finish(task, event_id, started, attempts, Err(TaskFailure { kind, message }));
    }

    fn finish(
        &self,
        task: &Task,
        event_id: Uuid,
        started: Instant,
        attempts: u32,
        outcome: Result<String, TaskFailure>,
    ) {
        let duration: Duration = started.elapsed();
        let (success, result, error, failure) = match outcome {
            Ok(output) => (true, Some(output), None, None),
            Err(failure) => (false, None, Some(failure.message), Some(failure.kind)),
        };

        self.sink.push(ResultRecord {
            host: self.host.name.clone(),
            task: task.name.clone(),
            module: task.module.clone(),
            success,
            result,
            error,
            failure,
            attempts,
            event_id,
            session_id: self.session_id,
            executed_at: Utc::now(),
            duration,
        });
    }
}
