//! Execution engine
//!
//! Fans the task list out over the inventory. Every host gets its own
//! [`HostRunner`] spawned as a tokio task, so a panic that escapes a host
//! worker surfaces as a `JoinError` and is recorded as a [`HostFault`]
//! instead of taking the run down. In sequential mode each host task is
//! awaited before the next one is spawned.

use crate::cancel::RunContext;
use crate::metrics::RunMetrics;
use crate::models::{summarize, Host, HostFault, RunReport, Task};
use crate::modules::{panic_message, ModuleRegistry};
use crate::report::{NullReporter, Reporter, RunEvent};
use crate::runner::{HostRunner, HostState, ResultSink, RunPlan};
use crate::settings::EngineSettings;
use std::sync::Arc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info};

/// Runs task lists against inventories
pub struct Engine {
    registry: Arc<ModuleRegistry>,
    settings: EngineSettings,
    reporter: Arc<dyn Reporter>,
    metrics: Option<RunMetrics>,
}

impl Engine {
    pub fn new(registry: ModuleRegistry, settings: EngineSettings) -> Self {
        Self {
            registry: Arc::new(registry),
            settings,
            reporter: Arc::new(NullReporter),
            metrics: None,
        }
    }

    /// Send run events to `reporter`
    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_metrics(mut self, metrics: RunMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Run under a fresh context built from the configured run timeout
    pub async fn run(&self, hosts: Vec<Host>, tasks: Vec<Task>) -> RunReport {
        let ctx = self.settings.context();
        self.run_with_context(&ctx, hosts, tasks).await
    }

    /// Run under a caller-provided context
    ///
    /// Always completes: failed tasks, unreachable hosts and faulted host
    /// workers all end up in the returned report.
    pub async fn run_with_context(
        &self,
        ctx: &RunContext,
        hosts: Vec<Host>,
        tasks: Vec<Task>,
    ) -> RunReport {
        info!(
            "Running {} task(s) on {} host(s) ({})",
            tasks.len(),
            hosts.len(),
            if self.settings.parallel {
                "concurrent"
            } else {
                "sequential"
            }
        );

        let plan = RunPlan {
            tasks: tasks.into(),
            registry: Arc::clone(&self.registry),
            retry: self.settings.retry,
        };

        let mut sink = ResultSink::new();
        if self.settings.stream {
            sink = sink.with_reporter(Arc::clone(&self.reporter));
        }
        if let Some(metrics) = &self.metrics {
            sink = sink.with_metrics(metrics.clone());
        }

        let mut faults = Vec::new();
        if self.settings.parallel {
            let handles: Vec<_> = hosts
                .iter()
                .map(|host| {
                    let handle = self.spawn_host(host.clone(), &plan, ctx, &sink);
                    (host.name.clone(), handle)
                })
                .collect();

            for (name, handle) in handles {
                faults.extend(self.join_host(name, handle.await));
            }
        } else {
            for host in &hosts {
                let handle = self.spawn_host(host.clone(), &plan, ctx, &sink);
                faults.extend(self.join_host(host.name.clone(), handle.await));
            }
        }

        let records = sink.records();
        let summary = summarize(&hosts, &records, &faults);
        if let Some(metrics) = &self.metrics {
            summary.values().for_each(|host| metrics.record_host(host));
        }

        let report = RunReport {
            records,
            summary,
            faults,
            cancelled: ctx.reason(),
        };

        match report.cancelled {
            Some(reason) => info!("Run stopped early: {}", reason),
            None => info!("Run completed: {} record(s)", report.records.len()),
        }

        self.reporter.emit(RunEvent::Finished(&report));
        report
    }

    fn spawn_host(
        &self,
        host: Host,
        plan: &RunPlan,
        ctx: &RunContext,
        sink: &ResultSink,
    ) -> JoinHandle<HostState> {
        let runner = HostRunner::new(host, plan.clone(), ctx.clone(), sink.clone());
        let active = ActiveHost::enter(self.metrics.clone());

        tokio::spawn(async move {
            let _active = active;
            runner.run().await
        })
    }

    /// Turn a host task's join result into an optional fault
    fn join_host(
        &self,
        host: String,
        joined: std::result::Result<HostState, JoinError>,
    ) -> Option<HostFault> {
        let err = match joined {
            Ok(state) => {
                debug!("Host {} worker exited ({:?})", host, state);
                return None;
            }
            Err(err) => err,
        };

        let message = if err.is_panic() {
            panic_message(&*err.into_panic())
        } else {
            err.to_string()
        };

        error!("Recovered from fault on host {}: {}", host, message);
        let fault = HostFault { host, message };
        self.reporter.emit(RunEvent::HostFault(&fault));
        Some(fault)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("registry", &self.registry)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Keeps the active hosts gauge up while a host worker lives, panics included
struct ActiveHost(Option<RunMetrics>);

impl ActiveHost {
    fn enter(metrics: Option<RunMetrics>) -> Self {
        if let Some(metrics) = &metrics {
            metrics.inc_active_hosts();
        }
        Self(metrics)
    }
}

impl Drop for ActiveHost {
    fn drop(&mut self) {
        if let Some(metrics) = &self.0 {
            metrics.dec_active_hosts();
        }
    }
}
