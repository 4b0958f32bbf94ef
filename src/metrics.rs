//! Prometheus metrics for a run
//!
//! The CLI writes them in Prometheus text format to `--metrics-file` after
//! the run, for node-exporter's textfile collector or similar.
//!
//! # Available Metrics
//!
//! - `fleetrun_task_results_total{module, outcome}` - Counter of task records
//! - `fleetrun_task_attempts_total{module}` - Counter of module invocations
//! - `fleetrun_task_duration_seconds{module}` - Histogram of task durations
//! - `fleetrun_hosts_total{status}` - Counter of finished hosts by status
//! - `fleetrun_active_hosts` - Gauge of hosts currently being worked on
//!
//! # Example
//!
//! ```
//! use fleetrun::metrics::RunMetrics;
//!
//! # fn example() -> fleetrun::error::Result<()> {
//! let metrics = RunMetrics::new()?;
//! metrics.inc_active_hosts();
//! metrics.dec_active_hosts();
//! assert!(metrics.encode_text()?.contains("fleetrun_active_hosts"));
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

use crate::error::Result;
use crate::models::{HostSummary, ResultRecord};
use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Histogram bucket boundaries for task duration metrics (in seconds)
const TASK_DURATION_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 300.0];

/// Metrics collected while a run executes
#[derive(Clone)]
pub struct RunMetrics {
    registry: Arc<Registry>,
    task_results: CounterVec,
    task_attempts: CounterVec,
    task_duration: HistogramVec,
    hosts: CounterVec,
    active_hosts: Gauge,
}

impl RunMetrics {
    /// Create and register all run metrics in a fresh registry
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let task_results = CounterVec::new(
            Opts::new(
                "fleetrun_task_results_total",
                "Task results by module and outcome",
            ),
            &["module", "outcome"],
        )?;

        let task_attempts = CounterVec::new(
            Opts::new(
                "fleetrun_task_attempts_total",
                "Module invocations, retries included",
            ),
            &["module"],
        )?;

        let task_duration = HistogramVec::new(
            HistogramOpts::new(
                "fleetrun_task_duration_seconds",
                "Task duration in seconds, retries included",
            )
            .buckets(TASK_DURATION_BUCKETS.to_vec()),
            &["module"],
        )?;

        let hosts = CounterVec::new(
            Opts::new("fleetrun_hosts_total", "Finished hosts by final status"),
            &["status"],
        )?;

        let active_hosts = Gauge::with_opts(Opts::new(
            "fleetrun_active_hosts",
            "Hosts currently being worked on",
        ))?;

        registry.register(Box::new(task_results.clone()))?;
        registry.register(Box::new(task_attempts.clone()))?;
        registry.register(Box::new(task_duration.clone()))?;
        registry.register(Box::new(hosts.clone()))?;
        registry.register(Box::new(active_hosts.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            task_results,
            task_attempts,
            task_duration,
            hosts,
            active_hosts,
        })
    }

    /// Account for one result record
    pub fn record_task(&self, record: &ResultRecord) {
        let outcome = match record.failure {
            None if record.success => "success".to_string(),
            Some(kind) => kind.to_string(),
            None => "failed".to_string(),
        };

        self.task_results
            .with_label_values(&[record.module.as_str(), outcome.as_str()])
            .inc();
        self.task_attempts
            .with_label_values(&[record.module.as_str()])
            .inc_by(f64::from(record.attempts));
        self.task_duration
            .with_label_values(&[record.module.as_str()])
            .observe(record.duration.as_secs_f64());
    }

    /// Account for a finished host
    pub fn record_host(&self, summary: &HostSummary) {
        let status = summary.status().to_string();
        self.hosts.with_label_values(&[status.as_str()]).inc();
    }

    pub fn inc_active_hosts(&self) {
        self.active_hosts.inc();
    }

    pub fn dec_active_hosts(&self) {
        self.active_hosts.dec();
    }

    /// Gather everything in Prometheus text exposition format
    pub fn encode_text(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl std::fmt::Debug for RunMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunMetrics").finish_non_exhaustive()
    }
}
