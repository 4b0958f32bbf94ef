//! Result reporting
//!
//! The engine never writes output itself. It emits [`RunEvent`]s to an
//! injected [`Reporter`]:
//! - [`JsonReporter`]: one JSON object per record, then the full report
//! - [`TextReporter`]: human-readable blocks and a per-host summary
//! - [`MemoryReporter`]: keeps everything in memory (embedding and tests)

use crate::models::{FailureKind, HostFault, HostStatus, ResultRecord, RunReport};
use std::io::Write;
use std::sync::Mutex;
use tracing::warn;

const COLOR_RESET: &str = "\x1b[0m";
const COLOR_RED: &str = "\x1b[0;31m";
const COLOR_GREEN: &str = "\x1b[0;32m";
const COLOR_YELLOW: &str = "\x1b[0;33m";
const COLOR_BLUE: &str = "\x1b[0;34m";

/// Something the engine reports
#[derive(Debug, Clone, Copy)]
pub enum RunEvent<'a> {
    /// A task finished on a host (only in streaming mode)
    Record(&'a ResultRecord),
    /// A host worker faulted and was isolated
    HostFault(&'a HostFault),
    /// The run is complete
    Finished(&'a RunReport),
}

/// Sink for run events
pub trait Reporter: Send + Sync {
    fn emit(&self, event: RunEvent<'_>);
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn emit(&self, _event: RunEvent<'_>) {}
}

type SharedWriter = Mutex<Box<dyn Write + Send>>;

fn write_out(out: &SharedWriter, text: &str) {
    let mut out = match out.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Err(e) = out.write_all(text.as_bytes()).and_then(|_| out.flush()) {
        warn!("Failed to write report output: {}", e);
    }
}

/// Machine-readable output
pub struct JsonReporter {
    out: SharedWriter,
}

impl JsonReporter {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }
}

impl Reporter for JsonReporter {
    fn emit(&self, event: RunEvent<'_>) {
        let rendered = match event {
            RunEvent::Record(record) => serde_json::to_string(record),
            RunEvent::HostFault(fault) => {
                serde_json::to_string(&serde_json::json!({ "host_fault": fault }))
            }
            RunEvent::Finished(report) => serde_json::to_string_pretty(report),
        };
        match rendered {
            Ok(text) => write_out(&self.out, &(text + "\n")),
            Err(e) => warn!("Failed to serialize run event: {}", e),
        }
    }
}

/// Human-readable output
pub struct TextReporter {
    out: SharedWriter,
    color: bool,
}

impl TextReporter {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
            color: false,
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    /// Enable ANSI colors
    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }
}

impl Reporter for TextReporter {
    fn emit(&self, event: RunEvent<'_>) {
        let text = match event {
            RunEvent::Record(record) => format_record(record, self.color),
            RunEvent::HostFault(fault) => paint(
                COLOR_RED,
                &format!("Recovered from fault on host {}: {}\n", fault.host, fault.message),
                self.color,
            ),
            RunEvent::Finished(report) => format_summary(report, self.color),
        };
        write_out(&self.out, &text);
    }
}

fn paint(color: &str, text: &str, enabled: bool) -> String {
    if enabled {
        format!("{}{}{}", color, text, COLOR_RESET)
    } else {
        text.to_string()
    }
}

fn short_id(id: &uuid::Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

/// Render one record as a text block
pub fn format_record(record: &ResultRecord, color: bool) -> String {
    let header = format!(
        "[{}][{}] {}",
        short_id(&record.session_id),
        short_id(&record.event_id),
        record.host
    );
    let timing = format!(
        "Executed At: {} | Duration: {:?}",
        record.executed_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        record.duration
    );

    if record.success {
        format!(
            "{} {} {}\n{}\nResult:\n{}\n",
            header,
            paint(COLOR_GREEN, "Success", color),
            record.task,
            timing,
            record.result.as_deref().unwrap_or_default()
        )
    } else {
        let (label, tint) = match record.failure {
            Some(FailureKind::Configuration) => ("Warning", COLOR_YELLOW),
            _ => ("Error", COLOR_RED),
        };
        format!(
            "{} {} {}\n{}\n",
            header,
            paint(tint, label, color),
            record.error.as_deref().unwrap_or_default(),
            timing
        )
    }
}

/// Render the per-host summary
pub fn format_summary(report: &RunReport, color: bool) -> String {
    let mut text = String::from("\n");
    text.push_str(&paint(COLOR_BLUE, "Summary per host:", color));
    text.push('\n');

    for (host, summary) in &report.summary {
        let status = summary.status();
        let tint = match status {
            HostStatus::Ok => COLOR_GREEN,
            HostStatus::Failed | HostStatus::Unreachable => COLOR_RED,
        };
        let line = format!(
            "Host: {} - Total: {}, Success: {}, Failed: {}, Status: {}",
            host,
            summary.total,
            summary.succeeded(),
            summary.failed,
            status
        );
        text.push_str(&paint(tint, &line, color));
        text.push('\n');
    }

    for fault in &report.faults {
        let line = format!("Host: {} - Fault: {}", fault.host, fault.message);
        text.push_str(&paint(COLOR_RED, &line, color));
        text.push('\n');
    }

    let closing = match report.cancelled {
        Some(reason) => format!("Run stopped early: {}.", reason),
        None => "All tasks completed.".to_string(),
    };
    text.push_str(&paint(COLOR_BLUE, &closing, color));
    text.push('\n');
    text
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct MemoryReporter {
    records: Mutex<Vec<ResultRecord>>,
    faults: Mutex<Vec<HostFault>>,
    report: Mutex<Option<RunReport>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records streamed so far
    pub fn records(&self) -> Vec<ResultRecord> {
        lock(&self.records).clone()
    }

    pub fn faults(&self) -> Vec<HostFault> {
        lock(&self.faults).clone()
    }

    /// The final report, once the run finished
    pub fn report(&self) -> Option<RunReport> {
        lock(&self.report).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Reporter for MemoryReporter {
    fn emit(&self, event: RunEvent<'_>) {
        match event {
            RunEvent::Record(record) => lock(&self.records).push(record.clone()),
            RunEvent::HostFault(fault) => lock(&self.faults).push(fault.clone()),
            RunEvent::Finished(report) => *lock(&self.report) = Some(report.clone()),
        }
    }
}
