//! End-to-end runs of the engine with in-process modules

use async_trait::async_trait;
use fleetrun::report::{MemoryReporter, Reporter, RunEvent};
use fleetrun::retry::RetryDefaults;
use fleetrun::{
    CancelReason, Engine, EngineSettings, FailureKind, Host, HostStatus, Module, ModuleError,
    ModuleRegistry, RunContext, Task,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Returns its `text` parameter prefixed with the host name
struct Echo;

#[async_trait]
impl Module for Echo {
    async fn execute(
        &self,
        _ctx: &RunContext,
        host: &Host,
        params: &HashMap<String, String>,
    ) -> Result<String, ModuleError> {
        Ok(format!("{}: {}", host.name, params.get("text").cloned().unwrap_or_default()))
    }
}

/// Returns its `text` parameter untouched
struct Verbatim;

#[async_trait]
impl Module for Verbatim {
    async fn execute(
        &self,
        _ctx: &RunContext,
        _host: &Host,
        params: &HashMap<String, String>,
    ) -> Result<String, ModuleError> {
        Ok(params["text"].clone())
    }
}

/// Counts calls, optionally failing the first `failures` of them per host
#[derive(Default)]
struct Flaky {
    failures: u32,
    calls: Mutex<HashMap<String, u32>>,
}

impl Flaky {
    fn failing(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures,
            ..Default::default()
        })
    }

    fn calls(&self, host: &str) -> u32 {
        self.calls.lock().unwrap().get(host).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Module for Flaky {
    async fn execute(
        &self,
        _ctx: &RunContext,
        host: &Host,
        _params: &HashMap<String, String>,
    ) -> Result<String, ModuleError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(host.name.clone()).or_default();
            *count += 1;
            *count
        };
        if call <= self.failures {
            Err(ModuleError::Command(format!("exit status 1 (call {})", call)))
        } else {
            Ok(format!("ok after {} call(s)", call))
        }
    }
}

/// Always fails the way an unreachable host does
struct Unreachable;

#[async_trait]
impl Module for Unreachable {
    async fn execute(
        &self,
        _ctx: &RunContext,
        _host: &Host,
        _params: &HashMap<String, String>,
    ) -> Result<String, ModuleError> {
        Err(ModuleError::Other(
            "dial tcp 10.0.0.9:22: connect: connection refused".to_string(),
        ))
    }
}

/// Sleeps for the given time unless the run context ends first
struct Slow(Duration);

#[async_trait]
impl Module for Slow {
    async fn execute(
        &self,
        ctx: &RunContext,
        _host: &Host,
        _params: &HashMap<String, String>,
    ) -> Result<String, ModuleError> {
        ctx.sleep(self.0).await.map_err(ModuleError::Cancelled)?;
        Ok("finished".to_string())
    }
}

struct Panics;

#[async_trait]
impl Module for Panics {
    async fn execute(
        &self,
        _ctx: &RunContext,
        _host: &Host,
        _params: &HashMap<String, String>,
    ) -> Result<String, ModuleError> {
        panic!("module state corrupted");
    }
}

/// Panics while reporting records of one host
struct PanicsOnHost {
    host: &'static str,
    inner: MemoryReporter,
}

impl Reporter for PanicsOnHost {
    fn emit(&self, event: RunEvent<'_>) {
        if let RunEvent::Record(record) = event {
            if record.host == self.host {
                panic!("reporter failed for {}", record.host);
            }
        }
        self.inner.emit(event);
    }
}

fn settings(parallel: bool) -> EngineSettings {
    EngineSettings {
        retry: RetryDefaults::new(3, Duration::from_millis(5)),
        run_timeout: None,
        parallel,
        stream: true,
    }
}

fn hosts(count: usize) -> Vec<Host> {
    (1..=count)
        .map(|i| Host::new(format!("host{}", i), format!("10.0.0.{}", i)))
        .collect()
}

fn echo_task(name: &str) -> Task {
    Task::new(name, "echo").with_param("text", name)
}

#[tokio::test]
async fn test_scenario_two_hosts_one_task() {
    let engine = Engine::new(ModuleRegistry::new().with("echo", Echo), settings(true));
    let report = engine.run(hosts(2), vec![echo_task("ping")]).await;

    assert_eq!(report.records.len(), 2);
    assert!(report.records.iter().all(|r| r.success));
    assert_eq!(report.summary["host1"].status(), HostStatus::Ok);
    assert_eq!(report.summary["host2"].status(), HostStatus::Ok);
    assert!(report.all_ok());
}

#[tokio::test]
async fn test_scenario_connectivity_failure_skips_remaining_tasks() {
    let counter = Flaky::failing(0);
    let mut registry = ModuleRegistry::new().with("connect", Unreachable);
    registry.register("count", counter.clone());

    let engine = Engine::new(registry, settings(true));
    let report = engine
        .run(
            hosts(1),
            vec![Task::new("first", "connect"), Task::new("second", "count")],
        )
        .await;

    assert_eq!(report.records.len(), 1);
    let record = &report.records[0];
    assert_eq!(record.task, "first");
    assert!(!record.success);
    assert!(record.is_unreachable());
    assert_eq!(record.attempts, 1);
    assert_eq!(counter.calls("host1"), 0);
    assert_eq!(report.summary["host1"].status(), HostStatus::Unreachable);
}

#[tokio::test]
async fn test_scenario_success_on_third_attempt() {
    let module = Flaky::failing(2);
    let mut registry = ModuleRegistry::new();
    registry.register("flaky", module.clone());

    let engine = Engine::new(registry, settings(true));
    let report = engine
        .run(hosts(1), vec![Task::new("deploy", "flaky").with_max_retries(3)])
        .await;

    assert_eq!(report.records.len(), 1);
    let record = &report.records[0];
    assert!(record.success);
    assert_eq!(record.attempts, 3);
    assert_eq!(record.result.as_deref(), Some("ok after 3 call(s)"));
    assert_eq!(module.calls("host1"), 3);
}

#[tokio::test]
async fn test_always_failing_module_uses_every_attempt() {
    for attempts in [1, 2, 5] {
        let module = Flaky::failing(u32::MAX);
        let mut registry = ModuleRegistry::new();
        registry.register("flaky", module.clone());

        let engine = Engine::new(registry, settings(true));
        let report = engine
            .run(
                hosts(2),
                vec![Task::new("fails", "flaky").with_max_retries(attempts)],
            )
            .await;

        assert_eq!(report.records.len(), 2);
        for host in ["host1", "host2"] {
            assert_eq!(module.calls(host), attempts);
            let record = report.records_for(host).next().unwrap();
            assert_eq!(record.attempts, attempts);
            assert_eq!(record.failure, Some(FailureKind::Execution));
        }
    }
}

#[tokio::test]
async fn test_sequential_and_concurrent_produce_same_records() {
    let tasks = vec![echo_task("a"), echo_task("b"), echo_task("c")];

    let mut sets = Vec::new();
    for parallel in [false, true] {
        let engine = Engine::new(ModuleRegistry::new().with("echo", Echo), settings(parallel));
        let report = engine.run(hosts(4), tasks.clone()).await;
        let set: BTreeSet<_> = report
            .records
            .iter()
            .map(|r| (r.host.clone(), r.task.clone(), r.success, r.result.clone()))
            .collect();
        sets.push(set);
    }

    assert_eq!(sets[0].len(), 12);
    assert_eq!(sets[0], sets[1]);
}

#[tokio::test]
async fn test_sequential_mode_keeps_host_order() {
    let engine = Engine::new(ModuleRegistry::new().with("echo", Echo), settings(false));
    let report = engine
        .run(hosts(3), vec![echo_task("a"), echo_task("b")])
        .await;

    let order: Vec<(&str, &str)> = report
        .records
        .iter()
        .map(|r| (r.host.as_str(), r.task.as_str()))
        .collect();
    assert_eq!(
        order,
        vec![
            ("host1", "a"),
            ("host1", "b"),
            ("host2", "a"),
            ("host2", "b"),
            ("host3", "a"),
            ("host3", "b"),
        ]
    );
}

#[tokio::test]
async fn test_output_is_recorded_verbatim() {
    let output = "  line one\n\tline two with trailing space \n\n\u{1F680} done\r\n";
    let engine = Engine::new(ModuleRegistry::new().with("verbatim", Verbatim), settings(true));
    let report = engine
        .run(
            hosts(1),
            vec![Task::new("print", "verbatim").with_param("text", output)],
        )
        .await;

    assert_eq!(report.records[0].result.as_deref(), Some(output));
}

#[tokio::test]
async fn test_missing_module_is_recorded_and_run_continues() {
    let engine = Engine::new(ModuleRegistry::new().with("echo", Echo), settings(true));
    let report = engine
        .run(
            hosts(2),
            vec![Task::new("sync files", "rsync"), echo_task("after")],
        )
        .await;

    assert_eq!(report.records.len(), 4);
    for host in ["host1", "host2"] {
        let records: Vec<_> = report.records_for(host).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0].error.as_deref(),
            Some("Module rsync not found for task sync files")
        );
        assert_eq!(records[0].attempts, 0);
        assert_eq!(records[0].failure, Some(FailureKind::Configuration));
        assert!(records[1].success);
    }
}

#[tokio::test]
async fn test_deadline_cancels_in_flight_tasks() {
    let after = Flaky::failing(0);
    let mut registry = ModuleRegistry::new().with("slow", Slow(Duration::from_secs(30)));
    registry.register("after", after.clone());

    let engine = Engine::new(registry, settings(true));
    let ctx = RunContext::with_timeout(Duration::from_millis(100));
    let report = engine
        .run_with_context(
            &ctx,
            hosts(3),
            vec![Task::new("long", "slow"), Task::new("next", "after")],
        )
        .await;

    assert_eq!(report.cancelled, Some(CancelReason::DeadlineExceeded));
    assert_eq!(report.records.len(), 3);
    for record in &report.records {
        assert_eq!(record.task, "long");
        assert_eq!(record.failure, Some(FailureKind::Cancelled));
        assert_eq!(record.attempts, 1);
    }
    for host in ["host1", "host2", "host3"] {
        assert_eq!(after.calls(host), 0);
        assert!(report.summary[host].cancelled);
    }
}

#[tokio::test]
async fn test_explicit_cancel_stops_sequential_run() {
    let engine = Engine::new(
        ModuleRegistry::new().with("slow", Slow(Duration::from_secs(30))),
        settings(false),
    );
    let ctx = RunContext::new();

    let canceller = {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            ctx.cancel();
        })
    };

    let report = engine
        .run_with_context(&ctx, hosts(3), vec![Task::new("long", "slow")])
        .await;
    canceller.await.unwrap();

    assert_eq!(report.cancelled, Some(CancelReason::Cancelled));
    // Only the host in flight records anything
    assert_eq!(report.records.len(), 1);
    assert_eq!(report.records[0].host, "host1");
    assert_eq!(report.summary.len(), 3);
    assert_eq!(report.summary["host3"].total, 0);
}

#[tokio::test]
async fn test_module_panic_is_isolated() {
    let registry = ModuleRegistry::new()
        .with("panics", Panics)
        .with("echo", Echo);
    let engine = Engine::new(registry, settings(true));
    let report = engine
        .run(
            hosts(2),
            vec![
                Task::new("explode", "panics").with_max_retries(2),
                echo_task("after"),
            ],
        )
        .await;

    assert!(report.faults.is_empty());
    assert_eq!(report.records.len(), 4);
    for host in ["host1", "host2"] {
        let records: Vec<_> = report.records_for(host).collect();
        assert_eq!(records[0].failure, Some(FailureKind::Execution));
        assert_eq!(records[0].attempts, 2);
        assert!(records[0]
            .error
            .as_deref()
            .unwrap()
            .contains("module state corrupted"));
        assert!(records[1].success);
    }
}

#[tokio::test]
async fn test_host_fault_is_isolated() {
    let reporter = Arc::new(PanicsOnHost {
        host: "host2",
        inner: MemoryReporter::new(),
    });
    let engine = Engine::new(ModuleRegistry::new().with("echo", Echo), settings(true))
        .with_reporter(reporter.clone());

    let report = engine.run(hosts(3), vec![echo_task("a")]).await;

    assert_eq!(report.faults.len(), 1);
    assert_eq!(report.faults[0].host, "host2");
    assert!(report.faults[0].message.contains("reporter failed for host2"));
    assert!(!report.all_ok());

    assert_eq!(report.records_for("host1").count(), 1);
    assert_eq!(report.records_for("host3").count(), 1);
    assert_eq!(report.summary.len(), 3);

    // host2 finished its task before the reporter failed
    let records: Vec<_> = report.records_for("host2").collect();
    assert_eq!(records.len(), 1);
    assert!(records[0].success);
    let host2 = &report.summary["host2"];
    assert!(host2.faulted);
    assert_eq!(host2.total, 1);
    assert_eq!(host2.status(), HostStatus::Failed);
    assert_eq!(report.summary["host1"].status(), HostStatus::Ok);

    assert_eq!(reporter.inner.faults().len(), 1);
    assert!(reporter.inner.report().is_some());
}

#[tokio::test]
async fn test_event_and_session_ids() {
    let engine = Engine::new(ModuleRegistry::new().with("echo", Echo), settings(true));
    let report = engine
        .run(hosts(2), vec![echo_task("a"), echo_task("b"), echo_task("c")])
        .await;

    for host in ["host1", "host2"] {
        let records: Vec<_> = report.records_for(host).collect();
        let sessions: BTreeSet<_> = records.iter().map(|r| r.session_id).collect();
        let events: BTreeSet<_> = records.iter().map(|r| r.event_id).collect();
        assert_eq!(sessions.len(), 1);
        assert_eq!(events.len(), 3);
    }

    let sessions: BTreeSet<_> = report.records.iter().map(|r| r.session_id).collect();
    assert_eq!(sessions.len(), 2);
}

#[tokio::test]
async fn test_retries_are_counted_per_host() {
    let module = Flaky::failing(1);
    let mut registry = ModuleRegistry::new();
    registry.register("flaky", module.clone());

    let engine = Engine::new(registry, settings(true));
    let report = engine.run(hosts(3), vec![Task::new("t", "flaky")]).await;

    assert!(report.records.iter().all(|r| r.success && r.attempts == 2));
    for host in ["host1", "host2", "host3"] {
        assert_eq!(module.calls(host), 2);
    }
}
