use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fleetrun::classify::is_connectivity_error;
use fleetrun::parser::{parse_duration, parse_tasks_yaml};
use fleetrun::retry::RetryDefaults;
use fleetrun::{Engine, EngineSettings, Host, Module, ModuleError, ModuleRegistry, RunContext, Task};
use std::collections::HashMap;
use std::time::Duration;
use tokio::runtime::Runtime;

/// Module with no I/O, so the benchmark measures engine overhead only
struct Noop;

#[async_trait]
impl Module for Noop {
    async fn execute(
        &self,
        _ctx: &RunContext,
        host: &Host,
        _params: &HashMap<String, String>,
    ) -> Result<String, ModuleError> {
        Ok(host.name.clone())
    }
}

fn fleet(hosts: usize) -> Vec<Host> {
    (0..hosts)
        .map(|i| Host::new(format!("host{}", i), format!("10.0.{}.{}", i / 250, i % 250)))
        .collect()
}

fn task_list(count: usize) -> Vec<Task> {
    (0..count)
        .map(|i| Task::new(format!("task{}", i), "noop").with_param("command", "true"))
        .collect()
}

fn tasks_yaml(count: usize) -> String {
    (0..count)
        .map(|i| {
            format!(
                "- name: task{}\n  module: shell\n  params:\n    command: echo {}\n  max_retries: 2\n",
                i, i
            )
        })
        .collect()
}

/// Full runs over growing fleets, concurrent and sequential
fn bench_engine_run(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("engine_run");

    for hosts in [10, 100, 500].iter() {
        for parallel in [true, false] {
            let settings = EngineSettings {
                retry: RetryDefaults::default(),
                run_timeout: None,
                parallel,
                stream: false,
            };
            let engine = Engine::new(ModuleRegistry::new().with("noop", Noop), settings);
            let mode = if parallel { "concurrent" } else { "sequential" };

            group.bench_with_input(BenchmarkId::new(mode, hosts), hosts, |b, &hosts| {
                b.iter(|| {
                    let report = rt.block_on(engine.run(fleet(hosts), task_list(5)));
                    assert_eq!(report.records.len(), hosts * 5);
                });
            });
        }
    }

    group.finish();
}

fn bench_parse_tasks(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_tasks");

    for count in [10, 100, 1000].iter() {
        let yaml = tasks_yaml(*count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &yaml, |b, yaml| {
            b.iter(|| parse_tasks_yaml(black_box(yaml)).unwrap());
        });
    }

    group.finish();
}

fn bench_small_helpers(c: &mut Criterion) {
    let mut group = c.benchmark_group("helpers");

    let long_output = "building target...\n".repeat(200) + "error: connection refused";
    group.bench_function("classify_long_error", |b| {
        b.iter(|| is_connectivity_error(black_box(&long_output)));
    });

    group.bench_function("parse_compound_duration", |b| {
        b.iter(|| {
            let parsed = parse_duration(black_box("1h2m3.5s")).unwrap();
            assert!(parsed > Duration::from_secs(3600));
        });
    });

    group.finish();
}

criterion_group!(benches, bench_engine_run, bench_parse_tasks, bench_small_helpers);
criterion_main!(benches);
