//! CLI interface for fleetrun

use crate::engine::Engine;
use crate::logging::{init_logging, LogConfig, LogFormat, LogLevel};
use crate::metrics::RunMetrics;
use crate::models::{Host, Task};
use crate::modules::ModuleRegistry;
use crate::parser::{parse_duration, parse_inventory_file, parse_tasks_file};
use crate::report::{JsonReporter, Reporter, TextReporter};
use crate::settings::EngineSettings;
use crate::templates;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// fleetrun - run task lists against a fleet of hosts over SSH
#[derive(Parser, Debug)]
#[command(name = "fleetrun")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run task lists against a fleet of hosts over SSH", long_about = None)]
pub struct Cli {
    /// Diagnostic log level
    #[arg(short, long, value_enum, default_value_t = LogLevel::Warn, global = true)]
    pub log_level: LogLevel,

    /// Diagnostic log format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty, global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run every task on every host
    Run(RunArgs),

    /// Check inventory and task files without connecting anywhere
    Validate {
        /// Path to inventory YAML file
        #[arg(short, long)]
        inventory: PathBuf,

        /// Path to task list YAML file
        #[arg(short, long)]
        tasks: PathBuf,
    },

    /// Print an example inventory or task list
    Template {
        /// Template type (omit to list available templates)
        #[arg(short = 't', long = "type")]
        template_type: Option<TemplateType>,

        /// Write output to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to inventory YAML file
    #[arg(short, long)]
    pub inventory: PathBuf,

    /// Path to task list YAML file
    #[arg(short, long)]
    pub tasks: PathBuf,

    /// Settings file (YAML, TOML or JSON)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long)]
    pub output_json: bool,

    /// Process hosts one at a time
    #[arg(long)]
    pub sequential: bool,

    /// Deadline for the whole run, e.g. 10m ("0" for none)
    #[arg(long)]
    pub timeout: Option<String>,

    /// Default attempts per task
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Default delay between attempts, e.g. 2s
    #[arg(long)]
    pub retry_delay: Option<String>,

    /// Only print results once the run has finished
    #[arg(long)]
    pub no_stream: bool,

    /// Write Prometheus metrics to this file after the run
    #[arg(long)]
    pub metrics_file: Option<PathBuf>,

    /// Colorize text output
    #[arg(long)]
    pub color: bool,
}

/// Available template types for the `template` subcommand.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TemplateType {
    /// Host inventory
    Inventory,
    /// Task list
    Tasks,
}

impl Cli {
    /// Initialize logging based on CLI arguments
    pub fn init_logging(&self) -> anyhow::Result<()> {
        init_logging(&LogConfig {
            level: self.log_level,
            format: self.log_format,
        })
    }

    /// Execute the CLI command
    pub async fn execute(&self) -> anyhow::Result<()> {
        match &self.command {
            Commands::Run(args) => run_fleet(args).await,
            Commands::Validate { inventory, tasks } => validate_files(inventory, tasks),
            Commands::Template {
                template_type,
                output,
            } => handle_template(*template_type, output.as_deref()),
        }
    }
}

impl RunArgs {
    /// Settings file and environment, then flags on top
    pub fn settings(&self) -> anyhow::Result<EngineSettings> {
        let mut settings = EngineSettings::load(self.config.as_deref())?;

        if self.sequential {
            settings.parallel = false;
        }
        if self.no_stream {
            settings.stream = false;
        }
        if let Some(timeout) = &self.timeout {
            let timeout = parse_duration(timeout)?;
            settings.run_timeout = (!timeout.is_zero()).then_some(timeout);
        }
        if let Some(attempts) = self.max_attempts {
            anyhow::ensure!(attempts > 0, "--max-attempts must be at least 1");
            settings.retry.max_attempts = attempts;
        }
        if let Some(delay) = &self.retry_delay {
            settings.retry.delay = parse_duration(delay)?;
        }

        Ok(settings)
    }
}

fn load_inputs(inventory: &Path, tasks: &Path) -> anyhow::Result<(Vec<Host>, Vec<Task>)> {
    info!("Loading inventory from: {}", inventory.display());
    let hosts = parse_inventory_file(inventory)?.hosts;

    info!("Loading tasks from: {}", tasks.display());
    let tasks = parse_tasks_file(tasks)?;

    Ok((hosts, tasks))
}

/// Run the task list against the inventory
async fn run_fleet(args: &RunArgs) -> anyhow::Result<()> {
    let settings = args.settings()?;
    let (hosts, tasks) = load_inputs(&args.inventory, &args.tasks)?;

    let reporter: Arc<dyn Reporter> = if args.output_json {
        Arc::new(JsonReporter::stdout())
    } else {
        Arc::new(TextReporter::stdout().with_color(args.color))
    };

    let metrics = match &args.metrics_file {
        Some(_) => Some(RunMetrics::new()?),
        None => None,
    };

    let ctx = settings.context();
    let mut engine = Engine::new(ModuleRegistry::builtin(), settings).with_reporter(reporter);
    if let Some(metrics) = &metrics {
        engine = engine.with_metrics(metrics.clone());
    }

    // Ctrl-C cancels the run; hosts stop at their next checkpoint
    let interrupt = {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling run");
                ctx.cancel();
            }
        })
    };

    let report = engine.run_with_context(&ctx, hosts, tasks).await;
    interrupt.abort();

    if let (Some(metrics), Some(path)) = (&metrics, &args.metrics_file) {
        std::fs::write(path, metrics.encode_text()?)?;
        info!("Metrics written to {}", path.display());
    }

    if report.all_ok() {
        Ok(())
    } else {
        error!("Run finished with failed or unreachable hosts");
        std::process::exit(1);
    }
}

/// Validate inventory and task files without executing
fn validate_files(inventory: &Path, tasks: &Path) -> anyhow::Result<()> {
    let (hosts, tasks) = load_inputs(inventory, tasks)?;
    let registry = ModuleRegistry::builtin();

    let unknown: Vec<String> = tasks
        .iter()
        .filter(|task| !registry.contains(&task.module))
        .map(|task| format!("'{}' (module {})", task.name, task.module))
        .collect();
    anyhow::ensure!(
        unknown.is_empty(),
        "Unknown module in task(s) {}; available: {}",
        unknown.join(", "),
        registry.names().join(", ")
    );

    for host in &hosts {
        if let Err(e) = host.credentials() {
            println!("Warning: {}", e);
        }
    }

    println!("Inventory is valid: {} host(s)", hosts.len());
    println!("Task list is valid: {} task(s)", tasks.len());
    for (index, task) in tasks.iter().enumerate() {
        println!("  {}. {} [{}]", index + 1, task.name, task.module);
    }

    Ok(())
}

/// Handle the `template` subcommand.
fn handle_template(template_type: Option<TemplateType>, output: Option<&Path>) -> anyhow::Result<()> {
    let Some(template_type) = template_type else {
        println!("Available templates:\n");
        println!("{:<12} DESCRIPTION", "TYPE");
        println!("{}", "-".repeat(60));
        for info in templates::list_templates() {
            println!("{:<12} {}", info.name, info.description);
        }
        println!();
        println!("Usage: fleetrun template --type <TYPE> [-o <FILE>]");
        return Ok(());
    };

    let type_name = match template_type {
        TemplateType::Inventory => "inventory",
        TemplateType::Tasks => "tasks",
    };
    let content = templates::get_template(type_name)
        .ok_or_else(|| anyhow::anyhow!("Unknown template type: {}", type_name))?;

    match output {
        Some(path) => {
            use std::io::Write as _;
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
                .map_err(|e| {
                    if e.kind() == std::io::ErrorKind::AlreadyExists {
                        anyhow::anyhow!("File '{}' already exists", path.display())
                    } else {
                        e.into()
                    }
                })?;
            file.write_all(content.as_bytes())?;
            println!("Template written to {}", path.display());
        }
        None => print!("{content}"),
    }

    Ok(())
}
