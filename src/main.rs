//! grid-runner - run scenarios across a pool of browser workers
//!
//! ## Usage
//!
//! ```bash
//! # Run every scenario once, spread over two chromium workers
//! grid-runner run --items scenarios.yaml --target chromium:2 --command 'npx cucumber-js {file}:{line}'
//!
//! # Run the full cross-browser matrix, retrying transient failures
//! grid-runner run --items scenarios.yaml --strategy matrix \
//!     --target chromium:2 --target firefox:2 --retries 2 --save
//!
//! # Preview what a tag expression selects
//! grid-runner list --items scenarios.yaml --tags '@smoke and not @slow'
//!
//! # Compare two saved runs
//! grid-runner results compare 20250101_120000_0001 20250102_120000_0042
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use tracing::{debug, info, warn};

mod cli;

use grid_runner::config::{ConfigFile, EnvConfig, RunnerConfig};
use grid_runner::events::{EventBus, EventKind, RunEvent};
use grid_runner::executor::CommandRunner;
use grid_runner::models::load_work_items;
use grid_runner::output::{write_results_to_file, OutputFormat, ResultFormatter};
use grid_runner::results::{
    ComparisonFormatter, ExportFormat, ResultAggregator, RunComparator, RunSettings, StoredRun,
};
use grid_runner::scheduler::{Scheduler, Strategy};
use grid_runner::utils::{init_logger, LogLevel};

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let env = EnvConfig::load();

    let level = if args.verbose {
        LogLevel::Debug
    } else {
        env.log
            .as_deref()
            .and_then(LogLevel::from_str)
            .unwrap_or(LogLevel::Info)
    };
    init_logger(level);

    let config = load_config(args.config.as_deref(), &env)?;
    let colorize = !args.no_color;

    match args.command {
        cli::Command::Run(run_args) => {
            let passed = run_scenarios(run_args, config, colorize).await?;
            if !passed {
                std::process::exit(1);
            }
        }
        cli::Command::List(list_args) => {
            list_scenarios(list_args, config)?;
        }
        cli::Command::Results(results_args) => {
            manage_results(results_args, &config, colorize)?;
        }
        cli::Command::Config(config_args) => {
            manage_config(config_args, config, &env)?;
        }
    }

    Ok(())
}

/// Config file, then environment overrides
fn load_config(explicit: Option<&str>, env: &EnvConfig) -> Result<RunnerConfig> {
    let file = match explicit.or(env.config_file.as_deref()) {
        Some(path) => ConfigFile::load(path)?,
        None => ConfigFile::load_default()?,
    };

    let mut config = file.runner;
    if env.has_any() {
        debug!("Applying GRID_RUNNER_* environment overrides");
        env.apply_to(&mut config)?;
    }
    Ok(config)
}

/// Command-line flags take precedence over file and environment
fn apply_run_args(config: &mut RunnerConfig, args: &cli::RunArgs) -> Result<()> {
    if !args.targets.is_empty() {
        config.set_targets(&args.targets)?;
    }
    if let Some(strategy) = &args.strategy {
        config.strategy = Strategy::from_str(strategy)
            .with_context(|| format!("Unknown strategy: {strategy} (parallel, sequential, matrix)"))?;
    }
    apply_filter_args(config, &args.filter);
    if let Some(retries) = args.retries {
        config.max_retries = retries;
    }
    if args.bail {
        config.bail = true;
    }
    if let Some(timeout) = args.spawn_timeout {
        config.spawn_timeout_ms = timeout;
    }
    if let Some(command) = &args.command {
        config.command.run = Some(command.clone());
    }
    Ok(())
}

fn apply_filter_args(config: &mut RunnerConfig, filter: &cli::FilterArgs) {
    if let Some(grep) = &filter.grep {
        config.grep = Some(grep.clone());
    }
    if let Some(tags) = &filter.tags {
        config.tags = Some(tags.clone());
    }
}

fn parse_format(format: &str) -> Result<OutputFormat> {
    OutputFormat::from_str(format).with_context(|| {
        format!("Unknown format: {format} (table, json, json-pretty, csv, summary)")
    })
}

/// Returns whether every scenario passed or was skipped
async fn run_scenarios(args: cli::RunArgs, mut config: RunnerConfig, colorize: bool) -> Result<bool> {
    apply_run_args(&mut config, &args)?;
    let format = parse_format(&args.format)?;

    let scheduler_config = config.scheduler_config()?;
    let runner = CommandRunner::new(config.command.clone())?;
    let items = load_work_items(&args.items)?;
    info!("Loaded {} scenarios from {}", items.len(), args.items);

    let bus = EventBus::new();
    let _progress = args.progress.then(|| {
        let formatter = ResultFormatter::new(OutputFormat::Table);
        let formatter = if colorize { formatter } else { formatter.no_color() };
        bus.subscribe(EventKind::ItemEnd, move |event| {
            if let RunEvent::ItemEnd { result } = event {
                println!("{}", formatter.format_result(result));
            }
            Ok(())
        })
    });
    let _worker_errors = bus.subscribe(EventKind::WorkerError, |event| {
        if let RunEvent::WorkerError { worker, error } = event {
            warn!("Worker {} failed: {}", worker, error);
        }
        Ok(())
    });

    let scheduler = Scheduler::new(scheduler_config.clone(), bus)?;
    let runner = &runner;
    scheduler
        .spawn_workers(move |worker| runner.spawn(worker))
        .await?;

    let outcome = scheduler
        .run(items, &move |item, worker| runner.execute(item, worker))
        .await;
    scheduler.shutdown().await;
    let result = outcome?;

    let summary = ResultAggregator::aggregate(&result);
    let formatter = ResultFormatter::new(format);
    let formatter = if colorize { formatter } else { formatter.no_color() };
    println!("{}", formatter.format_summary(&summary));

    if let Some(path) = &args.output {
        write_results_to_file(path, &summary, format)?;
        info!("Results written to {}", path);
    }

    let passed = !summary.has_failures();
    if args.save {
        let storage = config.results_storage();
        let run = StoredRun::new(RunSettings::from(&scheduler_config), summary);
        let path = storage.save(&run)?;
        println!("Saved run {} to {}", run.id, path.display());
    }

    Ok(passed)
}

fn list_scenarios(args: cli::ListArgs, mut config: RunnerConfig) -> Result<()> {
    apply_filter_args(&mut config, &args.filter);
    let filter = config.scheduler_config()?.validate()?;

    let loaded = load_work_items(&args.items)?;
    let total = loaded.len();
    let items = filter.apply(loaded);

    for item in &items {
        let tags = match &item.tags {
            Some(tags) if !tags.is_empty() => format!("  {}", tags.join(" ")),
            _ => String::new(),
        };
        println!("{:<12} {}  ({}){}", item.id, item.full_title(), item.location(), tags);
    }
    println!("\n{} of {} scenarios selected", items.len(), total);
    Ok(())
}

fn manage_results(args: cli::ResultsArgs, config: &RunnerConfig, colorize: bool) -> Result<()> {
    let storage = config.results_storage();

    match args.action {
        cli::ResultsAction::List => {
            let runs = storage.list()?;
            if runs.is_empty() {
                println!("\nNo stored runs found in {}.", storage.base_dir().display());
                println!("   Save one with: grid-runner run --items <file> --save");
                return Ok(());
            }

            println!("\n┌──────────────────────┬──────────────────────┬────────────┬───────┬──────────┐");
            println!("│ Run ID               │ Started              │ Strategy   │ Total │ Pass     │");
            println!("├──────────────────────┼──────────────────────┼────────────┼───────┼──────────┤");
            for run in &runs {
                println!(
                    "│ {:<20} │ {:<20} │ {:<10} │ {:>5} │ {:>7.1}% │",
                    run.id,
                    run.started_at.format("%Y-%m-%d %H:%M:%S"),
                    run.strategy,
                    run.total,
                    run.pass_rate
                );
            }
            println!("└──────────────────────┴──────────────────────┴────────────┴───────┴──────────┘");
        }

        cli::ResultsAction::Show { id, format } => {
            let format = parse_format(&format)?;
            let run = match id {
                Some(id) => storage.load(&id)?,
                None => storage
                    .latest()?
                    .context("No stored runs found")?,
            };

            let formatter = ResultFormatter::new(format);
            let formatter = if colorize { formatter } else { formatter.no_color() };
            if format == OutputFormat::Table {
                println!(
                    "\nRun {} ({} on {})",
                    run.id,
                    run.started_at.format("%Y-%m-%d %H:%M:%S"),
                    run.environment.os
                );
            }
            println!("{}", formatter.format_summary(&run.summary));
        }

        cli::ResultsAction::Compare {
            baseline,
            current,
            format,
        } => {
            let baseline = storage.load(&baseline)?;
            let current = storage.load(&current)?;
            let comparison = RunComparator::compare(&baseline, &current);

            match format.as_str() {
                "json" => println!("{}", ComparisonFormatter::format_json(&comparison)),
                _ => println!("{}", ComparisonFormatter::format_table(&comparison)),
            }
        }

        cli::ResultsAction::Export { id, path, format } => {
            let run = storage.load(&id)?;
            let path = Path::new(&path);
            let format = match format {
                Some(format) => ExportFormat::from_str(&format)
                    .with_context(|| format!("Unknown export format: {format} (json, csv)"))?,
                None => ExportFormat::from_extension(path).unwrap_or(ExportFormat::Json),
            };

            storage.export(&run, path, format)?;
            println!("✓ Exported run {} to {}", run.id, path.display());
        }

        cli::ResultsAction::Delete { id } => {
            if storage.delete(&id)? {
                println!("✓ Deleted run {id}");
            } else {
                anyhow::bail!("Run not found: {id}");
            }
        }
    }

    Ok(())
}

fn manage_config(args: cli::ConfigArgs, config: RunnerConfig, env: &EnvConfig) -> Result<()> {
    match args.action {
        cli::ConfigAction::Show { format } => {
            let file = ConfigFile {
                runner: config,
                ..Default::default()
            };
            let output = if format == "json" {
                serde_json::to_string_pretty(&file)?
            } else {
                serde_yaml::to_string(&file)?
            };
            println!("{output}");
        }

        cli::ConfigAction::Init { path, force } => {
            let target = Path::new(&path);
            if target.exists() && !force {
                anyhow::bail!("Configuration file already exists: {path}. Use --force to overwrite.");
            }

            ConfigFile::example().save(target)?;
            println!("✓ Configuration file created: {path}");
            println!("\nEdit the file to customize your settings.");
        }

        cli::ConfigAction::Env => {
            grid_runner::config::env::print_env_help();
            println!();
            env.print_summary();
        }
    }

    Ok(())
}
