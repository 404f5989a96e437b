// Tue Jan 13 2026 - Alex

use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use task_engine::{
    utils::{format_duration, logging::ScopedTimer, pluralize, LoggingUtils},
    Engine, EngineConfig, TaskContext, TaskId, TaskOptions, TaskPriority, TaskStatistics, TaskStatus,
};

#[derive(Parser, Debug)]
#[command(name = "task-engine")]
#[command(author = "Alex")]
#[command(version = "1.0.0")]
#[command(about = "Runs a synthetic workload through the priority task engine", long_about = None)]
struct Args {
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    save_config: Option<PathBuf>,

    #[arg(short = 'n', long, default_value = "20")]
    tasks: usize,

    #[arg(short, long)]
    workers: Option<usize>,

    #[arg(long, default_value = "500")]
    task_ms: u64,

    #[arg(long, default_value = "0")]
    cancel: usize,

    #[arg(long, default_value = "0")]
    fail_every: usize,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[arg(long)]
    no_progress: bool,

    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();

    let level = LoggingUtils::raise_level(LoggingUtils::level_from_str(&args.log_level), args.verbose);
    LoggingUtils::init_logger(level);

    if let Err(e) = run(args) {
        eprintln!("{} {:#}", "[!]".red(), e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(workers) = args.workers {
        config = config.with_worker_count(workers);
    }
    config.validate()?;

    if let Some(path) = &args.save_config {
        config.save(path)?;
        println!("{} Config saved to: {}", "[+]".green(), path.display());
    }

    println!("{}", "Task Engine".cyan().bold());
    println!("{}", "=".repeat(50).cyan());
    println!(
        "{} Starting {} with {}",
        "[*]".blue(),
        pluralize(args.tasks, "task", "tasks"),
        pluralize(config.worker_count, "worker", "workers")
    );

    let shutdown_timeout = config.shutdown_timeout();
    let engine = Engine::new(config)?;
    let timer = ScopedTimer::new("workload");

    let ids = submit_workload(&engine, &args)?;

    let cancelled: Vec<TaskId> = ids.iter().rev().take(args.cancel).copied().collect();
    for id in &cancelled {
        engine.cancel(*id);
    }
    if !cancelled.is_empty() {
        println!("{} Requested cancellation of {}", "[*]".blue(), pluralize(cancelled.len(), "task", "tasks"));
    }

    track_progress(&engine, ids.len() as u64, args.no_progress);

    for id in &ids {
        engine.wait(*id, None)?;
    }
    let elapsed = timer.elapsed();

    print_summary(&engine, elapsed);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&engine.list_tasks())?);
    }

    engine.shutdown(true, Some(shutdown_timeout));
    Ok(())
}

fn submit_workload(engine: &Engine, args: &Args) -> anyhow::Result<Vec<TaskId>> {
    let priorities = TaskPriority::all();
    let step_time = Duration::from_millis(args.task_ms / 10);
    let mut ids = Vec::with_capacity(args.tasks);

    for batch in 0..args.tasks {
        let priority = priorities[batch % priorities.len()];
        let fail = args.fail_every > 0 && (batch + 1) % args.fail_every == 0;

        let options = TaskOptions::named(format!("batch-{:03}", batch)).with_priority(priority);
        let id = engine.submit_with(options, move |ctx: &TaskContext| -> anyhow::Result<serde_json::Value> {
            let steps = 10;
            for step in 1..=steps {
                ctx.sleep(step_time)?;
                ctx.report_progress_with_eta(step, steps, format!("step {}/{}", step, steps));
            }
            if fail {
                anyhow::bail!("simulated failure in batch {}", batch);
            }
            Ok(json!({ "batch": batch, "items": steps }))
        })?;
        ids.push(id);
    }

    Ok(ids)
}

fn track_progress(engine: &Engine, total: u64, hidden: bool) {
    let pb = if hidden {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(total);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb
    };

    loop {
        let stats = engine.statistics();
        pb.set_position(stats.finished() as u64);
        pb.set_message(format!("{} running, {} queued", stats.running, stats.queued));
        if stats.finished() as u64 >= total {
            break;
        }
        thread::sleep(Duration::from_millis(100));
    }

    pb.finish_with_message("done");
}

fn print_summary(engine: &Engine, elapsed: Duration) {
    let stats: TaskStatistics = engine.statistics();

    println!();
    println!("{}", "Results Summary".cyan().bold());
    println!("{}", "-".repeat(40).cyan());
    println!("  Completed: {}", stats.completed.to_string().green());
    println!("  Failed:    {}", stats.failed.to_string().red());
    println!("  Cancelled: {}", stats.cancelled.to_string().yellow());

    let failures: Vec<_> = engine
        .list_tasks()
        .into_iter()
        .filter(|record| record.status == TaskStatus::Failed)
        .collect();
    if !failures.is_empty() {
        println!();
        println!("{}", "Failures:".yellow().bold());
        for record in failures {
            println!(
                "  {} {}",
                record.name.red(),
                record.error_message().unwrap_or("unknown error").dimmed()
            );
        }
    }

    if let Some(metrics) = engine.metrics() {
        println!();
        println!("{}", "Metrics".cyan().bold());
        println!("{}", "-".repeat(40).cyan());
        println!("  Total submitted: {}", metrics.total_tasks);
        println!("  Success rate:    {:.1}%", metrics.success_rate() * 100.0);
        println!("  Still active:    {}", metrics.active_tasks);
    }

    println!();
    println!("{}", "=".repeat(50).cyan());
    println!("{} Workload finished in {}", "[+]".green(), format_duration(elapsed));
}
