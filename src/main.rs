//! transition-stats - Main binary
//!
//! Imports a bar series into SQLite and runs the stage pipeline over it.
//!
//! # Architecture
//!
//! A run executes on a worker thread; the main thread reports progress and a
//! reader thread turns stdin commands into pause/resume/cancel requests:
//!
//! ```text
//! ┌────────────────┐   ProgressEvent    ┌────────────────┐
//! │    Pipeline    │ ─────────────────► │    Reporter    │
//! │ (worker thread)│     (channel)      │ (main thread)  │
//! └────────────────┘                    └────────────────┘
//!         ▲
//!         │ TaskControl
//! ┌────────────────┐
//! │  stdin reader  │   p = pause, r = resume, c = cancel
//! └────────────────┘
//! ```

mod config;
mod import;

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use crossbeam_channel::Receiver;
use pipeline::{
    ChannelHook, HookRunner, LoggingHook, NormalizerFit, Pipeline, PipelineReport, ProgressEvent,
    Stage, TaskControl, TaskState, run_task, summarize,
};
use storage::{SqliteBarSource, SqliteStore};
use tracing::{info, warn};

use crate::config::AppConfig;

/// Transition statistics over a price bar series
#[derive(Parser, Debug)]
#[command(name = "transition-stats")]
#[command(about = "Build keyed states, ranges, performance and transitions from price bars")]
#[command(version)]
struct Cli {
    /// TOML configuration file (defaults are used when omitted)
    #[arg(long, global = true, env = "TS_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database, overriding the configured path
    #[arg(long, global = true, env = "TS_DB")]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replace the bars table with a CSV file (time,open,high,low,close,volume)
    Import {
        #[arg(value_name = "CSV")]
        path: PathBuf,
    },
    /// Run the pipeline from a stage onward
    Run {
        /// First stage to run: states, ranges, normalize, performance, transitions
        #[arg(long, default_value = "states", env = "TS_FROM")]
        from: Stage,
    },
    /// Fit normalizers from the states table and print the updated configuration
    Fit {
        /// Write the configuration here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Summarize the transitions table
    Stats {
        /// Number of key pairs to list
        #[arg(long, default_value_t = 20)]
        top: usize,

        /// Print the full summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration as TOML
    Config,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let app = AppConfig::load(cli.config.as_deref())?.with_db(cli.db);

    match cli.command {
        Commands::Import { path } => {
            let store = open_store(&app)?;
            import::import_csv(&store, &path, app.run.batch)?;
        }
        Commands::Run { from } => {
            let report = run_pipeline(&app, from)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Fit { output } => fit(app, output)?,
        Commands::Stats { top, json } => {
            let store = open_store(&app)?;
            let summary = summarize(&store)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "states={} keys={} transitions={} groups={}",
                    summary.states, summary.keys, summary.transitions, summary.groups
                );
                for pair in summary.top(top) {
                    let mean = pair
                        .mean_close
                        .map_or_else(|| "-".to_string(), |m| format!("{m:+.4}"));
                    println!(
                        "{:>12} -> {:<12} count={:<8} groups={:<8} mean_close={}",
                        pair.key_in, pair.key_out, pair.count, pair.groups, mean
                    );
                }
            }
        }
        Commands::Config => print!("{}", app.to_toml()?),
    }

    Ok(())
}

/// Open the configured database, creating its directory when needed.
fn open_store(app: &AppConfig) -> anyhow::Result<SqliteStore> {
    let storage = app.storage();
    if let Some(parent) = std::path::Path::new(&storage.path).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    Ok(SqliteStore::new(&storage)?)
}

/// Run the stages on a worker thread, reporting progress until it ends.
fn run_pipeline(app: &AppConfig, from: Stage) -> anyhow::Result<PipelineReport> {
    let store = open_store(app)?;
    let control = TaskControl::new();
    let (tx, rx) = crossbeam_channel::unbounded();
    let mut hooks = HookRunner::new();
    hooks.add(Arc::new(ChannelHook::new(tx, app.run.progress_interval)));

    spawn_control_reader(control.clone());
    info!(db = %app.storage.path, from = %from, "Starting pipeline (p = pause, r = resume, c = cancel)");

    let worker = {
        let config = app.pipeline.clone();
        let (batch, page) = (app.run.batch, app.run.bar_page);
        thread::spawn(move || -> pipeline::Result<PipelineReport> {
            let mut bars = SqliteBarSource::new(&store, page)?;
            Pipeline::new(&config, &store)
                .with_control(control)
                .with_hooks(hooks)
                .with_batch(batch)
                .run(&mut bars, from)
        })
    };

    report_progress(&rx);
    let report = worker
        .join()
        .map_err(|_| anyhow!("pipeline worker panicked"))??;
    if report.is_cancelled() {
        warn!("Pipeline cancelled; the next run rebuilds every stage it executes");
    }
    Ok(report)
}

fn report_progress(rx: &Receiver<ProgressEvent>) {
    for event in rx.iter() {
        match event {
            ProgressEvent::Started { task } => info!(task = %task, "Stage started"),
            ProgressEvent::Counting { .. } => {}
            ProgressEvent::Counted { task, total } => info!(task = %task, total, "Stage counted"),
            ProgressEvent::Progress { task, done, total } => {
                let pct = if total > 0 {
                    100.0 * done as f64 / total as f64
                } else {
                    100.0
                };
                info!(task = %task, done, total, "{pct:.1}%");
            }
            ProgressEvent::Ended(report) => match report.state {
                TaskState::Failed => warn!(task = %report.task, step = report.done, "Stage failed"),
                state => info!(
                    task = %report.task,
                    state = %state,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "Stage ended"
                ),
            },
        }
    }
}

/// Read control commands from stdin. The thread ends with stdin.
fn spawn_control_reader(control: TaskControl) {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            match line.trim() {
                "p" | "pause" => {
                    info!("Pause requested");
                    control.request_pause();
                }
                "r" | "resume" => {
                    info!("Resuming");
                    control.resume();
                }
                "c" | "cancel" | "q" => {
                    info!("Cancel requested");
                    control.request_cancel();
                }
                "" => {}
                other => warn!(command = other, "Unknown command (p, r, c)"),
            }
        }
    });
}

fn fit(mut app: AppConfig, output: Option<PathBuf>) -> anyhow::Result<()> {
    let store = open_store(&app)?;
    let mut hooks = HookRunner::new();
    hooks.add(Arc::new(LoggingHook::new(app.run.progress_interval)));

    let mut task = NormalizerFit::new(&app.pipeline, &store);
    run_task(&mut task, &TaskControl::new(), &hooks)?;
    let params = task.params();
    app.pipeline.normalizers.extend(params);
    app.pipeline.validate()?;

    let text = app.to_toml()?;
    match output {
        Some(path) => {
            std::fs::write(&path, text)?;
            info!(path = %path.display(), "Configuration written");
        }
        None => print!("{text}"),
    }
    Ok(())
}
