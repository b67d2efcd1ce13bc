mod control;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;
use turtlewatch_engine::config::Config;
use turtlewatch_engine::{build_analysis_client, build_cycle_runner, Monitor};

use control::ControlState;

#[derive(Debug, Parser)]
#[command(
    name = "turtlewatch",
    version,
    about = "Turtle habitat monitor: periodic capture, vision analysis and SMS alerts"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the scheduler and serve the HTTP control surface (default).
    Serve(ServeArgs),
    /// Analyse one image and print the record as JSON.
    Analyze(AnalyzeArgs),
    /// Run exactly one capture cycle and print its outcome as JSON.
    Cycle,
}

#[derive(Debug, Default, Parser)]
struct ServeArgs {
    #[arg(long)]
    bind: Option<String>,
    /// Wait for `GET /start-scheduler` instead of starting the loop at boot.
    #[arg(long)]
    no_autostart: bool,
}

#[derive(Debug, Parser)]
struct AnalyzeArgs {
    image: PathBuf,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("turtlewatch error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_logging();
    let config = Config::from_env().context("invalid configuration")?;
    match cli.command.unwrap_or(Command::Serve(ServeArgs::default())) {
        Command::Serve(args) => run_serve(config, args),
        Command::Analyze(args) => run_analyze(&config, args),
        Command::Cycle => run_cycle(&config),
    }
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(env_filter);
    let _ = tracing_subscriber::registry().with(fmt_layer).try_init();
}

fn run_serve(mut config: Config, args: ServeArgs) -> Result<i32> {
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if args.no_autostart {
        config.autostart = false;
    }
    let bind_addr = config.bind_addr.clone();
    let autostart = config.autostart;

    let monitor = Monitor::from_config(config)?;
    info!(
        interval_minutes = monitor.config.interval_minutes,
        image_dir = %monitor.config.image_dir.display(),
        model = monitor.analysis.model_name(),
        sms_enabled = monitor.config.messaging_enabled(),
        "turtlewatch configured"
    );
    let server = control::bind(&bind_addr)?;
    if autostart {
        let status = monitor.supervisor.start()?;
        info!(status = status.as_str(), "scheduler autostart");
    }

    let state = Arc::new(ControlState {
        supervisor: monitor.supervisor.clone(),
        analysis: Arc::clone(&monitor.analysis),
        interval_minutes: monitor.config.interval_minutes,
    });
    control::serve(state, server);
    Ok(0)
}

fn run_analyze(config: &Config, args: AnalyzeArgs) -> Result<i32> {
    let client = build_analysis_client(config)?;
    let record = client.analyze(&args.image);
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(0)
}

fn run_cycle(config: &Config) -> Result<i32> {
    let analysis = Arc::new(build_analysis_client(config)?);
    let mut runner = build_cycle_runner(config, analysis)?;
    let outcome = runner.run_cycle();
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(if outcome.skipped.is_some() { 2 } else { 0 })
}
