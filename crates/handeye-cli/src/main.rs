//! `handeye` – runs orchestration scripts against a device.
//!
//! The binary:
//!
//! 1. Loads `~/.handeye/config.toml` (or `--config`), applying `HANDEYE_*`
//!    environment overrides.
//! 2. Builds the driver and the grounding client: the vision model service
//!    from the config, or a scripted stand-in with `--offline`.  The only
//!    driver is the simulated one, so a run without `--offline` is a dry run
//!    that sends blank frames to the grounding service.
//! 3. Runs a script file or a stored skill through the sandbox and prints the
//!    execution report (or emits it as JSON with `--json`).
//! 4. Maps **Ctrl-C** to cancellation so an in-flight action always finishes
//!    before the run stops.

mod config;
mod report;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use handeye_hal::SimDriver;
use handeye_perception::{GroundingClient, ScriptedGrounding, VisionGroundingClient};
use handeye_runtime::sandbox::{parser, scan};
use handeye_runtime::{Sandbox, TacticalController};
use handeye_types::{ExecutionReport, Skill};

#[derive(Parser, Debug)]
#[command(name = "handeye", version, about = "Sandboxed goal scripts for vision-grounded device control")]
struct Cli {
    /// Config file to use instead of ~/.handeye/config.toml.
    #[arg(long, global = true, env = "HANDEYE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run an orchestration script.
    Run {
        /// Path to the script file.
        script: PathBuf,
        #[command(flatten)]
        opts: RunOpts,
    },
    /// Run a stored skill (JSON with `id`, `name` and `code`).
    Skill {
        /// Path to the skill JSON file.
        skill: PathBuf,
        #[command(flatten)]
        opts: RunOpts,
    },
    /// Parse and capability-scan a script without touching any device.
    Check {
        script: PathBuf,
    },
    /// Print the effective configuration.
    Config {
        /// Write the effective configuration to the config file.
        #[arg(long)]
        save: bool,
    },
}

/// Options shared by `run` and `skill`.
///
/// Every run drives the simulated device.
#[derive(Args, Debug, Clone, Copy)]
struct RunOpts {
    /// Use a scripted grounding stand-in instead of the vision model service.
    /// Without it the run is a dry run: the simulated device sends blank
    /// frames to the grounding service and no real device is touched.
    #[arg(long)]
    offline: bool,

    /// Print the execution report as JSON.
    #[arg(long)]
    json: bool,

    /// Override `max_attempts` for this run.
    #[arg(long)]
    max_attempts: Option<u32>,
}

fn main() -> ExitCode {
    let _telemetry = handeye_runtime::telemetry::init_tracing("handeye");
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(config::config_path);
    let cfg = match config::load_or_default(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{}: {}", "Config error".red(), e);
            return ExitCode::from(2);
        }
    };

    match cli.command {
        Command::Check { script } => check(&script),
        Command::Config { save } => show_config(&cfg, &config_path, save),
        Command::Run { script, opts } => {
            run_with_runtime(&cfg, opts, || read_script(&script))
        }
        Command::Skill { skill, opts } => run_with_runtime(&cfg, opts, || read_skill(&skill)),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Subcommands
// ─────────────────────────────────────────────────────────────────────────────

fn check(path: &Path) -> ExitCode {
    let source = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{}: {}: {}", "Error".red(), path.display(), e);
            return ExitCode::FAILURE;
        }
    };
    let program = match parser::parse(&source) {
        Ok(p) => p,
        Err(e) => {
            println!("  {} syntax error at line {}: {}", "✗".red().bold(), e.line, e.message);
            return ExitCode::FAILURE;
        }
    };
    match scan::scan(&program) {
        Ok(()) => {
            println!("  {} {} passes the capability scan", "✓".green().bold(), path.display());
            ExitCode::SUCCESS
        }
        Err(v) => {
            println!("  {} line {}: {}", "✗".red().bold(), v.line, v.message);
            ExitCode::FAILURE
        }
    }
}

fn show_config(cfg: &config::Config, path: &Path, save: bool) -> ExitCode {
    println!("  Config file: {}", path.display().to_string().bold());
    println!("  {:#?}", cfg);
    if save {
        match config::save_to(cfg, path) {
            Ok(()) => println!("  {} Config saved", "✓".green().bold()),
            Err(e) => {
                eprintln!("{}: {}", "Error saving config".red(), e);
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}

/// What a run executes.
#[derive(Debug)]
enum Job {
    Script(String),
    Skill(Skill),
}

fn read_script(path: &Path) -> Result<Job, String> {
    std::fs::read_to_string(path)
        .map(Job::Script)
        .map_err(|e| format!("{}: {}", path.display(), e))
}

fn read_skill(path: &Path) -> Result<Job, String> {
    let raw = std::fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    serde_json::from_str(&raw)
        .map(Job::Skill)
        .map_err(|e| format!("invalid skill file {}: {}", path.display(), e))
}

fn run_with_runtime(
    cfg: &config::Config,
    opts: RunOpts,
    load: impl FnOnce() -> Result<Job, String>,
) -> ExitCode {
    let job = match load() {
        Ok(job) => job,
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!();
        eprintln!(
            "{}",
            "⚠  Ctrl-C received – stopping after the current action …".yellow().bold()
        );
        on_signal.cancel();
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; the run cannot be cancelled");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: failed to start async runtime: {}", "Error".red(), e);
            return ExitCode::FAILURE;
        }
    };

    if let Some(notice) = dry_run_notice(cfg, opts) {
        eprintln!("{}", notice.yellow());
    }
    let report = runtime.block_on(execute(cfg, opts, job, cancel));

    if opts.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("{}: {}", "Error".red(), e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        print!("{}", report::render(&report));
    }

    if report.succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn execute(
    cfg: &config::Config,
    opts: RunOpts,
    job: Job,
    cancel: CancellationToken,
) -> ExecutionReport {
    let mut controller_config = cfg.controller_config();
    if let Some(n) = opts.max_attempts {
        controller_config.max_attempts = n;
    }

    let grounding = build_grounding(cfg, opts.offline);
    let controller =
        TacticalController::new(Box::new(SimDriver::new("sim")), grounding, controller_config);
    let sandbox = Sandbox::new(controller, cfg.sandbox_config());

    // A fresh sandbox has no run in flight.
    let report = match &job {
        Job::Script(source) => match sandbox.execute_with_cancel(source, cancel) {
            Ok(run) => run.await,
            Err(busy) => busy_report(busy),
        },
        Job::Skill(skill) => match sandbox.execute_skill_with_cancel(skill, cancel) {
            Ok(run) => run.await,
            Err(busy) => busy_report(busy),
        },
    };

    let mut controller = sandbox.into_controller();
    if let Err(e) = controller.disconnect().await {
        warn!(error = %e, "driver disconnect failed");
    }
    info!(succeeded = report.succeeded, "run finished");
    report
}

/// Banner printed before an online run.  Frames come from the simulated
/// device, so the grounding service only ever sees blank screens.
fn dry_run_notice(cfg: &config::Config, opts: RunOpts) -> Option<String> {
    (!opts.offline).then(|| {
        format!(
            "dry run: simulated device, blank frames are sent to {}",
            cfg.grounding_url
        )
    })
}

fn build_grounding(cfg: &config::Config, offline: bool) -> Box<dyn GroundingClient> {
    if offline {
        info!("using scripted grounding");
        return Box::new(ScriptedGrounding::new());
    }
    warn!(
        url = %cfg.grounding_url,
        model = %cfg.model,
        "using vision grounding service with the simulated driver; frames are blank"
    );
    let client = VisionGroundingClient::new(cfg.grounding_url.clone(), cfg.model.clone());
    if cfg.api_key.is_empty() {
        Box::new(client)
    } else {
        Box::new(client.with_api_key(cfg.api_key.clone()))
    }
}

fn busy_report(busy: handeye_types::SandboxBusy) -> ExecutionReport {
    ExecutionReport {
        succeeded: false,
        log: Vec::new(),
        output: Vec::new(),
        error: Some(handeye_types::ErrorKind::Internal(busy.to_string())),
        statistics: Default::default(),
        state: handeye_types::SandboxState::Aborted(busy.to_string()),
    }
}
