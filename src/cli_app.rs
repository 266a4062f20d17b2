//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::time::Instant;

use chrono::Local;
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use encoding_guardian::core::config::Config;
use encoding_guardian::core::errors::GuardError;
use encoding_guardian::daemon::clock::SystemClock;
use encoding_guardian::daemon::loop_main::{Guardian, GuardianArgs};
use encoding_guardian::daemon::self_monitor::{GuardianState, SelfMonitor};
use encoding_guardian::daemon::signals::SignalHandler;
use encoding_guardian::gate::git::GitStagedFiles;
use encoding_guardian::gate::{
    GateReport, GateSettings, GateVerdict, check_staged, render_block_report,
};
use encoding_guardian::logger::activity::{ActivityEvent, ActivityLoggerConfig, spawn_logger};
use encoding_guardian::scanner::quarantine::QuarantineStore;
use encoding_guardian::scanner::repair::RepairEngine;
use encoding_guardian::scanner::scan::{ScanTally, Scanner, partition_targets};

/// Encoding guardian: keeps watched text files valid UTF-8.
#[derive(Debug, Parser)]
#[command(
    name = "encg",
    author,
    version,
    about = "Encoding Guardian - UTF-8 integrity watchdog",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run the guardian loop in the foreground.
    Guard(GuardArgs),
    /// Run a single scan pass now.
    Scan(ScanArgs),
    /// Validate files staged for commit (pre-commit hook).
    CheckStaged(CheckStagedArgs),
    /// Show the guardian's last reported state.
    Status,
    /// Inspect the quarantine store.
    Quarantine(QuarantineArgs),
    /// Show effective configuration.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args, Default)]
struct GuardArgs {
    /// Stop after this many scan cycles.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    max_cycles: Option<u64>,
}

#[derive(Debug, Clone, Args, Default)]
struct ScanArgs {
    /// Directories to scan (defaults to configured watch directories).
    paths: Vec<PathBuf>,
    /// Report corrupted files without quarantining or repairing them.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Clone, Args, Default)]
struct CheckStagedArgs {
    /// Also reject raw replacement-character and C1-range bytes.
    #[arg(long)]
    strict_patterns: bool,
    /// Repository working directory (defaults to the current directory).
    #[arg(long, value_name = "DIR")]
    repo: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct QuarantineArgs {
    #[command(subcommand)]
    command: QuarantineCommand,
}

#[derive(Debug, Clone, Subcommand)]
enum QuarantineCommand {
    /// List quarantined copies, oldest first.
    List,
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print the config file path.
    Path,
    /// Print the effective configuration.
    Show,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input or configuration.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
    /// Operation partially succeeded.
    #[error("{0}")]
    Partial(String),
    /// Commit gate rejected the staged files.
    #[error("commit blocked: {0} file(s) with encoding corruption")]
    Blocked(usize),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) | Self::Blocked(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Internal(_) | Self::Json(_) => 3,
            Self::Partial(_) => 4,
        }
    }
}

impl From<GuardError> for CliError {
    fn from(err: GuardError) -> Self {
        if err.is_fatal_at_startup() {
            Self::User(err.to_string())
        } else {
            Self::Runtime(err.to_string())
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color || !io::stdout().is_terminal() {
        control::set_override(false);
    }

    match &cli.command {
        Command::Guard(args) => run_guard(cli, args),
        Command::Scan(args) => run_scan(cli, args),
        Command::CheckStaged(args) => run_check_staged(cli, args),
        Command::Status => run_status(cli),
        Command::Quarantine(args) => match args.command {
            QuarantineCommand::List => run_quarantine_list(cli),
        },
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config, CliError> {
    Ok(Config::load(cli.config.as_deref())?)
}

// ---------------------------------------------------------------------------
// guard / scan
// ---------------------------------------------------------------------------

fn run_guard(cli: &Cli, args: &GuardArgs) -> Result<(), CliError> {
    let mut config = load_config(cli)?;
    if output_mode(cli) == OutputMode::Json {
        config.guardian.mirror_stdout = false;
    }

    let mut guardian = Guardian::init(
        config,
        &GuardianArgs {
            max_cycles: args.max_cycles,
        },
    )?;
    let cycles = guardian.run()?;

    if output_mode(cli) == OutputMode::Json {
        write_json_line(&json!({
            "command": "guard",
            "cycles": cycles,
        }))?;
    }
    Ok(())
}

fn run_scan(cli: &Cli, args: &ScanArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let mode = output_mode(cli);
    config.ensure_directories()?;

    let targets = if args.paths.is_empty() {
        config.scanner.watch_dirs.clone()
    } else {
        args.paths.clone()
    };
    let (existing, missing) = partition_targets(&targets);

    let clock = SystemClock::shared();
    let (logger, logger_join) = spawn_logger(ActivityLoggerConfig::new(
        config.paths.log_file.clone(),
        mode == OutputMode::Human && config.guardian.mirror_stdout,
    ))?;
    let signals = SignalHandler::new();
    let scanner = Scanner::new(
        &config,
        QuarantineStore::new(config.paths.quarantine_dir.clone(), clock),
        RepairEngine::new(config.encoding_table()?),
        logger.clone(),
    )
    .with_stop_flag(signals.shutdown_flag())
    .with_dry_run(args.dry_run);

    let start = Instant::now();
    for path in &missing {
        logger.send(ActivityEvent::TargetMissing { path: path.clone() });
    }
    let mut tally = ScanTally::default();
    let mut failure = None;
    for target in &existing {
        if signals.should_shutdown() {
            break;
        }
        logger.send(ActivityEvent::ScanningTarget {
            path: target.clone(),
        });
        match scanner.scan(target) {
            Ok(t) => tally += t,
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }
    if failure.is_none() {
        logger.send(ActivityEvent::CycleCompleted { cycle: 1, tally });
    }
    logger.shutdown();
    let _ = logger_join.join();

    if let Some(err) = failure {
        return Err(CliError::Runtime(err.to_string()));
    }

    if mode == OutputMode::Json {
        write_json_line(&json!({
            "command": "scan",
            "dry_run": args.dry_run,
            "targets_scanned": existing,
            "targets_missing": missing,
            "tally": tally,
            "elapsed_ms": u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        }))?;
    }

    let unfixed = tally.repair_failures + tally.quarantine_failures;
    if !args.dry_run && unfixed > 0 {
        return Err(CliError::Partial(format!(
            "{unfixed} corrupted file(s) could not be repaired; see {}",
            config.paths.log_file.display()
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// check-staged
// ---------------------------------------------------------------------------

fn run_check_staged(cli: &Cli, args: &CheckStagedArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let settings = GateSettings::from_config(&config, args.strict_patterns);
    let cwd = match &args.repo {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };

    let git = GitStagedFiles::new(cwd);
    let staged = git
        .toplevel()
        .and_then(|top| git.list().map(|files| (top, files)));
    let (report, toplevel) = match staged {
        Ok((top, files)) => (check_staged(&files, &settings), Some(top)),
        Err(GuardError::VersionControl { details }) => {
            eprintln!("[ENCG-GATE] not under version control, allowing: {details}");
            (GateReport::outside_repository(settings.mode), None)
        }
        Err(other) => return Err(other.into()),
    };

    match output_mode(cli) {
        OutputMode::Human => {
            for skipped in &report.skipped {
                eprintln!(
                    "[ENCG-GATE] skipped {}: {}",
                    skipped.path.display(),
                    skipped.reason
                );
            }
            for line in render_block_report(&report.verdict, toplevel.as_deref()) {
                if line.contains("COMMIT BLOCKED") {
                    println!("{}", line.red().bold());
                } else {
                    println!("{line}");
                }
            }
        }
        OutputMode::Json => {
            let mut payload = serde_json::to_value(&report)?;
            if let Value::Object(map) = &mut payload {
                map.insert("command".to_string(), json!("check-staged"));
            }
            write_json_line(&payload)?;
        }
    }

    match report.verdict {
        GateVerdict::Allow => Ok(()),
        GateVerdict::Block(blocked) => Err(CliError::Blocked(blocked.len())),
    }
}

// ---------------------------------------------------------------------------
// status / quarantine
// ---------------------------------------------------------------------------

fn run_status(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let state_path = &config.paths.state_file;
    let state = if state_path.exists() {
        Some(SelfMonitor::read_state(state_path)?)
    } else {
        None
    };
    let stale = state.as_ref().is_some_and(|s| s.is_stale(Local::now()));
    let quarantined = QuarantineStore::new(config.paths.quarantine_dir.clone(), SystemClock::shared())
        .list()
        .map_or(0, |entries| entries.len());

    match output_mode(cli) {
        OutputMode::Human => {
            println!("Encoding Guardian v{}", env!("CARGO_PKG_VERSION"));
            println!("  Config:     {}", config.paths.config_file.display());
            println!("  State file: {}", state_path.display());
            println!(
                "  Quarantine: {} ({quarantined} entries)",
                config.paths.quarantine_dir.display()
            );
            match &state {
                None => println!("  Guardian:   {}", "no state recorded".yellow()),
                Some(state) => print_state_human(state, stale),
            }
        }
        OutputMode::Json => {
            write_json_line(&json!({
                "command": "status",
                "version": env!("CARGO_PKG_VERSION"),
                "state_file": state_path,
                "state": state,
                "stale": stale,
                "quarantine_entries": quarantined,
            }))?;
        }
    }
    Ok(())
}

fn print_state_human(state: &GuardianState, stale: bool) {
    let phase = format!("{:?}", state.phase).to_lowercase();
    let phase = if stale {
        format!("{phase} (stale: no update within interval)").red().to_string()
    } else {
        phase.green().to_string()
    };
    println!("  Guardian:   {phase} (pid {})", state.pid);
    if let Some(updated) = state.last_updated {
        println!("  Updated:    {}", updated.format("%Y-%m-%d %H:%M:%S"));
    }
    println!("  Interval:   {}s", state.scan_interval_secs);
    println!("  Cycles:     {} ({} failed)", state.cycles, state.cycle_errors);
    let t = &state.totals;
    println!(
        "  Totals:     {} checked, {} corrupted, {} fixed, {} unfixed",
        t.files_checked,
        t.issues_found,
        t.issues_fixed,
        t.repair_failures + t.quarantine_failures
    );
    if let Some(last) = &state.last_cycle {
        println!(
            "  Last cycle: #{} {} checked, {} fixed in {}ms",
            last.cycle, last.tally.files_checked, last.tally.issues_fixed, last.duration_ms
        );
        if let Some(error) = &last.error {
            println!("              {}", error.red());
        }
    }
    if state.dropped_log_events > 0 {
        println!("  Dropped log events: {}", state.dropped_log_events);
    }
}

fn run_quarantine_list(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let store = QuarantineStore::new(config.paths.quarantine_dir.clone(), SystemClock::shared());
    let entries = store.list()?;

    match output_mode(cli) {
        OutputMode::Human => {
            if entries.is_empty() {
                println!("Quarantine is empty ({})", store.dir().display());
                return Ok(());
            }
            println!(
                "  {:<19}  {:>10}  {:<30}  Stored as",
                "Quarantined", "Size", "Original"
            );
            println!("  {}", "-".repeat(80));
            for entry in &entries {
                println!(
                    "  {:<19}  {:>10}  {:<30}  {}",
                    entry.quarantined_at.format("%Y-%m-%d %H:%M:%S"),
                    format_bytes(entry.bytes),
                    entry.original_name,
                    entry.file_name
                );
            }
            println!("\n{} entries in {}", entries.len(), store.dir().display());
        }
        OutputMode::Json => {
            write_json_line(&json!({
                "command": "quarantine list",
                "dir": store.dir(),
                "entries": entries,
            }))?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = load_config(cli)?;

            match output_mode(cli) {
                OutputMode::Human => {
                    for line in render_config_human(&config) {
                        println!("{line}");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config show",
                        "hash": config.stable_hash()?,
                        "config": serde_json::to_value(&config)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
    }
}

fn render_config_human(config: &Config) -> Vec<String> {
    let rule = "=".repeat(60);
    let max = config.scanner.max_file_size_bytes;
    let mut lines = vec![
        "Encoding Guardian Configuration".to_string(),
        rule.clone(),
        format!("Home:           {}", config.paths.install_home.display()),
        format!("User Home:      {}", config.paths.user_home.display()),
        format!("Log File:       {}", config.paths.log_file.display()),
        format!("Quarantine:     {}", config.paths.quarantine_dir.display()),
        format!("State File:     {}", config.paths.state_file.display()),
        rule.clone(),
        "Watched Directories:".to_string(),
    ];
    for dir in &config.scanner.watch_dirs {
        let marker = if dir.is_dir() { "[ok]     " } else { "[missing]" };
        lines.push(format!("  {marker} {}", dir.display()));
    }
    lines.push(rule.clone());
    lines.push(format!(
        "Scan Interval:  {}s",
        config.guardian.scan_interval_secs
    ));
    #[allow(clippy::cast_precision_loss)]
    let mib = max as f64 / (1024.0 * 1024.0);
    lines.push(format!(
        "Max File Size:  {} bytes ({mib:.1} MB)",
        group_thousands(max)
    ));
    lines.push(format!(
        "Extensions:     {}",
        config.scanner.extensions.join(", ")
    ));
    lines.push(format!(
        "Repair Chain:   {}",
        config.repair.encodings.join(" -> ")
    ));
    lines.push(rule);
    lines
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[allow(clippy::cast_precision_loss)]
fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;

    if bytes >= GIB {
        format!("{:.1} GB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("ENCG_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref())
}

/// `--json` wins; otherwise `ENCG_OUTPUT_FORMAT`, defaulting to human output
/// so hook output stays readable when piped.
fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }
    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        _ => OutputMode::Human,
    }
}
