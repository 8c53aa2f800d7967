//! saba-ctl — 단일 서버 프로세스 관리 CLI
//!
//! ## 사용법
//! ```text
//! saba-ctl [start]                       # 서버 시작 (기본값)
//! saba-ctl stop                          # 서버 종료 (TERM → 10초 대기 → KILL)
//! saba-ctl restart                       # stop + start
//! saba-ctl status [--json]               # 상태 표시
//! saba-ctl logs [--lines N] [--no-follow]
//! saba-ctl help
//! ```
//!
//! ## 종료 코드
//! - `start` / `restart` — 0 성공, 1 시작 실패
//! - `stop` / `status` / `logs` — 항상 0
//! - 알 수 없는 명령 — 1

use saba_ctl::config::SupervisorConfig;
use saba_ctl::log_file::{self, Rotation};
use saba_ctl::runtime::DependencyStatus;
use saba_ctl::supervisor::error::SupervisorError;
use saba_ctl::supervisor::{StartOutcome, StatusReport, StopOutcome, Supervisor};
use saba_ctl::utils::{format_bytes, format_duration};

const DEFAULT_LOG_LINES: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Run(Action),
    Help,
    Version,
}

/// Commands that need the config and a supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Action {
    Start,
    Stop,
    Restart,
    Status { json: bool },
    Logs { lines: usize, follow: bool },
}

impl Action {
    /// Only start/restart report failure through the exit code.
    fn failure_code(&self, code: i32) -> i32 {
        match self {
            Self::Start | Self::Restart => code,
            Self::Stop | Self::Status { .. } | Self::Logs { .. } => 0,
        }
    }
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let args_ref: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
    let (cmd, flags) = match args_ref.split_first() {
        Some((cmd, flags)) => (*cmd, flags),
        None => return Ok(Command::Run(Action::Start)),
    };

    let no_flags = |action: Action| {
        if let Some(flag) = flags.first() {
            Err(format!("Unexpected argument '{}' for '{}'", flag, cmd))
        } else {
            Ok(Command::Run(action))
        }
    };

    match cmd {
        "start" => no_flags(Action::Start),
        "stop" => no_flags(Action::Stop),
        "restart" => no_flags(Action::Restart),
        "status" => match flags {
            [] => Ok(Command::Run(Action::Status { json: false })),
            ["--json"] => Ok(Command::Run(Action::Status { json: true })),
            [other, ..] => Err(format!("Unexpected argument '{}' for 'status'", other)),
        },
        "logs" => {
            let mut lines = DEFAULT_LOG_LINES;
            let mut follow = true;
            let mut iter = flags.iter();
            while let Some(flag) = iter.next() {
                match *flag {
                    "--no-follow" => follow = false,
                    "--lines" | "-n" => {
                        let value = iter
                            .next()
                            .ok_or_else(|| format!("'{}' needs a number", flag))?;
                        lines = value
                            .parse()
                            .map_err(|_| format!("'{}' is not a valid line count", value))?;
                    }
                    other => return Err(format!("Unexpected argument '{}' for 'logs'", other)),
                }
            }
            Ok(Command::Run(Action::Logs { lines, follow }))
        }
        "help" | "--help" | "-h" => Ok(Command::Help),
        "--version" | "-V" => Ok(Command::Version),
        other => Err(format!("Unknown command: {}", other)),
    }
}

fn print_help() {
    println!("saba-ctl {} — single server supervisor", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Usage: saba-ctl [command] [flags]");
    println!();
    println!("Commands:");
    println!("  start                       Start the server in the background (default)");
    println!("  stop                        Stop the server (TERM, then KILL after the timeout)");
    println!("  restart                     Stop, then start");
    println!("  status [--json]             Show process state, resources and recent log lines");
    println!("  logs [--lines N] [--no-follow]");
    println!("                              Show the log and follow new output (Ctrl+C to exit)");
    println!("  help                        Show this message");
    println!();
    println!("Environment:");
    println!("  SABA_CTL_HOME               Installation directory (default: current directory)");
    println!("  SABA_CTL_CONFIG             Config file (default: $SABA_CTL_HOME/saba-ctl.toml)");
    println!("  RUST_LOG                    Diagnostic log filter (default: warn)");
}

fn init_tracing() {
    // stderr로 출력하여 stdout의 보고서/JSON을 오염시키지 않음
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match parse_args(&args) {
        Ok(command) => command,
        Err(msg) => {
            eprintln!("✗ {}", msg);
            eprintln!();
            print_help();
            std::process::exit(1);
        }
    };

    let code = match command {
        Command::Help => {
            print_help();
            0
        }
        Command::Version => {
            println!("saba-ctl {}", env!("CARGO_PKG_VERSION"));
            0
        }
        Command::Run(action) => run(action).await,
    };
    std::process::exit(code);
}

async fn run(action: Action) -> i32 {
    let home = match SupervisorConfig::resolve_home() {
        Ok(home) => home,
        Err(e) => {
            eprintln!("✗ Cannot determine the installation directory: {}", e);
            return action.failure_code(1);
        }
    };
    let config = match SupervisorConfig::load(&home) {
        Ok(cfg) => cfg,
        Err(e) => {
            if let Action::Status { json: true } = action {
                println!("{}", e.to_json());
            } else {
                eprintln!("✗ {}", e);
            }
            return action.failure_code(e.exit_code());
        }
    };
    tracing::debug!("Home: {}", home.display());
    let supervisor = Supervisor::new(home, config);

    match action {
        Action::Start => cmd_start(&supervisor).await,
        Action::Stop => cmd_stop(&supervisor).await,
        Action::Restart => cmd_restart(&supervisor).await,
        Action::Status { json } => cmd_status(&supervisor, json).await,
        Action::Logs { lines, follow } => cmd_logs(&supervisor, lines, follow).await,
    }
}

// ═══════════════════════════════════════════════════════
// 명령어 핸들러
// ═══════════════════════════════════════════════════════

async fn cmd_start(sup: &Supervisor) -> i32 {
    let name = &sup.config().name;
    println!("⏳ Starting {}...", name);
    match sup.start().await {
        Ok(outcome) => {
            print_start_outcome(sup, &outcome);
            0
        }
        Err(e) => {
            print_start_error(sup, &e);
            e.exit_code()
        }
    }
}

fn print_start_outcome(sup: &Supervisor, outcome: &StartOutcome) {
    let name = &sup.config().name;
    match outcome {
        StartOutcome::AlreadyRunning(handle) => {
            println!("✓ {} is already running (PID {})", name, handle.pid);
        }
        StartOutcome::Started(report) => {
            if let Some(rt) = &report.runtime {
                if rt.is_outdated() {
                    println!(
                        "⚠ {} {} is older than the recommended {} — continuing anyway",
                        rt.command,
                        rt.version_text,
                        sup.config().runtime.min_version
                    );
                }
            }
            if report.dependencies == DependencyStatus::Installed {
                println!("✓ Dependencies installed");
            }
            if let Rotation::Rotated { size, backup } = &report.rotation {
                println!("↻ Rotated log ({}) to {}", format_bytes(*size), backup.display());
            }
            println!("✓ {} started (PID {})", name, report.handle.pid);
            println!("  Dashboard: {}", sup.dashboard_url());
            println!("  Logs:      {}", sup.log_path().display());
            println!();
            println!("💡 'saba-ctl logs' to follow output, 'saba-ctl stop' to stop.");
        }
    }
}

fn print_start_error(sup: &Supervisor, e: &SupervisorError) {
    eprintln!("✗ {}", e);
    match e {
        SupervisorError::LaunchFailed { log_path, .. } => {
            if let Ok(lines) = log_file::tail_lines(log_path, 10) {
                if !lines.is_empty() {
                    eprintln!();
                    eprintln!("Last log lines ({}):", log_path.display());
                    for line in lines {
                        eprintln!("  {}", line);
                    }
                }
            }
        }
        SupervisorError::EntryPointMissing(_) => {
            eprintln!("  Check that {} is the installation directory.", sup.home().display());
        }
        _ => {}
    }
}

async fn cmd_stop(sup: &Supervisor) -> i32 {
    let name = &sup.config().name;
    match sup.stop().await {
        Ok(outcome) => print_stop_outcome(name, &outcome),
        Err(e) => eprintln!("✗ Stop failed: {}", e),
    }
    0
}

fn print_stop_outcome(name: &str, outcome: &StopOutcome) {
    match outcome {
        StopOutcome::NotRunning => println!("ℹ {} is not running", name),
        StopOutcome::Stopped {
            handle,
            forced,
            survived,
        } => {
            let pid = handle.pid;
            if *survived {
                println!("⚠ {} (PID {}) did not exit even after KILL", name, pid);
            } else if *forced {
                println!("✓ {} (PID {}) force-stopped", name, pid);
            } else {
                println!("✓ {} (PID {}) stopped", name, pid);
            }
        }
    }
}

async fn cmd_restart(sup: &Supervisor) -> i32 {
    let name = &sup.config().name;
    println!("⏳ Restarting {}...", name);
    match sup.restart().await {
        Ok(outcome) => {
            print_stop_outcome(name, &outcome.stopped);
            print_start_outcome(sup, &outcome.started);
            0
        }
        Err(e) => {
            print_start_error(sup, &e);
            e.exit_code()
        }
    }
}

async fn cmd_status(sup: &Supervisor, json: bool) -> i32 {
    match sup.status().await {
        Ok(report) if json => match serde_json::to_string_pretty(&report) {
            Ok(s) => println!("{}", s),
            Err(e) => eprintln!("✗ {}", e),
        },
        Ok(report) => print_status(&report),
        Err(e) if json => println!("{}", e.to_json()),
        Err(e) => eprintln!("✗ Status check failed: {}", e),
    }
    0
}

fn print_status(report: &StatusReport) {
    println!("📋 {} status", report.name);
    println!("─────────────────────────────────────────────");
    match &report.running {
        Some(info) => {
            println!("  State:     RUNNING");
            println!("  PID:       {}", info.pid);
            println!("  Uptime:    {}", format_duration(info.uptime_secs));
            println!("  Memory:    {}", format_bytes(info.memory_bytes));
            println!("  CPU:       {:.1}%", info.cpu_percent);
            println!("  Dashboard: {}", report.dashboard_url);
            println!("  Logs:      {}", report.log_path.display());
            if !report.log_tail.is_empty() {
                println!();
                println!("Recent log lines:");
                for line in &report.log_tail {
                    println!("  {}", line);
                }
            }
        }
        None => {
            println!("  State:     NOT running");
            if report.log_exists {
                println!("  Logs:      {}", report.log_path.display());
                if !report.log_tail.is_empty() {
                    println!();
                    println!("Last log lines:");
                    for line in &report.log_tail {
                        println!("  {}", line);
                    }
                }
            }
        }
    }
}

async fn cmd_logs(sup: &Supervisor, lines: usize, follow: bool) -> i32 {
    let path = sup.log_path();
    if !path.exists() {
        println!("⚠ No log file yet at {}", path.display());
        return 0;
    }
    if follow {
        eprintln!("── {} (Ctrl+C to exit) ──", path.display());
    }
    if let Err(e) = log_file::view(&path, lines, follow).await {
        eprintln!("✗ {}", e);
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_arguments_means_start() {
        assert_eq!(parse_args(&[]), Ok(Command::Run(Action::Start)));
    }

    #[test]
    fn known_commands() {
        assert_eq!(parse_args(&args(&["stop"])), Ok(Command::Run(Action::Stop)));
        assert_eq!(parse_args(&args(&["restart"])), Ok(Command::Run(Action::Restart)));
        assert_eq!(parse_args(&args(&["status"])), Ok(Command::Run(Action::Status { json: false })));
        assert_eq!(parse_args(&args(&["status", "--json"])), Ok(Command::Run(Action::Status { json: true })));
        assert_eq!(parse_args(&args(&["-h"])), Ok(Command::Help));
        assert_eq!(parse_args(&args(&["--version"])), Ok(Command::Version));
    }

    #[test]
    fn logs_flags() {
        assert_eq!(
            parse_args(&args(&["logs"])),
            Ok(Command::Run(Action::Logs { lines: DEFAULT_LOG_LINES, follow: true }))
        );
        assert_eq!(
            parse_args(&args(&["logs", "-n", "20", "--no-follow"])),
            Ok(Command::Run(Action::Logs { lines: 20, follow: false }))
        );
        assert!(parse_args(&args(&["logs", "--lines"])).is_err());
        assert!(parse_args(&args(&["logs", "--lines", "many"])).is_err());
    }

    #[test]
    fn unknown_input_is_rejected() {
        assert!(parse_args(&args(&["launch"])).is_err());
        assert!(parse_args(&args(&["stop", "--now"])).is_err());
        assert!(parse_args(&args(&["status", "--yaml"])).is_err());
    }

    #[test]
    fn only_start_and_restart_fail_the_exit_code() {
        assert_eq!(Action::Start.failure_code(1), 1);
        assert_eq!(Action::Restart.failure_code(1), 1);
        assert_eq!(Action::Stop.failure_code(1), 0);
        assert_eq!(Action::Status { json: false }.failure_code(1), 0);
        assert_eq!(Action::Status { json: true }.failure_code(1), 0);
        assert_eq!(Action::Logs { lines: 10, follow: false }.failure_code(1), 0);
    }
}
