pub mod error;
pub mod pid_record;
pub mod process;

use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::SupervisorConfig;
use crate::log_file::{self, Rotation};
use crate::process_monitor;
use crate::runtime::{self, DependencyStatus, RuntimeReport};
use error::SupervisorError;
use pid_record::{sibling_with_suffix, PidRecord, ProcessHandle, RecordLock, StoredRecord};
use process::StopSignal;

/// Log lines shown by `status` while the server runs / after it died.
pub const STATUS_TAIL_RUNNING: usize = 5;
pub const STATUS_TAIL_STOPPED: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Running(ProcessHandle),
    NotRunning,
}

/// What a fresh launch went through before the server came up.
#[derive(Debug, Clone, Serialize)]
pub struct LaunchReport {
    pub handle: ProcessHandle,
    pub runtime: Option<RuntimeReport>,
    pub dependencies: DependencyStatus,
    pub rotation: Rotation,
}

#[derive(Debug, Clone)]
pub enum StartOutcome {
    AlreadyRunning(ProcessHandle),
    Started(LaunchReport),
}

impl StartOutcome {
    pub fn pid(&self) -> u32 {
        match self {
            Self::AlreadyRunning(handle) => handle.pid,
            Self::Started(report) => report.handle.pid,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    Stopped {
        handle: ProcessHandle,
        /// Escalated to SIGKILL
        forced: bool,
        /// Still alive even after SIGKILL; the record was removed anyway
        survived: bool,
    },
}

impl StopOutcome {
    /// Handle of a process that was signalled but outlived KILL.
    pub fn survivor(&self) -> Option<ProcessHandle> {
        match *self {
            Self::Stopped {
                handle,
                survived: true,
                ..
            } => Some(handle),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RestartOutcome {
    pub stopped: StopOutcome,
    pub started: StartOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunningInfo {
    pub pid: u32,
    pub uptime_secs: u64,
    pub memory_bytes: u64,
    pub cpu_percent: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub name: String,
    pub running: Option<RunningInfo>,
    pub dashboard_url: String,
    pub log_path: PathBuf,
    pub log_exists: bool,
    pub log_tail: Vec<String>,
}

impl StatusReport {
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

/// Per-invocation supervisor. Holds no process state of its own: every
/// command re-derives liveness from the PID record and the OS.
pub struct Supervisor {
    home: PathBuf,
    config: SupervisorConfig,
}

impl Supervisor {
    pub fn new(home: impl Into<PathBuf>, config: SupervisorConfig) -> Self {
        Self {
            home: home.into(),
            config,
        }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    fn resolve(&self, p: &str) -> PathBuf {
        self.home.join(p)
    }

    pub fn pid_path(&self) -> PathBuf {
        self.resolve(&self.config.pid_file)
    }

    pub fn lock_path(&self) -> PathBuf {
        sibling_with_suffix(&self.pid_path(), ".lock")
    }

    pub fn log_path(&self) -> PathBuf {
        self.resolve(&self.config.log_file)
    }

    pub fn entry_point_path(&self) -> Option<PathBuf> {
        if self.config.entry_point.trim().is_empty() {
            None
        } else {
            Some(self.resolve(&self.config.entry_point))
        }
    }

    pub fn dashboard_url(&self) -> String {
        format!("http://localhost:{}", self.config.port)
    }

    fn record(&self) -> PidRecord {
        PidRecord::new(self.pid_path())
    }

    /// Liveness check. A stale or unreadable record is deleted on the spot, so
    /// afterwards the record is either absent or names a live process.
    pub fn liveness(&self) -> Result<Liveness, SupervisorError> {
        let record = self.record();
        let handle = match record.load()? {
            StoredRecord::Absent => return Ok(Liveness::NotRunning),
            StoredRecord::Unreadable(raw) => {
                tracing::info!(
                    "Discarding unreadable PID record {}: {:?}",
                    record.path().display(),
                    raw.trim()
                );
                record.remove()?;
                return Ok(Liveness::NotRunning);
            }
            StoredRecord::Handle(handle) => handle,
        };

        if process_monitor::is_same_process(handle.pid, handle.launched_at) {
            Ok(Liveness::Running(handle))
        } else {
            tracing::info!("Removing stale PID record for pid {}", handle.pid);
            record.remove()?;
            Ok(Liveness::NotRunning)
        }
    }

    pub async fn start(&self) -> Result<StartOutcome, SupervisorError> {
        let _lock = RecordLock::acquire(&self.lock_path())?;

        if let Liveness::Running(handle) = self.liveness()? {
            tracing::info!("'{}' is already running with pid {}", self.config.name, handle.pid);
            return Ok(StartOutcome::AlreadyRunning(handle));
        }

        let runtime = if self.config.runtime.enabled {
            Some(runtime::check_runtime(&self.config.runtime).await?)
        } else {
            None
        };
        let dependencies = runtime::ensure_dependencies(&self.home, &self.config.dependencies).await?;
        if let Some(entry) = self.entry_point_path() {
            if !entry.exists() {
                return Err(SupervisorError::EntryPointMissing(entry));
            }
        }

        let log_path = self.log_path();
        let rotation = log_file::rotate_if_oversized(&log_path, self.config.max_log_bytes)?;

        let mut child = process::spawn_detached(
            &self.config.program,
            &self.config.args,
            &self.home,
            &log_path,
        )?;
        let pid = child.id();
        let handle = ProcessHandle::new(pid, process_monitor::start_time(pid));

        let record = self.record();
        if let Err(e) = record.save(&handle) {
            // 기록 없이 떠 있는 프로세스를 남기지 않음
            tracing::error!("Could not write PID record, killing pid {}: {}", pid, e);
            let _ = child.kill();
            let _ = child.wait();
            return Err(e);
        }

        tokio::time::sleep(self.config.timing.confirm_delay()).await;

        // try_wait reaps the child if it already exited, so the OS view below
        // never sees a zombie of our own making.
        let exit_status = match child.try_wait() {
            Ok(Some(status)) => Some(status.to_string()),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Could not poll child {}: {}", pid, e);
                None
            }
        };
        if exit_status.is_some() || !process_monitor::is_same_process(pid, handle.launched_at) {
            record.remove()?;
            tracing::warn!(
                "'{}' (pid {}) died during startup: {}",
                self.config.name,
                pid,
                exit_status.as_deref().unwrap_or("gone")
            );
            return Err(SupervisorError::LaunchFailed {
                log_path,
                exit_status,
            });
        }

        tracing::info!("'{}' started with pid {}", self.config.name, pid);
        Ok(StartOutcome::Started(LaunchReport {
            handle,
            runtime,
            dependencies,
            rotation,
        }))
    }

    /// Graceful, then forced termination. Waits at most stop_timeout for the
    /// lock, then finishes within stop_timeout + kill_grace (+ one poll) and
    /// always removes the record.
    pub async fn stop(&self) -> Result<StopOutcome, SupervisorError> {
        let timing = &self.config.timing;
        let _lock = RecordLock::acquire_within(
            &self.lock_path(),
            timing.stop_timeout(),
            timing.stop_poll_interval(),
        )
        .await?;

        let handle = match self.liveness()? {
            Liveness::Running(handle) => handle,
            Liveness::NotRunning => return Ok(StopOutcome::NotRunning),
        };
        let pid = handle.pid;
        let alive = || process_monitor::is_same_process(pid, handle.launched_at);

        if let Err(e) = process::send_signal(pid, StopSignal::Terminate) {
            tracing::warn!("{}", e);
        }

        let mut exited = false;
        for _ in 0..timing.stop_polls() {
            if !alive() {
                exited = true;
                break;
            }
            tokio::time::sleep(timing.stop_poll_interval()).await;
        }
        if !exited {
            exited = !alive();
        }

        let mut forced = false;
        let mut survived = false;
        if !exited {
            tracing::warn!(
                "pid {} ignored TERM for {:?}, sending KILL",
                pid,
                timing.stop_timeout()
            );
            forced = true;
            if let Err(e) = process::send_signal(pid, StopSignal::Kill) {
                tracing::warn!("{}", e);
            }
            tokio::time::sleep(timing.kill_grace()).await;
            survived = alive();
            if survived {
                tracing::warn!("pid {} survived KILL; removing record anyway", pid);
            }
        }

        self.record().remove()?;
        tracing::info!("'{}' (pid {}) stopped", self.config.name, pid);
        Ok(StopOutcome::Stopped {
            handle,
            forced,
            survived,
        })
    }

    /// stop → pause → start. A process that outlived KILL keeps its slot.
    pub async fn restart(&self) -> Result<RestartOutcome, SupervisorError> {
        let stopped = self.stop().await?;
        tokio::time::sleep(self.config.timing.restart_pause()).await;
        let started = self.start_after(&stopped).await?;
        Ok(RestartOutcome { stopped, started })
    }

    /// stop drops the record even for a survivor, so start alone would not
    /// see it. Put the record back and report it instead of launching a
    /// second server next to it.
    async fn start_after(&self, stopped: &StopOutcome) -> Result<StartOutcome, SupervisorError> {
        if let Some(survivor) = stopped.survivor() {
            let _lock = RecordLock::acquire(&self.lock_path())?;
            if let Liveness::Running(current) = self.liveness()? {
                return Ok(StartOutcome::AlreadyRunning(current));
            }
            if process_monitor::is_same_process(survivor.pid, survivor.launched_at) {
                tracing::warn!(
                    "pid {} is still alive after stop; not launching another '{}'",
                    survivor.pid,
                    self.config.name
                );
                self.record().save(&survivor)?;
                return Ok(StartOutcome::AlreadyRunning(survivor));
            }
        }
        self.start().await
    }

    pub async fn status(&self) -> Result<StatusReport, SupervisorError> {
        let log_path = self.log_path();

        let running = match self.liveness()? {
            Liveness::Running(handle) => match process_monitor::sample_async(handle.pid).await {
                Some(snapshot) => Some(RunningInfo {
                    pid: handle.pid,
                    uptime_secs: snapshot.run_time_secs,
                    memory_bytes: snapshot.memory_bytes,
                    cpu_percent: snapshot.cpu_percent,
                }),
                None => {
                    // 샘플링 도중 종료됨 — 기록 정리
                    self.liveness()?;
                    None
                }
            },
            Liveness::NotRunning => None,
        };

        let log_exists = log_path.exists();
        let tail_len = if running.is_some() {
            STATUS_TAIL_RUNNING
        } else {
            STATUS_TAIL_STOPPED
        };
        let log_tail = if log_exists {
            log_file::tail_lines(&log_path, tail_len).unwrap_or_else(|e| {
                tracing::warn!("Cannot read {}: {}", log_path.display(), e);
                Vec::new()
            })
        } else {
            Vec::new()
        };

        Ok(StatusReport {
            name: self.config.name.clone(),
            running,
            dashboard_url: self.dashboard_url(),
            log_path,
            log_exists,
            log_tail,
        })
    }
}
