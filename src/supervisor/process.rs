//! OS-level process primitives: detached launch and termination signals.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use super::error::SupervisorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// Cooperative shutdown request (SIGTERM)
    Terminate,
    /// Non-ignorable (SIGKILL)
    Kill,
}

impl StopSignal {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Terminate => "TERM",
            Self::Kill => "KILL",
        }
    }
}

/// Programs given as relative paths (`./bin/server`) resolve against `cwd`;
/// bare names (`node`) go through `PATH`.
pub fn resolve_program(program: &str, cwd: &Path) -> PathBuf {
    let path = Path::new(program);
    if path.is_relative() && path.components().count() > 1 {
        cwd.join(path)
    } else {
        path.to_path_buf()
    }
}

/// 프로세스를 분리(detach)하여 실행 — 부모 종료 후에도 유지
///
/// stdout/stderr are both appended to `log_path`; stdin is `/dev/null`. On Unix
/// the child starts its own session so terminal hangups never reach it.
pub fn spawn_detached(
    program: &str,
    args: &[String],
    cwd: &Path,
    log_path: &Path,
) -> Result<Child, SupervisorError> {
    if let Some(dir) = log_path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir).map_err(|e| SupervisorError::io(dir, e))?;
        }
    }
    let stdout = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .map_err(|e| SupervisorError::io(log_path, e))?;
    let stderr = stdout
        .try_clone()
        .map_err(|e| SupervisorError::io(log_path, e))?;

    let mut cmd = Command::new(resolve_program(program, cwd));
    cmd.args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr));

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        unsafe {
            cmd.pre_exec(|| {
                nix::unistd::setsid()
                    .map(|_| ())
                    .map_err(std::io::Error::from)
            });
        }
    }

    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        const DETACHED_PROCESS: u32 = 0x00000008;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;
        cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
    }

    let child = cmd.spawn().map_err(|source| SupervisorError::SpawnFailed {
        program: program.to_string(),
        source,
    })?;
    tracing::info!("Spawned '{}' with pid {}", program, child.id());
    Ok(child)
}

/// Send a stop signal. A process that is already gone counts as success.
#[cfg(unix)]
pub fn send_signal(pid: u32, signal: StopSignal) -> Result<(), SupervisorError> {
    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| SupervisorError::Signal {
        pid,
        signal: signal.name(),
        reason: "PID out of range".into(),
    })?;
    let sig = match signal {
        StopSignal::Terminate => Signal::SIGTERM,
        StopSignal::Kill => Signal::SIGKILL,
    };
    tracing::info!("Sending {} signal to pid {}", signal.name(), pid);
    match signal::kill(Pid::from_raw(raw), sig) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(SupervisorError::Signal {
            pid,
            signal: signal.name(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(target_os = "windows")]
pub fn send_signal(pid: u32, signal: StopSignal) -> Result<(), SupervisorError> {
    use std::os::windows::process::CommandExt;
    const CREATE_NO_WINDOW: u32 = 0x08000000;

    let pid_arg = pid.to_string();
    let mut args = vec!["/PID", pid_arg.as_str()];
    if signal == StopSignal::Kill {
        args.push("/F");
    }
    tracing::info!("Sending {} to pid {} via taskkill", signal.name(), pid);
    Command::new("taskkill")
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .creation_flags(CREATE_NO_WINDOW)
        .status()
        .map(|_| ())
        .map_err(|e| SupervisorError::Signal {
            pid,
            signal: signal.name(),
            reason: e.to_string(),
        })
}
