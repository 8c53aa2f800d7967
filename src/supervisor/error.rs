//! Supervisor 전용 에러 타입 — 에러 종류를 구분하여 CLI에서
//! 적절한 종료 코드와 안내 메시지를 출력할 수 있게 합니다.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Supervisor 작업 중 발생할 수 있는 에러 유형
#[derive(thiserror::Error, Debug)]
pub enum SupervisorError {
    #[error("Runtime '{command}' is not available: {hint}")]
    RuntimeMissing { command: String, hint: String },

    #[error("Dependency installation failed: {0}")]
    DependencyInstallFailed(String),

    #[error("Server entry point not found: {}", .0.display())]
    EntryPointMissing(PathBuf),

    #[error("Server exited during startup ({}); see {}", .exit_status.as_deref().unwrap_or("no longer running"), .log_path.display())]
    LaunchFailed {
        log_path: PathBuf,
        exit_status: Option<String>,
    },

    #[error("Failed to spawn '{program}': {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to send {signal} to PID {pid}: {reason}")]
    Signal {
        pid: u32,
        signal: &'static str,
        reason: String,
    },

    #[error("Failed to lock {}: {source}", .path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Timed out after {waited:?} waiting for {}; another command still holds it", .path.display())]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl SupervisorError {
    pub fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Fatal start preconditions: nothing was launched and no PID record was written.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::RuntimeMissing { .. } | Self::DependencyInstallFailed(_) | Self::EntryPointMissing(_)
        )
    }

    /// 프로세스 종료 코드 매핑
    pub fn exit_code(&self) -> i32 {
        1
    }

    /// 머신 리더블 에러 코드
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::RuntimeMissing { .. } => "RUNTIME_MISSING",
            Self::DependencyInstallFailed(_) => "DEPENDENCY_INSTALL_FAILED",
            Self::EntryPointMissing(_) => "ENTRY_POINT_MISSING",
            Self::LaunchFailed { .. } => "LAUNCH_FAILED",
            Self::SpawnFailed { .. } => "SPAWN_FAILED",
            Self::Signal { .. } => "SIGNAL_FAILED",
            Self::Lock { .. } => "LOCK_FAILED",
            Self::LockTimeout { .. } => "LOCK_TIMEOUT",
            Self::Config(_) => "INVALID_CONFIG",
            Self::Io { .. } => "IO_ERROR",
        }
    }

    /// JSON 에러 응답 생성 (`status --json` 등 기계 판독용 출력)
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "success": false,
            "error": self.to_string(),
            "error_code": self.error_code(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preconditions_are_classified() {
        assert!(SupervisorError::EntryPointMissing(PathBuf::from("server.js")).is_precondition());
        assert!(SupervisorError::DependencyInstallFailed("exit 1".into()).is_precondition());
        assert!(!SupervisorError::LaunchFailed {
            log_path: PathBuf::from("server.log"),
            exit_status: None,
        }
        .is_precondition());
    }

    #[test]
    fn launch_failed_message_points_at_log() {
        let err = SupervisorError::LaunchFailed {
            log_path: PathBuf::from("/srv/app/server.log"),
            exit_status: Some("exit status: 3".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("exit status: 3"));
        assert!(msg.contains("/srv/app/server.log"));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn json_carries_error_code() {
        let err = SupervisorError::Config("bad port".into());
        let json = err.to_json();
        assert_eq!(json["success"], false);
        assert_eq!(json["error_code"], "INVALID_CONFIG");
    }
}
