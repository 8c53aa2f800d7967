//! Supervisor configuration — `<home>/saba-ctl.toml`
//!
//! Every field has a default, so the file is optional. Relative paths are
//! resolved against the home directory (`SABA_CTL_HOME`, else the current
//! directory).

use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::supervisor::error::SupervisorError;

pub const CONFIG_FILE_NAME: &str = "saba-ctl.toml";
pub const HOME_ENV: &str = "SABA_CTL_HOME";
pub const CONFIG_ENV: &str = "SABA_CTL_CONFIG";

/// 로그 회전 임계값 (10 MiB)
pub const DEFAULT_MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Display name used in operator messages
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    /// Checked for existence before launch; empty disables the check.
    pub entry_point: String,
    /// Port the server listens on; only used for access hints.
    pub port: u16,
    pub pid_file: String,
    pub log_file: String,
    pub max_log_bytes: u64,
    pub runtime: RuntimeConfig,
    pub dependencies: DependencyConfig,
    pub timing: TimingConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            name: "server".to_string(),
            program: "node".to_string(),
            args: vec!["server.js".to_string()],
            entry_point: "server.js".to_string(),
            port: 3000,
            pid_file: ".server.pid".to_string(),
            log_file: "server.log".to_string(),
            max_log_bytes: DEFAULT_MAX_LOG_BYTES,
            runtime: RuntimeConfig::default(),
            dependencies: DependencyConfig::default(),
            timing: TimingConfig::default(),
        }
    }
}

/// Language runtime the server needs (`node --version` 등)
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct RuntimeConfig {
    pub enabled: bool,
    pub command: String,
    pub version_arg: String,
    /// "major.minor"; older versions only produce a warning.
    pub min_version: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: "node".to_string(),
            version_arg: "--version".to_string(),
            min_version: "18.0".to_string(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct DependencyConfig {
    pub enabled: bool,
    /// Path whose existence means dependencies are installed
    pub marker: String,
    /// Installer command line, run in the home directory
    pub install: Vec<String>,
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            marker: "node_modules".to_string(),
            install: vec!["npm".to_string(), "install".to_string()],
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct TimingConfig {
    pub confirm_delay_ms: u64,
    pub stop_timeout_ms: u64,
    pub stop_poll_interval_ms: u64,
    pub kill_grace_ms: u64,
    pub restart_pause_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            confirm_delay_ms: 2_000,
            stop_timeout_ms: 10_000,
            stop_poll_interval_ms: 1_000,
            kill_grace_ms: 1_000,
            restart_pause_ms: 1_000,
        }
    }
}

impl TimingConfig {
    pub fn confirm_delay(&self) -> Duration {
        Duration::from_millis(self.confirm_delay_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn stop_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stop_poll_interval_ms.max(1))
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    pub fn restart_pause(&self) -> Duration {
        Duration::from_millis(self.restart_pause_ms)
    }

    /// Number of liveness polls after SIGTERM (10 s / 1 s → 10).
    pub fn stop_polls(&self) -> u64 {
        let interval = self.stop_poll_interval_ms.max(1);
        self.stop_timeout_ms.div_ceil(interval)
    }
}

impl SupervisorConfig {
    /// Home directory: `SABA_CTL_HOME`, else the current directory.
    pub fn resolve_home() -> io::Result<PathBuf> {
        match std::env::var_os(HOME_ENV) {
            Some(dir) if !dir.is_empty() => Ok(PathBuf::from(dir)),
            _ => std::env::current_dir(),
        }
    }

    /// `SABA_CTL_CONFIG`가 있으면 그 경로, 없으면 `<home>/saba-ctl.toml`
    pub fn load(home: &Path) -> Result<Self, SupervisorError> {
        let path = std::env::var_os(CONFIG_ENV)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join(CONFIG_FILE_NAME));
        Self::load_from(&path)
    }

    /// Missing file → defaults. Malformed file → `Config` error.
    pub fn load_from(path: &Path) -> Result<Self, SupervisorError> {
        let s = match fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("No config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(SupervisorError::io(path, e)),
        };
        let cfg: Self = toml::from_str(&s)
            .map_err(|e| SupervisorError::Config(format!("{}: {}", path.display(), e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), SupervisorError> {
        if self.program.trim().is_empty() {
            return Err(SupervisorError::Config("'program' must not be empty".into()));
        }
        if self.pid_file.trim().is_empty() || self.log_file.trim().is_empty() {
            return Err(SupervisorError::Config(
                "'pid_file' and 'log_file' must not be empty".into(),
            ));
        }
        if self.runtime.enabled
            && crate::runtime::parse_version(&self.runtime.min_version).is_none()
        {
            return Err(SupervisorError::Config(format!(
                "runtime.min_version '{}' is not a major.minor version",
                self.runtime.min_version
            )));
        }
        if self.dependencies.enabled && self.dependencies.install.is_empty() {
            return Err(SupervisorError::Config(
                "dependencies.install must name a command".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = SupervisorConfig::load_from(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.max_log_bytes, DEFAULT_MAX_LOG_BYTES);
        assert_eq!(cfg.timing.stop_polls(), 10);
        assert_eq!(cfg.timing.confirm_delay(), Duration::from_secs(2));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(
            &path,
            r#"
name = "dashboard"
program = "python3"
args = ["app.py"]
entry_point = "app.py"
port = 8080

[runtime]
command = "python3"
min_version = "3.10"

[dependencies]
enabled = false

[timing]
stop_timeout_ms = 2500
"#,
        )
        .unwrap();

        let cfg = SupervisorConfig::load_from(&path).unwrap();
        assert_eq!(cfg.name, "dashboard");
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.runtime.version_arg, "--version");
        assert!(!cfg.dependencies.enabled);
        assert_eq!(cfg.log_file, "server.log");
        assert_eq!(cfg.timing.stop_polls(), 3);
    }

    #[test]
    fn malformed_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "port = \"not a number\"").unwrap();
        let err = SupervisorConfig::load_from(&path).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIG");
    }

    #[test]
    fn bad_min_version_is_rejected() {
        let mut cfg = SupervisorConfig::default();
        cfg.runtime.min_version = "latest".into();
        assert!(cfg.validate().is_err());
        cfg.runtime.enabled = false;
        assert!(cfg.validate().is_ok());
    }
}
