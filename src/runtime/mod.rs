//! 런타임 전제 조건 — 언어 런타임 확인 및 의존성 설치
//!
//! Before the server is launched the supervisor checks:
//! 1. The runtime (`node`, `python3`, …) answers `<command> --version`.
//!    Missing → fatal. Older than `min_version` → warning only.
//! 2. The dependency marker (`node_modules/`) exists. Missing → run the
//!    installer (`npm install`) synchronously; non-zero exit is fatal.

use serde::Serialize;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::config::{DependencyConfig, RuntimeConfig};
use crate::supervisor::error::SupervisorError;

#[derive(Debug, Clone, Serialize)]
pub struct RuntimeReport {
    pub command: String,
    /// Raw `--version` output, trimmed
    pub version_text: String,
    pub version: Option<(u32, u32)>,
    pub min_version: Option<(u32, u32)>,
}

impl RuntimeReport {
    /// Runs, but older than recommended. Unparsable versions are not flagged.
    pub fn is_outdated(&self) -> bool {
        match (self.version, self.min_version) {
            (Some(found), Some(min)) => found < min,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DependencyStatus {
    Disabled,
    Present,
    Installed,
}

/// Probe the runtime. Spawn failure or non-zero exit → `RuntimeMissing`.
pub async fn check_runtime(cfg: &RuntimeConfig) -> Result<RuntimeReport, SupervisorError> {
    let min_version = parse_version(&cfg.min_version);
    let missing = |detail: String| SupervisorError::RuntimeMissing {
        command: cfg.command.clone(),
        hint: format!(
            "{}. Install {} {} or newer and make sure it is on PATH",
            detail, cfg.command, cfg.min_version
        ),
    };

    let mut cmd = Command::new(&cfg.command);
    cmd.arg(&cfg.version_arg)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let output = cmd
        .output()
        .await
        .map_err(|e| missing(format!("could not run '{}': {}", cfg.command, e)))?;
    if !output.status.success() {
        return Err(missing(format!(
            "'{} {}' exited with {}",
            cfg.command, cfg.version_arg, output.status
        )));
    }

    // 일부 런타임(java -version 등)은 stderr로 버전을 출력함
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let version_text = if stdout.is_empty() {
        String::from_utf8_lossy(&output.stderr).trim().to_string()
    } else {
        stdout
    };
    let version = version_text.lines().find_map(parse_version);

    let report = RuntimeReport {
        command: cfg.command.clone(),
        version_text,
        version,
        min_version,
    };
    match report.version {
        Some((major, minor)) => tracing::debug!("{} → {}.{}", cfg.command, major, minor),
        None => tracing::warn!(
            "Could not parse version from '{}' output: {:?}",
            cfg.command,
            report.version_text
        ),
    }
    if report.is_outdated() {
        tracing::warn!(
            "{} {} is older than the recommended {}",
            cfg.command,
            report.version_text,
            cfg.min_version
        );
    }
    Ok(report)
}

/// Run the installer when the dependency marker is missing.
pub async fn ensure_dependencies(
    home: &Path,
    cfg: &DependencyConfig,
) -> Result<DependencyStatus, SupervisorError> {
    if !cfg.enabled {
        return Ok(DependencyStatus::Disabled);
    }
    if home.join(&cfg.marker).exists() {
        return Ok(DependencyStatus::Present);
    }
    let (program, args) = cfg
        .install
        .split_first()
        .ok_or_else(|| SupervisorError::Config("dependencies.install is empty".into()))?;

    tracing::info!(
        "Dependency marker '{}' missing, running: {}",
        cfg.marker,
        cfg.install.join(" ")
    );
    // 설치 진행 상황은 운영자 터미널에 그대로 표시
    let status = Command::new(program)
        .args(args)
        .current_dir(home)
        .stdin(Stdio::null())
        .status()
        .await
        .map_err(|e| {
            SupervisorError::DependencyInstallFailed(format!("could not run '{}': {}", program, e))
        })?;

    if !status.success() {
        return Err(SupervisorError::DependencyInstallFailed(format!(
            "'{}' exited with {}",
            cfg.install.join(" "),
            status
        )));
    }
    tracing::info!("Dependencies installed");
    Ok(DependencyStatus::Installed)
}

/// "v22.14.0" → (22, 14), "Python 3.11.4" → (3, 11), "18" → (18, 0)
pub fn parse_version(s: &str) -> Option<(u32, u32)> {
    let token = s
        .split_whitespace()
        .map(|t| t.trim_start_matches(|c: char| c == 'v' || c == 'V'))
        .find(|t| t.starts_with(|c: char| c.is_ascii_digit()))?;
    let mut parts = token.split(|c: char| !c.is_ascii_digit());
    let major = parts.next()?.parse().ok()?;
    let minor = match parts.next() {
        Some(p) if !p.is_empty() => p.parse().ok()?,
        _ => 0,
    };
    Some((major, minor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("v22.14.0"), Some((22, 14)));
        assert_eq!(parse_version("v18.0.0"), Some((18, 0)));
        assert_eq!(parse_version("  v20.11.1  "), Some((20, 11)));
        assert_eq!(parse_version("Python 3.11.4"), Some((3, 11)));
        assert_eq!(parse_version("18"), Some((18, 0)));
        assert_eq!(parse_version("garbage"), None);
        assert_eq!(parse_version(""), None);
    }

    #[test]
    fn outdated_only_when_both_versions_known() {
        let mut report = RuntimeReport {
            command: "node".into(),
            version_text: "v16.20.2".into(),
            version: Some((16, 20)),
            min_version: Some((18, 0)),
        };
        assert!(report.is_outdated());
        report.version = Some((18, 0));
        assert!(!report.is_outdated());
        report.version = None;
        assert!(!report.is_outdated());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runtime_probe_reads_version() {
        // sh가 스크립트를 읽어 실행 — 버전 문자열만 출력하는 가짜 런타임
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("fake-node.sh");
        std::fs::write(&script, "echo v16.20.2\n").unwrap();

        let cfg = RuntimeConfig {
            enabled: true,
            command: "sh".into(),
            version_arg: script.to_string_lossy().into_owned(),
            min_version: "18.0".into(),
        };
        let report = check_runtime(&cfg).await.unwrap();
        assert_eq!(report.version, Some((16, 20)));
        assert_eq!(report.version_text, "v16.20.2");
        assert!(report.is_outdated());
    }

    #[tokio::test]
    async fn missing_runtime_is_fatal() {
        let cfg = RuntimeConfig {
            enabled: true,
            command: "no-such-runtime-4c1d".into(),
            version_arg: "--version".into(),
            min_version: "1.0".into(),
        };
        let err = check_runtime(&cfg).await.unwrap_err();
        assert_eq!(err.error_code(), "RUNTIME_MISSING");
        assert!(err.to_string().contains("Install no-such-runtime-4c1d 1.0"));
    }

    #[tokio::test]
    async fn present_marker_skips_installer() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("node_modules")).unwrap();
        let cfg = DependencyConfig {
            enabled: true,
            marker: "node_modules".into(),
            install: vec!["false".into()],
        };
        let status = ensure_dependencies(dir.path(), &cfg).await.unwrap();
        assert_eq!(status, DependencyStatus::Present);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn installer_runs_in_home_and_creates_marker() {
        let dir = TempDir::new().unwrap();
        let cfg = DependencyConfig {
            enabled: true,
            marker: "deps".into(),
            install: vec!["mkdir".into(), "deps".into()],
        };
        let status = ensure_dependencies(dir.path(), &cfg).await.unwrap();
        assert_eq!(status, DependencyStatus::Installed);
        assert!(dir.path().join("deps").is_dir());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_installer_is_fatal() {
        let dir = TempDir::new().unwrap();
        let cfg = DependencyConfig {
            enabled: true,
            marker: "deps".into(),
            install: vec!["false".into()],
        };
        let err = ensure_dependencies(dir.path(), &cfg).await.unwrap_err();
        assert!(err.is_precondition());
        assert_eq!(err.error_code(), "DEPENDENCY_INSTALL_FAILED");
    }
}
