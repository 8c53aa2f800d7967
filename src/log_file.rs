//! Server log file: start-time rotation, tail reads and the follow view.
//!
//! The supervisor never truncates the log in place. Rotation renames the
//! active file to `<name>.old` (overwriting any previous backup) and only
//! happens from `start`; the viewer is strictly read-only.

use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::supervisor::error::SupervisorError;
use crate::supervisor::pid_record::sibling_with_suffix;

const TAIL_CHUNK: u64 = 8 * 1024;
const FOLLOW_POLL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Rotation {
    /// No log yet
    Missing,
    BelowThreshold { size: u64 },
    Rotated { size: u64, backup: PathBuf },
    /// Size could not be determined; left alone
    Skipped { reason: String },
}

/// `server.log` → `server.log.old`
pub fn backup_path(log_path: &Path) -> PathBuf {
    sibling_with_suffix(log_path, ".old")
}

/// Rename the log aside when it is at or above `threshold` bytes.
///
/// A stat failure other than "not found" does not block startup: it is
/// reported as `Skipped` and logged. A failed rename is an error.
pub fn rotate_if_oversized(log_path: &Path, threshold: u64) -> Result<Rotation, SupervisorError> {
    let size = match fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Rotation::Missing),
        Err(e) => {
            tracing::warn!("Cannot stat {}: {} — skipping rotation", log_path.display(), e);
            return Ok(Rotation::Skipped {
                reason: e.to_string(),
            });
        }
    };
    if size < threshold {
        return Ok(Rotation::BelowThreshold { size });
    }

    let backup = backup_path(log_path);
    fs::rename(log_path, &backup).map_err(|e| SupervisorError::io(log_path, e))?;
    tracing::info!(
        "Rotated {} ({} bytes) to {}",
        log_path.display(),
        size,
        backup.display()
    );
    Ok(Rotation::Rotated { size, backup })
}

/// Last `n` lines of the file, read backwards in chunks so large logs are
/// not loaded whole.
pub fn tail_lines(path: &Path, n: usize) -> io::Result<Vec<String>> {
    if n == 0 {
        return Ok(Vec::new());
    }
    let mut file = File::open(path)?;
    let mut pos = file.metadata()?.len();
    let mut buf: Vec<u8> = Vec::new();
    let mut newlines = 0usize;

    // n개의 완전한 줄을 확보하려면 개행이 n+1개 필요 (맨 앞 줄은 잘려 있을 수 있음)
    while pos > 0 && newlines <= n {
        let step = TAIL_CHUNK.min(pos);
        pos -= step;
        file.seek(SeekFrom::Start(pos))?;
        let mut chunk = vec![0u8; step as usize];
        file.read_exact(&mut chunk)?;
        newlines += chunk.iter().filter(|&&b| b == b'\n').count();
        chunk.extend_from_slice(&buf);
        buf = chunk;
    }

    let text = String::from_utf8_lossy(&buf);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    Ok(lines[start..].iter().map(|l| l.to_string()).collect())
}

/// Bytes appended since `offset`, and the new offset. A file that shrank
/// (rotated underneath us) or vanished is read again from the start.
pub fn read_appended(path: &Path, offset: u64) -> io::Result<(Vec<u8>, u64)> {
    let len = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let from = if len < offset { 0 } else { offset };
    if len == from {
        return Ok((Vec::new(), from));
    }
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(from))?;
    let mut data = Vec::with_capacity((len - from) as usize);
    file.read_to_end(&mut data)?;
    let next = from + data.len() as u64;
    Ok((data, next))
}

/// Print the last `lines` lines, then (when `follow`) keep printing new
/// output until Ctrl+C.
pub async fn view(path: &Path, lines: usize, follow: bool) -> Result<(), SupervisorError> {
    let stdout = io::stdout();
    {
        let mut out = stdout.lock();
        for line in tail_lines(path, lines).map_err(|e| SupervisorError::io(path, e))? {
            writeln!(out, "{}", line).map_err(|e| SupervisorError::io(path, e))?;
        }
    }
    if !follow {
        return Ok(());
    }

    let mut offset = fs::metadata(path)
        .map(|m| m.len())
        .map_err(|e| SupervisorError::io(path, e))?;
    let mut ticker = tokio::time::interval(FOLLOW_POLL);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = ticker.tick() => {
                let (data, next) = read_appended(path, offset)
                    .map_err(|e| SupervisorError::io(path, e))?;
                if next < offset {
                    tracing::debug!("{} shrank, following from the start", path.display());
                }
                offset = next;
                if !data.is_empty() {
                    let mut out = stdout.lock();
                    out.write_all(&data).map_err(|e| SupervisorError::io(path, e))?;
                    out.flush().map_err(|e| SupervisorError::io(path, e))?;
                }
            }
        }
    }
    Ok(())
}
