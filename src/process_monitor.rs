use serde::Serialize;
use sysinfo::{Pid, ProcessStatus, System};

/// Allowed drift between the recorded launch time and the OS-reported start
/// time. Start times are derived from boot time + ticks and can wobble.
const LAUNCH_TIME_TOLERANCE_SECS: u64 = 2;

/// Point-in-time view of one OS process.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessSnapshot {
    pub pid: u32,
    /// Seconds since Unix epoch
    pub start_time: u64,
    pub run_time_secs: u64,
    pub memory_bytes: u64,
    pub cpu_percent: f32,
}

fn is_live_status(status: ProcessStatus) -> bool {
    !matches!(status, ProcessStatus::Zombie | ProcessStatus::Dead)
}

fn snapshot_of(sys: &System, pid: u32) -> Option<ProcessSnapshot> {
    let process = sys.process(Pid::from_u32(pid))?;
    if !is_live_status(process.status()) {
        return None;
    }
    Some(ProcessSnapshot {
        pid,
        start_time: process.start_time(),
        run_time_secs: process.run_time(),
        memory_bytes: process.memory(),
        cpu_percent: process.cpu_usage(),
    })
}

/// 특정 PID의 스냅샷 (CPU 사용률은 0으로 나옴 — `sample` 사용)
pub fn inspect(pid: u32) -> Option<ProcessSnapshot> {
    let mut sys = System::new();
    if !sys.refresh_process(Pid::from_u32(pid)) {
        return None;
    }
    snapshot_of(&sys, pid)
}

/// 특정 PID가 실행 중인지 확인. Zombie는 종료된 것으로 취급합니다.
pub fn is_running(pid: u32) -> bool {
    inspect(pid).is_some()
}

/// OS-reported start time of a live process.
pub fn start_time(pid: u32) -> Option<u64> {
    inspect(pid).map(|p| p.start_time)
}

/// Liveness with PID-reuse guard: when `launched_at` is known, a live PID
/// whose start time differs is some other process.
pub fn is_same_process(pid: u32, launched_at: Option<u64>) -> bool {
    match (inspect(pid), launched_at) {
        (None, _) => false,
        (Some(_), None) => true,
        (Some(snapshot), Some(expected)) => {
            let matches = snapshot.start_time.abs_diff(expected) <= LAUNCH_TIME_TOLERANCE_SECS;
            if !matches {
                tracing::debug!(
                    "PID {} is alive but started at {} (recorded {}); treating as reused",
                    pid,
                    snapshot.start_time,
                    expected
                );
            }
            matches
        }
    }
}

/// Snapshot including CPU usage. CPU percent needs two refreshes separated by
/// sysinfo's minimum update interval, so this blocks briefly.
pub fn sample(pid: u32) -> Option<ProcessSnapshot> {
    let mut sys = System::new();
    let sys_pid = Pid::from_u32(pid);
    if !sys.refresh_process(sys_pid) {
        return None;
    }
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    if !sys.refresh_process(sys_pid) {
        return None;
    }
    snapshot_of(&sys, pid)
}

// ── Async wrappers ─────────────────────────────────────────
// sample()은 CPU 측정을 위해 sleep 하므로 spawn_blocking으로 실행합니다.

/// `sample`의 비동기 래퍼.
pub async fn sample_async(pid: u32) -> Option<ProcessSnapshot> {
    tokio::task::spawn_blocking(move || sample(pid))
        .await
        .unwrap_or(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_running() {
        let me = std::process::id();
        assert!(is_running(me));
        let snap = inspect(me).expect("own process should be visible");
        assert_eq!(snap.pid, me);
        assert!(snap.start_time > 0);
    }

    #[test]
    fn launch_time_mismatch_is_not_same_process() {
        let me = std::process::id();
        let started = start_time(me).unwrap();
        assert!(is_same_process(me, Some(started)));
        assert!(is_same_process(me, None));
        assert!(!is_same_process(me, Some(started.saturating_sub(3600))));
    }

    #[test]
    fn unknown_pid_is_not_running() {
        // PID 근처 상한값 — 실제로 존재할 가능성이 거의 없음
        assert!(!is_running(u32::MAX - 1));
        assert!(start_time(u32::MAX - 1).is_none());
    }

    #[tokio::test]
    async fn sample_reports_memory_for_self() {
        let snap = sample_async(std::process::id()).await.unwrap();
        assert!(snap.memory_bytes > 0);
        assert!(snap.cpu_percent >= 0.0);
    }
}
