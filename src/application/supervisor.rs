//! Process Supervisor: PID-file lifecycle management for the Live Event
//! Loop process, plus the maintenance sentinel the external watchdog
//! consults before restarting a dead process.

use anyhow::{Context, Result};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

pub struct ProcessSupervisor {
    pid_file: PathBuf,
    maintenance_sentinel: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Running(i32),
    NotRunning,
}

impl ProcessSupervisor {
    pub fn new(pid_file: impl Into<PathBuf>, maintenance_sentinel: impl Into<PathBuf>) -> Self {
        Self { pid_file: pid_file.into(), maintenance_sentinel: maintenance_sentinel.into() }
    }

    pub fn write_pid_file(&self, pid: u32) -> Result<()> {
        std::fs::write(&self.pid_file, pid.to_string()).context("failed to write pid file")
    }

    pub fn read_pid(&self) -> Result<Option<i32>> {
        if !self.pid_file.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.pid_file).context("failed to read pid file")?;
        let pid = contents.trim().parse::<i32>().context("pid file does not contain a valid pid")?;
        Ok(Some(pid))
    }

    fn remove_pid_file(&self) -> Result<()> {
        if self.pid_file.exists() {
            std::fs::remove_file(&self.pid_file).context("failed to remove pid file")?;
        }
        Ok(())
    }

    /// Whether the process named by the pid file is alive, per `kill(pid, 0)`.
    pub fn is_alive(pid: i32) -> bool {
        signal::kill(Pid::from_raw(pid), None).is_ok()
    }

    pub fn status(&self) -> Result<ProcessStatus> {
        match self.read_pid()? {
            Some(pid) if Self::is_alive(pid) => Ok(ProcessStatus::Running(pid)),
            _ => Ok(ProcessStatus::NotRunning),
        }
    }

    /// Sends SIGTERM, waits up to `grace` for the process to exit, then
    /// sends SIGKILL if it hasn't.
    pub async fn stop(&self, grace: Duration) -> Result<()> {
        let Some(pid) = self.read_pid()? else {
            info!("no pid file present, nothing to stop");
            return Ok(());
        };
        if !Self::is_alive(pid) {
            info!(pid, "process is not alive, removing stale pid file");
            return self.remove_pid_file();
        }

        info!(pid, "sending SIGTERM");
        signal::kill(Pid::from_raw(pid), Signal::SIGTERM).context("failed to send SIGTERM")?;

        let deadline = tokio::time::Instant::now() + grace;
        while tokio::time::Instant::now() < deadline {
            if !Self::is_alive(pid) {
                info!(pid, "process exited cleanly");
                return self.remove_pid_file();
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        warn!(pid, "process did not exit within grace period, sending SIGKILL");
        signal::kill(Pid::from_raw(pid), Signal::SIGKILL).context("failed to send SIGKILL")?;
        self.remove_pid_file()
    }

    pub fn set_maintenance(&self, on: bool) -> Result<()> {
        if on {
            std::fs::write(&self.maintenance_sentinel, b"").context("failed to create maintenance sentinel")
        } else {
            if self.maintenance_sentinel.exists() {
                std::fs::remove_file(&self.maintenance_sentinel).context("failed to remove maintenance sentinel")?;
            }
            Ok(())
        }
    }

    pub fn is_maintenance_mode(&self) -> bool {
        self.maintenance_sentinel.exists()
    }
}

/// External watchdog check: if the pid file is missing or stale and
/// maintenance mode is not active, the caller should restart the Live
/// Event Loop and alert. Returns `true` when a restart is warranted.
pub fn watchdog_should_restart(pid_file: &Path, maintenance_sentinel: &Path) -> bool {
    let supervisor = ProcessSupervisor::new(pid_file, maintenance_sentinel);
    if supervisor.is_maintenance_mode() {
        return false;
    }
    matches!(supervisor.status(), Ok(ProcessStatus::NotRunning))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("dca-supervisor-test-{name}-{}", std::process::id()))
    }

    #[test]
    fn status_is_not_running_without_a_pid_file() {
        let pid_file = temp_path("no-pid");
        let sentinel = temp_path("no-sentinel");
        let supervisor = ProcessSupervisor::new(&pid_file, &sentinel);
        assert_eq!(supervisor.status().unwrap(), ProcessStatus::NotRunning);
    }

    #[test]
    fn status_is_running_for_this_process_own_pid() {
        let pid_file = temp_path("self-pid");
        let sentinel = temp_path("self-sentinel");
        let supervisor = ProcessSupervisor::new(&pid_file, &sentinel);
        supervisor.write_pid_file(std::process::id()).unwrap();

        assert_eq!(supervisor.status().unwrap(), ProcessStatus::Running(std::process::id() as i32));
        fs::remove_file(&pid_file).ok();
    }

    #[test]
    fn maintenance_sentinel_round_trips() {
        let pid_file = temp_path("maint-pid");
        let sentinel = temp_path("maint-sentinel");
        let supervisor = ProcessSupervisor::new(&pid_file, &sentinel);

        assert!(!supervisor.is_maintenance_mode());
        supervisor.set_maintenance(true).unwrap();
        assert!(supervisor.is_maintenance_mode());
        supervisor.set_maintenance(false).unwrap();
        assert!(!supervisor.is_maintenance_mode());
    }

    #[test]
    fn watchdog_skips_restart_during_maintenance() {
        let pid_file = temp_path("watchdog-pid");
        let sentinel = temp_path("watchdog-sentinel");
        let supervisor = ProcessSupervisor::new(&pid_file, &sentinel);
        supervisor.set_maintenance(true).unwrap();

        assert!(!watchdog_should_restart(&pid_file, &sentinel));
        supervisor.set_maintenance(false).unwrap();
    }
}
