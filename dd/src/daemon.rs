//! Daemon process management
//!
//! PID file handling for the running server, and signalling a running
//! daemon from the command line.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

/// A PID file, `"<pid>\n"`
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        debug!(?path, "PidFile::new: called");
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the current process id, replacing any previous content
    pub fn create(&self) -> Result<()> {
        self.write_pid(std::process::id())
    }

    fn write_pid(&self, pid: u32) -> Result<()> {
        debug!(pid, path = ?self.path, "PidFile::write_pid: called");
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).context("Failed to create PID file directory")?;
        }

        let mut file = fs::File::create(&self.path).context(format!("Failed to create PID file {}", self.path.display()))?;
        writeln!(file, "{}", pid).context("Failed to write PID")?;

        info!(pid, path = %self.path.display(), "Wrote PID file");
        Ok(())
    }

    /// Read the PID back; `None` when missing or unparsable
    pub fn read_pid(&self) -> Option<u32> {
        let pid = fs::read_to_string(&self.path).ok()?.trim().parse().ok();
        debug!(?pid, path = ?self.path, "PidFile::read_pid: returning");
        pid
    }

    /// Remove the file; a missing file is not an error
    pub fn remove(&self) -> Result<()> {
        debug!(path = ?self.path, "PidFile::remove: called");
        if self.path.exists() {
            fs::remove_file(&self.path).context(format!("Failed to remove PID file {}", self.path.display()))?;
            debug!(path = ?self.path, "Removed PID file");
        }
        Ok(())
    }

    /// PID of a live process named by the file
    pub fn running_pid(&self) -> Option<u32> {
        self.read_pid().filter(|&pid| is_process_running(pid))
    }

    pub fn status(&self) -> DaemonStatus {
        let pid = self.running_pid();
        DaemonStatus {
            running: pid.is_some(),
            pid,
            pid_file: self.path.clone(),
        }
    }

    /// Ask the running daemon to reload its configuration
    pub fn reload(&self) -> Result<u32> {
        let pid = self.require_running()?;
        info!(pid, "Sending SIGHUP");
        send_signal(pid, Signal::SIGHUP)?;
        Ok(pid)
    }

    /// Ask the running daemon to stop and wait up to `timeout` for it to exit
    pub fn stop(&self, timeout: Duration) -> Result<u32> {
        let pid = self.require_running()?;
        info!(pid, "Sending SIGTERM");
        send_signal(pid, Signal::SIGTERM)?;

        let deadline = std::time::Instant::now() + timeout;
        while is_process_running(pid) && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(100));
        }

        if is_process_running(pid) {
            warn!(pid, "Daemon still running after {:?}", timeout);
            return Err(eyre::eyre!("Daemon (pid {}) did not exit within {:?}", pid, timeout));
        }
        info!(pid, "Daemon stopped");
        Ok(pid)
    }

    fn require_running(&self) -> Result<u32> {
        self.running_pid()
            .ok_or_else(|| eyre::eyre!("Daemon is not running (no live pid in {})", self.path.display()))
    }
}

fn send_signal(pid: u32, signal: Signal) -> Result<()> {
    debug!(pid, ?signal, "send_signal: called");
    kill(Pid::from_raw(pid as i32), signal).context(format!("Failed to send {:?} to {}", signal, pid))
}

fn is_process_running(pid: u32) -> bool {
    // Signal 0 only checks that the process exists
    let result = kill(Pid::from_raw(pid as i32), None).is_ok();
    debug!(pid, result, "is_process_running: checked");
    result
}

/// Daemon status information
#[derive(Debug)]
pub struct DaemonStatus {
    /// Whether the daemon is running
    pub running: bool,
    /// Process ID (if running)
    pub pid: Option<u32>,
    /// PID file path
    pub pid_file: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_writes_pid_and_newline() {
        let temp_dir = TempDir::new().unwrap();
        let pid_file = PidFile::new(temp_dir.path().join("run").join("dashd.pid"));

        pid_file.create().unwrap();
        let content = fs::read_to_string(pid_file.path()).unwrap();
        assert_eq!(content, format!("{}\n", std::process::id()));
        assert_eq!(pid_file.read_pid(), Some(std::process::id()));
    }

    #[test]
    fn test_create_replaces_previous_content() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("dashd.pid");
        fs::write(&path, "999999999\nstale\n").unwrap();

        let pid_file = PidFile::new(&path);
        pid_file.create().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), format!("{}\n", std::process::id()));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let pid_file = PidFile::new(temp_dir.path().join("dashd.pid"));

        pid_file.create().unwrap();
        pid_file.remove().unwrap();
        assert!(!pid_file.path().exists());
        pid_file.remove().unwrap();
        assert_eq!(pid_file.read_pid(), None);
    }

    #[test]
    fn test_status_of_current_process() {
        let temp_dir = TempDir::new().unwrap();
        let pid_file = PidFile::new(temp_dir.path().join("dashd.pid"));

        assert!(!pid_file.status().running);
        pid_file.create().unwrap();
        let status = pid_file.status();
        assert!(status.running);
        assert_eq!(status.pid, Some(std::process::id()));
    }

    #[test]
    fn test_reload_without_daemon_fails() {
        let temp_dir = TempDir::new().unwrap();
        let pid_file = PidFile::new(temp_dir.path().join("dashd.pid"));
        assert!(pid_file.reload().is_err());
        assert!(pid_file.stop(Duration::from_millis(10)).is_err());
    }

    #[test]
    fn test_unwritable_location_fails() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        fs::write(&blocker, "").unwrap();
        let pid_file = PidFile::new(blocker.join("dashd.pid"));
        assert!(pid_file.create().is_err());
    }
}
