//! Daemon process lifecycle
//!
//! [`ProcessDaemon`] wraps exactly one child process: permission setup,
//! leftover cleanup through the pid file, start with output redirected to a
//! log file, non-blocking liveness poll and graceful stop.
//!
//! [`Daemon`] is the capability interface the supervisor drives;
//! [`ExecutableDaemon`] implements it for the deployed TorrServer binary.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::deploy::ExecutableDeployer;
use super::DaemonError;

/// Default time a daemon gets to exit after SIGTERM
const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Result of a non-blocking liveness check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonStatus {
    /// No process was started (or it was stopped)
    NotStarted,
    /// Process is alive
    Running,
    /// Process exited on its own, with its exit code if any
    Exited(Option<i32>),
}

impl DaemonStatus {
    /// Process died without being asked to
    pub fn is_dead(&self) -> bool {
        matches!(self, DaemonStatus::Exited(_))
    }
}

/// Capability interface driven by the supervisor
#[async_trait]
pub trait Daemon: Send + Sync {
    /// Permissions and leftover cleanup; idempotent
    fn setup(&self) -> Result<(), DaemonError>;

    /// Spawn the daemon listening on `port`; returns once spawned
    async fn start(&self, port: u16) -> Result<(), DaemonError>;

    /// Terminate the daemon; always leaves no pid file behind
    async fn stop(&self);

    /// Non-blocking liveness check
    fn poll(&self) -> DaemonStatus;
}

// =============================================================================
// ProcessDaemon
// =============================================================================

/// One supervised child process
pub struct ProcessDaemon {
    path: PathBuf,
    work_dir: PathBuf,
    pid_path: PathBuf,
    grace_period: Duration,
    child: Mutex<Option<Child>>,
}

impl ProcessDaemon {
    /// Create a daemon for the executable at `path`
    pub fn new(path: impl Into<PathBuf>, pid_path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let work_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            path,
            work_dir,
            pid_path: pid_path.into(),
            grace_period: DEFAULT_GRACE_PERIOD,
            child: Mutex::new(None),
        }
    }

    /// Run the process from a different working directory
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    /// Time allowed between SIGTERM and SIGKILL
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pid_path(&self) -> &Path {
        &self.pid_path
    }

    /// Pid of the current child, if any
    pub fn pid(&self) -> Option<u32> {
        self.child.lock().as_ref().and_then(|c| c.id())
    }

    /// Permission setup and stale-lock cleanup
    pub fn setup(&self) -> Result<(), DaemonError> {
        self.ensure_exec_permissions()?;
        self.kill_leftover_process()?;
        Ok(())
    }

    /// Make the executable runnable by its owner, group and others
    #[cfg(unix)]
    pub fn ensure_exec_permissions(&self) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let mut perms = fs::metadata(&self.path)?.permissions();
        let mode = perms.mode();
        if mode & 0o111 != 0o111 {
            debug!("Setting exec permissions on '{}'", self.path.display());
            perms.set_mode(mode | 0o111);
            fs::set_permissions(&self.path, perms)?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn ensure_exec_permissions(&self) -> io::Result<()> {
        Ok(())
    }

    /// Kill a process left behind by a previous run and drop its pid file
    pub fn kill_leftover_process(&self) -> io::Result<()> {
        let contents = match fs::read_to_string(&self.pid_path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };

        match contents.trim().parse::<u32>() {
            Ok(pid) if process_alive(pid) => {
                info!("Killing leftover daemon process with pid {}", pid);
                kill_process(pid);
            }
            Ok(pid) => debug!("Leftover pid {} is not running", pid),
            Err(_) => warn!("Ignoring malformed pid file '{}'", self.pid_path.display()),
        }

        remove_if_exists(&self.pid_path)
    }

    /// Spawn the process with `args`, stdout/stderr appended to `log_path`
    pub async fn start(&self, args: &[String], log_path: &Path) -> Result<u32, DaemonError> {
        if self.poll() == DaemonStatus::Running {
            warn!("Daemon already running, stopping it before start");
            self.stop().await;
        }

        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let log = File::create(log_path)?;
        let log_err = log.try_clone()?;

        debug!("Starting '{}' with args {:?}", self.path.display(), args);
        let child = Command::new(&self.path)
            .args(args)
            .current_dir(&self.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DaemonError::Spawn {
                path: self.path.clone(),
                source,
            })?;

        let pid = child.id().unwrap_or_default();
        if let Some(parent) = self.pid_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.pid_path, pid.to_string())?;
        *self.child.lock() = Some(child);

        info!("Started daemon with pid {}", pid);
        Ok(pid)
    }

    /// SIGTERM, wait for the grace period, then SIGKILL
    pub async fn stop(&self) {
        let child = self.child.lock().take();
        if let Some(mut child) = child {
            match child.try_wait() {
                Ok(Some(status)) => debug!("Daemon already exited with {}", status),
                _ => self.terminate(&mut child).await,
            }
        }
        if let Err(e) = remove_if_exists(&self.pid_path) {
            warn!("Failed to remove pid file '{}': {}", self.pid_path.display(), e);
        }
    }

    async fn terminate(&self, child: &mut Child) {
        #[cfg(unix)]
        {
            if let Some(pid) = child.id() {
                // SAFETY: signalling a pid we spawned and have not yet reaped
                unsafe {
                    libc::kill(pid as libc::pid_t, libc::SIGTERM);
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = child.start_kill();
        }

        match tokio::time::timeout(self.grace_period, child.wait()).await {
            Ok(_) => debug!("Daemon stopped gracefully"),
            Err(_) => {
                warn!("Daemon did not stop in time, force killing");
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill daemon: {}", e);
                }
            }
        }
    }

    /// Non-blocking liveness check
    pub fn poll(&self) -> DaemonStatus {
        let mut guard = self.child.lock();
        match guard.as_mut() {
            None => DaemonStatus::NotStarted,
            Some(child) => match child.try_wait() {
                Ok(None) => DaemonStatus::Running,
                Ok(Some(status)) => DaemonStatus::Exited(status.code()),
                Err(e) => {
                    warn!("Failed to poll daemon: {}", e);
                    DaemonStatus::Running
                }
            },
        }
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    // SAFETY: signal 0 only performs the existence/permission check
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    false
}

#[cfg(unix)]
fn kill_process(pid: u32) {
    // SAFETY: pid was read from our own pid file and checked alive above
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_process(_pid: u32) {}

// =============================================================================
// ExecutableDaemon
// =============================================================================

/// Deployed TorrServer executable run as a [`ProcessDaemon`]
pub struct ExecutableDaemon {
    process: ProcessDaemon,
    log_path: PathBuf,
}

impl ExecutableDaemon {
    /// Deploy the binary and prepare a process running it from `data_dir`
    pub fn new(
        deployer: &ExecutableDeployer,
        data_dir: &Path,
        pid_path: impl Into<PathBuf>,
        log_path: impl Into<PathBuf>,
    ) -> Result<Self, DaemonError> {
        deployer.deploy()?;
        let process = ProcessDaemon::new(deployer.destination(), pid_path).with_work_dir(data_dir);
        Ok(Self {
            process,
            log_path: log_path.into(),
        })
    }

    pub fn process(&self) -> &ProcessDaemon {
        &self.process
    }
}

#[async_trait]
impl Daemon for ExecutableDaemon {
    fn setup(&self) -> Result<(), DaemonError> {
        self.process.setup()
    }

    async fn start(&self, port: u16) -> Result<(), DaemonError> {
        let args = vec!["--port".to_string(), port.to_string()];
        self.process.start(&args, &self.log_path).await?;
        Ok(())
    }

    async fn stop(&self) {
        self.process.stop().await
    }

    fn poll(&self) -> DaemonStatus {
        self.process.poll()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn sleeper(dir: &Path) -> ProcessDaemon {
        ProcessDaemon::new("/bin/sh", dir.join(".pid"))
            .with_work_dir(dir)
            .with_grace_period(Duration::from_secs(2))
    }

    fn sleep_args() -> Vec<String> {
        vec!["-c".to_string(), "sleep 30".to_string()]
    }

    #[test]
    fn test_ensure_exec_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("TorrServer");
        fs::write(&exe, b"#!/bin/sh\n").unwrap();
        fs::set_permissions(&exe, fs::Permissions::from_mode(0o644)).unwrap();

        let daemon = ProcessDaemon::new(&exe, dir.path().join(".pid"));
        daemon.ensure_exec_permissions().unwrap();
        let mode = fs::metadata(&exe).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);

        // Idempotent
        daemon.ensure_exec_permissions().unwrap();
    }

    #[tokio::test]
    async fn test_start_poll_stop() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = sleeper(dir.path());
        assert_eq!(daemon.poll(), DaemonStatus::NotStarted);

        let pid = daemon
            .start(&sleep_args(), &dir.path().join("torrserver.log"))
            .await
            .unwrap();
        assert_eq!(daemon.poll(), DaemonStatus::Running);
        assert_eq!(
            fs::read_to_string(daemon.pid_path()).unwrap(),
            pid.to_string()
        );

        daemon.stop().await;
        assert_eq!(daemon.poll(), DaemonStatus::NotStarted);
        assert!(!daemon.pid_path().exists());
    }

    #[tokio::test]
    async fn test_poll_reports_exit() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = sleeper(dir.path());
        daemon
            .start(
                &["-c".to_string(), "exit 3".to_string()],
                &dir.path().join("torrserver.log"),
            )
            .await
            .unwrap();

        let mut status = daemon.poll();
        for _ in 0..50 {
            if status.is_dead() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            status = daemon.poll();
        }
        assert_eq!(status, DaemonStatus::Exited(Some(3)));
    }

    #[tokio::test]
    async fn test_output_goes_to_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("torrserver.log");
        let daemon = sleeper(dir.path());
        daemon
            .start(&["-c".to_string(), "echo listening".to_string()], &log)
            .await
            .unwrap();
        for _ in 0..50 {
            if daemon.poll().is_dead() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(fs::read_to_string(&log).unwrap().trim(), "listening");
    }

    #[test]
    fn test_kill_leftover_process() {
        let dir = tempfile::tempdir().unwrap();
        let mut leftover = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();
        let pid_path = dir.path().join(".pid");
        fs::write(&pid_path, leftover.id().to_string()).unwrap();

        let daemon = ProcessDaemon::new("/bin/sh", &pid_path);
        daemon.kill_leftover_process().unwrap();

        let status = leftover.wait().unwrap();
        assert!(!status.success());
        assert!(!pid_path.exists());
    }

    #[test]
    fn test_kill_leftover_without_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = ProcessDaemon::new("/bin/sh", dir.path().join(".pid"));
        daemon.kill_leftover_process().unwrap();
    }
}
