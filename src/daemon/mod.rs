//! Daemon supervision
//!
//! - Deploy: keeps an up-to-date copy of the daemon binary in a writable place
//! - Process: child process lifecycle, pid file and leftover cleanup
//! - Supervisor: desired-vs-actual reconciliation and crash recovery

pub mod deploy;
pub mod process;
pub mod supervisor;

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub use deploy::ExecutableDeployer;
pub use process::{Daemon, DaemonStatus, ExecutableDaemon, ProcessDaemon};
pub use supervisor::{CrashRecord, DaemonSupervisor, ReadinessProbe, SupervisorOptions};

/// Errors from daemon deployment and supervision
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Source executable is missing; fatal, never retried
    #[error("TorrServer daemon source path does not exist: {}", .0.display())]
    NotFound(PathBuf),

    /// Daemon never answered the liveness probe
    #[error("Timed out after {0:?} waiting for daemon")]
    Timeout(Duration),

    /// Host shutdown requested while waiting
    #[error("Abort requested")]
    Aborted,

    #[error("Failed to start {}: {source}", path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Daemon I/O error: {0}")]
    Io(#[from] std::io::Error),
}
