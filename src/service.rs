//! Background service
//!
//! Deploys the bundled TorrServer binary, keeps it running under the
//! [`DaemonSupervisor`] and pushes the configured daemon settings once it
//! answers. SIGINT/SIGTERM abort the service; SIGHUP reloads the settings.

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::{ApiError, TorrServerClient};
use crate::context::AppContext;
use crate::daemon::deploy::platform_dest_dir;
use crate::daemon::supervisor::{DaemonPhase, SupervisionEnd};
use crate::daemon::{
    DaemonError, DaemonSupervisor, ExecutableDaemon, ExecutableDeployer, ReadinessProbe,
    SupervisorOptions,
};
use crate::host::Host;

/// Daemon executable name inside the bundled directory
#[cfg(windows)]
pub const DAEMON_NAME: &str = "TorrServer.exe";
#[cfg(not(windows))]
pub const DAEMON_NAME: &str = "TorrServer";

/// How the service ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceExit {
    /// Stopped by a signal
    Aborted,
    /// Too many crashes in a row
    GaveUp,
    /// Daemon binary missing; the service was disabled in the settings
    Disabled,
}

type Supervisor = DaemonSupervisor<ExecutableDaemon>;

/// Probe that follows settings reloads
struct ReloadableProbe {
    client: RwLock<TorrServerClient>,
}

impl ReloadableProbe {
    fn new(client: TorrServerClient) -> Self {
        Self {
            client: RwLock::new(client),
        }
    }

    fn replace(&self, client: TorrServerClient) {
        *self.client.write() = client;
    }
}

#[async_trait]
impl ReadinessProbe for ReloadableProbe {
    async fn is_ready(&self) -> bool {
        let client = self.client.read().clone();
        client.echo().await.is_ok()
    }
}

/// Bundled daemon directory: `<exe dir>/torrserver`
pub fn default_daemon_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("torrserver")))
        .unwrap_or_else(|| PathBuf::from("torrserver"))
}

/// Run the service until a signal stops it or the daemon keeps crashing
pub async fn run(ctx: &mut AppContext) -> Result<ServiceExit> {
    ctx.paths.ensure()?;
    handle_first_run(ctx);

    let daemon = match build_daemon(ctx) {
        Ok(daemon) => daemon,
        Err(DaemonError::NotFound(path)) => {
            error!("Daemon executable not found at '{}'", path.display());
            ctx.host
                .notify("TorrServer daemon not found, disabling the service");
            ctx.settings.service_enabled = false;
            ctx.save_settings()
                .context("Failed to persist disabled service")?;
            return Ok(ServiceExit::Disabled);
        }
        Err(e) => return Err(e).context("Failed to prepare the daemon"),
    };

    let probe = Arc::new(ReloadableProbe::new(ctx.client.clone()));
    let probe_dyn: Arc<dyn ReadinessProbe> = probe.clone();
    let supervisor = Arc::new(DaemonSupervisor::new(
        daemon,
        probe_dyn,
        Arc::clone(&ctx.host),
        SupervisorOptions::from_settings(&ctx.settings),
        ctx.paths.settings(),
        ctx.paths.log(),
    ));

    let (reload_tx, mut reload_rx) = mpsc::channel::<()>(4);
    install_signal_handlers(ctx.abort.clone(), reload_tx)?;

    let mut supervision = {
        let supervisor = Arc::clone(&supervisor);
        let abort = ctx.abort.clone();
        let (enabled, port) = (ctx.settings.service_enabled, ctx.settings.service_port);
        info!(enabled, port, "Service starting");
        tokio::spawn(async move { supervisor.supervise(enabled, port, &abort).await })
    };
    let mut sync = spawn_settings_sync(ctx, &supervisor);

    let end = loop {
        tokio::select! {
            joined = &mut supervision => {
                break joined.context("Supervisor task failed")?;
            }
            Some(()) = reload_rx.recv() => {
                if let Err(e) = ctx.reload() {
                    warn!("Failed to reload settings: {:#}", e);
                    continue;
                }
                info!("Settings reloaded");
                probe.replace(ctx.client.clone());
                spawn_reconfigure(ctx, &supervisor);
                sync.abort();
                sync = spawn_settings_sync(ctx, &supervisor);
            }
        }
    };
    sync.abort();

    match end {
        Ok(SupervisionEnd::Aborted) => {
            debug!("Service aborted");
            Ok(ServiceExit::Aborted)
        }
        Ok(SupervisionEnd::GaveUp) => Ok(ServiceExit::GaveUp),
        Err(e) => Err(e).context("Daemon supervision failed"),
    }
}

/// Show the first-run notice once per data dir
fn handle_first_run(ctx: &AppContext) {
    let marker = ctx.paths.first_run_marker();
    if marker.exists() {
        return;
    }
    info!("Handling first run");
    let config = ctx
        .settings_path
        .clone()
        .or_else(crate::config::Settings::path)
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "the configuration file".to_string());
    ctx.host.notify(&format!(
        "Welcome to JackTorr. Review the settings in {} before streaming.",
        config
    ));
    if let Err(e) = std::fs::write(&marker, b"") {
        warn!("Failed to write first-run marker: {}", e);
    }
}

fn build_daemon(ctx: &AppContext) -> Result<ExecutableDaemon, DaemonError> {
    let src_dir = ctx
        .settings
        .daemon_dir
        .clone()
        .unwrap_or_else(default_daemon_dir);
    let bin = ctx.paths.bin();
    let dest_dir = platform_dest_dir(&src_dir, Some(&bin));
    let deployer = ExecutableDeployer::new(DAEMON_NAME, &src_dir, dest_dir)?;
    ExecutableDaemon::new(
        &deployer,
        ctx.paths.root(),
        ctx.paths.pid(),
        ctx.paths.log(),
    )
}

fn spawn_reconfigure(ctx: &AppContext, supervisor: &Arc<Supervisor>) {
    let supervisor = Arc::clone(supervisor);
    let abort = ctx.abort.clone();
    let (enabled, port) = (ctx.settings.service_enabled, ctx.settings.service_port);
    tokio::spawn(async move {
        match supervisor.on_configuration_changed(enabled, port, &abort).await {
            Ok(()) => {}
            Err(DaemonError::Aborted) => debug!("Reconfiguration aborted"),
            Err(e) => error!("Reconfiguration failed: {}", e),
        }
    });
}

/// Push `[daemon_settings]` once the daemon is running
fn spawn_settings_sync(ctx: &AppContext, supervisor: &Arc<Supervisor>) -> JoinHandle<()> {
    let supervisor = Arc::clone(supervisor);
    let client = ctx.client.clone();
    let host = Arc::clone(&ctx.host);
    let desired = ctx.settings.daemon_settings_json();
    let abort = ctx.abort.clone();
    let enabled = ctx.settings.service_enabled;
    let timeout = Duration::from_secs(ctx.settings.daemon_timeout);

    tokio::spawn(async move {
        if !enabled || is_empty_object(&desired) {
            return;
        }
        let started = tokio::time::Instant::now();
        while supervisor.status().await.phase != DaemonPhase::Running {
            if started.elapsed() > timeout {
                debug!("Daemon not running, skipping settings sync");
                return;
            }
            tokio::select! {
                _ = abort.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_millis(500)) => {}
            }
        }
        if let Err(e) = sync_daemon_settings(&client, &desired, host.as_ref()).await {
            error!("Failed to sync daemon settings: {}", e);
        }
    })
}

fn is_empty_object(value: &Value) -> bool {
    value.as_object().map(|o| o.is_empty()).unwrap_or(true)
}

/// Overlay `desired` on `current`; `None` when nothing would change
pub fn merge_daemon_settings(current: &Value, desired: &Value) -> Option<Value> {
    let desired = desired.as_object()?;
    let mut merged = current.clone();
    let target = merged.as_object_mut()?;
    for (key, value) in desired {
        target.insert(key.clone(), value.clone());
    }
    if &merged == current {
        None
    } else {
        Some(merged)
    }
}

/// Bring the daemon's settings in line with `desired`
///
/// Returns `true` when a push was made. A rejected push is reported to the
/// user.
pub async fn sync_daemon_settings(
    client: &TorrServerClient,
    desired: &Value,
    host: &dyn Host,
) -> Result<bool, ApiError> {
    let current = client.settings().await?;
    let Some(merged) = merge_daemon_settings(&current, desired) else {
        debug!("Daemon settings already up to date");
        return Ok(false);
    };
    match client.set_settings(&merged).await {
        Ok(()) => {
            info!("Daemon settings updated");
            Ok(true)
        }
        Err(e) => {
            host.notify(&format!("Failed to apply daemon settings: {}", e));
            Err(e)
        }
    }
}

#[cfg(unix)]
fn install_signal_handlers(abort: CancellationToken, reload: mpsc::Sender<()>) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sighup = signal(SignalKind::hangup())?;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM");
                    abort.cancel();
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT");
                    abort.cancel();
                    break;
                }
                _ = sighup.recv() => {
                    info!("Received SIGHUP");
                    if reload.send(()).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn install_signal_handlers(abort: CancellationToken, _reload: mpsc::Sender<()>) -> Result<()> {
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C");
        abort.cancel();
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_overlays_desired_keys() {
        let current = json!({"CacheSize": 100, "PreloadCache": 50});
        let merged = merge_daemon_settings(&current, &json!({"CacheSize": 200})).unwrap();
        assert_eq!(merged, json!({"CacheSize": 200, "PreloadCache": 50}));
    }

    #[test]
    fn test_merge_unchanged_is_none() {
        let current = json!({"CacheSize": 100, "PreloadCache": 50});
        assert!(merge_daemon_settings(&current, &json!({"CacheSize": 100})).is_none());
        assert!(merge_daemon_settings(&current, &json!({})).is_none());
    }

    #[test]
    fn test_empty_object() {
        assert!(is_empty_object(&json!({})));
        assert!(is_empty_object(&Value::Null));
        assert!(!is_empty_object(&json!({"a": 1})));
    }
}
