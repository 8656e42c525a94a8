//! Daemon supervisor
//!
//! Reconciles the desired state (`enabled`, `port`) with the running daemon
//! and recovers it after crashes.
//!
//! A single async mutex guards the supervisor state; it is held for each
//! start/stop decision but released while waiting for the daemon to answer
//! its liveness probe. A wait notices that it has been superseded through the
//! state's generation counter, so a configuration change never waits behind
//! a readiness timeout.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::process::Daemon;
use super::DaemonError;
use crate::api::TorrServerClient;
use crate::config::Settings;
use crate::host::Host;

/// Answers whether the daemon is serving requests
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn is_ready(&self) -> bool;
}

#[async_trait]
impl ReadinessProbe for TorrServerClient {
    async fn is_ready(&self) -> bool {
        self.echo().await.is_ok()
    }
}

/// Supervisor tunables
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Crashes tolerated within one crash window before giving up
    pub max_crashes: u32,
    /// Gap after which a crash starts a new record
    pub crash_window: Duration,
    /// How long a start may take to answer the probe
    pub ready_timeout: Duration,
    /// Crash loop wake-up interval
    pub poll_interval: Duration,
    /// Readiness probe interval
    pub probe_interval: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            max_crashes: 5,
            crash_window: Duration::from_secs(30),
            ready_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
            probe_interval: Duration::from_millis(500),
        }
    }
}

impl SupervisorOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_crashes: settings.max_crashes,
            crash_window: Duration::from_secs(settings.max_consecutive_crash_time),
            ready_timeout: Duration::from_secs(settings.daemon_timeout),
            ..Self::default()
        }
    }
}

/// Crashes counted as one ongoing incident
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrashRecord {
    pub count: u32,
    pub last_crash: Instant,
}

impl CrashRecord {
    pub fn new(now: Instant) -> Self {
        Self {
            count: 1,
            last_crash: now,
        }
    }

    /// Record a crash at `now`; resets to 1 when the gap exceeds `window`
    pub fn register(&mut self, now: Instant, window: Duration) -> u32 {
        if now.saturating_duration_since(self.last_crash) > window {
            self.count = 1;
        } else {
            self.count += 1;
        }
        self.last_crash = now;
        self.count
    }
}

/// Lifecycle phase of the supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonPhase {
    Stopped,
    Starting,
    Running,
}

/// Why the crash loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisionEnd {
    /// Host shutdown
    Aborted,
    /// Crash budget exhausted
    GaveUp,
}

/// Point-in-time view of the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorStatus {
    pub enabled: bool,
    pub port: u16,
    pub phase: DaemonPhase,
    pub crash_count: u32,
}

#[derive(Debug)]
struct SupervisorState {
    enabled: bool,
    port: u16,
    phase: DaemonPhase,
    generation: u64,
    crashes: Option<CrashRecord>,
    announced: bool,
}

impl SupervisorState {
    fn register_crash(&mut self, now: Instant, window: Duration) -> u32 {
        match self.crashes.as_mut() {
            Some(record) => record.register(now, window),
            None => {
                self.crashes = Some(CrashRecord::new(now));
                1
            }
        }
    }
}

/// Owns one daemon and keeps it in the desired state
pub struct DaemonSupervisor<D: Daemon> {
    daemon: D,
    probe: Arc<dyn ReadinessProbe>,
    host: Arc<dyn Host>,
    options: SupervisorOptions,
    settings_path: PathBuf,
    log_path: PathBuf,
    state: Mutex<SupervisorState>,
}

impl<D: Daemon> DaemonSupervisor<D> {
    pub fn new(
        daemon: D,
        probe: Arc<dyn ReadinessProbe>,
        host: Arc<dyn Host>,
        options: SupervisorOptions,
        settings_path: impl Into<PathBuf>,
        log_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            daemon,
            probe,
            host,
            options,
            settings_path: settings_path.into(),
            log_path: log_path.into(),
            state: Mutex::new(SupervisorState {
                enabled: false,
                port: 0,
                phase: DaemonPhase::Stopped,
                generation: 0,
                crashes: None,
                announced: false,
            }),
        }
    }

    pub fn daemon(&self) -> &D {
        &self.daemon
    }

    pub async fn status(&self) -> SupervisorStatus {
        let state = self.state.lock().await;
        SupervisorStatus {
            enabled: state.enabled,
            port: state.port,
            phase: state.phase,
            crash_count: state.crashes.map(|c| c.count).unwrap_or(0),
        }
    }

    /// Run the daemon for the lifetime of `abort`
    ///
    /// The process is stopped on every exit path.
    pub async fn supervise(
        &self,
        enabled: bool,
        port: u16,
        abort: &CancellationToken,
    ) -> Result<SupervisionEnd, DaemonError> {
        let result = self.supervise_inner(enabled, port, abort).await;
        self.shutdown().await;
        result
    }

    async fn supervise_inner(
        &self,
        enabled: bool,
        port: u16,
        abort: &CancellationToken,
    ) -> Result<SupervisionEnd, DaemonError> {
        self.daemon.setup()?;
        match self.on_configuration_changed(enabled, port, abort).await {
            Ok(()) => {}
            Err(DaemonError::Timeout(timeout)) => {
                error!("Timed out after {:?} waiting for daemon", timeout)
            }
            Err(DaemonError::Aborted) => return Ok(SupervisionEnd::Aborted),
            Err(e) => return Err(e),
        }
        Ok(self.run_crash_loop(abort).await)
    }

    /// Reconcile with the desired configuration
    ///
    /// Starts the daemon on an enable transition, a port change while
    /// enabled, or when an earlier start left it stopped, and waits until it
    /// answers or the ready timeout elapses.
    pub async fn on_configuration_changed(
        &self,
        enabled: bool,
        port: u16,
        abort: &CancellationToken,
    ) -> Result<(), DaemonError> {
        let generation = {
            let mut state = self.state.lock().await;
            let was_enabled = state.enabled;
            let port_changed = state.port != port;
            state.enabled = enabled;
            state.port = port;

            // A stopped daemon while enabled means an earlier start failed
            let stalled = was_enabled && state.phase == DaemonPhase::Stopped;
            if enabled && (!was_enabled || port_changed || stalled) {
                if state.phase != DaemonPhase::Stopped {
                    info!("Restarting daemon on port {}", port);
                    self.daemon.stop().await;
                    state.phase = DaemonPhase::Stopped;
                } else {
                    info!("Starting daemon on port {}", port);
                }
                state.crashes = None;
                state.generation += 1;
                self.daemon.start(port).await?;
                state.phase = DaemonPhase::Starting;
                state.generation
            } else {
                if !enabled && was_enabled {
                    info!("Stopping daemon");
                    self.daemon.stop().await;
                    state.phase = DaemonPhase::Stopped;
                    state.crashes = None;
                    state.generation += 1;
                }
                return Ok(());
            }
        };

        self.wait_until_ready(generation, abort).await
    }

    /// Poll the probe until the daemon answers, with the lock released
    async fn wait_until_ready(
        &self,
        generation: u64,
        abort: &CancellationToken,
    ) -> Result<(), DaemonError> {
        let started = Instant::now();
        loop {
            if abort.is_cancelled() {
                return Err(DaemonError::Aborted);
            }
            if self.state.lock().await.generation != generation {
                debug!("Readiness wait superseded");
                return Ok(());
            }

            if self.probe.is_ready().await {
                let mut state = self.state.lock().await;
                if state.generation == generation {
                    state.phase = DaemonPhase::Running;
                    info!("Daemon ready after {:?}", started.elapsed());
                    if !state.announced {
                        state.announced = true;
                        self.host.notify("TorrServer daemon started");
                    }
                }
                return Ok(());
            }

            if started.elapsed() >= self.options.ready_timeout {
                return Err(DaemonError::Timeout(self.options.ready_timeout));
            }

            tokio::select! {
                _ = abort.cancelled() => return Err(DaemonError::Aborted),
                _ = tokio::time::sleep(self.options.probe_interval) => {}
            }
        }
    }

    /// Detect crashes and restart the daemon until aborted or out of retries
    pub async fn run_crash_loop(&self, abort: &CancellationToken) -> SupervisionEnd {
        loop {
            tokio::select! {
                _ = abort.cancelled() => return SupervisionEnd::Aborted,
                _ = tokio::time::sleep(self.options.poll_interval) => {}
            }

            // Fast path, no lock
            if !self.daemon.poll().is_dead() {
                continue;
            }

            let generation = {
                let mut state = self.state.lock().await;
                if !state.enabled
                    || state.phase == DaemonPhase::Stopped
                    || !self.daemon.poll().is_dead()
                {
                    continue;
                }

                warn!("Daemon died unexpectedly");
                self.host.notify("TorrServer daemon crashed");
                self.archive_log();

                let count = state.register_crash(Instant::now(), self.options.crash_window);
                if count > self.options.max_crashes {
                    error!(
                        "Daemon crashed {} times within {:?}, giving up",
                        count, self.options.crash_window
                    );
                    state.phase = DaemonPhase::Stopped;
                    return SupervisionEnd::GaveUp;
                }

                if count > 1 {
                    info!("Repeated crash ({}), removing daemon settings", count);
                    self.remove_settings();
                }

                state.generation += 1;
                state.phase = DaemonPhase::Starting;
                if let Err(e) = self.daemon.start(state.port).await {
                    error!("Failed to restart daemon: {}", e);
                    continue;
                }
                state.generation
            };

            match self.wait_until_ready(generation, abort).await {
                Ok(()) => {}
                Err(DaemonError::Aborted) => return SupervisionEnd::Aborted,
                Err(e) => error!("Daemon recovery failed: {}", e),
            }
        }
    }

    /// Stop the process and forget the crash record
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        self.daemon.stop().await;
        state.phase = DaemonPhase::Stopped;
        state.crashes = None;
        state.generation += 1;
    }

    /// Keep a timestamped copy of the daemon log; best-effort
    fn archive_log(&self) {
        let Some(name) = self.log_path.file_name() else {
            return;
        };
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let target = self
            .log_path
            .with_file_name(format!("{}.{}", stamp, name.to_string_lossy()));
        match std::fs::copy(&self.log_path, &target) {
            Ok(_) => info!("Saved daemon log to '{}'", target.display()),
            Err(e) => warn!("Failed to save daemon log: {}", e),
        }
    }

    fn remove_settings(&self) {
        match std::fs::remove_file(&self.settings_path) {
            Ok(()) => debug!("Removed '{}'", self.settings_path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove daemon settings: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::DaemonStatus;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Counts starts issued while a process is already running
    #[derive(Default)]
    struct CountingDaemon {
        running: AtomicBool,
        double_starts: AtomicUsize,
    }

    #[async_trait]
    impl Daemon for CountingDaemon {
        fn setup(&self) -> Result<(), DaemonError> {
            Ok(())
        }

        async fn start(&self, _port: u16) -> Result<(), DaemonError> {
            if self.running.swap(true, Ordering::SeqCst) {
                self.double_starts.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }

        async fn stop(&self) {
            self.running.store(false, Ordering::SeqCst);
        }

        fn poll(&self) -> DaemonStatus {
            if self.running.load(Ordering::SeqCst) {
                DaemonStatus::Running
            } else {
                DaemonStatus::NotStarted
            }
        }
    }

    struct AlwaysReady;

    #[async_trait]
    impl ReadinessProbe for AlwaysReady {
        async fn is_ready(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_crash_record_increments_within_window() {
        let window = Duration::from_secs(20);
        let t0 = Instant::now();
        let mut record = CrashRecord::new(t0);
        assert_eq!(record.register(t0 + Duration::from_secs(5), window), 2);
        assert_eq!(record.register(t0 + Duration::from_secs(10), window), 3);
        assert_eq!(record.count, 3);
    }

    #[test]
    fn test_crash_record_resets_after_window() {
        let window = Duration::from_secs(20);
        let t0 = Instant::now();
        let mut record = CrashRecord::new(t0);
        record.register(t0 + Duration::from_secs(5), window);
        record.register(t0 + Duration::from_secs(10), window);
        // Fourth crash 30s after the third
        assert_eq!(record.register(t0 + Duration::from_secs(40), window), 1);
        assert_eq!(record.last_crash, t0 + Duration::from_secs(40));
    }

    #[test]
    fn test_crash_record_gap_equal_to_window_still_counts() {
        let window = Duration::from_secs(20);
        let t0 = Instant::now();
        let mut record = CrashRecord::new(t0);
        assert_eq!(record.register(t0 + window, window), 2);
    }

    #[test]
    fn test_options_from_settings() {
        let settings = Settings {
            max_crashes: 3,
            max_consecutive_crash_time: 20,
            daemon_timeout: 15,
            ..Settings::default()
        };
        let options = SupervisorOptions::from_settings(&settings);
        assert_eq!(options.max_crashes, 3);
        assert_eq!(options.crash_window, Duration::from_secs(20));
        assert_eq!(options.ready_timeout, Duration::from_secs(15));
        assert_eq!(options.poll_interval, Duration::from_secs(1));
    }

    proptest! {
        #[test]
        fn test_no_double_start(changes in prop::collection::vec((any::<bool>(), 8090u16..8093), 1..30)) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();
            let supervisor = DaemonSupervisor::new(
                CountingDaemon::default(),
                Arc::new(AlwaysReady),
                Arc::new(crate::host::NullHost),
                SupervisorOptions::default(),
                "settings.json",
                "torrserver.log",
            );
            let abort = CancellationToken::new();

            rt.block_on(async {
                for (enabled, port) in &changes {
                    supervisor
                        .on_configuration_changed(*enabled, *port, &abort)
                        .await
                        .unwrap();
                }
            });

            prop_assert_eq!(supervisor.daemon().double_starts.load(Ordering::SeqCst), 0);
            let (enabled, _) = changes[changes.len() - 1];
            prop_assert_eq!(supervisor.daemon().running.load(Ordering::SeqCst), enabled);
        }
    }
}
