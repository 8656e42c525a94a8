//! Playback session
//!
//! Drives one playback request through the daemon:
//! metadata wait, file selection, preload/buffering and the player hand-off.
//!
//! ```text
//! Idle -> WaitingMetadata -> Buffering -> Playing
//!               |                |
//!               +-> Cancelled / TimedOut / Failed
//! ```
//!
//! Every entry point ends in a [`PlayOutcome`]; the caller never sees a raw
//! error, and the host's resolved-URL signal is retracted on any outcome
//! other than a completed hand-off.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::formats::is_video;
use super::player::{MediaPlayer, PlayerError};
use crate::api::{ApiError, StreamingApi};
use crate::config::{FilesOrder, Settings};
use crate::host::Host;
use crate::models::{format_size, FileStat, FileStatus, TorrentStatus};

/// Heading used for prompts raised by the session
pub const APP_NAME: &str = "JackTorr";

/// Errors that end a playback session
#[derive(Debug, Error)]
pub enum PlayError {
    #[error("No candidate files found for {0}")]
    NoCandidates(String),

    #[error("No metadata after timeout")]
    MetadataTimeout,

    #[error("Buffering timeout reached")]
    BufferingTimeout,

    #[error("Abort requested")]
    Aborted,

    /// User dismissed a dialog; the torrent is still registered
    #[error("{reason}")]
    Canceled {
        reason: String,
        info_hash: String,
        name: String,
    },

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Player(#[from] PlayerError),
}

/// How a playback request ended
#[derive(Debug)]
pub enum PlayOutcome {
    /// Player was launched and closed normally
    Played,
    /// User cancelled a dialog
    Cancelled { info_hash: String, name: String },
    /// Host shutdown interrupted the session
    Aborted,
    Failed(PlayError),
}

impl PlayOutcome {
    pub fn is_played(&self) -> bool {
        matches!(self, PlayOutcome::Played)
    }
}

impl From<Result<(), PlayError>> for PlayOutcome {
    fn from(result: Result<(), PlayError>) -> Self {
        match result {
            Ok(()) => PlayOutcome::Played,
            Err(PlayError::Canceled {
                info_hash, name, ..
            }) => PlayOutcome::Cancelled { info_hash, name },
            Err(PlayError::Aborted) => PlayOutcome::Aborted,
            Err(e) => PlayOutcome::Failed(e),
        }
    }
}

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    WaitingMetadata,
    Buffering,
    Playing,
    Cancelled,
    TimedOut,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Cancelled | SessionState::TimedOut | SessionState::Failed
        )
    }

    fn rank(&self) -> u8 {
        match self {
            SessionState::Idle => 0,
            SessionState::WaitingMetadata => 1,
            SessionState::Buffering => 2,
            SessionState::Playing => 3,
            _ => 4,
        }
    }
}

/// What to play
#[derive(Debug, Clone)]
pub enum PlayRequest {
    /// Pick a file from the torrent, optionally buffering first
    InfoHash { buffer: bool },
    /// Buffer a known file, then play it
    BufferAndPlay { file_id: u32, path: String },
    /// Play a known file right away
    File { file_id: u32, path: String },
}

/// Session tunables
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// `None` waits for metadata forever
    pub metadata_timeout: Option<Duration>,
    /// `None` buffers without a deadline
    pub buffering_timeout: Option<Duration>,
    pub min_candidate_bytes: u64,
    pub files_order: FilesOrder,
    /// Refresh a status notification while the player runs
    pub overlay: bool,
    /// Offer removal of the torrent after playback
    pub ask_to_delete: bool,
    pub metadata_poll: Duration,
    pub buffering_poll: Duration,
    pub overlay_interval: Duration,
    /// Delay before the deletion prompt
    pub prompt_delay: Duration,
    pub busy_poll: Duration,
    /// Upper bound on waiting for a busy host before prompting
    pub busy_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            metadata_timeout: Some(Duration::from_secs(60)),
            buffering_timeout: Some(Duration::from_secs(180)),
            min_candidate_bytes: 100 * 1024 * 1024,
            files_order: FilesOrder::None,
            overlay: false,
            ask_to_delete: true,
            metadata_poll: Duration::from_millis(500),
            buffering_poll: Duration::from_secs(1),
            overlay_interval: Duration::from_secs(1),
            prompt_delay: Duration::from_millis(500),
            busy_poll: Duration::from_millis(100),
            busy_timeout: Duration::from_secs(10),
        }
    }
}

impl SessionConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            metadata_timeout: settings.metadata_deadline(),
            buffering_timeout: settings.buffering_deadline(),
            min_candidate_bytes: settings.min_candidate_bytes(),
            files_order: settings.files_order,
            overlay: settings.overlay,
            ask_to_delete: settings.ask_to_delete,
            ..Self::default()
        }
    }
}

// =============================================================================
// Pure helpers
// =============================================================================

/// Video files at least `min_bytes` long, ordered per `order`
pub fn candidate_files(files: &[FileStat], min_bytes: u64, order: FilesOrder) -> Vec<FileStat> {
    let mut candidates: Vec<FileStat> = files
        .iter()
        .filter(|f| is_video(&f.path) && f.length >= min_bytes)
        .cloned()
        .collect();
    match order {
        FilesOrder::None => {}
        FilesOrder::Name => candidates.sort_by(|a, b| a.path.cmp(&b.path)),
        FilesOrder::Length => candidates.sort_by_key(|f| f.length),
    }
    candidates
}

/// Raw buffering percentage, capped at 100
pub fn buffer_percent(preloaded: u64, target: u64) -> f64 {
    if target == 0 {
        return 0.0;
    }
    (preloaded as f64 * 100.0 / target as f64).min(100.0)
}

/// Buffering finished: both counters reported and the target reached
pub fn buffer_complete(preloaded: u64, target: u64) -> bool {
    preloaded != 0 && target != 0 && preloaded >= target
}

/// Metadata progress: share of the deadline elapsed, or a sawtooth without one
fn metadata_percent(previous: u8, elapsed: Duration, timeout: Option<Duration>) -> u8 {
    match timeout {
        Some(timeout) => {
            let ratio = elapsed.as_secs_f64() / timeout.as_secs_f64().max(f64::EPSILON);
            (ratio * 100.0).min(100.0) as u8
        }
        None if previous >= 100 => 0,
        None => previous + 5,
    }
}

/// One buffering observation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferReading {
    /// Reported progress, never lower than an earlier reading
    pub percent: f64,
    /// Bytes per second since the previous sample
    pub speed: f64,
    pub complete: bool,
}

/// Tracks buffering samples for one file
#[derive(Debug, Default)]
pub struct BufferTracker {
    last_sample: Option<(u64, Instant)>,
    progress: f64,
}

impl BufferTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sample; `reported_speed` is used when no earlier sample exists
    pub fn observe(
        &mut self,
        preloaded: u64,
        target: u64,
        at: Instant,
        reported_speed: f64,
    ) -> BufferReading {
        let complete = buffer_complete(preloaded, target);
        let percent = if complete {
            100.0
        } else {
            buffer_percent(preloaded, target)
        };
        self.progress = self.progress.max(percent);

        let speed = match self.last_sample {
            Some((bytes, when)) => {
                let elapsed = at.saturating_duration_since(when).as_secs_f64();
                if elapsed > 0.0 {
                    preloaded.saturating_sub(bytes) as f64 / elapsed
                } else {
                    0.0
                }
            }
            None => reported_speed,
        };
        self.last_sample = Some((preloaded, at));

        BufferReading {
            percent: self.progress,
            speed,
            complete,
        }
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }
}

// =============================================================================
// Session
// =============================================================================

/// One playback request for one torrent
pub struct PlaybackSession {
    api: Arc<dyn StreamingApi>,
    host: Arc<dyn Host>,
    player: Arc<dyn MediaPlayer>,
    config: SessionConfig,
    abort: CancellationToken,
    info_hash: String,
    file_id: Option<u32>,
    state: SessionState,
    buffer: BufferTracker,
}

impl PlaybackSession {
    pub fn new(
        api: Arc<dyn StreamingApi>,
        host: Arc<dyn Host>,
        player: Arc<dyn MediaPlayer>,
        config: SessionConfig,
        abort: CancellationToken,
        info_hash: impl Into<String>,
    ) -> Self {
        Self {
            api,
            host,
            player,
            config,
            abort,
            info_hash: info_hash.into(),
            file_id: None,
            state: SessionState::Idle,
            buffer: BufferTracker::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn info_hash(&self) -> &str {
        &self.info_hash
    }

    /// Selected file, once known
    pub fn file_id(&self) -> Option<u32> {
        self.file_id
    }

    /// Highest buffering progress reported so far
    pub fn buffering_progress(&self) -> f64 {
        self.buffer.progress()
    }

    /// Run `request` to completion and settle its outcome with the host
    pub async fn run(&mut self, request: PlayRequest) -> PlayOutcome {
        let result = match self.player.ensure_available().await {
            Err(e) => Err(PlayError::Player(e)),
            Ok(()) => match request {
                PlayRequest::InfoHash { buffer } => self.play_info_hash(buffer).await,
                PlayRequest::BufferAndPlay { file_id, path } => {
                    self.buffer_and_play(file_id, &path).await
                }
                PlayRequest::File { file_id, path } => self.play(file_id, &path).await,
            },
        };
        if let Err(e) = &result {
            let failed = !matches!(e, PlayError::Canceled { .. } | PlayError::Aborted);
            if failed && !self.state.is_terminal() {
                self.transition(SessionState::Failed);
            }
        }
        let outcome = PlayOutcome::from(result);
        self.settle(&outcome).await;
        outcome
    }

    async fn settle(&self, outcome: &PlayOutcome) {
        if outcome.is_played() {
            return;
        }
        self.host.resolved(None);
        match outcome {
            PlayOutcome::Played => {}
            PlayOutcome::Cancelled { info_hash, name } => {
                debug!(info_hash = %info_hash, "Playback cancelled");
                self.handle_player_stop(info_hash, name).await;
            }
            PlayOutcome::Aborted => debug!("Playback aborted"),
            PlayOutcome::Failed(
                e @ (PlayError::NoCandidates(_)
                | PlayError::MetadataTimeout
                | PlayError::BufferingTimeout),
            ) => debug!("Playback stopped: {}", e),
            PlayOutcome::Failed(e) => {
                error!("Playback failed: {}", e);
                self.host.notify(&e.to_string());
            }
        }
    }

    /// Pick a file from the torrent and play it
    pub async fn play_info_hash(&mut self, buffer: bool) -> Result<(), PlayError> {
        let mut info = self.api.torrent_info(&self.info_hash).await?;
        if info.awaiting_metadata() {
            info = self.wait_for_metadata().await?;
        }
        let file = self.select_file(&info)?;
        self.file_id = Some(file.id);
        if buffer {
            self.buffer_and_play(file.id, &file.path).await
        } else {
            self.play(file.id, &file.path).await
        }
    }

    /// Preload `file_id`, wait for the buffer to fill, then play
    pub async fn buffer_and_play(&mut self, file_id: u32, path: &str) -> Result<(), PlayError> {
        self.file_id = Some(file_id);
        self.spawn_preload(file_id);

        let mut info = self.api.torrent_info(&self.info_hash).await?;
        if info.awaiting_metadata() {
            info = self.wait_for_metadata().await?;
        }
        self.wait_for_buffering(file_id, info.display_name()).await?;
        self.play(file_id, path).await
    }

    /// Hand the stream URL to the player and wait for it to close
    pub async fn play(&mut self, file_id: u32, path: &str) -> Result<(), PlayError> {
        self.file_id = Some(file_id);
        self.transition(SessionState::Playing);

        let url = self.api.stream_url(&self.info_hash, path, file_id);
        let name = path.rsplit(['/', '\\']).next().unwrap_or(path).to_string();
        info!(info_hash = %self.info_hash, file_id, "Playing {}", name);
        self.host.resolved(Some(&url));

        if self.config.overlay {
            tokio::select! {
                result = self.player.play_and_wait(&url, &name) => result?,
                _ = self.refresh_overlay(&name) => {}
            }
        } else {
            self.player.play_and_wait(&url, &name).await?;
        }

        self.handle_player_stop(&self.info_hash, &name).await;
        Ok(())
    }

    /// Poll until the daemon has the torrent's metadata
    ///
    /// Returns the status that carried the metadata.
    pub async fn wait_for_metadata(&mut self) -> Result<TorrentStatus, PlayError> {
        self.transition(SessionState::WaitingMetadata);
        let mut dialog = self.host.progress(APP_NAME);
        let started = Instant::now();
        let mut percent = 0u8;

        let result = loop {
            match self.api.torrent_info(&self.info_hash).await {
                Ok(status) if !status.awaiting_metadata() => break Ok(status),
                Ok(_) => {}
                Err(e) => warn!("Metadata poll failed: {}", e),
            }

            tokio::select! {
                _ = self.abort.cancelled() => break Err(PlayError::Aborted),
                _ = sleep(self.config.metadata_poll) => {}
            }

            let elapsed = started.elapsed();
            if let Some(timeout) = self.config.metadata_timeout {
                if elapsed > timeout {
                    self.host.notify("No metadata after timeout");
                    self.transition(SessionState::TimedOut);
                    break Err(PlayError::MetadataTimeout);
                }
            }

            percent = metadata_percent(percent, elapsed, self.config.metadata_timeout);
            dialog.update(percent, "Waiting for metadata");

            if dialog.is_canceled() {
                self.transition(SessionState::Cancelled);
                break Err(self.canceled("Waiting for metadata canceled", ""));
            }
        };

        dialog.close();
        result
    }

    /// Choose the file to play from a torrent with metadata
    pub fn select_file(&mut self, info: &TorrentStatus) -> Result<FileStat, PlayError> {
        let mut candidates = candidate_files(
            &info.file_stats,
            self.config.min_candidate_bytes,
            self.config.files_order,
        );
        match candidates.len() {
            0 => {
                self.host.notify("No candidate files found");
                self.transition(SessionState::Failed);
                Err(PlayError::NoCandidates(info.display_name().to_string()))
            }
            1 => Ok(candidates.remove(0)),
            _ => {
                let items: Vec<String> = candidates.iter().map(|f| f.path.clone()).collect();
                match self.host.select(info.display_name(), &items) {
                    Some(index) if index < candidates.len() => Ok(candidates.swap_remove(index)),
                    _ => {
                        self.transition(SessionState::Cancelled);
                        Err(self.canceled("File selection canceled", info.display_name()))
                    }
                }
            }
        }
    }

    fn spawn_preload(&self, file_id: u32) {
        let api = Arc::clone(&self.api);
        let hash = self.info_hash.clone();
        tokio::spawn(async move {
            if let Err(e) = api.preload(&hash, file_id).await {
                warn!(hash = %hash, file_id, "Preload request failed: {}", e);
            }
        });
    }

    async fn wait_for_buffering(&mut self, file_id: u32, name: &str) -> Result<(), PlayError> {
        self.transition(SessionState::Buffering);
        let mut dialog = self.host.progress(APP_NAME);
        let started = Instant::now();
        self.buffer = BufferTracker::new();

        let result = loop {
            match self.api.file_status(&self.info_hash, file_id).await {
                Ok(status) => {
                    let reading = self.buffer.observe(
                        status.preloaded_bytes,
                        status.preload_size,
                        Instant::now(),
                        status.download_speed,
                    );
                    dialog.update(
                        reading.percent as u8,
                        &buffering_message(&status, &reading, name),
                    );
                    if reading.complete {
                        debug!(file_id, "Buffering complete");
                        break Ok(());
                    }
                }
                Err(e) => warn!("Buffering poll failed: {}", e),
            }

            if dialog.is_canceled() {
                self.drop_quietly().await;
                self.transition(SessionState::Cancelled);
                break Err(self.canceled("Buffering canceled", name));
            }

            if let Some(timeout) = self.config.buffering_timeout {
                if started.elapsed() > timeout {
                    self.host.notify("Buffering timeout reached");
                    self.drop_quietly().await;
                    self.transition(SessionState::TimedOut);
                    break Err(PlayError::BufferingTimeout);
                }
            }

            tokio::select! {
                _ = self.abort.cancelled() => {
                    self.drop_quietly().await;
                    break Err(PlayError::Aborted);
                }
                _ = sleep(self.config.buffering_poll) => {}
            }
        };

        dialog.close();
        result
    }

    /// Status notifications while the player runs; never returns
    async fn refresh_overlay(&self, name: &str) {
        loop {
            match self.api.torrent_info(&self.info_hash).await {
                Ok(status) => {
                    let (state, line) = status.status_labels();
                    self.host.notify(&format!("{}\n{}\n{}", state, line, name));
                }
                Err(e) => debug!("Overlay refresh failed: {}", e),
            }
            sleep(self.config.overlay_interval).await;
        }
    }

    /// Offer to remove the torrent once playback is over
    pub async fn handle_player_stop(&self, info_hash: &str, name: &str) {
        if !self.config.ask_to_delete {
            return;
        }
        sleep(self.config.prompt_delay).await;

        let started = Instant::now();
        while self.host.is_busy() && started.elapsed() < self.config.busy_timeout {
            sleep(self.config.busy_poll).await;
        }

        let message = if name.is_empty() {
            "Remove torrent from the daemon?".to_string()
        } else {
            format!("{}\nRemove torrent from the daemon?", name)
        };
        if self.host.confirm(APP_NAME, &message) {
            match self.api.remove_torrent(info_hash, true).await {
                Ok(()) => info!(info_hash, "Torrent removed"),
                Err(e) => error!(info_hash, "Failed to remove torrent: {}", e),
            }
        }
    }

    async fn drop_quietly(&self) {
        if let Err(e) = self.api.drop_torrent(&self.info_hash).await {
            warn!(info_hash = %self.info_hash, "Failed to drop torrent: {}", e);
        }
    }

    fn canceled(&self, reason: &str, name: &str) -> PlayError {
        PlayError::Canceled {
            reason: reason.to_string(),
            info_hash: self.info_hash.clone(),
            name: name.to_string(),
        }
    }

    fn transition(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        if self.state.is_terminal() || (!next.is_terminal() && next.rank() < self.state.rank()) {
            warn!("Ignoring session transition {:?} -> {:?}", self.state, next);
            return;
        }
        debug!(info_hash = %self.info_hash, "Session {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

fn buffering_message(status: &FileStatus, reading: &BufferReading, name: &str) -> String {
    format!(
        "{} - {:.2}%\n{} of {} - {}/s\n{}",
        status.state,
        reading.percent,
        format_size(status.preloaded_bytes as f64),
        format_size(status.preload_size as f64),
        format_size(reading.speed),
        name
    )
}
