//! Local Player - VLC/mpv playback support
//!
//! Opens daemon stream URLs in VLC or mpv and waits for the player to close.

use async_trait::async_trait;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::debug;

use crate::config::PlayerChoice;

/// Supported local players
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerType {
    /// VLC media player
    Vlc,
    /// mpv media player (default)
    #[default]
    Mpv,
}

impl PlayerType {
    /// Get the command name for this player
    pub fn command(&self) -> &'static str {
        match self {
            PlayerType::Vlc => {
                // On macOS, VLC is an app bundle - check for it
                #[cfg(target_os = "macos")]
                if std::path::Path::new("/Applications/VLC.app").exists() {
                    return "/Applications/VLC.app/Contents/MacOS/VLC";
                }
                "vlc"
            }
            PlayerType::Mpv => "mpv",
        }
    }

    /// Get a display name for this player
    pub fn display_name(&self) -> &'static str {
        match self {
            PlayerType::Vlc => "VLC",
            PlayerType::Mpv => "mpv",
        }
    }
}

impl From<PlayerChoice> for PlayerType {
    fn from(choice: PlayerChoice) -> Self {
        match choice {
            PlayerChoice::Vlc => PlayerType::Vlc,
            PlayerChoice::Mpv => PlayerType::Mpv,
        }
    }
}

impl std::fmt::Display for PlayerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Errors from local player operations
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("Player '{0}' not found. Install it first.")]
    NotFound(String),
    #[error("Failed to start player: {0}")]
    StartFailed(#[from] std::io::Error),
}

/// Something that plays a URL until the user closes it
#[async_trait]
pub trait MediaPlayer: Send + Sync {
    /// Fails with `NotFound` when the player cannot be launched at all
    async fn ensure_available(&self) -> Result<(), PlayerError> {
        Ok(())
    }

    async fn play_and_wait(&self, url: &str, title: &str) -> Result<(), PlayerError>;
}

/// Local player for streaming content
pub struct LocalPlayer {
    player_type: PlayerType,
}

impl LocalPlayer {
    /// Create a new local player with the specified type
    pub fn new(player_type: PlayerType) -> Self {
        Self { player_type }
    }

    /// Check if the player is available on the system
    pub async fn is_available(&self) -> bool {
        let cmd = self.player_type.command();

        // If it's a full path (macOS app bundle), check if it exists
        if cmd.starts_with('/') {
            return std::path::Path::new(cmd).exists();
        }

        Command::new("which")
            .arg(cmd)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Player arguments for a stream URL and window title
    pub fn args(&self, stream_url: &str, title: &str) -> Vec<String> {
        let mut args = vec![stream_url.to_string()];
        match self.player_type {
            PlayerType::Vlc => {
                args.push(format!("--meta-title={}", title));
                args.push("--no-video-title-show".to_string());
            }
            PlayerType::Mpv => {
                args.push(format!("--force-media-title={}", title));
                args.push("--force-window=immediate".to_string());
            }
        }
        args
    }

    /// Spawn the player for `stream_url`
    pub fn play(&self, stream_url: &str, title: &str) -> Result<Child, PlayerError> {
        debug!("Launching {} for {}", self.player_type, stream_url);
        Command::new(self.player_type.command())
            .args(self.args(stream_url, title))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    PlayerError::NotFound(self.player_type.command().to_string())
                } else {
                    PlayerError::StartFailed(e)
                }
            })
    }
}

#[async_trait]
impl MediaPlayer for LocalPlayer {
    async fn ensure_available(&self) -> Result<(), PlayerError> {
        if self.is_available().await {
            Ok(())
        } else {
            Err(PlayerError::NotFound(self.player_type.command().to_string()))
        }
    }

    async fn play_and_wait(&self, url: &str, title: &str) -> Result<(), PlayerError> {
        let mut child = self.play(url, title)?;
        child.wait().await?;
        Ok(())
    }
}
