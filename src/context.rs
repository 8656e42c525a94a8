//! Application context
//!
//! Built once at startup and passed to command handlers and the service.
//! Holds the loaded settings, the data layout, the daemon client, the host
//! UI and the abort signal shared by every long-running operation.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::TorrServerClient;
use crate::config::{DataPaths, Settings};
use crate::host::Host;
use crate::stream::{LocalPlayer, MediaPlayer, PlaybackSession, PlayerType, SessionConfig};

pub struct AppContext {
    pub settings: Settings,
    /// Where `settings` came from; `None` means the default location
    pub settings_path: Option<PathBuf>,
    pub paths: DataPaths,
    pub client: TorrServerClient,
    pub host: Arc<dyn Host>,
    /// Host shutdown
    pub abort: CancellationToken,
}

impl AppContext {
    pub fn new(
        settings: Settings,
        settings_path: Option<PathBuf>,
        paths: DataPaths,
        host: Arc<dyn Host>,
        abort: CancellationToken,
    ) -> Self {
        let client = client_for(&settings);
        Self {
            settings,
            settings_path,
            paths,
            client,
            host,
            abort,
        }
    }

    /// Re-read settings from disk and rebuild the daemon client
    pub fn reload(&mut self) -> Result<()> {
        let settings = match &self.settings_path {
            Some(path) => Settings::load_from(path)?,
            None => Settings::load(),
        };
        debug!("Settings reloaded");
        self.client = client_for(&settings);
        self.settings = settings;
        Ok(())
    }

    /// Persist the current settings
    pub fn save_settings(&self) -> Result<()> {
        match &self.settings_path {
            Some(path) => self.settings.save_to(path),
            None => self.settings.save(),
        }
    }

    /// The configured local player
    pub fn player(&self) -> Arc<dyn MediaPlayer> {
        Arc::new(LocalPlayer::new(PlayerType::from(self.settings.player)))
    }

    /// A fresh playback session for `info_hash`
    pub fn session(&self, info_hash: &str) -> PlaybackSession {
        PlaybackSession::new(
            Arc::new(self.client.clone()),
            Arc::clone(&self.host),
            self.player(),
            SessionConfig::from_settings(&self.settings),
            self.abort.clone(),
            info_hash,
        )
    }
}

/// Daemon client for the configured host, port, scheme and credentials
pub fn client_for(settings: &Settings) -> TorrServerClient {
    let client = TorrServerClient::new(
        &settings.service_host,
        settings.service_port,
        settings.ssl_connection,
    );
    match (&settings.service_login, &settings.service_password) {
        (Some(login), Some(password)) if !login.is_empty() => {
            client.with_credentials(login.clone(), password.clone())
        }
        _ => client,
    }
}
