//! Configuration management for JackTorr
//!
//! Handles config file loading/saving and the per-install data layout.
//! Config is stored at ~/.config/jacktorr/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "JACKTORR_CONFIG";

/// Order in which candidate files are offered for selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilesOrder {
    /// Daemon order
    #[default]
    None,
    /// Alphabetical by path
    Name,
    /// Ascending by length
    Length,
}

/// Local player used for playback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerChoice {
    #[default]
    Mpv,
    Vlc,
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Run and supervise a local daemon
    pub service_enabled: bool,
    /// Daemon host (remote when the local service is disabled)
    pub service_host: String,
    /// Daemon port
    pub service_port: u16,
    /// Talk to the daemon over https
    pub ssl_connection: bool,
    /// Basic auth user
    pub service_login: Option<String>,
    /// Basic auth password
    pub service_password: Option<String>,
    /// Seconds to wait for metadata (0 = no deadline)
    pub metadata_timeout: i64,
    /// Seconds to wait for buffering (0 = no deadline)
    pub buffer_timeout: i64,
    /// Show torrent status while playing
    pub overlay: bool,
    /// Minimum size in MB for a file to be offered for playback
    pub min_candidate_size: u64,
    /// Offer to remove the torrent once playback stops
    pub ask_to_delete: bool,
    /// Candidate ordering
    pub files_order: FilesOrder,
    /// Player used for playback
    pub player: PlayerChoice,
    /// Directory holding the bundled daemon binary
    pub daemon_dir: Option<PathBuf>,
    /// Crashes tolerated within one crash window
    pub max_crashes: u32,
    /// Crash window in seconds
    pub max_consecutive_crash_time: u64,
    /// Seconds to wait for the daemon to answer after a start
    pub daemon_timeout: u64,
    /// Settings pushed to the daemon's own configuration
    pub daemon_settings: BTreeMap<String, toml::Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            service_enabled: true,
            service_host: "127.0.0.1".to_string(),
            service_port: 8090,
            ssl_connection: false,
            service_login: None,
            service_password: None,
            metadata_timeout: 60,
            buffer_timeout: 180,
            overlay: false,
            min_candidate_size: 100,
            ask_to_delete: true,
            files_order: FilesOrder::None,
            player: PlayerChoice::Mpv,
            daemon_dir: None,
            max_crashes: 5,
            max_consecutive_crash_time: 30,
            daemon_timeout: 60,
            daemon_settings: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Get config file path (~/.config/jacktorr/config.toml)
    pub fn path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir().map(|p| p.join("jacktorr").join("config.toml"))
    }

    /// Load config from the default path, or return defaults if not found
    pub fn load() -> Self {
        Self::path()
            .and_then(|p| Self::load_from(&p).ok())
            .unwrap_or_default()
    }

    /// Load config from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Save config to the default path
    pub fn save(&self) -> Result<()> {
        let path = Self::path().ok_or_else(|| anyhow::anyhow!("Could not determine config path"))?;
        self.save_to(&path)
    }

    /// Save config to an explicit path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let toml = toml::to_string_pretty(self)?;
        std::fs::write(path, toml)?;
        Ok(())
    }

    /// Metadata deadline, `None` when disabled
    pub fn metadata_deadline(&self) -> Option<Duration> {
        deadline(self.metadata_timeout)
    }

    /// Buffering deadline, `None` when disabled
    pub fn buffering_deadline(&self) -> Option<Duration> {
        deadline(self.buffer_timeout)
    }

    /// Minimum candidate size in bytes
    pub fn min_candidate_bytes(&self) -> u64 {
        self.min_candidate_size.saturating_mul(1024 * 1024)
    }

    /// Configured daemon settings as JSON
    pub fn daemon_settings_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.daemon_settings).unwrap_or_default()
    }
}

/// Zero or negative means "no deadline"
fn deadline(secs: i64) -> Option<Duration> {
    u64::try_from(secs)
        .ok()
        .filter(|s| *s > 0)
        .map(Duration::from_secs)
}

// =============================================================================
// Data Layout
// =============================================================================

/// Per-install data directory and the files the service keeps there
#[derive(Debug, Clone)]
pub struct DataPaths {
    root: PathBuf,
}

impl DataPaths {
    pub const SETTINGS: &'static str = "settings.json";
    pub const LOG: &'static str = "torrserver.log";
    pub const PID: &'static str = ".pid";
    pub const BIN: &'static str = "bin";
    pub const FIRST_RUN: &'static str = ".migrated";

    /// Default data dir (~/.local/share/jacktorr)
    pub fn default_root() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("jacktorr")
    }

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Daemon settings file
    pub fn settings(&self) -> PathBuf {
        self.root.join(Self::SETTINGS)
    }

    /// Daemon log file
    pub fn log(&self) -> PathBuf {
        self.root.join(Self::LOG)
    }

    /// Daemon pid file
    pub fn pid(&self) -> PathBuf {
        self.root.join(Self::PID)
    }

    /// Deployed executable tree
    pub fn bin(&self) -> PathBuf {
        self.root.join(Self::BIN)
    }

    /// Timestamped crash copy of the daemon log (YYYYMMDD_HHMMSS.torrserver.log)
    pub fn crash_log(&self, stamp: &str) -> PathBuf {
        self.root.join(format!("{}.{}", stamp, Self::LOG))
    }

    /// Marker written once the first-run notice was shown
    pub fn first_run_marker(&self) -> PathBuf {
        self.root.join(Self::FIRST_RUN)
    }

    /// Create the data directory
    pub fn ensure(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create data dir {}", self.root.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_default() {
        let settings = Settings::default();
        assert!(settings.service_enabled);
        assert_eq!(settings.service_port, 8090);
        assert_eq!(settings.min_candidate_bytes(), 100 * 1024 * 1024);
    }

    #[test]
    fn test_deadline_zero_or_negative_is_none() {
        assert_eq!(deadline(0), None);
        assert_eq!(deadline(-5), None);
        assert_eq!(deadline(30), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_settings_roundtrip_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut settings = Settings::default();
        settings.service_port = 9999;
        settings.files_order = FilesOrder::Length;
        settings
            .daemon_settings
            .insert("CacheSize".into(), toml::Value::Integer(64));
        settings.save_to(&path).unwrap();

        let loaded = Settings::load_from(&path).unwrap();
        assert_eq!(loaded.service_port, 9999);
        assert_eq!(loaded.files_order, FilesOrder::Length);
        assert_eq!(loaded.daemon_settings_json()["CacheSize"], 64);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let settings: Settings = toml::from_str("service_port = 7000\noverlay = true").unwrap();
        assert_eq!(settings.service_port, 7000);
        assert!(settings.overlay);
        assert_eq!(settings.metadata_timeout, 60);
    }

    #[test]
    fn test_data_paths_layout() {
        let paths = DataPaths::new("/data");
        assert_eq!(paths.settings(), PathBuf::from("/data/settings.json"));
        assert_eq!(paths.pid(), PathBuf::from("/data/.pid"));
        assert_eq!(
            paths.crash_log("20240101_120000"),
            PathBuf::from("/data/20240101_120000.torrserver.log")
        );
    }
}
