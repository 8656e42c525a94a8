//! Data structures shared across JackTorr
//!
//! Contains the daemon-facing models organized by domain:
//! - **Torrent**: torrent state and status as reported by TorrServer
//! - **Files**: per-file entries and buffering status
//! - **Formatting**: human readable sizes and status labels

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Torrent Models
// =============================================================================

/// Lifecycle state of a torrent inside the daemon
///
/// TorrServer reports this as a small integer (`stat`), values outside the
/// known range are kept as `Unknown` so a newer daemon never breaks decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(from = "i64", into = "i64")]
pub enum TorrentState {
    /// Registered, nothing fetched yet
    #[default]
    Added,
    /// Waiting for metadata from peers
    GettingInfo,
    /// Preloading the playback buffer
    Preload,
    /// Downloading / serving
    Working,
    /// Stopped, still registered
    Closed,
    /// Only present in the daemon database
    InDb,
    /// State code this client does not know about
    Unknown(i64),
}

impl From<i64> for TorrentState {
    fn from(code: i64) -> Self {
        match code {
            0 => TorrentState::Added,
            1 => TorrentState::GettingInfo,
            2 => TorrentState::Preload,
            3 => TorrentState::Working,
            4 => TorrentState::Closed,
            5 => TorrentState::InDb,
            other => TorrentState::Unknown(other),
        }
    }
}

impl From<TorrentState> for i64 {
    fn from(state: TorrentState) -> i64 {
        match state {
            TorrentState::Added => 0,
            TorrentState::GettingInfo => 1,
            TorrentState::Preload => 2,
            TorrentState::Working => 3,
            TorrentState::Closed => 4,
            TorrentState::InDb => 5,
            TorrentState::Unknown(code) => code,
        }
    }
}

impl TorrentState {
    /// Torrent is actively transferring data (can be dropped)
    pub fn is_active(&self) -> bool {
        matches!(self, TorrentState::Preload | TorrentState::Working)
    }
}

impl fmt::Display for TorrentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TorrentState::Added => write!(f, "Torrent added"),
            TorrentState::GettingInfo => write!(f, "Torrent getting info"),
            TorrentState::Preload => write!(f, "Torrent preload"),
            TorrentState::Working => write!(f, "Torrent working"),
            TorrentState::Closed => write!(f, "Torrent closed"),
            TorrentState::InDb => write!(f, "Torrent in db"),
            TorrentState::Unknown(_) => write!(f, "Unknown state"),
        }
    }
}

/// Torrent status as returned by the daemon
///
/// The list endpoint fills only the summary fields; `file_stats` and the
/// preload counters are populated by the extended (`/stream?stat`) call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TorrentStatus {
    pub hash: String,
    pub title: String,
    pub name: String,
    #[serde(rename = "stat")]
    pub state: TorrentState,
    pub stat_string: String,
    pub torrent_size: u64,
    pub preloaded_bytes: u64,
    pub preload_size: u64,
    pub download_speed: f64,
    pub upload_speed: f64,
    pub connected_seeders: u32,
    pub active_peers: u32,
    pub total_peers: u32,
    pub file_stats: Vec<FileStat>,
}

impl TorrentStatus {
    /// Display name, preferring the user supplied title
    pub fn display_name(&self) -> &str {
        if !self.title.is_empty() {
            &self.title
        } else if !self.name.is_empty() {
            &self.name
        } else {
            &self.hash
        }
    }

    /// Metadata has not arrived yet
    pub fn awaiting_metadata(&self) -> bool {
        self.state == TorrentState::GettingInfo
    }

    /// Find a file entry by id
    pub fn file(&self, id: u32) -> Option<&FileStat> {
        self.file_stats.iter().find(|f| f.id == id)
    }

    /// Two status lines: state label, then speeds and peer counts
    pub fn status_labels(&self) -> (String, String) {
        (
            self.state.to_string(),
            format!(
                "D:{}/s U:{}/s S:{} P:{}/{}",
                format_size(self.download_speed),
                format_size(self.upload_speed),
                self.connected_seeders,
                self.active_peers,
                self.total_peers,
            ),
        )
    }
}

// =============================================================================
// File Models
// =============================================================================

/// One file inside a torrent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileStat {
    pub id: u32,
    pub path: String,
    pub length: u64,
}

impl FileStat {
    /// Final path component, used for stream URLs and listings
    pub fn file_name(&self) -> &str {
        self.path.rsplit(['/', '\\']).next().unwrap_or(&self.path)
    }
}

/// Buffering status of a single file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileStatus {
    pub id: u32,
    pub path: String,
    pub length: u64,
    pub state: TorrentState,
    pub preloaded_bytes: u64,
    pub preload_size: u64,
    pub download_speed: f64,
}

impl FileStatus {
    /// Combine a torrent-level status with one of its file entries
    ///
    /// TorrServer tracks preload counters per torrent while a single file is
    /// being streamed, so the counters are taken from the torrent.
    pub fn from_torrent(status: &TorrentStatus, id: u32) -> Self {
        let file = status.file(id).cloned().unwrap_or(FileStat {
            id,
            ..FileStat::default()
        });
        Self {
            id,
            path: file.path,
            length: file.length,
            state: status.state,
            preloaded_bytes: status.preloaded_bytes,
            preload_size: status.preload_size,
            download_speed: status.download_speed,
        }
    }
}

// =============================================================================
// Formatting
// =============================================================================

/// Format a byte count for display (e.g. "4.2 GiB")
pub fn format_size(bytes: f64) -> String {
    const UNITS: [&str; 6] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];
    let mut value = bytes;
    for unit in UNITS.iter().take(UNITS.len() - 1) {
        if value.abs() < 1024.0 {
            return format!("{:.1} {}", value, unit);
        }
        value /= 1024.0;
    }
    format!("{:.1} {}", value, UNITS[UNITS.len() - 1])
}
