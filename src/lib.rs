//! JackTorr - TorrServer supervisor and streaming front-end
//!
//! Keeps a local TorrServer daemon alive and streams its torrents to a
//! local player once enough data is buffered.
//!
//! # Modules
//!
//! - `api` - TorrServer HTTP client
//! - `daemon` - executable deployment, process control, supervision
//! - `stream` - playback session, player hand-off, media kinds
//! - `host` - user interface seam (notifications, dialogs)
//! - `service` - background service wiring
//! - `cli` / `commands` - command line front-end

pub mod api;
pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod daemon;
pub mod host;
pub mod logging;
pub mod models;
pub mod service;
pub mod stream;

// Re-export commonly used types
pub use models::{FileStat, FileStatus, TorrentState, TorrentStatus};

pub use api::{ApiError, StreamingApi, TorrServerClient};
pub use config::{DataPaths, FilesOrder, Settings};
pub use context::AppContext;
pub use daemon::{DaemonError, DaemonSupervisor};
pub use host::{Host, ProgressDialog};
pub use stream::{PlayError, PlayOutcome, PlaybackSession};
