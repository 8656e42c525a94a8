//! CLI - Command Line Interface for JackTorr
//!
//! Every action is scriptable; `--json` makes all output JSON-parseable.
//!
//! # Examples
//!
//! ```bash
//! # Run the daemon supervisor in the foreground
//! jacktorr service
//!
//! # Browse what the daemon knows about
//! jacktorr torrents
//! jacktorr files 0123456789abcdef0123456789abcdef01234567 --json
//!
//! # Stream
//! jacktorr play-magnet "magnet:?xt=urn:btih:..."
//! jacktorr play 0123456789abcdef0123456789abcdef01234567 --no-buffer
//! ```

use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::io::IsTerminal;
use std::path::PathBuf;

use crate::stream::MediaKind;

// =============================================================================
// Exit Codes
// =============================================================================

/// Exit codes for CLI operations (semantic for scripting)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Success
    Success = 0,
    /// General error
    Error = 1,
    /// Invalid arguments
    InvalidArgs = 2,
    /// Daemon unreachable or rejected the request
    NetworkError = 3,
    /// Daemon executable missing
    DaemonNotFound = 4,
    /// Torrent has no playable file
    NoCandidates = 5,
    /// Metadata/buffering timeout or player failure
    PlaybackFailed = 6,
    /// User cancelled or the process was interrupted
    Cancelled = 7,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> i32 {
        code as i32
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> std::process::ExitCode {
        std::process::ExitCode::from(code as u8)
    }
}

// =============================================================================
// Main CLI Structure
// =============================================================================

/// JackTorr - TorrServer supervisor and streaming front-end
#[derive(Parser, Debug)]
#[command(
    name = "jacktorr",
    version,
    about = "Supervise a TorrServer daemon and stream its torrents",
    long_about = "Keeps a local TorrServer daemon running, browses its torrents \
                  and streams files to mpv or VLC once enough data is buffered.",
    after_help = "EXAMPLES:\n\
                  jacktorr service                       Run the daemon supervisor\n\
                  jacktorr torrents                      List registered torrents\n\
                  jacktorr play-magnet \"magnet:?...\"     Buffer and play a magnet\n\
                  jacktorr status <hash> --json          Torrent status as JSON"
)]
pub struct Cli {
    /// Output format as JSON (default for non-TTY)
    #[arg(long, short = 'j', global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Data directory (daemon binary, logs, pid file)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Check if JSON output should be used
    pub fn should_json(&self) -> bool {
        self.json || !std::io::stdout().is_terminal()
    }
}

// =============================================================================
// Subcommands
// =============================================================================

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the background service (deploy and supervise the daemon)
    Service,

    /// Check the daemon answers and print its version
    Echo,

    /// List torrents registered with the daemon
    #[command(visible_alias = "ls")]
    Torrents,

    /// List the files of a torrent
    Files(HashArg),

    /// Show state, speeds and peers of a torrent
    Status(HashArg),

    /// Print a text file from a torrent
    Cat(FileArg),

    /// Register a magnet link, URL or .torrent file
    Add(AddCmd),

    /// Stop downloading a torrent but keep it registered
    Drop(HashArg),

    /// Unregister a torrent
    #[command(visible_alias = "rm")]
    Remove(RemoveCmd),

    /// Pick a file from a registered torrent and play it
    Play(PlayCmd),

    /// Register a magnet link and play it
    #[command(visible_alias = "pm")]
    PlayMagnet(PlaySourceCmd),

    /// Upload a local .torrent file and play it
    PlayPath(PlayPathCmd),

    /// Download a .torrent from a URL and play it
    PlayUrl(PlaySourceCmd),

    /// Buffer a specific file, then play it
    BufferAndPlay(FileArg),

    /// Inspect or push daemon settings
    Settings(SettingsCmd),
}

/// A torrent by info-hash
#[derive(Args, Debug)]
pub struct HashArg {
    /// Torrent info-hash (40 hex characters)
    #[arg(required = true)]
    pub hash: String,
}

/// Unregister a torrent
#[derive(Args, Debug)]
pub struct RemoveCmd {
    /// Torrent info-hash (40 hex characters)
    #[arg(required = true)]
    pub hash: String,

    /// Send save_to_db=false with the removal
    #[arg(long)]
    pub no_save_db: bool,
}

/// One file of a torrent
#[derive(Args, Debug)]
pub struct FileArg {
    /// Torrent info-hash
    #[arg(required = true)]
    pub hash: String,

    /// File id within the torrent
    #[arg(required = true)]
    pub file_id: u32,

    /// File path inside the torrent (looked up when omitted)
    pub path: Option<String>,
}

/// Register a torrent
#[derive(Args, Debug)]
pub struct AddCmd {
    /// Magnet link, http(s) URL of a .torrent, or local .torrent path
    #[arg(required = true)]
    pub source: String,

    /// Title shown in listings
    #[arg(long, short = 't')]
    pub title: Option<String>,
}

/// Play a registered torrent
#[derive(Args, Debug)]
pub struct PlayCmd {
    /// Torrent info-hash
    #[arg(required = true)]
    pub hash: String,

    /// Start playback without waiting for the buffer
    #[arg(long)]
    pub no_buffer: bool,
}

/// Play from a magnet link or URL
#[derive(Args, Debug)]
pub struct PlaySourceCmd {
    /// Magnet link or URL
    #[arg(required = true)]
    pub source: String,

    /// Title shown in listings
    #[arg(long, short = 't')]
    pub title: Option<String>,

    /// Start playback without waiting for the buffer
    #[arg(long)]
    pub no_buffer: bool,
}

/// Play a local .torrent file
#[derive(Args, Debug)]
pub struct PlayPathCmd {
    /// Path to a .torrent file
    #[arg(required = true)]
    pub path: PathBuf,

    /// Start playback without waiting for the buffer
    #[arg(long)]
    pub no_buffer: bool,
}

/// Daemon settings
#[derive(Args, Debug)]
pub struct SettingsCmd {
    #[command(subcommand)]
    pub action: SettingsAction,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsAction {
    /// Print the daemon's current settings
    Show,
    /// Push `[daemon_settings]` from the config file
    Push,
}

// =============================================================================
// Input Validation
// =============================================================================

/// Validate an info-hash (40 hex characters), returning it lowercased
pub fn validate_info_hash(hash: &str) -> Result<String, &'static str> {
    let hash = hash.trim();
    if hash.len() == 40 && hash.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(hash.to_ascii_lowercase())
    } else {
        Err("Invalid info-hash (expected 40 hex characters)")
    }
}

/// What `add` was given
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TorrentSource {
    Magnet(String),
    Url(String),
    Path(PathBuf),
}

impl TorrentSource {
    pub fn parse(source: &str) -> Self {
        let source = source.trim();
        if source.starts_with("magnet:") {
            TorrentSource::Magnet(source.to_string())
        } else if source.starts_with("http://") || source.starts_with("https://") {
            TorrentSource::Url(source.to_string())
        } else {
            TorrentSource::Path(PathBuf::from(source))
        }
    }
}

// =============================================================================
// JSON Output Types
// =============================================================================

/// Generic JSON output wrapper with status
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonOutput<T: Serialize> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "is_zero")]
    pub exit_code: i32,
}

fn is_zero(n: &i32) -> bool {
    *n == 0
}

impl<T: Serialize> JsonOutput<T> {
    /// Create success output with data
    pub fn success(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
            exit_code: 0,
        }
    }

    /// Create error output (no data)
    pub fn error_msg(msg: impl Into<String>, code: ExitCode) -> JsonOutput<()> {
        JsonOutput::<()> {
            data: None,
            error: Some(msg.into()),
            exit_code: code.into(),
        }
    }
}

/// Status OK response
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusOk {
    pub status: &'static str,
}

impl Default for StatusOk {
    fn default() -> Self {
        Self { status: "ok" }
    }
}

/// Response of `add` and the play-from-source commands
#[derive(Debug, Serialize)]
pub struct AddedResponse {
    pub hash: String,
}

/// One row of `files`
#[derive(Debug, Serialize)]
pub struct FileRow {
    pub id: u32,
    pub path: String,
    pub length: u64,
    pub kind: MediaKind,
    pub stream_url: String,
}

/// `status` response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub hash: String,
    pub name: String,
    pub state: String,
    pub stats: String,
    pub download_speed: f64,
    pub upload_speed: f64,
}

/// How a play command ended
#[derive(Debug, Serialize)]
pub struct PlayResponse {
    pub hash: String,
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// =============================================================================
// Output Helpers
// =============================================================================

/// Output handler for consistent formatting
#[derive(Debug, Clone, Copy)]
pub struct Output {
    pub json: bool,
    pub quiet: bool,
}

impl Output {
    pub fn new(cli: &Cli) -> Self {
        Self {
            json: cli.should_json(),
            quiet: cli.quiet,
        }
    }

    /// Print success data as JSON
    pub fn print<T: Serialize>(&self, data: T) -> anyhow::Result<()> {
        if self.json {
            let output = JsonOutput::success(data);
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            println!("{}", serde_json::to_string_pretty(&data)?);
        }
        Ok(())
    }

    /// Print `data` as JSON, or the human rendering in text mode
    pub fn emit<T: Serialize>(&self, data: T, text: impl FnOnce() -> String) -> anyhow::Result<()> {
        if self.json {
            self.print(data)
        } else {
            let text = text();
            if !text.is_empty() {
                println!("{}", text);
            }
            Ok(())
        }
    }

    /// Print error and return exit code
    pub fn error(&self, msg: impl Into<String>, code: ExitCode) -> ExitCode {
        let msg = msg.into();
        if self.json {
            let output = JsonOutput::<()>::error_msg(&msg, code);
            if let Ok(json) = serde_json::to_string_pretty(&output) {
                eprintln!("{}", json);
            }
        } else if !self.quiet {
            eprintln!("Error: {}", msg);
        }
        code
    }

    /// Print info message (suppressed in quiet mode)
    pub fn info(&self, msg: impl std::fmt::Display) {
        if !self.quiet && !self.json {
            eprintln!("{}", msg);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    const HASH: &str = "0123456789abcdef0123456789abcdef01234567";

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from(["jacktorr", "--json", "--quiet", "-vv", "torrents"]);
        assert!(cli.json);
        assert!(cli.quiet);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Command::Torrents));
    }

    #[test]
    fn test_play_no_buffer() {
        let cli = Cli::parse_from(["jacktorr", "play", HASH, "--no-buffer"]);
        if let Command::Play(cmd) = cli.command {
            assert_eq!(cmd.hash, HASH);
            assert!(cmd.no_buffer);
        } else {
            panic!("Expected Play command");
        }
    }

    #[test]
    fn test_buffer_and_play_args() {
        let cli = Cli::parse_from(["jacktorr", "buffer-and-play", HASH, "2", "dir/movie.mkv"]);
        if let Command::BufferAndPlay(cmd) = cli.command {
            assert_eq!(cmd.file_id, 2);
            assert_eq!(cmd.path.as_deref(), Some("dir/movie.mkv"));
        } else {
            panic!("Expected BufferAndPlay command");
        }
    }

    #[test]
    fn test_settings_subcommand() {
        let cli = Cli::parse_from(["jacktorr", "settings", "push"]);
        if let Command::Settings(cmd) = cli.command {
            assert_eq!(cmd.action, SettingsAction::Push);
        } else {
            panic!("Expected Settings command");
        }
    }

    #[test]
    fn test_validate_info_hash() {
        assert_eq!(validate_info_hash(HASH).unwrap(), HASH);
        assert_eq!(
            validate_info_hash(&HASH.to_uppercase()).unwrap(),
            HASH,
            "hash is lowercased"
        );
        assert!(validate_info_hash("abc").is_err());
        assert!(validate_info_hash(&"g".repeat(40)).is_err());
    }

    #[test]
    fn test_torrent_source_parse() {
        assert!(matches!(
            TorrentSource::parse("magnet:?xt=urn:btih:abc"),
            TorrentSource::Magnet(_)
        ));
        assert!(matches!(
            TorrentSource::parse("https://example.com/a.torrent"),
            TorrentSource::Url(_)
        ));
        assert_eq!(
            TorrentSource::parse("/tmp/a.torrent"),
            TorrentSource::Path(PathBuf::from("/tmp/a.torrent"))
        );
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(i32::from(ExitCode::Success), 0);
        assert_eq!(i32::from(ExitCode::Error), 1);
        assert_eq!(i32::from(ExitCode::InvalidArgs), 2);
        assert_eq!(i32::from(ExitCode::NetworkError), 3);
        assert_eq!(i32::from(ExitCode::DaemonNotFound), 4);
        assert_eq!(i32::from(ExitCode::NoCandidates), 5);
        assert_eq!(i32::from(ExitCode::PlaybackFailed), 6);
        assert_eq!(i32::from(ExitCode::Cancelled), 7);
    }
}
