//! Media kind detection by file extension

use serde::Serialize;
use std::fmt;
use std::path::Path;

const VIDEO: &[&str] = &[
    "3gp", "asf", "avi", "divx", "flv", "m2ts", "m4v", "mkv", "mov", "mp4", "mpeg", "mpg",
    "mts", "ogv", "rm", "rmvb", "ts", "vob", "webm", "wmv", "xvid",
];
const MUSIC: &[&str] = &[
    "aac", "aiff", "alac", "ape", "flac", "m4a", "mka", "mp3", "oga", "ogg", "opus", "wav",
    "wma", "wv",
];
const PICTURE: &[&str] = &["bmp", "gif", "jpeg", "jpg", "png", "tif", "tiff", "webp"];
const TEXT: &[&str] = &["nfo", "txt", "log", "md"];

/// What kind of media a torrent file holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Music,
    Picture,
    Text,
    Other,
}

impl MediaKind {
    /// Classify a path by its extension (case-insensitive)
    pub fn from_path(path: &str) -> Self {
        let ext = Path::new(path)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let ext = ext.as_str();
        if VIDEO.contains(&ext) {
            MediaKind::Video
        } else if MUSIC.contains(&ext) {
            MediaKind::Music
        } else if PICTURE.contains(&ext) {
            MediaKind::Picture
        } else if TEXT.contains(&ext) {
            MediaKind::Text
        } else {
            MediaKind::Other
        }
    }

    /// Can be handed to the player
    pub fn is_playable(&self) -> bool {
        matches!(self, MediaKind::Video | MediaKind::Music)
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MediaKind::Video => "video",
            MediaKind::Music => "music",
            MediaKind::Picture => "picture",
            MediaKind::Text => "text",
            MediaKind::Other => "other",
        };
        write!(f, "{}", label)
    }
}

/// Shorthand used by candidate selection
pub fn is_video(path: &str) -> bool {
    MediaKind::from_path(path) == MediaKind::Video
}
