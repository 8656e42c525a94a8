//! Streaming infrastructure
//!
//! - Session: playback state machine over the daemon API
//! - Player: local mpv/VLC hand-off
//! - Formats: media kind detection

pub mod formats;
pub mod player;
pub mod session;

pub use formats::MediaKind;
pub use player::{LocalPlayer, MediaPlayer, PlayerError, PlayerType};
pub use session::{
    PlayError, PlayOutcome, PlayRequest, PlaybackSession, SessionConfig, SessionState,
};
