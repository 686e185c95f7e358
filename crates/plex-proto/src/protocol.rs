use serde::{Deserialize, Serialize};

pub const UNKNOWN_TRACK: &str = "Unknown Track";
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
pub const UNKNOWN_ALBUM: &str = "Unknown Album";

/// Player state of a session that counts as "now playing".
/// Buffering/stopped sessions never produce one of these.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Playing,
    Paused,
}

impl PlaybackState {
    pub fn from_player_state(state: &str) -> Option<Self> {
        match state {
            "playing" => Some(Self::Playing),
            "paused" => Some(Self::Paused),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Playing => "playing",
            Self::Paused => "paused",
        }
    }
}

/// Network location of the player running a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerLocation {
    pub address: Option<String>,
    pub port: Option<String>,
    pub protocol: Option<String>,
}

impl PlayerLocation {
    pub fn can_control(&self) -> bool {
        self.address.as_deref().map(|a| !a.is_empty()).unwrap_or(false)
    }
}

/// Normalized "now playing" record, rebuilt on every poll.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NowPlaying {
    /// Rating key, or a synthesized id when the server omitted it.
    pub id: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    /// Server-relative thumbnail path, e.g. `/library/metadata/12/thumb/1699`.
    pub album_art_path: Option<String>,
    pub state: PlaybackState,
    pub duration_ms: u64,
    pub position_ms: u64,
    pub player: PlayerLocation,
    pub session_key: Option<String>,
    pub machine_identifier: Option<String>,
}

impl NowPlaying {
    /// Playback progress in `[0, 1]`. Position can overshoot duration for a
    /// poll or two when a track ends.
    pub fn progress(&self) -> f64 {
        if self.duration_ms == 0 {
            return 0.0;
        }
        (self.position_ms as f64 / self.duration_ms as f64).clamp(0.0, 1.0)
    }

    /// "1:05 / 3:30"
    pub fn time_display(&self) -> String {
        format!(
            "{} / {}",
            format_timestamp(self.position_ms),
            format_timestamp(self.duration_ms)
        )
    }
}

/// Absolute artwork URL for a server-relative thumb path. Carries no token:
/// art is fetched with the token in a header.
pub fn resolve_art_url(server_url: &str, path: &str) -> String {
    format!("{}{}", server_url.trim_end_matches('/'), path)
}

/// Format milliseconds as `m:ss`.
pub fn format_timestamp(ms: u64) -> String {
    let seconds = ms / 1000;
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

/// Remote-control commands understood by the player's
/// `/player/playback/{command}` endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PlayerCommand {
    Play,
    Pause,
    SkipNext,
    SkipPrevious,
}

impl PlayerCommand {
    pub fn path_segment(&self) -> &'static str {
        match self {
            Self::Play => "play",
            Self::Pause => "pause",
            Self::SkipNext => "skipNext",
            Self::SkipPrevious => "skipPrevious",
        }
    }

    /// Play when paused, pause otherwise.
    pub fn toggle_for(state: PlaybackState) -> Self {
        match state {
            PlaybackState::Paused => Self::Play,
            PlaybackState::Playing => Self::Pause,
        }
    }
}

impl std::str::FromStr for PlayerCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "play" => Ok(Self::Play),
            "pause" => Ok(Self::Pause),
            "next" | "skipNext" => Ok(Self::SkipNext),
            "prev" | "previous" | "skipPrevious" => Ok(Self::SkipPrevious),
            other => Err(format!("unknown player command: {}", other)),
        }
    }
}

/// Identifies this process to the server and to players.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub identifier: String,
    pub device_name: String,
}

impl ClientIdentity {
    /// Build an identifier that stays stable for the lifetime of the process.
    pub fn generate(device_name: impl Into<String>) -> Self {
        let now = chrono::Utc::now();
        Self {
            identifier: format!("plex-desktop-widget-{}", now.timestamp_millis()),
            device_name: device_name.into(),
        }
    }
}

/// What the presentation layer renders.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "data")]
pub enum ViewState {
    Loading,
    Error(String),
    Playing(NowPlaying),
    Empty,
}
