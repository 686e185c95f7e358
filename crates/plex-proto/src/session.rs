//! `/status/sessions` polling and reduction to a single [`NowPlaying`].
//!
//! The server can report several sessions at once (one per connected
//! player). Only the first music track that is playing or paused, in the
//! order the server lists them, becomes "now playing"; everything else is
//! ignored.

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Deserializer};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{ArtistPriority, Credentials};
use crate::error::{PlexError, Result};
use crate::protocol::{
    ClientIdentity, NowPlaying, PlaybackState, PlayerLocation, UNKNOWN_ALBUM, UNKNOWN_ARTIST,
    UNKNOWN_TRACK,
};

pub const HEADER_TOKEN: &str = "X-Plex-Token";
pub const HEADER_CLIENT_IDENTIFIER: &str = "X-Plex-Client-Identifier";
pub const HEADER_DEVICE_NAME: &str = "X-Plex-Device-Name";

const SESSIONS_PATH: &str = "/status/sessions";

/// Anything that can produce the current now-playing record.
/// The poller only knows this trait.
#[async_trait]
pub trait SessionSource: Send + Sync {
    /// `Ok(None)` means nothing is playing, which is not an error.
    async fn fetch_now_playing(&self) -> Result<Option<NowPlaying>>;
}

// ── Wire format ───────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct SessionsResponse {
    #[serde(rename = "MediaContainer", default)]
    pub media_container: Option<MediaContainer>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MediaContainer {
    #[serde(rename = "Metadata", default)]
    pub metadata: Option<Vec<SessionEntry>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEntry {
    #[serde(default, deserialize_with = "lenient_string")]
    pub rating_key: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub grandparent_title: Option<String>,
    #[serde(default)]
    pub original_title: Option<String>,
    #[serde(default)]
    pub parent_title: Option<String>,
    #[serde(default)]
    pub thumb: Option<String>,
    #[serde(default)]
    pub parent_thumb: Option<String>,
    #[serde(default)]
    pub grandparent_thumb: Option<String>,
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default)]
    pub view_offset: Option<i64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub session_key: Option<String>,
    #[serde(rename = "Player", default)]
    pub player: Option<SessionPlayer>,
    #[serde(rename = "Session", default)]
    pub session: Option<SessionInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPlayer {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub machine_identifier: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub port: Option<String>,
    #[serde(default)]
    pub protocol: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionInfo {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: Option<String>,
}

/// Plex is inconsistent about quoting ids and ports; accept either.
fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

// ── Selection / normalization ─────────────────────────────────────────────────

impl SessionEntry {
    fn playback_state(&self) -> Option<PlaybackState> {
        if self.kind.as_deref() != Some("track") {
            return None;
        }
        self.player
            .as_ref()
            .and_then(|p| p.state.as_deref())
            .and_then(PlaybackState::from_player_state)
    }

    fn artist(&self, priority: ArtistPriority) -> Option<&str> {
        let original = self.original_title.as_deref();
        let grandparent = self.grandparent_title.as_deref();
        match priority {
            ArtistPriority::OriginalTitleFirst => original.or(grandparent),
            ArtistPriority::GrandparentTitleFirst => grandparent.or(original),
        }
    }

    fn art_path(&self) -> Option<&str> {
        self.thumb
            .as_deref()
            .or(self.parent_thumb.as_deref())
            .or(self.grandparent_thumb.as_deref())
    }

    fn into_now_playing(self, state: PlaybackState, priority: ArtistPriority) -> NowPlaying {
        let artist = self.artist(priority).unwrap_or(UNKNOWN_ARTIST).to_string();
        let album_art_path = self.art_path().map(str::to_string);
        let player = self.player.unwrap_or_default();
        NowPlaying {
            id: self.rating_key.unwrap_or_else(synthesize_id),
            title: self.title.unwrap_or_else(|| UNKNOWN_TRACK.to_string()),
            artist,
            album: self.parent_title.unwrap_or_else(|| UNKNOWN_ALBUM.to_string()),
            album_art_path,
            state,
            duration_ms: self.duration.unwrap_or(0).max(0) as u64,
            position_ms: self.view_offset.unwrap_or(0).max(0) as u64,
            session_key: self.session_key.or(self.session.and_then(|s| s.id)),
            machine_identifier: player.machine_identifier,
            player: PlayerLocation {
                address: player.address,
                port: player.port,
                protocol: player.protocol,
            },
        }
    }
}

/// Random id for tracks without a rating key, so change detection still works.
fn synthesize_id() -> String {
    format!("local-{:032x}", rand::random::<u128>())
}

/// Pick the first qualifying track and normalize it.
pub fn select_now_playing(response: SessionsResponse, priority: ArtistPriority) -> Option<NowPlaying> {
    let entries = response.media_container?.metadata?;
    entries.into_iter().find_map(|entry| {
        let state = entry.playback_state()?;
        Some(entry.into_now_playing(state, priority))
    })
}

/// Parse a raw response body.
pub fn parse_sessions(body: &[u8], priority: ArtistPriority) -> Result<Option<NowPlaying>> {
    let response: SessionsResponse = serde_json::from_slice(body)
        .map_err(|e| PlexError::MalformedResponse(e.to_string()))?;
    Ok(select_now_playing(response, priority))
}

// ── Client ────────────────────────────────────────────────────────────────────

pub struct SessionClient {
    client: Client,
    credentials: Credentials,
    identity: ClientIdentity,
    artist_priority: ArtistPriority,
}

impl SessionClient {
    pub fn new(
        credentials: Credentials,
        identity: ClientIdentity,
        artist_priority: ArtistPriority,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(PlexError::from_transport)?;
        Ok(Self {
            client,
            credentials,
            identity,
            artist_priority,
        })
    }

    fn sessions_url(&self) -> Result<reqwest::Url> {
        let raw = format!("{}{}", self.credentials.server_url(), SESSIONS_PATH);
        reqwest::Url::parse(&raw).map_err(|e| PlexError::InvalidServerUrl(format!("{}: {}", raw, e)))
    }
}

#[async_trait]
impl SessionSource for SessionClient {
    async fn fetch_now_playing(&self) -> Result<Option<NowPlaying>> {
        let url = self.sessions_url()?;
        debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .header(HEADER_TOKEN, self.credentials.token())
            .header(HEADER_CLIENT_IDENTIFIER, &self.identity.identifier)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                warn!("Error fetching Plex sessions: {}", e);
                PlexError::from_transport(e)
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            warn!("Plex server rejected token");
            return Err(PlexError::AuthFailed);
        }
        if !status.is_success() {
            warn!("Plex sessions returned {}", status);
            return Err(PlexError::from_status_code(status.as_u16()));
        }

        let body = response.bytes().await.map_err(PlexError::from_transport)?;
        parse_sessions(&body, self.artist_priority)
    }
}
