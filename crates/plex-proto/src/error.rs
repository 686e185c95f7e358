//! Typed outcomes for everything that talks to the Plex server or a player.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PlexError>;

/// Errors are `Clone` so the poller can publish them as part of the shared state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlexError {
    /// The server rejected the token (HTTP 401).
    #[error("Invalid Plex token")]
    AuthFailed,

    /// Any other non-2xx status.
    #[error("Server returned status {0}")]
    ServerError(u16),

    /// Timeout, DNS, refused connection, TLS failure.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Body was not JSON or did not have the expected shape.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// A command was requested but the session has no player address.
    #[error("No player address available")]
    NoPlayerTarget,

    #[error("Invalid server URL: {0}")]
    InvalidServerUrl(String),
}

impl PlexError {
    /// Map a non-success HTTP status.
    pub fn from_status_code(code: u16) -> Self {
        match code {
            401 => Self::AuthFailed,
            _ => Self::ServerError(code),
        }
    }

    /// Map a transport-level failure from reqwest.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::ConnectionFailed(format!("request timed out: {}", err));
        }
        if err.is_builder() {
            return Self::InvalidServerUrl(err.to_string());
        }
        Self::ConnectionFailed(err.to_string())
    }

    pub fn is_auth_error(&self) -> bool {
        matches!(self, Self::AuthFailed)
    }
}
