use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use crate::config::Credentials;
use crate::error::{PlexError, Result};
use crate::protocol::{resolve_art_url, ClientIdentity};
use crate::session::{HEADER_CLIENT_IDENTIFIER, HEADER_TOKEN};

/// Album art bytes plus the content type the server reported.
#[derive(Debug, Clone)]
pub struct Artwork {
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Fetches thumbnails with the token in a header, never in the URL, so it
/// cannot end up in proxy logs or image caches.
pub struct AlbumArtFetcher {
    client: Client,
    credentials: Credentials,
    identity: ClientIdentity,
}

impl AlbumArtFetcher {
    pub fn new(credentials: Credentials, identity: ClientIdentity, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(PlexError::from_transport)?;
        Ok(Self {
            client,
            credentials,
            identity,
        })
    }

    /// `path` is a server-relative thumb path such as `/library/metadata/1/thumb/2`.
    pub async fn fetch(&self, path: &str) -> Result<Artwork> {
        if !path.starts_with('/') {
            return Err(PlexError::InvalidServerUrl(format!(
                "artwork path must be server-relative: {}",
                path
            )));
        }
        let url = resolve_art_url(self.credentials.server_url(), path);
        debug!("GET artwork {}", url);

        let response = self
            .client
            .get(&url)
            .header(HEADER_TOKEN, self.credentials.token())
            .header(HEADER_CLIENT_IDENTIFIER, &self.identity.identifier)
            .send()
            .await
            .map_err(PlexError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(PlexError::from_status_code(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await.map_err(PlexError::from_transport)?;
        Ok(Artwork {
            content_type,
            bytes: bytes.to_vec(),
        })
    }
}
