//! Remote-control requests sent straight to the player that owns a session.

use reqwest::Client;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{PlexError, Result};
use crate::protocol::{ClientIdentity, PlayerCommand, PlayerLocation};
use crate::session::{HEADER_CLIENT_IDENTIFIER, HEADER_DEVICE_NAME};

pub const DEFAULT_REMOTE_PORT: u16 = 3005;

pub struct PlayerCommandDispatcher {
    client: Client,
    identity: ClientIdentity,
    remote_port: u16,
    /// Players sequence commands by this id; it only ever grows.
    command_id: AtomicU64,
}

impl PlayerCommandDispatcher {
    pub fn new(identity: ClientIdentity, remote_port: u16, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(PlexError::from_transport)?;
        Ok(Self {
            client,
            identity,
            remote_port,
            command_id: AtomicU64::new(0),
        })
    }

    /// Last command id handed out (0 before the first send).
    pub fn last_command_id(&self) -> u64 {
        self.command_id.load(Ordering::SeqCst)
    }

    /// Send `command` to the player at `target`. No retries; the next poll
    /// shows whether the player acted on it.
    pub async fn send(&self, command: PlayerCommand, target: &PlayerLocation) -> Result<()> {
        let address = match target.address.as_deref() {
            Some(a) if !a.is_empty() => a,
            _ => {
                warn!("No player address available for {}", command.path_segment());
                return Err(PlexError::NoPlayerTarget);
            }
        };

        let command_id = self.command_id.fetch_add(1, Ordering::SeqCst) + 1;
        let url = playback_url(address, self.remote_port, command);
        info!("Sending {} to {} (commandID={})", command.path_segment(), url, command_id);

        let response = self
            .client
            .get(&url)
            .query(&[("commandID", command_id)])
            .header(HEADER_CLIENT_IDENTIFIER, &self.identity.identifier)
            .header(HEADER_DEVICE_NAME, &self.identity.device_name)
            .send()
            .await
            .map_err(|e| {
                warn!("Error sending {} command: {}", command.path_segment(), e);
                PlexError::from_transport(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!("Player answered {} to {}", status, command.path_segment());
            return Err(PlexError::from_status_code(status.as_u16()));
        }

        info!("{} command sent successfully", command.path_segment());
        Ok(())
    }
}

/// IPv6 literals need brackets before the port.
fn playback_url(address: &str, port: u16, command: PlayerCommand) -> String {
    let host = if address.contains(':') && !address.starts_with('[') {
        format!("[{}]", address)
    } else {
        address.to_string()
    };
    format!("http://{}:{}/player/playback/{}", host, port, command.path_segment())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_playback_url_brackets_ipv6() {
        assert_eq!(
            playback_url("192.168.1.20", 3005, PlayerCommand::Pause),
            "http://192.168.1.20:3005/player/playback/pause"
        );
        assert_eq!(
            playback_url("fe80::1", 3005, PlayerCommand::SkipNext),
            "http://[fe80::1]:3005/player/playback/skipNext"
        );
        assert_eq!(
            playback_url("[::1]", 3005, PlayerCommand::Play),
            "http://[::1]:3005/player/playback/play"
        );
        assert!(reqwest::Url::parse(&playback_url("fe80::1", 3005, PlayerCommand::Play)).is_ok());
    }
}
