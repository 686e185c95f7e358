use std::sync::Arc;

use plex_proto::command::PlayerCommandDispatcher;
use plex_proto::config::Config;
use plex_proto::error::PlexError;
use plex_proto::poller::PollingController;
use plex_proto::protocol::{NowPlaying, PlayerCommand};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

/// Playback controls as the presentation layer sees them. Toggle is resolved
/// against the current track's state when it is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Play,
    Pause,
    TogglePlayPause,
    SkipNext,
    SkipPrevious,
}

impl ControlAction {
    pub fn resolve(self, now_playing: &NowPlaying) -> PlayerCommand {
        match self {
            Self::Play => PlayerCommand::Play,
            Self::Pause => PlayerCommand::Pause,
            Self::TogglePlayPause => PlayerCommand::toggle_for(now_playing.state),
            Self::SkipNext => PlayerCommand::SkipNext,
            Self::SkipPrevious => PlayerCommand::SkipPrevious,
        }
    }
}

impl From<PlayerCommand> for ControlAction {
    fn from(command: PlayerCommand) -> Self {
        match command {
            PlayerCommand::Play => Self::Play,
            PlayerCommand::Pause => Self::Pause,
            PlayerCommand::SkipNext => Self::SkipNext,
            PlayerCommand::SkipPrevious => Self::SkipPrevious,
        }
    }
}

impl std::str::FromStr for ControlAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "toggle" => Ok(Self::TogglePlayPause),
            other => other.parse::<PlayerCommand>().map(Self::from),
        }
    }
}

/// Everything that can wake the daemon loop.
#[derive(Debug)]
pub enum DaemonEvent {
    Control {
        action: ControlAction,
        reply: Option<oneshot::Sender<Result<(), PlexError>>>,
    },
    PlayerAppExited,
    Shutdown,
}

pub struct DaemonCore {
    config: Config,
    poller: Arc<PollingController>,
    dispatcher: Arc<PlayerCommandDispatcher>,
}

impl DaemonCore {
    pub fn new(
        config: Config,
        poller: Arc<PollingController>,
        dispatcher: Arc<PlayerCommandDispatcher>,
    ) -> Self {
        Self {
            config,
            poller,
            dispatcher,
        }
    }

    pub async fn run(self, mut event_rx: mpsc::Receiver<DaemonEvent>) -> anyhow::Result<()> {
        self.poller.start(self.config.polling.interval()).await;

        while let Some(event) = event_rx.recv().await {
            match event {
                DaemonEvent::Control { action, reply } => {
                    let result = self.handle_control(action).await;
                    if let Some(reply) = reply {
                        let _ = reply.send(result);
                    }
                }
                DaemonEvent::PlayerAppExited => {
                    info!("Player app is gone, shutting down");
                    break;
                }
                DaemonEvent::Shutdown => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }

        self.poller.stop().await;
        Ok(())
    }

    /// Send the command to the current track's player, then ask for an early
    /// refresh so the change shows up before the next regular tick.
    pub async fn handle_control(&self, action: ControlAction) -> Result<(), PlexError> {
        let Some(now_playing) = self.poller.state().now_playing().await else {
            warn!("Ignoring {:?}: nothing playing", action);
            return Err(PlexError::NoPlayerTarget);
        };

        let command = action.resolve(&now_playing);
        let result = self.dispatcher.send(command, &now_playing.player).await;

        if result.is_ok() || self.config.polling.refresh_on_command_failure {
            self.poller
                .refresh_after(self.config.polling.refresh_after_command())
                .await;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use plex_proto::config::{ArtistPriority, Credentials};
    use plex_proto::protocol::{ClientIdentity, PlaybackState, PlayerLocation};
    use plex_proto::session::{SessionClient, SessionSource};
    use plex_proto::state::StateManager;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Always reports a playing track on the local player; counts fetches.
    #[derive(Default)]
    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SessionSource for CountingSource {
        async fn fetch_now_playing(&self) -> plex_proto::error::Result<Option<NowPlaying>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut np = track(PlaybackState::Playing);
            np.player.address = Some("127.0.0.1".into());
            Ok(Some(np))
        }
    }

    async fn player_answering(status: u16) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/player/playback/pause"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;
        server
    }

    /// Runs one toggle against `player` and returns how many session fetches
    /// followed the initial one.
    async fn refreshes_after_toggle(
        player: &MockServer,
        refresh_on_failure: bool,
    ) -> (Result<(), PlexError>, usize) {
        let mut config = Config::default();
        config.polling.interval_ms = 60_000;
        config.polling.refresh_after_command_ms = 50;
        config.polling.refresh_on_command_failure = refresh_on_failure;

        let source = Arc::new(CountingSource::default());
        let poller = Arc::new(PollingController::new(
            source.clone(),
            Arc::new(StateManager::new(false)),
        ));
        let dispatcher = Arc::new(
            PlayerCommandDispatcher::new(
                ClientIdentity::generate("test"),
                player.address().port(),
                Duration::from_secs(2),
            )
            .unwrap(),
        );
        let core = DaemonCore::new(config.clone(), Arc::clone(&poller), dispatcher);

        poller.start(config.polling.interval()).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        let result = core.handle_control(ControlAction::TogglePlayPause).await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        poller.stop().await;

        (result, source.calls.load(Ordering::SeqCst) - 1)
    }

    #[tokio::test]
    async fn test_successful_command_triggers_one_refresh() {
        let player = player_answering(200).await;
        let (result, refreshes) = refreshes_after_toggle(&player, false).await;
        assert_eq!(result, Ok(()));
        assert_eq!(refreshes, 1);
    }

    #[tokio::test]
    async fn test_failed_command_skips_refresh() {
        let player = player_answering(500).await;
        let (result, refreshes) = refreshes_after_toggle(&player, false).await;
        assert_eq!(result, Err(PlexError::ServerError(500)));
        assert_eq!(refreshes, 0);
    }

    #[tokio::test]
    async fn test_failed_command_refreshes_when_enabled() {
        let player = player_answering(500).await;
        let (result, refreshes) = refreshes_after_toggle(&player, true).await;
        assert_eq!(result, Err(PlexError::ServerError(500)));
        assert_eq!(refreshes, 1);
    }

    fn track(state: PlaybackState) -> NowPlaying {
        NowPlaying {
            id: "1".into(),
            title: "t".into(),
            artist: "a".into(),
            album: "b".into(),
            album_art_path: None,
            state,
            duration_ms: 0,
            position_ms: 0,
            player: PlayerLocation::default(),
            session_key: None,
            machine_identifier: None,
        }
    }

    #[test]
    fn test_toggle_resolves_against_state() {
        assert_eq!(
            ControlAction::TogglePlayPause.resolve(&track(PlaybackState::Paused)),
            PlayerCommand::Play
        );
        assert_eq!(
            ControlAction::TogglePlayPause.resolve(&track(PlaybackState::Playing)),
            PlayerCommand::Pause
        );
        assert_eq!(
            ControlAction::SkipNext.resolve(&track(PlaybackState::Playing)),
            PlayerCommand::SkipNext
        );
    }

    #[test]
    fn test_parse_actions() {
        assert_eq!("toggle".parse::<ControlAction>(), Ok(ControlAction::TogglePlayPause));
        assert_eq!("next".parse::<ControlAction>(), Ok(ControlAction::SkipNext));
        assert_eq!("pause".parse::<ControlAction>(), Ok(ControlAction::Pause));
        assert!("stop".parse::<ControlAction>().is_err());
    }

    #[tokio::test]
    async fn test_control_without_track_fails_fast() {
        let creds = Credentials::new("http://127.0.0.1:9", "t").unwrap();
        let identity = ClientIdentity::generate("test");
        let session = SessionClient::new(
            creds,
            identity.clone(),
            ArtistPriority::default(),
            Duration::from_secs(1),
        )
        .unwrap();
        let poller = Arc::new(PollingController::new(
            Arc::new(session),
            Arc::new(StateManager::new(false)),
        ));
        let dispatcher =
            Arc::new(PlayerCommandDispatcher::new(identity, 3005, Duration::from_secs(1)).unwrap());
        let core = DaemonCore::new(Config::default(), poller, Arc::clone(&dispatcher));

        let result = core.handle_control(ControlAction::TogglePlayPause).await;
        assert_eq!(result, Err(PlexError::NoPlayerTarget));
        assert_eq!(dispatcher.last_command_id(), 0);
    }
}
