mod core;
mod http;
mod monitor;

use anyhow::Context;
use clap::{Parser, Subcommand};
use plex_proto::artwork::AlbumArtFetcher;
use plex_proto::command::PlayerCommandDispatcher;
use plex_proto::config::{Config, ConfigStore, Credentials, FileConfigStore};
use plex_proto::error::PlexError;
use plex_proto::poller::PollingController;
use plex_proto::protocol::{ClientIdentity, ViewState};
use plex_proto::session::{SessionClient, SessionSource};
use plex_proto::state::StateManager;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "plex-nowplaying", about = "Plex now-playing companion")]
struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Poll the server and serve state/controls over HTTP (default)
    Run,
    /// Fetch once and print the current state as JSON
    NowPlaying,
    /// Check a server URL and token, then store them
    Login {
        #[arg(long)]
        server: String,
        #[arg(long)]
        token: String,
    },
    /// Send play, pause, toggle, next or prev to the active player
    Send { action: core::ControlAction },
}

fn init_logging() -> anyhow::Result<PathBuf> {
    let data_dir = plex_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,plex_daemon=debug,plex_proto=debug")
            }),
        )
        .init();

    Ok(log_path)
}

struct App {
    config: Config,
    store: FileConfigStore,
    identity: ClientIdentity,
}

impl App {
    fn load(config_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let config_path = config_path.unwrap_or_else(Config::config_path);
        let config = Config::load_from(&config_path)?;
        info!("Config loaded from: {:?}", config_path);

        let store = FileConfigStore::new(
            config_path,
            Some(plex_proto::platform::legacy_config_path()),
        );
        let identity = ClientIdentity::generate(config.player.device_name.clone());
        Ok(Self {
            config,
            store,
            identity,
        })
    }

    fn credentials(&self) -> anyhow::Result<Credentials> {
        self.store.load().context(
            "No Plex server configured. Run `plex-nowplaying login --server URL --token TOKEN`.",
        )
    }

    fn session_client(&self, credentials: Credentials) -> Result<SessionClient, PlexError> {
        SessionClient::new(
            credentials,
            self.identity.clone(),
            self.config.display.artist_priority,
            self.config.polling.request_timeout(),
        )
    }

    fn dispatcher(&self) -> Result<PlayerCommandDispatcher, PlexError> {
        PlayerCommandDispatcher::new(
            self.identity.clone(),
            self.config.player.remote_port,
            self.config.polling.request_timeout(),
        )
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log_path = init_logging()?;
    info!("Log file: {:?}", log_path);

    let app = App::load(cli.config)?;

    match cli.command.unwrap_or(CliCommand::Run) {
        CliCommand::Run => run(app).await,
        CliCommand::NowPlaying => now_playing(app).await,
        CliCommand::Login { server, token } => login(app, &server, &token).await,
        CliCommand::Send { action } => send(app, action).await,
    }
}

async fn run(app: App) -> anyhow::Result<()> {
    let credentials = app.credentials()?;
    info!("Using Plex server {}", credentials.server_url());

    let session = Arc::new(app.session_client(credentials.clone())?);
    let dispatcher = Arc::new(app.dispatcher()?);
    let artwork = Arc::new(AlbumArtFetcher::new(
        credentials,
        app.identity.clone(),
        app.config.player.art_timeout(),
    )?);
    let state_manager = Arc::new(StateManager::new(app.config.display.keep_last_track_on_error));
    let poller = Arc::new(PollingController::new(session, Arc::clone(&state_manager)));

    // All external inputs funnel into DaemonCore
    let (event_tx, event_rx) = tokio::sync::mpsc::channel::<core::DaemonEvent>(64);

    if app.config.http.enabled {
        let _http_handle = http::start_server(
            app.config.http.bind_address.clone(),
            app.config.http.port,
            Arc::clone(&state_manager),
            artwork,
            event_tx.clone(),
        );
    }

    if app.config.monitor.enabled {
        let _monitor_handle = monitor::start(app.config.monitor.clone(), event_tx.clone());
    }

    let shutdown_tx = event_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(core::DaemonEvent::Shutdown).await;
        }
    });

    let daemon_core = core::DaemonCore::new(app.config.clone(), poller, dispatcher);
    info!("Daemon initialised, running event loop");
    daemon_core.run(event_rx).await
}

async fn fetch_view(client: &SessionClient) -> ViewState {
    match client.fetch_now_playing().await {
        Ok(Some(np)) => ViewState::Playing(np),
        Ok(None) => ViewState::Empty,
        Err(e) => ViewState::Error(e.to_string()),
    }
}

async fn now_playing(app: App) -> anyhow::Result<()> {
    let client = app.session_client(app.credentials()?)?;
    let view = fetch_view(&client).await;
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}

async fn login(app: App, server: &str, token: &str) -> anyhow::Result<()> {
    let credentials =
        Credentials::new(server, token).context("Server URL and token must not be empty")?;

    let client = app.session_client(credentials.clone())?;
    if let Err(e) = client.fetch_now_playing().await {
        warn!("Credential check failed: {}", e);
        if e.is_auth_error() {
            anyhow::bail!("{}. Please check your token, then try again.", e);
        }
        anyhow::bail!("{}. Please check your server URL, then try again.", e);
    }

    app.store.save(&credentials)?;
    println!("Connected to {}", credentials.server_url());
    Ok(())
}

async fn send(app: App, action: core::ControlAction) -> anyhow::Result<()> {
    let client = app.session_client(app.credentials()?)?;
    let now_playing = client
        .fetch_now_playing()
        .await?
        .context("Nothing is playing")?;

    let command = action.resolve(&now_playing);
    app.dispatcher()?.send(command, &now_playing.player).await?;
    println!("Sent {} to {}", command.path_segment(), now_playing.title);
    Ok(())
}
