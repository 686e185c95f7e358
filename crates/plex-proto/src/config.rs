use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::platform;
use crate::command::DEFAULT_REMOTE_PORT;

/// Lower bound for the player monitor's check period.
pub const MIN_CHECK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

/// Server URL and token. Both empty until onboarding (`login`) has run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Delay before the out-of-band refresh that follows a player command.
    #[serde(default = "default_refresh_after_command_ms")]
    pub refresh_after_command_ms: u64,
    /// Also refresh when the command itself failed.
    #[serde(default)]
    pub refresh_on_command_failure: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    /// Port players listen on for remote control.
    #[serde(default = "default_remote_port")]
    pub remote_port: u16,
    #[serde(default = "default_device_name")]
    pub device_name: String,
    #[serde(default = "default_art_timeout_ms")]
    pub art_timeout_ms: u64,
}

/// Which field wins when both carry an artist name.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArtistPriority {
    /// `originalTitle` (track artist), then `grandparentTitle` (album artist).
    #[default]
    OriginalTitleFirst,
    GrandparentTitleFirst,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisplayConfig {
    #[serde(default)]
    pub artist_priority: ArtistPriority,
    /// Keep showing the last track instead of the error after a failed poll.
    #[serde(default)]
    pub keep_last_track_on_error: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Case-insensitive substrings matched against process names.
    #[serde(default = "default_process_patterns")]
    pub process_patterns: Vec<String>,
    /// Matching processes that are not players (the server, this daemon).
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
    /// Exit when the player app goes away (and at startup if it is absent).
    #[serde(default = "default_quit_with_player")]
    pub quit_with_player: bool,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            refresh_after_command_ms: default_refresh_after_command_ms(),
            refresh_on_command_failure: false,
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            remote_port: default_remote_port(),
            device_name: default_device_name(),
            art_timeout_ms: default_art_timeout_ms(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            process_patterns: default_process_patterns(),
            exclude_patterns: default_exclude_patterns(),
            check_interval_ms: default_check_interval_ms(),
            quit_with_player: default_quit_with_player(),
        }
    }
}

fn default_interval_ms() -> u64 {
    2000
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_refresh_after_command_ms() -> u64 {
    500
}

fn default_remote_port() -> u16 {
    DEFAULT_REMOTE_PORT
}

fn default_device_name() -> String {
    "Plex Desktop Widget".to_string()
}

fn default_art_timeout_ms() -> u64 {
    10_000
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8990
}

fn default_process_patterns() -> Vec<String> {
    vec!["plex".to_string()]
}

fn default_exclude_patterns() -> Vec<String> {
    vec![
        "plex media server".to_string(),
        "plex media scanner".to_string(),
        "plex-nowplaying".to_string(),
    ]
}

fn default_check_interval_ms() -> u64 {
    3000
}

fn default_quit_with_player() -> bool {
    true
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn refresh_after_command(&self) -> Duration {
        Duration::from_millis(self.refresh_after_command_ms)
    }
}

impl MonitorConfig {
    /// Never below [`MIN_CHECK_INTERVAL`].
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms).max(MIN_CHECK_INTERVAL)
    }
}

impl PlayerConfig {
    pub fn art_timeout(&self) -> Duration {
        Duration::from_millis(self.art_timeout_ms)
    }
}

impl Config {
    /// Load from `path`, writing the defaults there on first run.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

// ── Credentials ───────────────────────────────────────────────────────────────

/// Server URL plus token, fixed for the lifetime of a polling session.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    server_url: String,
    token: String,
}

impl Credentials {
    /// Returns `None` when either value is blank.
    pub fn new(server_url: &str, token: &str) -> Option<Self> {
        let server_url = server_url.trim().trim_end_matches('/');
        let token = token.trim();
        if server_url.is_empty() || token.is_empty() {
            return None;
        }
        Some(Self {
            server_url: server_url.to_string(),
            token: token.to_string(),
        })
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("server_url", &self.server_url)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Where credentials live between runs.
pub trait ConfigStore: Send + Sync {
    fn load(&self) -> Option<Credentials>;
    fn save(&self, credentials: &Credentials) -> anyhow::Result<()>;
}

/// Credentials in the `[server]` table of `config.toml`, with a read-only
/// fallback to the old `~/.plex-widget/config.json`.
pub struct FileConfigStore {
    config_path: PathBuf,
    legacy_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyConfig {
    plex_server_url: String,
    plex_token: String,
}

impl FileConfigStore {
    pub fn new(config_path: PathBuf, legacy_path: Option<PathBuf>) -> Self {
        Self {
            config_path,
            legacy_path,
        }
    }

    fn load_toml(&self) -> Option<Credentials> {
        let content = std::fs::read_to_string(&self.config_path).ok()?;
        match toml::from_str::<Config>(&content) {
            Ok(config) => Credentials::new(&config.server.url, &config.server.token),
            Err(e) => {
                warn!("Ignoring unreadable config {:?}: {}", self.config_path, e);
                None
            }
        }
    }

    fn load_legacy(&self) -> Option<Credentials> {
        let path = self.legacy_path.as_ref()?;
        let content = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str::<LegacyConfig>(&content) {
            Ok(legacy) => {
                info!("Loaded credentials from legacy config {:?}", path);
                Credentials::new(&legacy.plex_server_url, &legacy.plex_token)
            }
            Err(e) => {
                warn!("Ignoring unreadable legacy config {:?}: {}", path, e);
                None
            }
        }
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Option<Credentials> {
        let found = self.load_toml().or_else(|| self.load_legacy());
        if found.is_none() {
            debug!("No credentials in {:?} or legacy config", self.config_path);
        }
        found
    }

    fn save(&self, credentials: &Credentials) -> anyhow::Result<()> {
        // Keep every other section as the user left it.
        let mut config = if self.config_path.exists() {
            let content = std::fs::read_to_string(&self.config_path)?;
            toml::from_str::<Config>(&content)?
        } else {
            Config::default()
        };
        config.server.url = credentials.server_url().to_string();
        config.server.token = credentials.token().to_string();
        config.save_to(&self.config_path)?;
        info!("Saved credentials to {:?}", self.config_path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.polling.interval_ms, 2000);
        assert_eq!(config.polling.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.polling.refresh_after_command_ms, 500);
        assert!(!config.polling.refresh_on_command_failure);
        assert_eq!(config.player.remote_port, 3005);
        assert_eq!(config.player.art_timeout(), Duration::from_secs(10));
        assert_eq!(config.display.artist_priority, ArtistPriority::OriginalTitleFirst);
        assert!(config.http.enabled);
        assert_eq!(config.http.bind_address, "127.0.0.1");
        assert!(!config.monitor.enabled);
    }

    #[test]
    fn test_check_interval_is_clamped() {
        let mut monitor = MonitorConfig::default();
        assert_eq!(monitor.check_interval(), Duration::from_secs(3));
        monitor.check_interval_ms = 0;
        assert_eq!(monitor.check_interval(), MIN_CHECK_INTERVAL);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            url = "http://localhost:32400"
            token = "abc"

            [display]
            artist_priority = "grandparent_title_first"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.url, "http://localhost:32400");
        assert_eq!(config.display.artist_priority, ArtistPriority::GrandparentTitleFirst);
        assert_eq!(config.polling.interval_ms, 2000);
        assert_eq!(config.player.device_name, "Plex Desktop Widget");
    }

    #[test]
    fn test_credentials_normalize() {
        let creds = Credentials::new(" http://localhost:32400/ ", "tok").unwrap();
        assert_eq!(creds.server_url(), "http://localhost:32400");
        assert!(Credentials::new("http://x", "  ").is_none());
        assert!(Credentials::new("", "tok").is_none());
    }

    #[test]
    fn test_credentials_debug_redacts_token() {
        let creds = Credentials::new("http://localhost:32400", "s3cret").unwrap();
        let dbg = format!("{:?}", creds);
        assert!(!dbg.contains("s3cret"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn test_store_save_then_load_keeps_other_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[polling]\ninterval_ms = 750\n").unwrap();

        let store = FileConfigStore::new(path.clone(), None);
        assert!(store.load().is_none());

        let creds = Credentials::new("http://nas:32400", "tok").unwrap();
        store.save(&creds).unwrap();

        assert_eq!(store.load(), Some(creds));
        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.polling.interval_ms, 750);
    }

    #[test]
    fn test_store_falls_back_to_legacy_json() {
        let dir = tempfile::tempdir().unwrap();
        let legacy = dir.path().join("config.json");
        std::fs::write(
            &legacy,
            r#"{"plexServerUrl": "http://old:32400/", "plexToken": "legacy"}"#,
        )
        .unwrap();

        let store = FileConfigStore::new(dir.path().join("missing.toml"), Some(legacy));
        let creds = store.load().unwrap();
        assert_eq!(creds.server_url(), "http://old:32400");
        assert_eq!(creds.token(), "legacy");
    }

    #[test]
    fn test_load_from_writes_defaults_on_first_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.http.port, 8990);
    }
}
