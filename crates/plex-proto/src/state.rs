use chrono::{DateTime, Local};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::error::{PlexError, Result};
use crate::protocol::{NowPlaying, ViewState};

/// Shared now-playing state. `rev` increases on every change so readers can
/// tell whether they missed an update.
#[derive(Debug, Clone, PartialEq)]
pub struct WidgetState {
    pub rev: u64,
    /// True until the first poll of the first run completes.
    pub loading: bool,
    pub now_playing: Option<NowPlaying>,
    pub error: Option<PlexError>,
    pub last_success: Option<DateTime<Local>>,
}

impl Default for WidgetState {
    fn default() -> Self {
        Self {
            rev: 0,
            loading: true,
            now_playing: None,
            error: None,
            last_success: None,
        }
    }
}

impl WidgetState {
    /// Precedence: loading, error, track, empty. With `keep_last_track` a
    /// stale track hides the error.
    pub fn view(&self, keep_last_track: bool) -> ViewState {
        if self.loading {
            return ViewState::Loading;
        }
        if let Some(err) = &self.error {
            match (&self.now_playing, keep_last_track) {
                (Some(np), true) => return ViewState::Playing(np.clone()),
                _ => return ViewState::Error(err.to_string()),
            }
        }
        match &self.now_playing {
            Some(np) => ViewState::Playing(np.clone()),
            None => ViewState::Empty,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum StateEvent {
    Updated { rev: u64 },
    /// A different track (by id) became current.
    TrackChanged(NowPlaying),
    /// The previously current track went away.
    PlaybackEnded,
}

struct Inner {
    state: WidgetState,
    /// Identifies the polling run allowed to publish. Results carrying an
    /// older epoch are dropped.
    epoch: u64,
}

pub struct StateManager {
    inner: Arc<RwLock<Inner>>,
    events: broadcast::Sender<StateEvent>,
    keep_last_track_on_error: bool,
}

impl StateManager {
    pub fn new(keep_last_track_on_error: bool) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(RwLock::new(Inner {
                state: WidgetState::default(),
                epoch: 0,
            })),
            events,
            keep_last_track_on_error,
        }
    }

    pub async fn get_state(&self) -> WidgetState {
        self.inner.read().await.state.clone()
    }

    pub async fn view(&self) -> ViewState {
        self.inner.read().await.state.view(self.keep_last_track_on_error)
    }

    /// State and its view, read under one lock.
    pub async fn snapshot(&self) -> (WidgetState, ViewState) {
        let inner = self.inner.read().await;
        (inner.state.clone(), inner.state.view(self.keep_last_track_on_error))
    }

    pub async fn now_playing(&self) -> Option<NowPlaying> {
        self.inner.read().await.state.now_playing.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.events.subscribe()
    }

    /// Retire the current epoch and return the new one. Once this returns,
    /// no result from an older epoch can be applied.
    pub async fn advance_epoch(&self) -> u64 {
        let mut inner = self.inner.write().await;
        inner.epoch += 1;
        inner.epoch
    }

    pub async fn current_epoch(&self) -> u64 {
        self.inner.read().await.epoch
    }

    /// Publish one poll outcome. Returns false when `epoch` is stale and the
    /// outcome was discarded.
    pub async fn apply_poll(&self, epoch: u64, outcome: Result<Option<NowPlaying>>) -> bool {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.write().await;
            if inner.epoch != epoch {
                debug!("Discarding poll result from epoch {} (current {})", epoch, inner.epoch);
                return false;
            }

            let state = &mut inner.state;
            state.loading = false;
            match outcome {
                Ok(Some(np)) => {
                    let changed = state.now_playing.as_ref().map(|cur| cur.id != np.id).unwrap_or(true);
                    if changed {
                        info!("Now playing: {} - {} ({})", np.artist, np.title, np.state.as_str());
                        events.push(StateEvent::TrackChanged(np.clone()));
                    }
                    if state.error.take().is_some() {
                        info!("Connection to Plex restored");
                    }
                    state.now_playing = Some(np);
                    state.last_success = Some(Local::now());
                }
                Ok(None) => {
                    if state.now_playing.take().is_some() {
                        info!("Nothing playing");
                        events.push(StateEvent::PlaybackEnded);
                    }
                    state.error = None;
                    state.last_success = Some(Local::now());
                }
                Err(err) => {
                    if state.error.as_ref() != Some(&err) {
                        warn!("Poll failed: {}", err);
                    }
                    state.error = Some(err);
                }
            }
            state.rev += 1;
            events.push(StateEvent::Updated { rev: state.rev });
        }

        for event in events {
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
        true
    }
}
