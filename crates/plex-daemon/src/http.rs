use crate::core::{ControlAction, DaemonEvent};
use async_stream::stream;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Local};
use plex_proto::artwork::AlbumArtFetcher;
use plex_proto::error::PlexError;
use plex_proto::protocol::ViewState;
use plex_proto::state::StateManager;
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, oneshot};
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

#[derive(Clone)]
struct HttpState {
    state_manager: Arc<StateManager>,
    artwork: Arc<AlbumArtFetcher>,
    event_tx: mpsc::Sender<DaemonEvent>,
}

#[derive(Serialize)]
struct ApiState {
    rev: u64,
    view: ViewState,
    /// Local artwork route, present when the track has a thumbnail.
    artwork_url: Option<&'static str>,
    progress: Option<f64>,
    time_display: Option<String>,
    can_control: bool,
    last_success: Option<DateTime<Local>>,
}

#[derive(Serialize)]
struct ApiError {
    error: String,
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state_manager: Arc<StateManager>,
    artwork: Arc<AlbumArtFetcher>,
    event_tx: mpsc::Sender<DaemonEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(HttpState {
            state_manager,
            artwork,
            event_tx,
        });

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

fn router(state: HttpState) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/artwork", get(get_artwork))
        .route("/api/events", get(events))
        .route("/api/play", get(play).post(play))
        .route("/api/pause", get(pause).post(pause))
        .route("/api/toggle", get(toggle).post(toggle))
        .route("/api/next", get(next).post(next))
        .route("/api/prev", get(prev).post(prev))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn get_state(State(state): State<HttpState>) -> Json<ApiState> {
    let (snapshot, view) = state.state_manager.snapshot().await;

    let (artwork_url, progress, time_display, can_control) = match &view {
        ViewState::Playing(np) => (
            np.album_art_path.as_ref().map(|_| "/api/artwork"),
            Some(np.progress()),
            Some(np.time_display()),
            np.player.can_control(),
        ),
        _ => (None, None, None, false),
    };

    Json(ApiState {
        rev: snapshot.rev,
        view,
        artwork_url,
        progress,
        time_display,
        can_control,
        last_success: snapshot.last_success,
    })
}

async fn get_artwork(State(state): State<HttpState>) -> Response {
    let Some(path) = state
        .state_manager
        .now_playing()
        .await
        .and_then(|np| np.album_art_path)
    else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match state.artwork.fetch(&path).await {
        Ok(art) => {
            let content_type = art
                .content_type
                .unwrap_or_else(|| "application/octet-stream".to_string());
            ([(header::CONTENT_TYPE, content_type)], art.bytes).into_response()
        }
        Err(e) => {
            warn!("Artwork fetch failed: {}", e);
            error_response(StatusCode::BAD_GATEWAY, &e)
        }
    }
}

/// Server-sent stream of state events, one `state` event per change.
async fn events(State(state): State<HttpState>) -> impl IntoResponse {
    let mut rx = state.state_manager.subscribe();

    let stream = stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Ok(json) = serde_json::to_string(&event) {
                        yield Ok::<_, axum::Error>(Event::default().event("state").data(json));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("Event stream lagged by {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn play(State(state): State<HttpState>) -> Response {
    control(&state, ControlAction::Play).await
}

async fn pause(State(state): State<HttpState>) -> Response {
    control(&state, ControlAction::Pause).await
}

async fn toggle(State(state): State<HttpState>) -> Response {
    control(&state, ControlAction::TogglePlayPause).await
}

async fn next(State(state): State<HttpState>) -> Response {
    control(&state, ControlAction::SkipNext).await
}

async fn prev(State(state): State<HttpState>) -> Response {
    control(&state, ControlAction::SkipPrevious).await
}

async fn control(state: &HttpState, action: ControlAction) -> Response {
    info!("HTTP API: {:?}", action);
    let (reply_tx, reply_rx) = oneshot::channel();
    let event = DaemonEvent::Control {
        action,
        reply: Some(reply_tx),
    };
    if state.event_tx.send(event).await.is_err() {
        error!("Failed to send {:?} command", action);
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    match reply_rx.await {
        Ok(Ok(())) => StatusCode::OK.into_response(),
        Ok(Err(e)) => error_response(status_for(&e), &e),
        Err(_) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

fn status_for(err: &PlexError) -> StatusCode {
    match err {
        PlexError::NoPlayerTarget => StatusCode::CONFLICT,
        _ => StatusCode::BAD_GATEWAY,
    }
}

fn error_response(status: StatusCode, err: &PlexError) -> Response {
    (
        status,
        Json(ApiError {
            error: err.to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&PlexError::NoPlayerTarget), StatusCode::CONFLICT);
        assert_eq!(status_for(&PlexError::ServerError(500)), StatusCode::BAD_GATEWAY);
        assert_eq!(
            status_for(&PlexError::ConnectionFailed("x".into())),
            StatusCode::BAD_GATEWAY
        );
    }
}
