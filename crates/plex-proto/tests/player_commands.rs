//! Player remote control and artwork fetching against mock endpoints.

use plex_proto::artwork::AlbumArtFetcher;
use plex_proto::command::PlayerCommandDispatcher;
use plex_proto::config::Credentials;
use plex_proto::error::PlexError;
use plex_proto::protocol::{ClientIdentity, PlayerCommand, PlayerLocation};
use std::time::Duration;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn identity() -> ClientIdentity {
    ClientIdentity {
        identifier: "plex-desktop-widget-test".into(),
        device_name: "Plex Desktop Widget".into(),
    }
}

fn dispatcher_for(server: &MockServer) -> PlayerCommandDispatcher {
    PlayerCommandDispatcher::new(identity(), server.address().port(), Duration::from_secs(5)).unwrap()
}

fn local_player() -> PlayerLocation {
    PlayerLocation {
        address: Some("127.0.0.1".into()),
        port: Some("32500".into()),
        protocol: Some("plex".into()),
    }
}

#[tokio::test]
async fn test_missing_address_makes_no_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dispatcher = dispatcher_for(&server);
    let result = dispatcher
        .send(PlayerCommand::Pause, &PlayerLocation::default())
        .await;
    assert_eq!(result, Err(PlexError::NoPlayerTarget));
    assert_eq!(dispatcher.last_command_id(), 0);
    // MockServer verifies `expect(0)` on drop.
}

#[tokio::test]
async fn test_sends_command_with_headers_and_id() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/player/playback/skipNext"))
        .and(query_param("commandID", "1"))
        .and(header("X-Plex-Client-Identifier", "plex-desktop-widget-test"))
        .and(header("X-Plex-Device-Name", "Plex Desktop Widget"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = dispatcher_for(&server);
    dispatcher
        .send(PlayerCommand::SkipNext, &local_player())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_command_ids_increase() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(3)
        .mount(&server)
        .await;

    let dispatcher = dispatcher_for(&server);
    for command in [PlayerCommand::Play, PlayerCommand::Pause, PlayerCommand::SkipPrevious] {
        dispatcher.send(command, &local_player()).await.unwrap();
    }
    assert_eq!(dispatcher.last_command_id(), 3);

    let requests: Vec<Request> = server.received_requests().await.unwrap();
    let ids: Vec<String> = requests
        .iter()
        .filter_map(|r| {
            r.url
                .query_pairs()
                .find(|(k, _)| k == "commandID")
                .map(|(_, v)| v.into_owned())
        })
        .collect();
    assert_eq!(ids, vec!["1", "2", "3"]);
    assert_eq!(requests[2].url.path(), "/player/playback/skipPrevious");
}

#[tokio::test]
async fn test_player_error_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let result = dispatcher_for(&server)
        .send(PlayerCommand::Play, &local_player())
        .await;
    assert_eq!(result, Err(PlexError::ServerError(500)));
}

#[tokio::test]
async fn test_artwork_token_travels_in_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/library/metadata/9/thumb/1"))
        .and(header("X-Plex-Token", "secret"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "image/jpeg")
                .set_body_bytes(vec![0xFF, 0xD8, 0xFF]),
        )
        .expect(1)
        .mount(&server)
        .await;

    let creds = Credentials::new(&server.uri(), "secret").unwrap();
    let fetcher = AlbumArtFetcher::new(creds, identity(), Duration::from_secs(10)).unwrap();
    let art = fetcher.fetch("/library/metadata/9/thumb/1").await.unwrap();
    assert_eq!(art.bytes, vec![0xFF, 0xD8, 0xFF]);
    assert_eq!(art.content_type.as_deref(), Some("image/jpeg"));

    let requests = server.received_requests().await.unwrap();
    assert!(requests[0].url.query().is_none());
}

#[tokio::test]
async fn test_artwork_rejects_absolute_urls() {
    let creds = Credentials::new("http://127.0.0.1:32400", "secret").unwrap();
    let fetcher = AlbumArtFetcher::new(creds, identity(), Duration::from_secs(10)).unwrap();
    let result = fetcher.fetch("http://evil.example/x.jpg").await;
    assert!(matches!(result, Err(PlexError::InvalidServerUrl(_))));
}
