use assert_matches::assert_matches;
use poise::serenity_prelude::{GuildId, UserId};
use pretty_assertions::assert_eq;
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ensemble::commands::music::utils::lavalink::{
    AudioNode, LavalinkNode, LoadType, NodeError, PlayerUpdate,
};

const PASSWORD: &str = "youshallnotpass";

fn wire_track(n: u32) -> serde_json::Value {
    json!({
        "encoded": format!("enc-{n}"),
        "info": {
            "identifier": format!("id-{n}"),
            "isSeekable": true,
            "author": "Artist",
            "length": 200_000,
            "isStream": false,
            "position": 0,
            "title": format!("Track {n}"),
            "uri": format!("https://example.com/watch?v={n}"),
            "artworkUrl": null,
            "isrc": null,
            "sourceName": "youtube"
        },
        "pluginInfo": {},
        "userData": {}
    })
}

async fn node(server: &MockServer) -> LavalinkNode {
    let base = Url::parse(&server.uri()).unwrap();
    LavalinkNode::new(base, PASSWORD, UserId::new(1))
}

#[tokio::test]
async fn resolve_sends_identifier_and_password() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v4/loadtracks"))
        .and(query_param("identifier", "ytsearch:lofi"))
        .and(header("Authorization", PASSWORD))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "loadType": "search",
            "data": [wire_track(1), wire_track(2)]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let result = node(&server).await.resolve("ytsearch:lofi").await.unwrap();

    assert_eq!(result.load_type, LoadType::Search);
    let titles: Vec<&str> = result.tracks.iter().map(|t| t.title.as_str()).collect();
    assert_eq!(titles, vec!["Track 1", "Track 2"]);
    assert_eq!(result.tracks[0].duration_ms, 200_000);
}

#[tokio::test]
async fn load_error_is_reported_in_the_result() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v4/loadtracks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "loadType": "error",
            "data": { "message": "Video unavailable", "severity": "common", "cause": "x" }
        })))
        .mount(&server)
        .await;

    let result = node(&server).await.resolve("https://example.com/gone").await.unwrap();

    assert_eq!(result.load_type, LoadType::Error);
    assert!(result.tracks.is_empty());
    assert_eq!(result.error.as_deref(), Some("Video unavailable"));
}

#[tokio::test]
async fn player_updates_wait_for_a_session() {
    let server = MockServer::start().await;
    let node = node(&server).await;

    assert_matches!(
        node.update_player(GuildId::new(42), PlayerUpdate::paused(true)).await,
        Err(NodeError::NotReady)
    );
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn player_update_patches_the_session_player() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/v4/sessions/abc/players/42"))
        .and(header("Authorization", PASSWORD))
        .and(body_json(json!({ "volume": 35 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v4/sessions/abc/players/42"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let node = node(&server).await;
    node.set_session_id(Some("abc".into()));

    node.update_player(GuildId::new(42), PlayerUpdate::volume(35))
        .await
        .unwrap();
    node.destroy_player(GuildId::new(42)).await.unwrap();
}

#[tokio::test]
async fn error_status_carries_the_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v4/loadtracks"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
        .mount(&server)
        .await;

    let err = node(&server).await.resolve("anything").await.unwrap_err();

    assert_matches!(
        err,
        NodeError::Status { status: 401, ref message } if message == "Unauthorized"
    );
}
