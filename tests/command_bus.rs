#![cfg(feature = "command_bus")]

mod common;

use mockall::Sequence;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::sync::Arc;

use common::Harness;
use common::fixtures::{GUILD, LISTENER, OTHER_GUILD, OTHER_LISTENER, OTHER_VOICE};
use common::mocks::MockPublisher;
use ensemble::commands::music::utils::command_bus::{BusResponse, CommandBus};

fn request(guild: impl ToString, user: impl ToString, command: &str, params: Value) -> String {
    json!({
        "guild_id": guild.to_string(),
        "request_id": "req-1",
        "command": command,
        "user_id": user.to_string(),
        "params": params,
    })
    .to_string()
}

fn response(payload: &str) -> BusResponse {
    serde_json::from_str(payload).expect("response is valid JSON")
}

#[tokio::test]
async fn other_shards_guilds_get_no_reply() {
    let h = Harness::new();
    let mut publisher = MockPublisher::new();
    publisher.expect_publish().never();
    let bus = CommandBus::new(h.music.clone(), Arc::new(publisher));

    bus.handle_payload(&request(OTHER_GUILD, LISTENER, "get_state", json!({})))
        .await;
}

#[tokio::test]
async fn malformed_messages_are_dropped() {
    let h = Harness::new();
    let mut publisher = MockPublisher::new();
    publisher.expect_publish().never();
    let bus = CommandBus::new(h.music.clone(), Arc::new(publisher));

    bus.handle_payload("not json").await;
    bus.handle_payload(r#"{"guild_id":"abc","request_id":"x","command":"pause","user_id":"1"}"#)
        .await;
}

#[tokio::test]
async fn unknown_command_gets_one_failed_response() {
    let h = Harness::new();
    let mut publisher = MockPublisher::new();
    publisher
        .expect_publish()
        .withf(|topic, payload| {
            let reply = response(payload);
            topic.ends_with("bot:response:req-1")
                && !reply.success
                && reply.error.as_deref() == Some("Unknown command: dance")
        })
        .times(1)
        .returning(|_, _| Ok(()));
    let bus = CommandBus::new(h.music.clone(), Arc::new(publisher));

    bus.handle_payload(&request(GUILD, LISTENER, "dance", json!({})))
        .await;
}

#[tokio::test]
async fn missing_parameter_is_reported() {
    let h = Harness::new();
    let mut publisher = MockPublisher::new();
    publisher
        .expect_publish()
        .withf(|_, payload| {
            response(payload).error.as_deref() == Some("Missing parameter: volume")
        })
        .times(1)
        .returning(|_, _| Ok(()));
    let bus = CommandBus::new(h.music.clone(), Arc::new(publisher));

    bus.handle_payload(&request(GUILD, LISTENER, "volume", json!({})))
        .await;
}

#[tokio::test]
async fn get_state_replies_without_pushing_state() {
    let h = Harness::new();
    h.play_tracks(2).await;
    let mut publisher = MockPublisher::new();
    publisher
        .expect_publish()
        .withf(|topic, payload| {
            let reply = response(payload);
            let data = reply.data.unwrap_or_default();
            topic.ends_with("bot:response:req-1")
                && reply.success
                && data["is_playing"] == true
                && data["queue_length"] == 1
                && data["current_track"]["title"] == "Track 1"
        })
        .times(1)
        .returning(|_, _| Ok(()));
    let bus = CommandBus::new(h.music.clone(), Arc::new(publisher));

    bus.handle_payload(&request(GUILD, LISTENER, "get_state", json!({})))
        .await;
}

#[tokio::test]
async fn mutation_pushes_state_before_replying() {
    let h = Harness::new();
    h.play_tracks(1).await;
    let mut seq = Sequence::new();
    let mut publisher = MockPublisher::new();
    publisher
        .expect_publish()
        .withf(|topic, payload| {
            let state: Value = serde_json::from_str(payload).unwrap_or_default();
            topic.ends_with(&format!("bot:player_update:{GUILD}")) && state["is_paused"] == true
        })
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Ok(()));
    publisher
        .expect_publish()
        .withf(|topic, payload| {
            let reply = response(payload);
            topic.ends_with("bot:response:req-1")
                && reply.success
                && reply.data == Some(json!({ "paused": true }))
        })
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Ok(()));
    let bus = CommandBus::new(h.music.clone(), Arc::new(publisher));

    bus.handle_payload(&request(GUILD, LISTENER, "pause", json!({})))
        .await;

    assert!(h.music.get_state(GUILD).await.is_paused);
}

#[tokio::test]
async fn bus_user_in_another_channel_is_refused() {
    let h = Harness::new();
    h.play_tracks(1).await;
    h.directory.join(OTHER_LISTENER, OTHER_VOICE);
    let mut publisher = MockPublisher::new();
    publisher
        .expect_publish()
        .withf(|topic, payload| {
            let reply = response(payload);
            topic.ends_with("bot:response:req-1")
                && !reply.success
                && reply.error.as_deref() == Some("User is in a different voice channel than the bot")
        })
        .times(1)
        .returning(|_, _| Ok(()));
    let bus = CommandBus::new(h.music.clone(), Arc::new(publisher));

    bus.handle_payload(&request(GUILD, OTHER_LISTENER, "skip", json!({})))
        .await;

    let state = h.music.get_state(GUILD).await;
    assert_eq!(
        state.current_track.map(|t| t.title),
        Some("Track 1".to_string())
    );
}

#[tokio::test]
async fn play_over_the_bus_starts_a_session() {
    let h = Harness::new();
    h.node
        .add_result("ytsearch:lofi", common::fixtures::search_result(vec![common::fixtures::track(7)]));
    let mut publisher = MockPublisher::new();
    publisher
        .expect_publish()
        .times(2)
        .returning(|_, _| Ok(()));
    let bus = CommandBus::new(h.music.clone(), Arc::new(publisher));

    bus.handle_payload(&request(GUILD, LISTENER, "play", json!({ "query": "lofi" })))
        .await;

    let state = h.music.queue(GUILD).await.unwrap();
    assert_eq!(state.current.as_ref().map(|t| t.title.as_str()), Some("Track 7"));
    assert_eq!(state.bound_text_channel_id, None);
    assert_eq!(h.chat.sends(), 0);
}

#[tokio::test]
async fn failed_publish_does_not_panic() {
    let h = Harness::new();
    h.play_tracks(1).await;
    let mut publisher = MockPublisher::new();
    publisher.expect_publish().times(2).returning(|_, _| {
        Err(serde_json::from_str::<Value>("{").unwrap_err().into())
    });
    let bus = CommandBus::new(h.music.clone(), Arc::new(publisher));

    bus.handle_payload(&request(GUILD, LISTENER, "shuffle", json!({})))
        .await;

    assert!(h.music.get_state(GUILD).await.shuffle);
}
